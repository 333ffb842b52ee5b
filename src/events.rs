// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Progress and outcome events for the presentation layer.

use std::fmt;
use tokio::sync::mpsc;

use crate::bluetooth::protocol::Exchange;
use crate::error::Outcome;

/// Stage a pairing or unlock flow has reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowStage {
    /// Powering on the radio.
    EnablingAdapter,
    /// Looking for the lock among bonded and nearby devices.
    Resolving { address: String },
    /// Creating a bond with the lock.
    Bonding { address: String },
    /// Opening the serial channel. The first connection after a new bond
    /// is noticeably slower.
    Connecting {
        address: String,
        initially_bonded: bool,
    },
    /// Request sent, waiting for the lock to answer.
    Exchanging(Exchange),
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStage::EnablingAdapter => write!(f, "Enabling Bluetooth"),
            FlowStage::Resolving { address } => write!(f, "Looking for {}", address),
            FlowStage::Bonding { address } => write!(f, "Bonding with {}", address),
            FlowStage::Connecting {
                address,
                initially_bonded: false,
            } => write!(f, "Connecting to {} (first connection, may take a while)", address),
            FlowStage::Connecting { address, .. } => write!(f, "Connecting to {}", address),
            FlowStage::Exchanging(exchange) => write!(f, "Waiting for {} response", exchange.as_str()),
        }
    }
}

/// Event emitted by an orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    Progress(FlowStage),
    /// Exactly one per invocation, always last.
    Finished(Outcome),
}

/// Optional channel flow events are sent to.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<FlowEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<FlowEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Send an event. A closed receiver is ignored.
    pub async fn emit(&self, event: FlowEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event).await;
        }
    }

    pub async fn progress(&self, stage: FlowStage) {
        self.emit(FlowEvent::Progress(stage)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_are_delivered_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventSink::new(tx);

        sink.progress(FlowStage::EnablingAdapter).await;
        sink.emit(FlowEvent::Finished(Outcome::Success)).await;

        assert_eq!(
            rx.recv().await,
            Some(FlowEvent::Progress(FlowStage::EnablingAdapter))
        );
        assert_eq!(rx.recv().await, Some(FlowEvent::Finished(Outcome::Success)));
    }

    #[tokio::test]
    async fn test_closed_receiver_is_ignored() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        EventSink::new(tx)
            .emit(FlowEvent::Finished(Outcome::Failed))
            .await;
        EventSink::disabled()
            .emit(FlowEvent::Finished(Outcome::Failed))
            .await;
    }

    #[test]
    fn test_first_connection_hint() {
        let stage = FlowStage::Connecting {
            address: "AA:BB:CC:DD:EE:FF".into(),
            initially_bonded: false,
        };
        assert!(stage.to_string().contains("first connection"));
    }
}
