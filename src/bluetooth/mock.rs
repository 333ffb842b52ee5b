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

//! Simulated radio for unit tests.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    BondEvent, BondState, DiscoveredDevice, DiscoveryEvent, EventStream, RadioAdapter,
    SerialStream, SerialTransport,
};
use crate::error::{EngineError, Result};

/// How the simulated platform answers a bond request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondBehavior {
    Accept,
    Refuse,
    Fail,
}

pub struct MockAdapter {
    pub enabled: AtomicBool,
    pub enable_allowed: AtomicBool,
    bonded: Mutex<HashSet<String>>,
    nearby: Mutex<Vec<String>>,
    endless_scan: AtomicBool,
    bond_behavior: Mutex<BondBehavior>,
    bond_tx: broadcast::Sender<BondEvent>,
    pub bond_requests: AtomicUsize,
    pub discoveries_started: AtomicUsize,
    pub discoveries_cancelled: AtomicUsize,
}

impl MockAdapter {
    pub fn new() -> Arc<Self> {
        let (bond_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            enable_allowed: AtomicBool::new(true),
            bonded: Mutex::new(HashSet::new()),
            nearby: Mutex::new(Vec::new()),
            endless_scan: AtomicBool::new(false),
            bond_behavior: Mutex::new(BondBehavior::Accept),
            bond_tx,
            bond_requests: AtomicUsize::new(0),
            discoveries_started: AtomicUsize::new(0),
            discoveries_cancelled: AtomicUsize::new(0),
        })
    }

    pub fn with_bonded(self: Arc<Self>, address: &str) -> Arc<Self> {
        self.bonded.lock().insert(address.to_string());
        self
    }

    pub fn with_nearby(self: Arc<Self>, address: &str) -> Arc<Self> {
        self.nearby.lock().push(address.to_string());
        self
    }

    /// Scan never reports `Finished`, as with BlueZ.
    pub fn with_endless_scan(self: Arc<Self>) -> Arc<Self> {
        self.endless_scan.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_bond_behavior(self: Arc<Self>, behavior: BondBehavior) -> Arc<Self> {
        *self.bond_behavior.lock() = behavior;
        self
    }

    pub fn is_bonded(&self, address: &str) -> bool {
        self.bonded.lock().contains(address)
    }

    fn emit(&self, address: &str, previous: BondState, current: BondState) {
        let _ = self.bond_tx.send(BondEvent {
            address: address.to_string(),
            previous,
            current,
        });
    }
}

#[async_trait]
impl RadioAdapter for MockAdapter {
    async fn is_available(&self) -> bool {
        true
    }

    async fn is_enabled(&self) -> Result<bool> {
        Ok(self.enabled.load(Ordering::SeqCst))
    }

    async fn request_enable(&self) -> Result<bool> {
        let allowed = self.enable_allowed.load(Ordering::SeqCst);
        if allowed {
            self.enabled.store(true, Ordering::SeqCst);
        }
        Ok(allowed)
    }

    async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        Ok(self
            .bonded
            .lock()
            .iter()
            .map(DiscoveredDevice::new)
            .collect())
    }

    async fn start_discovery(&self) -> Result<EventStream<DiscoveryEvent>> {
        self.discoveries_started.fetch_add(1, Ordering::SeqCst);
        let found: Vec<DiscoveryEvent> = self
            .nearby
            .lock()
            .iter()
            .map(|a| DiscoveryEvent::Found(DiscoveredDevice::new(a)))
            .collect();
        let found = stream::iter(found);
        if self.endless_scan.load(Ordering::SeqCst) {
            Ok(found.chain(stream::pending()).boxed())
        } else {
            Ok(found
                .chain(stream::once(async { DiscoveryEvent::Finished }))
                .boxed())
        }
    }

    async fn cancel_discovery(&self) -> Result<()> {
        self.discoveries_cancelled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn bond_state(&self, address: &str) -> Result<BondState> {
        Ok(if self.is_bonded(address) {
            BondState::Bonded
        } else {
            BondState::None
        })
    }

    async fn bond_events(&self) -> Result<EventStream<BondEvent>> {
        let rx = self.bond_tx.subscribe();
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.ok().map(|ev| (ev, rx))
        })
        .boxed())
    }

    async fn request_bond(&self, address: &str) -> Result<bool> {
        self.bond_requests.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.bond_behavior.lock();
        match behavior {
            BondBehavior::Refuse => return Ok(false),
            BondBehavior::Accept => {
                self.emit(address, BondState::None, BondState::Bonding);
                self.bonded.lock().insert(address.to_string());
                self.emit(address, BondState::Bonding, BondState::Bonded);
            }
            BondBehavior::Fail => {
                self.emit(address, BondState::None, BondState::Bonding);
                self.emit(address, BondState::Bonding, BondState::None);
            }
        }
        Ok(true)
    }
}

/// Transport handing out one end of an in-memory duplex pipe.
pub struct MockTransport {
    stream: Mutex<Option<DuplexStream>>,
    pub connects: AtomicUsize,
}

impl MockTransport {
    /// Returns the transport and the lock's end of the pipe.
    pub fn pair() -> (Self, DuplexStream) {
        let (client, peer) = tokio::io::duplex(1024);
        (
            Self {
                stream: Mutex::new(Some(client)),
                connects: AtomicUsize::new(0),
            },
            peer,
        )
    }
}

#[async_trait]
impl SerialTransport for MockTransport {
    async fn connect(
        &self,
        _device: &DiscoveredDevice,
        _service: Uuid,
    ) -> Result<Box<dyn SerialStream>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let stream = self.stream.lock().take().ok_or_else(|| {
            EngineError::LinkIo(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no simulated lock listening",
            ))
        })?;
        Ok(Box::new(stream))
    }
}
