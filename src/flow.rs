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

//! Stages shared by the pairing and unlock flows.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bluetooth::{
    BondingCoordinator, BondingStatus, DiscoveredDevice, DiscoveryCoordinator, LinkSession,
    LinkTiming, RadioAdapter, RadioLock, SerialTransport,
};
use crate::config::BluetoothConfig;
use crate::error::{EngineError, Outcome, Result};
use crate::events::{EventSink, FlowEvent, FlowStage};

/// Platform handles and settings used by every flow.
pub struct FlowContext {
    adapter: Arc<dyn RadioAdapter>,
    transport: Arc<dyn SerialTransport>,
    discovery: DiscoveryCoordinator,
    bonding: BondingCoordinator,
    radio: RadioLock,
    timing: LinkTiming,
    auto_enable: bool,
    events: EventSink,
}

impl FlowContext {
    pub fn new(
        adapter: Arc<dyn RadioAdapter>,
        transport: Arc<dyn SerialTransport>,
        config: &BluetoothConfig,
    ) -> Self {
        Self {
            discovery: DiscoveryCoordinator::new(adapter.clone(), config.discovery_timeout()),
            bonding: BondingCoordinator::new(adapter.clone()),
            adapter,
            transport,
            radio: RadioLock::new(),
            timing: LinkTiming::from(config),
            auto_enable: config.auto_enable,
            events: EventSink::disabled(),
        }
    }

    /// Report progress and outcomes to `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Share `radio` with other contexts on the same adapter, so that only
    /// one link is open across all of them.
    pub fn with_radio_lock(mut self, radio: RadioLock) -> Self {
        self.radio = radio;
        self
    }

    pub fn radio_lock(&self) -> &RadioLock {
        &self.radio
    }

    pub(crate) async fn progress(&self, stage: FlowStage) {
        self.events.progress(stage).await;
    }

    /// Make sure the radio is present and powered.
    pub(crate) async fn ensure_enabled(&self) -> Result<()> {
        if !self.adapter.is_available().await {
            error!("No Bluetooth adapter available");
            return Err(EngineError::AdapterUnavailable(
                "no Bluetooth adapter".to_string(),
            ));
        }
        if self.adapter.is_enabled().await? {
            return Ok(());
        }
        if !self.auto_enable {
            return Err(EngineError::AdapterUnavailable(
                "Bluetooth is disabled".to_string(),
            ));
        }

        self.progress(FlowStage::EnablingAdapter).await;
        if !self.adapter.request_enable().await? {
            warn!("Request to enable Bluetooth was refused");
            return Err(EngineError::AdapterUnavailable(
                "Bluetooth could not be enabled".to_string(),
            ));
        }
        info!("Bluetooth enabled");
        Ok(())
    }

    /// Enable the radio, find the lock and make sure it is bonded.
    pub(crate) async fn prepare(&self, address: &str) -> Result<(DiscoveredDevice, BondingStatus)> {
        self.ensure_enabled().await?;

        self.progress(FlowStage::Resolving {
            address: address.to_string(),
        })
        .await;
        let device = self.discovery.resolve(address).await?;

        self.progress(FlowStage::Bonding {
            address: device.address.clone(),
        })
        .await;
        let status = self.bonding.ensure_bonded(&device).await?;

        Ok((device, status))
    }

    /// Open the serial channel, stopping any scan first.
    pub(crate) async fn open_link(
        &self,
        device: &DiscoveredDevice,
        status: BondingStatus,
    ) -> Result<LinkSession> {
        if let Err(e) = self.adapter.cancel_discovery().await {
            warn!("Failed to cancel discovery: {}", e);
        }

        self.progress(FlowStage::Connecting {
            address: device.address.clone(),
            initially_bonded: status == BondingStatus::AlreadyBonded,
        })
        .await;
        LinkSession::open(self.transport.as_ref(), &self.radio, device, self.timing).await
    }

    /// Report the terminal outcome of a flow.
    pub(crate) async fn finish<T>(&self, result: &Result<T>) {
        let outcome = Outcome::from(result);
        match result {
            Ok(_) => info!("Flow finished: {}", outcome.as_str()),
            Err(e) => warn!("Flow failed: {} ({})", outcome.as_str(), e),
        }
        debug!("Emitting outcome {:?}", outcome);
        self.events.emit(FlowEvent::Finished(outcome)).await;
    }
}
