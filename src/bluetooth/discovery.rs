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

//! Resolving a lock address to a connectable device.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{DiscoveredDevice, DiscoveryEvent, EventStream, RadioAdapter};
use crate::error::{EngineError, Result};

/// Finds devices, bonded ones first, then by scanning.
pub struct DiscoveryCoordinator {
    adapter: Arc<dyn RadioAdapter>,
    scan_timeout: Duration,
}

impl DiscoveryCoordinator {
    pub fn new(adapter: Arc<dyn RadioAdapter>, scan_timeout: Duration) -> Self {
        Self {
            adapter,
            scan_timeout,
        }
    }

    /// Resolve `address` to a device handle.
    pub async fn resolve(&self, address: &str) -> Result<DiscoveredDevice> {
        if let Some(device) = self
            .adapter
            .bonded_devices()
            .await?
            .into_iter()
            .find(|d| d.matches(address))
        {
            debug!("Device {} is already bonded", address);
            return Ok(device);
        }

        info!("Scanning for bluetooth device {}", address);
        let scan = ActiveScan {
            adapter: self.adapter.clone(),
            events: Some(self.adapter.start_discovery().await?),
            stopped: false,
        };
        let found = scan.find(address, self.scan_timeout).await;

        match found {
            Some(device) => {
                info!("Bluetooth device {} found", address);
                Ok(device)
            }
            None => {
                info!("Bluetooth device {} was not found", address);
                Err(EngineError::DeviceNotFound(address.to_string()))
            }
        }
    }
}

/// A running scan. The platform scan is stopped when this is finished or
/// dropped.
struct ActiveScan {
    adapter: Arc<dyn RadioAdapter>,
    events: Option<EventStream<DiscoveryEvent>>,
    stopped: bool,
}

impl ActiveScan {
    async fn find(mut self, address: &str, limit: Duration) -> Option<DiscoveredDevice> {
        let found = match self.events.as_mut() {
            Some(events) => match timeout(limit, Self::first_match(events, address)).await {
                Ok(found) => found,
                Err(_) => {
                    debug!("Scan window of {:?} elapsed", limit);
                    None
                }
            },
            None => None,
        };
        self.stop().await;
        found
    }

    async fn first_match(
        events: &mut EventStream<DiscoveryEvent>,
        address: &str,
    ) -> Option<DiscoveredDevice> {
        while let Some(event) = events.next().await {
            match event {
                DiscoveryEvent::Found(device) if device.matches(address) => return Some(device),
                DiscoveryEvent::Found(device) => {
                    debug!("Bluetooth device found: {}", device.address);
                }
                DiscoveryEvent::Finished => {
                    debug!("Bluetooth device discovery finished");
                    return None;
                }
            }
        }
        None
    }

    async fn stop(&mut self) {
        self.events.take();
        self.stopped = true;
        if let Err(e) = self.adapter.cancel_discovery().await {
            warn!("Failed to cancel discovery: {}", e);
        }
    }
}

impl Drop for ActiveScan {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        self.events.take();
        // Resolve was cancelled mid-scan.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let adapter = self.adapter.clone();
            handle.spawn(async move {
                if let Err(e) = adapter.cancel_discovery().await {
                    warn!("Failed to cancel discovery: {}", e);
                }
            });
        }
    }
}
