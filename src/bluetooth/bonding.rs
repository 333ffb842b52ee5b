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

//! Bonding with a remote device.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{BondState, DiscoveredDevice, RadioAdapter};
use crate::error::{EngineError, Result};

/// How a device came to be bonded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondingStatus {
    /// A bond existed before this flow.
    AlreadyBonded,
    /// The bond was created by this flow.
    Created,
}

/// Drives `NONE -> BONDING -> {BONDED, NONE}` for one device at a time.
///
/// No timeout is applied: bonding may be waiting on the user.
pub struct BondingCoordinator {
    adapter: Arc<dyn RadioAdapter>,
}

impl BondingCoordinator {
    pub fn new(adapter: Arc<dyn RadioAdapter>) -> Self {
        Self { adapter }
    }

    /// Make sure `device` is bonded, creating the bond if needed.
    pub async fn ensure_bonded(&self, device: &DiscoveredDevice) -> Result<BondingStatus> {
        let address = device.address.as_str();
        if self.adapter.bond_state(address).await? == BondState::Bonded {
            debug!("Device {} already bonded", address);
            return Ok(BondingStatus::AlreadyBonded);
        }

        // Subscribe first so the transition cannot slip past us.
        let mut events = self.adapter.bond_events().await?;

        info!("Creating bond with remote device {}", address);
        if !self.adapter.request_bond(address).await? {
            warn!("Platform refused to bond with {}", address);
            return Err(EngineError::BondingRejected(address.to_string()));
        }

        while let Some(event) = events.next().await {
            if !device.matches(&event.address) || event.previous != BondState::Bonding {
                continue;
            }
            if event.current == BondState::Bonded {
                info!("Bond created with {}", address);
                return Ok(BondingStatus::Created);
            }
            warn!("Bonding with {} ended in {:?}", address, event.current);
            break;
        }

        Err(EngineError::BondingFailed(address.to_string()))
    }
}
