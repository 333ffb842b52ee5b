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

//! Pairing a new lock from a scanned credential.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bluetooth::protocol::Exchange;
use crate::bluetooth::{BondingStatus, DiscoveredDevice};
use crate::crypto::{Credential, CredentialCodec};
use crate::error::Result;
use crate::events::FlowStage;
use crate::flow::FlowContext;
use crate::storage::{Device, DeviceRegistry};

/// Runs credential -> resolve -> bond -> pair exchange -> registry.
///
/// A failing stage ends the flow. Side effects of earlier stages are kept:
/// a bond created before a link failure stays in place.
pub struct PairingOrchestrator {
    codec: CredentialCodec,
    ctx: Arc<FlowContext>,
    registry: Arc<DeviceRegistry>,
    default_name: String,
}

impl PairingOrchestrator {
    pub fn new(
        codec: CredentialCodec,
        ctx: Arc<FlowContext>,
        registry: Arc<DeviceRegistry>,
        default_name: impl Into<String>,
    ) -> Self {
        Self {
            codec,
            ctx,
            registry,
            default_name: default_name.into(),
        }
    }

    /// Pair using the text of a scanned QR code.
    pub async fn pair_from_qr(&self, content: &str) -> Result<Device> {
        let result = match self.codec.decode(content) {
            Ok(credential) => {
                info!("Credential for {} accepted", credential.device_address);
                self.run(&credential).await
            }
            Err(e) => {
                warn!("Scanned content is not a lock credential: {}", e);
                Err(e.into())
            }
        };
        self.ctx.finish(&result).await;
        result
    }

    /// Pair using an already decoded credential.
    pub async fn pair(&self, credential: &Credential) -> Result<Device> {
        let result = self.run(credential).await;
        self.ctx.finish(&result).await;
        result
    }

    async fn run(&self, credential: &Credential) -> Result<Device> {
        let shared_key = credential.key_bytes()?;
        let (device, status) = self.ctx.prepare(&credential.device_address).await?;

        let result = self.exchange(&device, status, &shared_key).await;
        if result.is_err() && status == BondingStatus::Created {
            warn!(
                "Pairing with {} failed after bonding; the bond is kept",
                device.address
            );
        }
        result
    }

    async fn exchange(
        &self,
        device: &DiscoveredDevice,
        status: BondingStatus,
        shared_key: &[u8],
    ) -> Result<Device> {
        let session = self.ctx.open_link(device, status).await?;
        self.ctx.progress(FlowStage::Exchanging(Exchange::Pair)).await;
        let key = session.pair(shared_key).await?;

        let stored = self.registry.upsert_from_pairing(Device::new(
            device.address.as_str(),
            key,
            self.default_name.as_str(),
        ))?;
        info!("Paired with {} ({})", stored.mac, stored.name);
        debug!("Stored key for {}: {}", stored.mac, stored.key);
        Ok(stored)
    }
}
