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

//! Current task slot.
//!
//! Holds the device the next unlock should target. The slot is a single
//! mailbox: a new task overwrites an outstanding one (last write wins) and
//! nothing is queued. Preempting a task does not interrupt a link that is
//! already open for it.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::storage::{Device, DeviceRegistry};

pub struct CurrentTask {
    tx: watch::Sender<Option<Device>>,
}

impl CurrentTask {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(None);
        Arc::new(Self { tx })
    }

    /// Place `device` in the slot, returning a preempted task if any.
    pub fn set(&self, device: Device) -> Option<Device> {
        let mut preempted = None;
        self.tx.send_if_modified(|slot| {
            if slot.as_ref() == Some(&device) {
                return false;
            }
            debug!("New task for {}", device.mac);
            preempted = slot.replace(device);
            true
        });

        if let Some(previous) = &preempted {
            warn!("Task for {} was preempted", previous.mac);
        }
        preempted
    }

    /// Select a registered device by mac and move it to the front of the
    /// registry. Unknown macs are ignored.
    pub fn select(&self, registry: &DeviceRegistry, mac: &str) -> Result<Option<Device>> {
        let Some(device) = registry.promote(mac)? else {
            info!("No registered device {}, task ignored", mac);
            return Ok(None);
        };
        self.set(device.clone());
        Ok(Some(device))
    }

    pub fn current(&self) -> Option<Device> {
        self.tx.borrow().clone()
    }

    /// Clear the slot if it still holds `device`.
    ///
    /// Returns `false` when another task has taken the slot in the meantime.
    pub fn complete(&self, device: &Device) -> bool {
        let cleared = self.tx.send_if_modified(|slot| match slot {
            Some(current) if current.mac == device.mac => {
                *slot = None;
                true
            }
            _ => false,
        });
        if cleared {
            debug!("Task for {} completed", device.mac);
        }
        cleared
    }

    /// Live view of the slot.
    pub fn subscribe(&self) -> watch::Receiver<Option<Device>> {
        self.tx.subscribe()
    }
}
