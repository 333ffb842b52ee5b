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

//! Ordered registry of paired locks.
//!
//! The front of the list is the most recently paired or used device. Every
//! change is written to disk before it becomes visible in memory.

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::path::Path;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::prefs::{Prefs, PrefsFile};

const REGISTRY_FILE: &str = "devices.json";
const ALL_MAC: &str = "all_mac";

fn index_key(mac: &str) -> String {
    format!("index_{}", mac)
}

fn name_key(mac: &str) -> String {
    format!("name_{}", mac)
}

fn key_key(mac: &str) -> String {
    format!("key_{}", mac)
}

/// A paired lock.
#[derive(Clone, PartialEq, Eq)]
pub struct Device {
    pub mac: String,
    /// Hex-encoded key issued by the lock during pairing.
    pub key: String,
    pub name: String,
}

impl Device {
    pub fn new(mac: impl Into<String>, key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            key: key.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("mac", &self.mac)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Persistent, ordered set of devices keyed by mac.
pub struct DeviceRegistry {
    file: PrefsFile,
    devices: RwLock<Vec<Device>>,
    write_lock: Mutex<()>,
    tx: watch::Sender<Vec<Device>>,
}

impl DeviceRegistry {
    /// Open (or create) the registry in `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let file = PrefsFile::new(data_dir.join(REGISTRY_FILE));
        info!("Opening device registry: {:?}", file.path());

        let devices = Self::decode(&file.load()?);
        info!("Loaded {} device(s)", devices.len());

        let (tx, _) = watch::channel(devices.clone());
        Ok(Self {
            file,
            devices: RwLock::new(devices),
            write_lock: Mutex::new(()),
            tx,
        })
    }

    fn decode(prefs: &Prefs) -> Vec<Device> {
        let Some(macs) = prefs.get_string_set(ALL_MAC) else {
            return Vec::new();
        };

        let mut ranked = Vec::with_capacity(macs.len());
        for mac in macs {
            let record = (
                prefs.get_int(&index_key(mac)),
                prefs.get_string(&key_key(mac)),
                prefs.get_string(&name_key(mac)),
            );
            match record {
                (Some(index), Some(key), Some(name)) => {
                    debug!("Load device {{ mac: {}, key: {}, name: {} }}", mac, key, name);
                    ranked.push((index, Device::new(mac.as_str(), key, name)));
                }
                _ => warn!("Skipping incomplete registry record for {}", mac),
            }
        }

        ranked.sort_by_key(|(index, _)| *index);
        ranked.into_iter().map(|(_, device)| device).collect()
    }

    fn encode(devices: &[Device]) -> Prefs {
        let mut prefs = Prefs::default();
        let mut macs = BTreeSet::new();
        for (i, device) in devices.iter().enumerate() {
            macs.insert(device.mac.clone());
            prefs.put_int(index_key(&device.mac), i as i64);
            prefs.put_string(name_key(&device.mac), device.name.as_str());
            prefs.put_string(key_key(&device.mac), device.key.as_str());
        }
        prefs.put_string_set(ALL_MAC, macs);
        prefs
    }

    /// Apply `change` to a copy of the list, persist it, then publish it.
    ///
    /// Nothing is written when `change` returns `None`.
    fn commit<T>(&self, change: impl FnOnce(&mut Vec<Device>) -> Option<T>) -> Result<Option<T>> {
        let _guard = self.write_lock.lock();

        let mut next = self.devices.read().clone();
        let Some(result) = change(&mut next) else {
            return Ok(None);
        };

        self.file.store(&Self::encode(&next))?;
        debug!("Stored {} device(s)", next.len());

        *self.devices.write() = next.clone();
        self.tx.send_replace(next);
        Ok(Some(result))
    }

    /// Record a freshly paired device at the front of the list.
    ///
    /// A known mac keeps its name and takes the new key. An unknown mac is
    /// inserted with the supplied name. Returns the stored entry.
    pub fn upsert_from_pairing(&self, device: Device) -> Result<Device> {
        debug!(
            "Upsert device {{ mac: {}, key: {}, name: {} }}",
            device.mac, device.key, device.name
        );
        let stored = self.commit(|devices| {
            let entry = match devices.iter().position(|d| d.mac == device.mac) {
                Some(i) => {
                    let mut existing = devices.remove(i);
                    existing.key = device.key;
                    existing
                }
                None => device,
            };
            devices.insert(0, entry.clone());
            Some(entry)
        })?;
        // The closure always produces an entry.
        stored.ok_or_else(|| anyhow::anyhow!("Registry update produced no entry"))
    }

    /// Move a known device to the front without changing it.
    pub fn promote(&self, mac: &str) -> Result<Option<Device>> {
        self.commit(|devices| {
            let i = devices.iter().position(|d| d.mac == mac)?;
            let device = devices.remove(i);
            devices.insert(0, device.clone());
            Some(device)
        })
    }

    /// Rename a device in place. Returns `false` if the mac is unknown.
    pub fn rename(&self, mac: &str, name: &str) -> Result<bool> {
        let renamed = self.commit(|devices| {
            let device = devices.iter_mut().find(|d| d.mac == mac)?;
            device.name = name.to_string();
            Some(())
        })?;

        if renamed.is_none() {
            info!("Rename ignored, no device {}", mac);
        }
        Ok(renamed.is_some())
    }

    /// Devices front to back.
    pub fn list_all(&self) -> Vec<Device> {
        self.devices.read().clone()
    }

    pub fn get(&self, mac: &str) -> Option<Device> {
        self.devices.read().iter().find(|d| d.mac == mac).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Live view of the ordered list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Device>> {
        self.tx.subscribe()
    }
}
