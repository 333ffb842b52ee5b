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

//! End-to-end pairing and unlock flows over a simulated radio.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use url::Url;
use uuid::Uuid;

use pslock_desktop::bluetooth::{
    BondEvent, BondState, DiscoveredDevice, DiscoveryEvent, EventStream, RadioAdapter,
    SerialStream, SerialTransport, SPP_UUID,
};
use pslock_desktop::config::BluetoothConfig;
use pslock_desktop::crypto::{encrypt, EMBEDDED_KEY};
use pslock_desktop::error::Result;
use pslock_desktop::{
    CredentialCodec, CurrentTask, DeviceRegistry, EngineError, EventSink, FlowContext,
    FlowEvent, Outcome, PairingOrchestrator, UnlockOrchestrator,
};

const MAC: &str = "AA:BB:CC:DD:EE:FF";
const SHARED_KEY: &[u8] = b"0123456789abcdef";
/// Key the simulated lock issues on pairing, sentinel included.
const DEVICE_KEY: &[u8] = &[0xca, 0xfe, 0x20];

/// Radio where one lock is in range and bonding always succeeds.
struct SimulatedRadio {
    bonded: Mutex<HashSet<String>>,
    bond_tx: broadcast::Sender<BondEvent>,
}

impl SimulatedRadio {
    fn new() -> Arc<Self> {
        let (bond_tx, _) = broadcast::channel(8);
        Arc::new(Self {
            bonded: Mutex::new(HashSet::new()),
            bond_tx,
        })
    }
}

#[async_trait]
impl RadioAdapter for SimulatedRadio {
    async fn is_available(&self) -> bool {
        true
    }

    async fn is_enabled(&self) -> Result<bool> {
        Ok(true)
    }

    async fn request_enable(&self) -> Result<bool> {
        Ok(true)
    }

    async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        Ok(self.bonded.lock().iter().map(DiscoveredDevice::new).collect())
    }

    async fn start_discovery(&self) -> Result<EventStream<DiscoveryEvent>> {
        Ok(stream::iter(vec![
            DiscoveryEvent::Found(DiscoveredDevice::new(MAC)),
            DiscoveryEvent::Finished,
        ])
        .boxed())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        Ok(())
    }

    async fn bond_state(&self, address: &str) -> Result<BondState> {
        Ok(if self.bonded.lock().contains(address) {
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
        self.bonded.lock().insert(address.to_string());
        let _ = self.bond_tx.send(BondEvent {
            address: address.to_string(),
            previous: BondState::Bonding,
            current: BondState::Bonded,
        });
        Ok(true)
    }
}

/// Transport whose every connection reaches a simulated lock.
#[derive(Default)]
struct SimulatedLock {
    connects: AtomicUsize,
}

#[async_trait]
impl SerialTransport for SimulatedLock {
    async fn connect(
        &self,
        device: &DiscoveredDevice,
        service: Uuid,
    ) -> Result<Box<dyn SerialStream>> {
        assert_eq!(service, SPP_UUID);
        assert_eq!(device.address, MAC);
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (client, mut lock) = tokio::io::duplex(256);
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let Ok(n) = lock.read(&mut buf).await else {
                return;
            };
            let reply: &[u8] = if &buf[..n] == SHARED_KEY {
                DEVICE_KEY
            } else if &buf[..n] == DEVICE_KEY {
                &[0x20]
            } else {
                &[0xee, 0x20]
            };
            let _ = lock.write_all(reply).await;
            // Wait for the client to hang up.
            let _ = lock.read(&mut buf).await;
        });
        Ok(Box::new(client))
    }
}

fn credential_url() -> String {
    let iv = [7u8; 16];
    let ciphertext = encrypt(SHARED_KEY, &EMBEDDED_KEY, &iv).unwrap();
    Url::parse_with_params(
        "https://pslock.ceclin.top/lock",
        &[
            ("mac", MAC.to_string()),
            ("key", STANDARD.encode(ciphertext)),
            ("iv", hex::encode(iv)),
        ],
    )
    .unwrap()
    .to_string()
}

fn outcomes(rx: &mut mpsc::Receiver<FlowEvent>) -> Vec<Outcome> {
    let mut outcomes = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let FlowEvent::Finished(outcome) = event {
            outcomes.push(outcome);
        }
    }
    outcomes
}

#[tokio::test]
async fn test_pair_then_unlock() {
    let dir = tempdir().unwrap();
    let registry = Arc::new(DeviceRegistry::open(dir.path()).unwrap());
    let radio = SimulatedRadio::new();
    let lock = Arc::new(SimulatedLock::default());

    let (tx, mut events) = mpsc::channel(32);
    let ctx = Arc::new(
        FlowContext::new(radio.clone(), lock.clone(), &BluetoothConfig::default())
            .with_events(EventSink::new(tx)),
    );

    let pairing = PairingOrchestrator::new(
        CredentialCodec::default(),
        ctx.clone(),
        registry.clone(),
        "Unnamed lock",
    );
    let device = pairing.pair_from_qr(&credential_url()).await.unwrap();
    assert_eq!(device.mac, MAC);
    assert_eq!(device.key, "cafe20");
    assert!(radio.bonded.lock().contains(MAC));

    registry.rename(MAC, "Front door").unwrap();

    let task = CurrentTask::new();
    let unlock = UnlockOrchestrator::new(ctx.clone(), task.clone(), registry.clone());
    unlock.unlock_mac(MAC).await.unwrap();

    assert!(task.current().is_none());
    assert!(!ctx.radio_lock().is_held());
    assert_eq!(lock.connects.load(Ordering::SeqCst), 2);
    assert_eq!(outcomes(&mut events), vec![Outcome::Success, Outcome::Success]);

    // The registry survives a restart.
    drop(registry);
    let reopened = DeviceRegistry::open(dir.path()).unwrap();
    let stored = reopened.get(MAC).unwrap();
    assert_eq!(stored.key, "cafe20");
    assert_eq!(stored.name, "Front door");
}

#[tokio::test]
async fn test_unlock_with_stale_key_is_rejected() {
    let dir = tempdir().unwrap();
    let registry = Arc::new(DeviceRegistry::open(dir.path()).unwrap());
    registry
        .upsert_from_pairing(pslock_desktop::Device::new(MAC, "0102", "Old"))
        .unwrap();

    let (tx, mut events) = mpsc::channel(32);
    let ctx = Arc::new(
        FlowContext::new(
            SimulatedRadio::new(),
            Arc::new(SimulatedLock::default()),
            &BluetoothConfig::default(),
        )
        .with_events(EventSink::new(tx)),
    );

    let unlock = UnlockOrchestrator::new(ctx, CurrentTask::new(), registry);
    let result = unlock.unlock_mac(MAC).await;

    assert!(matches!(result, Err(EngineError::UnexpectedResponse(_))));
    assert_eq!(outcomes(&mut events), vec![Outcome::LinkRejected]);
}

#[test]
fn test_foreign_qr_is_rejected() {
    let codec = CredentialCodec::default();
    assert!(codec.decode("https://example.com/?mac=AA&key=AA&iv=00").is_err());
    assert!(codec.decode("just some text").is_err());

    let credential = codec.decode(&credential_url()).unwrap();
    assert_eq!(credential.device_address, MAC);
    assert_eq!(credential.key_bytes().unwrap(), SHARED_KEY);
}
