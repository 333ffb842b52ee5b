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

//! BlueZ-backed radio adapter and RFCOMM transport.

use async_trait::async_trait;
use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use bluer::{Adapter, AdapterEvent, Address, Session};
use futures::stream::{self, AbortHandle, Abortable, StreamExt};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BondEvent, BondState, DiscoveredDevice, DiscoveryEvent, EventStream, RadioAdapter,
    SerialStream, SerialTransport,
};
use crate::error::{EngineError, Result};

fn adapter_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::AdapterUnavailable(e.to_string())
}

fn link_err<E>(e: E) -> EngineError
where
    E: std::error::Error + Send + Sync + 'static,
{
    EngineError::LinkIo(io::Error::other(e))
}

fn parse_address(address: &str) -> Result<Address> {
    address.parse().map_err(|e| {
        EngineError::LinkIo(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid Bluetooth address '{}': {}", address, e),
        ))
    })
}

/// Radio adapter and serial transport backed by the default BlueZ adapter.
pub struct BluezPlatform {
    session: Session,
    adapter: Adapter,
    scan: Mutex<Option<AbortHandle>>,
    bonding: Arc<Mutex<HashSet<String>>>,
    bond_tx: broadcast::Sender<BondEvent>,
}

impl BluezPlatform {
    /// Connect to BlueZ and pick the default adapter.
    pub async fn new() -> Result<Self> {
        info!("Initializing Bluetooth adapter...");

        let session = Session::new().await.map_err(adapter_err)?;
        debug!("BlueZ session created");

        let adapter = session.default_adapter().await.map_err(adapter_err)?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        let (bond_tx, _) = broadcast::channel(16);

        Ok(Self {
            session,
            adapter,
            scan: Mutex::new(None),
            bonding: Arc::new(Mutex::new(HashSet::new())),
            bond_tx,
        })
    }

    fn emit_bond(
        tx: &broadcast::Sender<BondEvent>,
        address: &str,
        previous: BondState,
        current: BondState,
    ) {
        let _ = tx.send(BondEvent {
            address: address.to_string(),
            previous,
            current,
        });
    }
}

#[async_trait]
impl RadioAdapter for BluezPlatform {
    async fn is_available(&self) -> bool {
        self.adapter.address().await.is_ok()
    }

    async fn is_enabled(&self) -> Result<bool> {
        self.adapter.is_powered().await.map_err(adapter_err)
    }

    async fn request_enable(&self) -> Result<bool> {
        info!("Powering on Bluetooth adapter...");
        match self.adapter.set_powered(true).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Failed to power on adapter: {}", e);
                Ok(false)
            }
        }
    }

    async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await.map_err(adapter_err)? {
            let device = self.adapter.device(addr).map_err(adapter_err)?;
            if device.is_paired().await.unwrap_or(false) {
                devices.push(DiscoveredDevice::new(addr.to_string()));
            }
        }

        Ok(devices)
    }

    async fn start_discovery(&self) -> Result<EventStream<DiscoveryEvent>> {
        let events = self.adapter.discover_devices().await.map_err(adapter_err)?;
        let (abort, registration) = AbortHandle::new_pair();
        if let Some(previous) = self.scan.lock().replace(abort) {
            previous.abort();
        }
        debug!("Bluetooth discovery started");

        // Dropping the BlueZ event stream ends the scan.
        let found = Abortable::new(events, registration).filter_map(|event| async move {
            match event {
                AdapterEvent::DeviceAdded(addr) => {
                    Some(DiscoveryEvent::Found(DiscoveredDevice::new(addr.to_string())))
                }
                _ => None,
            }
        });
        Ok(found
            .chain(stream::once(async { DiscoveryEvent::Finished }))
            .boxed())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        if let Some(abort) = self.scan.lock().take() {
            debug!("Cancelling bluetooth discovery");
            abort.abort();
        }
        Ok(())
    }

    async fn bond_state(&self, address: &str) -> Result<BondState> {
        let device = self
            .adapter
            .device(parse_address(address)?)
            .map_err(adapter_err)?;
        if device.is_paired().await.unwrap_or(false) {
            Ok(BondState::Bonded)
        } else if self.bonding.lock().contains(address) {
            Ok(BondState::Bonding)
        } else {
            Ok(BondState::None)
        }
    }

    async fn bond_events(&self) -> Result<EventStream<BondEvent>> {
        let rx = self.bond_tx.subscribe();
        Ok(stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Missed {} bond events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed())
    }

    async fn request_bond(&self, address: &str) -> Result<bool> {
        let Ok(addr) = parse_address(address) else {
            return Ok(false);
        };
        let device = match self.adapter.device(addr) {
            Ok(device) => device,
            Err(e) => {
                warn!("Cannot bond with {}: {}", address, e);
                return Ok(false);
            }
        };

        if !self.bonding.lock().insert(address.to_string()) {
            debug!("Bonding with {} already in progress", address);
            return Ok(true);
        }
        Self::emit_bond(&self.bond_tx, address, BondState::None, BondState::Bonding);

        let tx = self.bond_tx.clone();
        let bonding = self.bonding.clone();
        let address = address.to_string();
        tokio::spawn(async move {
            let current = match device.pair().await {
                Ok(()) => BondState::Bonded,
                Err(e) => {
                    warn!("Pairing with {} failed: {}", address, e);
                    BondState::None
                }
            };
            bonding.lock().remove(&address);
            Self::emit_bond(&tx, &address, BondState::Bonding, current);
        });

        Ok(true)
    }
}

pin_project! {
    /// RFCOMM stream that keeps its client profile registered while open.
    struct ProfileStream {
        #[pin]
        stream: Stream,
        _profile: ProfileHandle,
    }
}

impl AsyncRead for ProfileStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().stream.poll_read(cx, buf)
    }
}

impl AsyncWrite for ProfileStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().stream.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_shutdown(cx)
    }
}

#[async_trait]
impl SerialTransport for BluezPlatform {
    async fn connect(
        &self,
        device: &DiscoveredDevice,
        service: Uuid,
    ) -> Result<Box<dyn SerialStream>> {
        let addr = parse_address(&device.address)?;
        let remote = self.adapter.device(addr).map_err(link_err)?;

        // BlueZ resolves the RFCOMM channel through SDP and hands the
        // socket to a registered client profile.
        let profile = Profile {
            uuid: service,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        let mut handle = self.session.register_profile(profile).await.map_err(link_err)?;
        debug!("Registered RFCOMM client profile {}", service);

        let request = {
            let connect = remote.connect_profile(&service);
            tokio::pin!(connect);
            tokio::select! {
                request = handle.next() => request,
                result = &mut connect => {
                    result.map_err(link_err)?;
                    handle.next().await
                }
            }
        }
        .ok_or_else(|| {
            EngineError::LinkIo(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "Profile handle closed",
            ))
        })?;

        let stream = request.accept().map_err(link_err)?;
        debug!("RFCOMM channel to {} open", device.address);

        Ok(Box::new(ProfileStream {
            stream,
            _profile: handle,
        }))
    }
}
