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

//! Bluetooth communication module.
//!
//! The engine talks to the radio only through [`RadioAdapter`] and
//! [`SerialTransport`]. [`BluezPlatform`] implements both on top of BlueZ.

mod bluez;
mod bonding;
mod discovery;
mod link;
#[cfg(test)]
pub(crate) mod mock;
pub mod protocol;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::error::Result;

pub use bluez::BluezPlatform;
pub use bonding::{BondingCoordinator, BondingStatus};
pub use discovery::DiscoveryCoordinator;
pub use link::{LinkSession, LinkTiming, RadioLock};

/// Standard serial port profile UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Bond state of a remote device, as tracked by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

/// A device that can be bonded with and connected to.
///
/// Only valid for the duration of one discover/bond/connect sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: String,
}

impl DiscoveredDevice {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Addresses compare case-insensitively.
    pub fn matches(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

/// Events from an active scan.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Found(DiscoveredDevice),
    /// The platform ended the scan on its own.
    Finished,
}

/// A bond state transition reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondEvent {
    pub address: String,
    pub previous: BondState,
    pub current: BondState,
}

/// Live event subscription. Dropping it unsubscribes.
pub type EventStream<T> = BoxStream<'static, T>;

/// Byte stream of an open serial channel.
pub trait SerialStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialStream for T {}

/// Radio adapter capabilities supplied by the host platform.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Whether a radio adapter exists at all.
    async fn is_available(&self) -> bool;

    /// Whether the adapter is powered.
    async fn is_enabled(&self) -> Result<bool>;

    /// Ask the platform to power the adapter on. `false` means refused.
    async fn request_enable(&self) -> Result<bool>;

    /// Devices the adapter already holds a bond with.
    async fn bonded_devices(&self) -> Result<Vec<DiscoveredDevice>>;

    /// Start an active scan and subscribe to its results.
    async fn start_discovery(&self) -> Result<EventStream<DiscoveryEvent>>;

    /// Stop any active scan. Safe to call when none is running.
    async fn cancel_discovery(&self) -> Result<()>;

    /// Current bond state of `address`.
    async fn bond_state(&self, address: &str) -> Result<BondState>;

    /// Subscribe to bond state transitions of all devices.
    async fn bond_events(&self) -> Result<EventStream<BondEvent>>;

    /// Start bonding with `address`. `false` means the platform refused.
    async fn request_bond(&self, address: &str) -> Result<bool>;
}

/// Connection-oriented serial transport.
#[async_trait]
pub trait SerialTransport: Send + Sync {
    /// Open a serial channel to `device` for the given service.
    async fn connect(
        &self,
        device: &DiscoveredDevice,
        service: Uuid,
    ) -> Result<Box<dyn SerialStream>>;
}
