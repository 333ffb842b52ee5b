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

//! Serial link session with a lock.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::protocol::{verify_unlock_ack, Exchange, FrameAccumulator};
use super::{DiscoveredDevice, SerialStream, SerialTransport, SPP_UUID};
use crate::config::BluetoothConfig;
use crate::error::{EngineError, Result};

/// Size of a single read from the stream.
const READ_CHUNK: usize = 64;

/// Guards the radio: at most one link may be open at a time.
#[derive(Clone)]
pub struct RadioLock {
    permits: Arc<Semaphore>,
}

impl Default for RadioLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioLock {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Claim the radio, failing if a link is already open.
    fn try_acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| EngineError::LinkBusy)
    }

    pub fn is_held(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

/// Timeouts and poll cadence for link exchanges.
#[derive(Debug, Clone, Copy)]
pub struct LinkTiming {
    pub connect_timeout: Duration,
    pub pair_deadline: Duration,
    pub unlock_deadline: Duration,
    /// Pause between polls of the stream.
    pub poll_interval: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self::from(&BluetoothConfig::default())
    }
}

impl From<&BluetoothConfig> for LinkTiming {
    fn from(config: &BluetoothConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            pair_deadline: Duration::from_millis(config.pair_deadline_ms),
            unlock_deadline: Duration::from_millis(config.unlock_deadline_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

impl LinkTiming {
    fn deadline(&self, exchange: Exchange) -> Duration {
        match exchange {
            Exchange::Pair => self.pair_deadline,
            Exchange::Unlock => self.unlock_deadline,
        }
    }
}

/// An open serial channel to one lock.
///
/// Each session carries out exactly one exchange and is closed afterwards,
/// whatever the result.
pub struct LinkSession {
    stream: Box<dyn SerialStream>,
    address: String,
    timing: LinkTiming,
    _permit: OwnedSemaphorePermit,
}

impl LinkSession {
    /// Open the serial channel to `device`.
    pub async fn open(
        transport: &dyn SerialTransport,
        lock: &RadioLock,
        device: &DiscoveredDevice,
        timing: LinkTiming,
    ) -> Result<Self> {
        let permit = lock.try_acquire()?;

        info!("Connecting to bluetooth device {}", device.address);
        let stream = timeout(timing.connect_timeout, transport.connect(device, SPP_UUID))
            .await
            .map_err(|_| {
                EngineError::LinkIo(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("Connection timeout to {}", device.address),
                ))
            })??;
        info!("Connected to bluetooth device {}", device.address);

        Ok(Self {
            stream,
            address: device.address.clone(),
            timing,
            _permit: permit,
        })
    }

    /// Send the credential key and return the device key the lock issues,
    /// hex encoded.
    pub async fn pair(mut self, shared_key: &[u8]) -> Result<String> {
        let result = self.exchange(Exchange::Pair, shared_key).await;
        self.close().await;
        let key_hex = result?;
        info!("Received device key from {}", self.address);
        debug!("Device key: {}", key_hex);
        Ok(key_hex)
    }

    /// Send the stored device key and expect the lone sentinel back.
    pub async fn unlock(mut self, device_key: &[u8]) -> Result<()> {
        let result = self.exchange(Exchange::Unlock, device_key).await;
        self.close().await;
        verify_unlock_ack(&result?)?;
        info!("Unlock acknowledged by {}", self.address);
        Ok(())
    }

    async fn exchange(&mut self, exchange: Exchange, payload: &[u8]) -> Result<String> {
        debug!("Sending {} request ({} bytes)", exchange.as_str(), payload.len());
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;

        let deadline = self.timing.deadline(exchange);
        match timeout(deadline, self.read_response(exchange)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Timeout waiting for {} response from {}",
                    exchange.as_str(),
                    self.address
                );
                Err(EngineError::LinkTimeout(deadline.as_millis() as u64))
            }
        }
    }

    /// Poll the stream until a framed response is complete.
    async fn read_response(&mut self, exchange: Exchange) -> Result<String> {
        let mut frame = FrameAccumulator::for_exchange(exchange);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(EngineError::LinkIo(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "link closed before response completed",
                )));
            }
            debug!("Received: {:02x?}", &chunk[..n]);

            if frame.push(&chunk[..n])? {
                return Ok(frame.to_hex());
            }
            sleep(self.timing.poll_interval).await;
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Error closing link to {}: {}", self.address, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::mock::MockTransport;
    use crate::bluetooth::protocol::SENTINEL;
    use tokio::io::DuplexStream;

    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    async fn open(transport: &MockTransport, lock: &RadioLock) -> LinkSession {
        LinkSession::open(transport, lock, &DiscoveredDevice::new(MAC), LinkTiming::default())
            .await
            .unwrap()
    }

    async fn read_request(peer: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        peer.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_unlock_success() {
        let (transport, mut peer) = MockTransport::pair();
        let lock = RadioLock::new();
        let session = open(&transport, &lock).await;

        let lock_side = tokio::spawn(async move {
            let request = read_request(&mut peer, 3).await;
            peer.write_all(&[SENTINEL]).await.unwrap();
            // Session closes after the exchange.
            let mut rest = Vec::new();
            peer.read_to_end(&mut rest).await.unwrap();
            request
        });

        session.unlock(&[0xde, 0xad, 0x01]).await.unwrap();
        assert_eq!(lock_side.await.unwrap(), vec![0xde, 0xad, 0x01]);
        assert!(!lock.is_held());
        assert_eq!(transport.connects.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unlock_late_sentinel_times_out() {
        let (transport, mut peer) = MockTransport::pair();
        let lock = RadioLock::new();
        let session = open(&transport, &lock).await;

        tokio::spawn(async move {
            read_request(&mut peer, 1).await;
            peer.write_all(&[0x01, 0x02]).await.unwrap();
            sleep(Duration::from_millis(350)).await;
            let _ = peer.write_all(&[SENTINEL]).await;
        });

        let result = session.unlock(&[0x01]).await;
        assert!(matches!(result, Err(EngineError::LinkTimeout(200))));
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_unlock_unexpected_response() {
        let (transport, mut peer) = MockTransport::pair();
        let lock = RadioLock::new();
        let session = open(&transport, &lock).await;

        tokio::spawn(async move {
            read_request(&mut peer, 1).await;
            peer.write_all(&[0x01, SENTINEL]).await.unwrap();
        });

        let result = session.unlock(&[0x01]).await;
        match result {
            Err(EngineError::UnexpectedResponse(hex)) => assert_eq!(hex, "0120"),
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_pair_returns_key_hex() {
        let (transport, mut peer) = MockTransport::pair();
        let lock = RadioLock::new();
        let session = open(&transport, &lock).await;

        tokio::spawn(async move {
            read_request(&mut peer, 4).await;
            peer.write_all(b"Hel").await.unwrap();
            sleep(Duration::from_millis(20)).await;
            peer.write_all(b"lo ").await.unwrap();
        });

        let key = session.pair(b"abcd").await.unwrap();
        assert_eq!(key, "48656c6c6f20");
    }

    #[tokio::test]
    async fn test_pair_answer_within_pair_deadline() {
        let (transport, mut peer) = MockTransport::pair();
        let lock = RadioLock::new();
        let session = open(&transport, &lock).await;

        tokio::spawn(async move {
            read_request(&mut peer, 1).await;
            // Later than the unlock deadline, within the pairing one.
            sleep(Duration::from_millis(250)).await;
            peer.write_all(&[0xab, SENTINEL]).await.unwrap();
            let mut rest = Vec::new();
            let _ = peer.read_to_end(&mut rest).await;
        });

        let key = session.pair(b"k").await.unwrap();
        assert_eq!(key, "ab20");
    }

    #[tokio::test]
    async fn test_pair_late_answer_times_out() {
        let (transport, mut peer) = MockTransport::pair();
        let lock = RadioLock::new();
        let session = open(&transport, &lock).await;

        tokio::spawn(async move {
            read_request(&mut peer, 1).await;
            sleep(Duration::from_millis(400)).await;
            let _ = peer.write_all(&[0xab, SENTINEL]).await;
        });

        let result = session.pair(b"k").await;
        assert!(matches!(result, Err(EngineError::LinkTimeout(300))));
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_pair_overflow() {
        let (transport, mut peer) = MockTransport::pair();
        let lock = RadioLock::new();
        let session = open(&transport, &lock).await;

        tokio::spawn(async move {
            read_request(&mut peer, 1).await;
            peer.write_all(&[0x41; 40]).await.unwrap();
        });

        let result = session.pair(b"k").await;
        assert!(matches!(result, Err(EngineError::FrameOverflow(32))));
    }

    #[tokio::test]
    async fn test_peer_closes_early() {
        let (transport, mut peer) = MockTransport::pair();
        let lock = RadioLock::new();
        let session = open(&transport, &lock).await;

        tokio::spawn(async move {
            read_request(&mut peer, 1).await;
            drop(peer);
        });

        let result = session.unlock(&[0x01]).await;
        assert!(matches!(result, Err(EngineError::LinkIo(_))));
    }

    #[tokio::test]
    async fn test_second_link_is_refused() {
        let (transport, _peer) = MockTransport::pair();
        let lock = RadioLock::new();
        let _session = open(&transport, &lock).await;

        let (other, _other_peer) = MockTransport::pair();
        let result = LinkSession::open(
            &other,
            &lock,
            &DiscoveredDevice::new(MAC),
            LinkTiming::default(),
        )
        .await;
        assert!(matches!(result, Err(EngineError::LinkBusy)));
    }
}
