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

//! Lock response framing.
//!
//! The lock terminates every response with a single `0x20` byte. A response
//! is complete as soon as a read chunk *ends* with that byte, which keeps
//! wire compatibility with existing locks even though a `0x20` that happens
//! to end a partial chunk would cut a message short.

use tracing::{debug, warn};

use crate::error::EngineError;

/// Trailer byte marking the end of a response.
pub const SENTINEL: u8 = 0x20;

/// Hex form of the lone sentinel, the only successful unlock answer.
pub const UNLOCK_ACK_HEX: &str = "20";

/// The two request/response exchanges the lock understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    /// Send the credential key, receive the device key.
    Pair,
    /// Send the device key, receive an acknowledgement.
    Unlock,
}

impl Exchange {
    /// Receive buffer capacity for this exchange.
    pub fn buffer_size(&self) -> usize {
        match self {
            Exchange::Pair => 32,
            Exchange::Unlock => 16,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Pair => "pair",
            Exchange::Unlock => "unlock",
        }
    }
}

/// Accumulates read chunks into one response.
pub struct FrameAccumulator {
    buffer: Vec<u8>,
    capacity: usize,
}

impl FrameAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn for_exchange(exchange: Exchange) -> Self {
        Self::new(exchange.buffer_size())
    }

    /// Append one read chunk.
    ///
    /// Returns `Ok(true)` once the chunk ends with the sentinel.
    pub fn push(&mut self, chunk: &[u8]) -> Result<bool, EngineError> {
        if self.buffer.len() + chunk.len() > self.capacity {
            warn!(
                "Response overflow: {} buffered, {} more, capacity {}",
                self.buffer.len(),
                chunk.len(),
                self.capacity
            );
            return Err(EngineError::FrameOverflow(self.capacity));
        }

        self.buffer.extend_from_slice(chunk);
        let complete = chunk.last() == Some(&SENTINEL);
        if complete {
            debug!("Response complete: {} bytes", self.buffer.len());
        }
        Ok(complete)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Lowercase hex of everything accumulated, sentinel included.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.buffer)
    }
}

/// Check an unlock answer.
pub fn verify_unlock_ack(response_hex: &str) -> Result<(), EngineError> {
    if response_hex == UNLOCK_ACK_HEX {
        Ok(())
    } else {
        Err(EngineError::UnexpectedResponse(response_hex.to_string()))
    }
}
