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

//! Error taxonomy for the pairing/unlock engine.
//!
//! Every failure maps onto exactly one [`Outcome`], which is what the
//! presentation layer gets to see at the end of a flow.

use thiserror::Error;

use crate::crypto::CredentialError;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures produced by the engine. None of them are process-fatal.
#[derive(Debug, Error)]
pub enum EngineError {
    /// QR payload was malformed or could not be decrypted.
    #[error("invalid credential: {0}")]
    CredentialInvalid(#[from] CredentialError),

    /// Radio adapter missing, or disabled and could not be enabled.
    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// Address absent from the bonded set and not seen while scanning.
    #[error("device {0} not found")]
    DeviceNotFound(String),

    /// Platform refused to start bonding.
    #[error("bonding with {0} was rejected")]
    BondingRejected(String),

    /// Bonding started but ended in a state other than bonded.
    #[error("bonding with {0} failed or was cancelled")]
    BondingFailed(String),

    /// A link is already open; radio hardware is a singleton.
    #[error("another link session is already open")]
    LinkBusy,

    /// No complete framed response within the deadline.
    #[error("no complete response within {0} ms")]
    LinkTimeout(u64),

    /// Transport failure during connect, write or read.
    #[error("link I/O error: {0}")]
    LinkIo(#[from] std::io::Error),

    /// Response did not fit in the receive buffer.
    #[error("response exceeded {0} byte buffer")]
    FrameOverflow(usize),

    /// Unlock answered with something other than the lone sentinel.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Registry persistence failed.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Terminal result of a pairing or unlock attempt, as surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    CredentialInvalid,
    NotFound,
    BondingFailed,
    LinkTimeout,
    LinkRejected,
    Failed,
}

impl Outcome {
    /// Short user-facing description.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "Success",
            Outcome::CredentialInvalid => "QR code is not supported",
            Outcome::NotFound => "Lock not found",
            Outcome::BondingFailed => "Bonding failed",
            Outcome::LinkTimeout => "Lock did not answer in time",
            Outcome::LinkRejected => "Lock rejected the request",
            Outcome::Failed => "Operation failed",
        }
    }
}

impl From<&EngineError> for Outcome {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::CredentialInvalid(_) => Outcome::CredentialInvalid,
            EngineError::DeviceNotFound(_) => Outcome::NotFound,
            EngineError::BondingRejected(_) | EngineError::BondingFailed(_) => {
                Outcome::BondingFailed
            }
            EngineError::LinkTimeout(_) => Outcome::LinkTimeout,
            EngineError::LinkIo(_)
            | EngineError::FrameOverflow(_)
            | EngineError::UnexpectedResponse(_) => Outcome::LinkRejected,
            EngineError::AdapterUnavailable(_)
            | EngineError::LinkBusy
            | EngineError::Storage(_) => Outcome::Failed,
        }
    }
}

impl<T> From<&Result<T>> for Outcome {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) => e.into(),
        }
    }
}
