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

//! PSLock desktop engine.
//!
//! Pairs with PSLock Bluetooth locks from a scanned credential and unlocks
//! them afterwards. Pairing runs
//! credential -> resolve -> bond -> pair exchange -> registry, unlocking
//! runs device -> resolve -> bond -> unlock exchange.

pub mod bluetooth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod flow;
pub mod pairing;
pub mod state;
pub mod storage;
pub mod unlock;

pub use config::Config;
pub use crypto::{Credential, CredentialCodec};
pub use error::{EngineError, Outcome};
pub use events::{EventSink, FlowEvent, FlowStage};
pub use flow::FlowContext;
pub use pairing::PairingOrchestrator;
pub use state::CurrentTask;
pub use storage::{Device, DeviceRegistry};
pub use unlock::UnlockOrchestrator;
