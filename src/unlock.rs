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

//! Unlocking a paired lock.

use anyhow::anyhow;
use std::sync::Arc;
use tracing::{debug, info};

use crate::bluetooth::protocol::Exchange;
use crate::error::{EngineError, Result};
use crate::events::FlowStage;
use crate::flow::FlowContext;
use crate::state::CurrentTask;
use crate::storage::{Device, DeviceRegistry};

/// Runs device -> resolve -> bond -> unlock exchange.
pub struct UnlockOrchestrator {
    ctx: Arc<FlowContext>,
    task: Arc<CurrentTask>,
    registry: Arc<DeviceRegistry>,
}

/// Clears the task slot when an unlock invocation ends, however it ends.
struct TaskCompletion<'a> {
    task: &'a CurrentTask,
    device: &'a Device,
}

impl Drop for TaskCompletion<'_> {
    fn drop(&mut self) {
        self.task.complete(self.device);
    }
}

impl UnlockOrchestrator {
    pub fn new(
        ctx: Arc<FlowContext>,
        task: Arc<CurrentTask>,
        registry: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            ctx,
            task,
            registry,
        }
    }

    /// Unlock `device`.
    pub async fn unlock(&self, device: &Device) -> Result<()> {
        let _completion = TaskCompletion {
            task: &self.task,
            device,
        };
        let result = self.run(device).await;
        self.ctx.finish(&result).await;
        result
    }

    /// Unlock whatever device is in the task slot.
    pub async fn unlock_current(&self) -> Result<()> {
        match self.task.current() {
            Some(device) => self.unlock(&device).await,
            None => self.fail(EngineError::DeviceNotFound("no pending task".to_string())).await,
        }
    }

    /// Select a registered device by mac and unlock it.
    pub async fn unlock_mac(&self, mac: &str) -> Result<()> {
        match self.task.select(&self.registry, mac) {
            Ok(Some(device)) => self.unlock(&device).await,
            Ok(None) => self.fail(EngineError::DeviceNotFound(mac.to_string())).await,
            Err(e) => self.fail(e.into()).await,
        }
    }

    async fn fail(&self, err: EngineError) -> Result<()> {
        let result = Err(err);
        self.ctx.finish(&result).await;
        result
    }

    async fn run(&self, device: &Device) -> Result<()> {
        let key = hex::decode(&device.key).map_err(|e| {
            EngineError::Storage(anyhow!("Stored key for {} is not valid hex: {}", device.mac, e))
        })?;

        info!("Unlocking {} ({})", device.mac, device.name);
        let (remote, status) = self.ctx.prepare(&device.mac).await?;
        let session = self.ctx.open_link(&remote, status).await?;

        self.ctx
            .progress(FlowStage::Exchanging(Exchange::Unlock))
            .await;
        session.unlock(&key).await?;
        debug!("Unlock of {} complete", device.mac);
        Ok(())
    }
}
