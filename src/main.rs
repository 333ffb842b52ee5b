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

//! PSLock command line client.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pslock_desktop::bluetooth::BluezPlatform;
use pslock_desktop::{
    Config, CredentialCodec, CurrentTask, DeviceRegistry, EventSink, FlowContext, FlowEvent,
    PairingOrchestrator, UnlockOrchestrator,
};

#[derive(Parser)]
#[command(name = "pslock")]
#[command(about = "Pair with and unlock PSLock Bluetooth locks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pair a new lock using the text of its QR code
    Pair {
        /// Credential URL read from the QR code
        qr: String,
    },
    /// Unlock a paired lock
    Unlock {
        /// Bluetooth address of the lock
        mac: String,
    },
    /// List paired locks, most recently used first
    List,
    /// Rename a paired lock
    Rename {
        /// Bluetooth address of the lock
        mac: String,
        /// New display name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pslock_desktop=info")),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    let registry = Arc::new(DeviceRegistry::open(&config.data_dir)?);

    let succeeded = match cli.command {
        Commands::List => {
            for (rank, device) in registry.list_all().iter().enumerate() {
                println!("{:>2}. {}  {}", rank + 1, device.mac, device.name);
            }
            true
        }
        Commands::Rename { mac, name } => {
            let renamed = registry.rename(&mac, &name)?;
            if !renamed {
                eprintln!("No paired lock with address {}", mac);
            }
            renamed
        }
        Commands::Pair { qr } => {
            let (ctx, printer) = flow_context(&config).await?;
            let codec = CredentialCodec::from_config(&config.credential)?;
            let pairing = PairingOrchestrator::new(
                codec,
                ctx,
                registry.clone(),
                config.registry.default_device_name.as_str(),
            );
            let result = pairing.pair_from_qr(&qr).await;
            drop(pairing);
            let _ = printer.await;
            match result {
                Ok(device) => {
                    println!("Paired with {} ({})", device.mac, device.name);
                    true
                }
                Err(e) => {
                    error!("Pairing failed: {}", e);
                    false
                }
            }
        }
        Commands::Unlock { mac } => {
            let (ctx, printer) = flow_context(&config).await?;
            let unlock = UnlockOrchestrator::new(ctx, CurrentTask::new(), registry.clone());
            let result = unlock.unlock_mac(&mac).await;
            drop(unlock);
            let _ = printer.await;
            match result {
                Ok(()) => true,
                Err(e) => {
                    error!("Unlock failed: {}", e);
                    false
                }
            }
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Build the flow context on BlueZ and print its events until it is dropped.
async fn flow_context(
    config: &Config,
) -> Result<(Arc<FlowContext>, tokio::task::JoinHandle<()>)> {
    let platform = Arc::new(BluezPlatform::new().await?);
    let (tx, mut rx) = mpsc::channel::<FlowEvent>(16);

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                FlowEvent::Progress(stage) => println!("{}...", stage),
                FlowEvent::Finished(outcome) => println!("{}", outcome.as_str()),
            }
        }
    });

    let ctx = FlowContext::new(platform.clone(), platform, &config.bluetooth)
        .with_events(EventSink::new(tx));
    Ok((Arc::new(ctx), printer))
}
