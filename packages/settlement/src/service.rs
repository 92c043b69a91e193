//! Execution harness
//!
//! The engines are not thread safe. [`SettlementService`] owns them and runs
//! every call on one tokio task, in the order commands arrive. Callers talk
//! to it through a cloneable [`ServiceHandle`].

use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::assets::AssetRegistry;
use crate::banking;
use crate::config::ServiceConfig;
use crate::interfaces::BridgeView;
use crate::metrics;
use crate::types::Epoch;
use crate::vesting;

/// Everything the service task owns
pub struct Engines {
    pub assets: AssetRegistry,
    pub banking: banking::Engine,
    pub vesting: vesting::Engine,
}

impl Engines {
    /// Register the bridge view of `chain_id` with the registry and the
    /// banking engine.
    pub fn set_bridge_view(&mut self, chain_id: &str, view: Arc<dyn BridgeView>) {
        self.assets.set_bridge_view(chain_id, view.clone());
        self.banking.set_bridge_view(chain_id, view);
    }

    pub fn on_tick(&mut self, now: DateTime<Utc>) {
        self.banking.on_tick(&mut self.assets, now);
    }

    /// Banking first, then vesting.
    pub fn on_epoch(&mut self, epoch: Epoch) {
        self.banking.on_epoch(&self.assets, epoch);
        self.vesting.on_epoch(&self.assets, epoch);
    }
}

type ExecFn = Box<dyn FnOnce(&mut Engines) + Send>;

pub enum Command {
    Tick(DateTime<Utc>),
    EpochStart(u64),
    EpochEnd(u64),
    /// Any other engine call
    Exec(ExecFn),
}

impl Command {
    fn as_str(&self) -> &'static str {
        match self {
            Command::Tick(_) => "tick",
            Command::EpochStart(_) => "epoch_start",
            Command::EpochEnd(_) => "epoch_end",
            Command::Exec(_) => "exec",
        }
    }
}

#[derive(Clone)]
pub struct ServiceHandle {
    commands: mpsc::Sender<Command>,
}

impl ServiceHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|e| eyre!("settlement service stopped, dropped {}", e.0.as_str()))
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        self.send(Command::Tick(now)).await
    }

    pub async fn epoch_start(&self, seq: u64) -> Result<()> {
        self.send(Command::EpochStart(seq)).await
    }

    pub async fn epoch_end(&self, seq: u64) -> Result<()> {
        self.send(Command::EpochEnd(seq)).await
    }

    /// Run `f` on the service task and wait for its result.
    pub async fn exec<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Engines) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Exec(Box::new(move |engines| {
            let _ = reply_tx.send(f(engines));
        })))
        .await?;
        reply_rx
            .await
            .map_err(|_| eyre!("settlement service dropped the reply"))
    }
}

pub struct SettlementService {
    engines: Engines,
    commands: mpsc::Receiver<Command>,
    heartbeat_interval_ticks: u64,
    ticks: u64,
}

impl SettlementService {
    pub fn new(cfg: &ServiceConfig, engines: Engines) -> (Self, ServiceHandle) {
        let (tx, rx) = mpsc::channel(cfg.command_buffer.max(1));
        let service = Self {
            engines,
            commands: rx,
            heartbeat_interval_ticks: cfg.heartbeat_interval_ticks,
            ticks: 0,
        };
        (service, ServiceHandle { commands: tx })
    }

    /// Process commands until shutdown or until every handle is dropped.
    /// Returns the engines so the host can snapshot them.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<Engines> {
        tracing::info!(
            heartbeat_interval_ticks = self.heartbeat_interval_ticks,
            "Settlement service started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => {
                            tracing::info!("All service handles dropped, stopping");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping settlement service");
                    break;
                }
            }
        }

        tracing::info!(ticks = self.ticks, "Settlement service stopped");
        Ok(self.engines)
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Tick(now) => {
                self.ticks += 1;
                metrics::record_tick();
                self.engines.on_tick(now);
                if self.heartbeat_interval_ticks > 0 && self.ticks % self.heartbeat_interval_ticks == 0 {
                    tracing::info!(
                        ticks = self.ticks,
                        epoch = self.engines.banking.current_epoch(),
                        "Settlement service heartbeat"
                    );
                }
            }
            Command::EpochStart(seq) => self.engines.on_epoch(Epoch::start(seq)),
            Command::EpochEnd(seq) => self.engines.on_epoch(Epoch::end(seq)),
            Command::Exec(f) => f(&mut self.engines),
        }
    }
}

/// Initialize tracing/logging with structured output. Safe to call more than
/// once.
pub fn init_logging(default_filter: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .try_init();
}
