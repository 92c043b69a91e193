//! Settlement: deterministic money movement for a proof-of-stake node
//!
//! This crate tracks collateral assets and reconciles the bridges that move
//! them in and out of the network. It also executes every transfer between
//! parties and network pools, and vests rewards over epochs:
//!
//! - **Assets** - Asset registry with proposal, listing and staged updates
//! - **Banking** - Bridge chain events gated by the witness, deposits,
//!   withdrawals, bridge state, one-off/recurring/governance transfers, fees
//!   and fee discounts
//! - **Vesting** - Locked and vesting reward balances, paid out per epoch
//! - **Snapshot** - Byte-reproducible state partitions for every engine
//! - **Service** - Single-task harness serializing every engine call
//!
//! Balances, signatures, foreign-chain validation and consensus live outside
//! this crate and are reached through the traits in [`interfaces`].

pub mod assets;
pub mod banking;
pub mod config;
pub mod error;
pub mod events;
pub mod hash;
pub mod interfaces;
pub mod metrics;
pub mod num;
pub mod service;
pub mod snapshot;
pub mod types;
pub mod vesting;

pub use assets::{Asset, AssetDetails, AssetRegistry, AssetSource, AssetStatus};
pub use config::{Config, NetworkParameters};
pub use error::{Result, SettlementError};
pub use events::Event;
pub use service::{Engines, ServiceHandle, SettlementService};
pub use snapshot::StateProvider;
