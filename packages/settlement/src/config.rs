//! Configuration
//!
//! Loaded from an optional `settlement.{toml,json,yaml}` file and
//! `SETTLEMENT__<SECTION>__<FIELD>` environment variables, after reading a
//! `.env` file if one exists. Decimal network parameters are kept as strings
//! here and parsed once by [`NetworkConfig::parameters`].

use bigdecimal::BigDecimal;
use eyre::{eyre, Result, WrapErr};
use num_traits::{One, Zero};
use serde::Deserialize;
use std::path::Path;

use crate::num::{decimal, parse_decimal};

/// Main configuration for the settlement engines
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub banking: BankingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

/// Banking engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BankingConfig {
    /// Chain id of the primary bridge. Dedup references of this chain are also
    /// checked without their chain id.
    #[serde(default = "default_primary_chain_id")]
    pub primary_chain_id: String,
    #[serde(default)]
    pub secondary_chain_id: Option<String>,
    /// Deadline handed to the witness for every asset action
    #[serde(default = "default_validation_duration_secs")]
    pub validation_duration_secs: u64,
}

impl Default for BankingConfig {
    fn default() -> Self {
        Self {
            primary_chain_id: default_primary_chain_id(),
            secondary_chain_id: None,
            validation_duration_secs: default_validation_duration_secs(),
        }
    }
}

/// One step of the vesting benefit table
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BenefitTierConfig {
    pub minimum_quantum_balance: u128,
    pub reward_multiplier: String,
}

/// Network parameters as configured
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_transfer_fee_factor")]
    pub transfer_fee_factor: String,
    #[serde(default = "default_min_transfer_quantum_multiple")]
    pub min_transfer_quantum_multiple: String,
    #[serde(default = "default_transfer_fee_max_quantum_amount")]
    pub transfer_fee_max_quantum_amount: String,
    #[serde(default = "default_fee_discount_window")]
    pub fee_discount_window: u64,
    #[serde(default = "default_fee_discount_minimum_tracked_amount")]
    pub fee_discount_minimum_tracked_amount: String,
    #[serde(default = "default_min_withdraw_quantum_multiple")]
    pub min_withdraw_quantum_multiple: String,
    #[serde(default = "default_governance_transfer_max_amount")]
    pub governance_transfer_max_amount: String,
    #[serde(default = "default_governance_transfer_max_fraction")]
    pub governance_transfer_max_fraction: String,
    #[serde(default = "default_rewards_vesting_base_rate")]
    pub rewards_vesting_base_rate: String,
    #[serde(default = "default_rewards_vesting_minimum_transfer")]
    pub rewards_vesting_minimum_transfer: String,
    #[serde(default)]
    pub vesting_benefit_tiers: Vec<BenefitTierConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            transfer_fee_factor: default_transfer_fee_factor(),
            min_transfer_quantum_multiple: default_min_transfer_quantum_multiple(),
            transfer_fee_max_quantum_amount: default_transfer_fee_max_quantum_amount(),
            fee_discount_window: default_fee_discount_window(),
            fee_discount_minimum_tracked_amount: default_fee_discount_minimum_tracked_amount(),
            min_withdraw_quantum_multiple: default_min_withdraw_quantum_multiple(),
            governance_transfer_max_amount: default_governance_transfer_max_amount(),
            governance_transfer_max_fraction: default_governance_transfer_max_fraction(),
            rewards_vesting_base_rate: default_rewards_vesting_base_rate(),
            rewards_vesting_minimum_transfer: default_rewards_vesting_minimum_transfer(),
            vesting_benefit_tiers: Vec::new(),
        }
    }
}

/// Service harness configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Log a heartbeat every N ticks (0 disables it)
    #[serde(default = "default_heartbeat_interval_ticks")]
    pub heartbeat_interval_ticks: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            command_buffer: default_command_buffer(),
            heartbeat_interval_ticks: default_heartbeat_interval_ticks(),
        }
    }
}

fn default_primary_chain_id() -> String {
    "1".to_string()
}

fn default_validation_duration_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_transfer_fee_factor() -> String {
    "0.001".to_string()
}

fn default_min_transfer_quantum_multiple() -> String {
    "0.1".to_string()
}

fn default_transfer_fee_max_quantum_amount() -> String {
    "1".to_string()
}

fn default_fee_discount_window() -> u64 {
    2
}

fn default_fee_discount_minimum_tracked_amount() -> String {
    "0.01".to_string()
}

fn default_min_withdraw_quantum_multiple() -> String {
    "10".to_string()
}

fn default_governance_transfer_max_amount() -> String {
    "7000".to_string()
}

fn default_governance_transfer_max_fraction() -> String {
    "1".to_string()
}

fn default_rewards_vesting_base_rate() -> String {
    "0.25".to_string()
}

fn default_rewards_vesting_minimum_transfer() -> String {
    "10".to_string()
}

fn default_command_buffer() -> usize {
    1024
}

fn default_heartbeat_interval_ticks() -> u64 {
    100
}

/// Vesting benefit tier with a parsed multiplier
#[derive(Debug, Clone, PartialEq)]
pub struct BenefitTier {
    pub minimum_quantum_balance: u128,
    pub reward_multiplier: BigDecimal,
}

/// Parsed network parameters handed to the engines
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkParameters {
    pub transfer_fee_factor: BigDecimal,
    pub min_transfer_quantum_multiple: BigDecimal,
    pub transfer_fee_max_quantum_amount: BigDecimal,
    pub fee_discount_window: u64,
    pub fee_discount_minimum_tracked_amount: BigDecimal,
    pub min_withdraw_quantum_multiple: BigDecimal,
    pub governance_transfer_max_amount: BigDecimal,
    pub governance_transfer_max_fraction: BigDecimal,
    pub rewards_vesting_base_rate: BigDecimal,
    pub rewards_vesting_minimum_transfer: BigDecimal,
    pub vesting_benefit_tiers: Vec<BenefitTier>,
}

impl Default for NetworkParameters {
    fn default() -> Self {
        Self {
            transfer_fee_factor: decimal(1, 3),
            min_transfer_quantum_multiple: decimal(1, 1),
            transfer_fee_max_quantum_amount: decimal(1, 0),
            fee_discount_window: default_fee_discount_window(),
            fee_discount_minimum_tracked_amount: decimal(1, 2),
            min_withdraw_quantum_multiple: decimal(10, 0),
            governance_transfer_max_amount: decimal(7000, 0),
            governance_transfer_max_fraction: decimal(1, 0),
            rewards_vesting_base_rate: decimal(25, 2),
            rewards_vesting_minimum_transfer: decimal(10, 0),
            vesting_benefit_tiers: Vec::new(),
        }
    }
}

impl NetworkConfig {
    /// Parse and range-check every parameter.
    pub fn parameters(&self) -> Result<NetworkParameters> {
        let parse = |name: &str, value: &str| {
            parse_decimal(value).map_err(|e| eyre!("network.{}: {}", name, e))
        };

        let mut vesting_benefit_tiers = Vec::with_capacity(self.vesting_benefit_tiers.len());
        for tier in &self.vesting_benefit_tiers {
            vesting_benefit_tiers.push(BenefitTier {
                minimum_quantum_balance: tier.minimum_quantum_balance,
                reward_multiplier: parse(
                    "vesting_benefit_tiers.reward_multiplier",
                    &tier.reward_multiplier,
                )?,
            });
        }

        let params = NetworkParameters {
            transfer_fee_factor: parse("transfer_fee_factor", &self.transfer_fee_factor)?,
            min_transfer_quantum_multiple: parse(
                "min_transfer_quantum_multiple",
                &self.min_transfer_quantum_multiple,
            )?,
            transfer_fee_max_quantum_amount: parse(
                "transfer_fee_max_quantum_amount",
                &self.transfer_fee_max_quantum_amount,
            )?,
            fee_discount_window: self.fee_discount_window,
            fee_discount_minimum_tracked_amount: parse(
                "fee_discount_minimum_tracked_amount",
                &self.fee_discount_minimum_tracked_amount,
            )?,
            min_withdraw_quantum_multiple: parse(
                "min_withdraw_quantum_multiple",
                &self.min_withdraw_quantum_multiple,
            )?,
            governance_transfer_max_amount: parse(
                "governance_transfer_max_amount",
                &self.governance_transfer_max_amount,
            )?,
            governance_transfer_max_fraction: parse(
                "governance_transfer_max_fraction",
                &self.governance_transfer_max_fraction,
            )?,
            rewards_vesting_base_rate: parse(
                "rewards_vesting_base_rate",
                &self.rewards_vesting_base_rate,
            )?,
            rewards_vesting_minimum_transfer: parse(
                "rewards_vesting_minimum_transfer",
                &self.rewards_vesting_minimum_transfer,
            )?,
            vesting_benefit_tiers,
        };
        params.validate()?;
        Ok(params)
    }
}

impl NetworkParameters {
    fn validate(&self) -> Result<()> {
        let zero = BigDecimal::zero();
        let one = BigDecimal::one();

        if self.transfer_fee_factor < zero || self.transfer_fee_factor > one {
            return Err(eyre!("network.transfer_fee_factor must be within [0, 1]"));
        }
        if self.min_transfer_quantum_multiple < zero {
            return Err(eyre!("network.min_transfer_quantum_multiple cannot be negative"));
        }
        if self.transfer_fee_max_quantum_amount < zero {
            return Err(eyre!("network.transfer_fee_max_quantum_amount cannot be negative"));
        }
        if self.fee_discount_window == 0 {
            return Err(eyre!("network.fee_discount_window must be at least 1"));
        }
        if self.fee_discount_minimum_tracked_amount < zero {
            return Err(eyre!(
                "network.fee_discount_minimum_tracked_amount cannot be negative"
            ));
        }
        if self.min_withdraw_quantum_multiple < zero {
            return Err(eyre!("network.min_withdraw_quantum_multiple cannot be negative"));
        }
        if self.governance_transfer_max_amount < one {
            return Err(eyre!("network.governance_transfer_max_amount must be at least 1"));
        }
        if self.governance_transfer_max_fraction <= zero
            || self.governance_transfer_max_fraction > one
        {
            return Err(eyre!(
                "network.governance_transfer_max_fraction must be within (0, 1]"
            ));
        }
        if self.rewards_vesting_base_rate <= zero || self.rewards_vesting_base_rate > one {
            return Err(eyre!("network.rewards_vesting_base_rate must be within (0, 1]"));
        }
        if self.rewards_vesting_minimum_transfer <= zero {
            return Err(eyre!("network.rewards_vesting_minimum_transfer must be positive"));
        }
        for pair in self.vesting_benefit_tiers.windows(2) {
            if pair[1].minimum_quantum_balance <= pair[0].minimum_quantum_balance {
                return Err(eyre!(
                    "network.vesting_benefit_tiers must have strictly ascending minimum_quantum_balance"
                ));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from `.env`, `settlement.*` and the environment
    pub fn load() -> Result<Self> {
        Self::load_from_file("settlement")
    }

    /// Load with an explicit config file path (extension optional)
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(".env").exists() {
            dotenvy::dotenv().wrap_err("Failed to load .env file")?;
        }

        let config: Config = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("SETTLEMENT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .wrap_err_with(|| format!("Failed to read configuration from {}", path))?
            .try_deserialize()
            .wrap_err("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.banking.primary_chain_id.is_empty() {
            return Err(eyre!("banking.primary_chain_id cannot be empty"));
        }
        if let Some(secondary) = &self.banking.secondary_chain_id {
            if secondary == &self.banking.primary_chain_id {
                return Err(eyre!(
                    "banking.secondary_chain_id must differ from banking.primary_chain_id"
                ));
            }
        }
        if self.banking.validation_duration_secs == 0 {
            return Err(eyre!("banking.validation_duration_secs must be positive"));
        }
        if self.service.command_buffer == 0 {
            return Err(eyre!("service.command_buffer must be positive"));
        }
        self.network.parameters()?;
        Ok(())
    }
}
