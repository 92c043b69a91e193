//! Collaborator interfaces
//!
//! The engines never own balances, keys or consensus. They talk to those
//! subsystems through the traits below. Implementations must be cheap to call
//! from the block-processing task; only [`Witness`] may defer work to its own
//! threads, and then only through the [`CheckCallback`] it was handed.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::assets::Asset;
use crate::error::Result;
use crate::events::Event;
use crate::types::{
    Account, AccountType, DispatchStrategy, LedgerMovement, MarketContributionScore,
    PartyContributionScore, PartyId, Transfer,
};

// ============================================================================
// Ledger
// ============================================================================

/// Account balances. Every movement of funds goes through here.
pub trait Ledger: Send + Sync {
    fn deposit(&self, party: &str, asset: &str, amount: u128) -> Result<LedgerMovement>;

    fn withdraw(&self, party: &str, asset: &str, amount: u128) -> Result<LedgerMovement>;

    fn enable_asset(&self, asset: &Asset) -> Result<()>;

    fn propagate_asset_update(&self, asset: &Asset) -> Result<()>;

    fn get_party_general_account(&self, party: &str, asset: &str) -> Result<Account>;

    fn get_party_vested_reward_account(&self, party: &str, asset: &str) -> Result<Account>;

    /// Execute transfer legs paired with their account types and references,
    /// plus the fee legs. Fee legs are only ever debits.
    fn transfer_funds(
        &self,
        transfers: &[Transfer],
        account_types: &[AccountType],
        references: &[String],
        fee_transfers: &[Transfer],
        fee_account_types: &[AccountType],
    ) -> Result<Vec<LedgerMovement>>;

    fn governance_transfer_funds(
        &self,
        transfers: &[Transfer],
        account_types: &[AccountType],
        references: &[String],
    ) -> Result<Vec<LedgerMovement>>;

    fn get_system_account_balance(
        &self,
        asset: &str,
        market: &str,
        account_type: AccountType,
    ) -> Result<u128>;

    /// Move vested rewards from the vesting to the vested account.
    fn transfer_vested_rewards(&self, transfers: &[Transfer]) -> Result<Vec<LedgerMovement>>;

    /// Sum of vesting and vested balances of `party` across assets, in quantum.
    fn get_all_vesting_quantum_balance(&self, party: &str) -> u128;
}

// ============================================================================
// Witness
// ============================================================================

/// Invoked once by the witness with the verdict on a resource. It may run
/// on any thread.
pub type CheckCallback = Box<dyn FnOnce(bool) + Send>;

/// A foreign-chain fact awaiting validation.
pub trait WitnessResource: Send + Sync {
    fn id(&self) -> &str;

    /// Validate the fact against the foreign chain.
    fn check(&self) -> Result<()>;
}

pub trait Witness: Send + Sync {
    /// Start validating `resource`; an unresolved check at `deadline` is a
    /// rejection.
    fn start_check(
        &self,
        resource: Arc<dyn WitnessResource>,
        callback: CheckCallback,
        deadline: DateTime<Utc>,
    ) -> Result<()>;

    /// Re-attach a resource restored from a snapshot to a check that was
    /// already running.
    fn restore_resource(
        &self,
        resource: Arc<dyn WitnessResource>,
        callback: CheckCallback,
    ) -> Result<()>;
}

// ============================================================================
// Notary & Signing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureKind {
    AssetNew,
    AssetUpdate,
    AssetWithdrawal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSignature {
    pub id: String,
    pub kind: SignatureKind,
    pub sig: Vec<u8>,
}

/// Aggregates per-validator signatures into a bridge-submittable bundle.
pub trait Notary: Send + Sync {
    fn start_aggregate(&self, resource_id: &str, kind: SignatureKind, signature: Vec<u8>);

    fn is_signed(&self, resource_id: &str, kind: SignatureKind) -> Option<Vec<NodeSignature>>;

    /// Ask the node to re-sign every pending resource of `kind`.
    fn offer_signatures(&self, kind: SignatureKind, supplier: &dyn Fn(&str) -> Option<Vec<u8>>);
}

/// Validator key used for bridge messages.
pub trait Signer: Send + Sync {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

pub trait Topology: Send + Sync {
    fn is_validator(&self) -> bool;
}

// ============================================================================
// Broker & Time
// ============================================================================

/// Fire-and-forget publication of state transitions.
pub trait Broker: Send + Sync {
    fn send(&self, event: Event);

    fn send_batch(&self, events: Vec<Event>);
}

/// Block time.
pub trait TimeService: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

// ============================================================================
// Bridge View
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeEventKind {
    Deposit,
    AssetList,
    AssetLimitsUpdated,
    Withdrawal,
    BridgeStopped,
    BridgeResumed,
}

/// A bridge contract log as claimed by a chain event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent<'a> {
    pub kind: BridgeEventKind,
    pub asset_address: &'a str,
    pub amount: u128,
    pub block: u64,
    pub log_index: u64,
    pub tx_hash: &'a str,
}

/// Read access to a bridge contract on a foreign chain.
pub trait BridgeView: Send + Sync {
    fn find_asset(&self, contract_address: &str) -> Result<()>;

    fn find_event(&self, event: &BridgeEvent<'_>) -> Result<()>;
}

// ============================================================================
// Market Activity & Parties
// ============================================================================

pub trait MarketActivityTracker: Send + Sync {
    fn calculate_metric_for_individuals(&self, ds: &DispatchStrategy)
        -> Vec<PartyContributionScore>;

    fn markets_with_eligible_proposer(
        &self,
        asset_for_metric: &str,
        markets: &[String],
        payout_asset: &str,
        funder: &str,
    ) -> Vec<MarketContributionScore>;

    fn mark_paid_proposer(
        &self,
        asset_for_metric: &str,
        market: &str,
        payout_asset: &str,
        markets: &[String],
        funder: &str,
    );

    fn market_tracked_for_asset(&self, market: &str, asset: &str) -> bool;
}

/// Activity-streak bonus applied to the vesting rate.
pub trait ActivityStreak: Send + Sync {
    fn reward_vesting_multiplier(&self, party: &str) -> BigDecimal;
}

/// Keys derived from or delegating to a party. The relation may contain
/// cycles.
pub trait Parties: Send + Sync {
    fn related_keys(&self, party: &str) -> Vec<PartyId>;
}
