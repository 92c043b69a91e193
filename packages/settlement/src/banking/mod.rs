//! Banking engine
//!
//! Ingests foreign-chain facts as asset actions, gates them behind the
//! witness, and applies the accepted ones on the next tick. Also owns
//! withdrawals, bridge state and every transfer the network executes
//! (one-off, recurring, governance) together with their fees.
//!
//! All methods must be called from a single task. The witness callback is
//! the only code running elsewhere, and it only flips an atomic flag on the
//! action it was handed.

mod asset_actions;
mod bridge_state;
mod deposits;
mod dispatch;
mod fees;
mod gov_transfers;
mod recurring;
mod snapshot;
mod transfers;
mod withdrawals;

pub use asset_actions::{AssetAction, AssetActionKind, Erc20Deposit};
pub use bridge_state::BridgeState;
pub use dispatch::dispatch_strategy_hash;
pub use fees::{calculate_fee, DiscountedFee, FeeDiscounts};
pub use gov_transfers::{
    GovernanceTransfer, GovernanceTransferConfig, GovernanceTransferKind, GovernanceTransferType,
};
pub use snapshot::{
    ASSET_ACTIONS_KEY, BRIDGE_STATE_KEY, DEPOSITS_KEY, RECURRING_GOV_TRANSFERS_KEY,
    RECURRING_TRANSFERS_KEY, SCHEDULED_GOV_TRANSFERS_KEY, SCHEDULED_TRANSFERS_KEY, SEEN_KEY,
    TRANSFER_FEE_DISCOUNTS_KEY, WITHDRAWALS_KEY,
};
pub use transfers::{OneOffTransfer, RecurringTransfer, TransferBase, TransferCommand};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::assets::AssetRegistry;
use crate::config::{BankingConfig, NetworkParameters};
use crate::interfaces::{
    BridgeView, Broker, Ledger, MarketActivityTracker, Notary, Signer, TimeService, Topology,
    Witness,
};
use crate::types::{Deposit, DispatchStrategy, Epoch, EpochAction, Withdrawal};

/// External subsystems the banking engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn Ledger>,
    pub witness: Arc<dyn Witness>,
    pub notary: Arc<dyn Notary>,
    pub signer: Arc<dyn Signer>,
    pub topology: Arc<dyn Topology>,
    pub broker: Arc<dyn Broker>,
    pub time: Arc<dyn TimeService>,
    pub tracker: Arc<dyn MarketActivityTracker>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DispatchStrategyEntry {
    strategy: DispatchStrategy,
    ref_count: u64,
}

pub struct Engine {
    cfg: BankingConfig,

    ledger: Arc<dyn Ledger>,
    witness: Arc<dyn Witness>,
    notary: Arc<dyn Notary>,
    signer: Arc<dyn Signer>,
    topology: Arc<dyn Topology>,
    broker: Arc<dyn Broker>,
    time: Arc<dyn TimeService>,
    tracker: Arc<dyn MarketActivityTracker>,
    bridge_views: BTreeMap<String, Arc<dyn BridgeView>>,

    // network parameters
    transfer_fee_factor: BigDecimal,
    min_transfer_quantum_multiple: BigDecimal,
    transfer_fee_max_quantum_amount: BigDecimal,
    fee_discount_minimum_tracked_amount: BigDecimal,
    min_withdraw_quantum_multiple: BigDecimal,
    governance_transfer_max_amount: BigDecimal,
    governance_transfer_max_fraction: BigDecimal,

    current_epoch: u64,

    // asset actions
    asset_actions: BTreeMap<String, Arc<AssetAction>>,
    seen: BTreeSet<String>,
    last_seen_primary_block: u64,
    deposits: BTreeMap<String, Deposit>,
    withdrawals: BTreeMap<String, Withdrawal>,
    /// bridge reference -> withdrawal id
    withdrawal_refs: BTreeMap<u128, String>,
    withdrawal_count: u128,
    bridge_states: BTreeMap<String, BridgeState>,

    // transfers
    recurring_transfers: BTreeMap<String, RecurringTransfer>,
    /// deliver_on (unix nanos) -> transfers in submission order
    scheduled_transfers: BTreeMap<i64, Vec<OneOffTransfer>>,
    recurring_gov_transfers: BTreeMap<String, GovernanceTransfer>,
    scheduled_gov_transfers: BTreeMap<i64, Vec<GovernanceTransfer>>,
    dispatch_strategies: BTreeMap<String, DispatchStrategyEntry>,
    fee_discounts: FeeDiscounts,
}

impl Engine {
    pub fn new(cfg: BankingConfig, params: &NetworkParameters, collaborators: Collaborators) -> Self {
        Self {
            cfg,
            ledger: collaborators.ledger,
            witness: collaborators.witness,
            notary: collaborators.notary,
            signer: collaborators.signer,
            topology: collaborators.topology,
            broker: collaborators.broker,
            time: collaborators.time,
            tracker: collaborators.tracker,
            bridge_views: BTreeMap::new(),
            transfer_fee_factor: params.transfer_fee_factor.clone(),
            min_transfer_quantum_multiple: params.min_transfer_quantum_multiple.clone(),
            transfer_fee_max_quantum_amount: params.transfer_fee_max_quantum_amount.clone(),
            fee_discount_minimum_tracked_amount: params
                .fee_discount_minimum_tracked_amount
                .clone(),
            min_withdraw_quantum_multiple: params.min_withdraw_quantum_multiple.clone(),
            governance_transfer_max_amount: params.governance_transfer_max_amount.clone(),
            governance_transfer_max_fraction: params.governance_transfer_max_fraction.clone(),
            current_epoch: 0,
            asset_actions: BTreeMap::new(),
            seen: BTreeSet::new(),
            last_seen_primary_block: 0,
            deposits: BTreeMap::new(),
            withdrawals: BTreeMap::new(),
            withdrawal_refs: BTreeMap::new(),
            withdrawal_count: 0,
            bridge_states: BTreeMap::new(),
            recurring_transfers: BTreeMap::new(),
            scheduled_transfers: BTreeMap::new(),
            recurring_gov_transfers: BTreeMap::new(),
            scheduled_gov_transfers: BTreeMap::new(),
            dispatch_strategies: BTreeMap::new(),
            fee_discounts: FeeDiscounts::new(params.fee_discount_window),
        }
    }

    /// Register the bridge contract view of `chain_id`. Asset actions on a
    /// chain without a view are refused.
    pub fn set_bridge_view(&mut self, chain_id: &str, view: Arc<dyn BridgeView>) {
        self.bridge_views.insert(chain_id.to_string(), view);
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    // ========================================================================
    // Network Parameter Updates
    // ========================================================================

    pub fn on_transfer_fee_factor_update(&mut self, factor: BigDecimal) {
        self.transfer_fee_factor = factor;
    }

    pub fn on_min_transfer_quantum_multiple_update(&mut self, multiple: BigDecimal) {
        self.min_transfer_quantum_multiple = multiple;
    }

    pub fn on_transfer_fee_max_quantum_amount_update(&mut self, amount: BigDecimal) {
        self.transfer_fee_max_quantum_amount = amount;
    }

    pub fn on_fee_discount_window_update(&mut self, window: u64) {
        self.fee_discounts.set_window(window);
    }

    pub fn on_fee_discount_minimum_tracked_amount_update(&mut self, amount: BigDecimal) {
        self.fee_discount_minimum_tracked_amount = amount;
    }

    pub fn on_min_withdraw_quantum_multiple_update(&mut self, multiple: BigDecimal) {
        self.min_withdraw_quantum_multiple = multiple;
    }

    pub fn on_governance_transfer_max_amount_update(&mut self, amount: BigDecimal) {
        self.governance_transfer_max_amount = amount;
    }

    pub fn on_governance_transfer_max_fraction_update(&mut self, fraction: BigDecimal) {
        self.governance_transfer_max_fraction = fraction;
    }

    // ========================================================================
    // Block & Epoch Hooks
    // ========================================================================

    /// Process everything that became ready since the previous block.
    pub fn on_tick(&mut self, assets: &mut AssetRegistry, now: DateTime<Utc>) {
        self.process_asset_actions(assets, now);
        self.offer_withdrawal_signatures(assets);
        self.deliver_scheduled_transfers(now);
        self.deliver_scheduled_governance_transfers(assets, now);
    }

    pub fn on_epoch(&mut self, assets: &AssetRegistry, epoch: Epoch) {
        match epoch.action {
            EpochAction::Start => {
                self.current_epoch = epoch.seq;
                self.purge_dispatch_strategies();
                debug!(epoch = epoch.seq, "Banking epoch started");
            }
            EpochAction::End => {
                self.distribute_recurring_transfers(assets, epoch.seq);
                self.distribute_recurring_governance_transfers(assets, epoch.seq);
                self.rotate_fee_discounts(assets, epoch.seq);
                info!(
                    epoch = epoch.seq,
                    recurring = self.recurring_transfers.len(),
                    recurring_governance = self.recurring_gov_transfers.len(),
                    "Banking epoch ended"
                );
            }
        }
    }
}
