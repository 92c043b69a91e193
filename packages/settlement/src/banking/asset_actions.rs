//! Asset actions: foreign-chain facts awaiting the witness
//!
//! An action is created when a chain event is submitted, checked by the
//! witness in the background, and applied or dropped by the first tick that
//! sees its verdict. Its dedup key stays in the seen set forever.

use borsh::{BorshDeserialize, BorshSerialize};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{BridgeState, Engine};
use crate::assets::{Asset, AssetKind, AssetRegistry};
use crate::error::{Result, SettlementError};
use crate::events::Event;
use crate::hash::{ChainEventRef, ASSET_CLASS_BUILTIN, ASSET_CLASS_ERC20};
use crate::interfaces::{
    BridgeEvent, BridgeEventKind, BridgeView, CheckCallback, SignatureKind, WitnessResource,
};
use crate::metrics;
use crate::types::{unix_nanos, DepositStatus, WithdrawalStatus};

pub(super) const PENDING: u32 = 0;
pub(super) const ACCEPTED: u32 = 1;
pub(super) const REJECTED: u32 = 2;

/// Upper bound on the witness deadline
const MAX_VALIDATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum AssetActionKind {
    BuiltinDeposit {
        deposit_id: String,
    },
    Erc20Deposit {
        deposit_id: String,
        source_address: String,
    },
    Erc20AssetList {
        source_address: String,
    },
    Erc20AssetLimitsUpdated {
        source_address: String,
        lifetime_limit: u128,
        withdraw_threshold: u128,
    },
    Erc20Withdrawal {
        reference: u128,
        withdrawal_id: String,
    },
    BridgeStopped,
    BridgeResumed,
}

impl AssetActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetActionKind::BuiltinDeposit { .. } => "builtin_deposit",
            AssetActionKind::Erc20Deposit { .. } => "erc20_deposit",
            AssetActionKind::Erc20AssetList { .. } => "erc20_asset_list",
            AssetActionKind::Erc20AssetLimitsUpdated { .. } => "erc20_asset_limits_updated",
            AssetActionKind::Erc20Withdrawal { .. } => "erc20_withdrawal",
            AssetActionKind::BridgeStopped => "bridge_stopped",
            AssetActionKind::BridgeResumed => "bridge_resumed",
        }
    }

    fn asset_class(&self) -> &'static str {
        match self {
            AssetActionKind::BuiltinDeposit { .. } => ASSET_CLASS_BUILTIN,
            _ => ASSET_CLASS_ERC20,
        }
    }

    fn source_address(&self) -> &str {
        match self {
            AssetActionKind::Erc20Deposit { source_address, .. }
            | AssetActionKind::Erc20AssetList { source_address }
            | AssetActionKind::Erc20AssetLimitsUpdated { source_address, .. } => source_address,
            _ => "",
        }
    }

    fn deposit_id(&self) -> Option<&str> {
        match self {
            AssetActionKind::BuiltinDeposit { deposit_id }
            | AssetActionKind::Erc20Deposit { deposit_id, .. } => Some(deposit_id),
            _ => None,
        }
    }
}

/// A pending claim about a foreign-chain fact.
pub struct AssetAction {
    pub(super) id: String,
    pub(super) asset_id: String,
    pub(super) chain_id: String,
    pub(super) block: u64,
    pub(super) log_index: u64,
    pub(super) tx_hash: String,
    pub(super) amount: u128,
    pub(super) kind: AssetActionKind,
    state: AtomicU32,
    bridge_view: Option<Arc<dyn BridgeView>>,
}

impl AssetAction {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        id: &str,
        asset_id: &str,
        chain_id: &str,
        block: u64,
        log_index: u64,
        tx_hash: &str,
        amount: u128,
        kind: AssetActionKind,
        bridge_view: Option<Arc<dyn BridgeView>>,
    ) -> Self {
        Self {
            id: id.to_string(),
            asset_id: asset_id.to_string(),
            chain_id: chain_id.to_string(),
            block,
            log_index,
            tx_hash: tx_hash.to_string(),
            amount,
            kind,
            state: AtomicU32::new(PENDING),
            bridge_view,
        }
    }

    pub(super) fn with_state(self, state: u32) -> Self {
        self.state.store(state, Ordering::Release);
        self
    }

    pub fn kind(&self) -> &AssetActionKind {
        &self.kind
    }

    pub fn state(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PENDING
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == REJECTED
    }

    /// Record the witness verdict. Only the first verdict counts.
    pub fn mark(&self, valid: bool) {
        let outcome = if valid { ACCEPTED } else { REJECTED };
        let _ = self
            .state
            .compare_exchange(PENDING, outcome, Ordering::AcqRel, Ordering::Acquire);
    }

    pub(super) fn chain_ref(&self) -> ChainEventRef<'_> {
        ChainEventRef {
            chain_id: &self.chain_id,
            asset_class: self.kind.asset_class(),
            block: self.block,
            tx_hash: &self.tx_hash,
            log_index: self.log_index,
        }
    }
}

impl WitnessResource for AssetAction {
    fn id(&self) -> &str {
        &self.id
    }

    fn check(&self) -> Result<()> {
        let kind = match &self.kind {
            AssetActionKind::BuiltinDeposit { .. } => return Ok(()),
            AssetActionKind::Erc20Deposit { .. } => BridgeEventKind::Deposit,
            AssetActionKind::Erc20AssetList { .. } => BridgeEventKind::AssetList,
            AssetActionKind::Erc20AssetLimitsUpdated { .. } => BridgeEventKind::AssetLimitsUpdated,
            AssetActionKind::Erc20Withdrawal { .. } => BridgeEventKind::Withdrawal,
            AssetActionKind::BridgeStopped => BridgeEventKind::BridgeStopped,
            AssetActionKind::BridgeResumed => BridgeEventKind::BridgeResumed,
        };
        let view = self
            .bridge_view
            .as_ref()
            .ok_or_else(|| SettlementError::UnknownChainId {
                chain_id: self.chain_id.clone(),
            })?;
        view.find_event(&BridgeEvent {
            kind,
            asset_address: self.kind.source_address(),
            amount: self.amount,
            block: self.block,
            log_index: self.log_index,
            tx_hash: &self.tx_hash,
        })
    }
}

/// ERC20 deposit as reported by the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erc20Deposit {
    pub party_id: String,
    pub asset_id: String,
    pub source_address: String,
    pub amount: u128,
}

fn verdict_callback(action: Arc<AssetAction>) -> CheckCallback {
    Box::new(move |valid| action.mark(valid))
}

impl Engine {
    // ========================================================================
    // Ingestion
    // ========================================================================

    pub fn deposit_builtin(
        &mut self,
        assets: &AssetRegistry,
        id: &str,
        party: &str,
        asset_id: &str,
        amount: u128,
        nonce: u64,
    ) -> Result<()> {
        let asset = assets.get(asset_id)?;
        if !asset.is_builtin() {
            return Err(SettlementError::WrongAssetTypeUsedInBuiltinAssetChainEvent);
        }
        let deposit = self.new_deposit(id, party, asset_id, amount, "");
        let action = AssetAction::new(
            id,
            asset_id,
            "",
            0,
            nonce,
            "",
            amount,
            AssetActionKind::BuiltinDeposit {
                deposit_id: deposit.id.clone(),
            },
            None,
        );
        self.add_action(action)?;
        self.open_deposit(deposit);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn deposit_erc20(
        &mut self,
        assets: &AssetRegistry,
        id: &str,
        deposit: &Erc20Deposit,
        block: u64,
        log_index: u64,
        tx_hash: &str,
        chain_id: &str,
    ) -> Result<()> {
        let asset = assets.get(&deposit.asset_id)?;
        if asset.as_erc20().is_none() {
            return Err(SettlementError::WrongAssetTypeUsedInErc20ChainEvent);
        }
        let view = self.bridge_view_for(chain_id)?;
        let record = self.new_deposit(
            id,
            &deposit.party_id,
            &deposit.asset_id,
            deposit.amount,
            tx_hash,
        );
        let action = AssetAction::new(
            id,
            &deposit.asset_id,
            chain_id,
            block,
            log_index,
            tx_hash,
            deposit.amount,
            AssetActionKind::Erc20Deposit {
                deposit_id: record.id.clone(),
                source_address: deposit.source_address.clone(),
            },
            Some(view),
        );
        self.add_action(action)?;
        self.open_deposit(record);
        Ok(())
    }

    /// The bridge listed a proposed asset.
    #[allow(clippy::too_many_arguments)]
    pub fn enable_erc20(
        &mut self,
        assets: &AssetRegistry,
        id: &str,
        asset_id: &str,
        source_address: &str,
        block: u64,
        log_index: u64,
        tx_hash: &str,
        chain_id: &str,
    ) -> Result<()> {
        let asset = assets.get(asset_id)?;
        if asset.as_erc20().is_none() {
            return Err(SettlementError::WrongAssetTypeUsedInErc20ChainEvent);
        }
        let view = self.bridge_view_for(chain_id)?;
        self.add_action(AssetAction::new(
            id,
            asset_id,
            chain_id,
            block,
            log_index,
            tx_hash,
            0,
            AssetActionKind::Erc20AssetList {
                source_address: source_address.to_string(),
            },
            Some(view),
        ))
    }

    /// The bridge applied new limits to an asset with a staged update.
    #[allow(clippy::too_many_arguments)]
    pub fn update_erc20(
        &mut self,
        assets: &AssetRegistry,
        id: &str,
        asset_id: &str,
        source_address: &str,
        lifetime_limit: u128,
        withdraw_threshold: u128,
        block: u64,
        log_index: u64,
        tx_hash: &str,
        chain_id: &str,
    ) -> Result<()> {
        let asset = assets.get(asset_id)?;
        if asset.as_erc20().is_none() {
            return Err(SettlementError::WrongAssetTypeUsedInErc20ChainEvent);
        }
        if assets.get_pending_update(asset_id).is_err() {
            return Err(SettlementError::NoStagedAssetUpdate {
                id: asset_id.to_string(),
            });
        }
        let view = self.bridge_view_for(chain_id)?;
        self.add_action(AssetAction::new(
            id,
            asset_id,
            chain_id,
            block,
            log_index,
            tx_hash,
            0,
            AssetActionKind::Erc20AssetLimitsUpdated {
                source_address: source_address.to_string(),
                lifetime_limit,
                withdraw_threshold,
            },
            Some(view),
        ))
    }

    /// The bridge paid out a withdrawal.
    pub fn erc20_withdrawal_event(
        &mut self,
        id: &str,
        reference: u128,
        tx_hash: &str,
        block: u64,
        log_index: u64,
        chain_id: &str,
    ) -> Result<()> {
        let withdrawal = self.get_withdrawal_from_ref(reference)?;
        if withdrawal.status != WithdrawalStatus::Open {
            return Err(SettlementError::InvalidWithdrawalState);
        }
        if self
            .notary
            .is_signed(&withdrawal.id, SignatureKind::AssetWithdrawal)
            .is_none()
        {
            return Err(SettlementError::WithdrawalNotReady);
        }
        let withdrawal_id = withdrawal.id.clone();
        let asset_id = withdrawal.asset.clone();
        let amount = withdrawal.amount;
        let view = self.bridge_view_for(chain_id)?;
        self.add_action(AssetAction::new(
            id,
            &asset_id,
            chain_id,
            block,
            log_index,
            tx_hash,
            amount,
            AssetActionKind::Erc20Withdrawal {
                reference,
                withdrawal_id,
            },
            Some(view),
        ))
    }

    /// The bridge was stopped (`stopped == true`) or resumed.
    pub fn bridge_stopped(
        &mut self,
        stopped: bool,
        id: &str,
        block: u64,
        log_index: u64,
        tx_hash: &str,
        chain_id: &str,
    ) -> Result<()> {
        let view = self.bridge_view_for(chain_id)?;
        let kind = if stopped {
            AssetActionKind::BridgeStopped
        } else {
            AssetActionKind::BridgeResumed
        };
        self.add_action(AssetAction::new(
            id,
            "",
            chain_id,
            block,
            log_index,
            tx_hash,
            0,
            kind,
            Some(view),
        ))
    }

    pub(super) fn bridge_view_for(&self, chain_id: &str) -> Result<Arc<dyn BridgeView>> {
        self.bridge_views
            .get(chain_id)
            .cloned()
            .ok_or_else(|| SettlementError::UnknownChainId {
                chain_id: chain_id.to_string(),
            })
    }

    fn add_action(&mut self, action: AssetAction) -> Result<()> {
        if self.asset_actions.contains_key(&action.id) {
            return Err(SettlementError::DuplicateAssetAction {
                id: action.id.clone(),
            });
        }
        let action = Arc::new(action);
        let validity = Duration::seconds(
            self.cfg.validation_duration_secs.min(MAX_VALIDATION_SECS) as i64,
        );
        let deadline = self.time.now() + validity;
        self.witness
            .start_check(action.clone(), verdict_callback(action.clone()), deadline)?;

        debug!(
            action_id = %action.id,
            kind = action.kind.as_str(),
            chain_id = %action.chain_id,
            block = action.block,
            log_index = action.log_index,
            "Asset action submitted for validation"
        );
        self.asset_actions.insert(action.id.clone(), action);
        metrics::set_pending_asset_actions(self.asset_actions.len());
        Ok(())
    }

    /// Hand a restored pending action back to the witness.
    pub(super) fn restore_action(&mut self, action: AssetAction) -> Result<()> {
        let action = Arc::new(action);
        if action.is_pending() {
            self.witness
                .restore_resource(action.clone(), verdict_callback(action.clone()))?;
        }
        self.asset_actions.insert(action.id.clone(), action);
        Ok(())
    }

    pub(super) fn restored_bridge_view(&self, chain_id: &str) -> Option<Arc<dyn BridgeView>> {
        self.bridge_views.get(chain_id).cloned()
    }

    // ========================================================================
    // Tick Processing
    // ========================================================================

    /// Drain every action with a verdict, in id order.
    pub(super) fn process_asset_actions(&mut self, assets: &mut AssetRegistry, now: DateTime<Utc>) {
        let ready: Vec<String> = self
            .asset_actions
            .iter()
            .filter(|(_, action)| !action.is_pending())
            .map(|(id, _)| id.clone())
            .collect();

        for id in ready {
            let Some(action) = self.asset_actions.remove(&id) else {
                continue;
            };
            let kind = action.kind.as_str();

            if action.is_rejected() {
                error!(action_id = %id, kind, "Asset action rejected by the network");
                metrics::record_asset_action(kind, "rejected");
                self.on_action_rejected(&action, now);
                continue;
            }

            let keys = self.dedup_keys(&action);
            if keys.iter().any(|key| self.seen.contains(key)) {
                warn!(
                    action_id = %id,
                    kind,
                    chain_id = %action.chain_id,
                    block = action.block,
                    log_index = action.log_index,
                    tx_hash = %action.tx_hash,
                    "Chain event already processed, dropping asset action"
                );
                metrics::record_dedup_drop(kind);
                continue;
            }
            if let Some(key) = keys.into_iter().next() {
                self.seen.insert(key);
            }
            if action.chain_id == self.cfg.primary_chain_id {
                self.last_seen_primary_block = self.last_seen_primary_block.max(action.block);
            }

            match self.finalize_action(assets, &action, now) {
                Ok(()) => {
                    info!(action_id = %id, kind, "Asset action finalized");
                    metrics::record_asset_action(kind, "accepted");
                }
                Err(e) => {
                    error!(action_id = %id, kind, error = %e, "Unable to finalize asset action");
                    metrics::record_asset_action(kind, "failed");
                }
            }
        }
        metrics::set_pending_asset_actions(self.asset_actions.len());
    }

    /// Stored key first, then the form a primary chain event was seen under
    /// before references carried a chain id.
    fn dedup_keys(&self, action: &AssetAction) -> Vec<String> {
        let chain_ref = action.chain_ref();
        let mut keys = vec![chain_ref.dedup_key()];
        if action.chain_id == self.cfg.primary_chain_id {
            keys.push(chain_ref.legacy_dedup_key());
        }
        keys
    }

    fn on_action_rejected(&mut self, action: &AssetAction, now: DateTime<Utc>) {
        if let Some(deposit_id) = action.kind.deposit_id() {
            if let Some(mut deposit) = self.deposits.remove(deposit_id) {
                deposit.status = DepositStatus::Cancelled;
                deposit.credit_date = unix_nanos(&now);
                self.broker.send(Event::DepositUpdated { deposit });
            }
        }
    }

    fn finalize_action(
        &mut self,
        assets: &mut AssetRegistry,
        action: &AssetAction,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match &action.kind {
            AssetActionKind::BuiltinDeposit { deposit_id }
            | AssetActionKind::Erc20Deposit { deposit_id, .. } => {
                self.finalize_deposit(deposit_id, now)
            }
            AssetActionKind::Erc20AssetList { .. } => {
                assets.enable(&action.asset_id)?;
                let asset = assets.get(&action.asset_id)?;
                self.ledger.enable_asset(asset)
            }
            AssetActionKind::Erc20AssetLimitsUpdated { .. } => {
                let asset: Asset = assets.apply_asset_update(&action.asset_id)?.clone();
                self.ledger.propagate_asset_update(&asset)
            }
            AssetActionKind::Erc20Withdrawal { reference, .. } => {
                self.finalize_withdrawal(*reference, &action.tx_hash, now)
            }
            AssetActionKind::BridgeStopped => {
                self.apply_bridge_state(&action.chain_id, true, action.block, action.log_index);
                Ok(())
            }
            AssetActionKind::BridgeResumed => {
                self.apply_bridge_state(&action.chain_id, false, action.block, action.log_index);
                Ok(())
            }
        }
    }

    // ========================================================================
    // Bridge State
    // ========================================================================

    fn apply_bridge_state(&mut self, chain_id: &str, stopped: bool, block: u64, log_index: u64) {
        let state = self.bridge_states.entry(chain_id.to_string()).or_default();
        let applied = if stopped {
            state.new_bridge_stopped(block, log_index)
        } else {
            state.new_bridge_resumed(block, log_index)
        };
        if !applied {
            debug!(
                chain_id,
                block, log_index, "Ignoring bridge state change older than current state"
            );
            return;
        }
        let state = *state;
        info!(chain_id, active = state.active, block, log_index, "Bridge state changed");
        metrics::set_bridge_active(chain_id, state.active);
        self.broker.send(Event::BridgeStateChanged {
            chain_id: chain_id.to_string(),
            active: state.active,
            block,
            log_index,
        });
    }

    pub fn bridge_state(&self, chain_id: &str) -> BridgeState {
        self.bridge_states
            .get(chain_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_bridge_stopped(&self, chain_id: &str) -> bool {
        self.bridge_state(chain_id).is_stopped()
    }

    pub fn has_asset_action(&self, id: &str) -> bool {
        self.asset_actions.contains_key(id)
    }

    pub fn last_seen_primary_block(&self) -> u64 {
        self.last_seen_primary_block
    }
}
