use borsh::{BorshDeserialize, BorshSerialize};

use super::asset_actions::{AssetAction, AssetActionKind};
use super::fees::{FeeDiscountEntry, PendingTakerFees};
use super::gov_transfers::{
    GovernanceTransfer, GovernanceTransferConfig, GovernanceTransferKind, GovernanceTransferType,
};
use super::transfers::{OneOffTransfer, RecurringTransfer, TransferBase};
use super::{BridgeState, Engine};
use crate::error::Result;
use crate::num::parse_decimal;
use crate::snapshot::{decode, encode, unknown_key, StateProvider};
use crate::types::{AccountType, Deposit, DispatchStrategy, TransferStatus, Withdrawal};

pub const DEPOSITS_KEY: &str = "deposits";
pub const WITHDRAWALS_KEY: &str = "withdrawals";
pub const SEEN_KEY: &str = "seen";
pub const ASSET_ACTIONS_KEY: &str = "asset_actions";
pub const RECURRING_TRANSFERS_KEY: &str = "recurring_transfers";
pub const SCHEDULED_TRANSFERS_KEY: &str = "scheduled_transfers";
pub const BRIDGE_STATE_KEY: &str = "bridge_state";
pub const RECURRING_GOV_TRANSFERS_KEY: &str = "recurring_gov_transfers";
pub const SCHEDULED_GOV_TRANSFERS_KEY: &str = "scheduled_gov_transfers";
pub const TRANSFER_FEE_DISCOUNTS_KEY: &str = "transfer_fee_discounts";

const KEYS: &[&str] = &[
    DEPOSITS_KEY,
    WITHDRAWALS_KEY,
    SEEN_KEY,
    ASSET_ACTIONS_KEY,
    RECURRING_TRANSFERS_KEY,
    SCHEDULED_TRANSFERS_KEY,
    BRIDGE_STATE_KEY,
    RECURRING_GOV_TRANSFERS_KEY,
    SCHEDULED_GOV_TRANSFERS_KEY,
    TRANSFER_FEE_DISCOUNTS_KEY,
];

// ============================================================================
// Payloads
// ============================================================================

#[derive(BorshSerialize, BorshDeserialize)]
struct DepositsPayload {
    deposits: Vec<Deposit>,
}

/// Sorted by bridge reference
#[derive(BorshSerialize, BorshDeserialize)]
struct WithdrawalsPayload {
    withdrawals: Vec<Withdrawal>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct SeenPayload {
    seen: Vec<String>,
    last_seen_primary_block: u64,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct AssetActionEntry {
    id: String,
    asset_id: String,
    chain_id: String,
    block: u64,
    log_index: u64,
    tx_hash: String,
    amount: u128,
    kind: AssetActionKind,
    state: u32,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct AssetActionsPayload {
    actions: Vec<AssetActionEntry>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct BridgeStatePayload {
    chains: Vec<(String, BridgeState)>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RecurringTransferEntry {
    base: TransferBase,
    start_epoch: u64,
    end_epoch: Option<u64>,
    factor: String,
    dispatch_strategy: Option<DispatchStrategy>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RecurringTransfersPayload {
    current_epoch: u64,
    transfers: Vec<RecurringTransferEntry>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct ScheduledTransfersPayload {
    scheduled: Vec<(i64, Vec<OneOffTransfer>)>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct GovernanceTransferEntry {
    id: String,
    reference: String,
    status: TransferStatus,
    timestamp: i64,
    source_type: AccountType,
    source: String,
    destination_type: AccountType,
    destination: String,
    asset: String,
    fraction_of_balance: String,
    max_amount: u128,
    transfer_type: GovernanceTransferType,
    kind: GovernanceTransferKind,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RecurringGovTransfersPayload {
    transfers: Vec<GovernanceTransferEntry>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct ScheduledGovTransfersPayload {
    scheduled: Vec<(i64, Vec<GovernanceTransferEntry>)>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct FeeDiscountsPayload {
    entries: Vec<FeeDiscountEntry>,
    pending: Vec<PendingTakerFees>,
}

// ============================================================================
// Conversions
// ============================================================================

impl From<&RecurringTransfer> for RecurringTransferEntry {
    fn from(t: &RecurringTransfer) -> Self {
        Self {
            base: t.base.clone(),
            start_epoch: t.start_epoch,
            end_epoch: t.end_epoch,
            factor: t.factor.to_string(),
            dispatch_strategy: t.dispatch_strategy.clone(),
        }
    }
}

impl RecurringTransferEntry {
    fn into_transfer(self) -> Result<RecurringTransfer> {
        Ok(RecurringTransfer {
            base: self.base,
            start_epoch: self.start_epoch,
            end_epoch: self.end_epoch,
            factor: parse_decimal(&self.factor)?,
            dispatch_strategy: self.dispatch_strategy,
        })
    }
}

impl From<&GovernanceTransfer> for GovernanceTransferEntry {
    fn from(t: &GovernanceTransfer) -> Self {
        let c = &t.config;
        Self {
            id: t.id.clone(),
            reference: t.reference.clone(),
            status: t.status,
            timestamp: t.timestamp,
            source_type: c.source_type,
            source: c.source.clone(),
            destination_type: c.destination_type,
            destination: c.destination.clone(),
            asset: c.asset.clone(),
            fraction_of_balance: c.fraction_of_balance.to_string(),
            max_amount: c.max_amount,
            transfer_type: c.transfer_type,
            kind: c.kind.clone(),
        }
    }
}

impl GovernanceTransferEntry {
    fn into_transfer(self) -> Result<GovernanceTransfer> {
        Ok(GovernanceTransfer {
            id: self.id,
            reference: self.reference,
            status: self.status,
            timestamp: self.timestamp,
            config: GovernanceTransferConfig {
                source_type: self.source_type,
                source: self.source,
                destination_type: self.destination_type,
                destination: self.destination,
                asset: self.asset,
                fraction_of_balance: parse_decimal(&self.fraction_of_balance)?,
                max_amount: self.max_amount,
                transfer_type: self.transfer_type,
                kind: self.kind,
            },
        })
    }
}

// ============================================================================
// Provider
// ============================================================================

impl Engine {
    fn serialize_asset_actions(&self, key: &str) -> Result<Vec<u8>> {
        let actions = self
            .asset_actions
            .values()
            .map(|a| AssetActionEntry {
                id: a.id.clone(),
                asset_id: a.asset_id.clone(),
                chain_id: a.chain_id.clone(),
                block: a.block,
                log_index: a.log_index,
                tx_hash: a.tx_hash.clone(),
                amount: a.amount,
                kind: a.kind.clone(),
                state: a.state(),
            })
            .collect();
        encode(key, &AssetActionsPayload { actions })
    }

    fn restore_asset_actions(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        let restored: AssetActionsPayload = decode(key, bytes)?;
        self.asset_actions.clear();
        for entry in restored.actions {
            let view = self.restored_bridge_view(&entry.chain_id);
            let action = AssetAction::new(
                &entry.id,
                &entry.asset_id,
                &entry.chain_id,
                entry.block,
                entry.log_index,
                &entry.tx_hash,
                entry.amount,
                entry.kind,
                view,
            )
            .with_state(entry.state);
            self.restore_action(action)?;
        }
        Ok(())
    }

    fn restore_withdrawals(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        let restored: WithdrawalsPayload = decode(key, bytes)?;
        self.withdrawals.clear();
        self.withdrawal_refs.clear();
        self.withdrawal_count = restored.withdrawals.len() as u128;
        for withdrawal in restored.withdrawals {
            self.withdrawal_refs
                .insert(withdrawal.reference, withdrawal.id.clone());
            self.withdrawals.insert(withdrawal.id.clone(), withdrawal);
        }
        Ok(())
    }
}

impl StateProvider for Engine {
    fn namespace(&self) -> &'static str {
        "banking"
    }

    fn keys(&self) -> &'static [&'static str] {
        KEYS
    }

    fn serialize_state(&self, key: &str) -> Result<Vec<u8>> {
        match key {
            DEPOSITS_KEY => encode(
                key,
                &DepositsPayload {
                    deposits: self.deposits.values().cloned().collect(),
                },
            ),
            WITHDRAWALS_KEY => {
                let mut withdrawals: Vec<Withdrawal> = self.withdrawals.values().cloned().collect();
                withdrawals.sort_by_key(|w| w.reference);
                encode(key, &WithdrawalsPayload { withdrawals })
            }
            SEEN_KEY => encode(
                key,
                &SeenPayload {
                    seen: self.seen.iter().cloned().collect(),
                    last_seen_primary_block: self.last_seen_primary_block,
                },
            ),
            ASSET_ACTIONS_KEY => self.serialize_asset_actions(key),
            RECURRING_TRANSFERS_KEY => encode(
                key,
                &RecurringTransfersPayload {
                    current_epoch: self.current_epoch,
                    transfers: self.recurring_transfers.values().map(Into::into).collect(),
                },
            ),
            SCHEDULED_TRANSFERS_KEY => encode(
                key,
                &ScheduledTransfersPayload {
                    scheduled: self
                        .scheduled_transfers
                        .iter()
                        .map(|(at, transfers)| (*at, transfers.clone()))
                        .collect(),
                },
            ),
            BRIDGE_STATE_KEY => encode(
                key,
                &BridgeStatePayload {
                    chains: self
                        .bridge_states
                        .iter()
                        .map(|(chain, state)| (chain.clone(), *state))
                        .collect(),
                },
            ),
            RECURRING_GOV_TRANSFERS_KEY => encode(
                key,
                &RecurringGovTransfersPayload {
                    transfers: self.recurring_gov_transfers.values().map(Into::into).collect(),
                },
            ),
            SCHEDULED_GOV_TRANSFERS_KEY => encode(
                key,
                &ScheduledGovTransfersPayload {
                    scheduled: self
                        .scheduled_gov_transfers
                        .iter()
                        .map(|(at, transfers)| (*at, transfers.iter().map(Into::into).collect()))
                        .collect(),
                },
            ),
            TRANSFER_FEE_DISCOUNTS_KEY => encode(
                key,
                &FeeDiscountsPayload {
                    entries: self.fee_discounts.entries(),
                    pending: self.fee_discounts.pending_entries(),
                },
            ),
            _ => Err(unknown_key(key)),
        }
    }

    fn restore_state(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        match key {
            DEPOSITS_KEY => {
                let restored: DepositsPayload = decode(key, bytes)?;
                self.deposits = restored
                    .deposits
                    .into_iter()
                    .map(|d| (d.id.clone(), d))
                    .collect();
            }
            WITHDRAWALS_KEY => self.restore_withdrawals(key, bytes)?,
            SEEN_KEY => {
                let restored: SeenPayload = decode(key, bytes)?;
                self.seen = restored.seen.into_iter().collect();
                self.last_seen_primary_block = restored.last_seen_primary_block;
            }
            ASSET_ACTIONS_KEY => self.restore_asset_actions(key, bytes)?,
            RECURRING_TRANSFERS_KEY => {
                let restored: RecurringTransfersPayload = decode(key, bytes)?;
                self.current_epoch = restored.current_epoch;
                self.recurring_transfers.clear();
                for entry in restored.transfers {
                    let transfer = entry.into_transfer()?;
                    self.recurring_transfers
                        .insert(transfer.base.id.clone(), transfer);
                }
                self.rebuild_dispatch_strategies()?;
            }
            SCHEDULED_TRANSFERS_KEY => {
                let restored: ScheduledTransfersPayload = decode(key, bytes)?;
                self.scheduled_transfers = restored.scheduled.into_iter().collect();
            }
            BRIDGE_STATE_KEY => {
                let restored: BridgeStatePayload = decode(key, bytes)?;
                self.bridge_states = restored.chains.into_iter().collect();
            }
            RECURRING_GOV_TRANSFERS_KEY => {
                let restored: RecurringGovTransfersPayload = decode(key, bytes)?;
                self.recurring_gov_transfers.clear();
                for entry in restored.transfers {
                    let transfer = entry.into_transfer()?;
                    self.recurring_gov_transfers
                        .insert(transfer.id.clone(), transfer);
                }
                self.rebuild_dispatch_strategies()?;
            }
            SCHEDULED_GOV_TRANSFERS_KEY => {
                let restored: ScheduledGovTransfersPayload = decode(key, bytes)?;
                self.scheduled_gov_transfers.clear();
                for (at, entries) in restored.scheduled {
                    let transfers = entries
                        .into_iter()
                        .map(GovernanceTransferEntry::into_transfer)
                        .collect::<Result<Vec<_>>>()?;
                    self.scheduled_gov_transfers.insert(at, transfers);
                }
            }
            TRANSFER_FEE_DISCOUNTS_KEY => {
                let restored: FeeDiscountsPayload = decode(key, bytes)?;
                self.fee_discounts.restore(restored.entries, restored.pending);
            }
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }
}
