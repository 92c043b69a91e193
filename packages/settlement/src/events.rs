//! Events published to the broker
//!
//! One variant per observable state transition. Collections inside events
//! are always sorted so that every node publishes identical payloads.

use serde::Serialize;

use crate::assets::Asset;
use crate::banking::{GovernanceTransfer, TransferCommand};
use crate::types::{AssetId, Deposit, LedgerMovement, PartyId, Withdrawal};
use crate::vesting::{PartyVestingStats, PartyVestingSummary};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    AssetUpdated {
        asset: Asset,
    },
    DepositUpdated {
        deposit: Deposit,
    },
    WithdrawalUpdated {
        withdrawal: Withdrawal,
    },
    TransferFunds {
        transfer: TransferCommand,
        reason: Option<String>,
    },
    GovernanceTransferFunds {
        transfer: GovernanceTransfer,
        amount: u128,
        reason: Option<String>,
    },
    LedgerMovements {
        movements: Vec<LedgerMovement>,
    },
    TransferFeesPaid {
        transfer_id: String,
        amount: u128,
        discount_applied: u128,
        epoch: u64,
    },
    TransferFeesDiscountUpdated {
        party: PartyId,
        asset: AssetId,
        amount: u128,
        epoch: u64,
    },
    BridgeStateChanged {
        chain_id: String,
        active: bool,
        block: u64,
        log_index: u64,
    },
    VestingStatsUpdated {
        epoch: u64,
        stats: Vec<PartyVestingStats>,
    },
    VestingBalancesSummary {
        epoch: u64,
        parties: Vec<PartyVestingSummary>,
    },
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::AssetUpdated { .. } => "asset_updated",
            Event::DepositUpdated { .. } => "deposit_updated",
            Event::WithdrawalUpdated { .. } => "withdrawal_updated",
            Event::TransferFunds { .. } => "transfer_funds",
            Event::GovernanceTransferFunds { .. } => "governance_transfer_funds",
            Event::LedgerMovements { .. } => "ledger_movements",
            Event::TransferFeesPaid { .. } => "transfer_fees_paid",
            Event::TransferFeesDiscountUpdated { .. } => "transfer_fees_discount_updated",
            Event::BridgeStateChanged { .. } => "bridge_state_changed",
            Event::VestingStatsUpdated { .. } => "vesting_stats_updated",
            Event::VestingBalancesSummary { .. } => "vesting_balances_summary",
        }
    }
}
