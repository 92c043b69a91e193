//! Common types shared by the settlement engines
//!
//! Ids are plain strings (hex party keys, asset ids, proposal ids). Amounts
//! are `u128` base units of the asset. Timestamps are unix nanoseconds.

use bigdecimal::BigDecimal;
use borsh::{BorshDeserialize, BorshSerialize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type PartyId = String;
pub type AssetId = String;

/// Owner of network-wide system accounts.
pub const SYSTEM_OWNER: &str = "*";

/// Unix nanoseconds, saturating far outside the chrono range.
pub fn unix_nanos(t: &DateTime<Utc>) -> i64 {
    t.timestamp()
        .saturating_mul(1_000_000_000)
        .saturating_add(i64::from(t.timestamp_subsec_nanos()))
}

// ============================================================================
// Accounts
// ============================================================================

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub enum AccountType {
    General,
    VestedRewards,
    Vesting,
    PendingTransfers,
    Insurance,
    GlobalInsurance,
    GlobalReward,
    NetworkTreasury,
    FeesInfrastructure,
    MakerPaidFeeReward,
    MakerReceivedFeeReward,
    LpFeeReward,
    MarketProposerReward,
    AveragePositionReward,
    RelativeReturnReward,
    ReturnVolatilityReward,
    ValidatorRankingReward,
    Margin,
    Bond,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::General => "general",
            AccountType::VestedRewards => "vested_rewards",
            AccountType::Vesting => "vesting",
            AccountType::PendingTransfers => "pending_transfers",
            AccountType::Insurance => "insurance",
            AccountType::GlobalInsurance => "global_insurance",
            AccountType::GlobalReward => "global_reward",
            AccountType::NetworkTreasury => "network_treasury",
            AccountType::FeesInfrastructure => "fees_infrastructure",
            AccountType::MakerPaidFeeReward => "maker_paid_fee_reward",
            AccountType::MakerReceivedFeeReward => "maker_received_fee_reward",
            AccountType::LpFeeReward => "lp_fee_reward",
            AccountType::MarketProposerReward => "market_proposer_reward",
            AccountType::AveragePositionReward => "average_position_reward",
            AccountType::RelativeReturnReward => "relative_return_reward",
            AccountType::ReturnVolatilityReward => "return_volatility_reward",
            AccountType::ValidatorRankingReward => "validator_ranking_reward",
            AccountType::Margin => "margin",
            AccountType::Bond => "bond",
        }
    }

    /// Reward pools fed by dispatch strategies, one per metric.
    pub fn is_reward_metric(&self) -> bool {
        matches!(
            self,
            AccountType::MakerPaidFeeReward
                | AccountType::MakerReceivedFeeReward
                | AccountType::LpFeeReward
                | AccountType::MarketProposerReward
                | AccountType::AveragePositionReward
                | AccountType::RelativeReturnReward
                | AccountType::ReturnVolatilityReward
                | AccountType::ValidatorRankingReward
        )
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a ledger account as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub owner: PartyId,
    pub asset: AssetId,
    pub account_type: AccountType,
    pub balance: u128,
}

// ============================================================================
// Statuses
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum TransferStatus {
    Pending,
    Done,
    Rejected,
    Stopped,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Done => "done",
            TransferStatus::Rejected => "rejected",
            TransferStatus::Stopped => "stopped",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum DepositStatus {
    Open,
    Cancelled,
    Finalized,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Open => "open",
            DepositStatus::Cancelled => "cancelled",
            DepositStatus::Finalized => "finalized",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum WithdrawalStatus {
    Open,
    Rejected,
    Finalized,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Open => "open",
            WithdrawalStatus::Rejected => "rejected",
            WithdrawalStatus::Finalized => "finalized",
        }
    }
}

// ============================================================================
// Deposits & Withdrawals
// ============================================================================

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Deposit {
    pub id: String,
    pub status: DepositStatus,
    pub party_id: PartyId,
    pub asset: AssetId,
    pub amount: u128,
    pub tx_hash: String,
    pub created_timestamp: i64,
    /// Set when the ledger credited the party.
    pub credit_date: i64,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Erc20WithdrawExt {
    pub receiver_address: String,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Withdrawal {
    pub id: String,
    pub party_id: PartyId,
    pub asset: AssetId,
    pub amount: u128,
    pub status: WithdrawalStatus,
    /// Bridge nonce, also the lookup key for acknowledgement events.
    pub reference: u128,
    pub tx_hash: String,
    pub created_timestamp: i64,
    pub withdrawn_timestamp: i64,
    pub ext: Option<Erc20WithdrawExt>,
}

// ============================================================================
// Ledger Instructions
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum TransferType {
    TransferFundsSend,
    TransferFundsDistribute,
    InfrastructureFeePay,
    GovernanceTransfer,
    RewardsVested,
}

/// One leg of a ledger transfer request. Debit legs carry the payer in
/// `owner`, credit legs the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub owner: PartyId,
    pub asset: AssetId,
    pub amount: u128,
    pub min_amount: u128,
    pub transfer_type: TransferType,
    /// Market or dispatch-strategy hash scoping a system account, empty otherwise.
    pub market: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub from_account: String,
    pub to_account: String,
    pub asset: AssetId,
    pub amount: u128,
    pub transfer_type: TransferType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMovement {
    pub entries: Vec<LedgerEntry>,
}

// ============================================================================
// Epochs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpochAction {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub seq: u64,
    pub action: EpochAction,
}

impl Epoch {
    pub fn start(seq: u64) -> Self {
        Epoch {
            seq,
            action: EpochAction::Start,
        }
    }

    pub fn end(seq: u64) -> Self {
        Epoch {
            seq,
            action: EpochAction::End,
        }
    }
}

// ============================================================================
// Market Activity
// ============================================================================

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub enum DispatchMetric {
    MakerFeesPaid,
    MakerFeesReceived,
    LpFeesReceived,
    MarketValue,
    AveragePosition,
    RelativeReturn,
    ReturnVolatility,
    ValidatorRanking,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub enum EntityScope {
    Individuals,
    Teams,
}

/// How a recurring transfer into a reward pool is split between markets
/// and parties.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct DispatchStrategy {
    pub asset_for_metric: AssetId,
    pub metric: DispatchMetric,
    pub markets: Vec<String>,
    pub entity_scope: EntityScope,
    pub window_length: u64,
    pub lock_period: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyContributionScore {
    pub party: PartyId,
    pub score: BigDecimal,
    pub is_eligible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContributionScore {
    pub market: String,
    pub score: BigDecimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unix_nanos() {
        let t = Utc.timestamp_opt(10, 500).unwrap();
        assert_eq!(unix_nanos(&t), 10_000_000_500);
    }

    #[test]
    fn test_account_type_as_str() {
        assert_eq!(AccountType::General.as_str(), "general");
        assert_eq!(AccountType::GlobalReward.to_string(), "global_reward");
        assert!(AccountType::LpFeeReward.is_reward_metric());
        assert!(!AccountType::GlobalReward.is_reward_metric());
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(TransferStatus::Stopped.as_str(), "stopped");
        assert_eq!(DepositStatus::Finalized.as_str(), "finalized");
        assert_eq!(WithdrawalStatus::Open.as_str(), "open");
        assert_eq!(format!("{}", TransferStatus::Done), "done");
    }
}
