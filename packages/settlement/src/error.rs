//! Error types for the settlement engines
//!
//! Every caller-visible rejection has a variant here. Messages are stable:
//! they travel in broker events as the `reason` of rejected or stopped
//! transfers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SettlementError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    // ========================================================================
    // Asset Registry Errors
    // ========================================================================

    #[error("asset does not exist")]
    AssetDoesNotExist,

    #[error("asset already exists: {id}")]
    AssetAlreadyExists { id: String },

    #[error("unknown asset source")]
    UnknownAssetSource,

    #[error("erc20 chain-id does not correspond to a bridge")]
    UnknownChainId { chain_id: String },

    #[error("asset already exists for erc20 address: {address}")]
    Erc20AddressAlreadyInUse { address: String },

    #[error("asset is not enabled: {id}")]
    AssetNotEnabled { id: String },

    #[error("asset not found on bridge: {address}")]
    AssetNotFoundOnBridge { address: String },

    #[error("invalid asset details: {reason}")]
    InvalidAssetDetails { reason: String },

    // ========================================================================
    // Asset Action Errors
    // ========================================================================

    #[error("non builtin asset used for builtin asset chain event")]
    WrongAssetTypeUsedInBuiltinAssetChainEvent,

    #[error("non ERC20 for ERC20 chain event")]
    WrongAssetTypeUsedInErc20ChainEvent,

    #[error("asset action already in progress: {id}")]
    DuplicateAssetAction { id: String },

    #[error("no staged update for asset: {id}")]
    NoStagedAssetUpdate { id: String },

    #[error("deposit not found: {id}")]
    DepositNotFound { id: String },

    // ========================================================================
    // Withdrawal Errors
    // ========================================================================

    #[error("bridge is stopped")]
    BridgeStopped,

    #[error("non erc20 asset used for lock withdraw")]
    WrongAssetUsedForErc20Withdraw,

    #[error("invalid withdrawal state")]
    InvalidWithdrawalState,

    #[error("invalid reference for withdrawal chain event")]
    NotMatchingWithdrawalForReference,

    #[error("withdrawal not ready")]
    WithdrawalNotReady,

    #[error("withdrawal not found: {id}")]
    WithdrawalNotFound { id: String },

    #[error("could not withdraw funds, less than minimal amount ({minimum}) requested to withdraw")]
    WithdrawalAmountUnderMinimal { minimum: u128 },

    // ========================================================================
    // Transfer Errors
    // ========================================================================

    #[error("invalid from account")]
    InvalidFromAccount,

    #[error("invalid to account")]
    InvalidToAccount,

    #[error("unsupported from account type")]
    UnsupportedFromAccountType,

    #[error("unsupported to account type")]
    UnsupportedToAccountType,

    #[error("cannot transfer zero funds")]
    CannotTransferZeroFunds,

    #[error("transfers from vested rewards can only go to the party's own general account")]
    CanOnlyTransferVestedToOwnGeneralAccount,

    #[error("reward accounts can only be funded by a recurring transfer with a dispatch strategy")]
    DispatchStrategyRequired,

    #[error("start epoch is zero")]
    StartEpochIsZero,

    #[error("end epoch is zero")]
    EndEpochIsZero,

    #[error("invalid factor")]
    InvalidFactor,

    #[error("start epoch after end epoch")]
    StartEpochAfterEndEpoch,

    #[error("start epoch in the past")]
    StartEpochInThePast,

    #[error("cannot submit duplicate recurring transfer with same from and to")]
    DuplicateRecurringTransfer,

    #[error("could not transfer funds, less than minimal amount requested to transfer")]
    LessThanMinimalAmount,

    #[error("could not transfer funds, {0}")]
    InvalidTransferAsset(Box<SettlementError>),

    #[error("not enough funds to transfer")]
    NotEnoughFundsToTransfer,

    #[error("could not pay the fee for transfer: {0}")]
    FeePayment(Box<SettlementError>),

    #[error("recurring transfer not found")]
    RecurringTransferNotFound,

    #[error("cannot cancel transfer, party is not the owner")]
    CannotCancelNotOwner,

    #[error("market {market} is not tracked for asset {asset}")]
    MarketNotTrackedForAsset { market: String, asset: String },

    // ========================================================================
    // Governance Transfer Errors
    // ========================================================================

    #[error("invalid source type for governance transfer")]
    InvalidGovernanceSourceType,

    #[error("invalid destination for governance transfer")]
    InvalidGovernanceDestination,

    #[error("missing asset for governance transfer")]
    MissingGovernanceAsset,

    #[error("invalid max amount for governance transfer")]
    InvalidGovernanceMaxAmount,

    #[error("invalid fraction of balance for governance transfer")]
    InvalidGovernanceFraction,

    #[error("invalid transfer amount for transfer type all or nothing")]
    AllOrNothingAmountMismatch,

    #[error("governance transfer {id} not found")]
    GovernanceTransferNotFound { id: String },

    // ========================================================================
    // Vesting Errors
    // ========================================================================

    #[error("invalid vesting benefit tiers: {reason}")]
    InvalidBenefitTiers { reason: String },

    // ========================================================================
    // Snapshot Errors
    // ========================================================================

    #[error("snapshot key does not exist: {key}")]
    SnapshotKeyDoesNotExist { key: String },

    #[error("could not decode snapshot payload for {key}: {reason}")]
    SnapshotDecode { key: String, reason: String },

    #[error("could not encode snapshot payload for {key}: {reason}")]
    SnapshotEncode { key: String, reason: String },

    // ========================================================================
    // Numeric Errors
    // ========================================================================

    #[error("invalid decimal: {value}")]
    InvalidDecimal { value: String },

    // ========================================================================
    // Collaborator Errors
    // ========================================================================

    #[error("ledger: {0}")]
    Ledger(String),

    #[error("witness: {0}")]
    Witness(String),

    #[error("bridge view: {0}")]
    BridgeView(String),

    #[error("signer: {0}")]
    Signer(String),
}

impl SettlementError {
    /// Wrap an error raised while charging the transfer fee.
    pub fn fee_payment(inner: SettlementError) -> Self {
        SettlementError::FeePayment(Box::new(inner))
    }

    /// Wrap an asset lookup failure raised during transfer validation.
    pub fn invalid_transfer_asset(inner: SettlementError) -> Self {
        SettlementError::InvalidTransferAsset(Box::new(inner))
    }
}
