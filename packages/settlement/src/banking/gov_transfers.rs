//! Governance transfers
//!
//! Enacted proposals move funds out of network pools. The payable amount is
//! capped by the proposal and by network-wide limits. No fee is charged.

use bigdecimal::BigDecimal;
use borsh::{BorshDeserialize, BorshSerialize};
use chrono::{DateTime, Utc};
use num_traits::{One, Zero};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use super::dispatch::Payout;
use super::recurring::check_epochs;
use super::transfers::{credit_owner, leg, Instructions};
use super::Engine;
use crate::assets::AssetRegistry;
use crate::error::{Result, SettlementError};
use crate::events::Event;
use crate::metrics;
use crate::num::mul_amount;
use crate::types::{
    unix_nanos, AccountType, AssetId, DispatchStrategy, TransferStatus, TransferType, SYSTEM_OWNER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceTransferType {
    /// Fails unless the full requested amount can be paid
    AllOrNothing,
    /// Pays whatever the caps allow
    BestEffort,
}

impl GovernanceTransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceTransferType::AllOrNothing => "all_or_nothing",
            GovernanceTransferType::BestEffort => "best_effort",
        }
    }
}

impl fmt::Display for GovernanceTransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, BorshSerialize, BorshDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceTransferKind {
    OneOff {
        /// Unix nanos; immediate when absent or already past
        deliver_on: Option<i64>,
    },
    Recurring {
        start_epoch: u64,
        end_epoch: Option<u64>,
        dispatch_strategy: Option<DispatchStrategy>,
    },
}

/// The terms of an enacted transfer proposal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernanceTransferConfig {
    pub source_type: AccountType,
    /// Market scoping the source pool, empty for network-wide pools
    pub source: String,
    pub destination_type: AccountType,
    pub destination: String,
    pub asset: AssetId,
    pub fraction_of_balance: BigDecimal,
    pub max_amount: u128,
    pub transfer_type: GovernanceTransferType,
    pub kind: GovernanceTransferKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernanceTransfer {
    pub id: String,
    pub reference: String,
    pub status: TransferStatus,
    pub timestamp: i64,
    pub config: GovernanceTransferConfig,
}

impl GovernanceTransfer {
    pub fn dispatch_strategy(&self) -> Option<&DispatchStrategy> {
        match &self.config.kind {
            GovernanceTransferKind::Recurring {
                dispatch_strategy, ..
            } => dispatch_strategy.as_ref(),
            GovernanceTransferKind::OneOff { .. } => None,
        }
    }

    fn end_epoch(&self) -> Option<u64> {
        match &self.config.kind {
            GovernanceTransferKind::Recurring { end_epoch, .. } => *end_epoch,
            GovernanceTransferKind::OneOff { .. } => None,
        }
    }

    fn start_epoch(&self) -> u64 {
        match &self.config.kind {
            GovernanceTransferKind::Recurring { start_epoch, .. } => *start_epoch,
            GovernanceTransferKind::OneOff { .. } => 0,
        }
    }
}

fn is_pool(account_type: AccountType) -> bool {
    matches!(
        account_type,
        AccountType::Insurance
            | AccountType::GlobalInsurance
            | AccountType::GlobalReward
            | AccountType::NetworkTreasury
    )
}

impl Engine {
    // ========================================================================
    // Proposal Validation
    // ========================================================================

    /// Check a proposed transfer before it is enacted.
    pub fn verify_governance_transfer(
        &self,
        assets: &AssetRegistry,
        config: &GovernanceTransferConfig,
    ) -> Result<()> {
        if !is_pool(config.source_type) {
            return Err(SettlementError::InvalidGovernanceSourceType);
        }
        let destination = config.destination_type;
        if !(is_pool(destination)
            || destination == AccountType::General
            || destination.is_reward_metric())
        {
            return Err(SettlementError::InvalidGovernanceDestination);
        }
        if destination == AccountType::General && config.destination.is_empty() {
            return Err(SettlementError::InvalidGovernanceDestination);
        }
        if config.asset.is_empty() {
            return Err(SettlementError::MissingGovernanceAsset);
        }
        if !assets.is_enabled(&config.asset) {
            return Err(SettlementError::invalid_transfer_asset(
                SettlementError::AssetNotEnabled {
                    id: config.asset.clone(),
                },
            ));
        }
        if config.max_amount == 0 {
            return Err(SettlementError::InvalidGovernanceMaxAmount);
        }
        if config.fraction_of_balance <= BigDecimal::zero()
            || config.fraction_of_balance > BigDecimal::one()
        {
            return Err(SettlementError::InvalidGovernanceFraction);
        }
        if let GovernanceTransferKind::Recurring {
            start_epoch,
            end_epoch,
            dispatch_strategy,
        } = &config.kind
        {
            check_epochs(*start_epoch, *end_epoch, self.current_epoch)?;
            if destination.is_reward_metric() && dispatch_strategy.is_none() {
                return Err(SettlementError::DispatchStrategyRequired);
            }
        }
        Ok(())
    }

    pub fn verify_cancel_governance_transfer(&self, id: &str) -> Result<()> {
        if self.recurring_gov_transfers.contains_key(id) {
            Ok(())
        } else {
            Err(SettlementError::GovernanceTransferNotFound { id: id.to_string() })
        }
    }

    pub fn cancel_governance_transfer(&mut self, id: &str) -> Result<()> {
        let Some(mut transfer) = self.recurring_gov_transfers.remove(id) else {
            return Err(SettlementError::GovernanceTransferNotFound { id: id.to_string() });
        };
        self.unregister_dispatch_strategy(transfer.dispatch_strategy());
        transfer.status = TransferStatus::Cancelled;
        info!(transfer_id = id, "Governance transfer cancelled");
        self.publish_governance_transfer(transfer, 0, None);
        Ok(())
    }

    // ========================================================================
    // Enactment
    // ========================================================================

    /// Enact a governance transfer. Immediate one-offs execute now, the rest
    /// are scheduled.
    pub fn new_governance_transfer(
        &mut self,
        assets: &AssetRegistry,
        id: &str,
        reference: &str,
        config: GovernanceTransferConfig,
    ) -> Result<()> {
        let now = unix_nanos(&self.time.now());
        let mut transfer = GovernanceTransfer {
            id: id.to_string(),
            reference: reference.to_string(),
            status: TransferStatus::Pending,
            timestamp: now,
            config,
        };

        match transfer.config.kind.clone() {
            GovernanceTransferKind::OneOff { deliver_on } => match deliver_on.filter(|at| *at > now) {
                None => match self.process_governance_transfer(assets, &transfer, self.current_epoch) {
                    Ok(amount) => {
                        transfer.status = TransferStatus::Done;
                        self.publish_governance_transfer(transfer, amount, None);
                        Ok(())
                    }
                    Err(e) => {
                        warn!(transfer_id = id, error = %e, "Governance transfer rejected");
                        transfer.status = TransferStatus::Rejected;
                        self.publish_governance_transfer(transfer, 0, Some(e.to_string()));
                        Err(e)
                    }
                },
                Some(at) => {
                    info!(transfer_id = id, deliver_on = at, "Governance transfer scheduled");
                    self.scheduled_gov_transfers
                        .entry(at)
                        .or_default()
                        .push(transfer.clone());
                    self.publish_governance_transfer(transfer, 0, None);
                    Ok(())
                }
            },
            GovernanceTransferKind::Recurring {
                dispatch_strategy, ..
            } => {
                if let Some(strategy) = &dispatch_strategy {
                    self.register_dispatch_strategy(strategy)?;
                }
                info!(
                    transfer_id = id,
                    start_epoch = transfer.start_epoch(),
                    end_epoch = ?transfer.end_epoch(),
                    "Recurring governance transfer enacted"
                );
                self.recurring_gov_transfers
                    .insert(transfer.id.clone(), transfer.clone());
                self.publish_governance_transfer(transfer, 0, None);
                Ok(())
            }
        }
    }

    /// Amount payable from the source pool, after every cap.
    #[allow(clippy::too_many_arguments)]
    pub fn calculate_governance_transfer_amount(
        &self,
        assets: &AssetRegistry,
        asset: &str,
        source: &str,
        source_type: AccountType,
        fraction_of_balance: &BigDecimal,
        max_amount: u128,
        transfer_type: GovernanceTransferType,
    ) -> Result<u128> {
        let quantum = assets
            .get(asset)
            .map_err(SettlementError::invalid_transfer_asset)?
            .quantum();
        let balance = self
            .ledger
            .get_system_account_balance(asset, source, source_type)?;

        let requested = mul_amount(balance, fraction_of_balance).min(max_amount);
        let network_cap = mul_amount(quantum, &self.governance_transfer_max_amount)
            .min(mul_amount(balance, &self.governance_transfer_max_fraction));
        let amount = requested.min(network_cap);

        if transfer_type == GovernanceTransferType::AllOrNothing && amount != requested {
            return Err(SettlementError::AllOrNothingAmountMismatch);
        }
        Ok(amount)
    }

    /// Move the capped amount. Returns the amount paid; zero pays nothing.
    fn process_governance_transfer(
        &self,
        assets: &AssetRegistry,
        transfer: &GovernanceTransfer,
        epoch: u64,
    ) -> Result<u128> {
        let config = &transfer.config;
        let amount = self.calculate_governance_transfer_amount(
            assets,
            &config.asset,
            &config.source,
            config.source_type,
            &config.fraction_of_balance,
            config.max_amount,
            config.transfer_type,
        )?;
        if amount == 0 {
            return Ok(0);
        }

        let (instructions, paid_markets) = match transfer.dispatch_strategy() {
            Some(strategy) => self.dispatch_instructions(
                strategy,
                &Payout {
                    funder: SYSTEM_OWNER,
                    funder_account_type: config.source_type,
                    funder_market: &config.source,
                    to_account_type: config.destination_type,
                    asset: &config.asset,
                    amount,
                    reference: &transfer.reference,
                },
            )?,
            None => {
                let mut instructions = Instructions::default();
                instructions.pair(
                    leg(
                        SYSTEM_OWNER,
                        &config.asset,
                        amount,
                        TransferType::GovernanceTransfer,
                        &config.source,
                    ),
                    config.source_type,
                    leg(
                        credit_owner(&config.destination, config.destination_type),
                        &config.asset,
                        amount,
                        TransferType::GovernanceTransfer,
                        "",
                    ),
                    config.destination_type,
                    &transfer.reference,
                );
                (instructions, Vec::new())
            }
        };
        if instructions.is_empty() {
            return Ok(0);
        }

        let paid = instructions.total_credited();
        let movements = self.ledger.governance_transfer_funds(
            &instructions.transfers,
            &instructions.account_types,
            &instructions.references,
        )?;
        if let Some(strategy) = transfer.dispatch_strategy() {
            // pools funded by governance have no funder party
            self.mark_paid_proposers(strategy, &config.asset, "", &paid_markets);
        }
        self.broker.send(Event::LedgerMovements { movements });
        info!(
            transfer_id = %transfer.id,
            asset = %config.asset,
            amount = paid,
            epoch,
            "Governance transfer executed"
        );
        Ok(paid)
    }

    fn publish_governance_transfer(
        &self,
        transfer: GovernanceTransfer,
        amount: u128,
        reason: Option<String>,
    ) {
        metrics::record_transfer("governance", transfer.status.as_str());
        self.broker.send(Event::GovernanceTransferFunds {
            transfer,
            amount,
            reason,
        });
    }

    // ========================================================================
    // Scheduled & Recurring
    // ========================================================================

    pub(super) fn deliver_scheduled_governance_transfers(
        &mut self,
        assets: &AssetRegistry,
        now: DateTime<Utc>,
    ) {
        let now = unix_nanos(&now);
        let due: Vec<i64> = self
            .scheduled_gov_transfers
            .range(..=now)
            .map(|(at, _)| *at)
            .collect();

        for at in due {
            let Some(transfers) = self.scheduled_gov_transfers.remove(&at) else {
                continue;
            };
            for mut transfer in transfers {
                match self.process_governance_transfer(assets, &transfer, self.current_epoch) {
                    Ok(amount) => {
                        transfer.status = TransferStatus::Done;
                        self.publish_governance_transfer(transfer, amount, None);
                    }
                    Err(e) => {
                        warn!(transfer_id = %transfer.id, error = %e, "Scheduled governance transfer stopped");
                        transfer.status = TransferStatus::Stopped;
                        self.publish_governance_transfer(transfer, 0, Some(e.to_string()));
                    }
                }
            }
        }
    }

    pub(super) fn distribute_recurring_governance_transfers(
        &mut self,
        assets: &AssetRegistry,
        epoch: u64,
    ) {
        let due: Vec<GovernanceTransfer> = self
            .recurring_gov_transfers
            .values()
            .filter(|t| epoch >= t.start_epoch())
            .cloned()
            .collect();

        for transfer in due {
            let outcome = self.process_governance_transfer(assets, &transfer, epoch);
            let (status, amount, reason) = match outcome {
                Ok(amount) if transfer.end_epoch() == Some(epoch) => (TransferStatus::Done, amount, None),
                Ok(amount) => {
                    if amount > 0 {
                        self.broker.send(Event::GovernanceTransferFunds {
                            transfer: transfer.clone(),
                            amount,
                            reason: None,
                        });
                    }
                    continue;
                }
                Err(e) => {
                    warn!(transfer_id = %transfer.id, epoch, error = %e, "Stopping recurring governance transfer");
                    (TransferStatus::Stopped, 0, Some(e.to_string()))
                }
            };

            if let Some(mut finished) = self.recurring_gov_transfers.remove(&transfer.id) {
                self.unregister_dispatch_strategy(finished.dispatch_strategy());
                finished.status = status;
                self.publish_governance_transfer(finished, amount, reason);
            }
        }
    }
}
