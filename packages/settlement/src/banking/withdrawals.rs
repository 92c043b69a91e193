//! Withdrawals
//!
//! Funds leave the general account as soon as the withdrawal is accepted.
//! ERC20 withdrawals then wait for validator signatures and for the bridge to
//! report the payout.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::Engine;
use crate::assets::{Asset, AssetKind, AssetRegistry};
use crate::error::{Result, SettlementError};
use crate::events::Event;
use crate::interfaces::SignatureKind;
use crate::metrics;
use crate::num::mul_amount;
use crate::types::{unix_nanos, Erc20WithdrawExt, Withdrawal, WithdrawalStatus};

impl Engine {
    pub fn withdraw_builtin(
        &mut self,
        assets: &AssetRegistry,
        id: &str,
        party: &str,
        asset_id: &str,
        amount: u128,
    ) -> Result<()> {
        let asset = assets.get(asset_id)?;
        if !asset.is_builtin() {
            return Err(SettlementError::WrongAssetTypeUsedInBuiltinAssetChainEvent);
        }
        let chain_id = self.cfg.primary_chain_id.clone();
        self.check_withdrawal(&chain_id, asset, amount)?;

        let mut withdrawal = self.new_withdrawal(id, party, asset_id, amount, None);
        self.debit_withdrawal(&mut withdrawal)?;
        withdrawal.status = WithdrawalStatus::Finalized;
        withdrawal.withdrawn_timestamp = withdrawal.created_timestamp;
        info!(withdrawal_id = %id, party, asset = asset_id, amount = %amount, "Builtin withdrawal finalized");
        self.store_withdrawal(withdrawal);
        Ok(())
    }

    /// Lock funds for an ERC20 withdrawal and start collecting signatures.
    pub fn withdraw_erc20(
        &mut self,
        assets: &AssetRegistry,
        id: &str,
        party: &str,
        asset_id: &str,
        amount: u128,
        receiver_address: &str,
    ) -> Result<()> {
        let asset = assets.get(asset_id)?;
        let erc20 = asset
            .as_erc20()
            .ok_or(SettlementError::WrongAssetUsedForErc20Withdraw)?;
        let chain_id = erc20.chain_id.clone();
        self.check_withdrawal(&chain_id, asset, amount)?;

        let mut withdrawal = self.new_withdrawal(
            id,
            party,
            asset_id,
            amount,
            Some(Erc20WithdrawExt {
                receiver_address: receiver_address.to_string(),
            }),
        );
        self.debit_withdrawal(&mut withdrawal)?;

        let signature = if self.topology.is_validator() {
            let message = withdrawal_message(asset, &withdrawal)?;
            self.sign_or_abort(&withdrawal.id, &message)
        } else {
            Vec::new()
        };
        self.notary
            .start_aggregate(&withdrawal.id, SignatureKind::AssetWithdrawal, signature);

        info!(
            withdrawal_id = %id,
            party,
            asset = asset_id,
            amount = %amount,
            reference = %withdrawal.reference,
            "ERC20 withdrawal opened"
        );
        self.store_withdrawal(withdrawal);
        Ok(())
    }

    fn check_withdrawal(&self, chain_id: &str, asset: &Asset, amount: u128) -> Result<()> {
        if self.is_bridge_stopped(chain_id) {
            warn!(chain_id, asset_id = %asset.id(), "Withdrawal refused, bridge is stopped");
            metrics::record_withdrawal_bridge_stopped(chain_id);
            return Err(SettlementError::BridgeStopped);
        }
        let minimum = mul_amount(asset.quantum(), &self.min_withdraw_quantum_multiple);
        if amount < minimum {
            return Err(SettlementError::WithdrawalAmountUnderMinimal { minimum });
        }
        Ok(())
    }

    fn new_withdrawal(
        &mut self,
        id: &str,
        party: &str,
        asset: &str,
        amount: u128,
        ext: Option<Erc20WithdrawExt>,
    ) -> Withdrawal {
        let now = self.time.now();
        let reference = self
            .withdrawal_count
            .saturating_add(now.timestamp().max(0) as u128);
        self.withdrawal_count += 1;
        Withdrawal {
            id: id.to_string(),
            party_id: party.to_string(),
            asset: asset.to_string(),
            amount,
            status: WithdrawalStatus::Open,
            reference,
            tx_hash: String::new(),
            created_timestamp: unix_nanos(&now),
            withdrawn_timestamp: 0,
            ext,
        }
    }

    /// Take the funds from the party. A ledger refusal rejects the withdrawal.
    fn debit_withdrawal(&mut self, withdrawal: &mut Withdrawal) -> Result<()> {
        match self
            .ledger
            .withdraw(&withdrawal.party_id, &withdrawal.asset, withdrawal.amount)
        {
            Ok(movement) => {
                self.broker.send(Event::LedgerMovements {
                    movements: vec![movement],
                });
                Ok(())
            }
            Err(e) => {
                withdrawal.status = WithdrawalStatus::Rejected;
                warn!(withdrawal_id = %withdrawal.id, error = %e, "Withdrawal rejected");
                self.store_withdrawal(withdrawal.clone());
                Err(e)
            }
        }
    }

    fn store_withdrawal(&mut self, withdrawal: Withdrawal) {
        self.broker.send(Event::WithdrawalUpdated {
            withdrawal: withdrawal.clone(),
        });
        self.withdrawal_refs
            .insert(withdrawal.reference, withdrawal.id.clone());
        self.withdrawals.insert(withdrawal.id.clone(), withdrawal);
    }

    /// The bridge paid out the withdrawal with this reference.
    pub(super) fn finalize_withdrawal(
        &mut self,
        reference: u128,
        tx_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let id = self
            .withdrawal_refs
            .get(&reference)
            .cloned()
            .ok_or(SettlementError::NotMatchingWithdrawalForReference)?;
        let withdrawal = self
            .withdrawals
            .get_mut(&id)
            .ok_or(SettlementError::NotMatchingWithdrawalForReference)?;
        if withdrawal.status != WithdrawalStatus::Open {
            return Err(SettlementError::InvalidWithdrawalState);
        }
        withdrawal.status = WithdrawalStatus::Finalized;
        withdrawal.tx_hash = tx_hash.to_string();
        withdrawal.withdrawn_timestamp = unix_nanos(&now);
        info!(withdrawal_id = %id, reference = %reference, tx_hash, "Withdrawal finalized");
        let event = Event::WithdrawalUpdated {
            withdrawal: withdrawal.clone(),
        };
        self.broker.send(event);
        Ok(())
    }

    pub fn get_withdrawal(&self, id: &str) -> Result<&Withdrawal> {
        self.withdrawals
            .get(id)
            .ok_or_else(|| SettlementError::WithdrawalNotFound { id: id.to_string() })
    }

    pub fn get_withdrawal_from_ref(&self, reference: u128) -> Result<&Withdrawal> {
        self.withdrawal_refs
            .get(&reference)
            .and_then(|id| self.withdrawals.get(id))
            .ok_or(SettlementError::NotMatchingWithdrawalForReference)
    }

    /// Re-sign every open withdrawal the notary still waits for.
    pub(super) fn offer_withdrawal_signatures(&self, assets: &AssetRegistry) {
        let notary = self.notary.clone();
        notary.offer_signatures(SignatureKind::AssetWithdrawal, &|resource_id: &str| {
            self.withdrawal_signature(assets, resource_id)
        });
    }

    fn withdrawal_signature(&self, assets: &AssetRegistry, withdrawal_id: &str) -> Option<Vec<u8>> {
        if !self.topology.is_validator() {
            return None;
        }
        let withdrawal = self.withdrawals.get(withdrawal_id)?;
        if withdrawal.status != WithdrawalStatus::Open {
            return None;
        }
        let asset = assets.get(&withdrawal.asset).ok()?;
        let message = withdrawal_message(asset, withdrawal).ok()?;
        Some(self.sign_or_abort(withdrawal_id, &message))
    }

    /// A validator that cannot sign would stall the bridge for everyone.
    fn sign_or_abort(&self, withdrawal_id: &str, message: &[u8]) -> Vec<u8> {
        match self.signer.sign(message) {
            Ok(signature) => signature,
            Err(e) => {
                error!(withdrawal_id, error = %e, "Unable to sign withdrawal");
                panic!("couldn't sign withdrawal {}: {}", withdrawal_id, e);
            }
        }
    }
}

fn withdrawal_message(asset: &Asset, withdrawal: &Withdrawal) -> Result<[u8; 32]> {
    let receiver = withdrawal
        .ext
        .as_ref()
        .map(|ext| ext.receiver_address.as_str())
        .ok_or(SettlementError::WrongAssetUsedForErc20Withdraw)?;
    asset.withdrawal_message(
        withdrawal.amount,
        receiver,
        withdrawal.created_timestamp / 1_000_000_000,
        withdrawal.reference,
    )
}
