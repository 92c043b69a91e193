use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::Engine;
use crate::error::{Result, SettlementError};
use crate::events::Event;
use crate::types::{unix_nanos, Deposit, DepositStatus};

impl Engine {
    pub(super) fn new_deposit(
        &self,
        id: &str,
        party: &str,
        asset: &str,
        amount: u128,
        tx_hash: &str,
    ) -> Deposit {
        Deposit {
            id: id.to_string(),
            status: DepositStatus::Open,
            party_id: party.to_string(),
            asset: asset.to_string(),
            amount,
            tx_hash: tx_hash.to_string(),
            created_timestamp: unix_nanos(&self.time.now()),
            credit_date: 0,
        }
    }

    pub(super) fn open_deposit(&mut self, deposit: Deposit) {
        self.broker.send(Event::DepositUpdated {
            deposit: deposit.clone(),
        });
        self.deposits.insert(deposit.id.clone(), deposit);
    }

    /// Credit the party. The deposit is forgotten whatever the outcome.
    pub(super) fn finalize_deposit(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut deposit = self
            .deposits
            .remove(id)
            .ok_or_else(|| SettlementError::DepositNotFound { id: id.to_string() })?;

        let result = self
            .ledger
            .deposit(&deposit.party_id, &deposit.asset, deposit.amount);
        match result {
            Ok(movement) => {
                deposit.status = DepositStatus::Finalized;
                deposit.credit_date = unix_nanos(&now);
                info!(
                    deposit_id = %deposit.id,
                    party = %deposit.party_id,
                    asset = %deposit.asset,
                    amount = %deposit.amount,
                    "Deposit finalized"
                );
                self.broker.send(Event::LedgerMovements {
                    movements: vec![movement],
                });
                self.broker.send(Event::DepositUpdated { deposit });
                Ok(())
            }
            Err(e) => {
                deposit.status = DepositStatus::Cancelled;
                warn!(deposit_id = %deposit.id, error = %e, "Deposit cancelled");
                self.broker.send(Event::DepositUpdated { deposit });
                Err(e)
            }
        }
    }

    pub fn get_deposit(&self, id: &str) -> Option<&Deposit> {
        self.deposits.get(id)
    }
}
