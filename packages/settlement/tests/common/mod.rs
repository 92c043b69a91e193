//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, TimeZone, Utc};
use num_traits::One;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use settlement::assets::{AssetDetails, AssetRegistry, AssetSource, GenesisAsset};
use settlement::banking::{self, Collaborators};
use settlement::config::{BankingConfig, NetworkParameters};
use settlement::interfaces::{
    ActivityStreak, BridgeEvent, BridgeView, Broker, CheckCallback, Ledger,
    MarketActivityTracker, NodeSignature, Notary, Parties, SignatureKind, Signer, TimeService,
    Topology, Witness, WitnessResource,
};
use settlement::service::Engines;
use settlement::types::{
    Account, AccountType, DispatchStrategy, Epoch, LedgerMovement, MarketContributionScore,
    PartyContributionScore, PartyId, Transfer,
};
use settlement::{vesting, Asset, Event, Result, SettlementError};

pub const PRIMARY_CHAIN: &str = "1";
pub const SECONDARY_CHAIN: &str = "56";

// ============================================================================
// Ledger
// ============================================================================

#[derive(Default)]
pub struct LedgerState {
    pub general: BTreeMap<(String, String), u128>,
    pub vested: BTreeMap<(String, String), u128>,
    /// (asset, market, account type) -> balance
    pub system: BTreeMap<(String, String, AccountType), u128>,
    pub transfers: Vec<Vec<Transfer>>,
    pub fee_transfers: Vec<Vec<Transfer>>,
    pub governance_transfers: Vec<Vec<Transfer>>,
    pub vested_transfers: Vec<Vec<Transfer>>,
    pub deposits: Vec<(String, String, u128)>,
    pub withdrawals: Vec<(String, String, u128)>,
    pub enabled_assets: Vec<String>,
    pub updated_assets: Vec<String>,
    pub vesting_quantum: BTreeMap<String, u128>,
}

#[derive(Default)]
pub struct MockLedger {
    pub state: Mutex<LedgerState>,
    pub fail_vested: AtomicBool,
}

impl MockLedger {
    pub fn set_general(&self, party: &str, asset: &str, balance: u128) {
        self.state
            .lock()
            .unwrap()
            .general
            .insert((party.to_string(), asset.to_string()), balance);
    }

    pub fn general(&self, party: &str, asset: &str) -> u128 {
        self.state
            .lock()
            .unwrap()
            .general
            .get(&(party.to_string(), asset.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_system(&self, asset: &str, market: &str, account_type: AccountType, balance: u128) {
        self.state
            .lock()
            .unwrap()
            .system
            .insert((asset.to_string(), market.to_string(), account_type), balance);
    }

    pub fn system(&self, asset: &str, market: &str, account_type: AccountType) -> u128 {
        self.state
            .lock()
            .unwrap()
            .system
            .get(&(asset.to_string(), market.to_string(), account_type))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_vested(&self, party: &str, asset: &str, balance: u128) {
        self.state
            .lock()
            .unwrap()
            .vested
            .insert((party.to_string(), asset.to_string()), balance);
    }

    pub fn vested(&self, party: &str, asset: &str) -> u128 {
        self.state
            .lock()
            .unwrap()
            .vested
            .get(&(party.to_string(), asset.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_vesting_quantum(&self, party: &str, balance: u128) {
        self.state
            .lock()
            .unwrap()
            .vesting_quantum
            .insert(party.to_string(), balance);
    }

    pub fn deposit_count(&self) -> usize {
        self.state.lock().unwrap().deposits.len()
    }

    fn debit(
        state: &mut LedgerState,
        leg: &Transfer,
        account_type: AccountType,
    ) -> Result<()> {
        let balance = match account_type {
            AccountType::General => state
                .general
                .entry((leg.owner.clone(), leg.asset.clone()))
                .or_default(),
            AccountType::VestedRewards => state
                .vested
                .entry((leg.owner.clone(), leg.asset.clone()))
                .or_default(),
            other => state
                .system
                .entry((leg.asset.clone(), leg.market.clone(), other))
                .or_default(),
        };
        if *balance < leg.amount {
            return Err(SettlementError::Ledger("insufficient balance".to_string()));
        }
        *balance -= leg.amount;
        Ok(())
    }

    fn credit(state: &mut LedgerState, leg: &Transfer, account_type: AccountType) {
        let balance = match account_type {
            AccountType::General => state
                .general
                .entry((leg.owner.clone(), leg.asset.clone()))
                .or_default(),
            other => state
                .system
                .entry((leg.asset.clone(), leg.market.clone(), other))
                .or_default(),
        };
        *balance += leg.amount;
    }

    fn apply_pairs(
        state: &mut LedgerState,
        transfers: &[Transfer],
        account_types: &[AccountType],
    ) -> Result<Vec<LedgerMovement>> {
        let mut movements = Vec::new();
        for (pair, types) in transfers.chunks(2).zip(account_types.chunks(2)) {
            Self::debit(state, &pair[0], types[0])?;
            Self::credit(state, &pair[1], types[1]);
            movements.push(LedgerMovement::default());
        }
        Ok(movements)
    }
}

impl Ledger for MockLedger {
    fn deposit(&self, party: &str, asset: &str, amount: u128) -> Result<LedgerMovement> {
        let mut state = self.state.lock().unwrap();
        *state
            .general
            .entry((party.to_string(), asset.to_string()))
            .or_default() += amount;
        state
            .deposits
            .push((party.to_string(), asset.to_string(), amount));
        Ok(LedgerMovement::default())
    }

    fn withdraw(&self, party: &str, asset: &str, amount: u128) -> Result<LedgerMovement> {
        let mut state = self.state.lock().unwrap();
        let balance = state
            .general
            .entry((party.to_string(), asset.to_string()))
            .or_default();
        if *balance < amount {
            return Err(SettlementError::Ledger("insufficient balance".to_string()));
        }
        *balance -= amount;
        state
            .withdrawals
            .push((party.to_string(), asset.to_string(), amount));
        Ok(LedgerMovement::default())
    }

    fn enable_asset(&self, asset: &Asset) -> Result<()> {
        use settlement::assets::AssetKind;
        self.state
            .lock()
            .unwrap()
            .enabled_assets
            .push(asset.id().to_string());
        Ok(())
    }

    fn propagate_asset_update(&self, asset: &Asset) -> Result<()> {
        use settlement::assets::AssetKind;
        self.state
            .lock()
            .unwrap()
            .updated_assets
            .push(asset.id().to_string());
        Ok(())
    }

    fn get_party_general_account(&self, party: &str, asset: &str) -> Result<Account> {
        Ok(Account {
            owner: party.to_string(),
            asset: asset.to_string(),
            account_type: AccountType::General,
            balance: self.general(party, asset),
        })
    }

    fn get_party_vested_reward_account(&self, party: &str, asset: &str) -> Result<Account> {
        Ok(Account {
            owner: party.to_string(),
            asset: asset.to_string(),
            account_type: AccountType::VestedRewards,
            balance: self.vested(party, asset),
        })
    }

    fn transfer_funds(
        &self,
        transfers: &[Transfer],
        account_types: &[AccountType],
        _references: &[String],
        fee_transfers: &[Transfer],
        fee_account_types: &[AccountType],
    ) -> Result<Vec<LedgerMovement>> {
        let mut state = self.state.lock().unwrap();
        let movements = Self::apply_pairs(&mut state, transfers, account_types)?;
        for (fee, account_type) in fee_transfers.iter().zip(fee_account_types) {
            Self::debit(&mut state, fee, *account_type)?;
        }
        state.transfers.push(transfers.to_vec());
        state.fee_transfers.push(fee_transfers.to_vec());
        Ok(movements)
    }

    fn governance_transfer_funds(
        &self,
        transfers: &[Transfer],
        account_types: &[AccountType],
        _references: &[String],
    ) -> Result<Vec<LedgerMovement>> {
        let mut state = self.state.lock().unwrap();
        let movements = Self::apply_pairs(&mut state, transfers, account_types)?;
        state.governance_transfers.push(transfers.to_vec());
        Ok(movements)
    }

    fn get_system_account_balance(
        &self,
        asset: &str,
        market: &str,
        account_type: AccountType,
    ) -> Result<u128> {
        Ok(self.system(asset, market, account_type))
    }

    fn transfer_vested_rewards(&self, transfers: &[Transfer]) -> Result<Vec<LedgerMovement>> {
        if self.fail_vested.load(Ordering::SeqCst) {
            return Err(SettlementError::Ledger("vesting account missing".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        for t in transfers {
            *state
                .vested
                .entry((t.owner.clone(), t.asset.clone()))
                .or_default() += t.amount;
        }
        state.vested_transfers.push(transfers.to_vec());
        Ok(vec![LedgerMovement::default()])
    }

    fn get_all_vesting_quantum_balance(&self, party: &str) -> u128 {
        self.state
            .lock()
            .unwrap()
            .vesting_quantum
            .get(party)
            .copied()
            .unwrap_or(0)
    }
}

// ============================================================================
// Witness
// ============================================================================

#[derive(Default)]
pub struct MockWitness {
    checks: Mutex<Vec<(Arc<dyn WitnessResource>, CheckCallback)>>,
    pub restored: Mutex<Vec<String>>,
}

impl MockWitness {
    pub fn pending(&self) -> Vec<String> {
        self.checks
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| r.id().to_string())
            .collect()
    }

    /// Deliver the verdict on one resource.
    pub fn resolve(&self, id: &str, valid: bool) {
        let mut checks = self.checks.lock().unwrap();
        if let Some(pos) = checks.iter().position(|(r, _)| r.id() == id) {
            let (_, callback) = checks.remove(pos);
            callback(valid);
        }
    }

    /// Run every resource's own check and deliver the verdicts.
    pub fn check_all(&self) {
        let checks = std::mem::take(&mut *self.checks.lock().unwrap());
        for (resource, callback) in checks {
            callback(resource.check().is_ok());
        }
    }
}

impl Witness for MockWitness {
    fn start_check(
        &self,
        resource: Arc<dyn WitnessResource>,
        callback: CheckCallback,
        _deadline: DateTime<Utc>,
    ) -> Result<()> {
        self.checks.lock().unwrap().push((resource, callback));
        Ok(())
    }

    fn restore_resource(
        &self,
        resource: Arc<dyn WitnessResource>,
        callback: CheckCallback,
    ) -> Result<()> {
        self.restored
            .lock()
            .unwrap()
            .push(resource.id().to_string());
        self.checks.lock().unwrap().push((resource, callback));
        Ok(())
    }
}

// ============================================================================
// Notary, Signer, Topology
// ============================================================================

#[derive(Default)]
pub struct MockNotary {
    pub aggregates: Mutex<Vec<(String, Vec<u8>)>>,
    pub signed: Mutex<BTreeSet<String>>,
    pub offered: Mutex<Vec<String>>,
}

impl MockNotary {
    pub fn sign(&self, id: &str) {
        self.signed.lock().unwrap().insert(id.to_string());
    }
}

impl Notary for MockNotary {
    fn start_aggregate(&self, resource_id: &str, _kind: SignatureKind, signature: Vec<u8>) {
        self.aggregates
            .lock()
            .unwrap()
            .push((resource_id.to_string(), signature));
    }

    fn is_signed(&self, resource_id: &str, kind: SignatureKind) -> Option<Vec<NodeSignature>> {
        if self.signed.lock().unwrap().contains(resource_id) {
            Some(vec![NodeSignature {
                id: resource_id.to_string(),
                kind,
                sig: vec![1],
            }])
        } else {
            None
        }
    }

    fn offer_signatures(&self, _kind: SignatureKind, supplier: &dyn Fn(&str) -> Option<Vec<u8>>) {
        let pending: Vec<String> = self
            .aggregates
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        for id in pending {
            if supplier(&id).is_some() {
                self.offered.lock().unwrap().push(id);
            }
        }
    }
}

pub struct MockSigner;

impl Signer for MockSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(message[..4].to_vec())
    }
}

pub struct MockTopology(pub bool);

impl Topology for MockTopology {
    fn is_validator(&self) -> bool {
        self.0
    }
}

// ============================================================================
// Broker & Time
// ============================================================================

#[derive(Default)]
pub struct MockBroker {
    events: Mutex<Vec<Event>>,
}

impl MockBroker {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Broker for MockBroker {
    fn send(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn send_batch(&self, events: Vec<Event>) {
        self.events.lock().unwrap().extend(events);
    }
}

pub struct MockTime(Mutex<DateTime<Utc>>);

impl Default for MockTime {
    fn default() -> Self {
        Self(Mutex::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()))
    }
}

impl MockTime {
    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now = *now + by;
    }
}

impl TimeService for MockTime {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

// ============================================================================
// Bridge View
// ============================================================================

#[derive(Default)]
pub struct MockBridge {
    pub known_assets: Mutex<Vec<String>>,
    pub reject_events: AtomicBool,
}

impl BridgeView for MockBridge {
    fn find_asset(&self, contract_address: &str) -> Result<()> {
        if self
            .known_assets
            .lock()
            .unwrap()
            .iter()
            .any(|a| a.eq_ignore_ascii_case(contract_address))
        {
            Ok(())
        } else {
            Err(SettlementError::BridgeView("asset not listed".to_string()))
        }
    }

    fn find_event(&self, _event: &BridgeEvent<'_>) -> Result<()> {
        if self.reject_events.load(Ordering::SeqCst) {
            Err(SettlementError::BridgeView("event not found".to_string()))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Market Activity, Streak, Parties
// ============================================================================

#[derive(Default)]
pub struct MockTracker {
    pub market_scores: Mutex<Vec<MarketContributionScore>>,
    pub individual_scores: Mutex<Vec<PartyContributionScore>>,
    pub untracked: Mutex<BTreeSet<String>>,
    pub paid_proposers: Mutex<Vec<(String, String)>>,
}

impl MarketActivityTracker for MockTracker {
    fn calculate_metric_for_individuals(&self, _ds: &DispatchStrategy) -> Vec<PartyContributionScore> {
        self.individual_scores.lock().unwrap().clone()
    }

    fn markets_with_eligible_proposer(
        &self,
        _asset_for_metric: &str,
        _markets: &[String],
        _payout_asset: &str,
        _funder: &str,
    ) -> Vec<MarketContributionScore> {
        self.market_scores.lock().unwrap().clone()
    }

    fn mark_paid_proposer(
        &self,
        _asset_for_metric: &str,
        market: &str,
        payout_asset: &str,
        _markets: &[String],
        _funder: &str,
    ) {
        self.paid_proposers
            .lock()
            .unwrap()
            .push((market.to_string(), payout_asset.to_string()));
    }

    fn market_tracked_for_asset(&self, market: &str, _asset: &str) -> bool {
        !self.untracked.lock().unwrap().contains(market)
    }
}

pub struct MockStreak(pub Mutex<BigDecimal>);

impl Default for MockStreak {
    fn default() -> Self {
        Self(Mutex::new(BigDecimal::one()))
    }
}

impl ActivityStreak for MockStreak {
    fn reward_vesting_multiplier(&self, _party: &str) -> BigDecimal {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct MockParties(pub Mutex<BTreeMap<String, Vec<PartyId>>>);

impl MockParties {
    pub fn relate(&self, party: &str, keys: &[&str]) {
        self.0.lock().unwrap().insert(
            party.to_string(),
            keys.iter().map(|k| k.to_string()).collect(),
        );
    }
}

impl Parties for MockParties {
    fn related_keys(&self, party: &str) -> Vec<PartyId> {
        self.0.lock().unwrap().get(party).cloned().unwrap_or_default()
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub ledger: Arc<MockLedger>,
    pub witness: Arc<MockWitness>,
    pub notary: Arc<MockNotary>,
    pub broker: Arc<MockBroker>,
    pub time: Arc<MockTime>,
    pub tracker: Arc<MockTracker>,
    pub streak: Arc<MockStreak>,
    pub parties: Arc<MockParties>,
    pub primary_bridge: Arc<MockBridge>,
    pub secondary_bridge: Arc<MockBridge>,
    pub engines: Engines,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_params(NetworkParameters::default())
    }

    pub fn with_params(params: NetworkParameters) -> Self {
        Self::build(params, true)
    }

    pub fn non_validator() -> Self {
        Self::build(NetworkParameters::default(), false)
    }

    fn build(params: NetworkParameters, validator: bool) -> Self {
        let ledger = Arc::new(MockLedger::default());
        let witness = Arc::new(MockWitness::default());
        let notary = Arc::new(MockNotary::default());
        let broker = Arc::new(MockBroker::default());
        let time = Arc::new(MockTime::default());
        let tracker = Arc::new(MockTracker::default());
        let streak = Arc::new(MockStreak::default());
        let parties = Arc::new(MockParties::default());
        let topology = Arc::new(MockTopology(validator));

        let assets = AssetRegistry::new(topology.clone(), broker.clone());
        let cfg = BankingConfig {
            primary_chain_id: PRIMARY_CHAIN.to_string(),
            secondary_chain_id: Some(SECONDARY_CHAIN.to_string()),
            ..BankingConfig::default()
        };
        let banking = banking::Engine::new(
            cfg,
            &params,
            Collaborators {
                ledger: ledger.clone(),
                witness: witness.clone(),
                notary: notary.clone(),
                signer: Arc::new(MockSigner),
                topology,
                broker: broker.clone(),
                time: time.clone(),
                tracker: tracker.clone(),
            },
        );
        let vesting = vesting::Engine::new(
            &params,
            ledger.clone(),
            broker.clone(),
            streak.clone(),
            parties.clone(),
        );

        let mut engines = Engines {
            assets,
            banking,
            vesting,
        };
        let primary_bridge = Arc::new(MockBridge::default());
        let secondary_bridge = Arc::new(MockBridge::default());
        engines.set_bridge_view(PRIMARY_CHAIN, primary_bridge.clone());
        engines.set_bridge_view(SECONDARY_CHAIN, secondary_bridge.clone());

        Self {
            ledger,
            witness,
            notary,
            broker,
            time,
            tracker,
            streak,
            parties,
            primary_bridge,
            secondary_bridge,
            engines,
        }
    }

    pub fn add_builtin(&mut self, id: &str, quantum: u128) {
        let mut genesis = BTreeMap::new();
        genesis.insert(
            id.to_string(),
            GenesisAsset {
                details: details(id, quantum),
                source: AssetSource::Builtin {
                    max_faucet_amount_mint: 1_000_000,
                },
            },
        );
        self.engines.assets.load_genesis(genesis).unwrap();
    }

    pub fn add_erc20(&mut self, id: &str, chain_id: &str, address: &str, quantum: u128) {
        let mut genesis = BTreeMap::new();
        genesis.insert(
            id.to_string(),
            GenesisAsset {
                details: details(id, quantum),
                source: AssetSource::Erc20 {
                    chain_id: chain_id.to_string(),
                    contract_address: address.to_string(),
                    lifetime_limit: 1_000_000,
                    withdraw_threshold: 1_000,
                },
            },
        );
        self.engines.assets.load_genesis(genesis).unwrap();
    }

    pub fn tick(&mut self) {
        let now = self.time.now();
        self.engines.on_tick(now);
    }

    pub fn start_epoch(&mut self, seq: u64) {
        self.engines.on_epoch(Epoch::start(seq));
    }

    pub fn end_epoch(&mut self, seq: u64) {
        self.engines.on_epoch(Epoch::end(seq));
    }

    /// Start and end `seq`.
    pub fn run_epoch(&mut self, seq: u64) {
        self.start_epoch(seq);
        self.end_epoch(seq);
    }
}

pub fn details(symbol: &str, quantum: u128) -> AssetDetails {
    AssetDetails {
        name: symbol.to_lowercase(),
        symbol: symbol.to_string(),
        decimals: 18,
        quantum,
    }
}
