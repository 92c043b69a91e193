//! Asset action integration tests.
//!
//! Covers the bridge-facing half of the banking engine:
//! - Builtin and ERC20 deposits gated by the witness
//! - Chain event dedup, including references seen before they carried a chain id
//! - Bridge stop/resume ordering and its effect on withdrawals
//! - Asset listing and staged limit updates
//! - ERC20 withdrawal signatures and finalization

mod common;

use borsh::BorshSerialize;
use std::sync::atomic::Ordering;

use common::{details, Harness, PRIMARY_CHAIN, SECONDARY_CHAIN};
use settlement::assets::{AssetKind, AssetSource};
use settlement::banking::{Erc20Deposit, SEEN_KEY};
use settlement::hash::{ChainEventRef, ASSET_CLASS_ERC20};
use settlement::types::{DepositStatus, WithdrawalStatus};
use settlement::{Asset, Event, SettlementError, StateProvider};

const USDC_ADDRESS: &str = "0x2791bca1f2de4661ed88a30c99a7a9449aa84174";
const BUSD_ADDRESS: &str = "0xe9e7cea3dedca5984780bafc599bd69add087d56";

fn setup() -> Harness {
    let mut h = Harness::new();
    h.add_builtin("vote", 10);
    h.add_erc20("usdc", PRIMARY_CHAIN, USDC_ADDRESS, 1);
    h.add_erc20("busd", SECONDARY_CHAIN, BUSD_ADDRESS, 1);
    h
}

fn usdc_deposit(party: &str, amount: u128) -> Erc20Deposit {
    Erc20Deposit {
        party_id: party.to_string(),
        asset_id: "usdc".to_string(),
        source_address: USDC_ADDRESS.to_string(),
        amount,
    }
}

fn deposit_usdc(h: &mut Harness, id: &str, amount: u128, block: u64, log_index: u64) {
    h.engines
        .banking
        .deposit_erc20(
            &h.engines.assets,
            id,
            &usdc_deposit("p1", amount),
            block,
            log_index,
            "0xdeposit",
            PRIMARY_CHAIN,
        )
        .unwrap();
}

// ============================================================================
// Deposits
// ============================================================================

#[test]
fn test_builtin_deposit_waits_for_witness() {
    let mut h = setup();
    h.engines
        .banking
        .deposit_builtin(&h.engines.assets, "d1", "p1", "vote", 100, 1)
        .unwrap();

    h.tick();
    assert_eq!(h.ledger.general("p1", "vote"), 0);
    assert_eq!(
        h.engines.banking.get_deposit("d1").unwrap().status,
        DepositStatus::Open
    );

    h.witness.check_all();
    h.tick();
    assert_eq!(h.ledger.general("p1", "vote"), 100);
    assert!(h.engines.banking.get_deposit("d1").is_none());
    assert!(!h.engines.banking.has_asset_action("d1"));
}

#[test]
fn test_builtin_deposit_rejects_erc20_asset() {
    let mut h = setup();
    let err = h
        .engines
        .banking
        .deposit_builtin(&h.engines.assets, "d1", "p1", "usdc", 100, 1)
        .unwrap_err();
    assert_eq!(err, SettlementError::WrongAssetTypeUsedInBuiltinAssetChainEvent);
}

#[test]
fn test_erc20_deposit_on_unknown_chain_refused() {
    let mut h = setup();
    let err = h
        .engines
        .banking
        .deposit_erc20(
            &h.engines.assets,
            "d1",
            &usdc_deposit("p1", 10),
            1,
            0,
            "0xtx",
            "99",
        )
        .unwrap_err();
    assert!(matches!(err, SettlementError::UnknownChainId { .. }));
    assert!(h.engines.banking.get_deposit("d1").is_none());
}

#[test]
fn test_duplicate_action_id_refused() {
    let mut h = setup();
    deposit_usdc(&mut h, "d1", 10, 5, 0);
    let err = h
        .engines
        .banking
        .deposit_erc20(
            &h.engines.assets,
            "d1",
            &usdc_deposit("p1", 10),
            6,
            0,
            "0xother",
            PRIMARY_CHAIN,
        )
        .unwrap_err();
    assert!(matches!(err, SettlementError::DuplicateAssetAction { .. }));
}

#[test]
fn test_same_chain_event_credited_once() {
    let mut h = setup();
    deposit_usdc(&mut h, "d1", 10, 5, 3);
    deposit_usdc(&mut h, "d2", 10, 5, 3);

    h.witness.check_all();
    h.tick();

    assert_eq!(h.ledger.general("p1", "usdc"), 10);
    assert_eq!(h.ledger.deposit_count(), 1);
    assert!(h.engines.banking.get_deposit("d1").is_none());
    // the replay is dropped without touching its deposit
    assert_eq!(
        h.engines.banking.get_deposit("d2").unwrap().status,
        DepositStatus::Open
    );
    assert_eq!(h.engines.banking.last_seen_primary_block(), 5);
}

#[test]
fn test_builtin_deposits_dedup_on_nonce() {
    let mut h = setup();
    h.engines
        .banking
        .deposit_builtin(&h.engines.assets, "d1", "p1", "vote", 100, 7)
        .unwrap();
    h.engines
        .banking
        .deposit_builtin(&h.engines.assets, "d2", "p1", "vote", 100, 7)
        .unwrap();
    h.engines
        .banking
        .deposit_builtin(&h.engines.assets, "d3", "p1", "vote", 100, 8)
        .unwrap();

    h.witness.check_all();
    h.tick();
    assert_eq!(h.ledger.general("p1", "vote"), 200);
}

#[derive(BorshSerialize)]
struct SeenSnapshot {
    seen: Vec<String>,
    last_seen_primary_block: u64,
}

#[test]
fn test_event_seen_without_chain_id_not_replayed_on_primary() {
    let mut h = setup();
    let legacy = ChainEventRef {
        chain_id: PRIMARY_CHAIN,
        asset_class: ASSET_CLASS_ERC20,
        block: 42,
        tx_hash: "0xdeposit",
        log_index: 1,
    }
    .legacy_dedup_key();
    let payload = SeenSnapshot {
        seen: vec![legacy],
        last_seen_primary_block: 42,
    }
    .try_to_vec()
    .unwrap();
    h.engines
        .banking
        .restore_state(SEEN_KEY, &payload)
        .unwrap();

    deposit_usdc(&mut h, "d1", 10, 42, 1);
    h.engines
        .banking
        .deposit_erc20(
            &h.engines.assets,
            "d2",
            &Erc20Deposit {
                party_id: "p1".to_string(),
                asset_id: "busd".to_string(),
                source_address: BUSD_ADDRESS.to_string(),
                amount: 10,
            },
            42,
            1,
            "0xdeposit",
            SECONDARY_CHAIN,
        )
        .unwrap();

    h.witness.check_all();
    h.tick();

    assert_eq!(h.ledger.general("p1", "usdc"), 0);
    assert_eq!(h.ledger.general("p1", "busd"), 10);
}

#[test]
fn test_rejected_deposit_cancelled() {
    let mut h = setup();
    deposit_usdc(&mut h, "d1", 10, 5, 0);
    h.witness.resolve("d1", false);
    h.tick();

    assert!(h.engines.banking.get_deposit("d1").is_none());
    assert_eq!(h.ledger.general("p1", "usdc"), 0);
    let cancelled = h.broker.events().into_iter().any(|e| {
        matches!(e, Event::DepositUpdated { deposit } if deposit.id == "d1" && deposit.status == DepositStatus::Cancelled)
    });
    assert!(cancelled);

    // a rejected claim does not burn the chain event
    deposit_usdc(&mut h, "d2", 10, 5, 0);
    h.witness.check_all();
    h.tick();
    assert_eq!(h.ledger.general("p1", "usdc"), 10);
}

#[test]
fn test_witness_rejects_event_missing_on_bridge() {
    let mut h = setup();
    h.primary_bridge.reject_events.store(true, Ordering::SeqCst);
    deposit_usdc(&mut h, "d1", 10, 5, 0);
    h.witness.check_all();
    h.tick();
    assert_eq!(h.ledger.general("p1", "usdc"), 0);
    assert!(h.engines.banking.get_deposit("d1").is_none());
}

// ============================================================================
// Bridge State
// ============================================================================

#[test]
fn test_bridge_state_follows_newest_event() {
    let mut h = setup();
    h.engines
        .banking
        .bridge_stopped(true, "1-stop", 10, 2, "0xstop", PRIMARY_CHAIN)
        .unwrap();
    h.engines
        .banking
        .bridge_stopped(false, "2-resume", 10, 1, "0xresume", PRIMARY_CHAIN)
        .unwrap();

    h.witness.check_all();
    h.tick();

    assert!(h.engines.banking.is_bridge_stopped(PRIMARY_CHAIN));
    assert!(!h.engines.banking.is_bridge_stopped(SECONDARY_CHAIN));
    let state = h.engines.banking.bridge_state(PRIMARY_CHAIN);
    assert_eq!((state.block, state.log_index), (10, 2));
    assert_eq!(h.broker.count("bridge_state_changed"), 1);
}

#[test]
fn test_withdrawals_refused_while_bridge_stopped() {
    let mut h = setup();
    h.ledger.set_general("p1", "usdc", 1_000);
    h.ledger.set_general("p1", "busd", 1_000);
    h.engines
        .banking
        .bridge_stopped(true, "s1", 10, 0, "0xstop", PRIMARY_CHAIN)
        .unwrap();
    h.witness.check_all();
    h.tick();

    let err = h
        .engines
        .banking
        .withdraw_erc20(&h.engines.assets, "w1", "p1", "usdc", 100, "0xreceiver")
        .unwrap_err();
    assert_eq!(err, SettlementError::BridgeStopped);
    assert_eq!(h.ledger.general("p1", "usdc"), 1_000);

    // only the stopped chain is affected
    h.engines
        .banking
        .withdraw_erc20(&h.engines.assets, "w2", "p1", "busd", 100, "0xreceiver")
        .unwrap();

    h.engines
        .banking
        .bridge_stopped(false, "r1", 11, 0, "0xresume", PRIMARY_CHAIN)
        .unwrap();
    h.witness.check_all();
    h.tick();
    h.engines
        .banking
        .withdraw_erc20(&h.engines.assets, "w3", "p1", "usdc", 100, "0xreceiver")
        .unwrap();
}

// ============================================================================
// Withdrawals
// ============================================================================

#[test]
fn test_builtin_withdrawal_minimum() {
    let mut h = setup();
    h.ledger.set_general("p1", "vote", 1_000);

    let err = h
        .engines
        .banking
        .withdraw_builtin(&h.engines.assets, "w1", "p1", "vote", 99)
        .unwrap_err();
    assert_eq!(
        err,
        SettlementError::WithdrawalAmountUnderMinimal { minimum: 100 }
    );

    h.engines
        .banking
        .withdraw_builtin(&h.engines.assets, "w2", "p1", "vote", 100)
        .unwrap();
    assert_eq!(h.ledger.general("p1", "vote"), 900);
    assert_eq!(
        h.engines.banking.get_withdrawal("w2").unwrap().status,
        WithdrawalStatus::Finalized
    );
}

#[test]
fn test_withdrawal_without_funds_rejected() {
    let mut h = setup();
    let err = h
        .engines
        .banking
        .withdraw_erc20(&h.engines.assets, "w1", "p1", "usdc", 100, "0xreceiver")
        .unwrap_err();
    assert!(matches!(err, SettlementError::Ledger(_)));
    assert_eq!(
        h.engines.banking.get_withdrawal("w1").unwrap().status,
        WithdrawalStatus::Rejected
    );
    assert!(h.notary.aggregates.lock().unwrap().is_empty());
}

#[test]
fn test_erc20_withdrawal_lifecycle() {
    let mut h = setup();
    h.ledger.set_general("p1", "usdc", 1_000);

    h.engines
        .banking
        .withdraw_erc20(&h.engines.assets, "w1", "p1", "usdc", 500, "0xreceiver")
        .unwrap();
    assert_eq!(h.ledger.general("p1", "usdc"), 500);

    let withdrawal = h.engines.banking.get_withdrawal("w1").unwrap().clone();
    assert_eq!(withdrawal.status, WithdrawalStatus::Open);
    let aggregates = h.notary.aggregates.lock().unwrap().clone();
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].0, "w1");
    assert_eq!(aggregates[0].1.len(), 4);

    let err = h
        .engines
        .banking
        .erc20_withdrawal_event("e1", withdrawal.reference, "0xpaid", 20, 0, PRIMARY_CHAIN)
        .unwrap_err();
    assert_eq!(err, SettlementError::WithdrawalNotReady);

    h.notary.sign("w1");
    h.engines
        .banking
        .erc20_withdrawal_event("e1", withdrawal.reference, "0xpaid", 20, 0, PRIMARY_CHAIN)
        .unwrap();
    h.witness.check_all();
    h.tick();

    let finalized = h
        .engines
        .banking
        .get_withdrawal_from_ref(withdrawal.reference)
        .unwrap();
    assert_eq!(finalized.status, WithdrawalStatus::Finalized);
    assert_eq!(finalized.tx_hash, "0xpaid");

    let err = h
        .engines
        .banking
        .erc20_withdrawal_event("e2", withdrawal.reference, "0xpaid", 21, 0, PRIMARY_CHAIN)
        .unwrap_err();
    assert_eq!(err, SettlementError::InvalidWithdrawalState);
}

#[test]
fn test_open_withdrawals_resigned_each_tick() {
    let mut h = setup();
    h.ledger.set_general("p1", "usdc", 1_000);
    h.engines
        .banking
        .withdraw_erc20(&h.engines.assets, "w1", "p1", "usdc", 100, "0xreceiver")
        .unwrap();
    h.tick();
    assert_eq!(*h.notary.offered.lock().unwrap(), vec!["w1".to_string()]);
}

#[test]
fn test_unknown_withdrawal_reference() {
    let mut h = setup();
    let err = h
        .engines
        .banking
        .erc20_withdrawal_event("e1", 12345, "0xpaid", 20, 0, PRIMARY_CHAIN)
        .unwrap_err();
    assert_eq!(err, SettlementError::NotMatchingWithdrawalForReference);
}

// ============================================================================
// Asset Listing & Updates
// ============================================================================

const WETH_ADDRESS: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";

fn propose_weth(h: &mut Harness) {
    h.engines
        .assets
        .new_asset(
            "prop-weth",
            details("WETH", 1_000),
            AssetSource::Erc20 {
                chain_id: PRIMARY_CHAIN.to_string(),
                contract_address: WETH_ADDRESS.to_string(),
                lifetime_limit: 10_000,
                withdraw_threshold: 100,
            },
        )
        .unwrap();
}

#[test]
fn test_asset_listed_once_bridge_confirms() {
    let mut h = setup();
    h.primary_bridge
        .known_assets
        .lock()
        .unwrap()
        .push(WETH_ADDRESS.to_lowercase());
    propose_weth(&mut h);

    h.engines.assets.validate_asset("prop-weth").unwrap();
    h.engines.assets.set_pending_listing("prop-weth").unwrap();
    assert!(!h.engines.assets.is_enabled("prop-weth"));

    h.engines
        .banking
        .enable_erc20(
            &h.engines.assets,
            "l1",
            "prop-weth",
            WETH_ADDRESS,
            30,
            0,
            "0xlist",
            PRIMARY_CHAIN,
        )
        .unwrap();
    h.witness.check_all();
    h.tick();

    assert!(h.engines.assets.is_enabled("prop-weth"));
    assert_eq!(
        h.engines
            .assets
            .get_asset_id_from_address(PRIMARY_CHAIN, &WETH_ADDRESS.to_lowercase()),
        Some("prop-weth")
    );
    assert_eq!(
        h.ledger.state.lock().unwrap().enabled_assets,
        vec!["prop-weth".to_string()]
    );
}

#[test]
fn test_asset_missing_on_bridge_not_validated() {
    let mut h = setup();
    propose_weth(&mut h);
    let err = h.engines.assets.validate_asset("prop-weth").unwrap_err();
    assert!(matches!(err, SettlementError::AssetNotFoundOnBridge { .. }));
}

#[test]
fn test_non_validator_trusts_proposed_asset() {
    let mut h = Harness::non_validator();
    propose_weth(&mut h);
    h.engines.assets.validate_asset("prop-weth").unwrap();
    assert!(h.engines.assets.get("prop-weth").unwrap().is_valid());
}

#[test]
fn test_duplicate_contract_address_refused() {
    let mut h = setup();
    let err = h
        .engines
        .assets
        .new_asset(
            "prop-usdc",
            details("USDC", 1),
            AssetSource::Erc20 {
                chain_id: PRIMARY_CHAIN.to_string(),
                contract_address: USDC_ADDRESS.to_uppercase().replace("0X", "0x"),
                lifetime_limit: 1,
                withdraw_threshold: 1,
            },
        )
        .unwrap_err();
    assert!(matches!(err, SettlementError::Erc20AddressAlreadyInUse { .. }));
}

fn staged_usdc_limits(lifetime_limit: u128, withdraw_threshold: u128) -> Asset {
    Asset::new(
        "usdc",
        details("usdc", 1),
        AssetSource::Erc20 {
            chain_id: PRIMARY_CHAIN.to_string(),
            contract_address: USDC_ADDRESS.to_string(),
            lifetime_limit,
            withdraw_threshold,
        },
    )
}

fn update_usdc_limits(h: &mut Harness, id: &str, log_index: u64) -> Result<(), SettlementError> {
    h.engines.banking.update_erc20(
        &h.engines.assets,
        id,
        "usdc",
        USDC_ADDRESS,
        5_000,
        50,
        40,
        log_index,
        "0xlimits",
        PRIMARY_CHAIN,
    )
}

#[test]
fn test_limits_update_requires_staged_update() {
    let mut h = setup();
    let err = update_usdc_limits(&mut h, "u1", 0).unwrap_err();
    assert!(matches!(err, SettlementError::NoStagedAssetUpdate { .. }));
    assert!(!h.engines.banking.has_asset_action("u1"));
}

#[test]
fn test_staged_limits_update_applied_end_to_end() {
    let mut h = setup();
    h.engines
        .assets
        .stage_asset_update(staged_usdc_limits(5_000, 50))
        .unwrap();

    // a refused event leaves the staged update in place
    update_usdc_limits(&mut h, "u0", 0).unwrap();
    h.witness.resolve("u0", false);
    h.tick();
    let usdc = h.engines.assets.get("usdc").unwrap().as_erc20().unwrap().clone();
    assert_eq!(usdc.lifetime_limit, 1_000_000);
    assert!(h.engines.assets.get_pending_update("usdc").is_ok());
    assert!(h.ledger.state.lock().unwrap().updated_assets.is_empty());

    update_usdc_limits(&mut h, "u1", 1).unwrap();
    h.tick();
    // nothing applied before the witness accepts
    assert!(h.engines.assets.get_pending_update("usdc").is_ok());

    h.witness.check_all();
    h.tick();

    let usdc = h.engines.assets.get("usdc").unwrap().as_erc20().unwrap().clone();
    assert_eq!(usdc.lifetime_limit, 5_000);
    assert_eq!(usdc.withdraw_threshold, 50);
    assert_eq!(usdc.core.details.decimals, 18);
    assert!(h.engines.assets.get_pending_update("usdc").is_err());
    assert!(!h.engines.banking.has_asset_action("u1"));
    assert_eq!(
        h.ledger.state.lock().unwrap().updated_assets,
        vec!["usdc".to_string()]
    );
}

#[test]
fn test_staged_update_cannot_move_contract() {
    let mut h = setup();
    let moved = Asset::new(
        "usdc",
        details("usdc", 1),
        AssetSource::Erc20 {
            chain_id: PRIMARY_CHAIN.to_string(),
            contract_address: BUSD_ADDRESS.to_string(),
            lifetime_limit: 5_000,
            withdraw_threshold: 50,
        },
    );
    assert!(matches!(
        h.engines.assets.stage_asset_update(moved),
        Err(SettlementError::InvalidAssetDetails { .. })
    ));
    let err = update_usdc_limits(&mut h, "u1", 0).unwrap_err();
    assert!(matches!(err, SettlementError::NoStagedAssetUpdate { .. }));
}
