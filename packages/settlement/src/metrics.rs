//! Prometheus metrics for the settlement engines
//!
//! Registered in the default registry; the hosting node exposes them.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_int_counter, CounterVec,
    Gauge, GaugeVec, IntCounter,
};

lazy_static! {
    // Asset action metrics
    pub static ref ASSET_ACTIONS: CounterVec = register_counter_vec!(
        "settlement_asset_actions_total",
        "Asset actions drained from the pending set",
        &["kind", "outcome"]
    ).unwrap();

    pub static ref DEDUP_DROPS: CounterVec = register_counter_vec!(
        "settlement_dedup_drops_total",
        "Accepted asset actions dropped because their chain event was already processed",
        &["kind"]
    ).unwrap();

    pub static ref PENDING_ASSET_ACTIONS: Gauge = register_gauge!(
        "settlement_pending_asset_actions",
        "Asset actions awaiting a witness verdict or the next tick"
    ).unwrap();

    // Transfer metrics
    pub static ref TRANSFERS: CounterVec = register_counter_vec!(
        "settlement_transfers_total",
        "Transfer status changes",
        &["kind", "status"]
    ).unwrap();

    pub static ref TRANSFER_FEES: CounterVec = register_counter_vec!(
        "settlement_transfer_fees_total",
        "Transfer fees collected (in base units)",
        &["asset"]
    ).unwrap();

    pub static ref TRANSFER_FEE_DISCOUNTS: CounterVec = register_counter_vec!(
        "settlement_transfer_fee_discounts_total",
        "Transfer fee discount consumed (in base units)",
        &["asset"]
    ).unwrap();

    // Bridge metrics
    pub static ref BRIDGE_ACTIVE: GaugeVec = register_gauge_vec!(
        "settlement_bridge_active",
        "Whether the bridge of a chain accepts withdrawals",
        &["chain"]
    ).unwrap();

    pub static ref WITHDRAWALS_BRIDGE_STOPPED: CounterVec = register_counter_vec!(
        "settlement_withdrawals_bridge_stopped_total",
        "Withdrawals rejected because the bridge was stopped",
        &["chain"]
    ).unwrap();

    // Vesting metrics
    pub static ref VESTING_PAYOUTS: CounterVec = register_counter_vec!(
        "settlement_vesting_payouts_total",
        "Rewards vested (in base units)",
        &["asset"]
    ).unwrap();

    // Service metrics
    pub static ref TICKS: IntCounter = register_int_counter!(
        "settlement_ticks_total",
        "Blocks processed by the settlement service"
    ).unwrap();
}

/// Record an asset action leaving the pending set
pub fn record_asset_action(kind: &str, outcome: &str) {
    ASSET_ACTIONS.with_label_values(&[kind, outcome]).inc();
}

/// Record a replayed chain event
pub fn record_dedup_drop(kind: &str) {
    DEDUP_DROPS.with_label_values(&[kind]).inc();
}

pub fn set_pending_asset_actions(count: usize) {
    PENDING_ASSET_ACTIONS.set(count as f64);
}

/// Record a transfer status change
pub fn record_transfer(kind: &str, status: &str) {
    TRANSFERS.with_label_values(&[kind, status]).inc();
}

/// Record a fee paid and the discount consumed by it
pub fn record_transfer_fee(asset: &str, fee: u128, discount: u128) {
    TRANSFER_FEES.with_label_values(&[asset]).inc_by(fee as f64);
    TRANSFER_FEE_DISCOUNTS
        .with_label_values(&[asset])
        .inc_by(discount as f64);
}

pub fn set_bridge_active(chain: &str, active: bool) {
    BRIDGE_ACTIVE
        .with_label_values(&[chain])
        .set(if active { 1.0 } else { 0.0 });
}

pub fn record_withdrawal_bridge_stopped(chain: &str) {
    WITHDRAWALS_BRIDGE_STOPPED.with_label_values(&[chain]).inc();
}

pub fn record_vesting_payout(asset: &str, amount: u128) {
    VESTING_PAYOUTS.with_label_values(&[asset]).inc_by(amount as f64);
}

pub fn record_tick() {
    TICKS.inc();
}
