//! Kani formal verification harnesses for the credibility matcher.
//!
//! Run with: `cargo kani --tests`
//!
//! These harnesses prove matcher-level properties:
//! - Spread stays within [1, max_spread_bps]
//! - Fills never exceed the request, max_fill_abs, or the inventory cap
//! - Every successful quote produces a return the engine accepts
//! - Identity checks reject zero and mismatched keys
//! - Refresh is idempotent within a slot and never shrinks market age
//! - Init bounds keep the imbalance product inside u128
//!
//! Account deserialization and the runtime are NOT modeled; the pure helpers
//! the processor calls are.

#![cfg(kani)]

extern crate kani;

use credibility_matcher::credibility::refresh;
use credibility_matcher::engine_view::EngineSignals;
use credibility_matcher::matcher_abi::{MatcherCall, MatcherReturn, FLAG_PARTIAL_OK};
use credibility_matcher::pricing::{
    age_discount_bps, coverage_discount_bps, exec_price_e6, fill_abs, quote, spread_bps,
};
use credibility_matcher::state::{LiveState, MatcherParams};
use credibility_matcher::verify;

fn any_valid_params() -> MatcherParams {
    let p = MatcherParams {
        base_fee_bps: kani::any(),
        min_spread_bps: kani::any(),
        max_spread_bps: kani::any(),
        imbalance_k_bps: kani::any(),
        liquidity_notional_e6: kani::any(),
        max_fill_abs: kani::any(),
        max_inventory_abs: kani::any(),
        age_halflife_slots: kani::any(),
        insurance_weight_bps: kani::any(),
    };
    kani::assume(verify::init_params_ok(&p));
    p
}

fn any_live_within(p: &MatcherParams) -> LiveState {
    let live = LiveState {
        inventory: kani::any(),
        last_oracle_price_e6: kani::any(),
        last_exec_price_e6: kani::any(),
        insurance_snapshot: kani::any(),
        total_oi_snapshot: kani::any(),
        market_age_slots: kani::any(),
        last_deficit_slot: kani::any(),
        snapshot_slot: kani::any(),
        admin_renounced_at_snapshot: kani::any(),
    };
    kani::assume(live.inventory.unsigned_abs() <= p.max_inventory_abs);
    live
}

#[kani::proof]
fn kani_init_bounds_keep_imbalance_in_range() {
    let p = any_valid_params();
    let inv: i128 = kani::any();
    kani::assume(inv.unsigned_abs() <= p.max_inventory_abs);
    assert!((p.imbalance_k_bps as u128)
        .checked_mul(inv.unsigned_abs())
        .is_some());
    assert!(p.min_spread_bps >= 1);
    assert!(p.max_spread_bps + p.base_fee_bps <= 9_000);
}

#[kani::proof]
fn kani_spread_within_bounds() {
    let p = any_valid_params();
    let live = any_live_within(&p);
    let s = spread_bps(&p, &live).unwrap();
    assert!(s >= 1);
    assert!(s <= p.max_spread_bps as u64);
}

#[kani::proof]
fn kani_age_discount_bounded() {
    let min: u32 = kani::any();
    let age: u64 = kani::any();
    let halflife: u64 = kani::any();
    assert!(age_discount_bps(min, age, halflife) <= min as u128);
}

#[kani::proof]
fn kani_coverage_discount_bounded() {
    let weight: u32 = kani::any();
    kani::assume(weight <= 9_000);
    let ins: u128 = kani::any();
    let oi: u128 = kani::any();
    let d = coverage_discount_bps(weight, ins, oi);
    assert!(d <= weight as u128);
    if oi == 0 {
        assert!(d == 0);
    }
}

#[kani::proof]
fn kani_coverage_monotone() {
    let weight: u32 = kani::any();
    kani::assume(weight <= 9_000);
    let a: u128 = kani::any();
    let b: u128 = kani::any();
    let oi: u128 = kani::any();
    kani::assume(a <= b);
    assert!(coverage_discount_bps(weight, a, oi) <= coverage_discount_bps(weight, b, oi));
}

#[kani::proof]
fn kani_fill_respects_caps() {
    let p = any_valid_params();
    let inv: i128 = kani::any();
    kani::assume(inv.unsigned_abs() <= p.max_inventory_abs);
    let req: i128 = kani::any();
    kani::assume(req != i128::MIN);

    let fill = fill_abs(&p, inv, req);
    assert!(fill <= req.unsigned_abs());
    assert!(fill <= p.max_fill_abs);

    let exec = if req > 0 { fill as i128 } else { -(fill as i128) };
    let next = inv - exec;
    assert!(next.unsigned_abs() <= p.max_inventory_abs);
}

#[kani::proof]
fn kani_buy_above_sell_below_oracle() {
    let oracle: u64 = kani::any();
    let total: u64 = kani::any();
    kani::assume(oracle > 0);
    kani::assume(total >= 1 && total <= 9_000);
    if let Ok(buy) = exec_price_e6(oracle, total, true) {
        assert!(buy > oracle);
    }
    if let Ok(sell) = exec_price_e6(oracle, total, false) {
        assert!(sell < oracle);
        assert!(sell > 0);
    }
}

#[kani::proof]
fn kani_quote_accepted_by_engine() {
    let p = any_valid_params();
    let live = any_live_within(&p);
    let call = MatcherCall {
        req_id: kani::any(),
        lp_idx: kani::any(),
        lp_account_id: kani::any(),
        oracle_price_e6: kani::any(),
        req_size: kani::any(),
    };

    if let Ok(q) = quote(&p, &live, call.oracle_price_e6, call.req_size) {
        let ret = MatcherReturn {
            abi_version: 1,
            flags: verify::flags_for_fill(q.exec_size.unsigned_abs(), call.req_size.unsigned_abs()),
            exec_price_e6: q.exec_price_e6,
            exec_size: q.exec_size,
            req_id: call.req_id,
            lp_account_id: call.lp_account_id,
            oracle_price_e6: call.oracle_price_e6,
            reserved: 0,
        };
        assert!(ret.accepted_for(&call));
    }
}

#[kani::proof]
fn kani_zero_fill_sets_partial_ok() {
    let req_abs: u128 = kani::any();
    let flags = verify::flags_for_fill(0, req_abs);
    assert!(flags & FLAG_PARTIAL_OK != 0);
}

#[kani::proof]
fn kani_lp_pda_rejects_zero_and_mismatch() {
    let stored: [u8; 32] = kani::any();
    let signer: [u8; 32] = kani::any();
    if verify::lp_pda_ok(stored, signer) {
        assert!(stored == signer);
        assert!(stored != [0u8; 32]);
    }
    assert!(!verify::lp_pda_ok([0u8; 32], [0u8; 32]));
}

#[kani::proof]
fn kani_engine_slab_binding() {
    let stored: [u8; 32] = kani::any();
    let provided: [u8; 32] = kani::any();
    kani::assume(stored != provided);
    assert!(!verify::engine_slab_ok(stored, provided));
}

#[kani::proof]
fn kani_admin_renounced_needs_both_zero() {
    let admin: [u8; 32] = kani::any();
    let pending: [u8; 32] = kani::any();
    if verify::admin_renounced(admin, pending) {
        assert!(admin == [0u8; 32] && pending == [0u8; 32]);
    }
}

#[kani::proof]
fn kani_refresh_idempotent_and_age_monotone() {
    let live = LiveState {
        inventory: kani::any(),
        last_oracle_price_e6: kani::any(),
        last_exec_price_e6: kani::any(),
        insurance_snapshot: kani::any(),
        total_oi_snapshot: kani::any(),
        market_age_slots: kani::any(),
        last_deficit_slot: kani::any(),
        snapshot_slot: kani::any(),
        admin_renounced_at_snapshot: kani::any(),
    };
    let signals = EngineSignals {
        insurance_balance: kani::any(),
        total_open_interest: kani::any(),
        admin_renounced: kani::any(),
    };
    let slot: u64 = kani::any();

    let once = refresh(&live, &signals, slot);
    assert!(once.market_age_slots >= live.market_age_slots);
    assert!(once.inventory == live.inventory);
    assert!(once.snapshot_slot == slot);
    if !signals.admin_renounced || !live.admin_renounced_at_snapshot {
        assert!(once.market_age_slots == live.market_age_slots);
    }
    assert!(once.admin_renounced_at_snapshot == signals.admin_renounced);

    let twice = refresh(&once, &signals, slot);
    assert!(twice == once);
}
