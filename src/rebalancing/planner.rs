//! Corrective-action planning.
//!
//! Planning is pure: everything it needs (status, balances, settings, quote
//! prices) is fetched up front by the engine. Sizing leans toward
//! under-correction; the next pass picks up whatever is left.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::config::{RebalanceSettings, ValuationConfig};
use crate::models::{AccountSnapshot, ActionType, LtvAction, LtvStatus, RebalanceAction};

/// Share of a free balance offered for repayment
const REPAY_FREE_FRACTION: f64 = 0.95;
/// Share of a free balance offered as extra collateral
const COLLATERAL_FREE_FRACTION: f64 = 0.9;
/// Share of the raw borrow gap actually borrowed
const BORROW_GAP_FRACTION: f64 = 0.9;
/// Remaining reduction (quote) above which collateral is added on top of repays
const COLLATERAL_FALLBACK_QUOTE: f64 = 1_000.0;
const MIN_COLLATERAL_QUOTE: f64 = 100.0;
const MIN_BORROW_QUOTE: f64 = 50.0;
/// Borrow gaps at or below this (reference units) are noise
const MIN_BORROW_GAP: f64 = 0.0001;

/// Quote prices available to one planning run
#[derive(Debug, Clone, Default)]
pub struct QuotePrices {
    /// Quote price of the reference asset
    pub reference: Option<f64>,
    assets: HashMap<String, f64>,
}

impl QuotePrices {
    pub fn new(reference: Option<f64>) -> Self {
        Self {
            reference,
            assets: HashMap::new(),
        }
    }

    pub fn with_price(mut self, asset: &str, price: f64) -> Self {
        self.insert(asset, price);
        self
    }

    pub fn insert(&mut self, asset: &str, price: f64) {
        if price.is_finite() && price > 0.0 {
            self.assets.insert(asset.to_string(), price);
        }
    }

    pub fn get(&self, asset: &str) -> Option<f64> {
        self.assets.get(asset).copied()
    }
}

/// Assets whose quote price the planner will look up for `status`.
pub fn assets_to_price(
    status: &LtvStatus,
    snapshot: &AccountSnapshot,
    valuation: &ValuationConfig,
) -> BTreeSet<String> {
    let mut assets = BTreeSet::new();
    match status.action_required {
        LtvAction::ReduceLtv => {
            for (asset, balance) in &snapshot.balances {
                if balance.borrowed > 0.0 && balance.free > 0.0 {
                    assets.insert(asset.clone());
                }
            }
            for asset in pledgeable_assets(snapshot, valuation) {
                if snapshot.balance(asset).free > 0.0 {
                    assets.insert(asset.clone());
                }
            }
        }
        LtvAction::IncreaseLtv => {
            assets.insert(valuation.borrow_asset.clone());
        }
        LtvAction::None => {}
    }
    assets
}

/// Build the ordered, unexecuted action list for `status`.
pub fn plan(
    status: &LtvStatus,
    snapshot: &AccountSnapshot,
    settings: &RebalanceSettings,
    valuation: &ValuationConfig,
    prices: &QuotePrices,
) -> Vec<RebalanceAction> {
    if status.is_error() || !status.needs_rebalance {
        return Vec::new();
    }

    match status.action_required {
        LtvAction::ReduceLtv => plan_reduce(snapshot, settings, valuation, prices),
        LtvAction::IncreaseLtv => plan_increase(snapshot, settings, valuation, prices),
        LtvAction::None => Vec::new(),
    }
}

fn plan_reduce(
    snapshot: &AccountSnapshot,
    settings: &RebalanceSettings,
    valuation: &ValuationConfig,
    prices: &QuotePrices,
) -> Vec<RebalanceAction> {
    let target = settings.target_ltv() / 100.0;
    let required = snapshot.total_debt_value - snapshot.total_collateral_value * target;
    if required <= 0.0 {
        return Vec::new();
    }
    let required_quote = prices.reference.map(|p| required * p);

    // Largest debts first
    let mut candidates: Vec<(&str, f64, f64, f64)> = snapshot
        .balances
        .iter()
        .filter(|(_, b)| b.borrowed > 0.0 && b.free > 0.0)
        .filter_map(|(asset, b)| match prices.get(asset) {
            Some(price) => Some((asset.as_str(), b.free, b.borrowed, price)),
            None => {
                debug!("Skipping repay of {}: no quote price", asset);
                None
            }
        })
        .collect();
    candidates.sort_by(|a, b| (b.2 * b.3).total_cmp(&(a.2 * a.3)));

    let mut actions = Vec::new();
    let mut remaining = required_quote;
    let mut repay_total = 0.0;

    for (asset, free, borrowed, price) in candidates {
        if remaining.is_some_and(|r| r <= 0.0) {
            break;
        }

        let mut amount = (free * REPAY_FREE_FRACTION).min(borrowed);
        let mut value = amount * price;
        if let Some(r) = remaining {
            if value > r {
                amount = r / price;
                value = r;
            }
        }

        if value <= settings.min_repay_amount() {
            debug!(
                "Skipping repay of {} {}: value {:.2} not above minimum {}",
                amount,
                asset,
                value,
                settings.min_repay_amount()
            );
            continue;
        }

        actions.push(
            RebalanceAction::new(ActionType::Repay, asset, amount).with_valuation(Some(price), Some(value)),
        );
        repay_total += value;
        remaining = remaining.map(|r| r - value);
    }

    let shortfall_large = required_quote.is_some_and(|r| r - repay_total > COLLATERAL_FALLBACK_QUOTE);
    if actions.is_empty() || shortfall_large {
        if let Some(action) = plan_add_collateral(snapshot, valuation, prices) {
            actions.push(action);
        }
    }

    actions
}

/// Allow-listed collateral assets, in preference order. When the account
/// holds loan orders, only coins already pledged by one of them qualify: a
/// loan can only be topped up with its own collateral coin.
fn pledgeable_assets<'a>(
    snapshot: &'a AccountSnapshot,
    valuation: &'a ValuationConfig,
) -> impl Iterator<Item = &'a String> + 'a {
    valuation.collateral_assets.iter().filter(move |asset| {
        snapshot.loans.is_empty()
            || snapshot.loans.iter().any(|loan| &loan.collateral_coin == *asset)
    })
}

/// At most one top-up from the first allow-listed asset with a free balance
fn plan_add_collateral(
    snapshot: &AccountSnapshot,
    valuation: &ValuationConfig,
    prices: &QuotePrices,
) -> Option<RebalanceAction> {
    let (asset, free, price) = pledgeable_assets(snapshot, valuation).find_map(|asset| {
        let free = snapshot.balance(asset).free;
        if free <= 0.0 {
            return None;
        }
        prices.get(asset).map(|price| (asset, free, price))
    })?;

    let amount = free * COLLATERAL_FREE_FRACTION;
    let value = amount * price;
    if value <= MIN_COLLATERAL_QUOTE {
        debug!("Skipping collateral top-up of {} {}: value {:.2} too small", amount, asset, value);
        return None;
    }

    Some(RebalanceAction::new(ActionType::AddCollateral, asset, amount).with_valuation(Some(price), Some(value)))
}

fn plan_increase(
    snapshot: &AccountSnapshot,
    settings: &RebalanceSettings,
    valuation: &ValuationConfig,
    prices: &QuotePrices,
) -> Vec<RebalanceAction> {
    let target = settings.target_ltv() / 100.0;
    let gap = snapshot.total_collateral_value * target - snapshot.total_debt_value;
    if gap <= MIN_BORROW_GAP {
        return Vec::new();
    }

    let Some(reference_price) = prices.reference else {
        debug!("Cannot size borrow: no {} price", valuation.reference_asset);
        return Vec::new();
    };

    let borrow_quote = (gap * reference_price * BORROW_GAP_FRACTION).min(settings.max_borrow_amount());
    if borrow_quote <= MIN_BORROW_QUOTE {
        return Vec::new();
    }

    let Some(price) = prices.get(&valuation.borrow_asset) else {
        debug!("Cannot size borrow: no {} price", valuation.borrow_asset);
        return Vec::new();
    };

    vec![
        RebalanceAction::new(ActionType::Borrow, &valuation.borrow_asset, borrow_quote / price)
            .with_valuation(Some(price), Some(borrow_quote)),
    ]
}
