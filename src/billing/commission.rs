use serde::Serialize;

use super::models::{CommissionMode, Partner};
use crate::config;

/// One booking's commission, before currency rounding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Commission {
    pub amount: f64,
    pub mode: CommissionMode,
    pub rate: Option<f64>,
    pub flat_amount: Option<f64>,
}

/// key: commission-calculator -> pure, defaults liberally, never fails
///
/// Flat-rate partners earn their configured amount regardless of revenue.
/// Everything else (including flat-rate partners with no amount configured)
/// falls back to percentage with the system default rate.
pub fn compute_commission(partner: &Partner, revenue: f64) -> Commission {
    let mode = CommissionMode::parse(&partner.commission_type)
        .unwrap_or(CommissionMode::Percentage);

    if mode == CommissionMode::FlatRate {
        if let Some(flat) = partner.flat_rate_amount {
            return Commission {
                amount: flat,
                mode: CommissionMode::FlatRate,
                rate: None,
                flat_amount: Some(flat),
            };
        }
    }

    let rate = partner.commission_rate.unwrap_or(*config::COMMISSION_RATE);
    Commission {
        amount: revenue * rate / 100.0,
        mode: CommissionMode::Percentage,
        rate: Some(rate),
        flat_amount: None,
    }
}

/// Currency rounding applied at persistence time; the calculator itself
/// stays exact.
pub fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
