use screener_core::{Criterion, CriterionId, DerivedMetrics, Trend};
use serde::{Deserialize, Serialize};

/// Pass thresholds for the criteria catalogue. Percent values are in percent.
///
/// The growth override and profitability leniency values are product-defined
/// constants and are kept configurable rather than derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriteriaThresholds {
    pub min_profitable_years: u32,
    /// Lenient path: fewer profitable years accepted when the recent years had no loss
    pub min_profitable_years_lenient: u32,
    pub max_pe: f64,
    pub override_min_revenue_cagr: f64,
    pub override_max_net_debt_to_ebitda: f64,
    pub min_roic: f64,
    pub min_roe: f64,
    pub min_dividend_yield: f64,
    pub min_eps_cagr: f64,
    pub min_revenue_cagr: f64,
    pub max_net_debt_to_ebitda: f64,
    pub min_net_margin: f64,
    pub min_fcf_margin: f64,
    pub min_margin_of_safety: f64,
}

impl Default for CriteriaThresholds {
    fn default() -> Self {
        Self {
            min_profitable_years: 8,
            min_profitable_years_lenient: 6,
            max_pe: 20.0,
            override_min_revenue_cagr: 15.0,
            override_max_net_debt_to_ebitda: 1.0,
            min_roic: 12.0,
            min_roe: 15.0,
            min_dividend_yield: 2.0,
            min_eps_cagr: 10.0,
            min_revenue_cagr: 5.0,
            max_net_debt_to_ebitda: 2.5,
            min_net_margin: 10.0,
            min_fcf_margin: 8.0,
            min_margin_of_safety: 0.0,
        }
    }
}

/// Turns derived metrics into the ordered criteria catalogue
#[derive(Debug, Clone, Default)]
pub struct CriterionEvaluator {
    thresholds: CriteriaThresholds,
}

impl CriterionEvaluator {
    pub fn new(thresholds: CriteriaThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &CriteriaThresholds {
        &self.thresholds
    }

    /// Evaluate every criterion, in [`CriterionId::ALL`] order.
    pub fn evaluate(&self, metrics: &DerivedMetrics) -> Vec<Criterion> {
        CriterionId::ALL
            .iter()
            .map(|id| self.evaluate_one(*id, metrics))
            .collect()
    }

    pub fn evaluate_one(&self, id: CriterionId, m: &DerivedMetrics) -> Criterion {
        let t = &self.thresholds;
        match id {
            CriterionId::ProfitableYears => self.evaluate_profitability(m),
            CriterionId::PeRatio => self.evaluate_pe(m),
            CriterionId::Roic => {
                Criterion::evaluate(id, m.roic, format!(">= {}%", t.min_roic), |v| v >= t.min_roic)
            }
            CriterionId::Roe => {
                Criterion::evaluate(id, m.roe, format!(">= {}%", t.min_roe), |v| v >= t.min_roe)
            }
            CriterionId::DividendYield => Criterion::evaluate(
                id,
                m.dividend_yield,
                format!(">= {}%", t.min_dividend_yield),
                |v| v >= t.min_dividend_yield,
            ),
            CriterionId::EpsGrowth => Criterion::evaluate(
                id,
                m.eps_cagr_5y,
                format!("5y CAGR >= {}%", t.min_eps_cagr),
                |v| v >= t.min_eps_cagr,
            ),
            CriterionId::RevenueGrowth => Criterion::evaluate(
                id,
                m.revenue_cagr_5y,
                format!("5y CAGR >= {}%", t.min_revenue_cagr),
                |v| v >= t.min_revenue_cagr,
            ),
            CriterionId::NetDebtToEbitda => Criterion::evaluate(
                id,
                m.net_debt_to_ebitda,
                format!("< {}", t.max_net_debt_to_ebitda),
                |v| v < t.max_net_debt_to_ebitda,
            ),
            CriterionId::NetMargin => Criterion::evaluate(
                id,
                m.net_margin,
                format!(">= {}%", t.min_net_margin),
                |v| v >= t.min_net_margin,
            ),
            CriterionId::FcfMargin => Criterion::evaluate(
                id,
                m.fcf_margin,
                format!(">= {}%", t.min_fcf_margin),
                |v| v >= t.min_fcf_margin,
            ),
            CriterionId::MarginOfSafety => Criterion::evaluate(
                id,
                m.margin_of_safety,
                format!(">= {}% below intrinsic value", t.min_margin_of_safety),
                |v| v >= t.min_margin_of_safety,
            ),
        }
    }

    fn evaluate_profitability(&self, m: &DerivedMetrics) -> Criterion {
        let t = &self.thresholds;
        let threshold = format!(
            ">= {} of 10 years, or >= {} with no loss in the last 3",
            t.min_profitable_years, t.min_profitable_years_lenient
        );
        match m.profitability {
            Some(record) => {
                let lenient = record.years_profitable >= t.min_profitable_years_lenient
                    && record.recent_years_profitable();
                let pass = record.years_profitable >= t.min_profitable_years || lenient;
                Criterion::new(
                    CriterionId::ProfitableYears,
                    pass,
                    Some(record.years_profitable as f64),
                    threshold,
                )
            }
            None => Criterion::new(CriterionId::ProfitableYears, false, None, threshold),
        }
    }

    fn evaluate_pe(&self, m: &DerivedMetrics) -> Criterion {
        let t = &self.thresholds;
        let threshold = format!(
            "< {} (or growth override: revenue CAGR >= {}%, rising FCF margin and ROIC, \
             net debt/EBITDA <= {})",
            t.max_pe, t.override_min_revenue_cagr, t.override_max_net_debt_to_ebitda
        );
        Criterion::evaluate(CriterionId::PeRatio, m.pe_ratio, threshold, |pe| {
            // A non-positive multiple means losses, not cheapness
            pe > 0.0 && (pe < t.max_pe || self.growth_override(m))
        })
    }

    /// All four conditions must hold simultaneously to tolerate a multiple above `max_pe`.
    pub fn growth_override(&self, m: &DerivedMetrics) -> bool {
        let t = &self.thresholds;
        let growth = m.revenue_cagr_5y.map_or(false, |g| g >= t.override_min_revenue_cagr);
        let cash = m.fcf_margin_trend == Trend::Rising;
        let returns = m.roic_trend == Trend::Rising;
        let leverage = m
            .net_debt_to_ebitda
            .map_or(false, |l| l <= t.override_max_net_debt_to_ebitda);
        growth && cash && returns && leverage
    }
}
