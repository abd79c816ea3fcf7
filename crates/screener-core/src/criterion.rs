use serde::{Deserialize, Serialize};

/// The fixed, ordered criteria catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionId {
    ProfitableYears,
    PeRatio,
    Roic,
    Roe,
    DividendYield,
    EpsGrowth,
    RevenueGrowth,
    NetDebtToEbitda,
    NetMargin,
    FcfMargin,
    MarginOfSafety,
}

impl CriterionId {
    /// Catalogue order. Export columns and evaluator output follow it.
    pub const ALL: [CriterionId; 11] = [
        CriterionId::ProfitableYears,
        CriterionId::PeRatio,
        CriterionId::Roic,
        CriterionId::Roe,
        CriterionId::DividendYield,
        CriterionId::EpsGrowth,
        CriterionId::RevenueGrowth,
        CriterionId::NetDebtToEbitda,
        CriterionId::NetMargin,
        CriterionId::FcfMargin,
        CriterionId::MarginOfSafety,
    ];

    /// Stable machine key, used for export headers and persisted results
    pub fn key(&self) -> &'static str {
        match self {
            CriterionId::ProfitableYears => "profitable_years",
            CriterionId::PeRatio => "pe_ratio",
            CriterionId::Roic => "roic",
            CriterionId::Roe => "roe",
            CriterionId::DividendYield => "dividend_yield",
            CriterionId::EpsGrowth => "eps_growth",
            CriterionId::RevenueGrowth => "revenue_growth",
            CriterionId::NetDebtToEbitda => "net_debt_to_ebitda",
            CriterionId::NetMargin => "net_margin",
            CriterionId::FcfMargin => "fcf_margin",
            CriterionId::MarginOfSafety => "margin_of_safety",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CriterionId::ProfitableYears => "Years of Profitability",
            CriterionId::PeRatio => "P/E Ratio",
            CriterionId::Roic => "Return on Invested Capital",
            CriterionId::Roe => "Return on Equity",
            CriterionId::DividendYield => "Dividend Yield",
            CriterionId::EpsGrowth => "EPS Growth (5y CAGR)",
            CriterionId::RevenueGrowth => "Revenue Growth (5y CAGR)",
            CriterionId::NetDebtToEbitda => "Net Debt / EBITDA",
            CriterionId::NetMargin => "Net Margin",
            CriterionId::FcfMargin => "Free Cash Flow Margin",
            CriterionId::MarginOfSafety => "Margin of Safety",
        }
    }
}

/// Partial fulfillment of a criterion that decomposes into sub-questions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAspects {
    pub fulfilled: u32,
    pub total: u32,
}

/// One evaluated criterion.
///
/// A criterion without a value never passes: construction goes through
/// [`Criterion::evaluate`] / [`Criterion::new`], which enforce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    id: CriterionId,
    pass: bool,
    value: Option<f64>,
    threshold: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_aspects: Option<SubAspects>,
}

impl Criterion {
    /// Evaluate `rule` against `value`. Missing or non-finite values fail.
    pub fn evaluate(
        id: CriterionId,
        value: Option<f64>,
        threshold: impl Into<String>,
        rule: impl FnOnce(f64) -> bool,
    ) -> Self {
        let value = value.filter(|v| v.is_finite());
        let pass = value.map_or(false, rule);
        Self::new(id, pass, value, threshold)
    }

    /// Build from an already decided outcome. `pass` is forced to false when `value` is absent.
    pub fn new(
        id: CriterionId,
        pass: bool,
        value: Option<f64>,
        threshold: impl Into<String>,
    ) -> Self {
        Self {
            id,
            pass: pass && value.is_some(),
            value,
            threshold: threshold.into(),
            sub_aspects: None,
        }
    }

    /// Attach a partial qualitative fulfillment. `total` of zero is ignored.
    pub fn with_sub_aspects(mut self, fulfilled: u32, total: u32) -> Self {
        if total > 0 {
            self.sub_aspects = Some(SubAspects {
                fulfilled: fulfilled.min(total),
                total,
            });
        }
        self
    }

    pub fn id(&self) -> CriterionId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.id.label()
    }

    pub fn pass(&self) -> bool {
        self.pass
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn threshold(&self) -> &str {
        &self.threshold
    }

    pub fn sub_aspects(&self) -> Option<SubAspects> {
        self.sub_aspects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_value_never_passes() {
        let c = Criterion::evaluate(CriterionId::Roic, None, ">= 12%", |_| true);
        assert!(!c.pass());
        assert!(c.value().is_none());

        let c = Criterion::new(CriterionId::Roe, true, None, ">= 15%");
        assert!(!c.pass());
    }

    #[test]
    fn test_non_finite_value_is_dropped() {
        let c = Criterion::evaluate(CriterionId::NetMargin, Some(f64::NAN), ">= 10%", |_| true);
        assert!(!c.pass());
        assert!(c.value().is_none());
    }

    #[test]
    fn test_catalogue_keys_are_unique() {
        let mut keys: Vec<&str> = CriterionId::ALL.iter().map(|c| c.key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), CriterionId::ALL.len());
    }

    #[test]
    fn test_sub_aspects_clamped() {
        let c =
            Criterion::new(CriterionId::Roic, true, Some(20.0), ">= 12%").with_sub_aspects(5, 3);
        assert_eq!(c.sub_aspects(), Some(SubAspects { fulfilled: 3, total: 3 }));
    }
}
