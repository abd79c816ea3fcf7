use screener_core::{
    CashFlowStatement, DerivedMetrics, IncomeStatement, ProfitabilityRecord, RawFinancials, Trend,
    RECENT_PROFITABILITY_YEARS,
};

use crate::math;

/// Window for the profitability record
const PROFITABILITY_WINDOW: usize = 10;
/// Enough fiscal years for the ten-year CAGR
const GROWTH_WINDOW: usize = 11;
const TREND_WINDOW: usize = 3;

fn pct(fraction: Option<f64>) -> Option<f64> {
    fraction.filter(|v| v.is_finite()).map(|v| v * 100.0)
}

/// One slot per fiscal year, most-recent-first, starting at the newest year in `items`.
///
/// Index `i` always holds fiscal year `newest - i`; a year the provider skipped
/// is `None`, so positional arithmetic (CAGR periods, trends) stays in years.
fn by_fiscal_year<T>(
    items: &[T],
    len: usize,
    year_of: impl Fn(&T) -> i32,
    value_of: impl Fn(&T) -> Option<f64>,
) -> Vec<Option<f64>> {
    let newest = match items.iter().map(&year_of).max() {
        Some(year) => year,
        None => return Vec::new(),
    };
    (0..len)
        .map(|offset| {
            let year = newest - offset as i32;
            items.iter().find(|item| year_of(*item) == year).and_then(&value_of)
        })
        .collect()
}

fn income_series(
    income: &[IncomeStatement],
    len: usize,
    value_of: impl Fn(&IncomeStatement) -> Option<f64>,
) -> Vec<Option<f64>> {
    by_fiscal_year(income, len, |is| is.fiscal_year, value_of)
}

/// Free cash flow for a year, falling back to OCF + capex (capex is reported negative)
fn free_cash_flow(cf: &CashFlowStatement) -> Option<f64> {
    cf.free_cash_flow.or_else(|| match (cf.operating_cash_flow, cf.capital_expenditure) {
        (Some(ocf), Some(capex)) => Some(ocf - capex.abs()),
        _ => None,
    })
}

/// FCF margin per fiscal year, most-recent-first
fn fcf_margins(income: &[IncomeStatement], cash_flows: &[CashFlowStatement]) -> Vec<Option<f64>> {
    income_series(income, TREND_WINDOW, |is| {
        let fcf = cash_flows
            .iter()
            .find(|cf| cf.fiscal_year == is.fiscal_year)
            .and_then(free_cash_flow);
        math::fcf_margin(fcf, is.revenue)
    })
}

/// Trend over the three most recent years; a gap in them leaves it undetermined
fn trend_of(series: &[Option<f64>]) -> Trend {
    let recent: Option<Vec<f64>> = series.iter().take(TREND_WINDOW).copied().collect();
    match recent {
        Some(values) => math::trend(&values),
        None => Trend::Undetermined,
    }
}

fn profitability(income: &[IncomeStatement]) -> Option<ProfitabilityRecord> {
    let net_income = income_series(income, PROFITABILITY_WINDOW, |is| {
        is.net_income.filter(|v| v.is_finite())
    });
    let years_observed = net_income.iter().flatten().count() as u32;
    if years_observed == 0 {
        return None;
    }

    let recent = &net_income[..RECENT_PROFITABILITY_YEARS as usize];
    Some(ProfitabilityRecord {
        years_observed,
        years_profitable: net_income.iter().flatten().filter(|ni| **ni > 0.0).count() as u32,
        recent_observed: recent.iter().flatten().count() as u32,
        recent_losses: recent.iter().flatten().filter(|ni| **ni <= 0.0).count() as u32,
    })
}

/// Compute the derived metrics for one security.
pub fn derive_metrics(raw: &RawFinancials) -> DerivedMetrics {
    let income = &raw.income_statements;
    let latest_income = income.first();
    let latest_balance = raw.balance_sheets.first();
    let ratios = raw.ratios_ttm.as_ref();
    let quote = raw.quote.as_ref();

    let eps_series = income_series(income, GROWTH_WINDOW, |is| is.eps);
    let revenue_series = income_series(income, GROWTH_WINDOW, |is| is.revenue);

    let fcf_series = fcf_margins(income, &raw.cash_flow_statements);
    let fcf_margin = fcf_series.first().copied().flatten();

    let roic_series =
        by_fiscal_year(&raw.key_metrics, TREND_WINDOW, |km| km.fiscal_year, |km| pct(km.roic));
    let recent_roic: Vec<f64> = roic_series.iter().flatten().copied().collect();
    let roic = math::median_of_three(&recent_roic)
        .or_else(|| roic_series.iter().flatten().next().copied());

    let roe = pct(ratios.and_then(|r| r.return_on_equity))
        .or_else(|| pct(raw.key_metrics.first().and_then(|km| km.roe)));

    let net_margin = latest_income
        .and_then(|is| math::net_margin(is.net_income, is.revenue.filter(|r| *r > 0.0)))
        .or_else(|| pct(ratios.and_then(|r| r.net_profit_margin)));

    // Negative EBITDA makes the leverage ratio meaningless rather than favourable
    let net_debt_to_ebitda = math::net_debt_to_ebitda(
        latest_balance.and_then(|b| b.total_debt),
        latest_balance.and_then(|b| b.cash_and_equivalents),
        latest_income.and_then(|is| is.ebitda).filter(|e| *e > 0.0),
    );

    let price = raw.price().filter(|p| p.is_finite() && *p > 0.0);
    let eps = latest_income.and_then(|is| is.eps).or_else(|| quote.and_then(|q| q.eps));
    let pe_ratio = ratios
        .and_then(|r| r.pe_ratio)
        .or_else(|| quote.and_then(|q| q.pe))
        .or_else(|| match (price, eps) {
            (Some(p), Some(e)) if e > 0.0 => Some(p / e),
            _ => None,
        })
        .filter(|v| v.is_finite());

    let shares = quote
        .and_then(|q| q.shares_outstanding)
        .or_else(|| latest_income.and_then(|is| is.weighted_average_shares));
    let intrinsic_value = math::intrinsic_value_estimate(
        eps,
        raw.key_metrics.first().and_then(|km| km.book_value_per_share),
        latest_income.and_then(|is| is.revenue),
        net_margin,
        shares,
    );
    let margin_of_safety = match (intrinsic_value, price) {
        (Some(iv), Some(p)) if iv > 0.0 => Some((iv - p) / iv * 100.0),
        _ => None,
    };

    DerivedMetrics {
        eps_cagr_3y: math::cagr(&eps_series, 3),
        eps_cagr_5y: math::cagr(&eps_series, 5),
        eps_cagr_10y: math::cagr(&eps_series, 10),
        revenue_cagr_3y: math::cagr(&revenue_series, 3),
        revenue_cagr_5y: math::cagr(&revenue_series, 5),
        revenue_cagr_10y: math::cagr(&revenue_series, 10),
        fcf_margin,
        fcf_margin_trend: trend_of(&fcf_series),
        roic,
        roic_trend: trend_of(&roic_series),
        roe,
        net_margin,
        net_debt_to_ebitda,
        pe_ratio,
        dividend_yield: pct(ratios.and_then(|r| r.dividend_yield)),
        profitability: profitability(income),
        price,
        intrinsic_value,
        margin_of_safety,
    }
}
