use serde::Serialize;
use serde_with::SerializeDisplay;

use std::fmt::Display;

use crate::{metrics::RawAggregates, money::Dzd};

/// A percentage that may be undefined because its denominator was zero.
///
/// The full-precision value is kept; [`Display`] rounds to one decimal place,
/// halves away from zero, and shows an undefined percentage as `0%`.
///
/// ```
/// # use gymstats::Percent;
/// assert_eq!(Percent::ratio(150.0, 1000.0).to_string(), "15.0%");
/// assert_eq!(Percent::ratio(150.0, 0.0).to_string(), "0%");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, SerializeDisplay)]
pub struct Percent(Option<f64>);

impl Percent {
    /// Returns `part / whole * 100`, or an undefined percentage unless
    /// `whole` is positive.
    #[must_use]
    pub fn ratio(part: f64, whole: f64) -> Self {
        if whole > 0.0 {
            Self(Some(part * 100.0 / whole))
        } else {
            Self(None)
        }
    }

    /// The percentage, with undefined read as zero.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0.unwrap_or(0.0)
    }

    #[must_use]
    pub const fn is_defined(self) -> bool {
        self.0.is_some()
    }
}

impl Display for Percent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(value) => {
                let rounded = (value * 10.0).round() / 10.0;
                f.pad(&format!("{rounded:.1}%"))
            }
            None => f.pad("0%"),
        }
    }
}

/// The dashboard's statistics record.
///
/// Built from [`RawAggregates`] with [`DashboardStats::reduce`]. The default
/// value (all zeroes) is what the dashboard shows before its first load.
///
/// To get a printable version, use its [`Display`] implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_subscribers: i64,
    pub active_subscribers: i64,
    pub expiring_subscribers: i64,
    pub total_products: i64,
    pub low_stock_products: i64,
    pub total_revenue: Dzd,
    pub subscription_revenue: Dzd,
    pub sales_revenue: Dzd,
    pub single_session_revenue: Dzd,
    pub sales_profit: Dzd,
    pub internal_sales_profit: Dzd,
    pub total_profit: Dzd,
    pub total_sales: i64,
    pub single_session_count: i64,
    pub profit_margin: Percent,
    pub renewal_rate: Percent,
}

impl DashboardStats {
    /// Derives the composite figures from the raw aggregates.
    ///
    /// * Total profit is regular sales profit plus internal sales profit.
    /// * Total revenue is regular sales, subscriptions and single sessions;
    ///   each invoice sits in exactly one of the two invoice buckets.
    /// * Profit margin is total profit over regular sales revenue.
    /// * Renewal rate is active subscribers over all subscribers.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn reduce(raw: &RawAggregates) -> Self {
        let total_profit = raw.sales_profit + raw.internal_sales_profit;
        let total_revenue =
            raw.sales_revenue + raw.subscription_revenue + raw.single_session_revenue;
        Self {
            total_subscribers: raw.total_subscribers,
            active_subscribers: raw.active_subscribers,
            expiring_subscribers: raw.expiring_subscribers,
            total_products: raw.total_products,
            low_stock_products: raw.low_stock_products,
            total_revenue,
            subscription_revenue: raw.subscription_revenue,
            sales_revenue: raw.sales_revenue,
            single_session_revenue: raw.single_session_revenue,
            sales_profit: raw.sales_profit,
            internal_sales_profit: raw.internal_sales_profit,
            total_profit,
            total_sales: raw.total_sales,
            single_session_count: raw.single_session_count,
            profit_margin: Percent::ratio(total_profit.as_f64(), raw.sales_revenue.as_f64()),
            renewal_rate: Percent::ratio(
                raw.active_subscribers as f64,
                raw.total_subscribers as f64,
            ),
        }
    }

    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Total revenue", self.total_revenue.to_string()),
            ("Subscription revenue", self.subscription_revenue.to_string()),
            ("Sales revenue", self.sales_revenue.to_string()),
            ("Single session revenue", self.single_session_revenue.to_string()),
            ("Net profit", self.total_profit.to_string()),
            ("Profit margin", self.profit_margin.to_string()),
            ("Sales", self.total_sales.to_string()),
            ("Single sessions", self.single_session_count.to_string()),
            ("Subscribers", self.total_subscribers.to_string()),
            ("Active subscribers", self.active_subscribers.to_string()),
            ("Expiring subscribers", self.expiring_subscribers.to_string()),
            ("Renewal rate", self.renewal_rate.to_string()),
            ("Products", self.total_products.to_string()),
            ("Low stock products", self.low_stock_products.to_string()),
        ]
    }
}

impl From<RawAggregates> for DashboardStats {
    fn from(raw: RawAggregates) -> Self {
        Self::reduce(&raw)
    }
}

impl Display for DashboardStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows = self.rows();
        let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
        let value_width = rows.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        writeln!(f, "{:width$} {:>value_width$}", "Figure", "Value")?;
        let length = width + value_width + 1;
        writeln!(f, "{:-<length$}", "")?;
        for (name, value) in rows {
            writeln!(f, "{name:width$} {value:>value_width$}")?;
        }
        Ok(())
    }
}
