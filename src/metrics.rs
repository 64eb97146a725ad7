//! The fixed set of aggregate queries behind the dashboard.
//!
//! Every query is scoped to one gym and to the active date filter, except the
//! product counts, which cover the whole catalogue. The category subset only
//! narrows regular sales and internal sales.

use anyhow::{Context, Result};
use rusqlite::types::Value;

use crate::{
    filter::{Conditions, Filter, Query},
    inventory::LOW_STOCK_THRESHOLD,
    money::Dzd,
    store::{first_row, DataStore, Row},
};

/// Raw figures read from the database, before any derived metric is
/// computed. Absent rows and `NULL` sums are already zero here.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RawAggregates {
    pub total_subscribers: i64,
    pub active_subscribers: i64,
    pub expiring_subscribers: i64,
    pub total_products: i64,
    pub low_stock_products: i64,
    pub total_sales: i64,
    pub sales_revenue: Dzd,
    pub sales_profit: Dzd,
    pub single_session_count: i64,
    pub single_session_revenue: Dzd,
    pub subscription_revenue: Dzd,
    pub internal_sales_profit: Dzd,
}

fn scope(table: &str, gym_id: i64, filter: &Filter) -> Result<Conditions> {
    let mut conditions = Conditions::new();
    conditions.push(format!("{table}.gym_id = ?"), [Value::Integer(gym_id)])?;
    conditions.extend(filter.date_conditions(&format!("{table}.created_at"))?);
    Ok(conditions)
}

/// Subscriber head counts by status.
///
/// # Errors
///
/// Returns an error if the query cannot be built.
pub fn subscriber_counts(gym_id: i64, filter: &Filter) -> Result<Query> {
    Ok(Query::new(
        "SELECT COUNT(*) AS total, \
         COALESCE(SUM(CASE WHEN s.status = 'active' THEN 1 ELSE 0 END), 0) AS active, \
         COALESCE(SUM(CASE WHEN s.status = 'expiring' THEN 1 ELSE 0 END), 0) AS expiring \
         FROM subscribers s",
    )
    .filter(scope("s", gym_id, filter)?))
}

/// Catalogue size and the number of products whose stock, across both
/// branches, is below [`LOW_STOCK_THRESHOLD`].
///
/// # Errors
///
/// Returns an error if the query cannot be built.
pub fn product_counts() -> Result<Query> {
    Query::with_params(
        "SELECT COUNT(*) AS total, \
         COALESCE(SUM(CASE WHEN p.male_gym_quantity + p.female_gym_quantity < ? THEN 1 ELSE 0 END), 0) AS low_stock \
         FROM products p",
        [Value::Integer(LOW_STOCK_THRESHOLD)],
    )
}

/// Regular (not single-session) invoices: count, revenue and profit.
///
/// # Errors
///
/// Returns an error if the query cannot be built.
pub fn sales_totals(gym_id: i64, filter: &Filter) -> Result<Query> {
    let mut conditions = scope("i", gym_id, filter)?;
    conditions.push("i.is_single_session = 0", [])?;
    conditions.extend(filter.invoice_category_conditions("i")?);
    Ok(Query::new(
        "SELECT COUNT(*) AS total_sales, \
         COALESCE(SUM(i.total), 0) AS revenue, \
         COALESCE(SUM(i.profit), 0) AS profit \
         FROM invoices i",
    )
    .filter(conditions))
}

/// Single-session invoices: count and revenue. Not narrowed by category,
/// since a session sale has no product lines.
///
/// # Errors
///
/// Returns an error if the query cannot be built.
pub fn single_session_totals(gym_id: i64, filter: &Filter) -> Result<Query> {
    let mut conditions = scope("i", gym_id, filter)?;
    conditions.push("i.is_single_session = 1", [])?;
    Ok(Query::new(
        "SELECT COUNT(*) AS session_count, COALESCE(SUM(i.total), 0) AS revenue FROM invoices i",
    )
    .filter(conditions))
}

/// Money paid for subscriptions created in scope.
///
/// # Errors
///
/// Returns an error if the query cannot be built.
pub fn subscription_revenue(gym_id: i64, filter: &Filter) -> Result<Query> {
    Ok(
        Query::new("SELECT COALESCE(SUM(s.price_paid), 0) AS revenue FROM subscribers s")
            .filter(scope("s", gym_id, filter)?),
    )
}

/// Profit from internal sales.
///
/// # Errors
///
/// Returns an error if the query cannot be built.
pub fn internal_sales_profit(gym_id: i64, filter: &Filter) -> Result<Query> {
    let mut conditions = scope("x", gym_id, filter)?;
    conditions.extend(filter.product_category_conditions("x.product_id")?);
    Ok(
        Query::new("SELECT COALESCE(SUM(x.profit), 0) AS profit FROM internal_sales x")
            .filter(conditions),
    )
}

async fn fetch<S: DataStore + ?Sized>(store: &S, name: &str, query: Query) -> Result<Row> {
    let rows = store
        .query(&query.sql, &query.params)
        .await
        .with_context(|| format!("loading {name}"))?;
    Ok(first_row(rows))
}

/// Runs the whole query set for `gym_id` under `filter`.
///
/// # Errors
///
/// Returns the first error from the data store; no partial result is
/// returned.
pub async fn collect<S: DataStore + ?Sized>(
    store: &S,
    gym_id: i64,
    filter: &Filter,
) -> Result<RawAggregates> {
    let subscribers = fetch(store, "subscriber counts", subscriber_counts(gym_id, filter)?).await?;
    let products = fetch(store, "product counts", product_counts()?).await?;
    let sales = fetch(store, "sales totals", sales_totals(gym_id, filter)?).await?;
    let sessions = fetch(
        store,
        "single session totals",
        single_session_totals(gym_id, filter)?,
    )
    .await?;
    let subscriptions = fetch(
        store,
        "subscription revenue",
        subscription_revenue(gym_id, filter)?,
    )
    .await?;
    let internal = fetch(
        store,
        "internal sales profit",
        internal_sales_profit(gym_id, filter)?,
    )
    .await?;

    Ok(RawAggregates {
        total_subscribers: subscribers.int("total")?,
        active_subscribers: subscribers.int("active")?,
        expiring_subscribers: subscribers.int("expiring")?,
        total_products: products.int("total")?,
        low_stock_products: products.int("low_stock")?,
        total_sales: sales.int("total_sales")?,
        sales_revenue: sales.money("revenue")?,
        sales_profit: sales.money("profit")?,
        single_session_count: sessions.int("session_count")?,
        single_session_revenue: sessions.money("revenue")?,
        subscription_revenue: subscriptions.money("revenue")?,
        internal_sales_profit: internal.money("profit")?,
    })
}
