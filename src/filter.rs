use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use rusqlite::types::Value;
use tokio::sync::watch;

use std::{collections::BTreeSet, fmt::Display, str::FromStr};

/// SQL conditions joined with `AND`, each carrying the values for its `?`
/// placeholders.
///
/// Parameters are kept in the same order as the placeholders they bind, so
/// conditions can be built up piece by piece without losing track of which
/// value goes where.
///
/// ```
/// # use gymstats::Conditions;
/// # use rusqlite::types::Value;
/// let mut conditions = Conditions::new();
/// conditions.push("gym_id = ?", [Value::Integer(1)]).unwrap();
/// conditions.push_in("category_id", [Value::Integer(2), Value::Integer(3)]).unwrap();
/// assert_eq!(conditions.to_sql(), "gym_id = ? AND category_id IN (?, ?)");
/// assert_eq!(conditions.params().len(), 3);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Conditions {
    fragments: Vec<String>,
    params: Vec<Value>,
}

impl Conditions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `fragment`, binding `params` to its placeholders.
    ///
    /// # Errors
    ///
    /// Returns an error if the number of `?` placeholders in `fragment` is
    /// not the number of `params`.
    pub fn push(
        &mut self,
        fragment: impl Into<String>,
        params: impl IntoIterator<Item = Value>,
    ) -> Result<()> {
        let fragment = fragment.into();
        let params: Vec<Value> = params.into_iter().collect();
        let placeholders = fragment.matches('?').count();
        if placeholders != params.len() {
            bail!(
                "condition {fragment:?} has {placeholders} placeholders but {} parameters",
                params.len()
            );
        }
        self.fragments.push(fragment);
        self.params.extend(params);
        Ok(())
    }

    /// Adds `column IN (?, ...)` with one placeholder per value.
    ///
    /// # Errors
    ///
    /// Returns an error if `values` is empty.
    pub fn push_in(&mut self, column: &str, values: impl IntoIterator<Item = Value>) -> Result<()> {
        let values: Vec<Value> = values.into_iter().collect();
        if values.is_empty() {
            bail!("empty IN list for {column}");
        }
        let fragment = format!("{column} IN ({})", placeholders(values.len()));
        self.push(fragment, values)
    }

    /// Appends all of `other`'s conditions after this one's.
    pub fn extend(&mut self, other: Self) {
        self.fragments.extend(other.fragments);
        self.params.extend(other.params);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    #[must_use]
    pub fn to_sql(&self) -> String {
        self.fragments.join(" AND ")
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// A complete parameterized statement.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Query {
    /// Starts a query from `head`, typically `SELECT ... FROM ...`.
    #[must_use]
    pub fn new(head: &str) -> Self {
        Self {
            sql: head.to_string(),
            params: Vec::new(),
        }
    }

    /// Starts a query whose `head` itself has placeholders.
    ///
    /// # Errors
    ///
    /// Returns an error if the placeholder count in `head` is not the number
    /// of `params`.
    pub fn with_params(head: &str, params: impl IntoIterator<Item = Value>) -> Result<Self> {
        let params: Vec<Value> = params.into_iter().collect();
        let placeholders = head.matches('?').count();
        if placeholders != params.len() {
            bail!(
                "query has {placeholders} placeholders but {} parameters",
                params.len()
            );
        }
        Ok(Self {
            sql: head.to_string(),
            params,
        })
    }

    /// Adds a `WHERE` clause, unless `conditions` is empty.
    #[must_use]
    pub fn filter(mut self, conditions: Conditions) -> Self {
        if !conditions.is_empty() {
            self.sql.push_str(" WHERE ");
            self.sql.push_str(&conditions.to_sql());
            self.params.extend(conditions.params);
        }
        self
    }

    #[must_use]
    pub fn suffix(mut self, tail: &str) -> Self {
        self.sql.push(' ');
        self.sql.push_str(tail);
        self
    }
}

/// A calendar month of a particular year, written `YYYY-MM`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// # Errors
    ///
    /// Returns an error if `month` is not in `1..=12`.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            bail!("month {month} out of range 1-12");
        }
        Ok(Self { year, month })
    }

    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    #[must_use]
    pub const fn month(&self) -> u32 {
        self.month
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl From<NaiveDate> for YearMonth {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let re = Regex::new(r"^(\d{4})-(\d{1,2})$")?;
        let Some(caps) = re.captures(s.trim()) else {
            bail!("{s:?}: expected a month as YYYY-MM");
        };
        let year: i32 = caps[1].parse().with_context(|| format!("{s:?}: bad year"))?;
        let month: u32 = caps[2].parse().with_context(|| format!("{s:?}: bad month"))?;
        Self::new(year, month).with_context(|| format!("{s:?}"))
    }
}

/// The date restriction applied to `created_at` columns.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DateFilter {
    /// No restriction: all history.
    #[default]
    All,
    /// Rows created on this calendar date.
    Day(NaiveDate),
    /// Rows created in this month of this year.
    Month(YearMonth),
    /// Rows created between the two dates, both inclusive.
    Range(NaiveDate, NaiveDate),
}

impl DateFilter {
    /// Builds the condition restricting the timestamp `column`.
    ///
    /// # Errors
    ///
    /// Never in practice; each fragment is written with its own parameters.
    pub fn conditions(&self, column: &str) -> Result<Conditions> {
        let mut conditions = Conditions::new();
        match self {
            Self::All => {}
            Self::Day(day) => conditions.push(format!("DATE({column}) = ?"), [text(day)])?,
            Self::Month(ym) => {
                conditions.push(
                    format!("strftime('%m', {column}) = ?"),
                    [Value::Text(format!("{:02}", ym.month()))],
                )?;
                conditions.push(
                    format!("strftime('%Y', {column}) = ?"),
                    [Value::Text(format!("{:04}", ym.year()))],
                )?;
            }
            Self::Range(start, end) => conditions.push(
                format!("DATE({column}) BETWEEN ? AND ?"),
                [text(start), text(end)],
            )?,
        }
        Ok(conditions)
    }
}

fn text(value: impl Display) -> Value {
    Value::Text(value.to_string())
}

/// A resolved filter: a date restriction plus an optional category subset.
///
/// An empty category set means no category restriction at all.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Filter {
    pub date: DateFilter,
    pub categories: BTreeSet<i64>,
}

impl Filter {
    /// # Errors
    ///
    /// See [`DateFilter::conditions`].
    pub fn date_conditions(&self, column: &str) -> Result<Conditions> {
        self.date.conditions(column)
    }

    /// Restricts invoices (aliased `invoice`) to those with at least one line
    /// whose product is in a selected category.
    ///
    /// Each invoice is matched at most once however many of its lines match.
    ///
    /// # Errors
    ///
    /// Never in practice; placeholders are generated from the category set.
    pub fn invoice_category_conditions(&self, invoice: &str) -> Result<Conditions> {
        let mut conditions = Conditions::new();
        if !self.categories.is_empty() {
            conditions.push(
                format!(
                    "EXISTS (SELECT 1 FROM invoice_items ii JOIN products cp ON cp.id = ii.product_id \
                     WHERE ii.invoice_id = {invoice}.id AND cp.category_id IN ({}))",
                    placeholders(self.categories.len())
                ),
                self.category_values(),
            )?;
        }
        Ok(conditions)
    }

    /// Restricts rows whose product reference is `product_column` to products
    /// in a selected category. Rows with no product never match a non-empty
    /// selection.
    ///
    /// # Errors
    ///
    /// Never in practice; placeholders are generated from the category set.
    pub fn product_category_conditions(&self, product_column: &str) -> Result<Conditions> {
        let mut conditions = Conditions::new();
        if !self.categories.is_empty() {
            conditions.push(
                format!(
                    "{product_column} IN (SELECT cp.id FROM products cp WHERE cp.category_id IN ({}))",
                    placeholders(self.categories.len())
                ),
                self.category_values(),
            )?;
        }
        Ok(conditions)
    }

    fn category_values(&self) -> Vec<Value> {
        self.categories.iter().map(|id| Value::Integer(*id)).collect()
    }
}

/// Which kind of date restriction the user is editing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FilterMode {
    Day,
    Month,
    #[default]
    Range,
}

impl FromStr for FilterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            "range" => Ok(Self::Range),
            other => bail!("unknown filter mode {other:?} (expected day, month or range)"),
        }
    }
}

/// Holds the filter inputs as the user edits them, and publishes the
/// resolved [`Filter`] whenever an edit changes it.
///
/// Inputs for modes other than the active one are kept, so switching back
/// and forth between modes does not lose them.
#[derive(Debug)]
pub struct FilterController {
    mode: FilterMode,
    day: Option<NaiveDate>,
    month: Option<YearMonth>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    categories: BTreeSet<i64>,
    changes: watch::Sender<Filter>,
}

impl Default for FilterController {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: FilterMode::default(),
            day: None,
            month: None,
            start: None,
            end: None,
            categories: BTreeSet::new(),
            changes: watch::Sender::new(Filter::default()),
        }
    }

    /// Returns a receiver that sees every change to the resolved filter.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Filter> {
        self.changes.subscribe()
    }

    #[must_use]
    pub const fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: FilterMode) {
        self.mode = mode;
        self.publish();
    }

    pub fn set_day(&mut self, day: Option<NaiveDate>) {
        self.day = day;
        self.publish();
    }

    pub fn set_month(&mut self, month: Option<YearMonth>) {
        self.month = month;
        self.publish();
    }

    pub fn set_start(&mut self, start: Option<NaiveDate>) {
        self.start = start;
        self.publish();
    }

    pub fn set_end(&mut self, end: Option<NaiveDate>) {
        self.end = end;
        self.publish();
    }

    /// Selects `id` if it is not selected, and deselects it otherwise.
    pub fn toggle_category(&mut self, id: i64) {
        if !self.categories.remove(&id) {
            self.categories.insert(id);
        }
        self.publish();
    }

    pub fn set_categories(&mut self, ids: impl IntoIterator<Item = i64>) {
        self.categories = ids.into_iter().collect();
        self.publish();
    }

    /// Forgets every date and category input. The mode is kept.
    pub fn clear(&mut self) {
        self.day = None;
        self.month = None;
        self.start = None;
        self.end = None;
        self.categories.clear();
        self.publish();
    }

    /// Resolves the inputs of the active mode into a [`Filter`].
    ///
    /// A mode whose inputs are incomplete (no day, no month, or a range
    /// missing either bound) does not restrict dates.
    #[must_use]
    pub fn filter(&self) -> Filter {
        let date = match self.mode {
            FilterMode::Day => self.day.map_or(DateFilter::All, DateFilter::Day),
            FilterMode::Month => self.month.map_or(DateFilter::All, DateFilter::Month),
            FilterMode::Range => match (self.start, self.end) {
                (Some(start), Some(end)) => DateFilter::Range(start, end),
                _ => DateFilter::All,
            },
        };
        Filter {
            date,
            categories: self.categories.clone(),
        }
    }

    fn publish(&self) {
        let next = self.filter();
        self.changes.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn push_fn_rejects_placeholder_mismatch() {
        let mut conditions = Conditions::new();
        assert!(conditions.push("a = ? AND b = ?", [Value::Integer(1)]).is_err());
        assert!(conditions.is_empty());
    }

    #[test]
    fn push_in_fn_rejects_empty_list() {
        let mut conditions = Conditions::new();
        assert!(conditions.push_in("id", []).is_err());
    }

    #[test]
    fn query_filter_fn_appends_where_clause_and_params_in_order() {
        let mut conditions = Conditions::new();
        conditions.push("s.gym_id = ?", [Value::Integer(7)]).unwrap();
        let range = DateFilter::Range(date("2024-01-01"), date("2024-01-31"));
        conditions.extend(range.conditions("s.created_at").unwrap());
        let query = Query::new("SELECT COUNT(*) FROM subscribers s").filter(conditions);
        assert_eq!(
            query.sql,
            "SELECT COUNT(*) FROM subscribers s WHERE s.gym_id = ? AND DATE(s.created_at) BETWEEN ? AND ?"
        );
        assert_eq!(
            query.params,
            vec![
                Value::Integer(7),
                Value::Text("2024-01-01".into()),
                Value::Text("2024-01-31".into()),
            ]
        );
    }

    #[test]
    fn query_filter_fn_omits_where_for_no_conditions() {
        let query = Query::new("SELECT 1").filter(Conditions::new());
        assert_eq!(query.sql, "SELECT 1");
        assert!(query.params.is_empty());
    }

    #[test]
    fn with_params_fn_checks_placeholders() {
        assert!(Query::with_params("SELECT ?", []).is_err());
        let query = Query::with_params("SELECT ?", [Value::Integer(5)]).unwrap();
        assert_eq!(query.params, vec![Value::Integer(5)]);
    }

    #[test]
    fn day_filter_matches_calendar_date() {
        let conditions = DateFilter::Day(date("2024-05-03"))
            .conditions("i.created_at")
            .unwrap();
        assert_eq!(conditions.to_sql(), "DATE(i.created_at) = ?");
        assert_eq!(conditions.params(), &[Value::Text("2024-05-03".into())]);
    }

    #[test]
    fn month_filter_binds_month_then_year() {
        let month = DateFilter::Month(YearMonth::new(2024, 5).unwrap());
        let conditions = month.conditions("created_at").unwrap();
        assert_eq!(
            conditions.to_sql(),
            "strftime('%m', created_at) = ? AND strftime('%Y', created_at) = ?"
        );
        assert_eq!(
            conditions.params(),
            &[Value::Text("05".into()), Value::Text("2024".into())]
        );
    }

    #[test]
    fn all_filter_has_no_conditions() {
        assert!(DateFilter::All.conditions("created_at").unwrap().is_empty());
    }

    #[test]
    fn year_month_parses_and_displays() {
        let ym: YearMonth = "2024-5".parse().unwrap();
        assert_eq!(ym.to_string(), "2024-05");
        assert!(ym.contains(date("2024-05-31")));
        assert!(!ym.contains(date("2023-05-31")));
        assert!("2024-13".parse::<YearMonth>().is_err());
        assert!("May 2024".parse::<YearMonth>().is_err());
    }

    #[test]
    fn category_conditions_are_empty_without_selection() {
        let filter = Filter::default();
        assert!(filter.invoice_category_conditions("i").unwrap().is_empty());
        assert!(filter.product_category_conditions("x.product_id").unwrap().is_empty());
    }

    #[test]
    fn invoice_category_conditions_bind_each_category() {
        let filter = Filter {
            categories: BTreeSet::from([3, 1]),
            ..Filter::default()
        };
        let conditions = filter.invoice_category_conditions("i").unwrap();
        assert!(conditions.to_sql().contains("ii.invoice_id = i.id"));
        assert!(conditions.to_sql().ends_with("cp.category_id IN (?, ?))"));
        assert_eq!(conditions.params(), &[Value::Integer(1), Value::Integer(3)]);
    }

    #[test]
    fn controller_defaults_to_unrestricted_range() {
        let controller = FilterController::new();
        assert_eq!(controller.mode(), FilterMode::Range);
        assert_eq!(controller.filter(), Filter::default());
    }

    #[test]
    fn controller_ignores_range_with_one_bound() {
        let mut controller = FilterController::new();
        controller.set_start(Some(date("2024-05-01")));
        assert_eq!(controller.filter().date, DateFilter::All);
        controller.set_end(Some(date("2024-05-31")));
        assert_eq!(
            controller.filter().date,
            DateFilter::Range(date("2024-05-01"), date("2024-05-31"))
        );
    }

    #[test]
    fn controller_resolves_active_mode_only() {
        let mut controller = FilterController::new();
        controller.set_day(Some(date("2024-05-03")));
        controller.set_month(Some(YearMonth::new(2024, 6).unwrap()));
        assert_eq!(controller.filter().date, DateFilter::All);
        controller.set_mode(FilterMode::Day);
        assert_eq!(controller.filter().date, DateFilter::Day(date("2024-05-03")));
        controller.set_mode(FilterMode::Month);
        assert_eq!(
            controller.filter().date,
            DateFilter::Month(YearMonth::new(2024, 6).unwrap())
        );
    }

    #[test]
    fn controller_toggles_categories_and_clears() {
        let mut controller = FilterController::new();
        controller.toggle_category(2);
        controller.toggle_category(4);
        controller.toggle_category(2);
        assert_eq!(controller.filter().categories, BTreeSet::from([4]));
        controller.set_mode(FilterMode::Day);
        controller.set_day(Some(date("2024-05-03")));
        controller.clear();
        assert_eq!(controller.mode(), FilterMode::Day);
        assert_eq!(controller.filter(), Filter::default());
    }

    #[test]
    fn controller_publishes_only_real_changes() {
        let mut controller = FilterController::new();
        let mut rx = controller.subscribe();
        controller.set_start(Some(date("2024-05-01")));
        assert!(!rx.has_changed().unwrap(), "incomplete range changes nothing");
        controller.set_end(Some(date("2024-05-31")));
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().date,
            DateFilter::Range(date("2024-05-01"), date("2024-05-31"))
        );
        controller.set_categories([]);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn filter_mode_parses() {
        assert_eq!("Month".parse::<FilterMode>().unwrap(), FilterMode::Month);
        assert!("week".parse::<FilterMode>().is_err());
    }
}
