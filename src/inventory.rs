use anyhow::{bail, Result};
use rusqlite::types::Value;
use serde::Serialize;

use std::{collections::BTreeSet, fmt::Display, str::FromStr};

use crate::{
    filter::{Conditions, Query},
    store::DataStore,
};

/// Available quantity below which a product counts as low on stock.
pub const LOW_STOCK_THRESHOLD: i64 = 5;

pub const LOW_STOCK_LABEL: &str = "low stock";
pub const IN_STOCK_LABEL: &str = "in stock";

/// One of the two gym locations, each with its own stock counter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    #[default]
    Male,
    Female,
}

impl Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Male => "male",
            Self::Female => "female",
        })
    }
}

impl FromStr for Branch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            other => bail!("unknown branch {other:?} (expected male or female)"),
        }
    }
}

/// Returns the `products` column holding the stock count for `branch`.
#[must_use]
pub const fn quantity_column(branch: Branch) -> &'static str {
    match branch {
        Branch::Male => "male_gym_quantity",
        Branch::Female => "female_gym_quantity",
    }
}

/// The two per-branch stock counters of a product.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StockLevels {
    pub male_gym_quantity: i64,
    pub female_gym_quantity: i64,
}

impl StockLevels {
    /// Stock held across both branches.
    ///
    /// ```
    /// # use gymstats::StockLevels;
    /// let stock = StockLevels { male_gym_quantity: 3, female_gym_quantity: 4 };
    /// assert_eq!(stock.total_quantity(), 7);
    /// ```
    #[must_use]
    pub const fn total_quantity(&self) -> i64 {
        self.male_gym_quantity + self.female_gym_quantity
    }

    #[must_use]
    pub const fn available_quantity(&self, branch: Branch) -> i64 {
        match branch {
            Branch::Male => self.male_gym_quantity,
            Branch::Female => self.female_gym_quantity,
        }
    }

    /// Reports whether `branch` can supply `requested` units.
    ///
    /// `requested` is expected to be non-negative; zero is always satisfied.
    #[must_use]
    pub const fn has_sufficient_stock(&self, requested: i64, branch: Branch) -> bool {
        self.available_quantity(branch) >= requested
    }

    #[must_use]
    pub const fn quantity_status(&self, branch: Branch) -> QuantityStatus {
        let available = self.available_quantity(branch);
        let is_low_stock = available < LOW_STOCK_THRESHOLD;
        QuantityStatus {
            total: self.total_quantity(),
            available,
            is_low_stock,
            label: if is_low_stock {
                LOW_STOCK_LABEL
            } else {
                IN_STOCK_LABEL
            },
        }
    }
}

/// Stock summary of a product as seen from one branch.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct QuantityStatus {
    pub total: i64,
    pub available: i64,
    pub is_low_stock: bool,
    pub label: &'static str,
}

/// A product row with its stock counters.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ProductStock {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    #[serde(flatten)]
    pub stock: StockLevels,
}

/// Reads every product with its stock counters, ordered by name.
///
/// When `categories` is non-empty only products in those categories are
/// returned.
///
/// # Errors
///
/// Returns any error from the data store.
pub async fn load_stock<S: DataStore + ?Sized>(
    store: &S,
    categories: &BTreeSet<i64>,
) -> Result<Vec<ProductStock>> {
    let mut conditions = Conditions::new();
    if !categories.is_empty() {
        conditions.push_in("p.category_id", categories.iter().map(|id| Value::Integer(*id)))?;
    }
    let query = Query::new(
        "SELECT p.id, p.name, c.name AS category, p.male_gym_quantity, p.female_gym_quantity \
         FROM products p LEFT JOIN categories c ON c.id = p.category_id",
    )
    .filter(conditions)
    .suffix("ORDER BY p.name, p.id");
    let rows = store.query(&query.sql, &query.params).await?;
    rows.iter()
        .map(|row| {
            Ok(ProductStock {
                id: row.int("id")?,
                name: row.text("name")?,
                category: row.opt_text("category")?,
                stock: StockLevels {
                    male_gym_quantity: row.int("male_gym_quantity")?,
                    female_gym_quantity: row.int("female_gym_quantity")?,
                },
            })
        })
        .collect()
}
