#![doc = include_str!("../README.md")]

pub mod dashboard;
pub mod events;
pub mod filter;
pub mod inventory;
pub mod metrics;
pub mod money;
pub mod report;
pub mod store;

pub use dashboard::{Dashboard, Gym, Refresh};
pub use events::{AppEvent, EventBus};
pub use filter::{Conditions, DateFilter, Filter, FilterController, FilterMode, Query, YearMonth};
pub use inventory::{Branch, ProductStock, QuantityStatus, StockLevels, LOW_STOCK_THRESHOLD};
pub use metrics::RawAggregates;
pub use money::Dzd;
pub use report::{DashboardStats, Percent};
pub use store::{DataStore, Row, SqliteStore};
