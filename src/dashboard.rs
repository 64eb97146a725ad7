use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    events::{AppEvent, EventBus},
    filter::Filter,
    inventory::Branch,
    metrics,
    report::DashboardStats,
    store::DataStore,
};

/// The gym whose figures are on screen.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Gym {
    pub id: i64,
    pub name: String,
    pub branch: Branch,
}

/// What became of one [`Dashboard::refresh`] call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Refresh {
    /// The new record replaced the old one.
    Applied(u64),
    /// A later refresh started before this one finished, so its result was
    /// dropped.
    Superseded(u64),
    /// The data store failed; the previous record was kept.
    Failed(String),
}

/// Holds the current statistics record and recomputes it on request.
///
/// Every refresh takes a token from a counter. A finished refresh only
/// replaces the record if no later refresh has started in the meantime, so a
/// slow, outdated computation can never overwrite a newer one.
#[derive(Debug)]
pub struct Dashboard<S> {
    store: Arc<S>,
    latest: AtomicU64,
    stats: watch::Sender<DashboardStats>,
    events: Option<EventBus>,
}

impl<S: DataStore + 'static> Dashboard<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            latest: AtomicU64::new(0),
            stats: watch::Sender::new(DashboardStats::default()),
            events: None,
        }
    }

    /// Publishes [`AppEvent::StatsRefreshed`] on `bus` after each applied
    /// refresh.
    #[must_use]
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// The record currently on display.
    #[must_use]
    pub fn stats(&self) -> DashboardStats {
        *self.stats.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DashboardStats> {
        self.stats.subscribe()
    }

    /// Recomputes the statistics for `gym_id` under `filter`.
    ///
    /// Errors never escape: they are logged, and the record on display stays
    /// as it was (all zeroes if nothing has loaded yet).
    pub async fn refresh(&self, gym_id: i64, filter: &Filter) -> Refresh {
        let token = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let raw = match metrics::collect(&*self.store, gym_id, filter).await {
            Ok(raw) => raw,
            Err(err) => {
                error!(gym_id, token, "loading dashboard stats: {err:#}");
                return Refresh::Failed(format!("{err:#}"));
            }
        };
        let stats = DashboardStats::reduce(&raw);
        let applied = self.stats.send_if_modified(|current| {
            if self.latest.load(Ordering::SeqCst) == token {
                *current = stats;
                true
            } else {
                false
            }
        });
        if !applied {
            warn!(gym_id, token, "discarding stats from superseded refresh");
            return Refresh::Superseded(token);
        }
        info!(gym_id, token, "dashboard stats refreshed");
        if let Some(events) = &self.events {
            events.publish(AppEvent::StatsRefreshed { gym_id, token });
        }
        Refresh::Applied(token)
    }

    /// Refreshes once straight away and again whenever the gym or the filter
    /// changes, until either sender goes away.
    ///
    /// Each change starts its own refresh without waiting for the previous
    /// one; the token check keeps the newest result.
    pub fn follow(
        self: Arc<Self>,
        mut gym: watch::Receiver<Gym>,
        mut filter: watch::Receiver<Filter>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let gym_id = {
                    let gym = gym.borrow_and_update();
                    debug!(
                        gym_id = gym.id,
                        gym = %gym.name,
                        branch = %gym.branch,
                        "refreshing dashboard"
                    );
                    gym.id
                };
                let current = filter.borrow_and_update().clone();
                let dashboard = Arc::clone(&self);
                tokio::spawn(async move {
                    dashboard.refresh(gym_id, &current).await;
                });
                tokio::select! {
                    changed = gym.changed() => if changed.is_err() { break },
                    changed = filter.changed() => if changed.is_err() { break },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use rusqlite::types::Value;

    use std::{
        sync::atomic::AtomicBool,
        time::Duration,
    };

    use super::*;
    use crate::{
        filter::{FilterController, YearMonth},
        money::Dzd,
        store::{Row, SqliteStore},
    };

    /// Delegates to the fixture database until told to fail.
    struct FlakyStore {
        inner: SqliteStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl DataStore for FlakyStore {
        async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
            if self.failing.load(Ordering::SeqCst) {
                bail!("database is locked");
            }
            self.inner.query(sql, params).await
        }
    }

    /// Answers every query with one row whose figures equal the gym id, gym 1
    /// slowly and any other gym quickly.
    struct SlowForGymOne;

    #[async_trait]
    impl DataStore for SlowForGymOne {
        async fn query(&self, _sql: &str, params: &[Value]) -> Result<Vec<Row>> {
            let gym_id = match params.first() {
                Some(Value::Integer(id)) => *id,
                _ => 0,
            };
            let delay = if gym_id == 1 { 50 } else { 5 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(vec![["total", "active", "revenue", "profit"]
                .into_iter()
                .map(|col| (col.to_string(), Value::Integer(gym_id)))
                .collect()])
        }
    }

    fn flaky() -> FlakyStore {
        FlakyStore {
            inner: SqliteStore::fixture().unwrap(),
            failing: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn refresh_fn_applies_reduced_stats() {
        let dashboard = Dashboard::new(SqliteStore::fixture().unwrap());
        assert_eq!(dashboard.refresh(1, &Filter::default()).await, Refresh::Applied(1));
        let stats = dashboard.stats();
        assert_eq!(stats.total_revenue, Dzd::from_dinars(12_100));
        assert_eq!(stats.total_profit, Dzd::from_centimes(68_550));
        assert_eq!(stats.profit_margin.to_string(), "27.4%");
        assert_eq!(stats.renewal_rate.to_string(), "50.0%");
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_stats() {
        let dashboard = Dashboard::new(flaky());
        dashboard.refresh(1, &Filter::default()).await;
        let before = dashboard.stats();
        dashboard.store.failing.store(true, Ordering::SeqCst);
        let outcome = dashboard.refresh(2, &Filter::default()).await;
        assert!(matches!(outcome, Refresh::Failed(msg) if msg.contains("database is locked")));
        assert_eq!(dashboard.stats(), before);
    }

    #[tokio::test]
    async fn failed_first_load_leaves_zero_stats() {
        let store = flaky();
        store.failing.store(true, Ordering::SeqCst);
        let dashboard = Dashboard::new(store);
        assert!(matches!(
            dashboard.refresh(1, &Filter::default()).await,
            Refresh::Failed(_)
        ));
        assert_eq!(dashboard.stats(), DashboardStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_outdated_refresh_does_not_overwrite_newer_one() {
        let dashboard = Dashboard::new(SlowForGymOne);
        let filter = Filter::default();
        let (old, new) = tokio::join!(dashboard.refresh(1, &filter), dashboard.refresh(2, &filter));
        assert_eq!(old, Refresh::Superseded(1));
        assert_eq!(new, Refresh::Applied(2));
        assert_eq!(dashboard.stats().total_subscribers, 2);
    }

    #[tokio::test]
    async fn applied_refresh_publishes_event() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let dashboard = Dashboard::new(SqliteStore::fixture().unwrap()).with_events(bus);
        dashboard.refresh(1, &Filter::default()).await;
        assert_eq!(
            events.recv().await.unwrap(),
            AppEvent::StatsRefreshed { gym_id: 1, token: 1 }
        );
    }

    #[tokio::test]
    async fn follow_fn_refreshes_on_gym_and_filter_changes() {
        let dashboard = Arc::new(Dashboard::new(SqliteStore::fixture().unwrap()));
        let mut stats = dashboard.subscribe();
        let (gym_tx, gym_rx) = watch::channel(Gym {
            id: 1,
            name: "Main".into(),
            branch: Branch::Male,
        });
        let mut controller = FilterController::new();
        let follower = Arc::clone(&dashboard).follow(gym_rx, controller.subscribe());

        let within = Duration::from_secs(5);
        tokio::time::timeout(within, stats.wait_for(|s| s.total_subscribers == 4))
            .await
            .unwrap()
            .unwrap();

        controller.set_mode(crate::filter::FilterMode::Month);
        controller.set_month(Some(YearMonth::new(2024, 5).unwrap()));
        tokio::time::timeout(within, stats.wait_for(|s| s.total_subscribers == 2))
            .await
            .unwrap()
            .unwrap();

        gym_tx.send_modify(|gym| gym.id = 2);
        tokio::time::timeout(within, stats.wait_for(|s| s.total_subscribers == 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dashboard.stats().subscription_revenue, Dzd::from_dinars(4000));

        drop(gym_tx);
        tokio::time::timeout(within, follower).await.unwrap().unwrap();
    }
}
