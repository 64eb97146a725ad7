use tokio::sync::broadcast;
use tracing::trace;

/// Application-wide notifications, delivered to every subscriber.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AppEvent {
    /// Ask whichever front end is listening to open the quick sale form.
    OpenQuickSale { gym_id: i64 },
    /// The dashboard applied a fresh statistics record.
    StatsRefreshed { gym_id: i64, token: u64 },
}

/// A typed publish/subscribe channel for [`AppEvent`]s.
///
/// Cloning the bus gives another handle to the same channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus {
    /// Creates a bus that buffers up to `capacity` events for slow
    /// subscribers before they start missing the oldest ones.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Sends `event` to all current subscribers and returns how many there
    /// were. Nobody listening is not an error.
    pub fn publish(&self, event: AppEvent) -> usize {
        trace!(?event, "publishing");
        self.sender.send(event).unwrap_or(0)
    }
}
