// ── Event dispatch ──
//
// Fan-out of device events to listeners. Each subscriber owns a bounded
// queue; callback listeners additionally get a delivery task that drains
// it. A slow subscriber only ever stalls its own queue.

mod filter;
mod stream;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use crate::model::DeviceEvent;

pub use filter::EventFilter;
pub use stream::EventStream;

/// Callback-style event consumer.
///
/// Called from a delivery task owned by the dispatcher, never from the
/// thread that produced the event.
pub trait DeviceListener: Send + Sync + 'static {
    fn event(&self, event: &DeviceEvent);
}

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct Route {
    filter: EventFilter,
    tx: mpsc::Sender<Arc<DeviceEvent>>,
}

/// Ordered, bounded fan-out of [`DeviceEvent`]s.
pub struct EventDispatcher {
    routes: DashMap<ListenerId, Arc<Route>>,
    next_id: AtomicU64,
    capacity: usize,
    /// Serializes `post` so every subscriber sees one global order.
    post_lock: Mutex<()>,
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            routes: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            post_lock: Mutex::new(()),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.routes.len()
    }

    /// Register a callback listener. Must be called within a Tokio runtime.
    pub fn add_listener(&self, listener: Arc<dyn DeviceListener>, filter: EventFilter) -> ListenerId {
        let (id, mut rx) = self.open(filter);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                listener.event(&event);
            }
            trace!(listener = %id, "delivery task finished");
        });
        id
    }

    /// Subscribe as a [`Stream`](futures_core::Stream) of events.
    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        let (id, rx) = self.open(filter);
        EventStream::new(id, ReceiverStream::new(rx))
    }

    /// Remove a subscription. Events already queued are still delivered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let removed = self.routes.remove(&id).is_some();
        if removed {
            debug!(listener = %id, "listener removed");
        }
        removed
    }

    fn open(&self, filter: EventFilter) -> (ListenerId, mpsc::Receiver<Arc<DeviceEvent>>) {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);
        debug!(listener = %id, filter = ?filter, "listener added");
        self.routes.insert(id, Arc::new(Route { filter, tx }));
        (id, rx)
    }

    /// Deliver `events`, in order, to every matching subscriber.
    ///
    /// Hands off without waiting while queues have room; waits only on
    /// queues that are full.
    pub async fn post<I>(&self, events: I)
    where
        I: IntoIterator<Item = DeviceEvent>,
    {
        let _ordered = self.post_lock.lock().await;
        let routes: Vec<(ListenerId, Arc<Route>)> = self
            .routes
            .iter()
            .map(|r| (*r.key(), Arc::clone(r.value())))
            .collect();

        for event in events {
            let event = Arc::new(event);
            trace!(device = %event.device_id(), event_type = %event.event_type, "posting event");

            let mut full = Vec::new();
            for (id, route) in &routes {
                if !route.filter.matches(&event) {
                    continue;
                }
                match route.tx.try_send(Arc::clone(&event)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(ev)) => full.push((*id, route, ev)),
                    Err(mpsc::error::TrySendError::Closed(_)) => self.drop_route(*id),
                }
            }

            for (id, route, ev) in full {
                if route.tx.send(ev).await.is_err() {
                    self.drop_route(id);
                }
            }
        }
    }

    fn drop_route(&self, id: ListenerId) {
        if self.routes.remove(&id).is_some() {
            debug!(listener = %id, "subscriber gone; route dropped");
        }
    }
}
