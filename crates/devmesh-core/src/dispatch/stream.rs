// ── Event subscription stream ──

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio_stream::wrappers::ReceiverStream;

use super::ListenerId;
use crate::model::DeviceEvent;

/// Events matching a subscription's filter, in emission order.
///
/// Dropping the stream ends the subscription.
pub struct EventStream {
    id: ListenerId,
    inner: ReceiverStream<Arc<DeviceEvent>>,
}

impl EventStream {
    pub(crate) fn new(id: ListenerId, inner: ReceiverStream<Arc<DeviceEvent>>) -> Self {
        Self { id, inner }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Wait for the next event. `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Arc<DeviceEvent>> {
        self.inner.as_mut().recv().await
    }
}

impl Stream for EventStream {
    type Item = Arc<DeviceEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
