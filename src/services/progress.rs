//! Per-job progress publish/subscribe.
//!
//! Built on `tokio::sync::broadcast`: publishing never blocks, and a
//! subscriber that falls more than `capacity` events behind loses the
//! oldest ones. Once a terminal event is published the sender is dropped,
//! which wakes every subscriber; later subscribers get only that terminal
//! event.

use futures::Stream;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::models::transaction::NormalizedTransaction;

/// The default number of buffered events per job.
pub const DEFAULT_CAPACITY: usize = 64;

/// Upper bound on a channel's buffer.
const MAX_CAPACITY: usize = 1 << 16;

/// One event on a job's progress channel, also the SSE payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress {
        percent: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Done {
        transactions: Arc<Vec<NormalizedTransaction>>,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }
}

struct Inner {
    sender: Option<broadcast::Sender<ProgressEvent>>,
    terminal: Option<ProgressEvent>,
}

/// A job-scoped progress channel. Cloning shares the same channel.
#[derive(Clone)]
pub struct ProgressChannel {
    inner: Arc<Mutex<Inner>>,
}

impl ProgressChannel {
    /// Creates a channel buffering `capacity` events, rounded up to a power of two.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.clamp(1, MAX_CAPACITY));
        Self {
            inner: Arc::new(Mutex::new(Inner {
                sender: Some(sender),
                terminal: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes an event. Returns `false` if the channel was already closed.
    ///
    /// Publishing a terminal event closes the channel.
    pub fn publish(&self, event: ProgressEvent) -> bool {
        let mut inner = self.lock();

        let Some(sender) = inner.sender.as_ref() else {
            tracing::debug!("Progress event after close dropped: {:?}", event);
            return false;
        };

        // No receivers is fine: nobody is listening right now.
        let _ = sender.send(event.clone());

        if event.is_terminal() {
            inner.sender = None;
            inner.terminal = Some(event);
        }

        true
    }

    /// Attaches a new subscriber.
    pub fn subscribe(&self) -> ProgressSubscription {
        let inner = self.lock();

        match (&inner.sender, &inner.terminal) {
            (Some(sender), _) => ProgressSubscription::Live(sender.subscribe()),
            (None, terminal) => ProgressSubscription::Finished(terminal.clone()),
        }
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.lock().sender.is_none()
    }
}

/// The receiving side of a [`ProgressChannel`].
pub enum ProgressSubscription {
    Live(broadcast::Receiver<ProgressEvent>),
    Finished(Option<ProgressEvent>),
}

impl ProgressSubscription {
    /// Waits for the next event; `None` once the channel is closed and drained.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        match self {
            ProgressSubscription::Finished(terminal) => terminal.take(),
            ProgressSubscription::Live(receiver) => loop {
                match receiver.recv().await {
                    Ok(event) => return Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("⚠️ Progress subscriber lagged, {} events dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Converts into a stream that ends after the terminal event.
    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        futures::stream::unfold((self, false), |(mut subscription, finished)| async move {
            if finished {
                return None;
            }
            let event = subscription.next().await?;
            let finished = event.is_terminal();
            Some((event, (subscription, finished)))
        })
    }
}
