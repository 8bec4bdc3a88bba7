//! In-process event bus.

use async_trait::async_trait;
use futures::stream;
use relay_core::events::Event;
use relay_core::ports::{EventBus, EventStream};
use relay_core::{Error, Result};
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_CAPACITY: usize = 1024;

/// [`EventBus`] over a tokio broadcast channel. Publishing with no
/// subscribers is not an error.
#[derive(Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for BroadcastBus {
    async fn publish(&self, event: Event) -> Result<()> {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<EventStream> {
        if pattern.is_empty() {
            return Err(Error::EventBus("empty subscription pattern".to_string()));
        }
        let receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = stream::unfold(
            (receiver, pattern),
            |(mut receiver, pattern)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if subject_matches(&pattern, &event.subject()) {
                                return Some((Ok(event), (receiver, pattern)));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, pattern = %pattern, "Event subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        );
        Ok(Box::pin(stream))
    }
}

/// Match a dotted subject against a pattern. `*` matches one token,
/// a trailing `>` matches one or more.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
