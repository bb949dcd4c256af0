//! Outbound relay queue for admin notifications
//!
//! A single consumer drains the queue in order and sleeps a fixed delay after
//! every send, keeping a floor on the spacing between Telegram requests.
//! Failed sends are logged and dropped.

use crate::media::MediaPart;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// What to deliver to one chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Plain text message
    Text(String),
    /// Album of previously uploaded files
    MediaGroup(Vec<MediaPart>),
    /// Forward of an existing message
    Forward {
        /// Chat the message lives in
        from_chat: i64,
        /// Message id inside `from_chat`
        message_id: i32,
    },
}

/// One queued delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Destination chat
    pub chat_id: i64,
    /// Content to deliver
    pub payload: Payload,
}

/// Transport that performs a single delivery
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// Deliver `payload` to `chat_id`
    async fn deliver(&self, chat_id: i64, payload: &Payload) -> anyhow::Result<()>;
}

/// Producer handle of the relay queue
#[derive(Clone)]
pub struct RelayQueue {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl RelayQueue {
    /// Creates a queue without a consumer; the caller drains the receiver
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Creates a queue and spawns its consumer.
    ///
    /// The consumer stops once every `RelayQueue` clone is dropped and the
    /// backlog is drained.
    #[must_use]
    pub fn spawn(sender: Arc<dyn OutboundSender>, delay: Duration) -> (Self, JoinHandle<()>) {
        let (queue, rx) = Self::channel();
        let handle = tokio::spawn(run_relay(rx, sender, delay));
        (queue, handle)
    }

    /// Appends one delivery to the queue
    pub fn enqueue(&self, chat_id: i64, payload: Payload) {
        if self.tx.send(Outbound { chat_id, payload }).is_err() {
            error!("Relay queue is closed, dropping message for {chat_id}");
        }
    }

    /// Appends one delivery per admin, in admin order
    pub fn notify_admins(&self, admins: &[i64], payload: &Payload) {
        for admin in admins {
            self.enqueue(*admin, payload.clone());
        }
    }
}

/// Consumer loop: send, pause, repeat
pub async fn run_relay(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    sender: Arc<dyn OutboundSender>,
    delay: Duration,
) {
    info!("Relay queue started (delay: {}ms)", delay.as_millis());
    while let Some(item) = rx.recv().await {
        match sender.deliver(item.chat_id, &item.payload).await {
            Ok(()) => debug!("Relayed message to {}", item.chat_id),
            Err(e) => error!("Failed to relay message to {}: {e}", item.chat_id),
        }
        tokio::time::sleep(delay).await;
    }
    info!("Relay queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_delivers_in_order_and_survives_failures() -> Result<(), Box<dyn std::error::Error>>
    {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let log = delivered.clone();

        let mut sender = MockOutboundSender::new();
        sender.expect_deliver().times(3).returning(move |chat_id, payload| {
            if let Ok(mut log) = log.lock() {
                log.push((chat_id, payload.clone()));
            }
            if chat_id == 1 {
                anyhow::bail!("chat not found");
            }
            Ok(())
        });

        let delay = Duration::from_secs(1);
        let (queue, handle) = RelayQueue::spawn(Arc::new(sender), delay);
        let started = Instant::now();

        queue.enqueue(1, Payload::Text("first".into()));
        queue.notify_admins(&[2, 3], &Payload::Text("second".into()));
        drop(queue);
        handle.await?;

        let delivered = delivered.lock().map_err(|e| e.to_string())?.clone();
        assert_eq!(
            delivered,
            vec![
                (1, Payload::Text("first".into())),
                (2, Payload::Text("second".into())),
                (3, Payload::Text("second".into())),
            ]
        );
        assert!(started.elapsed() >= delay * 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_channel_exposes_queued_items() {
        let (queue, mut rx) = RelayQueue::channel();
        queue.enqueue(
            7,
            Payload::Forward {
                from_chat: 5,
                message_id: 11,
            },
        );
        assert_eq!(
            rx.recv().await,
            Some(Outbound {
                chat_id: 7,
                payload: Payload::Forward {
                    from_chat: 5,
                    message_id: 11
                },
            })
        );
    }

    #[tokio::test]
    async fn test_enqueue_after_close_does_not_panic() {
        let (queue, rx) = RelayQueue::channel();
        drop(rx);
        queue.enqueue(1, Payload::Text("lost".into()));
    }
}
