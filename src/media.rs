//! Media group aggregation
//!
//! Telegram delivers an album as separate messages sharing a
//! `media_group_id`. Parts are buffered per token and relayed to the admins
//! as one album once no new part has arrived for the quiet period. Each new
//! part re-arms the token's timer; a flushed token is remembered so late
//! parts are dropped instead of producing a second album.

use crate::relay::{Payload, RelayQueue};
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Telegram refuses albums with more items than this
pub const MAX_ALBUM_SIZE: usize = 10;

/// Fallback sender name when the user has no username
pub const UNKNOWN_SENDER: &str = "Пользователь";

/// Kind of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Photo (largest size)
    Photo,
    /// Generic document
    Document,
    /// Video
    Video,
    /// Audio track
    Audio,
}

/// Reference to one uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPart {
    /// File kind
    pub kind: MediaKind,
    /// Telegram file id, reusable for re-sending
    pub file_id: String,
}

impl MediaPart {
    /// Creates a part
    #[must_use]
    pub fn new(kind: MediaKind, file_id: impl Into<String>) -> Self {
        Self {
            kind,
            file_id: file_id.into(),
        }
    }
}

/// Who uploaded a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploader {
    /// Telegram user id
    pub user_id: i64,
    /// Username, or [`UNKNOWN_SENDER`]
    pub name: String,
}

impl Uploader {
    /// Creates an uploader, falling back to a placeholder name
    #[must_use]
    pub fn new(user_id: i64, name: Option<&str>) -> Self {
        Self {
            user_id,
            name: name
                .filter(|n| !n.is_empty())
                .unwrap_or(UNKNOWN_SENDER)
                .to_string(),
        }
    }
}

/// Parts collected for one grouping token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBatch {
    /// Grouping token
    pub token: String,
    /// Uploader of the first part
    pub uploader: Uploader,
    /// Parts in arrival order
    pub parts: Vec<MediaPart>,
    /// Arrival of the first part
    pub first_seen: Instant,
    /// Arrival of the latest part
    pub last_update: Instant,
}

/// What happened to an incoming part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartOutcome {
    /// Buffered; the batch now holds this many parts
    Buffered(usize),
    /// The token was already relayed
    Dropped,
}

struct PendingBatch {
    batch: MediaBatch,
    generation: u64,
    timer: CancellationToken,
}

/// Buffers album parts and relays finished albums to the admins
pub struct MediaAggregator {
    pending: Mutex<HashMap<String, PendingBatch>>,
    processed: Cache<String, ()>,
    quiet: Duration,
    relay: RelayQueue,
    admins: Vec<i64>,
}

impl MediaAggregator {
    /// Creates an aggregator relaying to `admins`
    #[must_use]
    pub fn new(
        relay: RelayQueue,
        admins: Vec<i64>,
        quiet: Duration,
        processed_ttl: Duration,
    ) -> Arc<Self> {
        let processed = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(processed_ttl)
            .build();
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            processed,
            quiet,
            relay,
            admins,
        })
    }

    /// Adds one part and (re)arms the token's flush timer
    pub async fn on_part(
        self: &Arc<Self>,
        token: &str,
        uploader: Uploader,
        part: MediaPart,
    ) -> PartOutcome {
        let mut pending = self.pending.lock().await;
        if self.processed.contains_key(token) {
            debug!("Dropping late part for relayed media group {token}");
            return PartOutcome::Dropped;
        }

        let now = Instant::now();
        let entry = pending
            .entry(token.to_string())
            .or_insert_with(|| PendingBatch {
                batch: MediaBatch {
                    token: token.to_string(),
                    uploader,
                    parts: Vec::new(),
                    first_seen: now,
                    last_update: now,
                },
                generation: 0,
                timer: CancellationToken::new(),
            });

        entry.timer.cancel();
        entry.timer = CancellationToken::new();
        entry.generation += 1;
        entry.batch.parts.push(part);
        entry.batch.last_update = now;
        let count = entry.batch.parts.len();

        let timer = entry.timer.clone();
        let generation = entry.generation;
        let aggregator = Arc::clone(self);
        let token = token.to_string();
        tokio::spawn(async move {
            tokio::select! {
                () = timer.cancelled() => {}
                () = tokio::time::sleep(aggregator.quiet) => {
                    aggregator.flush(&token, generation).await;
                }
            }
        });

        PartOutcome::Buffered(count)
    }

    /// Relays the batch if `generation` is still its latest part
    async fn flush(&self, token: &str, generation: u64) -> Option<MediaBatch> {
        let mut pending = self.pending.lock().await;
        if pending.get(token).map(|p| p.generation) != Some(generation) {
            return None;
        }
        let batch = pending.remove(token)?.batch;
        self.processed.insert(token.to_string(), ()).await;
        drop(pending);

        info!(
            "Relaying media group {} ({} parts) from user {}",
            token,
            batch.parts.len(),
            batch.uploader.user_id
        );
        for chunk in batch.parts.chunks(MAX_ALBUM_SIZE) {
            self.relay
                .notify_admins(&self.admins, &Payload::MediaGroup(chunk.to_vec()));
        }
        let attribution = format!(
            "Медиагруппа от пользователя @{} (ID: {})",
            batch.uploader.name, batch.uploader.user_id
        );
        self.relay
            .notify_admins(&self.admins, &Payload::Text(attribution));
        Some(batch)
    }

    /// Relays a standalone message right away, followed by an attribution
    pub fn forward_single(&self, from_chat: i64, message_id: i32, uploader: &Uploader) {
        info!("Forwarding file from user {}", uploader.user_id);
        self.relay.notify_admins(
            &self.admins,
            &Payload::Forward {
                from_chat,
                message_id,
            },
        );
        let attribution = format!(
            "Файл от пользователя @{} (ID: {})",
            uploader.name, uploader.user_id
        );
        self.relay
            .notify_admins(&self.admins, &Payload::Text(attribution));
    }

    /// Number of tokens still collecting parts
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
