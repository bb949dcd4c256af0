//! Per-user distribution cursors and the ban gate
//!
//! [`Ledger`] is the synchronous state machine; [`Distributor`] wraps it with
//! locking, the shared catalog and persistence through a [`LedgerStore`].

use crate::catalog::{Catalog, Group};
use crate::storage::{LedgerSnapshot, LedgerStore, Status, StorageError};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// Errors surfaced to the bot layer
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DistributionError {
    /// No catalog has been built since startup
    #[error("catalog has not been built yet")]
    CatalogNotReady,
    /// The user has no status record
    #[error("user {0} is not registered")]
    NotRegistered(i64),
    /// Override requested for a user without a ban record
    #[error("user {0} is not banned")]
    NotBanned(i64),
}

/// Result of a ban check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanCheck {
    /// No ban record
    Clear,
    /// Ban still running until the given time
    Active(DateTime<Utc>),
    /// Record was past its expiry and has just been removed
    Expired,
}

/// One group handed to a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handout {
    /// Catalog index of the group
    pub index: usize,
    /// The group itself
    pub group: Group,
    /// The user ran past the end and started over at index 0
    pub restarted: bool,
}

/// Row of the admin user list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    /// Telegram user id
    pub user_id: i64,
    /// Current status
    pub status: Status,
    /// Last seen username, if any
    pub display_name: Option<String>,
    /// Ban expiry if a ban record exists
    pub banned_until: Option<DateTime<Utc>>,
}

/// Cursor, ban and status state for every user
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    snapshot: LedgerSnapshot,
    global_index: usize,
}

impl Ledger {
    /// Rebuilds the ledger from persisted tables.
    ///
    /// First-time users start right after the highest index anybody has
    /// received so far.
    #[must_use]
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let global_index = snapshot
            .progress
            .values()
            .flatten()
            .max()
            .map_or(0, |max| max.saturating_add(1));
        Self {
            snapshot,
            global_index,
        }
    }

    /// Tables as they should be persisted
    #[must_use]
    pub const fn snapshot(&self) -> &LedgerSnapshot {
        &self.snapshot
    }

    /// Starting index for users without a cursor
    #[must_use]
    pub const fn global_index(&self) -> usize {
        self.global_index
    }

    /// Last index handed to the user
    #[must_use]
    pub fn cursor(&self, user_id: i64) -> Option<usize> {
        self.snapshot
            .progress
            .get(&user_id)
            .and_then(|indices| indices.last().copied())
    }

    /// Every index handed to the user, in order
    #[must_use]
    pub fn distributed(&self, user_id: i64) -> &[usize] {
        self.snapshot
            .progress
            .get(&user_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// True when the user has a status record
    #[must_use]
    pub fn is_registered(&self, user_id: i64) -> bool {
        self.snapshot.statuses.contains_key(&user_id)
    }

    /// Status record of the user
    #[must_use]
    pub fn status(&self, user_id: i64) -> Option<Status> {
        self.snapshot.statuses.get(&user_id).copied()
    }

    /// Ban expiry if a record exists, expired or not
    #[must_use]
    pub fn ban_expiry(&self, user_id: i64) -> Option<DateTime<Utc>> {
        self.snapshot.bans.get(&user_id).copied()
    }

    /// Picks the next catalog index for the user and records it.
    ///
    /// Returns `None` for an empty catalog, otherwise the index and whether
    /// the cursor wrapped around.
    pub fn advance(&mut self, user_id: i64, catalog_len: usize) -> Option<(usize, bool)> {
        if catalog_len == 0 {
            return None;
        }
        let mut index = self
            .cursor(user_id)
            .map_or(self.global_index, |cursor| cursor.saturating_add(1));
        let restarted = index >= catalog_len;
        if restarted {
            index = 0;
        }
        self.snapshot
            .progress
            .entry(user_id)
            .or_default()
            .push(index);
        self.global_index = self.global_index.max(index.saturating_add(1));
        Some((index, restarted))
    }

    /// Checks the ban record, dropping it (and the status) once expired
    pub fn check_ban(&mut self, user_id: i64, now: DateTime<Utc>) -> BanCheck {
        match self.snapshot.bans.get(&user_id).copied() {
            None => BanCheck::Clear,
            Some(expiry) if now < expiry => BanCheck::Active(expiry),
            Some(_) => {
                self.snapshot.bans.remove(&user_id);
                self.snapshot.statuses.insert(user_id, Status::None);
                BanCheck::Expired
            }
        }
    }

    /// Bans the user until `until` and clears the status
    pub fn ban(&mut self, user_id: i64, until: DateTime<Utc>) {
        self.snapshot.bans.insert(user_id, until);
        self.snapshot.statuses.insert(user_id, Status::None);
    }

    /// Removes the ban record; false when there was none
    pub fn lift_ban(&mut self, user_id: i64) -> bool {
        self.snapshot.bans.remove(&user_id).is_some()
    }

    /// Sets the status, registering the user if needed
    pub fn set_status(&mut self, user_id: i64, status: Status) {
        self.snapshot.statuses.insert(user_id, status);
    }

    /// Creates an empty status record; false if one already existed
    pub fn register(&mut self, user_id: i64) -> bool {
        if self.is_registered(user_id) {
            return false;
        }
        self.snapshot.statuses.insert(user_id, Status::None);
        true
    }
}

/// Shared distribution service injected into every handler
pub struct Distributor {
    store: Arc<dyn LedgerStore>,
    ledger: Mutex<Ledger>,
    catalog: RwLock<Arc<Catalog>>,
    display_names: Mutex<HashMap<i64, String>>,
    ban_duration: Duration,
}

impl Distributor {
    /// Loads the ledger from the store
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn load(
        store: Arc<dyn LedgerStore>,
        ban_duration: Duration,
    ) -> Result<Self, StorageError> {
        let ledger = Ledger::from_snapshot(store.load().await?);
        info!(
            "Loaded ledger: {} users, {} bans, next fresh index {}",
            ledger.snapshot.statuses.len(),
            ledger.snapshot.bans.len(),
            ledger.global_index
        );
        Ok(Self {
            store,
            ledger: Mutex::new(ledger),
            catalog: RwLock::new(Arc::new(Catalog::default())),
            display_names: Mutex::new(HashMap::new()),
            ban_duration,
        })
    }

    /// Configured ban length
    #[must_use]
    pub const fn ban_duration(&self) -> Duration {
        self.ban_duration
    }

    // Best-effort: a failed rewrite is logged and the in-memory state wins
    async fn persist(&self, ledger: &Ledger) {
        if let Err(e) = self.store.save(ledger.snapshot()).await {
            error!("Failed to persist ledger: {e}");
        }
    }

    /// Current catalog
    pub async fn catalog(&self) -> Arc<Catalog> {
        self.catalog.read().await.clone()
    }

    /// Swaps in a freshly built catalog and returns its size.
    ///
    /// Existing cursors are not remapped.
    pub async fn replace_catalog(&self, catalog: Catalog) -> usize {
        let len = catalog.len();
        *self.catalog.write().await = Arc::new(catalog);
        info!("Catalog replaced: {len} groups");
        len
    }

    /// True when the user has a status record
    pub async fn is_registered(&self, user_id: i64) -> bool {
        self.ledger.lock().await.is_registered(user_id)
    }

    /// Last index handed to the user
    pub async fn cursor(&self, user_id: i64) -> Option<usize> {
        self.ledger.lock().await.cursor(user_id)
    }

    /// Every index handed to the user
    pub async fn distributed(&self, user_id: i64) -> Vec<usize> {
        self.ledger.lock().await.distributed(user_id).to_vec()
    }

    /// Starting index for users without a cursor
    pub async fn global_index(&self) -> usize {
        self.ledger.lock().await.global_index()
    }

    /// Status record of the user
    pub async fn status(&self, user_id: i64) -> Option<Status> {
        self.ledger.lock().await.status(user_id)
    }

    /// Ban gate: true while a ban is running.
    ///
    /// An expired ban is removed on the spot and the status cleared.
    pub async fn is_banned(&self, user_id: i64, now: DateTime<Utc>) -> bool {
        let mut ledger = self.ledger.lock().await;
        match ledger.check_ban(user_id, now) {
            BanCheck::Active(_) => true,
            BanCheck::Clear => false,
            BanCheck::Expired => {
                info!("Ban for user {user_id} expired, status cleared");
                self.persist(&ledger).await;
                false
            }
        }
    }

    /// Ban requested by the user themselves.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` for users without a status record.
    pub async fn self_report_ban(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, DistributionError> {
        let mut ledger = self.ledger.lock().await;
        if !ledger.is_registered(user_id) {
            return Err(DistributionError::NotRegistered(user_id));
        }
        let until = now + self.ban_duration;
        ledger.ban(user_id, until);
        self.persist(&ledger).await;
        info!("User {user_id} reported a ban, blocked until {until}");
        Ok(until)
    }

    /// Admin override: removes the ban record.
    ///
    /// # Errors
    ///
    /// Returns `NotBanned` if the user has no ban record.
    pub async fn lift_ban(&self, user_id: i64) -> Result<(), DistributionError> {
        let mut ledger = self.ledger.lock().await;
        if !ledger.lift_ban(user_id) {
            return Err(DistributionError::NotBanned(user_id));
        }
        self.persist(&ledger).await;
        info!("Ban for user {user_id} lifted by admin");
        Ok(())
    }

    /// Deferred re-ban after an admin override.
    ///
    /// Bans the user again unless a ban is already running or the user is
    /// no longer registered. Interaction in the meantime is not considered.
    /// Returns true when a new ban was written.
    pub async fn reban_if_idle(&self, user_id: i64, now: DateTime<Utc>) -> bool {
        let mut ledger = self.ledger.lock().await;
        match ledger.check_ban(user_id, now) {
            BanCheck::Active(_) => return false,
            BanCheck::Expired => self.persist(&ledger).await,
            BanCheck::Clear => {}
        }
        if !ledger.is_registered(user_id) {
            return false;
        }
        let until = now + self.ban_duration;
        ledger.ban(user_id, until);
        self.persist(&ledger).await;
        warn!("User {user_id} re-banned after override window, until {until}");
        true
    }

    /// Waits one ban duration, then runs [`Self::reban_if_idle`]
    pub async fn reban_after_override(&self, user_id: i64) -> bool {
        tokio::time::sleep(self.ban_duration.to_std().unwrap_or_default()).await;
        self.reban_if_idle(user_id, Utc::now()).await
    }

    /// Hands the next group to the user and records it.
    ///
    /// The caller is expected to have passed the ban gate.
    ///
    /// # Errors
    ///
    /// Returns `CatalogNotReady` while the catalog is empty.
    pub async fn next_group(&self, user_id: i64) -> Result<Handout, DistributionError> {
        let catalog = self.catalog().await;
        let mut ledger = self.ledger.lock().await;
        let (index, restarted) = ledger
            .advance(user_id, catalog.len())
            .ok_or(DistributionError::CatalogNotReady)?;
        let group = catalog
            .get(index)
            .cloned()
            .ok_or(DistributionError::CatalogNotReady)?;
        self.persist(&ledger).await;
        info!("User {user_id} received group #{index} (restarted: {restarted})");
        Ok(Handout {
            index,
            group,
            restarted,
        })
    }

    /// Admin action: sets the user's status
    pub async fn set_status(&self, user_id: i64, status: Status) {
        let mut ledger = self.ledger.lock().await;
        ledger.set_status(user_id, status);
        self.persist(&ledger).await;
        info!("Status of user {user_id} set to {}", status.label());
    }

    /// Admin action: creates a status record; false if it already existed
    pub async fn register(&self, user_id: i64) -> bool {
        let mut ledger = self.ledger.lock().await;
        if !ledger.register(user_id) {
            return false;
        }
        self.persist(&ledger).await;
        info!("User {user_id} registered");
        true
    }

    /// Remembers the latest username seen for the user (memory only)
    pub async fn remember_name(&self, user_id: i64, name: &str) {
        if name.is_empty() {
            return;
        }
        self.display_names
            .lock()
            .await
            .insert(user_id, name.to_string());
    }

    /// Saved broadcast template, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be read.
    pub async fn broadcast_template(&self) -> Result<Option<String>, StorageError> {
        self.store.load_template().await
    }

    /// Replaces the broadcast template
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be written.
    pub async fn set_broadcast_template(&self, text: &str) -> Result<(), StorageError> {
        self.store.save_template(text).await?;
        info!("Broadcast template updated ({} chars)", text.chars().count());
        Ok(())
    }

    /// Registered users in id order
    pub async fn users(&self) -> Vec<UserSummary> {
        let names = self.display_names.lock().await.clone();
        let ledger = self.ledger.lock().await;
        ledger
            .snapshot
            .statuses
            .iter()
            .map(|(user_id, status)| UserSummary {
                user_id: *user_id,
                status: *status,
                display_name: names.get(user_id).cloned(),
                banned_until: ledger.ban_expiry(*user_id),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ClubEntry;
    use crate::storage::{MemoryStore, MockLedgerStore};
    use proptest::prelude::*;

    fn abc_catalog() -> Catalog {
        Catalog::build(vec![
            ClubEntry::new("C", 2),
            ClubEntry::new("A", 10),
            ClubEntry::new("B", 7),
        ])
    }

    fn registered(ids: &[i64]) -> LedgerSnapshot {
        let mut snapshot = LedgerSnapshot::default();
        for id in ids {
            snapshot.statuses.insert(*id, Status::Approved);
        }
        snapshot
    }

    async fn distributor_with(
        snapshot: LedgerSnapshot,
    ) -> Result<(Distributor, Arc<MemoryStore>), StorageError> {
        let store = Arc::new(MemoryStore::with_snapshot(snapshot));
        let distributor = Distributor::load(store.clone(), Duration::hours(24)).await?;
        Ok((distributor, store))
    }

    #[test]
    fn test_global_index_resumes_after_highest_index() {
        let mut snapshot = LedgerSnapshot::default();
        snapshot.progress.insert(1, vec![0, 4, 2]);
        snapshot.progress.insert(2, vec![3]);
        let ledger = Ledger::from_snapshot(snapshot);
        assert_eq!(ledger.global_index(), 5);
        assert_eq!(ledger.cursor(1), Some(2));
        assert_eq!(Ledger::default().global_index(), 0);
    }

    #[test]
    fn test_advance_on_empty_catalog_records_nothing() {
        let mut ledger = Ledger::default();
        assert_eq!(ledger.advance(1, 0), None);
        assert!(ledger.distributed(1).is_empty());
    }

    #[test]
    fn test_new_user_starts_at_global_index() {
        let mut ledger = Ledger::default();
        assert_eq!(ledger.advance(1, 10), Some((0, false)));
        assert_eq!(ledger.advance(1, 10), Some((1, false)));
        // Second user skips what the first one already got
        assert_eq!(ledger.advance(2, 10), Some((2, false)));
        assert_eq!(ledger.advance(1, 10), Some((2, false)));
        assert_eq!(ledger.global_index(), 3);
    }

    #[tokio::test]
    async fn test_four_requests_wrap_around() -> Result<(), Box<dyn std::error::Error>> {
        let (distributor, store) = distributor_with(registered(&[7])).await?;
        distributor.replace_catalog(abc_catalog()).await;

        let mut seen = Vec::new();
        for _ in 0..4 {
            let handout = distributor.next_group(7).await?;
            seen.push((handout.index, handout.restarted));
        }
        assert_eq!(seen, [(0, false), (1, false), (2, false), (0, true)]);
        assert_eq!(distributor.cursor(7).await, Some(0));
        assert_eq!(store.snapshot().await.progress.get(&7), Some(&vec![0, 1, 2, 0]));
        Ok(())
    }

    #[tokio::test]
    async fn test_next_group_returns_ranked_group() -> Result<(), StorageError> {
        let (distributor, _) = distributor_with(registered(&[1])).await?;
        distributor.replace_catalog(abc_catalog()).await;
        let handout = distributor.next_group(1).await;
        assert_eq!(
            handout.map(|h| h.group.members[0].identity.clone()),
            Ok("A".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_catalog_is_not_ready() -> Result<(), StorageError> {
        let (distributor, store) = distributor_with(registered(&[1])).await?;
        assert_eq!(
            distributor.next_group(1).await,
            Err(DistributionError::CatalogNotReady)
        );
        assert_eq!(store.save_count(), 0);
        assert_eq!(distributor.cursor(1).await, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_ban_is_cleared_once() -> Result<(), StorageError> {
        let now = Utc::now();
        let mut snapshot = registered(&[9]);
        snapshot.bans.insert(9, now - Duration::seconds(1));
        let (distributor, store) = distributor_with(snapshot).await?;

        assert!(!distributor.is_banned(9, now).await);
        let saved = store.snapshot().await;
        assert!(!saved.bans.contains_key(&9));
        assert_eq!(saved.statuses.get(&9), Some(&Status::None));
        assert_eq!(store.save_count(), 1);

        // Second check: same answer, no further write
        assert!(!distributor.is_banned(9, now).await);
        assert_eq!(store.save_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_active_ban_blocks_without_writing() -> Result<(), StorageError> {
        let now = Utc::now();
        let mut snapshot = registered(&[9]);
        snapshot.bans.insert(9, now + Duration::hours(1));
        let (distributor, store) = distributor_with(snapshot).await?;

        assert!(distributor.is_banned(9, now).await);
        assert!(distributor.is_banned(9, now).await);
        assert_eq!(store.save_count(), 0);
        assert!(!distributor.is_banned(10, now).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_self_report_requires_registration() -> Result<(), StorageError> {
        let now = Utc::now();
        let (distributor, store) = distributor_with(registered(&[1])).await?;

        assert_eq!(
            distributor.self_report_ban(2, now).await,
            Err(DistributionError::NotRegistered(2))
        );

        let until = distributor.self_report_ban(1, now).await;
        assert_eq!(until, Ok(now + Duration::hours(24)));
        assert!(distributor.is_banned(1, now + Duration::hours(23)).await);
        assert_eq!(distributor.status(1).await, Some(Status::None));
        assert!(store.snapshot().await.bans.contains_key(&1));
        Ok(())
    }

    #[tokio::test]
    async fn test_lift_ban_and_reban() -> Result<(), StorageError> {
        let now = Utc::now();
        let mut snapshot = registered(&[3]);
        snapshot.bans.insert(3, now + Duration::hours(5));
        let (distributor, _) = distributor_with(snapshot).await?;

        assert_eq!(distributor.lift_ban(3).await, Ok(()));
        assert_eq!(
            distributor.lift_ban(3).await,
            Err(DistributionError::NotBanned(3))
        );
        assert!(!distributor.is_banned(3, now).await);

        let later = now + Duration::hours(24);
        assert!(distributor.reban_if_idle(3, later).await);
        assert!(distributor.is_banned(3, later + Duration::hours(1)).await);

        // Already banned: the deferred check leaves it alone
        assert!(!distributor.reban_if_idle(3, later).await);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reban_waits_one_ban_duration() -> Result<(), Box<dyn std::error::Error>> {
        let mut snapshot = registered(&[3]);
        snapshot.bans.insert(3, Utc::now() + Duration::hours(5));
        let (distributor, _) = distributor_with(snapshot).await?;
        distributor.lift_ban(3).await?;

        let early = tokio::time::timeout(
            std::time::Duration::from_secs(23 * 3600),
            distributor.reban_after_override(3),
        )
        .await;
        assert!(early.is_err());
        assert!(!distributor.is_banned(3, Utc::now()).await);

        let started = tokio::time::Instant::now();
        assert!(distributor.reban_after_override(3).await);
        assert!(started.elapsed() >= std::time::Duration::from_secs(24 * 3600));
        assert!(distributor.is_banned(3, Utc::now()).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_reban_skips_unregistered_users() -> Result<(), StorageError> {
        let (distributor, store) = distributor_with(LedgerSnapshot::default()).await?;
        assert!(!distributor.reban_if_idle(42, Utc::now()).await);
        assert_eq!(store.save_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_and_list_users() -> Result<(), StorageError> {
        let (distributor, _) = distributor_with(registered(&[5])).await?;
        assert!(distributor.register(4).await);
        assert!(!distributor.register(4).await);
        distributor.set_status(4, Status::Rejected).await;
        distributor.remember_name(5, "alice").await;
        distributor.remember_name(4, "").await;

        let users = distributor.users().await;
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].user_id, 4);
        assert_eq!(users[0].status, Status::Rejected);
        assert_eq!(users[0].display_name, None);
        assert_eq!(users[1].display_name.as_deref(), Some("alice"));
        Ok(())
    }

    #[tokio::test]
    async fn test_broadcast_template_round_trip() -> Result<(), StorageError> {
        let (distributor, _) = distributor_with(LedgerSnapshot::default()).await?;
        assert_eq!(distributor.broadcast_template().await?, None);
        distributor.set_broadcast_template("Hello, clubs!").await?;
        assert_eq!(
            distributor.broadcast_template().await?.as_deref(),
            Some("Hello, clubs!")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_save_does_not_change_answers() -> Result<(), StorageError> {
        let now = Utc::now();
        let mut snapshot = registered(&[1]);
        snapshot.bans.insert(1, now - Duration::minutes(5));
        let loaded = snapshot.clone();

        let mut store = MockLedgerStore::new();
        store.expect_load().returning(move || Ok(loaded.clone()));
        store
            .expect_save()
            .times(1)
            .returning(|_| Err(StorageError::Io(std::io::Error::other("disk full"))));

        let distributor = Distributor::load(Arc::new(store), Duration::hours(24)).await?;
        assert!(!distributor.is_banned(1, now).await);
        assert_eq!(distributor.status(1).await, Some(Status::None));
        Ok(())
    }

    proptest! {
        #[test]
        fn cursor_matches_last_distributed_index(
            len in 1usize..8,
            requests in proptest::collection::vec(0i64..4, 1..60),
        ) {
            let mut ledger = Ledger::default();
            let mut last: HashMap<i64, usize> = HashMap::new();
            for user in requests {
                let (index, restarted) = ledger.advance(user, len).ok_or_else(|| {
                    TestCaseError::fail("non-empty catalog must yield an index")
                })?;
                prop_assert!(index < len);
                if let Some(prev) = last.get(&user) {
                    // Strictly increasing until the end, then back to 0
                    if restarted {
                        prop_assert_eq!(index, 0);
                        prop_assert_eq!(*prev + 1, len);
                    } else {
                        prop_assert_eq!(index, prev + 1);
                    }
                }
                last.insert(user, index);
                prop_assert_eq!(ledger.cursor(user), Some(index));
                prop_assert_eq!(ledger.distributed(user).last().copied(), Some(index));
            }
        }
    }
}
