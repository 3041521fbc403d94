//! Share links: time-limited, token-addressed, read-only snapshots of a conversation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::error::{Error, Result};
use crate::observability::{SHARES_CREATED, SHARES_EXPIRED, SHARES_RESOLVED, SHARES_SWEPT};
use crate::utils::Clock;

/// A link to a shared snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLink {
    /// The opaque token.
    pub token: String,
    /// The full URL at which the snapshot can be viewed.
    pub url: String,
    /// Identifier of the shared conversation.
    pub chat_id: String,
    /// When the link was created.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,
    /// When the link stops resolving.
    #[serde(with = "crate::utils::time")]
    pub expires_at: OffsetDateTime,
}

/// A successfully resolved share.
#[derive(Clone, Debug)]
pub struct SharedConversation {
    /// The link that was resolved.
    pub link: ShareLink,
    /// The snapshot taken when the link was created.
    pub conversation: Arc<Conversation>,
    /// Number of successful resolutions, including this one.
    pub view_count: u64,
}

/// Metadata about a share that does not count as a view.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareStats {
    /// Identifier of the shared conversation.
    pub chat_id: String,
    /// When the link was created.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,
    /// When the link stops resolving.
    #[serde(with = "crate::utils::time")]
    pub expires_at: OffsetDateTime,
    /// Number of successful resolutions.
    pub view_count: u64,
    /// Number of turns in the snapshot.
    pub message_count: usize,
}

#[derive(Debug)]
struct ShareRecord {
    link: ShareLink,
    snapshot: Arc<Conversation>,
    views: AtomicU64,
}

impl ShareRecord {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.link.expires_at
    }
}

/// Issues and resolves share links.
///
/// Resolution only ever takes the read lock.  An expired record keeps answering
/// [`ErrorKind::Expired`](crate::error::ErrorKind::Expired) until [`ShareManager::sweep`] (or a
/// `create` that finds the table full) removes it; after that its token is unknown.
pub struct ShareManager {
    records: RwLock<HashMap<String, Arc<ShareRecord>>>,
    clock: Arc<dyn Clock>,
    base_url: Url,
    max_shares: usize,
}

impl ShareManager {
    /// Creates a manager that builds links under `base_url` and holds at most `max_shares`
    /// live records.
    pub fn new(base_url: Url, max_shares: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
            base_url,
            max_shares,
        }
    }

    /// Snapshots `conversation` and issues a link valid for `ttl`.
    pub fn create(&self, conversation: &Conversation, ttl: Duration) -> Result<ShareLink> {
        if ttl.is_zero() {
            return Err(Error::validation(
                "share lifetime must be positive",
                Some("ttl".to_string()),
            ));
        }
        let now = self.clock.now();
        let expires_at = time::Duration::try_from(ttl)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| {
                Error::validation("share lifetime is too long", Some("ttl".to_string()))
            })?;
        let token = generate_token();
        let link = ShareLink {
            url: self.share_url(&token)?,
            token: token.clone(),
            chat_id: conversation.id().to_string(),
            created_at: now,
            expires_at,
        };
        let record = Arc::new(ShareRecord {
            link: link.clone(),
            snapshot: Arc::new(conversation.snapshot()),
            views: AtomicU64::new(0),
        });

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.len() >= self.max_shares {
            let swept = remove_expired(&mut records, now);
            SHARES_SWEPT.count(swept as u64);
            if records.len() >= self.max_shares {
                return Err(Error::capacity("share table is full", self.max_shares));
            }
        }
        records.insert(token, record);
        drop(records);

        SHARES_CREATED.click();
        tracing::info!(
            chat_id = %link.chat_id,
            expires_at = %crate::utils::time::rfc3339(link.expires_at),
            "share link created"
        );
        Ok(link)
    }

    /// Resolves a token to its snapshot.
    pub fn resolve(&self, token: &str) -> Result<SharedConversation> {
        let record = self.lookup(token)?;
        if record.is_expired(self.clock.now()) {
            SHARES_EXPIRED.click();
            return Err(Error::expired(
                "share link has expired",
                Some(token.to_string()),
            ));
        }
        let view_count = record.views.fetch_add(1, Ordering::Relaxed) + 1;
        SHARES_RESOLVED.click();
        Ok(SharedConversation {
            link: record.link.clone(),
            conversation: Arc::clone(&record.snapshot),
            view_count,
        })
    }

    /// Metadata about a live share.
    pub fn stats(&self, token: &str) -> Result<ShareStats> {
        let record = self.lookup(token)?;
        if record.is_expired(self.clock.now()) {
            return Err(Error::expired(
                "share link has expired",
                Some(token.to_string()),
            ));
        }
        Ok(ShareStats {
            chat_id: record.link.chat_id.clone(),
            created_at: record.link.created_at,
            expires_at: record.link.expires_at,
            view_count: record.views.load(Ordering::Relaxed),
            message_count: record.snapshot.len(),
        })
    }

    /// Deletes a share before it expires.
    pub fn revoke(&self, token: &str) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records
            .remove(token)
            .map(|_| ())
            .ok_or_else(|| not_found(token))
    }

    /// Removes every expired record and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let swept = remove_expired(&mut records, now);
        drop(records);
        if swept > 0 {
            SHARES_SWEPT.count(swept as u64);
            tracing::debug!(swept, "expired share links removed");
        }
        swept
    }

    /// Runs [`ShareManager::sweep`] every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        this.sweep();
                    }
                }
            }
        })
    }

    /// Number of records held, expired or not.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, token: &str) -> Result<Arc<ShareRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
            .ok_or_else(|| not_found(token))
    }

    fn share_url(&self, token: &str) -> Result<String> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::url("share base URL cannot be a base", None))?
            .pop_if_empty()
            .push("shared")
            .push(token);
        Ok(url.to_string())
    }
}

impl std::fmt::Debug for ShareManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareManager")
            .field("base_url", &self.base_url.as_str())
            .field("max_shares", &self.max_shares)
            .field("len", &self.len())
            .finish()
    }
}

/// Converts a lifetime given in whole hours, rejecting values that overflow.
pub fn ttl_from_hours(hours: u64) -> Result<Duration> {
    hours
        .checked_mul(60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::validation("share lifetime is too long", Some("hours".to_string())))
}

/// Two random UUIDv4 values, hex encoded: 244 bits from the OS random source.
fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn remove_expired(records: &mut HashMap<String, Arc<ShareRecord>>, now: OffsetDateTime) -> usize {
    let before = records.len();
    records.retain(|_, record| !record.is_expired(now));
    before - records.len()
}

fn not_found(token: &str) -> Error {
    Error::not_found(
        "no share link with this token",
        Some("share".to_string()),
        Some(token.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use crate::utils::ManualClock;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-06-01 10:00 UTC);
    const HOUR: Duration = Duration::from_secs(3600);

    fn manager(max_shares: usize) -> (Arc<ManualClock>, ShareManager) {
        let clock = Arc::new(ManualClock::new(T0));
        let base = Url::parse("https://chat.example.com/").unwrap();
        (clock.clone(), ShareManager::new(base, max_shares, clock))
    }

    fn conversation() -> Conversation {
        let mut conversation = Conversation::with_id("chat-1", 16);
        conversation.append(Turn::user("hello", T0)).unwrap();
        conversation.append(Turn::assistant("hi there", T0)).unwrap();
        conversation
    }

    #[test]
    fn resolve_returns_snapshot() {
        let (_, shares) = manager(8);
        let conversation = conversation();
        let link = shares.create(&conversation, HOUR).unwrap();
        assert_eq!(link.chat_id, "chat-1");
        assert_eq!(link.expires_at, T0 + HOUR);
        assert_eq!(
            link.url,
            format!("https://chat.example.com/shared/{}", link.token)
        );
        let shared = shares.resolve(&link.token).unwrap();
        assert_eq!(*shared.conversation, conversation);
        assert_eq!(shared.view_count, 1);
        assert_eq!(shares.resolve(&link.token).unwrap().view_count, 2);
    }

    #[test]
    fn later_edits_do_not_leak_into_share() {
        let (_, shares) = manager(8);
        let mut conversation = conversation();
        let link = shares.create(&conversation, HOUR).unwrap();
        conversation.append(Turn::user("secret", T0)).unwrap();
        let shared = shares.resolve(&link.token).unwrap();
        assert_eq!(shared.conversation.len(), 2);
    }

    #[test]
    fn expires_after_ttl() {
        let (clock, shares) = manager(8);
        let link = shares.create(&conversation(), HOUR).unwrap();
        clock.advance(HOUR);
        assert!(shares.resolve(&link.token).is_ok());
        clock.advance(Duration::from_secs(1));
        assert!(shares.resolve(&link.token).unwrap_err().is_expired());
        assert!(shares.resolve(&link.token).unwrap_err().is_expired());
        assert!(shares.stats(&link.token).unwrap_err().is_expired());
        assert_eq!(shares.len(), 1);
        assert_eq!(shares.sweep(), 1);
        assert!(shares.resolve(&link.token).unwrap_err().is_not_found());
        assert!(shares.is_empty());
    }

    #[test]
    fn hours_conversion() {
        assert_eq!(ttl_from_hours(2).unwrap(), 2 * HOUR);
        assert!(ttl_from_hours(u64::MAX).unwrap_err().is_validation());
    }

    #[test]
    fn oversized_ttl_rejected() {
        let (_, shares) = manager(8);
        let err = shares
            .create(&conversation(), Duration::from_secs(u64::MAX))
            .unwrap_err();
        assert!(err.is_validation());
        let err = shares
            .create(&conversation(), Duration::from_secs(100_000_000 * 3600))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(shares.is_empty());
    }

    #[test]
    fn tokens_are_distinct_and_long() {
        let (_, shares) = manager(8);
        let conversation = conversation();
        let a = shares.create(&conversation, HOUR).unwrap();
        let b = shares.create(&conversation, HOUR).unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(a.token.len(), 64);
        assert!(a.token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn unknown_token() {
        let (_, shares) = manager(8);
        assert!(shares.resolve("nope").unwrap_err().is_not_found());
        assert!(shares.stats("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn zero_ttl_rejected() {
        let (_, shares) = manager(8);
        let err = shares.create(&conversation(), Duration::ZERO).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn stats_do_not_count_as_views() {
        let (_, shares) = manager(8);
        let link = shares.create(&conversation(), HOUR).unwrap();
        shares.resolve(&link.token).unwrap();
        let stats = shares.stats(&link.token).unwrap();
        assert_eq!(stats.view_count, 1);
        assert_eq!(stats.message_count, 2);
        assert_eq!(shares.stats(&link.token).unwrap().view_count, 1);
    }

    #[test]
    fn revoke() {
        let (_, shares) = manager(8);
        let link = shares.create(&conversation(), HOUR).unwrap();
        shares.revoke(&link.token).unwrap();
        assert!(shares.resolve(&link.token).unwrap_err().is_not_found());
        assert!(shares.revoke(&link.token).unwrap_err().is_not_found());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let (clock, shares) = manager(8);
        let short = shares.create(&conversation(), HOUR).unwrap();
        let long = shares.create(&conversation(), 3 * HOUR).unwrap();
        clock.advance(2 * HOUR);
        assert_eq!(shares.sweep(), 1);
        assert!(shares.resolve(&short.token).unwrap_err().is_not_found());
        assert!(shares.resolve(&long.token).is_ok());
    }

    #[test]
    fn capacity_sweeps_before_failing() {
        let (clock, shares) = manager(2);
        shares.create(&conversation(), HOUR).unwrap();
        shares.create(&conversation(), 3 * HOUR).unwrap();
        let err = shares.create(&conversation(), HOUR).unwrap_err();
        assert!(err.is_capacity());
        clock.advance(2 * HOUR);
        assert!(shares.create(&conversation(), HOUR).is_ok());
        assert_eq!(shares.len(), 2);
    }

    #[test]
    fn base_url_with_path() {
        let clock = Arc::new(ManualClock::new(T0));
        let base = Url::parse("https://example.com/chat/").unwrap();
        let shares = ShareManager::new(base, 4, clock);
        let link = shares.create(&conversation(), HOUR).unwrap();
        assert_eq!(
            link.url,
            format!("https://example.com/chat/shared/{}", link.token)
        );
    }

    #[test]
    fn concurrent_resolves() {
        let (_, shares) = manager(8);
        let shares = Arc::new(shares);
        let link = shares.create(&conversation(), HOUR).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shares = Arc::clone(&shares);
                let token = link.token.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        shares.resolve(&token).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(shares.stats(&link.token).unwrap().view_count, 800);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper() {
        let (clock, shares) = manager(8);
        let shares = Arc::new(shares);
        shares.create(&conversation(), HOUR).unwrap();
        clock.advance(2 * HOUR);
        let cancel = CancellationToken::new();
        let handle = shares.spawn_sweeper(Duration::from_secs(60), cancel.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(shares.is_empty());
        cancel.cancel();
        handle.await.unwrap();
    }
}
