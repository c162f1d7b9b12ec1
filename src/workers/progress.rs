use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ProgressRecord {
    pub job_id: String,
    /// Always within `[0, 100]`.
    pub percent: f64,
}

#[derive(Debug)]
struct Entry {
    record: ProgressRecord,
    expires_at: Instant,
}

/// Latest encode progress per owner.
///
/// Written by the side-channel scanner, cleared by the worker when a job ends and
/// read by pollers. Every entry also carries a hard expiry so a job that never
/// starts, or a poller that never shows up, cannot leave a record behind.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    entries: Arc<RwLock<HashMap<Uuid, Entry>>>,
    ttl: Duration,
}

impl ProgressStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Reserves a record at 0% for `owner`. Returns false if a live record already exists.
    pub fn begin(&self, owner: Uuid, job_id: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write();

        if entries.get(&owner).is_some_and(|e| e.expires_at > now) {
            return false;
        }

        entries.insert(
            owner,
            Entry {
                record: ProgressRecord {
                    job_id: job_id.to_string(),
                    percent: 0.0,
                },
                expires_at: now + self.ttl,
            },
        );
        true
    }

    /// Last write wins. Only touches a live record reserved for the same job.
    pub fn update(&self, owner: Uuid, job_id: &str, percent: f64) {
        let now = Instant::now();
        let mut entries = self.entries.write();

        if let Some(entry) = entries.get_mut(&owner) {
            if entry.expires_at > now && entry.record.job_id == job_id {
                entry.record.percent = clamp_percent(percent);
            }
        }
    }

    pub fn get(&self, owner: Uuid) -> Option<ProgressRecord> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(&owner) {
                Some(entry) if entry.expires_at > now => return Some(entry.record.clone()),
                None => return None,
                Some(_) => {}
            }
        }

        self.evict_if_expired(owner, now);
        None
    }

    /// A `begin` may land between the read and write locks, so expiry is checked again here.
    fn evict_if_expired(&self, owner: Uuid, now: Instant) -> bool {
        let mut entries = self.entries.write();
        if entries.get(&owner).is_some_and(|e| e.expires_at <= now) {
            entries.remove(&owner);
            return true;
        }
        false
    }

    /// Removes the owner's record only if it still belongs to `job_id`.
    pub fn finish(&self, owner: Uuid, job_id: &str) {
        let mut entries = self.entries.write();
        if entries.get(&owner).is_some_and(|e| e.record.job_id == job_id) {
            entries.remove(&owner);
        }
    }

    pub fn remove(&self, owner: Uuid) {
        self.entries.write().remove(&owner);
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn spawn_janitor(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, "purged expired progress records");
                }
            }
        })
    }
}

fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_refuses_a_second_live_job() {
        let store = ProgressStore::new(Duration::from_secs(60));
        let owner = Uuid::new_v4();

        assert!(store.begin(owner, "a"));
        assert!(!store.begin(owner, "b"));
        assert_eq!(store.get(owner).unwrap().job_id, "a");
    }

    #[test]
    fn updates_are_clamped_to_percent_range() {
        let store = ProgressStore::new(Duration::from_secs(60));
        let owner = Uuid::new_v4();
        store.begin(owner, "a");

        store.update(owner, "a", 140.0);
        assert_eq!(store.get(owner).unwrap().percent, 100.0);

        store.update(owner, "a", -3.0);
        assert_eq!(store.get(owner).unwrap().percent, 0.0);

        store.update(owner, "a", f64::NAN);
        assert_eq!(store.get(owner).unwrap().percent, 0.0);
    }

    #[test]
    fn updates_for_other_jobs_are_ignored() {
        let store = ProgressStore::new(Duration::from_secs(60));
        let owner = Uuid::new_v4();

        store.update(owner, "a", 10.0);
        assert!(store.get(owner).is_none());

        store.begin(owner, "a");
        store.update(owner, "thumb", 100.0);
        assert_eq!(store.get(owner).unwrap().percent, 0.0);
    }

    #[test]
    fn finish_only_clears_the_matching_job() {
        let store = ProgressStore::new(Duration::from_secs(60));
        let owner = Uuid::new_v4();
        store.begin(owner, "a");

        store.finish(owner, "b");
        assert!(store.get(owner).is_some());

        store.finish(owner, "a");
        assert!(store.get(owner).is_none());
    }

    #[test]
    fn expired_records_disappear() {
        let store = ProgressStore::new(Duration::from_millis(10));
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        store.begin(owner, "a");
        store.begin(other, "b");

        std::thread::sleep(Duration::from_millis(30));

        assert!(store.get(owner).is_none());
        assert_eq!(store.purge_expired(), 1);
        assert!(store.begin(owner, "c"));
    }

    #[test]
    fn eviction_spares_a_record_begun_after_the_expiry_was_seen() {
        let store = ProgressStore::new(Duration::from_millis(10));
        let owner = Uuid::new_v4();
        store.begin(owner, "old");
        std::thread::sleep(Duration::from_millis(30));

        let seen_expired_at = Instant::now();
        assert!(store.begin(owner, "fresh"));

        assert!(!store.evict_if_expired(owner, seen_expired_at));
        assert_eq!(store.entries.read().get(&owner).unwrap().record.job_id, "fresh");
    }

    #[test]
    fn stores_are_isolated() {
        let a = ProgressStore::new(Duration::from_secs(60));
        let b = ProgressStore::new(Duration::from_secs(60));
        let owner = Uuid::new_v4();

        a.begin(owner, "x");
        a.update(owner, "x", 50.0);

        assert!(b.get(owner).is_none());
        assert_eq!(a.clone().get(owner).unwrap().percent, 50.0);
    }

    #[tokio::test]
    async fn janitor_purges_in_the_background() {
        let store = ProgressStore::new(Duration::from_millis(5));
        let owner = Uuid::new_v4();
        store.begin(owner, "a");

        let janitor = store.spawn_janitor(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        janitor.abort();

        assert!(store.entries.read().is_empty());
    }
}
