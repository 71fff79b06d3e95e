//! Key pool with per-key cooldowns and task affinity
//!
//! The pool holds a fixed set of interchangeable keys plus an optional
//! preferred key per task type. A key that hits a rate limit is given a
//! cooldown deadline; until the deadline passes it is skipped by selection.
//!
//! Cooldown transitions happen lazily: when selection runs and a deadline has
//! passed, the entry is dropped and the key is available again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::Credential;
use rand::RngExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::sources::KeySources;
use crate::task::TaskType;

/// Cooldown applied when a caller has no better estimate.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Selection status of a key.
///
/// Transitions:
/// - Available → CoolingDown (rate limit reported)
/// - CoolingDown → CoolingDown (reported again; deadline replaced)
/// - CoolingDown → Available (deadline passed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Available,
    CoolingDown { until_millis: u64 },
}

impl KeyStatus {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            KeyStatus::Available => "available",
            KeyStatus::CoolingDown { .. } => "cooling_down",
        }
    }
}

/// Picks an index among `candidates` available keys.
///
/// Injected so fallback selection can be made reproducible in tests.
pub trait KeyChooser: Send + Sync {
    /// Return a value in `0..candidates`. Never called with zero.
    fn choose(&self, candidates: usize) -> usize;
}

/// Uniform random choice. Not fair over time, which keeps load from pinning
/// onto whichever key happens to be first.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomChooser;

impl KeyChooser for RandomChooser {
    fn choose(&self, candidates: usize) -> usize {
        rand::rng().random_range(0..candidates)
    }
}

/// Pool of API keys shared by every dispatcher call.
///
/// Keys and affinity are fixed at construction; only the cooldown map changes
/// at runtime, behind an `RwLock`.
pub struct KeyPool {
    keys: Vec<Credential>,
    affinity: HashMap<TaskType, Credential>,
    cooldowns: RwLock<HashMap<Credential, u64>>,
    clock: Arc<dyn Clock>,
    chooser: Arc<dyn KeyChooser>,
}

impl KeyPool {
    /// Create a pool from explicit keys and task affinity.
    ///
    /// Duplicate keys are dropped, keeping first occurrence order. Affinity
    /// keys do not have to appear in `keys`; they are still subject to
    /// cooldown tracking. An empty pool is valid here and fails on first use.
    pub fn new(keys: Vec<Credential>, affinity: HashMap<TaskType, Credential>) -> Self {
        let mut unique: Vec<Credential> = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        info!(
            keys = unique.len(),
            affinity = affinity.len(),
            "key pool initialized"
        );
        Self {
            keys: unique,
            affinity,
            cooldowns: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
            chooser: Arc::new(RandomChooser),
        }
    }

    /// Merge every source into one deduplicated pool.
    pub fn load(sources: &KeySources) -> Self {
        let keys = sources.entries().into_iter().map(Credential::new).collect();
        let affinity = sources
            .affinity
            .iter()
            .map(|(task, key)| (*task, Credential::new(key.clone())))
            .collect();
        Self::new(keys, affinity)
    }

    /// Replace the time source used for cooldown deadlines.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the random source used for fallback selection.
    pub fn with_chooser(mut self, chooser: Arc<dyn KeyChooser>) -> Self {
        self.chooser = chooser;
        self
    }

    /// Number of keys in the shared pool (affinity-only keys excluded).
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in the shared pool, in load order.
    pub fn keys(&self) -> &[Credential] {
        &self.keys
    }

    /// Preferred key for `task`, if one is configured.
    pub fn affinity_key(&self, task: TaskType) -> Option<&Credential> {
        self.affinity.get(&task)
    }

    /// Return a usable key for `task`.
    ///
    /// The task's affinity key wins if it is not cooling down. Otherwise one
    /// of the shared keys that is not cooling down is picked at random.
    ///
    /// Returns `Configuration` when the shared pool is empty and the task has
    /// no usable affinity key, and `Exhausted` (with pool counts) when every
    /// shared key is cooling down.
    pub async fn get_valid_key(&self, task: TaskType) -> Result<Credential> {
        if self.keys.is_empty() && !self.affinity.contains_key(&task) {
            return Err(no_keys());
        }

        let now = self.clock.now_millis();
        let mut cooldowns = self.cooldowns.write().await;
        cooldowns.retain(|key, until| {
            let cooling = *until > now;
            if !cooling {
                info!(key = key.id(), "cooldown expired, key available again");
            }
            cooling
        });

        if let Some(preferred) = self.affinity.get(&task) {
            if !cooldowns.contains_key(preferred) {
                return Ok(preferred.clone());
            }
            debug!(
                task = task.label(),
                key = preferred.id(),
                "affinity key cooling down, falling back to pool"
            );
        }

        if self.keys.is_empty() {
            return Err(no_keys());
        }

        let available: Vec<&Credential> = self
            .keys
            .iter()
            .filter(|key| !cooldowns.contains_key(*key))
            .collect();

        if available.is_empty() {
            let total = self.keys.len();
            return Err(Error::Exhausted(exhausted_message(total, 0, total)));
        }

        let last = available.len() - 1;
        let index = self.chooser.choose(available.len()).min(last);
        Ok(available[index].clone())
    }

    /// Put `key` into cooldown for `cooldown` (usually `DEFAULT_COOLDOWN`).
    ///
    /// Keys the pool has not seen before (e.g. an affinity-only key) are
    /// tracked from this point on.
    pub async fn mark_rate_limited(&self, key: &Credential, cooldown: Duration) {
        let millis = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
        let until = self.clock.now_millis().saturating_add(millis);
        self.cooldowns.write().await.insert(key.clone(), until);
        info!(
            key = key.id(),
            cooldown_secs = cooldown.as_secs(),
            "key entering cooldown (rate limited)"
        );
    }

    /// Current status of `key`.
    pub async fn status(&self, key: &Credential) -> KeyStatus {
        let now = self.clock.now_millis();
        match self.cooldowns.read().await.get(key) {
            Some(until) if *until > now => KeyStatus::CoolingDown {
                until_millis: *until,
            },
            _ => KeyStatus::Available,
        }
    }

    /// Pool health summary.
    ///
    /// Status mapping: all keys available → healthy, some available →
    /// degraded, none available → unhealthy. Keys appear by safe id only.
    pub async fn health(&self) -> serde_json::Value {
        let now = self.clock.now_millis();
        let cooldowns = self.cooldowns.read().await;

        let mut keys = Vec::new();
        let mut available_count = 0usize;
        let mut cooling_count = 0usize;

        for key in &self.keys {
            match cooldowns.get(key) {
                Some(until) if *until > now => {
                    cooling_count += 1;
                    keys.push(serde_json::json!({
                        "id": key.id(),
                        "status": "cooling_down",
                        "cooldown_remaining_secs": (*until - now).div_ceil(1000),
                    }));
                }
                _ => {
                    available_count += 1;
                    keys.push(serde_json::json!({
                        "id": key.id(),
                        "status": "available",
                    }));
                }
            }
        }

        let mut affinity: Vec<(&TaskType, &Credential)> = self.affinity.iter().collect();
        affinity.sort_by_key(|(task, _)| task.label());
        let affinity: serde_json::Map<String, serde_json::Value> = affinity
            .into_iter()
            .map(|(task, key)| {
                let status = match cooldowns.get(key) {
                    Some(until) if *until > now => "cooling_down",
                    _ => "available",
                };
                (
                    task.label().to_string(),
                    serde_json::json!({ "id": key.id(), "status": status }),
                )
            })
            .collect();

        let total = self.keys.len();
        let pool_status = if available_count == total && total > 0 {
            "healthy"
        } else if available_count > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": pool_status,
            "keys_total": total,
            "keys_available": available_count,
            "keys_cooling_down": cooling_count,
            "keys": keys,
            "affinity": affinity,
        })
    }
}

fn no_keys() -> Error {
    Error::Configuration("no API keys configured".into())
}

/// Build the exhausted error message JSON.
fn exhausted_message(total: usize, available: usize, cooling: usize) -> String {
    serde_json::json!({
        "error": {
            "type": "keys_exhausted",
            "message": "All API keys are cooling down",
            "pool": {
                "keys_total": total,
                "keys_available": available,
                "keys_cooling_down": cooling
            }
        }
    })
    .to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Chooser that replays a fixed sequence of indices, then repeats the last.
    pub(crate) struct ScriptedChooser {
        picks: Mutex<Vec<usize>>,
    }

    impl ScriptedChooser {
        pub(crate) fn new(picks: &[usize]) -> Self {
            let mut picks = picks.to_vec();
            picks.reverse();
            Self {
                picks: Mutex::new(picks),
            }
        }
    }

    impl KeyChooser for ScriptedChooser {
        fn choose(&self, candidates: usize) -> usize {
            let mut picks = self.picks.lock().unwrap();
            let pick = if picks.len() > 1 {
                picks.pop().unwrap()
            } else {
                picks.last().copied().unwrap_or(0)
            };
            pick % candidates
        }
    }

    fn creds(values: &[&str]) -> Vec<Credential> {
        values.iter().map(|v| Credential::new(*v)).collect()
    }

    fn pool_with_clock(keys: &[&str], clock: Arc<ManualClock>) -> KeyPool {
        KeyPool::new(creds(keys), HashMap::new()).with_clock(clock)
    }

    #[tokio::test]
    async fn fresh_pool_always_returns_member() {
        let keys = creds(&["key_a", "key_b", "key_c"]);
        let pool = KeyPool::new(keys.clone(), HashMap::new());

        for _ in 0..200 {
            let key = pool.get_valid_key(TaskType::General).await.unwrap();
            assert!(keys.contains(&key));
        }
    }

    #[tokio::test]
    async fn random_selection_spreads_over_keys() {
        let pool = KeyPool::new(creds(&["key_a", "key_b", "key_c"]), HashMap::new());
        let mut seen = HashSet::new();
        for _ in 0..300 {
            seen.insert(pool.get_valid_key(TaskType::General).await.unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn cooling_key_skipped_until_deadline_passes() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let pool = pool_with_clock(&["key_k", "key_j"], clock.clone())
            .with_chooser(Arc::new(ScriptedChooser::new(&[0])));
        let k = Credential::new("key_k");

        pool.mark_rate_limited(&k, Duration::from_secs(5)).await;

        for _ in 0..100 {
            let key = pool.get_valid_key(TaskType::General).await.unwrap();
            assert_ne!(key, k);
        }

        clock.advance(Duration::from_millis(4_999));
        let key = pool.get_valid_key(TaskType::General).await.unwrap();
        assert_ne!(key, k, "key must stay cooling until the full 5s pass");

        clock.advance(Duration::from_millis(2));
        // Chooser always picks index 0, which is key_k once it is back.
        let key = pool.get_valid_key(TaskType::General).await.unwrap();
        assert_eq!(key, k);
    }

    #[tokio::test]
    async fn affinity_key_returned_deterministically() {
        let notes = Credential::new("notes_key");
        let pool = KeyPool::new(
            creds(&["key_a", "key_b", "notes_key"]),
            HashMap::from([(TaskType::Notes, notes.clone())]),
        );

        for _ in 0..100 {
            assert_eq!(pool.get_valid_key(TaskType::Notes).await.unwrap(), notes);
        }
    }

    #[tokio::test]
    async fn cooling_affinity_key_falls_back_to_pool() {
        let notes = Credential::new("notes_key");
        let pool = KeyPool::new(
            creds(&["key_a", "key_b", "notes_key"]),
            HashMap::from([(TaskType::Notes, notes.clone())]),
        );

        pool.mark_rate_limited(&notes, Duration::from_secs(60))
            .await;

        for _ in 0..100 {
            let key = pool.get_valid_key(TaskType::Notes).await.unwrap();
            assert_ne!(key, notes);
        }
    }

    #[tokio::test]
    async fn affinity_only_key_is_tracked_on_first_mark() {
        let clock = Arc::new(ManualClock::new(0));
        let quiz = Credential::new("quiz_only");
        let pool = KeyPool::new(
            creds(&["key_a"]),
            HashMap::from([(TaskType::Quiz, quiz.clone())]),
        )
        .with_clock(clock.clone());

        assert_eq!(pool.status(&quiz).await, KeyStatus::Available);
        pool.mark_rate_limited(&quiz, Duration::from_secs(10)).await;
        assert_eq!(
            pool.status(&quiz).await,
            KeyStatus::CoolingDown {
                until_millis: 10_000
            }
        );
        assert_eq!(
            pool.get_valid_key(TaskType::Quiz).await.unwrap(),
            Credential::new("key_a")
        );

        clock.advance(Duration::from_secs(10));
        assert_eq!(pool.get_valid_key(TaskType::Quiz).await.unwrap(), quiz);
    }

    #[tokio::test]
    async fn task_without_affinity_uses_shared_pool() {
        let pool = KeyPool::new(
            creds(&["key_a"]),
            HashMap::from([(TaskType::Notes, Credential::new("notes_key"))]),
        );
        assert_eq!(
            pool.get_valid_key(TaskType::Flashcards).await.unwrap(),
            Credential::new("key_a")
        );
    }

    #[tokio::test]
    async fn empty_pool_is_configuration_error() {
        let pool = KeyPool::new(vec![], HashMap::new());
        let err = pool.get_valid_key(TaskType::General).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "got: {err}");
    }

    #[tokio::test]
    async fn affinity_only_pool_without_usable_key_is_configuration_error() {
        let notes = Credential::new("notes_key");
        let pool = KeyPool::new(vec![], HashMap::from([(TaskType::Notes, notes.clone())]));

        assert_eq!(pool.get_valid_key(TaskType::Notes).await.unwrap(), notes);

        let err = pool.get_valid_key(TaskType::General).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "got: {err}");
        assert!(!err.is_retryable_later());

        pool.mark_rate_limited(&notes, Duration::from_secs(60))
            .await;
        let err = pool.get_valid_key(TaskType::Notes).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "got: {err}");
    }

    #[tokio::test]
    async fn huge_cooldown_saturates_deadline() {
        let clock = Arc::new(ManualClock::new(1_000));
        let pool = pool_with_clock(&["key_a", "key_b"], clock);
        let a = Credential::new("key_a");

        pool.mark_rate_limited(&a, Duration::from_secs(u64::MAX))
            .await;

        assert_eq!(
            pool.status(&a).await,
            KeyStatus::CoolingDown {
                until_millis: u64::MAX
            }
        );
        assert_eq!(
            pool.get_valid_key(TaskType::General).await.unwrap(),
            Credential::new("key_b")
        );
    }

    #[tokio::test]
    async fn all_cooling_is_exhausted_with_counts() {
        let pool = KeyPool::new(creds(&["key_a", "key_b"]), HashMap::new());
        for key in creds(&["key_a", "key_b"]) {
            pool.mark_rate_limited(&key, Duration::from_secs(60)).await;
        }

        let err = pool.get_valid_key(TaskType::General).await.unwrap_err();
        let msg = match err {
            Error::Exhausted(msg) => msg,
            other => panic!("expected Exhausted, got {other:?}"),
        };
        let json: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(json["error"]["type"], "keys_exhausted");
        assert_eq!(json["error"]["pool"]["keys_total"], 2);
        assert_eq!(json["error"]["pool"]["keys_available"], 0);
        assert_eq!(json["error"]["pool"]["keys_cooling_down"], 2);
    }

    #[tokio::test]
    async fn cooling_affinity_with_cooling_pool_is_exhausted() {
        let notes = Credential::new("notes_key");
        let pool = KeyPool::new(
            creds(&["key_a", "key_b"]),
            HashMap::from([(TaskType::Notes, notes.clone())]),
        );
        for key in creds(&["key_a", "key_b", "notes_key"]) {
            pool.mark_rate_limited(&key, Duration::from_secs(60)).await;
        }
        let err = pool.get_valid_key(TaskType::Notes).await.unwrap_err();
        assert!(matches!(err, Error::Exhausted(_)));
    }

    #[tokio::test]
    async fn load_deduplicates_across_sources() {
        let mut sources = KeySources::default();
        sources.bulk.push("key_A,key_B,key_C".into());
        sources.legacy.push("key_B".into());
        sources.legacy.push("key_legacy_1".into());
        sources.alias = Some("key_A, key_D".into());

        let pool = KeyPool::load(&sources);
        let ids: HashSet<&str> = pool.keys().iter().map(|k| k.expose()).collect();
        assert_eq!(pool.len(), 5);
        assert_eq!(
            ids,
            HashSet::from(["key_A", "key_B", "key_C", "key_D", "key_legacy_1"])
        );
    }

    #[tokio::test]
    async fn load_from_empty_sources_defers_failure() {
        let pool = KeyPool::load(&KeySources::default());
        assert!(pool.is_empty());
        assert!(matches!(
            pool.get_valid_key(TaskType::General).await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn load_wires_affinity() {
        let mut sources = KeySources::default();
        sources.legacy.push("notes_key".into());
        sources.affinity.insert(TaskType::Notes, "notes_key".into());
        let pool = KeyPool::load(&sources);
        assert_eq!(
            pool.affinity_key(TaskType::Notes),
            Some(&Credential::new("notes_key"))
        );
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn repeated_mark_replaces_deadline() {
        let clock = Arc::new(ManualClock::new(0));
        let pool = pool_with_clock(&["key_a"], clock.clone());
        let a = Credential::new("key_a");

        pool.mark_rate_limited(&a, Duration::from_secs(60)).await;
        pool.mark_rate_limited(&a, Duration::from_secs(5)).await;
        clock.advance(Duration::from_secs(5));
        assert_eq!(pool.get_valid_key(TaskType::General).await.unwrap(), a);
    }

    #[tokio::test]
    async fn concurrent_marks_and_selects_are_consistent() {
        let pool = Arc::new(KeyPool::new(
            creds(&["k0", "k1", "k2", "k3", "k4", "k5", "k6", "k7"]),
            HashMap::new(),
        ));

        let mut handles = Vec::new();
        for i in 0..4 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let key = Credential::new(format!("k{i}"));
                pool.mark_rate_limited(&key, Duration::from_secs(60)).await;
            }));
        }
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    pool.get_valid_key(TaskType::General).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        for _ in 0..50 {
            let key = pool.get_valid_key(TaskType::General).await.unwrap();
            let n: usize = key.expose()[1..].parse().unwrap();
            assert!(n >= 4, "cooling key {} selected", key.expose());
        }
    }

    #[tokio::test]
    async fn health_reports_counts_and_safe_ids() {
        let clock = Arc::new(ManualClock::new(0));
        let pool = KeyPool::new(
            creds(&["secret_aaaa", "secret_bbbb"]),
            HashMap::from([(TaskType::Quiz, Credential::new("secret_qqqq"))]),
        )
        .with_clock(clock.clone());

        let health = pool.health().await;
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["keys_total"], 2);

        pool.mark_rate_limited(&Credential::new("secret_aaaa"), Duration::from_secs(30))
            .await;
        clock.advance(Duration::from_millis(500));

        let health = pool.health().await;
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["keys_available"], 1);
        assert_eq!(health["keys_cooling_down"], 1);
        let keys = health["keys"].as_array().unwrap();
        assert_eq!(keys[0]["id"], "...aaaa");
        assert_eq!(keys[0]["status"], "cooling_down");
        assert_eq!(keys[0]["cooldown_remaining_secs"], 30);
        assert_eq!(health["affinity"]["quiz"]["id"], "...qqqq");

        let rendered = health.to_string();
        assert!(!rendered.contains("secret_"), "raw key leaked: {rendered}");
    }

    #[tokio::test]
    async fn health_empty_pool_is_unhealthy() {
        let pool = KeyPool::new(vec![], HashMap::new());
        let health = pool.health().await;
        assert_eq!(health["status"], "unhealthy");
        assert_eq!(health["keys_total"], 0);
    }

    #[test]
    fn status_labels() {
        assert_eq!(KeyStatus::Available.label(), "available");
        assert_eq!(
            KeyStatus::CoolingDown { until_millis: 1 }.label(),
            "cooling_down"
        );
    }
}
