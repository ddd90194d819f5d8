//! File-backed store for credentials, sessions and pending exchanges
//!
//! Manages a JSON file holding every record. All writes use atomic temp-file
//! + rename to prevent corruption on crash. A tokio Mutex is the transaction
//! boundary: each operation locks, mutates the in-memory state, persists, and
//! only then releases the lock. A failed persist rolls the in-memory change
//! back, so memory and disk never disagree on quota usage.
//!
//! Usage is zeroed lazily: when a reservation arrives after the pool's reset
//! period has elapsed since its cycle started, the pool is reset first.
//!
//! The same file holds a small expiring key/value table used as a persistent
//! cache (see `StoreCache`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::unix_millis;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{
    Credential, PendingExchange, PoolKind, PoolSelector, Reserved, Session, SessionTokens,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    credentials: BTreeMap<String, Credential>,
    #[serde(default)]
    sessions: BTreeMap<String, Session>,
    #[serde(default)]
    pending: BTreeMap<String, PendingExchange>,
    /// Start of the current quota cycle per pool, unix millis
    #[serde(default)]
    cycle_started: BTreeMap<PoolKind, u64>,
    #[serde(default)]
    cache: BTreeMap<String, CacheEntry>,
}

/// Value kinds of the persistent cache table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum CachedValue {
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: CachedValue,
    expires_at: u64,
}

/// Input for `Store::add_credential`.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub pool: PoolKind,
    pub key: String,
    pub secret: String,
    pub usage: u64,
    pub ceiling: u64,
}

/// Thread-safe store file manager.
pub struct Store {
    path: PathBuf,
    state: Mutex<StoreData>,
    reset_periods: BTreeMap<PoolKind, Duration>,
}

impl Store {
    /// Load the store from the given file path.
    ///
    /// If the file doesn't exist, creates it empty (cold start with no
    /// credentials). Acquisitions fail with `QuotaExhausted` until
    /// credentials are added.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading store file: {e}")))?;
            let data: StoreData = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing store file: {e}")))?;
            info!(
                path = %path.display(),
                credentials = data.credentials.len(),
                sessions = data.sessions.len(),
                "loaded store"
            );
            data
        } else {
            info!(path = %path.display(), "store file not found, starting empty");
            let data = StoreData::default();
            write_atomic(&path, &data).await?;
            data
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
            reset_periods: BTreeMap::new(),
        })
    }

    /// Zero `pool` usage once every `period`. Without a period the pool is
    /// only reset by `reset_usage`.
    pub fn with_reset_period(mut self, pool: PoolKind, period: Duration) -> Self {
        self.reset_periods.insert(pool, period);
        self
    }

    /// Add a credential. A key may appear only once per pool.
    pub async fn add_credential(&self, new: NewCredential) -> Result<Credential> {
        if new.key.trim().is_empty() {
            return Err(Error::InvalidInput("credential key is empty".into()));
        }
        if new.ceiling == 0 {
            return Err(Error::InvalidInput("ceiling must be greater than 0".into()));
        }
        if new.pool == PoolKind::Video && new.secret.is_empty() {
            return Err(Error::InvalidInput(
                "video credentials need a client secret".into(),
            ));
        }

        let mut state = self.state.lock().await;
        if state
            .credentials
            .values()
            .any(|c| c.pool == new.pool && c.key == new.key)
        {
            return Err(Error::InvalidInput(format!(
                "{} credential with this key already exists",
                new.pool
            )));
        }

        let credential = Credential {
            id: uuid::Uuid::new_v4().to_string(),
            pool: new.pool,
            key: new.key,
            secret: new.secret,
            usage: new.usage,
            ceiling: new.ceiling,
            created_at: unix_millis(),
        };
        state
            .credentials
            .insert(credential.id.clone(), credential.clone());
        if let Err(e) = write_atomic(&self.path, &state).await {
            state.credentials.remove(&credential.id);
            return Err(e);
        }
        debug!(credential_id = %credential.id, pool = %credential.pool, "added credential");
        Ok(credential)
    }

    /// Credentials, optionally restricted to one pool, ordered by id.
    pub async fn credentials(&self, pool: Option<PoolKind>) -> Vec<Credential> {
        let state = self.state.lock().await;
        state
            .credentials
            .values()
            .filter(|c| pool.is_none_or(|p| c.pool == p))
            .cloned()
            .collect()
    }

    pub async fn credential(&self, id: &str) -> Option<Credential> {
        let state = self.state.lock().await;
        state.credentials.get(id).cloned()
    }

    /// Remove a credential together with its sessions and pending exchanges.
    ///
    /// Returns the removed credential if it existed.
    pub async fn remove_credential(&self, id: &str) -> Result<Option<Credential>> {
        let mut state = self.state.lock().await;
        let Some(removed) = state.credentials.remove(id) else {
            return Ok(None);
        };
        let sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.credential_id == id)
            .cloned()
            .collect();
        let pending: Vec<PendingExchange> = state
            .pending
            .values()
            .filter(|p| p.credential_id == id)
            .cloned()
            .collect();
        state.sessions.retain(|_, s| s.credential_id != id);
        state.pending.retain(|_, p| p.credential_id != id);

        if let Err(e) = write_atomic(&self.path, &state).await {
            state.credentials.insert(removed.id.clone(), removed);
            state
                .sessions
                .extend(sessions.into_iter().map(|s| (s.id.clone(), s)));
            state
                .pending
                .extend(pending.into_iter().map(|p| (p.state.clone(), p)));
            return Err(e);
        }
        info!(credential_id = id, sessions = sessions.len(), "removed credential");
        Ok(Some(removed))
    }

    /// Store a new session for `user_id` against a video credential.
    pub async fn create_session(
        &self,
        user_id: &str,
        credential_id: &str,
        tokens: SessionTokens,
        scopes: Vec<String>,
    ) -> Result<Session> {
        if user_id.is_empty() {
            return Err(Error::InvalidInput("user id is empty".into()));
        }

        let mut state = self.state.lock().await;
        match state.credentials.get(credential_id) {
            Some(c) if c.pool == PoolKind::Video => {}
            Some(_) => {
                return Err(Error::InvalidInput(format!(
                    "credential {credential_id} is not a video credential"
                )));
            }
            None => {
                return Err(Error::NotFound(format!("credential {credential_id}")));
            }
        }

        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            credential_id: credential_id.to_string(),
            tokens,
            scopes,
            created_at: unix_millis(),
        };
        state.sessions.insert(session.id.clone(), session.clone());
        if let Err(e) = write_atomic(&self.path, &state).await {
            state.sessions.remove(&session.id);
            return Err(e);
        }
        debug!(session_id = %session.id, user_id, credential_id, "created session");
        Ok(session)
    }

    /// Sessions, optionally restricted to one user.
    pub async fn sessions(&self, user_id: Option<&str>) -> Vec<Session> {
        let state = self.state.lock().await;
        state
            .sessions
            .values()
            .filter(|s| user_id.is_none_or(|u| s.user_id == u))
            .cloned()
            .collect()
    }

    pub async fn remove_session(&self, id: &str) -> Result<Option<Session>> {
        let mut state = self.state.lock().await;
        let Some(removed) = state.sessions.remove(id) else {
            return Ok(None);
        };
        if let Err(e) = write_atomic(&self.path, &state).await {
            state.sessions.insert(removed.id.clone(), removed);
            return Err(e);
        }
        debug!(session_id = id, "removed session");
        Ok(Some(removed))
    }

    /// Replace the token fields of a session after a refresh.
    pub async fn update_session(&self, id: &str, tokens: &SessionTokens) -> Result<()> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("session {id}")))?;
        let previous = std::mem::replace(&mut session.tokens, tokens.clone());

        if let Err(e) = write_atomic(&self.path, &state).await {
            if let Some(session) = state.sessions.get_mut(id) {
                session.tokens = previous;
            }
            return Err(e);
        }
        debug!(session_id = id, expires_at = tokens.expires_at, "updated session tokens");
        Ok(())
    }

    pub async fn save_pending(&self, pending: PendingExchange) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = pending.state.clone();
        state.pending.insert(key.clone(), pending);
        if let Err(e) = write_atomic(&self.path, &state).await {
            state.pending.remove(&key);
            return Err(e);
        }
        Ok(())
    }

    /// Consume a pending exchange. Each state token can be taken once; an
    /// entry older than `ttl` is discarded and reported as not found.
    ///
    /// Expired entries of other states are purged on the way.
    pub async fn take_pending(&self, state_token: &str, ttl: Duration) -> Result<PendingExchange> {
        let now = unix_millis();
        let ttl_millis = ttl.as_millis() as u64;
        let is_live = |p: &PendingExchange| p.created_at + ttl_millis > now;

        let mut state = self.state.lock().await;
        let taken = state.pending.remove(state_token);
        state.pending.retain(|_, p| is_live(p));
        write_atomic(&self.path, &state).await?;

        match taken {
            Some(p) if is_live(&p) => Ok(p),
            Some(_) => Err(Error::NotFound("authorization state expired".into())),
            None => Err(Error::NotFound("unknown authorization state".into())),
        }
    }

    /// Reserve `cost` units from the least-used eligible credential.
    ///
    /// Eligible rows are ordered by ascending usage (ties by credential id,
    /// then session id); the first with `usage + cost <= ceiling` is charged.
    /// The increment is persisted before this returns.
    pub async fn acquire_available(&self, selector: &PoolSelector, cost: u64) -> Result<Reserved> {
        let mut state = self.state.lock().await;
        self.roll_cycle(&mut state, selector.pool(), unix_millis())
            .await?;

        let mut candidates: Vec<(&Credential, Option<&Session>)> = match selector {
            PoolSelector::Translation => state
                .credentials
                .values()
                .filter(|c| c.pool == PoolKind::Translation)
                .map(|c| (c, None))
                .collect(),
            PoolSelector::Video { user_id } => state
                .sessions
                .values()
                .filter(|s| &s.user_id == user_id)
                .filter_map(|s| {
                    state
                        .credentials
                        .get(&s.credential_id)
                        .filter(|c| c.pool == PoolKind::Video)
                        .map(|c| (c, Some(s)))
                })
                .collect(),
        };
        candidates.sort_by(|(a, sa), (b, sb)| {
            a.usage
                .cmp(&b.usage)
                .then_with(|| a.id.cmp(&b.id))
                .then_with(|| sa.map(|s| &s.id).cmp(&sb.map(|s| &s.id)))
        });

        let (credential_id, session) = candidates
            .into_iter()
            .find(|(c, _)| {
                c.usage
                    .checked_add(cost)
                    .is_some_and(|total| total <= c.ceiling)
            })
            .map(|(c, s)| (c.id.clone(), s.cloned()))
            .ok_or(Error::QuotaExhausted {
                pool: selector.pool(),
                cost,
            })?;

        let credential = state
            .credentials
            .get_mut(&credential_id)
            .ok_or_else(|| Error::NotFound(format!("credential {credential_id}")))?;
        credential.usage += cost;
        let snapshot = credential.clone();

        if let Err(e) = write_atomic(&self.path, &state).await {
            if let Some(c) = state.credentials.get_mut(&credential_id) {
                c.usage -= cost;
            }
            return Err(e);
        }

        debug!(
            credential_id = %snapshot.id,
            cost,
            usage = snapshot.usage,
            ceiling = snapshot.ceiling,
            "reserved quota"
        );
        Ok(Reserved {
            credential: snapshot,
            session,
            cost,
        })
    }

    /// Give back `cost` units to a credential. Usage never goes below zero.
    pub async fn release(&self, credential_id: &str, cost: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        let credential = state
            .credentials
            .get_mut(credential_id)
            .ok_or_else(|| Error::NotFound(format!("credential {credential_id}")))?;
        let before = credential.usage;
        credential.usage = before.saturating_sub(cost);

        if let Err(e) = write_atomic(&self.path, &state).await {
            if let Some(c) = state.credentials.get_mut(credential_id) {
                c.usage = before;
            }
            return Err(e);
        }
        debug!(credential_id, cost, "released quota");
        Ok(())
    }

    /// Zero the usage of every credential in `pool` and start a new cycle.
    /// Returns how many credentials were reset.
    pub async fn reset_usage(&self, pool: PoolKind) -> Result<usize> {
        let mut state = self.state.lock().await;
        let previous = zero_usage(&mut state, pool);
        let started = state.cycle_started.insert(pool, unix_millis());

        if let Err(e) = write_atomic(&self.path, &state).await {
            restore_usage(&mut state, &previous);
            restore_cycle(&mut state, pool, started);
            return Err(e);
        }
        Ok(previous.len())
    }

    /// Reset `pool` when its period has elapsed at `now`. The new cycle
    /// starts on the period boundary, not at `now`, so cycles do not drift.
    ///
    /// The first call for a pool only records the cycle start.
    async fn roll_cycle(&self, state: &mut StoreData, pool: PoolKind, now: u64) -> Result<()> {
        let Some(period) = self.reset_periods.get(&pool) else {
            return Ok(());
        };
        let period = (period.as_millis() as u64).max(1);
        let started = *state.cycle_started.entry(pool).or_insert(now);
        let elapsed = now.saturating_sub(started);
        if elapsed < period {
            return Ok(());
        }

        let previous = zero_usage(state, pool);
        let next = started + elapsed / period * period;
        state.cycle_started.insert(pool, next);
        if let Err(e) = write_atomic(&self.path, state).await {
            restore_usage(state, &previous);
            state.cycle_started.insert(pool, started);
            return Err(e);
        }
        info!(pool = %pool, credentials = previous.len(), cycle_started = next, "quota usage reset");
        Ok(())
    }

    /// Live cache value under `key`.
    pub(crate) async fn cached(&self, key: &str) -> Option<CachedValue> {
        let now = unix_millis();
        let state = self.state.lock().await;
        state
            .cache
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    /// Store `value` under `key` until `ttl` passes. Expired entries are
    /// purged on the way.
    pub(crate) async fn cache_put(&self, key: &str, value: CachedValue, ttl: Duration) -> Result<()> {
        let now = unix_millis();
        let mut state = self.state.lock().await;
        let before = state.cache.clone();
        state.cache.retain(|_, e| e.expires_at > now);
        state.cache.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now.saturating_add(ttl.as_millis() as u64),
            },
        );
        if let Err(e) = write_atomic(&self.path, &state).await {
            state.cache = before;
            return Err(e);
        }
        Ok(())
    }

    pub(crate) async fn cache_remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(removed) = state.cache.remove(key) else {
            return Ok(());
        };
        if let Err(e) = write_atomic(&self.path, &state).await {
            state.cache.insert(key.to_string(), removed);
            return Err(e);
        }
        Ok(())
    }
}

/// Zero `pool` usage, returning the previous usage of every changed row.
fn zero_usage(state: &mut StoreData, pool: PoolKind) -> Vec<(String, u64)> {
    state
        .credentials
        .values_mut()
        .filter(|c| c.pool == pool && c.usage > 0)
        .map(|c| (c.id.clone(), std::mem::take(&mut c.usage)))
        .collect()
}

fn restore_usage(state: &mut StoreData, previous: &[(String, u64)]) {
    for (id, usage) in previous {
        if let Some(c) = state.credentials.get_mut(id) {
            c.usage = *usage;
        }
    }
}

fn restore_cycle(state: &mut StoreData, pool: PoolKind, started: Option<u64>) {
    match started {
        Some(started) => state.cycle_started.insert(pool, started),
        None => state.cycle_started.remove(&pool),
    };
}

/// Write the store to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains client secrets and tokens.
async fn write_atomic(path: &Path, data: &StoreData) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Parse(format!("serializing store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("store path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".store.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp store file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting store file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp store file: {e}")))?;

    debug!(path = %path.display(), "persisted store");
    Ok(())
}
