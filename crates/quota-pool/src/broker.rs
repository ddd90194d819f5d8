//! Quota broker: atomic reservations against pooled credentials
//!
//! `acquire` charges the cost up front and hands back a `Reservation`. The
//! caller settles it exactly once: `commit()` when the upstream call went
//! through, `release()` when it did not. A reservation dropped unsettled
//! (its task was cancelled mid-call) releases itself in the background.
//!
//! Acquisition runs in its own task so a caller cancelled while waiting on
//! the store lock cannot interrupt the transaction halfway; the finished
//! reservation is then dropped and releases.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{Credential, PoolKind, PoolSelector, Session};
use crate::store::Store;

/// Hands out reservations from the credential store.
#[derive(Clone)]
pub struct QuotaBroker {
    store: Arc<Store>,
}

impl QuotaBroker {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Reserve `cost` units from the least-used credential `selector` allows.
    ///
    /// Fails with `QuotaExhausted` when no eligible credential has room.
    /// `cost == 0` still selects a credential.
    pub async fn acquire(&self, selector: PoolSelector, cost: u64) -> Result<Reservation> {
        let pool = selector.pool();
        let store = Arc::clone(&self.store);
        let task = tokio::spawn(async move {
            let reserved = store.acquire_available(&selector, cost).await?;
            Ok::<_, Error>(Reservation {
                store,
                credential: reserved.credential,
                session: reserved.session,
                cost,
                settled: false,
            })
        });

        let outcome = match task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Io(format!("reservation task failed: {e}"))),
        };

        let label = match &outcome {
            Ok(_) => "reserved",
            Err(Error::QuotaExhausted { .. }) => "exhausted",
            Err(_) => "error",
        };
        metrics::counter!(
            "autocc_quota_reservations_total",
            "pool" => pool.label(),
            "outcome" => label
        )
        .increment(1);

        if let Err(e) = &outcome {
            debug!(pool = %pool, cost, error = %e, "reservation failed");
        }
        outcome
    }
}

/// Capacity reserved on one credential, settled by `commit` or `release`.
pub struct Reservation {
    store: Arc<Store>,
    credential: Credential,
    session: Option<Session>,
    cost: u64,
    settled: bool,
}

impl Reservation {
    /// Credential snapshot taken right after the usage increment.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Session the credential was reached through (video pool only).
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    /// The reserved capacity was consumed.
    pub fn commit(mut self) {
        self.settled = true;
        debug!(credential_id = %self.credential.id, cost = self.cost, "reservation committed");
    }

    /// Give the capacity back. Failures are logged, never returned: the
    /// caller is already handling the error that made it release.
    pub async fn release(mut self) {
        self.settled = true;
        release_quietly(&self.store, &self.credential.id, self.credential.pool, self.cost).await;
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("credential", &self.credential)
            .field("session", &self.session.as_ref().map(|s| &s.id))
            .field("cost", &self.cost)
            .field("settled", &self.settled)
            .finish()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled || self.cost == 0 {
            return;
        }
        let store = Arc::clone(&self.store);
        let credential_id = self.credential.id.clone();
        let pool = self.credential.pool;
        let cost = self.cost;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(credential_id = %credential_id, cost, "unsettled reservation dropped, releasing");
                handle.spawn(async move {
                    release_quietly(&store, &credential_id, pool, cost).await;
                });
            }
            Err(_) => {
                warn!(credential_id = %credential_id, cost, "reservation dropped outside a runtime, quota not released");
            }
        }
    }
}

async fn release_quietly(store: &Store, credential_id: &str, pool: PoolKind, cost: u64) {
    if cost == 0 {
        return;
    }
    match store.release(credential_id, cost).await {
        Ok(()) => {
            metrics::counter!("autocc_quota_released_total", "pool" => pool.label())
                .increment(1);
        }
        Err(e) => {
            warn!(credential_id, cost, error = %e, "failed to release reserved quota");
        }
    }
}
