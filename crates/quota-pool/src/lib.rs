//! Quota-bounded credential pool
//!
//! Pooled provider credentials each carry a provider-enforced usage budget.
//! The store persists credentials, user sessions and pending authorization
//! exchanges; the broker reserves capacity atomically before every upstream
//! call and gives it back when the call fails.
//!
//! Reservation lifecycle:
//! 1. Caller asks `QuotaBroker::acquire(selector, cost)`
//! 2. Store picks the least-used eligible credential with room for `cost`,
//!    increments its usage and persists, all under one lock
//! 3. Caller makes the upstream call with the reserved credential
//! 4. Success → `Reservation::commit()`; failure → `Reservation::release()`
//! 5. A reservation dropped unsettled releases itself
//! 6. Once a pool's reset period has elapsed, the next acquisition zeroes
//!    its usage first

pub mod broker;
pub mod error;
pub mod model;
pub mod quota;
pub mod store;
pub mod store_cache;

pub use broker::{QuotaBroker, Reservation};
pub use error::{Error, Result};
pub use model::{
    Credential, PendingExchange, PoolKind, PoolSelector, Reserved, Session, SessionTokens,
};
pub use store::{NewCredential, Store};
pub use store_cache::StoreCache;
