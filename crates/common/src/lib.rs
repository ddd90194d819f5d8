//! Common types shared by the autocc crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{Secret, mask};

use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future used by the dyn-compatible collaborator traits
/// (`Arc<dyn VideoProvider>`, `Arc<dyn Cache>`, ...).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Current wall-clock time as unix milliseconds.
///
/// Token expiries and pending-exchange timestamps are stored in this unit.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_millis_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(unix_millis() > 1_577_836_800_000);
    }
}
