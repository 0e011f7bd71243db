//! Resilient session / publish / consume core.
//!
//! - [`SessionSupply`]: keeps the broker connection alive and hands out
//!   single-use sessions.
//! - [`Publisher`]: confirm-gated publishing with retry on the next session.
//! - [`Consumer`]: resubscribing consumer with ack-after-forward.
//!
//! All three are plain tasks wired together with channels and a shared
//! [`CancellationToken`](tokio_util::sync::CancellationToken); none of them
//! reach into process-wide state.

mod consumer;
mod publisher;
mod supply;

pub use consumer::Consumer;
pub use publisher::Publisher;
pub use supply::SessionSupply;

use std::future::Future;
use std::time::Duration;

use crate::log_warn;

/// Longest a session or connection close may take before it is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Run a close, giving up after [`CLOSE_GRACE`] so a wedged broker cannot
/// hold up shutdown or a redial.
pub(crate) async fn close_within_grace<F>(what: &str, close: F)
where
    F: Future<Output = ()>,
{
    // ---
    if tokio::time::timeout(CLOSE_GRACE, close).await.is_err() {
        log_warn!("{what} did not close within {CLOSE_GRACE:?}, dropping it");
    }
}
