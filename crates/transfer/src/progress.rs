//! Advisory progress reporting.
//!
//! Workers bump a shared byte counter and ring a single-slot doorbell; the
//! reporter task reads the counter when woken and logs whenever cumulative
//! progress crosses another +5% boundary. Senders never block and dropped
//! signals are expected; the counter is the source of truth.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::info;

const STEP: u64 = 5;

pub(crate) async fn report(
    mut signal: watch::Receiver<()>,
    bytes_received: Arc<AtomicU64>,
    file_size: u64,
) {
    let mut last_logged = 0u64;
    while signal.changed().await.is_ok() {
        let total = bytes_received.load(Ordering::Relaxed).min(file_size);
        let pct = total * 100 / file_size;
        if pct > last_logged && (pct >= last_logged + STEP || pct == 100) {
            info!("transfer progress: {pct}%");
            last_logged = pct;
        }
    }
}
