//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;

use runesync_core::sync::{Frame, SyncChannel, SyncTarget};
use tokio::sync::mpsc::UnboundedReceiver;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Deliver every frame queued in `outbound` to `channel`.
///
/// Returns the number of frames delivered.
pub fn pump<T: SyncTarget>(outbound: &mut UnboundedReceiver<Frame>, channel: &SyncChannel<T>) -> usize {
    let mut delivered = 0;
    while let Ok(frame) = outbound.try_recv() {
        channel.receive(&frame).expect("frame rejected");
        delivered += 1;
    }
    delivered
}
