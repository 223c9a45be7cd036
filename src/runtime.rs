// SPDX-License-Identifier: MPL-2.0

//! Shared async runtime for callers that do not run their own.
//!
//! A UI main loop can drive [`SyncEngine`](crate::sync::SyncEngine) through
//! this runtime instead of building one per request.

use once_cell::sync::OnceCell;
use std::future::Future;
use tokio::runtime::Runtime;

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// The shared multi-threaded runtime, built on first use.
/// Two workers are plenty for I/O-bound fetches; commits run on the blocking pool.
pub fn runtime() -> std::io::Result<&'static Runtime> {
    RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("hangar-sync")
            .build()
    })
}

/// Execute a future on the shared runtime, blocking until completion.
/// Must not be called from inside another runtime.
pub fn block_on<F: Future>(future: F) -> std::io::Result<F::Output> {
    Ok(runtime()?.block_on(future))
}

/// Spawn a future on the shared runtime without blocking.
pub fn spawn<F>(future: F) -> std::io::Result<tokio::task::JoinHandle<F::Output>>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Ok(runtime()?.spawn(future))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on_and_spawn_share_runtime() {
        let handle = spawn(async { 40 + 2 }).unwrap();
        let value = block_on(async { handle.await.unwrap() }).unwrap();
        assert_eq!(value, 42);
    }
}
