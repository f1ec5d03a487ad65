//! Sync-over-async boundary.
//!
//! The agent runtime is synchronous; HTTP, child-process I/O and timeouts are
//! async. Every crossing goes through this module: one multi-threaded tokio
//! runtime, created lazily on first use and kept for the life of the process.

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// The process-wide runtime.
///
/// # Panics
/// If the OS refuses to create the runtime's worker threads on first use.
pub fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        Builder::new_multi_thread()
            .enable_all()
            .thread_name("voxagent-io")
            .build()
            .expect("failed to build voxagent tokio runtime")
    })
}

/// Block the current thread on `fut`.
///
/// Safe to call from inside another tokio context: the wait then happens on a
/// scoped helper thread so the caller's executor is never re-entered.
pub fn block_on<F>(fut: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    if Handle::try_current().is_ok() {
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| runtime().block_on(fut));
            match handle.join() {
                Ok(output) => output,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    } else {
        runtime().block_on(fut)
    }
}

/// [`block_on`] with a deadline.
pub fn block_on_timeout<F>(
    timeout: Duration,
    fut: F,
) -> Result<F::Output, tokio::time::error::Elapsed>
where
    F: Future + Send,
    F::Output: Send,
{
    block_on(async move { tokio::time::timeout(timeout, fut).await })
}
