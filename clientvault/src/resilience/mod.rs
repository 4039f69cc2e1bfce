pub mod connectivity;
pub mod retry;

use std::sync::{Mutex, MutexGuard};

pub use connectivity::{
    AlwaysRemote, ConnectivityConfig, ConnectivityMonitor, ConnectivityState, ConnectivityStatus,
    ConnectivityTracker, RouteHint,
};
pub use retry::{
    Classify, FailureClass, RetryExecutor, RetryPolicy, Sleeper, TokioSleeper,
    message_indicates_transient,
};

// A panicking subscriber must not wedge every later lock.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
