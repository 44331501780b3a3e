//! Process-wide byte counter hook shared by every endpoint.
use std::sync::Arc;

use parking_lot::RwLock;

/// Called with `(bytes, incoming)` for every chunk read from or written to a socket.
pub type OnTrafficTrackerCallback = Arc<dyn Fn(usize, bool) + Send + Sync>;

static TRAFFIC_TRACKER: RwLock<Option<OnTrafficTrackerCallback>> = parking_lot::const_rwlock(None);

pub(crate) fn set(callback: OnTrafficTrackerCallback) {
    *TRAFFIC_TRACKER.write() = Some(callback);
}

pub(crate) fn reset() {
    *TRAFFIC_TRACKER.write() = None;
}

/// Reports a transfer. The read guard is held during the call, so `set` and `reset` wait for
/// running callbacks to return.
pub(crate) fn track(size: usize, incoming: bool) {
    if let Some(callback) = TRAFFIC_TRACKER.read().as_ref() {
        callback(size, incoming);
    }
}
