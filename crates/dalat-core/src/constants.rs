//! Defaults shared by configuration and the queue.

use std::time::Duration;

/// Uploads allowed in an active phase at once. Kept low for mobile links.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Automatic retries before an item settles into the error state.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before each automatic retry, indexed by the item's retry count.
/// Counts past the end reuse the last entry.
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(1000),
    Duration::from_millis(2000),
    Duration::from_millis(4000),
];

/// Bucket used when none is configured.
pub const DEFAULT_BUCKET: &str = "moments";

/// Upper bound for a progress value.
pub const MAX_PROGRESS: u8 = 100;
