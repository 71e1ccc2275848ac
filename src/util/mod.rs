pub mod rand_kv;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since the unix epoch, saturating at `u32::MAX`.
pub(crate) fn unix_seconds() -> u32 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
    .min(u64::from(u32::MAX)) as u32
}
