use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Class of outbound call; each gets its own bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    PageLoad,
    MediaApi,
    Storage,
    Transcription,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Destination::PageLoad => "page_load",
            Destination::MediaApi => "media_api",
            Destination::Storage => "storage",
            Destination::Transcription => "transcription",
        };
        f.write_str(name)
    }
}

/// Single-token bucket: the next instant a call may go out
struct Bucket {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

/// Per-destination pacing of outbound calls.
///
/// `acquire` never drops a call, it only delays it. Waiters on the same
/// destination queue on a fair mutex and leave at least `interval` apart.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<HashMap<Destination, Bucket>>,
}

impl RateLimiter {
    pub fn new(intervals: impl IntoIterator<Item = (Destination, Duration)>) -> Self {
        let buckets = intervals
            .into_iter()
            .map(|(destination, interval)| {
                (
                    destination,
                    Bucket {
                        interval,
                        next_slot: Mutex::new(None),
                    },
                )
            })
            .collect();
        Self {
            buckets: Arc::new(buckets),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new([
            (Destination::PageLoad, Duration::from_millis(config.page_load_ms)),
            (Destination::MediaApi, Duration::from_millis(config.media_api_ms)),
            (Destination::Storage, Duration::from_millis(config.storage_ms)),
            (Destination::Transcription, Duration::from_millis(config.transcription_ms)),
        ])
    }

    /// No pacing at all; for tests and dry runs
    pub fn unlimited() -> Self {
        Self::new([])
    }

    pub fn interval(&self, destination: Destination) -> Duration {
        self.buckets
            .get(&destination)
            .map(|b| b.interval)
            .unwrap_or(Duration::ZERO)
    }

    /// Wait until `destination` has a free slot, then claim it
    pub async fn acquire(&self, destination: Destination) {
        let Some(bucket) = self.buckets.get(&destination) else {
            return;
        };
        if bucket.interval.is_zero() {
            return;
        }

        // Held across the sleep so later callers queue behind this one
        let mut next_slot = bucket.next_slot.lock().await;
        if let Some(slot) = *next_slot {
            if slot > Instant::now() {
                tracing::trace!("Rate limiting {}: waiting {:?}", destination, slot - Instant::now());
                tokio::time::sleep_until(slot).await;
            }
        }
        *next_slot = Some(Instant::now() + bucket.interval);
    }
}
