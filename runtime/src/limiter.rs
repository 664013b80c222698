use scholia_core::config::LaneConfig;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::warn;

pub const LANE_LLM: &str = "llm";
pub const LANE_EMBED: &str = "embed";
pub const LANE_SOURCE_BIBLIOGRAPHIC: &str = "source_bibliographic";
pub const LANE_SOURCE_FULLTEXT: &str = "source_fulltext";

struct Lane {
    semaphore: Arc<Semaphore>,
    min_spacing: Option<Duration>,
    last_start: Mutex<Option<Instant>>,
}

impl Lane {
    fn new(max_concurrent: usize, min_spacing: Option<Duration>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            min_spacing,
            last_start: Mutex::new(None),
        }
    }
}

/// Named concurrency lanes. Admission within a lane is FIFO (tokio's
/// semaphore is fair); `min_spacing` separates admitted starts. The limiter
/// carries no timeout of its own; cancellation is the caller's.
pub struct LaneLimiter {
    lanes: HashMap<String, Lane>,
}

impl LaneLimiter {
    /// The four standard lanes with configured sizes.
    pub fn from_config(config: &LaneConfig) -> Self {
        let mut lanes = HashMap::new();
        lanes.insert(
            LANE_LLM.to_string(),
            Lane::new(config.llm_concurrency, None),
        );
        lanes.insert(
            LANE_EMBED.to_string(),
            Lane::new(config.embed_concurrency, None),
        );
        lanes.insert(
            LANE_SOURCE_BIBLIOGRAPHIC.to_string(),
            Lane::new(1, Some(Duration::from_millis(config.bibliographic_spacing_ms))),
        );
        lanes.insert(
            LANE_SOURCE_FULLTEXT.to_string(),
            Lane::new(config.fulltext_concurrency, None),
        );
        Self { lanes }
    }

    /// Run `fut` once the lane admits it. Unknown lanes run unlimited.
    pub async fn limit<F, T>(&self, lane: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let Some(lane_state) = self.lanes.get(lane) else {
            warn!(lane, "unknown limiter lane, running unlimited");
            return fut.await;
        };

        // Acquire never fails: lane semaphores are never closed.
        let _permit = lane_state
            .semaphore
            .acquire()
            .await
            .expect("lane semaphore closed");

        if let Some(spacing) = lane_state.min_spacing {
            let wait = {
                let last = lane_state.last_start.lock().await;
                last.map(|instant| {
                    let elapsed = instant.elapsed();
                    spacing.saturating_sub(elapsed)
                })
                .filter(|d| !d.is_zero())
            };
            if let Some(wait) = wait {
                tokio::time::sleep(wait).await;
            }
            *lane_state.last_start.lock().await = Some(Instant::now());
        }

        fut.await
    }

    pub fn lane_capacity(&self, lane: &str) -> Option<usize> {
        self.lanes
            .get(lane)
            .map(|l| l.semaphore.available_permits())
    }
}

impl Default for LaneLimiter {
    fn default() -> Self {
        Self::from_config(&LaneConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn lane_bounds_concurrency() {
        let config = LaneConfig {
            llm_concurrency: 2,
            ..LaneConfig::default()
        };
        let limiter = Arc::new(LaneLimiter::from_config(&config));

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .limit(LANE_LLM, async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2, "llm lane exceeded its cap");
    }

    #[tokio::test]
    async fn spacing_separates_admitted_starts() {
        let config = LaneConfig {
            bibliographic_spacing_ms: 50,
            ..LaneConfig::default()
        };
        let limiter = Arc::new(LaneLimiter::from_config(&config));

        let start = Instant::now();
        for _ in 0..3 {
            limiter
                .limit(LANE_SOURCE_BIBLIOGRAPHIC, async {})
                .await;
        }
        // Second and third admissions each wait out the spacing.
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn unknown_lane_runs_directly() {
        let limiter = LaneLimiter::default();
        let out = limiter.limit("no_such_lane", async { 7 }).await;
        assert_eq!(out, 7);
    }
}
