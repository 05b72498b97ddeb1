use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Per-member brightness levels captured when a manual change first lands,
/// plus their mean at capture time.
#[derive(Clone, Debug)]
pub struct BrightnessSnapshot {
    pub group_brightness: f64,
    pub member_levels: HashMap<String, f64>,
}

impl BrightnessSnapshot {
    /// Build a snapshot from raw levels. The mean only counts members
    /// with a positive level, so a lamp stuck at zero cannot drag the
    /// captured group brightness down.
    #[must_use]
    pub fn from_levels(member_levels: HashMap<String, f64>) -> Self {
        let positive: Vec<f64> = member_levels
            .values()
            .copied()
            .filter(|level| *level > 0.0)
            .collect();

        let group_brightness = if positive.is_empty() {
            0.0
        } else {
            positive.iter().sum::<f64>() / u32::try_from(positive.len()).map_or(1.0, f64::from)
        };

        Self {
            group_brightness,
            member_levels,
        }
    }
}

struct CacheEntry {
    snapshot: BrightnessSnapshot,
    timer: JoinHandle<()>,
}

/// Holds one [`BrightnessSnapshot`] with a sliding expiry timer.
///
/// Consecutive brightness changes inside the expiry window keep adjusting
/// against the same snapshot, so the relative spread between members is
/// preserved across a whole slider drag instead of decaying step by step.
pub struct BrightnessCache {
    group: String,
    delay: Duration,
    slot: Arc<Mutex<Option<CacheEntry>>>,
}

impl BrightnessCache {
    #[must_use]
    pub fn new(group: &str, delay: Duration) -> Self {
        Self {
            group: group.to_string(),
            delay,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Currently cached snapshot, if the timer has not expired.
    pub async fn snapshot(&self) -> Option<BrightnessSnapshot> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|entry| entry.snapshot.clone())
    }

    /// Store a fresh snapshot and start its expiry timer, replacing any
    /// previous entry.
    pub async fn store(&self, snapshot: BrightnessSnapshot) {
        let mut slot = self.slot.lock().await;
        if let Some(previous) = slot.take() {
            previous.timer.abort();
        }

        log::debug!(
            "[{}] Cached brightness {:.1} over {} members",
            self.group,
            snapshot.group_brightness,
            snapshot.member_levels.len()
        );

        *slot = Some(CacheEntry {
            snapshot,
            timer: self.spawn_timer(),
        });
    }

    /// Restart the expiry timer while keeping the stored snapshot as-is.
    /// Returns false when there is nothing cached.
    pub async fn reset_timer(&self) -> bool {
        let mut slot = self.slot.lock().await;
        let Some(entry) = slot.as_mut() else {
            return false;
        };

        entry.timer.abort();
        entry.timer = self.spawn_timer();
        true
    }

    /// Drop the entry and cancel its timer. Idempotent.
    pub async fn clear(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(entry) = slot.take() {
            entry.timer.abort();
            log::debug!("[{}] Brightness cache cleared", self.group);
        }
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let slot = Arc::clone(&self.slot);
        let group = self.group.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if slot.lock().await.take().is_some() {
                log::debug!("[{group}] Brightness cache expired");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use maplit::hashmap;

    use super::*;

    fn snapshot(levels: HashMap<String, f64>) -> BrightnessSnapshot {
        BrightnessSnapshot::from_levels(levels)
    }

    #[test]
    fn snapshot_mean_skips_dark_members() {
        let snap = snapshot(hashmap! {
            "a".to_string() => 100.0,
            "b".to_string() => 0.0,
            "c".to_string() => 200.0,
        });
        assert!((snap.group_brightness - 150.0).abs() < f64::EPSILON);
        assert_eq!(snap.member_levels.len(), 3);
    }

    #[test]
    fn snapshot_of_dark_group_is_zero() {
        let snap = snapshot(hashmap! { "a".to_string() => 0.0 });
        assert!(snap.group_brightness.abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_delay() {
        let cache = BrightnessCache::new("test", Duration::from_secs(5));
        cache
            .store(snapshot(hashmap! { "a".to_string() => 120.0 }))
            .await;
        assert!(cache.snapshot().await.is_some());

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert!(cache.snapshot().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_slides_the_window_without_touching_the_snapshot() {
        let cache = BrightnessCache::new("test", Duration::from_secs(5));
        cache
            .store(snapshot(hashmap! { "a".to_string() => 120.0 }))
            .await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(cache.reset_timer().await);

        // past the original deadline, inside the slid one
        tokio::time::sleep(Duration::from_secs(3)).await;
        let snap = cache.snapshot().await.expect("entry expired early");
        assert!((snap.member_levels["a"] - 120.0).abs() < f64::EPSILON);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(cache.snapshot().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_without_entry_reports_false() {
        let cache = BrightnessCache::new("test", Duration::from_secs(5));
        assert!(!cache.reset_timer().await);
    }

    #[tokio::test(start_paused = true)]
    async fn store_replaces_previous_entry() {
        let cache = BrightnessCache::new("test", Duration::from_secs(5));
        cache
            .store(snapshot(hashmap! { "a".to_string() => 10.0 }))
            .await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        cache
            .store(snapshot(hashmap! { "a".to_string() => 30.0 }))
            .await;

        // the first entry's timer must not fire at t=5s
        tokio::time::sleep(Duration::from_millis(2100)).await;
        let snap = cache.snapshot().await.expect("replacement expired early");
        assert!((snap.member_levels["a"] - 30.0).abs() < f64::EPSILON);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(cache.snapshot().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_and_is_idempotent() {
        let cache = BrightnessCache::new("test", Duration::from_secs(5));
        cache
            .store(snapshot(hashmap! { "a".to_string() => 50.0 }))
            .await;

        cache.clear().await;
        assert!(cache.snapshot().await.is_none());
        cache.clear().await;
    }
}
