//! Approximate per-key event counting
//!
//! A Count-Min Sketch over `depth × width` atomic counters. Every key is
//! hashed once per row with a row-specific seed; `add` bumps one bucket per
//! row and `estimate` takes the minimum across rows. Collisions can only
//! inflate a bucket, so estimates never fall below the true count until the
//! counters are decayed.
//!
//! Decay approximates a sliding window without timestamps: every counter is
//! multiplied by a factor in (0,1] on a timer owned by [`DecayScheduler`].
//!
//! ```text
//!  DecayHandle (Clone) ──mpsc──▶ DecayScheduler task
//!                                  ├─ interval tick → target.decay() for each target
//!                                  ├─ DecayNow      → target.decay() for each target
//!                                  └─ Shutdown
//! ```
//!
//! Counters saturate at `u64::MAX` instead of wrapping.

use crate::config::EstimatorConfig;
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Shortest period the scheduler will tick at
const MIN_DECAY_PERIOD: Duration = Duration::from_millis(1);

/// State that is aged out periodically by a [`DecayScheduler`]
pub trait Decay: Send + Sync {
    fn decay(&self);
}

/// Count-Min Sketch frequency estimator
#[derive(Debug)]
pub struct FrequencyEstimator {
    depth: usize,
    width: usize,
    seeds: Vec<u64>,
    counters: Vec<AtomicU64>,
    decay_factor: f64,
    total: AtomicU64,
}

impl FrequencyEstimator {
    /// Create an estimator with `depth` rows of `width` buckets
    pub fn new(depth: usize, width: usize, decay_factor: f64) -> Result<Self> {
        if depth == 0 || width == 0 {
            return Err(Error::Config("sketch depth and width must be > 0".to_string()));
        }
        if !(decay_factor > 0.0 && decay_factor <= 1.0) {
            return Err(Error::Config(format!(
                "decay factor must be in (0,1], got {}",
                decay_factor
            )));
        }

        // Seeds are derived deterministically so two estimators with the same
        // shape hash identically.
        let seeds = (0..depth as u64)
            .map(|row| row.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
            .collect();

        let counters = (0..depth * width).map(|_| AtomicU64::new(0)).collect();

        Ok(Self {
            depth,
            width,
            seeds,
            counters,
            decay_factor,
            total: AtomicU64::new(0),
        })
    }

    /// Size the sketch for additive error `epsilon · N` with probability `1 - delta`
    pub fn with_error_bounds(epsilon: f64, delta: f64, decay_factor: f64) -> Result<Self> {
        if !(epsilon > 0.0 && epsilon < 1.0) || !(delta > 0.0 && delta < 1.0) {
            return Err(Error::Config(format!(
                "epsilon and delta must be in (0,1), got {} / {}",
                epsilon, delta
            )));
        }
        let width = (std::f64::consts::E / epsilon).ceil() as usize;
        let depth = (1.0 / delta).ln().ceil().max(1.0) as usize;
        Self::new(depth, width, decay_factor)
    }

    /// Build from configuration
    pub fn from_config(config: &EstimatorConfig) -> Result<Self> {
        Self::new(config.depth, config.width, config.decay_factor)
    }

    /// Record `count` occurrences of `key`
    pub fn add(&self, key: &str, count: u64) {
        if count == 0 {
            return;
        }
        for row in 0..self.depth {
            let idx = self.bucket(row, key);
            saturating_add(&self.counters[idx], count);
        }
        saturating_add(&self.total, count);
    }

    /// Approximate count of `key`; unseen keys estimate to zero
    pub fn estimate(&self, key: &str) -> u64 {
        (0..self.depth)
            .map(|row| self.counters[self.bucket(row, key)].load(Ordering::Relaxed))
            .min()
            .unwrap_or(0)
    }

    /// Multiply every counter by the decay factor (rounding down)
    ///
    /// Each counter is updated with a compare-and-swap loop. An `add` that
    /// lands between the load and the swap of one bucket is retried against
    /// the new value, so concurrent increments are never lost outright, only
    /// decayed along with the rest.
    ///
    /// A factor of 1.0 leaves the counters untouched. Counters above 2^53 lose
    /// precision in the float product, so the result is capped at the old
    /// value.
    pub fn decay(&self) {
        let factor = self.decay_factor;
        if factor >= 1.0 {
            return;
        }
        for counter in self.counters.iter().chain(std::iter::once(&self.total)) {
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(((v as f64 * factor).floor() as u64).min(v))
            });
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.total.store(0, Ordering::Relaxed);
    }

    /// Sum of all counts added since the last reset (decayed alongside the counters)
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn decay_factor(&self) -> f64 {
        self.decay_factor
    }

    fn bucket(&self, row: usize, key: &str) -> usize {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seeds[row].to_le_bytes());
        hasher.update(key.as_bytes());
        let hash = hasher.finalize();
        let bytes = hash.as_bytes();
        let h = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        row * self.width + (h % self.width as u64) as usize
    }
}

impl Decay for FrequencyEstimator {
    fn decay(&self) {
        FrequencyEstimator::decay(self)
    }
}

fn saturating_add(counter: &AtomicU64, count: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_add(count))
    });
}

/// Message sent to the decay scheduler
#[derive(Debug)]
pub enum DecayMessage {
    /// Decay immediately and acknowledge
    DecayNow { response: oneshot::Sender<()> },

    /// Stop the scheduler
    Shutdown,
}

/// Background task that decays its targets on a fixed period
pub struct DecayScheduler {
    targets: Vec<Arc<dyn Decay>>,
    mailbox: mpsc::Receiver<DecayMessage>,
    period: Duration,
}

impl DecayScheduler {
    /// Spawn a scheduler for one estimator on the current runtime
    pub fn spawn(estimator: Arc<FrequencyEstimator>, period: Duration) -> DecayHandle {
        Self::spawn_all(vec![estimator as Arc<dyn Decay>], period)
    }

    /// Spawn a scheduler for several targets, decayed in order on every tick
    ///
    /// A zero period is raised to one millisecond.
    pub fn spawn_all(targets: Vec<Arc<dyn Decay>>, period: Duration) -> DecayHandle {
        let (sender, mailbox) = mpsc::channel(16);
        let scheduler = Self {
            targets,
            mailbox,
            period: period.max(MIN_DECAY_PERIOD),
        };
        let task = tokio::spawn(scheduler.run());
        DecayHandle {
            sender,
            task: Arc::new(parking_lot::Mutex::new(Some(task))),
        }
    }

    async fn run(mut self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately.
        ticker.tick().await;

        info!(
            period_ms = self.period.as_millis() as u64,
            targets = self.targets.len(),
            "Decay scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.decay_all();
                    debug!("Scheduled decay applied");
                }
                msg = self.mailbox.recv() => {
                    match msg {
                        Some(DecayMessage::DecayNow { response }) => {
                            self.decay_all();
                            let _ = response.send(());
                        }
                        Some(DecayMessage::Shutdown) | None => break,
                    }
                }
            }
        }

        info!("Decay scheduler stopped");
    }

    fn decay_all(&self) {
        for target in &self.targets {
            target.decay();
        }
    }
}

/// Cloneable handle to a running [`DecayScheduler`]
#[derive(Clone)]
pub struct DecayHandle {
    sender: mpsc::Sender<DecayMessage>,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl DecayHandle {
    /// Force a decay pass and wait until it has been applied
    pub async fn decay_now(&self) -> Result<()> {
        let (response, rx) = oneshot::channel();
        self.sender
            .send(DecayMessage::DecayNow { response })
            .await
            .map_err(|_| Error::Config("decay scheduler is not running".to_string()))?;
        rx.await
            .map_err(|_| Error::Config("decay scheduler dropped the request".to_string()))
    }

    /// Stop the scheduler and wait for the task to finish
    pub async fn shutdown(&self) {
        let _ = self.sender.send(DecayMessage::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_key_is_zero() {
        let cms = FrequencyEstimator::new(4, 64, 0.5).unwrap();
        assert_eq!(cms.estimate("nobody"), 0);
    }

    #[test]
    fn test_never_underestimates() {
        let cms = FrequencyEstimator::new(3, 16, 0.5).unwrap();
        for i in 0..200u64 {
            cms.add(&format!("ip-{}", i % 40), i % 7 + 1);
        }
        for k in 0..40u64 {
            let truth: u64 = (0..200u64).filter(|i| i % 40 == k).map(|i| i % 7 + 1).sum();
            assert!(cms.estimate(&format!("ip-{}", k)) >= truth);
        }
    }

    #[test]
    fn test_exact_without_collisions() {
        let cms = FrequencyEstimator::new(4, 4096, 0.5).unwrap();
        cms.add("10.0.0.1", 5);
        cms.add("10.0.0.1", 2);
        assert_eq!(cms.estimate("10.0.0.1"), 7);
        assert_eq!(cms.total(), 7);
    }

    #[test]
    fn test_decay_halves_and_reset_clears() {
        let cms = FrequencyEstimator::new(4, 4096, 0.5).unwrap();
        cms.add("k", 9);
        cms.decay();
        assert_eq!(cms.estimate("k"), 4);
        cms.reset();
        assert_eq!(cms.estimate("k"), 0);
        assert_eq!(cms.total(), 0);
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(FrequencyEstimator::new(0, 10, 0.5).is_err());
        assert!(FrequencyEstimator::new(2, 10, 1.5).is_err());
        assert!(FrequencyEstimator::with_error_bounds(0.0, 0.01, 0.5).is_err());
    }

    #[test]
    fn test_error_bound_sizing() {
        let cms = FrequencyEstimator::with_error_bounds(0.01, 0.01, 0.5).unwrap();
        assert_eq!(cms.width(), 272);
        assert_eq!(cms.depth(), 5);
    }

    #[tokio::test]
    async fn test_scheduler_decay_now_and_shutdown() {
        let cms = Arc::new(FrequencyEstimator::new(4, 1024, 0.5).unwrap());
        cms.add("actor-1", 8);

        let handle = DecayScheduler::spawn(cms.clone(), Duration::from_secs(3600));
        handle.decay_now().await.unwrap();
        assert_eq!(cms.estimate("actor-1"), 4);

        handle.shutdown().await;
        assert!(handle.decay_now().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_decays_on_timer() {
        let cms = Arc::new(FrequencyEstimator::new(4, 1024, 0.5).unwrap());
        cms.add("actor-1", 16);

        let handle = DecayScheduler::spawn(cms.clone(), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(cms.estimate("actor-1"), 4);
        handle.shutdown().await;
    }

    #[test]
    fn test_add_saturates() {
        let cms = FrequencyEstimator::new(4, 4096, 0.5).unwrap();
        cms.add("k", u64::MAX);
        cms.add("k", 2);
        assert_eq!(cms.estimate("k"), u64::MAX);
        assert_eq!(cms.total(), u64::MAX);
    }

    #[test]
    fn test_unit_factor_leaves_large_counts_alone() {
        let cms = FrequencyEstimator::new(4, 4096, 1.0).unwrap();
        cms.add("k", u64::MAX - 1);
        cms.decay();
        assert_eq!(cms.estimate("k"), u64::MAX - 1);
        assert_eq!(cms.total(), u64::MAX - 1);
    }

    #[test]
    fn test_decay_never_grows_large_counts() {
        let cms = FrequencyEstimator::new(4, 4096, 0.999_999_9).unwrap();
        cms.add("k", u64::MAX - 1);
        cms.decay();
        assert!(cms.estimate("k") <= u64::MAX - 1);

        let cms = FrequencyEstimator::new(4, 4096, 0.999_999_9).unwrap();
        cms.add("k", (1 << 53) + 1);
        cms.decay();
        assert!(cms.estimate("k") <= (1 << 53) + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_does_not_panic() {
        let cms = Arc::new(FrequencyEstimator::new(4, 1024, 0.5).unwrap());
        cms.add("actor-1", 1 << 20);

        let handle = DecayScheduler::spawn(cms.clone(), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.decay_now().await.unwrap();

        assert!(cms.estimate("actor-1") < 1 << 20);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_scheduler_decays_every_target() {
        let a = Arc::new(FrequencyEstimator::new(4, 1024, 0.5).unwrap());
        let b = Arc::new(FrequencyEstimator::new(4, 1024, 0.25).unwrap());
        a.add("k", 8);
        b.add("k", 8);

        let handle = DecayScheduler::spawn_all(
            vec![a.clone() as Arc<dyn Decay>, b.clone() as Arc<dyn Decay>],
            Duration::from_secs(3600),
        );
        handle.decay_now().await.unwrap();

        assert_eq!(a.estimate("k"), 4);
        assert_eq!(b.estimate("k"), 2);
        handle.shutdown().await;
    }
}
