use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{DecodeListener, Dimensions, OutputEvent, PlatformDecoder, TimestampUs};

const STATS_WINDOW: usize = 512;

/// Running mean over every sample plus percentiles over a recent window.
#[derive(Debug, Default, Clone)]
pub struct SampleStats {
    window: VecDeque<f64>,
    count: u64,
    mean: f64,
}

impl SampleStats {
    pub fn push_value(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
        if self.window.len() == STATS_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(value);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn percentile(&self, percentile: f64) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let mut sorted = self.window.iter().copied().collect::<Vec<_>>();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let rank = ((percentile / 100.0) * n as f64)
            .ceil()
            .clamp(1.0, n as f64) as usize;
        sorted[rank - 1]
    }

    pub fn p95(&self) -> f64 {
        self.percentile(95.0)
    }

    pub fn p99(&self) -> f64 {
        self.percentile(99.0)
    }
}

/// Enqueue instants keyed by presentation timestamp. Bounded: past
/// `capacity` the earliest recorded entry is evicted whatever its pts, and
/// entries that never see an output are dropped after `stale_after`.
#[derive(Debug)]
pub struct LatencyTracker {
    pending: BTreeMap<TimestampUs, Pending>,
    next_seq: u64,
    capacity: usize,
    stale_after: Duration,
    stats: SampleStats,
    evicted: u64,
}

impl LatencyTracker {
    pub fn new(capacity: usize, stale_after: Duration) -> Self {
        Self {
            pending: BTreeMap::new(),
            next_seq: 0,
            capacity: capacity.max(1),
            stale_after,
            stats: SampleStats::default(),
            evicted: 0,
        }
    }

    pub fn record(&mut self, pts: TimestampUs, enqueued_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(pts, Pending { seq, enqueued_at });
        while self.pending.len() > self.capacity {
            let Some(earliest) = self
                .pending
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(pts, _)| *pts)
            else {
                break;
            };
            self.pending.remove(&earliest);
            self.evicted += 1;
        }
    }

    pub fn forget(&mut self, pts: TimestampUs) {
        self.pending.remove(&pts);
    }

    /// Removes the entry for `pts` and folds its latency into the stats.
    pub fn complete(&mut self, pts: TimestampUs, now: Instant) -> Option<Duration> {
        let entry = self.pending.remove(&pts)?;
        let latency = now.saturating_duration_since(entry.enqueued_at);
        self.stats.push_value(latency.as_secs_f64());
        Some(latency)
    }

    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        let stale_after = self.stale_after;
        self.pending
            .retain(|_, entry| now.saturating_duration_since(entry.enqueued_at) < stale_after);
        let removed = before - self.pending.len();
        self.evicted += removed as u64;
        removed
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn stats(&self) -> &SampleStats {
        &self.stats
    }

    pub fn mean_latency(&self) -> Option<Duration> {
        (self.stats.count() > 0).then(|| Duration::from_secs_f64(self.stats.mean()))
    }

    pub fn p95_latency(&self) -> Option<Duration> {
        (self.stats.count() > 0).then(|| Duration::from_secs_f64(self.stats.p95()))
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    seq: u64,
    enqueued_at: Instant,
}

/// Last known frame size plus the listener that hears about changes.
pub struct DimensionTracker {
    current: Option<Dimensions>,
    listener: Option<Arc<dyn DecodeListener>>,
}

impl DimensionTracker {
    pub fn new(listener: Option<Arc<dyn DecodeListener>>) -> Self {
        Self {
            current: None,
            listener,
        }
    }

    pub fn set_listener(&mut self, listener: Option<Arc<dyn DecodeListener>>) {
        self.listener = listener;
    }

    pub fn current(&self) -> Option<Dimensions> {
        self.current
    }

    /// Stores `dims` and notifies when they differ from the previous value.
    pub fn update(&mut self, dims: Dimensions, source: &'static str) -> bool {
        if self.current == Some(dims) {
            return false;
        }
        tracing::info!(%dims, previous = ?self.current, source, "frame dimensions changed");
        self.current = Some(dims);
        if let Some(listener) = &self.listener {
            listener.dimensions_changed(dims);
        }
        true
    }

    pub fn notify_frame(&self, pts: TimestampUs, latency: Duration) {
        if let Some(listener) = &self.listener {
            listener.frame_decoded(pts, latency);
        }
    }

    pub fn notify_drop(&self, pts: TimestampUs) {
        if let Some(listener) = &self.listener {
            listener.unit_dropped(pts);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub frames: usize,
    pub format_changes: usize,
    pub buffer_changes: usize,
    pub end_of_stream: bool,
    /// The cycle ended early on a dequeue error.
    pub aborted: bool,
}

/// Pulls completed outputs off a platform decoder without blocking.
#[derive(Debug)]
pub struct FrameDrain {
    latency: LatencyTracker,
    max_events: usize,
    output_generation: u64,
    decoded_frames: u64,
    report_metrics: bool,
}

impl FrameDrain {
    pub fn new(latency: LatencyTracker, max_events: usize, report_metrics: bool) -> Self {
        Self {
            latency,
            max_events: max_events.max(1),
            output_generation: 0,
            decoded_frames: 0,
            report_metrics,
        }
    }

    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    pub fn latency_mut(&mut self) -> &mut LatencyTracker {
        &mut self.latency
    }

    pub fn decoded_frames(&self) -> u64 {
        self.decoded_frames
    }

    pub fn output_generation(&self) -> u64 {
        self.output_generation
    }

    pub fn drain(
        &mut self,
        decoder: &mut dyn PlatformDecoder,
        dims: &mut DimensionTracker,
    ) -> DrainReport {
        let start = Instant::now();
        let stale = self.latency.evict_stale(start);
        if stale > 0 {
            tracing::debug!(stale, "evicted unmatched timestamps");
        }

        let mut report = DrainReport::default();
        for _ in 0..self.max_events {
            match decoder.dequeue_output() {
                Ok(OutputEvent::Frame { slot, pts }) => {
                    report.frames += 1;
                    self.decoded_frames += 1;
                    if let Some(latency) = self.latency.complete(pts, Instant::now()) {
                        dims.notify_frame(pts, latency);
                    }
                    if let Err(err) = decoder.release_output(slot) {
                        tracing::warn!(slot, error = %err, "failed to release output slot");
                    }
                }
                Ok(OutputEvent::FormatChanged(new_dims)) => {
                    report.format_changes += 1;
                    dims.update(new_dims, "output_format");
                }
                Ok(OutputEvent::BuffersChanged) => {
                    report.buffer_changes += 1;
                    self.output_generation += 1;
                    tracing::debug!(generation = self.output_generation, "output buffers changed");
                }
                Ok(OutputEvent::TryAgainLater) => break,
                Ok(OutputEvent::EndOfStream) => {
                    report.end_of_stream = true;
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "output dequeue failed, ending drain cycle");
                    report.aborted = true;
                    break;
                }
            }
        }

        if self.report_metrics && report.frames > 0 {
            let stats = self.latency.stats();
            tracing::info!(
                frames = report.frames,
                total_frames = self.decoded_frames,
                pending = self.latency.pending(),
                latency_ms_mean = stats.mean() * 1_000.0,
                latency_ms_p95 = stats.p95() * 1_000.0,
                latency_ms_p99 = stats.p99() * 1_000.0,
                elapsed_ms = start.elapsed().as_secs_f64() * 1_000.0,
                "drain"
            );
        }
        report
    }
}
