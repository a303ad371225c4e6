//! In-memory decoder platform. Accepts every access unit, echoes each one
//! back as a completed output, and can be scripted to report busy inputs,
//! configuration failures, format changes and dequeue errors. Used by the
//! tests, benches and the inspect demo in place of a real hardware decoder.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::contract::platform_error;
use crate::{
    Codec, DecodeError, DecoderCandidate, DecoderFormat, DecoderPlatform, Dimensions, InputSlot,
    OutputEvent, PlatformDecoder, TimestampUs,
};

const INPUT_SLOTS: usize = 4;

#[derive(Debug, Clone)]
pub struct MemoryBehavior {
    /// The next `busy_polls` input polls report busy.
    pub busy_polls: u32,
    pub always_busy: bool,
    /// The next `fail_configures` configure calls fail.
    pub fail_configures: u32,
    pub fail_create: bool,
    /// The next `fail_starts` start calls fail.
    pub fail_starts: u32,
    /// Each submitted unit becomes one completed output.
    pub echo_frames: bool,
    pub format_change_on_start: Option<Dimensions>,
    /// Time spent inside `configure`, to widen race windows in tests.
    pub configure_delay: Duration,
    pub fail_next_output: bool,
}

impl Default for MemoryBehavior {
    fn default() -> Self {
        Self {
            busy_polls: 0,
            always_busy: false,
            fail_configures: 0,
            fail_create: false,
            fail_starts: 0,
            echo_frames: true,
            format_change_on_start: None,
            configure_delay: Duration::ZERO,
            fail_next_output: false,
        }
    }
}

/// Everything the platform observed, in call order per field.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    pub created: Vec<String>,
    pub configured: Vec<DecoderFormat>,
    pub started: usize,
    pub submitted: Vec<(TimestampUs, Vec<u8>)>,
    pub input_polls: u32,
    pub released_outputs: usize,
    pub stopped: usize,
    pub released: usize,
}

#[derive(Debug, Default)]
struct Shared {
    candidates: Vec<DecoderCandidate>,
    behavior: MemoryBehavior,
    journal: Journal,
    injected_outputs: VecDeque<OutputEvent>,
}

#[derive(Debug, Default)]
struct ConfigureGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPlatform {
    shared: Arc<Mutex<Shared>>,
    gauge: Arc<ConfigureGauge>,
}

impl MemoryPlatform {
    pub fn new(candidates: Vec<DecoderCandidate>) -> Self {
        let platform = Self::default();
        platform.lock().candidates = candidates;
        platform
    }

    pub fn with_default_candidates() -> Self {
        Self::new(vec![
            DecoderCandidate::decoder("mem.avc.hw", Codec::H264, true),
            DecoderCandidate::decoder("mem.avc.sw", Codec::H264, false),
            DecoderCandidate::decoder("mem.hevc.hw", Codec::Hevc, true),
            DecoderCandidate::decoder("mem.hevc.sw", Codec::Hevc, false),
        ])
    }

    pub fn with_behavior(self, behavior: MemoryBehavior) -> Self {
        self.lock().behavior = behavior;
        self
    }

    pub fn update_behavior(&self, update: impl FnOnce(&mut MemoryBehavior)) {
        update(&mut self.lock().behavior);
    }

    /// Queues an event returned by the next `dequeue_output` call.
    pub fn inject_output(&self, event: OutputEvent) {
        self.lock().injected_outputs.push_back(event);
    }

    pub fn journal(&self) -> Journal {
        self.lock().journal.clone()
    }

    /// Highest number of `configure` calls observed in flight at once.
    pub fn peak_concurrent_configures(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DecoderPlatform for MemoryPlatform {
    fn enumerate_candidates(&self, mime: &str) -> Vec<DecoderCandidate> {
        self.lock()
            .candidates
            .iter()
            .filter(|c| c.mime.eq_ignore_ascii_case(mime))
            .cloned()
            .collect()
    }

    fn create(&mut self, name: &str) -> Result<Box<dyn PlatformDecoder>, DecodeError> {
        let mut shared = self.lock();
        if shared.behavior.fail_create {
            return Err(platform_error("create", format!("{name} refused")));
        }
        if !shared.candidates.iter().any(|c| c.name == name) {
            return Err(platform_error("create", format!("unknown decoder {name}")));
        }
        shared.journal.created.push(name.to_string());
        Ok(Box::new(MemoryDecoder {
            platform: self.clone(),
            configured: false,
            started: false,
            next_slot: 0,
            outputs: VecDeque::new(),
        }))
    }
}

pub struct MemoryDecoder {
    platform: MemoryPlatform,
    configured: bool,
    started: bool,
    next_slot: usize,
    outputs: VecDeque<OutputEvent>,
}

impl PlatformDecoder for MemoryDecoder {
    fn configure(&mut self, format: &DecoderFormat) -> Result<(), DecodeError> {
        let gauge = &self.platform.gauge;
        let active = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
        gauge.peak.fetch_max(active, Ordering::SeqCst);
        let delay = self.platform.lock().behavior.configure_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        gauge.active.fetch_sub(1, Ordering::SeqCst);

        let mut shared = self.platform.lock();
        shared.journal.configured.push(format.clone());
        if shared.behavior.fail_configures > 0 {
            shared.behavior.fail_configures -= 1;
            return Err(platform_error("configure", format!("rejected {format}")));
        }
        self.configured = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DecodeError> {
        if !self.configured {
            return Err(platform_error("start", "decoder is not configured"));
        }
        let mut shared = self.platform.lock();
        if shared.behavior.fail_starts > 0 {
            shared.behavior.fail_starts -= 1;
            return Err(platform_error("start", "codec refused to start"));
        }
        shared.journal.started += 1;
        if let Some(dims) = shared.behavior.format_change_on_start {
            self.outputs.push_back(OutputEvent::FormatChanged(dims));
        }
        self.started = true;
        Ok(())
    }

    fn dequeue_input_slot(&mut self, _timeout: Duration) -> Result<InputSlot, DecodeError> {
        let mut shared = self.platform.lock();
        shared.journal.input_polls += 1;
        if !self.started {
            return Err(platform_error("dequeue_input_slot", "decoder is not started"));
        }
        if shared.behavior.always_busy {
            return Ok(InputSlot::Busy);
        }
        if shared.behavior.busy_polls > 0 {
            shared.behavior.busy_polls -= 1;
            return Ok(InputSlot::Busy);
        }
        let slot = self.next_slot;
        self.next_slot = (self.next_slot + 1) % INPUT_SLOTS;
        Ok(InputSlot::Ready(slot))
    }

    fn submit_input(
        &mut self,
        slot: usize,
        data: &[u8],
        pts: TimestampUs,
    ) -> Result<(), DecodeError> {
        let mut shared = self.platform.lock();
        shared.journal.submitted.push((pts, data.to_vec()));
        if shared.behavior.echo_frames {
            self.outputs.push_back(OutputEvent::Frame { slot, pts });
        }
        Ok(())
    }

    fn dequeue_output(&mut self) -> Result<OutputEvent, DecodeError> {
        let mut shared = self.platform.lock();
        if shared.behavior.fail_next_output {
            shared.behavior.fail_next_output = false;
            return Err(DecodeError::OutputDequeue("injected failure".to_string()));
        }
        if let Some(event) = shared.injected_outputs.pop_front() {
            return Ok(event);
        }
        Ok(self.outputs.pop_front().unwrap_or(OutputEvent::TryAgainLater))
    }

    fn release_output(&mut self, _slot: usize) -> Result<(), DecodeError> {
        self.platform.lock().journal.released_outputs += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DecodeError> {
        self.platform.lock().journal.stopped += 1;
        self.started = false;
        self.outputs.clear();
        Ok(())
    }

    fn release(&mut self) {
        self.platform.lock().journal.released += 1;
        self.configured = false;
    }
}
