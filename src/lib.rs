use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub mod bitstream;
mod contract;
mod drain;
mod feeder;
pub mod memory_platform;
mod selection;
mod session;
mod settings;
pub mod sps;

pub use contract::{
    Codec, DecodeError, DecodeListener, DecodeOutcome, DecodeSummary, DecoderCandidate,
    DecoderFormat, DecoderPlatform, Dimensions, InputSlot, OutputEvent, PlatformDecoder,
    RenderTarget, SessionState, TimestampUs,
};
pub use drain::{DimensionTracker, DrainReport, FrameDrain, LatencyTracker, SampleStats};
pub use feeder::{FeedOutcome, FrameFeeder, RetryPolicy};
pub use selection::CodecSelectionPolicy;
pub use session::SessionManager;
pub use settings::{DecoderSettings, H264Configuration};

/// Thread-safe front of one decoder session. Every entry point takes the
/// same lock, so at most one of them touches the platform decoder at a time.
pub struct StreamDecoder {
    inner: Mutex<SessionManager>,
}

impl StreamDecoder {
    pub fn new(platform: impl DecoderPlatform + 'static, settings: DecoderSettings) -> Self {
        Self {
            inner: Mutex::new(SessionManager::new(Box::new(platform), settings)),
        }
    }

    /// Registers the observer for dimension changes and per-frame events.
    #[must_use]
    pub fn with_listener(self, listener: Arc<dyn DecodeListener>) -> Self {
        self.lock().set_listener(Some(listener));
        self
    }

    /// Ingests `bytes[offset..offset + length]` as one access unit, stamped
    /// from a monotonic microsecond clock.
    pub fn decode(
        &self,
        bytes: &[u8],
        offset: usize,
        length: usize,
        force_software: bool,
        preference: Codec,
    ) -> Result<DecodeOutcome, DecodeError> {
        self.lock()
            .decode(bytes, offset, length, force_software, preference, None)
    }

    /// Like [`StreamDecoder::decode`] with a caller-supplied timestamp.
    pub fn decode_at(
        &self,
        bytes: &[u8],
        offset: usize,
        length: usize,
        force_software: bool,
        preference: Codec,
        pts: TimestampUs,
    ) -> Result<DecodeOutcome, DecodeError> {
        self.lock()
            .decode(bytes, offset, length, force_software, preference, Some(pts))
    }

    pub fn on_surface_available(&self, target: RenderTarget) {
        self.lock().on_surface_available(target);
    }

    pub fn stop(&self, reason: &str) {
        self.lock().stop(reason);
    }

    pub fn state(&self) -> SessionState {
        self.lock().state().clone()
    }

    pub fn summary(&self) -> DecodeSummary {
        self.lock().summary()
    }

    // A panic inside a platform call leaves the session in a state the next
    // caller can still tear down.
    fn lock(&self) -> MutexGuard<'_, SessionManager> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_platform::MemoryPlatform;

    #[test]
    fn stream_decoder_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StreamDecoder>();
    }

    #[test]
    fn entry_points_share_one_session() {
        let platform = MemoryPlatform::with_default_candidates();
        let decoder = StreamDecoder::new(
            platform.clone(),
            DecoderSettings::default()
                .with_h264_configuration(H264Configuration::Provisional)
                .with_retry(RetryPolicy::immediate(20)),
        );
        let unit = [0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00];
        let outcome = decoder
            .decode_at(&unit, 0, unit.len(), false, Codec::H264, TimestampUs(33))
            .unwrap();
        assert_eq!(
            outcome,
            DecodeOutcome::Submitted {
                pts: TimestampUs(33),
                attempts: 1
            }
        );
        assert_eq!(decoder.state(), SessionState::Running);

        decoder.stop("done");
        let summary = decoder.summary();
        assert_eq!(summary.state, SessionState::Stopped("done".to_string()));
        assert_eq!(summary.submitted_units, 1);
        assert_eq!(summary.decoded_frames, 1);
        assert_eq!(platform.journal().submitted[0].0, TimestampUs(33));
    }
}
