use std::sync::Arc;
use std::time::Instant;

use crate::bitstream::{ParameterSets, detect_codec, nal_units};
use crate::drain::{DimensionTracker, FrameDrain, LatencyTracker};
use crate::feeder::{FeedOutcome, FrameFeeder};
use crate::selection::CodecSelectionPolicy;
use crate::settings::{DecoderSettings, H264Configuration};
use crate::sps::parse_sps;
use crate::{
    Codec, DecodeError, DecodeListener, DecodeOutcome, DecodeSummary, DecoderCandidate,
    DecoderFormat, DecoderPlatform, PlatformDecoder, RenderTarget, SessionState, TimestampUs,
};

/// Strictly increasing microsecond timestamps from a monotonic clock.
#[derive(Debug)]
struct PtsClock {
    origin: Instant,
    last: Option<i64>,
}

impl PtsClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: None,
        }
    }

    fn next(&mut self) -> TimestampUs {
        let elapsed = i64::try_from(self.origin.elapsed().as_micros()).unwrap_or(i64::MAX);
        let value = match self.last {
            Some(last) if elapsed <= last => last.saturating_add(1),
            _ => elapsed,
        };
        self.last = Some(value);
        TimestampUs(value)
    }
}

/// Owns the one platform decoder and walks it through
/// selection, configuration, feed/drain and teardown.
pub struct SessionManager {
    platform: Box<dyn DecoderPlatform>,
    settings: DecoderSettings,
    feeder: FrameFeeder,
    state: SessionState,
    candidate: Option<DecoderCandidate>,
    codec: Option<Codec>,
    stream_codec: Option<Codec>,
    decoder: Option<Box<dyn PlatformDecoder>>,
    parameter_sets: ParameterSets,
    dims: DimensionTracker,
    drain: FrameDrain,
    render_target: Option<RenderTarget>,
    clock: PtsClock,
    submitted_units: u64,
    dropped_units: u64,
}

impl SessionManager {
    pub fn new(platform: Box<dyn DecoderPlatform>, settings: DecoderSettings) -> Self {
        let drain = FrameDrain::new(
            LatencyTracker::new(settings.latency_capacity, settings.latency_stale_after),
            settings.max_drain_events,
            settings.report_metrics,
        );
        Self {
            platform,
            feeder: FrameFeeder::new(settings.retry),
            settings,
            state: SessionState::Uninitialized,
            candidate: None,
            codec: None,
            stream_codec: None,
            decoder: None,
            parameter_sets: ParameterSets::new(),
            dims: DimensionTracker::new(None),
            drain,
            render_target: None,
            clock: PtsClock::new(),
            submitted_units: 0,
            dropped_units: 0,
        }
    }

    pub fn set_listener(&mut self, listener: Option<Arc<dyn DecodeListener>>) {
        self.dims.set_listener(listener);
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn parameter_sets(&self) -> &ParameterSets {
        &self.parameter_sets
    }

    pub fn pending_timestamps(&self) -> usize {
        self.drain.latency().pending()
    }

    /// Ingests `bytes[offset..offset + length]` as one access unit.
    pub fn decode(
        &mut self,
        bytes: &[u8],
        offset: usize,
        length: usize,
        force_software: bool,
        preference: Codec,
        pts: Option<TimestampUs>,
    ) -> Result<DecodeOutcome, DecodeError> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| {
                DecodeError::InvalidInput(format!(
                    "region {offset}+{length} exceeds buffer of {} bytes",
                    bytes.len()
                ))
            })?;
        let unit = &bytes[offset..end];
        if unit.is_empty() {
            return Err(DecodeError::InvalidInput("empty access unit".to_string()));
        }

        let codec = self.resolve_codec(unit, preference);
        if self.codec.is_some_and(|active| active != codec) {
            self.teardown("codec changed");
        }
        self.capture_parameter_sets(codec, unit);
        self.ensure_session(codec, force_software)?;

        if self.state != SessionState::Running {
            tracing::debug!(state = %self.state, bytes = unit.len(), "decoder not ready, deferring unit");
            return Ok(DecodeOutcome::Deferred);
        }
        self.feed(unit, pts)
    }

    /// Stores a new render target; a live decoder is torn down so the next
    /// decode call rebuilds it against the new surface.
    pub fn on_surface_available(&mut self, target: RenderTarget) {
        let replaced = self.render_target.replace(target);
        tracing::info!(?target, ?replaced, state = %self.state, "render target available");
        if self.state.has_decoder() {
            self.teardown("surface changed");
        }
    }

    /// Tears the session down. A no-op when nothing is active.
    pub fn stop(&mut self, reason: &str) {
        let active = matches!(
            self.state,
            SessionState::AwaitingParameterSets | SessionState::Configured | SessionState::Running
        );
        if !active && self.decoder.is_none() {
            tracing::debug!(reason, state = %self.state, "stop ignored, no active session");
            return;
        }
        self.teardown(reason);
        self.stream_codec = None;
    }

    pub fn summary(&self) -> DecodeSummary {
        let latency = self.drain.latency();
        DecodeSummary {
            state: self.state.clone(),
            codec: self.codec,
            decoder_name: self.candidate.as_ref().map(|c| c.name.clone()),
            hardware_accelerated: self
                .candidate
                .as_ref()
                .is_some_and(|c| c.hardware_accelerated),
            dims: self.dims.current(),
            submitted_units: self.submitted_units,
            dropped_units: self.dropped_units,
            decoded_frames: self.drain.decoded_frames(),
            mean_latency: latency.mean_latency(),
            p95_latency: latency.p95_latency(),
        }
    }

    fn resolve_codec(&mut self, unit: &[u8], preference: Codec) -> Codec {
        match detect_codec(unit) {
            Some(detected) => {
                if detected != preference {
                    tracing::debug!(%detected, %preference, "stream codec overrides caller preference");
                }
                self.stream_codec = Some(detected);
                detected
            }
            None => self.stream_codec.unwrap_or(preference),
        }
    }

    fn capture_parameter_sets(&mut self, codec: Codec, unit: &[u8]) {
        if !codec.requires_parameter_sets() {
            return;
        }
        for nal in nal_units(unit) {
            let Some(kind) = self.parameter_sets.observe(codec, &nal) else {
                continue;
            };
            if !kind.is_sps() {
                continue;
            }
            match parse_sps(nal.payload()) {
                Ok(info) => {
                    tracing::debug!(profile_idc = info.profile_idc, dims = %info.dims, "parsed sps");
                    self.dims.update(info.dims, "sps");
                }
                Err(err) => {
                    tracing::warn!(error = %err, previous = ?self.dims.current(), "keeping previous dimensions");
                }
            }
        }
    }

    fn ensure_session(&mut self, codec: Codec, force_software: bool) -> Result<(), DecodeError> {
        if matches!(
            self.state,
            SessionState::Uninitialized | SessionState::Stopped(_)
        ) {
            self.select_codec(codec, force_software)?;
        }
        if self.state == SessionState::AwaitingParameterSets {
            self.configure()?;
        }
        Ok(())
    }

    fn select_codec(&mut self, codec: Codec, force_software: bool) -> Result<(), DecodeError> {
        self.state = SessionState::SelectingCodec;
        let candidates = self.platform.enumerate_candidates(codec.mime());
        match CodecSelectionPolicy::new(codec, force_software).select(&candidates) {
            Ok(candidate) => {
                tracing::info!(%codec, decoder = %candidate.name, hw_accel = candidate.hardware_accelerated, force_software, "selected decoder");
                self.candidate = Some(candidate);
                self.codec = Some(codec);
                self.state = SessionState::AwaitingParameterSets;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%codec, error = %err, "no decoder available, will retry on next decode");
                self.state = SessionState::Uninitialized;
                Err(err)
            }
        }
    }

    fn configure(&mut self) -> Result<(), DecodeError> {
        let (Some(codec), Some(candidate)) = (self.codec, self.candidate.clone()) else {
            return Err(DecodeError::ConfigurationFailure(
                "no decoder selected".to_string(),
            ));
        };
        let await_sets = codec.requires_parameter_sets()
            && self.settings.h264_configuration == H264Configuration::AwaitParameterSets;
        let parameter_sets = self.parameter_sets.required();
        if await_sets && parameter_sets.is_none() {
            return Ok(());
        }
        let format = DecoderFormat {
            codec,
            dims: self.dims.current().unwrap_or(self.settings.provisional_dims),
            parameter_sets,
            render_target: self.render_target,
        };

        let mut decoder = match self.platform.create(&candidate.name) {
            Ok(decoder) => decoder,
            Err(err) => return Err(self.configuration_failed(None, &format, err)),
        };
        if let Err(err) = decoder.configure(&format) {
            return Err(self.configuration_failed(Some(decoder), &format, err));
        }
        self.state = SessionState::Configured;
        if let Err(err) = decoder.start() {
            return Err(self.configuration_failed(Some(decoder), &format, err));
        }
        tracing::info!(decoder = %candidate.name, %format, "decoder running");
        self.decoder = Some(decoder);
        self.state = SessionState::Running;
        Ok(())
    }

    fn configuration_failed(
        &mut self,
        decoder: Option<Box<dyn PlatformDecoder>>,
        format: &DecoderFormat,
        err: DecodeError,
    ) -> DecodeError {
        if let Some(mut decoder) = decoder {
            decoder.release();
        }
        tracing::warn!(%format, error = %err, "decoder configuration failed");
        self.state = SessionState::Stopped(format!("configuration failed: {err}"));
        DecodeError::ConfigurationFailure(err.to_string())
    }

    fn feed(
        &mut self,
        unit: &[u8],
        pts: Option<TimestampUs>,
    ) -> Result<DecodeOutcome, DecodeError> {
        let pts = pts.unwrap_or_else(|| self.clock.next());
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(DecodeOutcome::Deferred);
        };
        match self
            .feeder
            .feed(decoder.as_mut(), unit, pts, &mut self.drain, &mut self.dims)
        {
            Ok(FeedOutcome::Submitted { attempts }) => {
                self.submitted_units += 1;
                let report = self.drain.drain(decoder.as_mut(), &mut self.dims);
                if report.end_of_stream {
                    tracing::debug!(%pts, pending = self.drain.latency().pending(), "decoder signalled end of stream");
                }
                Ok(DecodeOutcome::Submitted { pts, attempts })
            }
            Ok(FeedOutcome::Dropped { attempts }) => {
                self.dropped_units += 1;
                Ok(DecodeOutcome::Dropped { pts, attempts })
            }
            Err(err) => {
                tracing::warn!(%pts, error = %err, "feed aborted, session stays up");
                Err(err)
            }
        }
    }

    fn teardown(&mut self, reason: &str) {
        if let Some(mut decoder) = self.decoder.take() {
            if let Err(err) = decoder.stop() {
                tracing::warn!(error = %err, "decoder stop failed during teardown");
            }
            decoder.release();
        }
        self.parameter_sets.clear();
        self.drain.latency_mut().clear();
        self.candidate = None;
        self.codec = None;
        tracing::info!(reason, previous = %self.state, "decoder session stopped");
        self.state = SessionState::Stopped(reason.to_string());
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            if let Err(err) = decoder.stop() {
                tracing::warn!(error = %err, "decoder stop failed on drop");
            }
            decoder.release();
        }
    }
}
