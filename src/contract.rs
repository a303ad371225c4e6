use std::num::NonZeroU32;
use std::time::Duration;
use std::{fmt, fmt::Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    H264,
    Hevc,
}

impl Codec {
    pub fn mime(self) -> &'static str {
        match self {
            Self::H264 => "video/avc",
            Self::Hevc => "video/hevc",
        }
    }

    pub fn sps_nal_type(self) -> u8 {
        match self {
            Self::H264 => 7,
            Self::Hevc => 33,
        }
    }

    pub fn pps_nal_type(self) -> u8 {
        match self {
            Self::H264 => 8,
            Self::Hevc => 34,
        }
    }

    pub fn nal_type(self, header: u8) -> u8 {
        match self {
            Self::H264 => header & 0x1f,
            Self::Hevc => (header >> 1) & 0x3f,
        }
    }

    /// Whether the decoder must be handed SPS/PPS before it can be configured.
    pub fn requires_parameter_sets(self) -> bool {
        matches!(self, Self::H264)
    }
}

impl Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => f.write_str("h264"),
            Self::Hevc => f.write_str("hevc"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: NonZeroU32,
    pub height: NonZeroU32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }
}

impl Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Presentation timestamp in microseconds, also used to correlate input
/// submissions with completed outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampUs(pub i64);

impl Display for TimestampUs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Opaque handle to the surface decoded frames are rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTarget(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderCandidate {
    pub name: String,
    pub mime: String,
    pub hardware_accelerated: bool,
    pub is_encoder: bool,
}

impl DecoderCandidate {
    pub fn decoder(name: impl Into<String>, codec: Codec, hardware_accelerated: bool) -> Self {
        Self {
            name: name.into(),
            mime: codec.mime().to_string(),
            hardware_accelerated,
            is_encoder: false,
        }
    }
}

impl Display for DecoderCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DecoderCandidate(name={}, mime={}, hw_accel={}, encoder={})",
            self.name, self.mime, self.hardware_accelerated, self.is_encoder
        )
    }
}

/// Everything the platform needs to configure a decoder instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderFormat {
    pub codec: Codec,
    pub dims: Dimensions,
    /// SPS then PPS payloads for codecs that need them up front.
    pub parameter_sets: Option<[Vec<u8>; 2]>,
    pub render_target: Option<RenderTarget>,
}

impl Display for DecoderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DecoderFormat(mime={}, dims={}, parameter_sets={}, render_target={:?})",
            self.codec.mime(),
            self.dims,
            self.parameter_sets.is_some(),
            self.render_target
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSlot {
    Ready(usize),
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    Frame { slot: usize, pts: TimestampUs },
    FormatChanged(Dimensions),
    BuffersChanged,
    TryAgainLater,
    EndOfStream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    SelectingCodec,
    AwaitingParameterSets,
    Configured,
    Running,
    Stopped(String),
}

impl SessionState {
    pub fn has_decoder(&self) -> bool {
        matches!(self, Self::Configured | Self::Running)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::SelectingCodec => f.write_str("selecting_codec"),
            Self::AwaitingParameterSets => f.write_str("awaiting_parameter_sets"),
            Self::Configured => f.write_str("configured"),
            Self::Running => f.write_str("running"),
            Self::Stopped(reason) => write!(f, "stopped({reason})"),
        }
    }
}

/// What happened to one `decode` call's access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    Submitted { pts: TimestampUs, attempts: u32 },
    Dropped { pts: TimestampUs, attempts: u32 },
    /// No decoder is ready for input yet (parameter sets still missing).
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeSummary {
    pub state: SessionState,
    pub codec: Option<Codec>,
    pub decoder_name: Option<String>,
    pub hardware_accelerated: bool,
    pub dims: Option<Dimensions>,
    pub submitted_units: u64,
    pub dropped_units: u64,
    pub decoded_frames: u64,
    pub mean_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Display for DecodeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DecodeSummary(state={}, codec={:?}, decoder={:?}, hw_accel={}, dims={:?}, submitted={}, dropped={}, decoded_frames={}, mean_latency={:?}, p95_latency={:?})",
            self.state,
            self.codec,
            self.decoder_name,
            self.hardware_accelerated,
            self.dims,
            self.submitted_units,
            self.dropped_units,
            self.decoded_frames,
            self.mean_latency,
            self.p95_latency
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("no decoder available for {mime}: {detail}")]
    CodecUnavailable { mime: &'static str, detail: String },
    #[error("decoder configuration failed: {0}")]
    ConfigurationFailure(String),
    #[error("input queue stayed busy for {attempts} attempts")]
    InputTimeout { attempts: u32 },
    #[error("output dequeue failed: {0}")]
    OutputDequeue(String),
    #[error("sps parse failed: {0}")]
    SpsParse(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("platform error({context}): {message}")]
    Platform {
        context: &'static str,
        message: String,
    },
}

pub(crate) fn platform_error(context: &'static str, message: impl Into<String>) -> DecodeError {
    DecodeError::Platform {
        context,
        message: message.into(),
    }
}

/// Enumerates and instantiates decoders on the host platform.
pub trait DecoderPlatform: Send {
    fn enumerate_candidates(&self, mime: &str) -> Vec<DecoderCandidate>;

    fn create(&mut self, name: &str) -> Result<Box<dyn PlatformDecoder>, DecodeError>;
}

/// One platform decoder instance. Input and output buffers stay owned by the
/// platform and are only referenced by slot index.
pub trait PlatformDecoder: Send {
    fn configure(&mut self, format: &DecoderFormat) -> Result<(), DecodeError>;

    fn start(&mut self) -> Result<(), DecodeError>;

    fn dequeue_input_slot(&mut self, timeout: Duration) -> Result<InputSlot, DecodeError>;

    fn submit_input(
        &mut self,
        slot: usize,
        data: &[u8],
        pts: TimestampUs,
    ) -> Result<(), DecodeError>;

    fn dequeue_output(&mut self) -> Result<OutputEvent, DecodeError>;

    fn release_output(&mut self, slot: usize) -> Result<(), DecodeError>;

    fn stop(&mut self) -> Result<(), DecodeError>;

    fn release(&mut self);
}

/// Outbound notifications. Called with the session lock held, so
/// implementations must not call back into the decoder.
pub trait DecodeListener: Send + Sync {
    fn dimensions_changed(&self, dims: Dimensions);

    fn frame_decoded(&self, _pts: TimestampUs, _latency: Duration) {}

    fn unit_dropped(&self, _pts: TimestampUs) {}
}
