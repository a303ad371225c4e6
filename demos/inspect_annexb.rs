use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use video_ingest::bitstream::{detect_codec, nal_units};
use video_ingest::memory_platform::MemoryPlatform;
use video_ingest::sps::parse_sps;
use video_ingest::{
    Codec, DecodeListener, DecodeOutcome, DecoderSettings, Dimensions, RenderTarget,
    StreamDecoder, TimestampUs,
};

#[derive(Parser, Debug)]
#[command(about = "Scan an Annex-B stream and replay it through the in-memory decoder")]
struct Args {
    #[arg(long)]
    input: PathBuf,
    /// Codec assumed until the stream carries an SPS.
    #[arg(long, default_value = "h264")]
    codec: String,
    #[arg(long, default_value_t = false)]
    force_software: bool,
    /// Fake busy input polls per access unit, to exercise backpressure.
    #[arg(long, default_value_t = 0)]
    busy_polls: u32,
}

struct PrintDims;

impl DecodeListener for PrintDims {
    fn dimensions_changed(&self, dims: Dimensions) {
        println!("dimensions_changed: {dims}");
    }

    fn unit_dropped(&self, pts: TimestampUs) {
        println!("unit_dropped: pts={pts}");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let preference = parse_codec(&args.codec)?;
    let data = fs::read(&args.input)
        .with_context(|| format!("failed to read input stream: {}", args.input.display()))?;

    let codec = detect_codec(&data).unwrap_or(preference);
    let mut histogram = BTreeMap::<u8, usize>::new();
    let mut access_units = Vec::new();
    let mut unit_start = None;
    for nal in nal_units(&data) {
        let Some(kind) = nal.kind(codec) else {
            continue;
        };
        *histogram.entry(kind.nal_type).or_default() += 1;
        if kind.is_sps() && codec == Codec::H264 {
            match parse_sps(nal.payload()) {
                Ok(info) => println!("sps: profile_idc={} dims={}", info.profile_idc, info.dims),
                Err(err) => println!("sps: {err}"),
            }
        }
        let start = *unit_start.get_or_insert(nal.range().start);
        if kind.is_vcl() {
            access_units.push(start..nal.range().end);
            unit_start = None;
        }
    }
    println!(
        "codec={codec} nal_types={histogram:?} access_units={}",
        access_units.len()
    );

    let platform = MemoryPlatform::with_default_candidates();
    platform.update_behavior(|b| b.busy_polls = args.busy_polls);
    let settings = DecoderSettings::from_env();
    let decoder = StreamDecoder::new(platform.clone(), settings).with_listener(Arc::new(PrintDims));
    decoder.on_surface_available(RenderTarget(1));

    let mut deferred = 0usize;
    for range in access_units {
        if args.busy_polls > 0 {
            platform.update_behavior(|b| b.busy_polls = args.busy_polls);
        }
        let outcome = decoder
            .decode(&data, range.start, range.len(), args.force_software, preference)
            .context("decode failed")?;
        if outcome == DecodeOutcome::Deferred {
            deferred += 1;
        }
    }

    let summary = decoder.summary();
    decoder.stop("end of input");
    println!(
        "{summary}, deferred={deferred}, mean_latency_ms={:.3}",
        summary
            .mean_latency
            .unwrap_or(Duration::ZERO)
            .as_secs_f64()
            * 1_000.0
    );
    Ok(())
}

fn parse_codec(raw: &str) -> Result<Codec> {
    match raw.to_ascii_lowercase().as_str() {
        "h264" | "avc" => Ok(Codec::H264),
        "hevc" | "h265" => Ok(Codec::Hevc),
        other => anyhow::bail!("unsupported codec: {other}"),
    }
}
