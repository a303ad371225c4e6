use std::num::NonZeroU32;
use std::time::Duration;

use crate::Dimensions;
use crate::feeder::RetryPolicy;

const PROVISIONAL_DIMS: Dimensions = Dimensions {
    width: NonZeroU32::new(1920).unwrap(),
    height: NonZeroU32::new(1080).unwrap(),
};

/// How an H.264 session gets configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum H264Configuration {
    /// Wait until SPS and PPS are captured, configure with them.
    #[default]
    AwaitParameterSets,
    /// Configure immediately with provisional dimensions, like H.265.
    Provisional,
}

#[derive(Debug, Clone)]
pub struct DecoderSettings {
    /// Used when the stream has not revealed its size yet.
    pub provisional_dims: Dimensions,
    pub h264_configuration: H264Configuration,
    pub retry: RetryPolicy,
    pub max_drain_events: usize,
    pub latency_capacity: usize,
    pub latency_stale_after: Duration,
    pub report_metrics: bool,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            provisional_dims: PROVISIONAL_DIMS,
            h264_configuration: H264Configuration::default(),
            retry: RetryPolicy::default(),
            max_drain_events: 64,
            latency_capacity: 256,
            latency_stale_after: Duration::from_secs(5),
            report_metrics: false,
        }
    }
}

impl DecoderSettings {
    /// Defaults with `VIDEO_INGEST_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let mut settings = Self::default();
        if let Some(attempts) = parse("VIDEO_INGEST_FEED_ATTEMPTS") {
            settings.retry.max_attempts = attempts.clamp(1, 1000) as u32;
        }
        if let Some(ms) = parse("VIDEO_INGEST_POLL_MS") {
            settings.retry.poll_timeout = Duration::from_millis(ms.min(1000));
        }
        if let Some(ms) = parse("VIDEO_INGEST_RETRY_DELAY_MS") {
            settings.retry.retry_delay = Duration::from_millis(ms.min(1000));
        }
        if let Some(mode) = lookup("VIDEO_INGEST_H264_MODE") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "provisional" => settings.h264_configuration = H264Configuration::Provisional,
                "await" | "parameter-sets" => {
                    settings.h264_configuration = H264Configuration::AwaitParameterSets;
                }
                other => tracing::warn!(mode = other, "ignoring unknown VIDEO_INGEST_H264_MODE"),
            }
        }
        settings.report_metrics = lookup("VIDEO_INGEST_METRICS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        settings
    }

    #[must_use]
    pub fn with_h264_configuration(mut self, mode: H264Configuration) -> Self {
        self.h264_configuration = mode;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};

    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_match_feeder_policy() {
        let settings = DecoderSettings::default();
        assert_eq!(settings.provisional_dims, Dimensions::new(1920, 1080).unwrap());
        assert_eq!(settings.retry.max_attempts, 20);
        assert_eq!(settings.retry.poll_timeout, Duration::from_millis(10));
        assert_eq!(settings.retry.retry_delay, Duration::from_millis(5));
        assert_eq!(
            settings.h264_configuration,
            H264Configuration::AwaitParameterSets
        );
    }

    #[test]
    fn builder_overrides() {
        let settings = DecoderSettings::default()
            .with_h264_configuration(H264Configuration::Provisional)
            .with_retry(RetryPolicy::immediate(3));
        assert_eq!(settings.h264_configuration, H264Configuration::Provisional);
        assert_eq!(settings.retry.max_attempts, 3);
    }

    fn lookup(vars: &[(&str, &str)]) -> DecoderSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DecoderSettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[rstest]
    #[case("0", 1)]
    #[case("7", 7)]
    #[case("5000", 1000)]
    #[case("-3", 20)]
    #[case("many", 20)]
    fn feed_attempts_are_clamped(#[case] raw: &str, #[case] expected: u32) {
        let settings = lookup(&[("VIDEO_INGEST_FEED_ATTEMPTS", raw)]);
        assert_eq!(settings.retry.max_attempts, expected);
    }

    #[rstest]
    #[case("provisional", H264Configuration::Provisional)]
    #[case(" Provisional ", H264Configuration::Provisional)]
    #[case("await", H264Configuration::AwaitParameterSets)]
    #[case("parameter-sets", H264Configuration::AwaitParameterSets)]
    #[case("eager", H264Configuration::AwaitParameterSets)]
    fn h264_mode_values(#[case] raw: &str, #[case] expected: H264Configuration) {
        let settings = lookup(&[("VIDEO_INGEST_H264_MODE", raw)]);
        assert_eq!(settings.h264_configuration, expected);
    }

    #[test]
    fn wait_overrides_are_capped_at_one_second() {
        let settings = lookup(&[
            ("VIDEO_INGEST_POLL_MS", "25"),
            ("VIDEO_INGEST_RETRY_DELAY_MS", "90000"),
            ("VIDEO_INGEST_METRICS", "TRUE"),
        ]);
        assert_eq!(settings.retry.poll_timeout, Duration::from_millis(25));
        assert_eq!(settings.retry.retry_delay, Duration::from_secs(1));
        assert!(settings.report_metrics);
    }

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn from_env_reads_process_environment() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let vars = [
            ("VIDEO_INGEST_FEED_ATTEMPTS", "2000"),
            ("VIDEO_INGEST_POLL_MS", "3"),
            ("VIDEO_INGEST_RETRY_DELAY_MS", "0"),
            ("VIDEO_INGEST_H264_MODE", "provisional"),
            ("VIDEO_INGEST_METRICS", "1"),
        ];
        // SAFETY: ENV_LOCK serializes every test in this crate that touches
        // the environment, and nothing else reads these keys.
        unsafe {
            for (key, value) in vars {
                std::env::set_var(key, value);
            }
        }
        let settings = DecoderSettings::from_env();
        unsafe {
            for (key, _) in vars {
                std::env::remove_var(key);
            }
        }

        assert_eq!(settings.retry.max_attempts, 1000);
        assert_eq!(settings.retry.poll_timeout, Duration::from_millis(3));
        assert_eq!(settings.retry.retry_delay, Duration::ZERO);
        assert_eq!(settings.h264_configuration, H264Configuration::Provisional);
        assert!(settings.report_metrics);
    }
}
