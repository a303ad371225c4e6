use crate::{Codec, DecodeError, DecoderCandidate};

/// Picks a platform decoder for one codec family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSelectionPolicy {
    pub codec: Codec,
    pub force_software: bool,
}

impl CodecSelectionPolicy {
    pub fn new(codec: Codec, force_software: bool) -> Self {
        Self {
            codec,
            force_software,
        }
    }

    /// Hardware first unless software is forced, then the first software
    /// decoder, then any hardware decoder as a last resort.
    pub fn select(&self, candidates: &[DecoderCandidate]) -> Result<DecoderCandidate, DecodeError> {
        let mime = self.codec.mime();
        let eligible = candidates
            .iter()
            .filter(|c| !c.is_encoder && c.mime.eq_ignore_ascii_case(mime))
            .collect::<Vec<_>>();

        let hardware = eligible.iter().find(|c| c.hardware_accelerated);
        let software = eligible.iter().find(|c| !c.hardware_accelerated);
        let picked = match (self.force_software, hardware, software) {
            (false, Some(hw), _) => Some(hw),
            (_, _, Some(sw)) => Some(sw),
            (true, Some(hw), None) => Some(hw),
            (_, None, None) => None,
        };
        if let Some(candidate) = picked {
            return Ok((*candidate).clone());
        }

        let detail = if candidates.is_empty() {
            "platform reported no decoders".to_string()
        } else {
            candidates
                .iter()
                .map(|c| format!("{}: mime={}, encoder={}", c.name, c.mime, c.is_encoder))
                .collect::<Vec<_>>()
                .join("; ")
        };
        Err(DecodeError::CodecUnavailable { mime, detail })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn hw(name: &str) -> DecoderCandidate {
        DecoderCandidate::decoder(name, Codec::H264, true)
    }

    fn sw(name: &str) -> DecoderCandidate {
        DecoderCandidate::decoder(name, Codec::H264, false)
    }

    #[rstest]
    #[case(false, vec![sw("c2.android.avc"), hw("c2.qti.avc")], "c2.qti.avc")]
    #[case(true, vec![sw("c2.android.avc"), hw("c2.qti.avc")], "c2.android.avc")]
    #[case(false, vec![sw("c2.android.avc")], "c2.android.avc")]
    #[case(true, vec![hw("c2.qti.avc")], "c2.qti.avc")]
    #[case(false, vec![sw("sw.first"), sw("sw.second")], "sw.first")]
    fn selection_order(
        #[case] force_software: bool,
        #[case] candidates: Vec<DecoderCandidate>,
        #[case] expected: &str,
    ) {
        let picked = CodecSelectionPolicy::new(Codec::H264, force_software)
            .select(&candidates)
            .unwrap();
        assert_eq!(picked.name, expected);
    }

    #[test]
    fn encoders_and_other_mimes_are_ignored() {
        let mut encoder = hw("c2.qti.avc.encoder");
        encoder.is_encoder = true;
        let hevc = DecoderCandidate::decoder("c2.qti.hevc", Codec::Hevc, true);
        let err = CodecSelectionPolicy::new(Codec::H264, false)
            .select(&[encoder, hevc])
            .unwrap_err();
        match err {
            DecodeError::CodecUnavailable { mime, detail } => {
                assert_eq!(mime, "video/avc");
                assert!(detail.contains("c2.qti.hevc"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_candidate_list_is_unavailable() {
        let err = CodecSelectionPolicy::new(Codec::Hevc, false)
            .select(&[])
            .unwrap_err();
        assert!(matches!(err, DecodeError::CodecUnavailable { .. }));
    }
}
