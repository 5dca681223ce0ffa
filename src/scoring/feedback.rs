//! Practice Feedback Mapping
//!
//! Pure functions from score values to the textual guidance shown to the
//! caller. Quality buckets are monotone in the overall score; the
//! recommendation looks at the weakest active component and the trend.

use crate::types::SimilarityScore;

/// Quality bucket thresholds on the overall score, ascending.
///
/// Calibration:
/// - below 0.002: essentially no resemblance yet
/// - 0.002-0.005: fragments of the call coming through
/// - 0.005-0.01: recognizable rendition (default match threshold is 0.005)
/// - 0.01-0.02: solid rendition
/// - above 0.02: field-ready
const QUALITY_BUCKETS: [(f32, &str); 4] = [
    (0.002, "Needs improvement"),
    (0.005, "Fair"),
    (0.01, "Good"),
    (0.02, "Very good"),
];

const QUALITY_TOP: &str = "Excellent";

/// Bucket the overall score into a coarse quality label.
pub fn quality_assessment(overall: f32) -> &'static str {
    for (threshold, label) in QUALITY_BUCKETS {
        if overall < threshold {
            return label;
        }
    }
    QUALITY_TOP
}

/// Identify the weakest active component and phrase one actionable hint.
/// Improving trends get an encouraging suffix; no user data, no markup.
pub fn recommendation(score: &SimilarityScore, pitch_enabled: bool, is_improving: bool) -> String {
    let mut components = vec![
        ("tone", score.mfcc),
        ("volume", score.volume),
        ("timing", score.timing),
    ];
    if pitch_enabled {
        components.push(("pitch", score.pitch));
    }

    let weakest = components
        .iter()
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|&(name, _)| name)
        .unwrap_or("tone");

    let hint = match weakest {
        "volume" => "Match the master call's loudness: follow its swells and fades instead of holding one level.",
        "timing" => "Work on pacing: your call runs ahead of or behind the master's rhythm, so stretch or tighten it.",
        "pitch" => "Center your pitch on the master call before working on expression.",
        _ => "Focus on the tone of the call: shape each note to match the master's timbre.",
    };

    if is_improving {
        format!("{} You're trending upward - keep going.", hint)
    } else {
        hint.to_string()
    }
}
