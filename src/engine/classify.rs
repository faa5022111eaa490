use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::Phase;

static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+\.?\d*)%").expect("valid regex"));

const KEYWORDS: [(&str, Phase, &str); 3] = [
    ("Downloading", Phase::Downloading, "Starting download..."),
    ("Verifying", Phase::Verifying, "Verifying download..."),
    ("Installing", Phase::Installing, "Installing..."),
];

/// Outcome of classifying one output line. At most one of the fields is set;
/// a line never yields both a progress update and a phase message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub progress: Option<u8>,
    pub phase: Option<(Phase, &'static str)>,
}

/// Classify one raw output line.
///
/// Lines containing `%` are checked for a numeric percentage: the fractional
/// part is truncated, values above 100 are clamped, and a value equal to
/// `last_percent` is reported as nothing. The `%` branch is exclusive; phase
/// keywords are only consulted for lines without `%`. Keyword matching is
/// case-sensitive and the first keyword in fixed order wins.
pub fn classify(line: &str, last_percent: Option<u8>) -> Classification {
    if line.contains('%') {
        if let Some(caps) = PERCENT_RE.captures(line) {
            if let Ok(raw) = caps[1].parse::<f64>() {
                let truncated = raw.trunc();
                let percent = if truncated > 100.0 {
                    tracing::warn!(line, value = truncated, "percent above 100, clamping");
                    100
                } else {
                    truncated as u8
                };
                if last_percent != Some(percent) {
                    return Classification {
                        progress: Some(percent),
                        phase: None,
                    };
                }
            }
        }
        return Classification::default();
    }

    for (needle, phase, message) in KEYWORDS {
        if line.contains(needle) {
            return Classification {
                progress: None,
                phase: Some((phase, message)),
            };
        }
    }

    Classification::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_percent_from_mixed_text() {
        let c = classify("Downloading update... 0%", None);
        assert_eq!(c.progress, Some(0));
        // The % branch never reports a phase, even with a keyword present.
        assert_eq!(c.phase, None);
    }

    #[test]
    fn truncates_fractional_percent() {
        let c = classify("45.7%", Some(30));
        assert_eq!(c.progress, Some(45));
    }

    #[test]
    fn repeated_percent_reports_nothing() {
        let c = classify("45%", Some(45));
        assert_eq!(c, Classification::default());
    }

    #[test]
    fn percent_sign_without_digits_reports_nothing() {
        let c = classify("progress: %", None);
        assert_eq!(c, Classification::default());
    }

    #[test]
    fn clamps_percent_above_one_hundred() {
        let c = classify("150%", Some(40));
        assert_eq!(c.progress, Some(100));
    }

    #[test]
    fn maps_keywords_to_phase_messages() {
        let c = classify("Downloading macOS 15.3.1 installer", None);
        assert_eq!(c.phase, Some((Phase::Downloading, "Starting download...")));
        assert_eq!(c.progress, None);

        let c = classify("Verifying package", None);
        assert_eq!(c.phase, Some((Phase::Verifying, "Verifying download...")));

        let c = classify("Installing payload", None);
        assert_eq!(c.phase, Some((Phase::Installing, "Installing...")));
    }

    #[test]
    fn keyword_matching_is_case_sensitive() {
        let c = classify("downloading in lowercase", None);
        assert_eq!(c, Classification::default());
    }

    #[test]
    fn first_keyword_in_fixed_order_wins() {
        let c = classify("Verifying before Downloading", None);
        assert_eq!(c.phase, Some((Phase::Downloading, "Starting download...")));
    }

    #[test]
    fn unrelated_lines_report_nothing() {
        let c = classify("Scanning for available updates", Some(10));
        assert_eq!(c, Classification::default());
    }
}
