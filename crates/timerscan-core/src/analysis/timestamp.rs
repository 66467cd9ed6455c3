use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::FrameError;

/// Sentinel stored for frames whose timer could not be read.
pub const FAILED_TIMESTAMP: i64 = -1;

static TIME_REGEX: OnceLock<Regex> = OnceLock::new();
fn time_regex() -> &'static Regex {
    TIME_REGEX.get_or_init(|| {
        Regex::new(r"([0-9]{1,2})[:.]?([0-9]{2})[:.]?([0-9]{2})")
            .expect("timestamp pattern is valid")
    })
}

/// A decoded timer value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: i64,
    /// `h:mm:ss` rendering of the matched digits.
    pub normalized: String,
}

/// Extract the single `h:mm:ss` timer reading from recognized text.
///
/// Whitespace is stripped first. Zero matches and multiple matches are both
/// failures: extra digit groups mean the recognizer picked up noise, and
/// guessing which group is the timer is not attempted.
pub fn parse_timestamp(text: &str) -> Result<Timestamp, FrameError> {
    let cleaned: String = text.split_whitespace().collect();

    let groups = {
        let mut captures = time_regex().captures_iter(&cleaned);
        match (captures.next(), captures.next()) {
            (Some(caps), None) => {
                let group = |i: usize| caps[i].parse::<i64>().ok();
                match (group(1), group(2), group(3)) {
                    (Some(h), Some(m), Some(s)) => Some((h, m, s)),
                    _ => None,
                }
            }
            _ => None,
        }
    };

    let Some((hours, minutes, seconds)) = groups else {
        let matches = time_regex().find_iter(&cleaned).count();
        debug!(%cleaned, matches, "timestamp parse failed");
        return Err(FrameError::TimeStringParsing { cleaned, matches });
    };

    Ok(Timestamp {
        seconds: 3600 * hours + 60 * minutes + seconds,
        normalized: format!("{hours}:{minutes:02}:{seconds:02}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_all_valid_values() {
        for hours in 0..=99i64 {
            for minutes in 0..=59i64 {
                for seconds in 0..=59i64 {
                    let expected = 3600 * hours + 60 * minutes + seconds;
                    let normalized = format!("{hours}:{minutes:02}:{seconds:02}");
                    let padded = format!("{hours:02}:{minutes:02}:{seconds:02}");
                    for s in [&normalized, &padded] {
                        let ts = parse_timestamp(s).unwrap();
                        assert_eq!(ts.seconds, expected, "{s}");
                        assert_eq!(ts.normalized, normalized, "{s}");
                    }
                }
            }
        }
    }

    #[test]
    fn parses_with_noise_and_whitespace() {
        let ts = parse_timestamp(" 69 : 09 : 34 \n\x0c").unwrap();
        assert_eq!(ts.seconds, 69 * 3600 + 9 * 60 + 34);
        assert_eq!(ts.normalized, "69:09:34");

        let ts = parse_timestamp("1.02.03").unwrap();
        assert_eq!(ts.seconds, 3723);
        assert_eq!(ts.normalized, "1:02:03");

        let ts = parse_timestamp("10203").unwrap();
        assert_eq!(ts.seconds, 3723);
    }

    #[test]
    fn fails_without_digit_groups() {
        for s in ["", "   ", "abc", "12:3", "::"] {
            match parse_timestamp(s) {
                Err(FrameError::TimeStringParsing { matches, .. }) => assert_eq!(matches, 0, "{s:?}"),
                other => panic!("expected parse failure for {s:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn non_ascii_digits_are_not_a_timer() {
        for s in ["١٢:٣٤:٥٦", "１２:３４:５６", "１:02:03"] {
            match parse_timestamp(s) {
                Err(FrameError::TimeStringParsing { matches, .. }) => assert_eq!(matches, 0, "{s:?}"),
                other => panic!("expected parse failure for {s:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn fails_on_multiple_digit_groups() {
        for s in ["01:02:03 04:05:06", "12:34:56x7:08:09", "1:00:00 and 2:00:00"] {
            match parse_timestamp(s) {
                Err(FrameError::TimeStringParsing { matches, .. }) => assert!(matches >= 2, "{s:?}"),
                other => panic!("expected parse failure for {s:?}, got {other:?}"),
            }
        }
    }
}
