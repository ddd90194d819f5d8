//! Timed-text caption document (SubRip layout)
//!
//! A document is a sequence of entries:
//!
//! ```text
//! 1
//! 00:00:01,000 --> 00:00:02,500
//! Hello there
//!
//! ```
//!
//! Index and timing strings are kept verbatim so a translated copy
//! reproduces the source numbering and timing byte for byte. Text may span
//! several lines; the lines are kept as written, joined with `\n`.

use std::fmt;
use std::str::FromStr;

const TIME_SEPARATOR: &str = " --> ";

/// Errors from parsing or rebuilding a caption document.
///
/// Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptionError {
    #[error("line {line}: invalid entry index {value:?}")]
    InvalidIndex { line: usize, value: String },

    #[error("line {line}: invalid time range {value:?}")]
    InvalidTimeRange { line: usize, value: String },

    #[error("line {line}: entry is missing its time range")]
    MissingTimeRange { line: usize },

    #[error("line {line}: entry has no text")]
    MissingText { line: usize },

    #[error("expected {expected} text lines, got {actual}")]
    TextCountMismatch { expected: usize, actual: usize },
}

/// One caption cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionEntry {
    /// Decimal index as written (`01` stays `01`)
    pub index: String,
    pub start: String,
    pub end: String,
    pub text: String,
}

/// A parsed caption track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptionDocument {
    pub entries: Vec<CaptionEntry>,
}

impl CaptionDocument {
    /// Parse a document, tolerating blank separator lines, CRLF line endings
    /// and a leading byte-order mark.
    pub fn parse(data: &str) -> Result<Self, CaptionError> {
        let data = data.strip_prefix('\u{feff}').unwrap_or(data);
        let lines: Vec<&str> = data.lines().collect();
        let mut entries = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let index_line = lines[i].trim();
            if index_line.is_empty() {
                i += 1;
                continue;
            }
            if !index_line.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CaptionError::InvalidIndex {
                    line: i + 1,
                    value: index_line.to_string(),
                });
            }
            let index = index_line.to_string();
            i += 1;

            let range_line = lines
                .get(i)
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .ok_or(CaptionError::MissingTimeRange { line: i + 1 })?;
            let (start, end) = split_time_range(range_line).ok_or_else(|| {
                CaptionError::InvalidTimeRange {
                    line: i + 1,
                    value: range_line.to_string(),
                }
            })?;
            i += 1;

            let text_start = i;
            while i < lines.len() && !lines[i].trim().is_empty() {
                i += 1;
            }
            if i == text_start {
                return Err(CaptionError::MissingText { line: i + 1 });
            }
            let text = lines[text_start..i].join("\n");

            entries.push(CaptionEntry {
                index,
                start: start.to_string(),
                end: end.to_string(),
                text,
            });
        }

        Ok(Self { entries })
    }

    /// Text of every entry, in order.
    pub fn texts(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.text.clone()).collect()
    }

    /// Copy of this document with identical indices and timing but the given
    /// texts. `texts` must have exactly one element per entry.
    pub fn with_texts(&self, texts: Vec<String>) -> Result<Self, CaptionError> {
        if texts.len() != self.entries.len() {
            return Err(CaptionError::TextCountMismatch {
                expected: self.entries.len(),
                actual: texts.len(),
            });
        }
        let entries = self
            .entries
            .iter()
            .zip(texts)
            .map(|(entry, text)| CaptionEntry {
                text,
                ..entry.clone()
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split `start --> end`; exactly one separator is allowed.
fn split_time_range(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split(TIME_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(start), Some(end), None) if !start.is_empty() && !end.is_empty() => {
            Some((start, end))
        }
        _ => None,
    }
}

impl fmt::Display for CaptionDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(
                f,
                "{}\n{}{}{}\n{}\n\n",
                entry.index, entry.start, TIME_SEPARATOR, entry.end, entry.text
            )?;
        }
        Ok(())
    }
}

impl FromStr for CaptionDocument {
    type Err = CaptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\n00:00:01,000 --> 00:00:02,500\nHello there\n\n2\n00:00:03,000 --> 00:00:04,000\nGeneral Kenobi\nYou are a bold one\n\n";

    #[test]
    fn parses_entries() {
        let doc = CaptionDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.entries[0].index, "1");
        assert_eq!(doc.entries[0].start, "00:00:01,000");
        assert_eq!(doc.entries[0].end, "00:00:02,500");
        assert_eq!(doc.entries[0].text, "Hello there");
        assert_eq!(doc.entries[1].text, "General Kenobi\nYou are a bold one");
    }

    #[test]
    fn round_trip_reproduces_input() {
        let doc = CaptionDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.to_string(), SAMPLE);
    }

    #[test]
    fn round_trip_normalizes_trailing_blank_lines() {
        let input = "1\n00:00:01,000 --> 00:00:02,000\nOne\n\n2\n00:00:02,000 --> 00:00:03,000\nTwo";
        let doc: CaptionDocument = input.parse().unwrap();
        assert_eq!(doc.to_string().trim_end(), input.trim_end());

        let padded = format!("{input}\n\n\n\n");
        let doc = CaptionDocument::parse(&padded).unwrap();
        assert_eq!(doc.to_string().trim_end(), input);
    }

    #[test]
    fn keeps_index_digits_and_trailing_spaces() {
        let input = "01\n00:00:01,000 --> 00:00:02,000\nHello \n  indented\n\n";
        let doc = CaptionDocument::parse(input).unwrap();
        assert_eq!(doc.entries[0].index, "01");
        assert_eq!(doc.entries[0].text, "Hello \n  indented");
        assert_eq!(doc.to_string(), input);
    }

    #[test]
    fn tolerates_extra_blank_separators_and_crlf() {
        let input = "\r\n\r\n1\r\n00:00:01,000 --> 00:00:02,000\r\nOne\r\n\r\n\r\n\r\n2\r\n00:00:02,000 --> 00:00:03,000\r\nTwo\r\n";
        let doc = CaptionDocument::parse(input).unwrap();
        assert_eq!(doc.texts(), vec!["One", "Two"]);
    }

    #[test]
    fn strips_byte_order_mark() {
        let input = "\u{feff}1\n00:00:01,000 --> 00:00:02,000\nOne\n";
        let doc = CaptionDocument::parse(input).unwrap();
        assert_eq!(doc.entries[0].index, "1");
    }

    #[test]
    fn rejects_non_numeric_index() {
        let input = "one\n00:00:01,000 --> 00:00:02,000\nOne\n";
        let err = CaptionDocument::parse(input).unwrap_err();
        assert_eq!(
            err,
            CaptionError::InvalidIndex {
                line: 1,
                value: "one".into()
            }
        );
    }

    #[test]
    fn rejects_time_range_without_separator() {
        let input = "1\n00:00:01,000 - 00:00:02,000\nOne\n";
        let err = CaptionDocument::parse(input).unwrap_err();
        assert!(matches!(err, CaptionError::InvalidTimeRange { line: 2, .. }));
    }

    #[test]
    fn rejects_time_range_with_two_separators() {
        let input = "1\n00:00:01,000 --> 00:00:02,000 --> 00:00:03,000\nOne\n";
        let err = CaptionDocument::parse(input).unwrap_err();
        assert!(matches!(err, CaptionError::InvalidTimeRange { line: 2, .. }));
    }

    #[test]
    fn rejects_truncated_entry() {
        let err = CaptionDocument::parse("1\n").unwrap_err();
        assert_eq!(err, CaptionError::MissingTimeRange { line: 2 });

        let err = CaptionDocument::parse("1\n00:00:01,000 --> 00:00:02,000\n").unwrap_err();
        assert_eq!(err, CaptionError::MissingText { line: 3 });
    }

    #[test]
    fn empty_input_is_empty_document() {
        let doc = CaptionDocument::parse("\n\n").unwrap();
        assert!(doc.is_empty());
        assert_eq!(doc.to_string(), "");
    }

    #[test]
    fn with_texts_keeps_timing() {
        let doc = CaptionDocument::parse(SAMPLE).unwrap();
        let translated = doc
            .with_texts(vec!["Hallo".into(), "General Kenobi\nDu bist kühn".into()])
            .unwrap();
        assert_eq!(translated.entries[0].start, doc.entries[0].start);
        assert_eq!(translated.entries[1].end, doc.entries[1].end);
        assert_eq!(translated.entries[0].text, "Hallo");
        // source untouched
        assert_eq!(doc.entries[0].text, "Hello there");
    }

    #[test]
    fn with_texts_rejects_length_mismatch() {
        let doc = CaptionDocument::parse(SAMPLE).unwrap();
        let err = doc.with_texts(vec!["only one".into()]).unwrap_err();
        assert_eq!(
            err,
            CaptionError::TextCountMismatch {
                expected: 2,
                actual: 1
            }
        );
    }

    mod generated {
        use super::*;
        use proptest::prelude::*;

        fn timestamp() -> impl Strategy<Value = String> {
            (0u32..100, 0u32..60, 0u32..60, 0u32..1000)
                .prop_map(|(h, m, s, ms)| format!("{h:02}:{m:02}:{s:02},{ms:03}"))
        }

        /// Non-blank line: starts with a visible character, may carry
        /// inner and trailing spaces.
        fn text_line() -> impl Strategy<Value = String> {
            "[A-Za-zÀ-ÿ0-9.,!?'-][A-Za-zÀ-ÿ0-9 .,!?'-]{0,30}"
        }

        fn entry() -> impl Strategy<Value = CaptionEntry> {
            (
                "[0-9]{1,4}",
                timestamp(),
                timestamp(),
                prop::collection::vec(text_line(), 1..4),
            )
                .prop_map(|(index, start, end, lines)| CaptionEntry {
                    index,
                    start,
                    end,
                    text: lines.join("\n"),
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            /// Serializing a well-formed document and parsing it back
            /// yields the same document, and re-serializing yields the
            /// same text.
            #[test]
            fn well_formed_documents_round_trip(
                entries in prop::collection::vec(entry(), 0..8),
                trailing_blank_lines in 0usize..3,
            ) {
                let document = CaptionDocument { entries };
                let text = format!("{document}{}", "\n".repeat(trailing_blank_lines));

                let parsed = CaptionDocument::parse(&text).unwrap();
                prop_assert_eq!(&parsed, &document);
                prop_assert_eq!(parsed.to_string(), document.to_string());
            }
        }
    }
}
