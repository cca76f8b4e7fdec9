//! Encoding confirmation and record-delimiter lookup.
//!
//! Both work on a raw byte prefix that may end in the middle of a multi-byte character, so
//! decoding here is always done in streaming mode with `last = false`: an incomplete trailing
//! sequence is held back by the decoder instead of being reported as malformed.

use std::collections::HashMap;

use chardetng::EncodingDetector;
use encoding_rs::{
    DecoderResult, Encoding, GB18030, GBK, ISO_8859_2, ISO_8859_6, ISO_8859_7, ISO_8859_8, ISO_8859_8_I,
    ISO_8859_13, ISO_8859_15, KOI8_R, KOI8_U, UTF_8, UTF_16BE, UTF_16LE, WINDOWS_1250, WINDOWS_1252,
    WINDOWS_1253, WINDOWS_1255, WINDOWS_1256, WINDOWS_1257,
};

use crate::error::{IngestionError, IngestionResult};
use crate::rules::EncodingRule;

/// Result of checking a sample against an [`EncodingRule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingCheck {
    Confirmed(&'static Encoding),
    Mismatch {
        expected: &'static Encoding,
        detected: &'static Encoding,
    },
}

/// Guess the encoding of a byte prefix.
///
/// A byte-order mark wins, then the NUL pattern of BOM-less UTF-16. Pure ASCII is reported as
/// UTF-8; anything else goes through the statistical detector.
pub fn detect_encoding(sample: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(sample) {
        return encoding;
    }
    if let Some(encoding) = utf16_byte_order(sample) {
        return encoding;
    }
    if sample.is_ascii() {
        return UTF_8;
    }
    assess(sample).0
}

/// Detector guess for a non-ASCII sample, and whether it beat at least one other candidate.
fn assess(sample: &[u8]) -> (&'static Encoding, bool) {
    let mut detector = EncodingDetector::new();
    detector.feed(complete_lines(sample), true);
    detector.guess_assess(None, true)
}

/// UTF-16 byte order of a BOM-less sample, read from where the NUL bytes fall.
///
/// Delimited text always carries ASCII delimiters and line ends, so at least one code unit in
/// eight must have a zero high byte, and zero bytes must favour one side of the pair.
fn utf16_byte_order(sample: &[u8]) -> Option<&'static Encoding> {
    let units = sample.len() / 2;
    if units == 0 {
        return None;
    }
    let (mut high_first, mut high_last) = (0usize, 0usize);
    for pair in sample.chunks_exact(2) {
        if pair[0] == 0 {
            high_first += 1;
        }
        if pair[1] == 0 {
            high_last += 1;
        }
    }
    let floor = units.div_ceil(8);
    if high_last >= floor && high_last > high_first {
        Some(UTF_16LE)
    } else if high_first >= floor && high_first > high_last {
        Some(UTF_16BE)
    } else {
        None
    }
}

/// `true` when the detector cannot tell `a` and `b` apart on typical text.
///
/// The detector only ever names one member of each family (for example it reports
/// ISO-8859-15 text as windows-1252).
fn are_variants(a: &'static Encoding, b: &'static Encoding) -> bool {
    let families: [&[&'static Encoding]; 8] = [
        &[WINDOWS_1252, ISO_8859_15],
        &[WINDOWS_1250, ISO_8859_2],
        &[WINDOWS_1253, ISO_8859_7],
        &[WINDOWS_1255, ISO_8859_8, ISO_8859_8_I],
        &[WINDOWS_1256, ISO_8859_6],
        &[WINDOWS_1257, ISO_8859_13],
        &[KOI8_U, KOI8_R],
        &[GBK, GB18030],
    ];
    a == b || families.iter().any(|f| f.contains(&a) && f.contains(&b))
}

/// Cut a sample after its last line feed so a truncated trailing character does not skew
/// detection.
fn complete_lines(sample: &[u8]) -> &[u8] {
    match sample.iter().rposition(|&b| b == b'\n') {
        Some(pos) if pos > 0 => &sample[..=pos],
        _ => sample,
    }
}

/// `true` if `sample` is a valid prefix of text in `encoding`.
pub fn decodes_cleanly(encoding: &'static Encoding, sample: &[u8]) -> bool {
    let mut decoder = encoding.new_decoder_with_bom_removal();
    let Some(capacity) = decoder.max_utf8_buffer_length_without_replacement(sample.len()) else {
        return false;
    };
    let mut out = String::with_capacity(capacity);
    let (result, _) = decoder.decode_to_string_without_replacement(sample, &mut out, false);
    matches!(result, DecoderResult::InputEmpty)
}

/// Check that `sample` is consistent with the declared encoding (or detect one for
/// [`EncodingRule::Auto`]).
pub fn confirm_encoding(sample: &[u8], rule: EncodingRule) -> EncodingCheck {
    let expected = match rule {
        EncodingRule::Auto => return EncodingCheck::Confirmed(detect_encoding(sample)),
        EncodingRule::Expected(encoding) => encoding,
    };
    let mismatch = |detected| EncodingCheck::Mismatch { expected, detected };

    if let Some((bom, _)) = Encoding::for_bom(sample) {
        return if bom == expected {
            EncodingCheck::Confirmed(expected)
        } else {
            mismatch(bom)
        };
    }
    if !decodes_cleanly(expected, sample) {
        return mismatch(detect_encoding(sample));
    }
    let utf16 = utf16_byte_order(sample);
    if expected == UTF_16LE || expected == UTF_16BE {
        return if utf16 == Some(expected) {
            EncodingCheck::Confirmed(expected)
        } else {
            mismatch(detect_encoding(sample))
        };
    }
    if let Some(order) = utf16 {
        return mismatch(order);
    }
    if sample.is_ascii() && expected.is_ascii_compatible() {
        return EncodingCheck::Confirmed(expected);
    }
    // The detector reports any clean non-ASCII UTF-8 as UTF-8.
    if expected == UTF_8 {
        return EncodingCheck::Confirmed(expected);
    }
    let (detected, confident) = assess(sample);
    if !confident || are_variants(expected, detected) {
        EncodingCheck::Confirmed(expected)
    } else {
        mismatch(detected)
    }
}

/// Lower-cased extension of a file name, without the dot.
pub fn file_extension(file_name: &str) -> Option<String> {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_ascii_lowercase()),
        _ => None,
    }
}

/// Record delimiters keyed by (file extension, encoding).
///
/// Lookups try the exact encoding first, then the extension-wide entry. Sources with other
/// file types register their own entries.
#[derive(Debug, Clone)]
pub struct RecordDelimiters {
    entries: HashMap<(String, Option<&'static str>), String>,
}

impl Default for RecordDelimiters {
    fn default() -> Self {
        let mut table = Self::empty();
        for ext in ["csv", "txt", "tsv", "psv", "dat"] {
            table.insert(ext, None, "\n".to_string());
        }
        table
    }
}

/// CSV terminator that splits records on `delimiter`.
///
/// `"\n"` and `"\r\n"` both map to the CRLF terminator, which accepts either line ending. Any
/// other delimiter must be a single ASCII byte.
pub fn record_terminator(delimiter: &str) -> Option<csv::Terminator> {
    match delimiter.as_bytes() {
        b"\n" | b"\r\n" => Some(csv::Terminator::CRLF),
        [b] if b.is_ascii() && *b != b'"' => Some(csv::Terminator::Any(*b)),
        _ => None,
    }
}

impl RecordDelimiters {
    /// A table with no entries.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register the record delimiter for `extension`, optionally only for one encoding.
    ///
    /// Fails for delimiters the full parse cannot split on (see [`record_terminator`]).
    pub fn register(
        &mut self,
        extension: &str,
        encoding: Option<&'static Encoding>,
        delimiter: impl Into<String>,
    ) -> IngestionResult<&mut Self> {
        let delimiter = delimiter.into();
        if record_terminator(&delimiter).is_none() {
            return Err(IngestionError::Config {
                message: format!(
                    "record delimiter {delimiter:?} for '{extension}' must be a line ending or a single ASCII character"
                ),
            });
        }
        self.insert(extension, encoding, delimiter);
        Ok(self)
    }

    fn insert(&mut self, extension: &str, encoding: Option<&'static Encoding>, delimiter: String) {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.entries.insert((ext, encoding.map(Encoding::name)), delimiter);
    }

    /// Record delimiter for a file name decoded as `encoding`, if the pair is supported.
    pub fn lookup(&self, file_name: &str, encoding: &'static Encoding) -> Option<&str> {
        let ext = file_extension(file_name)?;
        self.entries
            .get(&(ext.clone(), Some(encoding.name())))
            .or_else(|| self.entries.get(&(ext, None)))
            .map(String::as_str)
    }
}
