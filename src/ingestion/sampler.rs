//! Incremental sampling of an object's leading bytes.
//!
//! The sampler grows a prefix of the object one range fetch at a time until the decoded text
//! holds a header record and at least one data record. Both caps in [`SamplerOptions`] are
//! checked before each fetch, never after a decode.

use encoding_rs::{Decoder, DecoderResult, Encoding};
use tracing::debug;

use crate::config::SamplerOptions;
use crate::error::{IngestionError, IngestionResult};
use crate::store::ObjectStore;

/// Objects shorter than this cannot hold two non-empty records.
const MIN_OBJECT_BYTES: usize = 3;

/// Header record plus the first data record of a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileExtract {
    pub header: String,
    /// `None` when the object ends right after its header.
    pub first_row: Option<String>,
}

/// A growing prefix of one object.
pub struct Sampler<'a> {
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    key: &'a str,
    options: SamplerOptions,
    buffer: Vec<u8>,
    fetches: usize,
    eof: bool,
}

impl<'a> Sampler<'a> {
    pub fn new(store: &'a dyn ObjectStore, bucket: &'a str, key: &'a str, options: SamplerOptions) -> Self {
        Self {
            store,
            bucket,
            key,
            options,
            buffer: Vec::new(),
            fetches: 0,
            eof: false,
        }
    }

    /// Bytes sampled so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of range fetches issued so far.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    fn can_grow(&self) -> bool {
        !self.eof
            && self.fetches < self.options.max_fetches
            && self.buffer.len() < self.options.max_sample_bytes
    }

    /// Fetch the next range. Returns the number of new bytes.
    ///
    /// Does nothing once the end of the object or either cap has been reached.
    pub fn grow(&mut self) -> IngestionResult<usize> {
        if !self.can_grow() {
            return Ok(0);
        }
        let start = self.buffer.len();
        let want = self
            .options
            .chunk_bytes
            .min(self.options.max_sample_bytes - start);
        let end = start + want - 1;
        let chunk = self
            .store
            .get_range(self.bucket, self.key, start as u64, end as u64)?;
        self.fetches += 1;
        if chunk.len() < want {
            self.eof = true;
        }
        // A misbehaving store must not push the sample past its ceiling.
        let take = chunk.len().min(want);
        self.buffer.extend_from_slice(&chunk[..take]);
        debug!(
            key = self.key,
            start,
            end,
            received = chunk.len(),
            total = self.buffer.len(),
            "sampled range"
        );
        Ok(take)
    }

    /// Grow the sample until it holds two complete records separated by `record_delimiter`,
    /// decoding as `encoding`.
    ///
    /// A record counts as complete once it is followed by a delimiter, or when the object ends.
    pub fn extract(&mut self, encoding: &'static Encoding, record_delimiter: &str) -> IngestionResult<FileExtract> {
        if self.fetches == 0 {
            self.grow()?;
        }
        let mut decoder = encoding.new_decoder_with_bom_removal();
        let mut text = String::new();
        let mut decoded = 0;
        loop {
            let last = self.eof;
            decode_append(&mut decoder, &self.buffer[decoded..], &mut text, last).map_err(|_| {
                IngestionError::Decode {
                    encoding: encoding.name().to_string(),
                    key: self.key.to_string(),
                }
            })?;
            decoded = self.buffer.len();

            if text.matches(record_delimiter).count() >= 2 || last {
                break;
            }
            if !self.can_grow() {
                return Err(IngestionError::SampleOverflow {
                    key: self.key.to_string(),
                    bytes: self.buffer.len(),
                    fetches: self.fetches,
                });
            }
            self.grow()?;
        }

        if text.trim().is_empty() || (self.eof && self.buffer.len() < MIN_OBJECT_BYTES) {
            return Err(IngestionError::EmptyFile {
                key: self.key.to_string(),
            });
        }

        let mut records = text.split(record_delimiter);
        let header = records.next().unwrap_or_default().to_string();
        let first_row = records
            .next()
            .filter(|row| !row.trim().is_empty())
            .map(str::to_string);
        debug!(key = self.key, fetches = self.fetches, bytes = self.buffer.len(), "sample complete");
        Ok(FileExtract { header, first_row })
    }
}

struct Malformed;

fn decode_append(decoder: &mut Decoder, src: &[u8], dst: &mut String, last: bool) -> Result<(), Malformed> {
    let mut src = src;
    loop {
        let needed = decoder
            .max_utf8_buffer_length_without_replacement(src.len())
            .ok_or(Malformed)?;
        dst.reserve(needed);
        let (result, read) = decoder.decode_to_string_without_replacement(src, dst, last);
        src = &src[read..];
        match result {
            DecoderResult::InputEmpty => return Ok(()),
            DecoderResult::OutputFull => continue,
            DecoderResult::Malformed(_, _) => return Err(Malformed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use encoding_rs::UTF_8;

    fn opts(chunk: usize, fetches: usize, max: usize) -> SamplerOptions {
        SamplerOptions {
            chunk_bytes: chunk,
            max_fetches: fetches,
            max_sample_bytes: max,
        }
    }

    fn store_with(bytes: &[u8]) -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        store.insert("in", "k.csv", bytes.to_vec());
        store
    }

    #[test]
    fn stops_once_two_records_are_complete() {
        let mut content = b"id,name\n1,Ada\n".to_vec();
        content.extend(std::iter::repeat_n(b'x', 10_000));
        let store = store_with(&content);

        let extract = Sampler::new(&store, "in", "k.csv", opts(8, 10, 1_000))
            .extract(UTF_8, "\n")
            .unwrap();
        assert_eq!(extract.header, "id,name");
        assert_eq!(extract.first_row.as_deref(), Some("1,Ada"));
        assert_eq!(store.calls().range_reads(), 2);
    }

    #[test]
    fn header_split_across_fetches_is_reassembled() {
        let header: String = (0..40).map(|i| format!("column_{i},")).collect();
        let content = format!("{header}\n{}\n", "1,".repeat(40));
        let store = store_with(content.as_bytes());

        let mut sampler = Sampler::new(&store, "in", "k.csv", opts(64, 20, 10_000));
        sampler.grow().unwrap();
        let extract = sampler.extract(UTF_8, "\n").unwrap();
        assert_eq!(extract.header, header);
        assert!(store.calls().range_reads() > 5);
    }

    #[test]
    fn multibyte_character_on_fetch_boundary_decodes() {
        // 'é' is two bytes; with 3-byte chunks the first fetch ends inside it.
        let content = "abé\n1\n".as_bytes();
        let store = store_with(content);

        let extract = Sampler::new(&store, "in", "k.csv", opts(3, 10, 100))
            .extract(UTF_8, "\n")
            .unwrap();
        assert_eq!(extract.header, "abé");
        assert_eq!(extract.first_row.as_deref(), Some("1"));
    }

    #[test]
    fn fetch_cap_without_two_records_overflows() {
        let store = store_with(&vec![b'a'; 5_000]);
        let err = Sampler::new(&store, "in", "k.csv", opts(100, 4, 1_000_000))
            .extract(UTF_8, "\n")
            .unwrap_err();
        assert!(matches!(err, IngestionError::SampleOverflow { bytes: 400, fetches: 4, .. }));
    }

    #[test]
    fn byte_cap_is_never_exceeded() {
        let store = store_with(&vec![b'a'; 5_000]);
        let mut sampler = Sampler::new(&store, "in", "k.csv", opts(300, 100, 1_000));
        while sampler.grow().unwrap() > 0 {}
        assert_eq!(sampler.bytes().len(), 1_000);
        assert_eq!(sampler.fetches(), 4);
    }

    #[test]
    fn tiny_and_blank_objects_are_empty() {
        for content in [&b""[..], b"\n\n", b"ab", b"  \r\n  \r\n  "] {
            let store = store_with(content);
            let err = Sampler::new(&store, "in", "k.csv", SamplerOptions::default())
                .extract(UTF_8, "\n")
                .unwrap_err();
            assert!(matches!(err, IngestionError::EmptyFile { .. }), "{content:?}: {err}");
        }
    }

    #[test]
    fn header_only_object_has_no_first_row() {
        let store = store_with(b"id,name\n");
        let extract = Sampler::new(&store, "in", "k.csv", SamplerOptions::default())
            .extract(UTF_8, "\n")
            .unwrap();
        assert_eq!(extract.header, "id,name");
        assert_eq!(extract.first_row, None);
    }

    #[test]
    fn last_record_without_trailing_delimiter_counts_at_end_of_object() {
        let store = store_with(b"id\n7");
        let extract = Sampler::new(&store, "in", "k.csv", SamplerOptions::default())
            .extract(UTF_8, "\n")
            .unwrap();
        assert_eq!(extract.first_row.as_deref(), Some("7"));
    }
}
