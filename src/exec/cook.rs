use std::collections::TryReserveError;

use encoding_rs::{CoderResult, Decoder, Encoding};

/// Streaming decoder from a named character set to UTF-8.
///
/// Incomplete multibyte sequences at the end of a chunk are kept by the decoder and completed by
/// the next chunk.
pub(super) struct TextDecoder {
    decoder: Decoder,
    finished: bool,
}

impl TextDecoder {
    pub(super) fn new(encoding: &'static Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder(),
            finished: false,
        }
    }

    /// Decode `raw`. With `last` set, any held back partial sequence is flushed as a replacement
    /// character and the decoder must not be used again.
    pub(super) fn decode(&mut self, mut raw: &[u8], last: bool) -> Result<Vec<u8>, TryReserveError> {
        debug_assert!(!self.finished);
        self.finished = last;

        let mut text = String::new();
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(raw.len())
                .unwrap_or(raw.len() + 16);
            text.try_reserve(needed)?;

            let (result, read, _) = self.decoder.decode_to_string(raw, &mut text, last);
            raw = &raw[read..];
            match result {
                CoderResult::InputEmpty => return Ok(text.into_bytes()),
                CoderResult::OutputFull => continue,
            }
        }
    }

    pub(super) fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Replace every `\r\n` in `region` by `\n`, compacting in place. Returns the new length.
pub(super) fn collapse_crlf(region: &mut [u8]) -> usize {
    let mut write = 0;
    for read in 0..region.len() {
        if region[read] == b'\r' && region.get(read + 1) == Some(&b'\n') {
            continue;
        }
        region[write] = region[read];
        write += 1;
    }
    write
}
