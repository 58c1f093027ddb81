use std::{
    collections::TryReserveError,
    fs::File,
    io::{self, Read},
    ops::Range,
};

use super::{
    cook::{collapse_crlf, TextDecoder},
    options::{ExecOptions, StreamEncoding, StreamOptions},
};
use crate::common::Error;
use crate::log::dev_error;

/// Size of the buffer every sink starts with before moving its data to the heap.
pub(crate) const INLINE_CAPACITY: usize = 4 * 1024;
/// Headroom below which the buffer is doubled before reading.
const BLOCK_SIZE: usize = 1024;
/// Upper bound on reads per readiness notification, so that a chatty pipeline cannot starve the
/// other jobs.
const MAX_READS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SinkKind {
    Stdout,
    Stderr,
}

/// Outcome of the last read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    /// Bytes were read and more may follow.
    Count(usize),
    /// Nothing more to read for now.
    Again,
    Eof,
    Error,
}

enum Storage {
    Inline([u8; INLINE_CAPACITY]),
    Heap(Vec<u8>),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Inline(bytes) => bytes,
            Storage::Heap(bytes) => bytes,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Storage::Inline(bytes) => bytes,
            Storage::Heap(bytes) => bytes,
        }
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Double the buffer. The first growth moves the contents from the inline block to the heap.
    fn grow(&mut self) -> Result<(), TryReserveError> {
        let new_len = self.len() * 2;
        match self {
            Storage::Inline(bytes) => {
                let mut heap = Vec::new();
                heap.try_reserve_exact(new_len)?;
                heap.extend_from_slice(&bytes[..]);
                heap.resize(new_len, 0);
                *self = Storage::Heap(heap);
            }
            Storage::Heap(bytes) => {
                bytes.try_reserve_exact(new_len - bytes.len())?;
                bytes.resize(new_len, 0);
            }
        }
        Ok(())
    }

    /// Grow until `len` bytes and a terminator fit.
    fn ensure(&mut self, len: usize) -> Result<(), TryReserveError> {
        while self.len() <= len {
            self.grow()?;
        }
        Ok(())
    }
}

/// A span of cooked output handed out for notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Chunk {
    /// Everything consumed, including a trailing newline.
    pub(crate) full: Range<usize>,
    /// What variables and callbacks receive.
    pub(crate) value: Range<usize>,
}

/// Accumulates the output of one stream of a pipeline.
///
/// The buffer holds three cursors, `last_mark <= mark <= fill`:
/// * `[0, last_mark)` was already passed to notifications,
/// * `[last_mark, mark)` is cooked and waiting to be delivered,
/// * `[mark, fill)` is raw data read but not cooked yet.
pub(crate) struct Sink {
    kind: SinkKind,
    options: StreamOptions,
    keep_newline: bool,
    line_buffered: bool,
    collect_all: bool,
    crlf: bool,
    pty: bool,
    storage: Storage,
    fill: usize,
    mark: usize,
    last_mark: usize,
    decoder: Option<TextDecoder>,
    status: ReadStatus,
    error: Option<io::Error>,
    file: Option<File>,
}

impl Sink {
    pub(crate) fn new(kind: SinkKind, options: &ExecOptions, foreground: bool) -> Self {
        let stream = match kind {
            SinkKind::Stdout => &options.stdout,
            SinkKind::Stderr => &options.stderr,
        };
        let decoder = match stream.encoding {
            StreamEncoding::Named(encoding) => Some(TextDecoder::new(encoding)),
            StreamEncoding::Binary | StreamEncoding::Ascii => None,
        };
        // A foreground job keeps both streams whole; a background one only what goes to a
        // variable at the end.
        let collect_all = stream.final_var.is_some() || foreground;
        let pty = options.pty && kind == SinkKind::Stdout;

        Self {
            kind,
            options: stream.clone(),
            keep_newline: options.keep_newline,
            line_buffered: options.line_buffered,
            collect_all,
            crlf: pty,
            pty,
            storage: Storage::Inline([0; INLINE_CAPACITY]),
            fill: 0,
            mark: 0,
            last_mark: 0,
            decoder,
            status: ReadStatus::Again,
            error: None,
            file: None,
        }
    }

    pub(crate) fn kind(&self) -> SinkKind {
        self.kind
    }

    pub(crate) fn options(&self) -> &StreamOptions {
        &self.options
    }

    pub(crate) fn is_line_buffered(&self) -> bool {
        self.line_buffered
    }

    /// Whether the whole output is kept until the stream closes.
    pub(crate) fn collects_all(&self) -> bool {
        self.collect_all
    }

    pub(crate) fn status(&self) -> ReadStatus {
        self.status
    }

    /// Whether the stream will not produce anything more, by end of file or by error.
    pub(crate) fn is_finished(&self) -> bool {
        matches!(self.status, ReadStatus::Eof | ReadStatus::Error)
    }

    pub(crate) fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    pub(crate) fn attach(&mut self, file: File) {
        self.file = Some(file);
        self.status = ReadStatus::Again;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Close the descriptor. Buffered data stays available.
    pub(crate) fn close(&mut self) {
        self.file = None;
    }

    fn trims_newline(&self) -> bool {
        !self.keep_newline && !self.options.encoding.is_binary()
    }

    fn terminate(&mut self) {
        let fill = self.fill;
        self.storage.as_mut_slice()[fill] = 0;
    }

    /// Read what is available without blocking, growing the buffer as needed.
    pub(crate) fn read_bytes(&mut self) {
        let Some(file) = self.file.as_mut() else {
            self.status = ReadStatus::Eof;
            return;
        };

        for _ in 0..MAX_READS {
            if self.storage.len() - self.fill <= BLOCK_SIZE {
                if let Err(err) = self.storage.grow() {
                    dev_error!("cannot grow {:?} buffer: {err}", self.kind);
                    self.error = Some(io::ErrorKind::OutOfMemory.into());
                    self.status = ReadStatus::Error;
                    return;
                }
            }

            let end = self.storage.len() - 1;
            match file.read(&mut self.storage.as_mut_slice()[self.fill..end]) {
                Ok(0) => {
                    self.status = ReadStatus::Eof;
                    break;
                }
                Ok(n) => {
                    self.fill += n;
                    self.status = ReadStatus::Count(n);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.status = ReadStatus::Again;
                    break;
                }
                // The leader side of a pty reports EIO once every follower is closed.
                Err(err) if self.pty && err.raw_os_error() == Some(libc::EIO) => {
                    self.status = ReadStatus::Eof;
                    break;
                }
                Err(err) => {
                    self.error = Some(err);
                    self.status = ReadStatus::Error;
                    break;
                }
            }
        }

        self.terminate();
    }

    /// Turn the raw bytes `[mark, fill)` into their delivered form and advance `mark` to `fill`.
    pub(crate) fn cook(&mut self) -> Result<(), Error> {
        let start = self.mark;

        let last = self.is_finished();
        if let Some(decoder) = self.decoder.as_mut() {
            if self.fill > start || last {
                let raw = self.storage.as_slice()[start..self.fill].to_vec();
                let text = decoder.decode(&raw, last).map_err(|_| Error::OutOfMemory)?;
                if decoder.is_finished() {
                    self.decoder = None;
                }
                self.storage
                    .ensure(start + text.len())
                    .map_err(|_| Error::OutOfMemory)?;
                self.storage.as_mut_slice()[start..start + text.len()].copy_from_slice(&text);
                self.fill = start + text.len();
            }
        }

        if self.crlf {
            let len = collapse_crlf(&mut self.storage.as_mut_slice()[start..self.fill]);
            self.fill = start + len;
        }

        self.terminate();
        self.mark = self.fill;
        Ok(())
    }

    /// Drop everything already delivered.
    ///
    /// A line-buffered sink that notifies keeps its pending partial line at the front so the rest
    /// of it can follow. Anything else is discarded, as nothing would ever consume it.
    pub(crate) fn reset(&mut self) {
        let last_mark = self.last_mark;
        if self.line_buffered && self.options.notifies() && last_mark < self.fill {
            self.storage
                .as_mut_slice()
                .copy_within(last_mark..self.fill, 0);
            self.fill -= last_mark;
            self.mark -= last_mark;
        } else {
            self.fill = 0;
            self.mark = 0;
        }
        self.last_mark = 0;
        self.terminate();
    }

    /// All cooked output, without its trailing newline unless told to keep it.
    pub(crate) fn final_value(&self) -> &[u8] {
        let value = &self.storage.as_slice()[..self.mark];
        match value {
            [rest @ .., b'\n'] if self.trims_newline() => rest,
            _ => value,
        }
    }

    /// Everything cooked since the last chunk.
    pub(crate) fn next_block(&mut self) -> Option<Chunk> {
        if self.last_mark >= self.mark {
            return None;
        }
        let full = self.last_mark..self.mark;
        self.last_mark = self.mark;
        Some(self.chunk(full))
    }

    /// The next complete line, if one was cooked.
    pub(crate) fn next_line(&mut self) -> Option<Chunk> {
        let start = self.last_mark;
        let newline = self.storage.as_slice()[start..self.mark]
            .iter()
            .position(|&byte| byte == b'\n')?;
        let full = start..start + newline + 1;
        self.last_mark = full.end;
        Some(self.chunk(full))
    }

    fn chunk(&self, full: Range<usize>) -> Chunk {
        let mut value = full.clone();
        if self.trims_newline() && self.storage.as_slice()[full.end - 1] == b'\n' {
            value.end -= 1;
        }
        Chunk { full, value }
    }

    pub(crate) fn bytes(&self, range: Range<usize>) -> &[u8] {
        &self.storage.as_slice()[range]
    }

    #[cfg(test)]
    fn is_inline(&self) -> bool {
        matches!(self.storage, Storage::Inline(_))
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.storage.len()
    }
}
