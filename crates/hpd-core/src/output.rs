//! Carriage-return aware output aggregation
//!
//! Progress-reporting tools rewrite the current terminal line with `\r`
//! instead of emitting a new one. [`OutputAggregator`] reproduces that
//! terminal behaviour over a raw byte stream so the rendered text holds only
//! the final state of each overwritten line, while `\n`-terminated lines
//! accumulate normally.
//!
//! The aggregator keeps a growable buffer and a write cursor. Bytes past the
//! cursor are stale leftovers of an overwritten line and are never rendered.
//! A `\r` immediately followed by `\n` (also across a chunk boundary) is a
//! plain line ending, not an overwrite.

use crate::error::{Error, Result};

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Initial buffer capacity
const INITIAL_CAPACITY: usize = 256;

/// Accumulates one process's output into a single current-text buffer.
#[derive(Debug, Default)]
pub struct OutputAggregator {
    buf: Vec<u8>,
    cur: usize,
    /// Line end before the rewind of a chunk-final `\r`
    pending_cr: Option<usize>,
    /// Largest logical length allowed; `None` is unbounded
    limit: Option<usize>,
}

impl OutputAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to grow the buffer past `max_bytes` (0 = unbounded)
    pub fn with_limit(mut self, max_bytes: usize) -> Self {
        self.limit = (max_bytes > 0).then_some(max_bytes);
        self
    }

    /// Feed one chunk of raw output.
    ///
    /// Chunks must arrive in delivery order; the algorithm is order
    /// sensitive. Fails only if the buffer cannot grow, in which case the
    /// buffer is left as it was before the failing write.
    pub fn append(&mut self, chunk: &[u8]) -> Result<()> {
        let mut rest = chunk;

        if let Some(end) = self.pending_cr.take() {
            if rest.first() == Some(&LF) {
                self.cur = end;
            }
        }

        while let Some(pos) = rest.iter().position(|&b| b == CR) {
            let head = &rest[..pos];
            self.write_at_cursor(head)?;
            // The line in progress ends at the last byte just written
            let end = self.cur + head.len();

            match rest.get(pos + 1) {
                Some(&LF) => self.cur = end,
                Some(_) => self.cur = line_start(&self.buf[..end]),
                None => {
                    self.cur = line_start(&self.buf[..end]);
                    self.pending_cr = Some(end);
                }
            }
            rest = &rest[pos + 1..];
        }

        self.write_at_cursor(rest)?;
        self.cur += rest.len();
        Ok(())
    }

    /// The logical content, `B[0..cur]`
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.cur]
    }

    /// Logical content as text (invalid UTF-8 is replaced)
    pub fn render(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    /// The last `max_lines` lines of the rendered text; `0` means all.
    ///
    /// A trailing newline does not count as an extra empty line.
    pub fn render_tail(&self, max_lines: usize) -> String {
        let bytes = self.as_bytes();
        if max_lines == 0 {
            return String::from_utf8_lossy(bytes).into_owned();
        }

        let body = bytes.strip_suffix(&[LF]).unwrap_or(bytes);
        let start = body
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, &b)| b == LF)
            .nth(max_lines - 1)
            .map(|(i, _)| i + 1)
            .unwrap_or(0);

        String::from_utf8_lossy(&bytes[start..]).into_owned()
    }

    /// Logical length in bytes
    pub fn len(&self) -> usize {
        self.cur
    }

    pub fn is_empty(&self) -> bool {
        self.cur == 0
    }

    /// Release the buffer
    pub fn clear(&mut self) {
        self.buf = Vec::new();
        self.cur = 0;
        self.pending_cr = None;
    }

    /// Copy `bytes` into the buffer starting at the cursor, overwriting stale
    /// bytes and extending as needed. Does not move the cursor.
    fn write_at_cursor(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let end = self.cur + bytes.len();
        self.ensure_capacity(end)?;

        let overlap = self.buf.len().saturating_sub(self.cur).min(bytes.len());
        self.buf[self.cur..self.cur + overlap].copy_from_slice(&bytes[..overlap]);
        self.buf.extend_from_slice(&bytes[overlap..]);
        Ok(())
    }

    /// Grow to hold `needed` bytes, doubling the capacity on overflow.
    fn ensure_capacity(&mut self, needed: usize) -> Result<()> {
        if let Some(limit) = self.limit {
            if needed > limit {
                return Err(Error::buffer(format!(
                    "output needs {} bytes, limit is {}",
                    needed, limit
                )));
            }
        }

        let capacity = self.buf.capacity();
        if needed <= capacity {
            return Ok(());
        }

        let mut target = capacity.max(INITIAL_CAPACITY);
        while target < needed {
            target = target
                .checked_mul(2)
                .ok_or_else(|| Error::buffer(format!("buffer size overflow at {} bytes", needed)))?;
        }

        self.buf
            .try_reserve_exact(target - self.buf.len())
            .map_err(|e| Error::buffer(format!("failed to grow to {} bytes: {}", target, e)))
    }
}

/// Index just past the last `\n` in `bytes`, or 0
fn line_start(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rposition(|&b| b == LF)
        .map(|i| i + 1)
        .unwrap_or(0)
}
