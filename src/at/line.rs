//! Line reader for the AT response stream.
//!
//! The modem speaks in `\r\n`-terminated lines, with one exception: the
//! SMS input prompt `> ` is sent without a terminator.  The reader
//! accumulates bytes and yields complete lines.  While armed with
//! [`LineReader::expect_prompt`], a `>` at the start of a line is yielded
//! immediately as [`Line::Prompt`]; otherwise it is ordinary text.
//!
//! ```text
//!   bytes ──▶ LineReader::push ──▶ Line::Text("+CSQ: 20,99")
//!                               ──▶ Line::Prompt
//! ```
//!
//! Partial reads are handled gracefully — one `Transport::read` call may
//! carry half a line or several lines.

use log::warn;

/// Maximum line length kept; longer lines are discarded.  Fits a
/// 160-character SMS body read back as UCS2 hex.
pub const MAX_LINE_LEN: usize = 1024;

const CR: u8 = 0x0D;
const LF: u8 = 0x0A;

/// One unit of modem output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A complete, non-empty text line (terminator stripped).
    Text(String),
    /// The `> ` input prompt.
    Prompt,
}

/// Streaming line assembler.
pub struct LineReader {
    buf: heapless::Vec<u8, MAX_LINE_LEN>,
    /// A command is waiting for the `>` prompt.
    prompt_armed: bool,
    /// Swallow the space that follows a prompt.
    after_prompt: bool,
    /// Current line overflowed; drop bytes until the next LF.
    overflowed: bool,
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            prompt_armed: false,
            after_prompt: false,
            overflowed: false,
        }
    }

    /// Treat a leading `>` as the input prompt until disarmed.
    pub fn expect_prompt(&mut self, armed: bool) {
        self.prompt_armed = armed;
    }

    /// Feed one byte.  Returns a [`Line`] when one is complete.
    pub fn push(&mut self, byte: u8) -> Option<Line> {
        if self.after_prompt {
            self.after_prompt = false;
            if byte == b' ' {
                return None;
            }
        }

        match byte {
            CR => None,
            LF => self.finish(),
            b'>' if self.prompt_armed && self.buf.is_empty() && !self.overflowed => {
                self.after_prompt = true;
                Some(Line::Prompt)
            }
            _ => {
                if self.overflowed {
                    return None;
                }
                if self.buf.push(byte).is_err() {
                    warn!("AT line exceeds {} bytes, discarding", MAX_LINE_LEN);
                    self.buf.clear();
                    self.overflowed = true;
                }
                None
            }
        }
    }

    /// Feed a slice, collecting every completed line.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Line> {
        data.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Drop any partial line (e.g. after a power cycle).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.after_prompt = false;
        self.overflowed = false;
    }

    fn finish(&mut self) -> Option<Line> {
        if self.overflowed {
            self.overflowed = false;
            return None;
        }
        if self.buf.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(Line::Text(text))
    }
}
