//! Output buffering and framing
//!
//! gdb's stdout and stderr are one unstructured byte stream. Framing carves
//! that stream into complete units: tagged blocks (`\032<tag>...\032<tag>`),
//! source positions (`\032\032...\n`) and plain lines. Anything incomplete at
//! the end of the buffer is left for the next chunk, so the units produced
//! never depend on where the stream was split.

use crate::gdb::types::{Tag, BLOCK_START};
use tracing::{debug, warn};

/// gdb prints this without a line terminator while loading symbols.
pub const NO_SYMBOLS_IDIOM: &[u8] = b"(no debugging symbols found)...";

/// One complete piece of gdb output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    /// Payload between a matching pair of markers, markers removed.
    Block { tag: Tag, payload: String },
    /// Untagged text up to (not including) its terminator.
    Line(String),
    /// A fixed idiom that arrives without a terminator.
    Notice(String),
}

/// Result of one framing pass over the unconsumed bytes.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Framed {
    pub units: Vec<Unit>,
    /// Bytes from the front of the input that are fully handled.
    pub consumed: usize,
}

enum Step {
    Unit(Option<Unit>, usize),
    NeedMore,
}

/// Frame as many complete units as `buf` holds.
///
/// Pure: the same bytes always give the same units, and `consumed` never
/// covers a partial unit.
pub fn frame(buf: &[u8]) -> Framed {
    let mut framed = Framed::default();
    while framed.consumed < buf.len() {
        match next_unit(&buf[framed.consumed..]) {
            Step::Unit(unit, used) => {
                debug_assert!(used > 0);
                framed.units.extend(unit);
                framed.consumed += used;
            }
            Step::NeedMore => break,
        }
    }
    framed
}

fn next_unit(buf: &[u8]) -> Step {
    if buf[0] == BLOCK_START {
        tagged_unit(buf)
    } else {
        untagged_unit(buf)
    }
}

fn tagged_unit(buf: &[u8]) -> Step {
    let Some(&tag_byte) = buf.get(1) else {
        return Step::NeedMore;
    };

    match Tag::from_byte(tag_byte) {
        // The idle prompt is never paired.
        Some(Tag::Idle) => Step::Unit(None, 2),
        // gdb never closes a source position; it runs to the newline.
        Some(Tag::SourcePosition) => match find_byte(&buf[2..], b'\n') {
            Some(end) => {
                let payload = text(&buf[2..2 + end]);
                Step::Unit(
                    Some(Unit::Block {
                        tag: Tag::SourcePosition,
                        payload,
                    }),
                    2 + end + 1,
                )
            }
            None => Step::NeedMore,
        },
        Some(tag) => match find_pair(&buf[2..], tag_byte) {
            Some(end) => {
                let payload = text(&buf[2..2 + end]);
                Step::Unit(Some(Unit::Block { tag, payload }), 2 + end + 2)
            }
            None => Step::NeedMore,
        },
        None => {
            warn!("Dropping stray block marker before byte {:#04x}", tag_byte);
            Step::Unit(None, 1)
        }
    }
}

fn untagged_unit(buf: &[u8]) -> Step {
    for (i, &byte) in buf.iter().enumerate() {
        if byte == b'(' && buf[i..].starts_with(NO_SYMBOLS_IDIOM) {
            // Flush the text before the idiom first; the idiom is framed next pass.
            if let Some(line) = line_unit(&buf[..i]) {
                return Step::Unit(Some(line), i);
            }
            let notice = Unit::Notice(text(NO_SYMBOLS_IDIOM));
            return Step::Unit(Some(notice), i + NO_SYMBOLS_IDIOM.len());
        }
        match byte {
            b'\n' => return Step::Unit(line_unit(&buf[..i]), i + 1),
            // A block starts mid-line: flush what came before it.
            BLOCK_START => return Step::Unit(line_unit(&buf[..i]), i),
            _ => {}
        }
    }
    Step::NeedMore
}

/// A line unit, or nothing for blank text.
fn line_unit(bytes: &[u8]) -> Option<Unit> {
    let line = text(bytes);
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        None
    } else {
        Some(Unit::Line(line.to_string()))
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

/// Position of the next `BLOCK_START, tag` pair.
fn find_pair(haystack: &[u8], tag: u8) -> Option<usize> {
    haystack
        .windows(2)
        .position(|pair| pair[0] == BLOCK_START && pair[1] == tag)
}

/// Accumulator for output that has not been framed yet.
#[derive(Debug)]
pub struct OutputBuffer {
    pending: Vec<u8>,
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: Vec::with_capacity(capacity),
        }
    }

    /// Append `chunk` and return every unit that is now complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Unit> {
        if chunk.is_empty() && self.pending.is_empty() {
            return Vec::new();
        }
        self.pending.extend_from_slice(chunk);
        let Framed { units, consumed } = frame(&self.pending);
        self.pending.drain(..consumed);
        if !self.pending.is_empty() {
            debug!("{} bytes left unframed", self.pending.len());
        }
        units
    }

    /// Bytes held back for the next chunk.
    pub fn unconsumed(&self) -> &[u8] {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::with_capacity(2048)
    }
}
