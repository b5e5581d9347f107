use std::io::{self, Write};
use std::mem;

/// Fixed portion of a packed frame record: return address, frame size and
/// slot count, padded out to slot alignment.
const FRAME_HEADER_BYTES: usize = 24;

/// One live pointer slot at a callsite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerSlot {
    /// `-1` marks a base pointer. A non-negative value is the index of the
    /// base slot this pointer derives from, within the same frame.
    pub kind: i32,
    /// Byte offset of the slot relative to the frame base. Negative values
    /// lie above the recorded base.
    pub offset: i32,
}

impl PointerSlot {
    pub fn is_base(&self) -> bool {
        self.kind < 0
    }
}

/// Everything the collector needs to know about one callsite's frame: where
/// control returns to, how big the frame is, and which slots hold live
/// pointers. Slots are ordered bases first, then derived pointers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub ret_addr: u64,
    pub frame_size: u64,
    pub slots: Vec<PointerSlot>,
}

impl FrameInfo {
    pub fn num_slots(&self) -> u16 {
        // the wire format caps locations at u16, so this can't truncate
        self.slots.len() as u16
    }

    /// Bytes this record accounts for in its bucket's storage.
    pub fn size_bytes(&self) -> usize {
        FRAME_HEADER_BYTES + self.slots.len() * mem::size_of::<PointerSlot>()
    }

    /// Human-readable dump of the frame, one line per slot.
    pub fn print(&self, stream: &mut impl Write) -> io::Result<()> {
        writeln!(stream, "return address: {}", self.ret_addr)?;
        writeln!(stream, "frame size: {}", self.frame_size)?;
        writeln!(stream, "num live ptrs: {}", self.num_slots())?;

        for (i, slot) in self.slots.iter().enumerate() {
            write!(stream, "ptr slot #{} {{ ", i)?;
            if slot.is_base() {
                write!(stream, "kind: base ptr, ")?;
            } else {
                write!(stream, "kind: ptr derived from slot #{}, ", slot.kind)?;
            }
            writeln!(stream, "frame offset: {} }}", slot.offset)?;
        }

        Ok(())
    }
}
