//! Decoder for LLVM statepoint stack-maps and a return-address keyed frame
//! table for precise GC stack walking.
//!
//! The stack-map section emitted alongside statepoint-instrumented code is
//! decoded once at startup into a [`FrameTable`]. During a collection the
//! stack walker feeds each frame's return address to
//! [`FrameTable::lookup`] and gets back the frame's size and live pointer
//! slots, bases ahead of the pointers derived from them, so roots can be
//! identified and relocated in place.

mod frame;
mod parser;
mod stackmap;
mod table;

pub use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};

pub use crate::frame::{FrameInfo, PointerSlot};
pub use crate::parser::{ParseError, Parser};
pub use crate::stackmap::{FunctionInfo, LiveOut, Location, LocationPointer};
pub use crate::table::{Bucket, FrameTable};

/// Decode a raw stack-map section and build the frame table in one call.
///
/// The section is read in the byte order of the machine that emitted it,
/// which is taken to be the host's; use [`Parser`] directly to decode a
/// foreign-endian section. The input buffer is only borrowed for the
/// duration of the call.
pub fn build_table(data: &[u8], load_factor: f32) -> Result<FrameTable, ParseError> {
    Parser::<NativeEndian>::parse(data, load_factor)
}
