use std::marker::PhantomData;

use byteorder::ByteOrder;
use log::{debug, trace};
use thiserror::Error;

use crate::frame::{FrameInfo, PointerSlot};
use crate::stackmap::{FunctionInfo, LiveOut, Location, LocationPointer};
use crate::table::FrameTable;

/// Tracked pointers are spilled as single pointer-sized stack slots; a
/// location claiming any other size would describe a pointer sequence the
/// decoder does not handle.
const POINTER_SIZE: u16 = 8;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unexpectedly hit end of input data while reading {0} bytes")]
    UnexpectedEof(usize),
    #[error("found {actual} records, but functions expect {functions_sum}")]
    BadRecordCount { actual: u64, functions_sum: u64 },
    #[error("read unsupported location type {0}")]
    UnsupportedLocationType(u8),
    #[error("got negative offset {0} into constant table")]
    NegativeConstantOffset(i32),
    #[error("offset {0} is out of bounds of constant table")]
    ConstantTableOverflow(i32),
    #[error("callsite has {0} locations, expected the 3 leading statepoint constants")]
    MissingConstants(u16),
    #[error("location #{0} expected to be a constant")]
    ExpectedConstant(usize),
    #[error("deopt count {count} overruns the {remaining} locations left in the callsite")]
    DeoptOverrun { count: u64, remaining: usize },
    #[error("tracked pointer locations come in pairs, found {0}")]
    OddPointerCount(usize),
    #[error("tracked pointer location expected to be an indirect stack slot")]
    NonIndirectPointer,
    #[error("tracked pointer location has size {0}, expected a single pointer")]
    BadPointerSize(u16),
    #[error("derived pointer's base at frame offset {0} is not a recorded base slot")]
    UnmatchedDerivedBase(i32),
}

type Result<T> = std::result::Result<T, ParseError>;

/// Streaming decoder for a statepoint stack-map section.
///
/// Walks the section once, turning each callsite record into a [`FrameInfo`]
/// and accumulating them into a [`FrameTable`]. Any violation of the
/// statepoint location discipline fails the whole parse; a table is only
/// returned when every record decoded cleanly.
pub struct Parser<'a, BO: ByteOrder> {
    data: &'a [u8],
    pos: usize,
    _phantom: PhantomData<BO>,
}

impl<'a, BO: ByteOrder + 'a> Parser<'a, BO> {
    pub fn parse(data: &'a [u8], load_factor: f32) -> Result<FrameTable> {
        let mut parser = Parser {
            data,
            pos: 0,
            _phantom: PhantomData::<BO>,
        };

        parser.parse_table(load_factor)
    }

    fn parse_table(&mut self, load_factor: f32) -> Result<FrameTable> {
        let num_functions = self.read_u32()?;
        let num_constants = self.read_u32()?;
        let num_records = self.read_u64()?;

        let mut record_count_sum = 0;
        let mut functions = Vec::with_capacity(num_functions as usize);
        for _ in 0..num_functions {
            let address = self.read_u64()?;
            let stack_size = self.read_u64()?;
            let callsite_count = self.read_u64()?;
            record_count_sum += callsite_count;
            functions.push(FunctionInfo { address, stack_size, callsite_count });
        }
        if record_count_sum != num_records {
            return Err(ParseError::BadRecordCount {
                actual: num_records,
                functions_sum: record_count_sum,
            });
        }

        let mut constants = Vec::with_capacity(num_constants as usize);
        for _ in 0..num_constants {
            constants.push(self.read_u64()?);
        }

        let mut table = FrameTable::new(load_factor, num_records);

        // callsite records don't name their function; they're attributed by
        // walking the function table in step with the records
        let mut fn_idx = 0;
        let mut visited = 0;
        for _ in 0..num_records {
            while visited >= functions[fn_idx].callsite_count {
                fn_idx += 1;
                visited = 0;
            }

            let frame = self.parse_callsite(&functions[fn_idx], &constants)?;
            trace!(
                "callsite {:#x}: frame size {}, {} live slots",
                frame.ret_addr,
                frame.frame_size,
                frame.slots.len()
            );

            table.insert(frame.ret_addr, frame);
            visited += 1;
        }

        debug!(
            "decoded {} callsites across {} functions into {} buckets",
            num_records,
            num_functions,
            table.size()
        );

        Ok(table)
    }

    fn parse_callsite(&mut self, func: &FunctionInfo, constants: &[u64]) -> Result<FrameInfo> {
        let code_offset = self.read_u32()?;
        let _flags = self.read_u16()?;
        let num_locations = self.read_u16()?;

        let mut locations = Vec::with_capacity(num_locations as usize);
        for _ in 0..num_locations {
            locations.push(self.parse_location(constants)?);
        }

        let _padding = self.read_u16()?;
        let num_liveouts = self.read_u16()?;
        for _ in 0..num_liveouts {
            self.parse_live_out()?;
        }

        // the next callsite header sits at the next 8-byte boundary; the
        // emitter may or may not have written the padding bytes themselves
        self.pos = (self.pos + 7) & !7;

        build_frame(func, code_offset, &locations)
    }

    fn parse_location(&mut self, constants: &[u64]) -> Result<Location> {
        let pointer_type = self.read_u8()?;
        let _reserved = self.read_u8()?;
        let size = self.read_u16()?;
        let reg = self.read_u16()?;
        let _reserved2 = self.read_u16()?;
        let offset = self.read_i32()?;

        let pointer = match pointer_type {
            0x01 => LocationPointer::Register { reg },
            0x02 => LocationPointer::Direct { reg, offset },
            0x03 => LocationPointer::Indirect { reg, offset },
            0x04 => LocationPointer::Constant(offset as u64),
            0x05 => {
                if offset < 0 {
                    return Err(ParseError::NegativeConstantOffset(offset));
                }
                match constants.get(offset as usize) {
                    Some(c) => LocationPointer::Constant(*c),
                    None => return Err(ParseError::ConstantTableOverflow(offset)),
                }
            }
            unsupported => return Err(ParseError::UnsupportedLocationType(unsupported)),
        };

        Ok(Location { size, pointer })
    }

    fn parse_live_out(&mut self) -> Result<LiveOut> {
        let reg = self.read_u16()?;
        let _reserved = self.read_u8()?;
        let size = self.read_u8()?;

        Ok(LiveOut { reg, size })
    }

    fn read_n(&mut self, n: usize) -> Result<&[u8]> {
        let (new_pos, over) = self.pos.overflowing_add(n);
        if over || new_pos > self.data.len() {
            return Err(ParseError::UnexpectedEof(n));
        }
        let res = &self.data[self.pos..new_pos];
        self.pos = new_pos;
        Ok(res)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_n(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(BO::read_u16(self.read_n(2)?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(BO::read_u32(self.read_n(4)?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(BO::read_u64(self.read_n(8)?))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(BO::read_i32(self.read_n(4)?))
    }
}

/// Turn one callsite's location array into a frame descriptor.
///
/// Statepoint callsites lead with three constants (the third is the count
/// of deopt parameters to skip); the rest of the array is (base, derived)
/// pairs of spilled pointer slots:
/// <https://llvm.org/docs/Statepoints.html#stack-map-format>
fn build_frame(func: &FunctionInfo, code_offset: u32, locations: &[Location]) -> Result<FrameInfo> {
    let ret_addr = func.address + code_offset as u64;
    let frame_size = func.stack_size;

    if locations.len() < 3 {
        return Err(ParseError::MissingConstants(locations.len() as u16));
    }
    for (i, loc) in locations[..2].iter().enumerate() {
        if !matches!(loc.pointer, LocationPointer::Constant(_)) {
            return Err(ParseError::ExpectedConstant(i));
        }
    }
    let num_deopt = match locations[2].pointer {
        LocationPointer::Constant(n) => n,
        _ => return Err(ParseError::ExpectedConstant(2)),
    };

    let tail = &locations[3..];
    if num_deopt > tail.len() as u64 {
        return Err(ParseError::DeoptOverrun { count: num_deopt, remaining: tail.len() });
    }
    let pointers = &tail[num_deopt as usize..];

    if pointers.len() % 2 != 0 {
        return Err(ParseError::OddPointerCount(pointers.len()));
    }
    let num_slots = pointers.len() / 2;

    let mut slots = Vec::with_capacity(num_slots);

    // bases first: a pair whose two halves name the same slot records a
    // base pointer
    for pair in pointers.chunks_exact(2) {
        let base = stack_slot(&pair[0])?;
        let derived = stack_slot(&pair[1])?;
        if base == derived {
            slots.push(PointerSlot { kind: -1, offset: base });
        }
    }
    let num_base = slots.len();

    // then derived pointers, each bound to its base by index into the
    // prefix just built
    for pair in pointers.chunks_exact(2) {
        let base = stack_slot(&pair[0])?;
        let derived = stack_slot(&pair[1])?;
        if base == derived {
            continue;
        }

        let base_idx = slots[..num_base]
            .iter()
            .position(|s| s.offset == base)
            .ok_or(ParseError::UnmatchedDerivedBase(base))?;
        slots.push(PointerSlot { kind: base_idx as i32, offset: derived });
    }

    Ok(FrameInfo { ret_addr, frame_size, slots })
}

/// Frame offset of a tracked pointer location, which must be a single
/// pointer-sized indirect stack slot.
fn stack_slot(loc: &Location) -> Result<i32> {
    match loc.pointer {
        LocationPointer::Indirect { offset, .. } => {
            if loc.size != POINTER_SIZE {
                return Err(ParseError::BadPointerSize(loc.size));
            }
            Ok(offset)
        }
        _ => Err(ParseError::NonIndirectPointer),
    }
}
