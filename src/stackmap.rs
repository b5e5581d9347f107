//! View types for the raw stack-map records, decoded field-for-field from
//! the statepoint section layout.

/// One entry of the function table at the top of a stack-map section.
#[derive(Debug, Clone, Copy)]
pub struct FunctionInfo {
    pub address: u64,
    pub stack_size: u64,
    pub callsite_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub size: u16,
    pub pointer: LocationPointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationPointer {
    Register { reg: u16 },
    Direct { reg: u16, offset: i32 },
    Indirect { reg: u16, offset: i32 },
    Constant(u64),
}

/// Register live across the callsite. Decoded while skipping to the next
/// callsite header; nothing downstream retains these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveOut {
    pub reg: u16,
    pub size: u8,
}
