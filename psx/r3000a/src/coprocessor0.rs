use modular_bitfield::{bitfield, specifiers::*};

pub const COP0_REG_NAMES: [&'static str; 32] = [
    "Index",
    "Random",
    "EntryLo0",
    "BreakPC",
    "Context",
    "BreakData",
    "PIDMask",
    "DCIC",
    "BadVAddr",
    "BreakMask",
    "EntryHi",
    "BreakCnt",
    "SR",
    "Cause",
    "EPC", // Exception Program Counter
    "PRId", // Processor ID
    "ErrReg",
    "unk17",
    "unk18",
    "unk19",
    "unk20",
    "unk21",
    "unk22",
    "unk23",
    "unk24",
    "unk25",
    "unk26",
    "unk27",
    "unk28",
    "unk29",
    "unk30",
    "unk31"
];

pub const SR: usize = 12;
pub const CAUSE: usize = 13;
pub const EPC: usize = 14;
pub const PRID: usize = 15;

pub const RESET_SR: u32 = 0x0040_0002;
pub const RESET_PRID: u32 = 0x0000_0230;

pub const BOOT_VECTOR: u32 = 0xbfc0_0000;
pub const BOOT_EXCEPTION_VECTOR: u32 = 0xbfc0_0180;
pub const EXCEPTION_VECTOR: u32 = 0x8000_0080;

/// Status register (SR, cop0r12)
#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Status {
    pub iec: bool,
    pub kuc: bool,
    pub iep: bool,
    pub kup: bool,
    pub ieo: bool,
    pub kuo: bool,
    #[skip]
    unused0: B2,
    pub im: B8,
    /// Isolate cache: data accesses hit the cache and never reach the bus
    pub isc: bool,
    pub swc: bool,
    pub pz: bool,
    pub cm: bool,
    pub pe: bool,
    pub ts: bool,
    /// Boot exception vectors live in the BIOS
    pub bev: bool,
    #[skip]
    unused1: B1,
    pub re: bool,
    #[skip]
    unused2: B3,
    pub cu: B4,
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        Status::from_bytes(value.to_le_bytes())
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> u32 {
        u32::from_le_bytes(value.into_bytes())
    }
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Cause {
    #[skip]
    unused0: B2,
    pub excode: B5,
    #[skip]
    unused1: B1,
    /// Interrupt pending. Bits 0-1 are software interrupts, bit 2 is the hardware line.
    pub ip: B8,
    #[skip]
    unused2: B12,
    pub ce: B2,
    #[skip]
    unused3: B1,
    /// Exception happened in a branch delay slot
    pub bd: bool,
}

impl From<u32> for Cause {
    fn from(value: u32) -> Self {
        Cause::from_bytes(value.to_le_bytes())
    }
}

impl From<Cause> for u32 {
    fn from(value: Cause) -> u32 {
        u32::from_le_bytes(value.into_bytes())
    }
}

/// Hardware interrupt line as seen in Cause.IP and SR.IM
pub const HARDWARE_INTERRUPT: u8 = 1 << 2;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Exception {
    Interrupt = 0,
    TlbModified = 1,
    TlbLoadMiss = 2,
    TlbStoreMiss = 3,
    AddressLoadError = 4,
    AddressStoreError = 5,
    InstructionBusError = 6,
    DataBusError = 7,
    Syscall = 8,
    Breakpoint = 9,
    ReservedInstruction = 10,
    CoprocessorUnusable = 11,
    Overflow = 12,
}

/// Pushes the KU/IE stack, as done on exception entry
#[inline]
pub fn push_mode(sr: u32) -> u32 {
    (sr & !0x3f) | ((sr & 0xf) << 2)
}

/// Pops the KU/IE stack (rfe)
#[inline]
pub fn pop_mode(sr: u32) -> u32 {
    (sr & !0xf) | ((sr >> 2) & 0xf)
}
