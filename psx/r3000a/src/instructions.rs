use core::fmt;

use once_cell::sync::Lazy;

use common::util::sign_extend;
use super::coprocessor0::COP0_REG_NAMES;

pub const MIPS_REG_NAMES: [&'static str; 32] = [
    "r0", // Always 0
    "at", // r1 - Reserved for assembler
    "v0", "v1", // r2-r3 - Function return values
    "a0", "a1", "a2", "a3", // r4-r7 - function arguments
    "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7", // r8-r15 - Temporaries (Caller saved)
    "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", // r16-r23 - Saved (Callee saved)
    "t8", "t9", // r24-r25 - Caller-saved temporaries
    "k0", "k1", // Reserved for OS kernel
    "gp", // r28 - Global pointer
    "sp", // r29 - Stack pointer
    "s8", // r30 - Frame pointer
    "ra", // r31 - Return address
];

/// Every instruction the core knows about.
///
/// Shared by the decoder, the disassembler, the assembler and the code generator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Add, Addi, Addiu, Addu, And, Andi,
    Beq, Beql, Bgez, Bgezal, Bgtz, Blez, Bltz, Bltzal, Bne, Break,
    Cfc2, Cop2, Ctc2,
    Div, Divu,
    J, Jal, Jalr, Jr,
    Lb, Lbu, Lh, Lhu, Lui, Lw, Lwc2, Lwl, Lwr,
    Mfc0, Mfc2, Mfhi, Mflo, Mtc0, Mtc2, Mthi, Mtlo, Mult, Multu,
    Nor, Or, Ori,
    Rfe,
    Sb, Sh, Sll, Sllv, Slt, Slti, Sltiu, Sltu, Sra, Srav, Srl, Srlv, Sub, Subu,
    Sw, Swc2, Swl, Swr, Syscall,
    Xor, Xori,
}

impl Kind {
    /// Instructions followed by a delay slot
    pub fn has_delay_slot(self) -> bool {
        use Kind::*;
        matches!(self,
            Beq | Beql | Bgez | Bgezal | Bgtz | Blez | Bltz | Bltzal | Bne
            | J | Jal | Jalr | Jr)
    }

    /// Calls return into the instruction after their delay slot
    pub fn is_call(self) -> bool {
        matches!(self, Kind::Jal | Kind::Jalr | Kind::Bgezal | Kind::Bltzal)
    }

    /// Conditional branches with a pc-relative target
    pub fn is_conditional_branch(self) -> bool {
        use Kind::*;
        matches!(self, Beq | Beql | Bgez | Bgezal | Bgtz | Blez | Bltz | Bltzal | Bne)
    }
}

//  kind, pattern, format, cycles
const TABLE: &[(Kind, &str, &str, u32)] = &[
    (Kind::Add,     "0000 00ss ssst tttt dddd d000 0010 0000", "add {d}, {s}, {t}", 1),
    (Kind::Addi,    "0010 00ss ssst tttt iiii iiii iiii iiii", "addi {t}, {s}, {i}", 1),
    (Kind::Addiu,   "0010 01ss ssst tttt iiii iiii iiii iiii", "addiu {t}, {s}, {i}", 1),
    (Kind::Addu,    "0000 00ss ssst tttt dddd d000 0010 0001", "addu {d}, {s}, {t}", 1),
    (Kind::And,     "0000 00ss ssst tttt dddd d000 0010 0100", "and {d}, {s}, {t}", 1),
    (Kind::Andi,    "0011 00ss ssst tttt iiii iiii iiii iiii", "andi {t}, {s}, {i}", 1),
    (Kind::Beq,     "0001 00ss ssst tttt iiii iiii iiii iiii", "beq {s}, {t}, {i<<2}", 1),
    (Kind::Beql,    "0101 00ss ssst tttt iiii iiii iiii iiii", "beql {s}, {t}, {i<<2}", 1),
    (Kind::Bgez,    "0000 01ss sss0 0001 iiii iiii iiii iiii", "bgez {s}, {i<<2}", 1),
    (Kind::Bgezal,  "0000 01ss sss1 0001 iiii iiii iiii iiii", "bgezal {s}, {i<<2}", 1),
    (Kind::Bgtz,    "0001 11ss sss0 0000 iiii iiii iiii iiii", "bgtz {s}, {i<<2}", 1),
    (Kind::Blez,    "0001 10ss sss0 0000 iiii iiii iiii iiii", "blez {s}, {i<<2}", 1),
    (Kind::Bltz,    "0000 01ss sss0 0000 iiii iiii iiii iiii", "bltz {s}, {i<<2}", 1),
    (Kind::Bltzal,  "0000 01ss sss1 0000 iiii iiii iiii iiii", "bltzal {s}, {i<<2}", 1),
    (Kind::Bne,     "0001 01ss ssst tttt iiii iiii iiii iiii", "bne {s}, {t}, {i<<2}", 1),
    (Kind::Break,   "0000 00ii iiii iiii iiii iiii ii00 1101", "break {i}", 1),
    (Kind::Cfc2,    "0100 1000 010t tttt rrrr r000 0000 0000", "cfc2 {t}, {r}", 1),
    (Kind::Cop2,    "0100 101i iiii iiii iiii iiii iiii iiii", "cop2 {i}", 1),
    (Kind::Ctc2,    "0100 1000 110t tttt rrrr r000 0000 0000", "ctc2 {t}, {r}", 1),
    (Kind::Div,     "0000 00ss ssst tttt 0000 0000 0001 1010", "div {s}, {t}", 36),
    (Kind::Divu,    "0000 00ss ssst tttt 0000 0000 0001 1011", "divu {s}, {t}", 36),
    (Kind::J,       "0000 10ii iiii iiii iiii iiii iiii iiii", "j {i<<2}", 1),
    (Kind::Jal,     "0000 11ii iiii iiii iiii iiii iiii iiii", "jal {i<<2}", 1),
    (Kind::Jalr,    "0000 00ss sss0 0000 dddd d000 0000 1001", "jalr {s}, {d}", 1),
    (Kind::Jr,      "0000 00ss sss0 0000 0000 0000 0000 1000", "jr {s}", 1),
    (Kind::Lb,      "1000 00ss ssst tttt iiii iiii iiii iiii", "lb {t}, {s}+{i}", 1),
    (Kind::Lbu,     "1001 00ss ssst tttt iiii iiii iiii iiii", "lbu {t}, {s}+{i}", 1),
    (Kind::Lh,      "1000 01ss ssst tttt iiii iiii iiii iiii", "lh {t}, {s}+{i}", 1),
    (Kind::Lhu,     "1001 01ss ssst tttt iiii iiii iiii iiii", "lhu {t}, {s}+{i}", 1),
    (Kind::Lui,     "0011 1100 000t tttt iiii iiii iiii iiii", "lui {t}, {i}", 1),
    (Kind::Lw,      "1000 11ss ssst tttt iiii iiii iiii iiii", "lw {t}, {s}+{i}", 1),
    (Kind::Lwc2,    "1100 10ss sssr rrrr iiii iiii iiii iiii", "lwc2 {r}, {s}+{i}", 1),
    (Kind::Lwl,     "1000 10ss ssst tttt iiii iiii iiii iiii", "lwl {t}, {s}+{i}", 1),
    (Kind::Lwr,     "1001 10ss ssst tttt iiii iiii iiii iiii", "lwr {t}, {s}+{i}", 1),
    (Kind::Mfc0,    "0100 0000 000t tttt llll l000 0000 0000", "mfc0 {t}, {l}", 1),
    (Kind::Mfc2,    "0100 1000 000t tttt rrrr r000 0000 0000", "mfc2 {t}, {r}", 1),
    (Kind::Mfhi,    "0000 0000 0000 0000 dddd d000 0001 0000", "mfhi {d}", 1),
    (Kind::Mflo,    "0000 0000 0000 0000 dddd d000 0001 0010", "mflo {d}", 1),
    (Kind::Mtc0,    "0100 0000 100t tttt llll l000 0000 0000", "mtc0 {t}, {l}", 1),
    (Kind::Mtc2,    "0100 1000 100t tttt rrrr r000 0000 0000", "mtc2 {t}, {r}", 1),
    (Kind::Mthi,    "0000 00ss sss0 0000 0000 0000 0001 0001", "mthi {s}", 1),
    (Kind::Mtlo,    "0000 00ss sss0 0000 0000 0000 0001 0011", "mtlo {s}", 1),
    (Kind::Mult,    "0000 00ss ssst tttt 0000 0000 0001 1000", "mult {s}, {t}", 6),
    (Kind::Multu,   "0000 00ss ssst tttt 0000 0000 0001 1001", "multu {s}, {t}", 6),
    (Kind::Nor,     "0000 00ss ssst tttt dddd d000 0010 0111", "nor {d}, {s}, {t}", 1),
    (Kind::Or,      "0000 00ss ssst tttt dddd d000 0010 0101", "or {d}, {s}, {t}", 1),
    (Kind::Ori,     "0011 01ss ssst tttt iiii iiii iiii iiii", "ori {t}, {s}, {i}", 1),
    (Kind::Rfe,     "0100 0010 0000 0000 0000 0000 0001 0000", "rfe", 1),
    (Kind::Sb,      "1010 00ss ssst tttt iiii iiii iiii iiii", "sb {t}, {s}+{i}", 1),
    (Kind::Sh,      "1010 01ss ssst tttt iiii iiii iiii iiii", "sh {t}, {s}+{i}", 1),
    (Kind::Sll,     "0000 0000 000t tttt dddd diii ii00 0000", "sll {d}, {t}, {i}", 1),
    (Kind::Sllv,    "0000 00ss ssst tttt dddd d000 0000 0100", "sllv {d}, {t}, {s}", 1),
    (Kind::Slt,     "0000 00ss ssst tttt dddd d000 0010 1010", "slt {d}, {s}, {t}", 1),
    (Kind::Slti,    "0010 10ss ssst tttt iiii iiii iiii iiii", "slti {t}, {s}, {i}", 1),
    (Kind::Sltiu,   "0010 11ss ssst tttt iiii iiii iiii iiii", "sltiu {t}, {s}, {i}", 1),
    (Kind::Sltu,    "0000 00ss ssst tttt dddd d000 0010 1011", "sltu {d}, {s}, {t}", 1),
    (Kind::Sra,     "0000 0000 000t tttt dddd diii ii00 0011", "sra {d}, {t}, {i}", 1),
    (Kind::Srav,    "0000 00ss ssst tttt dddd d000 0000 0111", "srav {d}, {t}, {s}", 1),
    (Kind::Srl,     "0000 0000 000t tttt dddd diii ii00 0010", "srl {d}, {t}, {i}", 1),
    (Kind::Srlv,    "0000 00ss ssst tttt dddd d000 0000 0110", "srlv {d}, {t}, {s}", 1),
    (Kind::Sub,     "0000 00ss ssst tttt dddd d000 0010 0010", "sub {d}, {s}, {t}", 1),
    (Kind::Subu,    "0000 00ss ssst tttt dddd d000 0010 0011", "subu {d}, {s}, {t}", 1),
    (Kind::Sw,      "1010 11ss ssst tttt iiii iiii iiii iiii", "sw {t}, {s}+{i}", 1),
    (Kind::Swc2,    "1110 10ss sssr rrrr iiii iiii iiii iiii", "swc2 {r}, {s}+{i}", 1),
    (Kind::Swl,     "1010 10ss ssst tttt iiii iiii iiii iiii", "swl {t}, {s}+{i}", 1),
    (Kind::Swr,     "1011 10ss ssst tttt iiii iiii iiii iiii", "swr {t}, {s}+{i}", 1),
    (Kind::Syscall, "0000 00ii iiii iiii iiii iiii ii00 1100", "syscall {i}", 1),
    (Kind::Xor,     "0000 00ss ssst tttt dddd d000 0010 0110", "xor {d}, {s}, {t}", 1),
    (Kind::Xori,    "0011 10ss ssst tttt iiii iiii iiii iiii", "xori {t}, {s}, {i}", 1),
];

/// A variable-bit operand field of an instruction pattern
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: char,
    pub width: u8,
    pub shift: u8,
}

impl Field {
    #[inline(always)]
    pub fn mask(&self) -> u32 {
        (((1u64 << self.width) - 1) as u32) << self.shift
    }

    #[inline(always)]
    pub fn extract(&self, word: u32) -> u32 {
        (word & self.mask()) >> self.shift
    }

    #[inline(always)]
    pub fn insert(&self, word: u32, value: u32) -> u32 {
        (word & !self.mask()) | ((value << self.shift) & self.mask())
    }
}

pub struct InstructionInfo {
    pub kind: Kind,
    pub name: &'static str,
    pub format: &'static str,
    pub cycles: u32,
    /// Bits fixed by the pattern
    pub mask: u32,
    /// Expected value of the fixed bits
    pub value: u32,
    /// Variable fields, in order of first appearance (most significant first)
    pub fields: Vec<Field>,
}

impl InstructionInfo {
    fn parse(&(kind, pattern, format, cycles): &(Kind, &'static str, &'static str, u32)) -> Self {
        let mut mask = 0u32;
        let mut value = 0u32;
        let mut fields: Vec<Field> = Vec::new();

        let bits = pattern.chars().filter(|c| !c.is_whitespace());
        for (index, c) in bits.enumerate() {
            let bit = 31 - index as u8;
            match c {
                '0' | '1' => {
                    mask |= 1 << bit;
                    value |= ((c == '1') as u32) << bit;
                }
                key => match fields.iter_mut().find(|f| f.key == key) {
                    Some(field) => {
                        field.width += 1;
                        field.shift = bit;
                    }
                    None => fields.push(Field { key, width: 1, shift: bit }),
                },
            }
        }

        let name = format.split(' ').next().unwrap_or(format);
        InstructionInfo { kind, name, format, cycles, mask, value, fields }
    }

    #[inline]
    pub fn matches(&self, word: u32) -> bool {
        word & self.mask == self.value
    }

    pub fn field(&self, key: char) -> Option<&Field> {
        self.fields.iter().find(|f| f.key == key)
    }
}

impl fmt::Debug for InstructionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:08x}/{:08x})", self.name, self.value, self.mask)
    }
}

static INSTRUCTIONS: Lazy<Vec<InstructionInfo>> = Lazy::new(|| {
    TABLE.iter().map(InstructionInfo::parse).collect()
});

/// Patterns bucketed by primary opcode, every pattern fixes the top six bits
static PRIMARY: Lazy<Vec<Vec<&'static InstructionInfo>>> = Lazy::new(|| {
    let mut primary = vec![Vec::new(); 64];
    for info in instructions() {
        primary[(info.value >> 26) as usize].push(info);
    }
    primary
});

pub fn instructions() -> &'static [InstructionInfo] {
    &INSTRUCTIONS
}

pub fn info(kind: Kind) -> &'static InstructionInfo {
    instructions().iter()
        .find(|i| i.kind == kind)
        .unwrap_or_else(|| unreachable!("{:?} missing from the instruction table", kind))
}

/// An instruction word matched against its descriptor
#[derive(Copy, Clone)]
pub struct DecodedOpcode {
    pub info: &'static InstructionInfo,
    pub word: u32,
    params: [u32; 4],
}

pub fn decode(word: u32) -> Option<DecodedOpcode> {
    let info = PRIMARY[(word >> 26) as usize].iter()
        .find(|info| info.matches(word))?;

    let mut params = [0; 4];
    for (param, field) in params.iter_mut().zip(&info.fields) {
        *param = field.extract(word);
    }

    Some(DecodedOpcode { info, word, params })
}

impl DecodedOpcode {
    #[inline(always)]
    pub fn kind(&self) -> Kind {
        self.info.kind
    }

    /// Operand values in field order
    pub fn params(&self) -> &[u32] {
        &self.params[..self.info.fields.len()]
    }

    pub fn field(&self, key: char) -> Option<u32> {
        self.info.fields.iter()
            .position(|f| f.key == key)
            .map(|index| self.params[index])
    }

    #[inline(always)]
    pub fn s(&self) -> u8 { self.field('s').unwrap_or(0) as u8 }
    #[inline(always)]
    pub fn t(&self) -> u8 { self.field('t').unwrap_or(0) as u8 }
    #[inline(always)]
    pub fn d(&self) -> u8 { self.field('d').unwrap_or(0) as u8 }
    /// COP0 register index
    #[inline(always)]
    pub fn l(&self) -> u8 { self.field('l').unwrap_or(0) as u8 }
    /// COP2 register index
    #[inline(always)]
    pub fn r(&self) -> u8 { self.field('r').unwrap_or(0) as u8 }

    /// The raw, unsigned immediate
    #[inline(always)]
    pub fn imm(&self) -> u32 { self.field('i').unwrap_or(0) }

    /// 16-bit immediate, sign extended
    #[inline(always)]
    pub fn simm(&self) -> u32 {
        sign_extend(self.imm(), 16)
    }

    /// Target of a pc-relative branch located at `address`
    pub fn branch_target(&self, address: u32) -> u32 {
        address.wrapping_add(4).wrapping_add(self.simm() << 2)
    }

    /// Target of a j/jal located at `address`
    pub fn jump_target(&self, address: u32) -> u32 {
        (address.wrapping_add(4) & 0xf000_0000) | (self.imm() << 2)
    }

    pub fn is_nop(&self) -> bool {
        self.kind() == Kind::Sll && self.d() == 0 && self.imm() == 0
    }

    /// Renders the mnemonic text form
    pub fn render(&self) -> String {
        if self.is_nop() {
            return "nop".to_owned();
        }

        let mut out = String::new();
        for piece in template(self.info.format) {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Field { key, shifted } => {
                    let value = self.field(key).unwrap_or(0);
                    let text = match key {
                        's' | 't' | 'd' => MIPS_REG_NAMES[value as usize].to_owned(),
                        'l' => COP0_REG_NAMES[value as usize].to_owned(),
                        'i' if shifted => {
                            let width = self.info.field('i').map_or(16, |f| f.width);
                            format!("{:x}", sign_extend(value, width).wrapping_shl(2))
                        }
                        'i' => format!("{:x}", value),
                        _ => format!("{}", value),
                    };
                    out.push_str(&text);
                }
            }
        }
        out
    }
}

impl fmt::Display for DecodedOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl fmt::Debug for DecodedOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x} {}", self.word, self.render())
    }
}

/// Piece of a rendering template such as `lw {t}, {s}+{i}`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Piece<'a> {
    Literal(&'a str),
    Field { key: char, shifted: bool },
}

pub(crate) fn template(format: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut rest = format;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            pieces.push(Piece::Literal(&rest[..open]));
        }
        let close = rest[open..].find('}').map_or(rest.len(), |c| open + c);
        let inner = &rest[open + 1..close];
        let key = inner.chars().next().unwrap_or('?');
        pieces.push(Piece::Field { key, shifted: inner.ends_with("<<2") });
        rest = rest.get(close + 1..).unwrap_or("");
    }
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest));
    }
    pieces
}
