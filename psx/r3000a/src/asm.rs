//! Line assembler driven by the same rendering templates as the disassembler.

use super::coprocessor0::COP0_REG_NAMES;
use super::error::AsmError;
use super::instructions::{instructions, template, InstructionInfo, Piece, MIPS_REG_NAMES};

/// Assembles one line of text in the disassembler's syntax
pub fn assemble(line: &str) -> Result<u32, AsmError> {
    let line = line.trim();
    if line == "nop" {
        return Ok(0);
    }

    for info in instructions() {
        if let Some(captures) = match_template(info.format, line) {
            return encode(info, &captures);
        }
    }
    Err(AsmError::UnknownInstruction(line.to_owned()))
}

pub fn assemble_program<'a, I>(lines: I) -> Result<Vec<u32>, AsmError>
where I: IntoIterator<Item = &'a str> {
    lines.into_iter()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(assemble)
        .collect()
}

struct Capture<'a> {
    key: char,
    shifted: bool,
    text: &'a str,
}

fn match_template<'a>(format: &str, line: &'a str) -> Option<Vec<Capture<'a>>> {
    let pieces = template(format);
    let mut captures = Vec::new();
    let mut rest = line;

    for (index, piece) in pieces.iter().enumerate() {
        match *piece {
            Piece::Literal(text) => {
                rest = rest.strip_prefix(text)?;
            }
            Piece::Field { key, shifted } => {
                let end = match pieces.get(index + 1) {
                    Some(Piece::Literal(next)) => rest.find(next)?,
                    _ => rest.len(),
                };
                if end == 0 {
                    return None;
                }
                captures.push(Capture { key, shifted, text: &rest[..end] });
                rest = &rest[end..];
            }
        }
    }

    rest.is_empty().then_some(captures)
}

fn encode(info: &InstructionInfo, captures: &[Capture]) -> Result<u32, AsmError> {
    let mut word = info.value;
    for capture in captures {
        let bad = || AsmError::BadOperand { text: capture.text.to_owned(), field: capture.key };
        let field = info.field(capture.key).ok_or_else(bad)?;
        let text = capture.text.trim();

        let value = match capture.key {
            's' | 't' | 'd' => lookup(&MIPS_REG_NAMES, text).ok_or_else(bad)?,
            'l' => lookup(&COP0_REG_NAMES, text).ok_or_else(bad)?,
            'i' if capture.shifted => (parse_hex(text).ok_or_else(bad)? >> 2) as u32,
            'i' => parse_hex(text).ok_or_else(bad)? as u32,
            _ => text.parse::<u32>().map_err(|_| bad())?,
        };
        word = field.insert(word, value);
    }
    Ok(word)
}

fn lookup(names: &[&str], text: &str) -> Option<u32> {
    names.iter().position(|name| *name == text).map(|index| index as u32)
}

fn parse_hex(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(digits) => (true, digits),
        None => (false, text),
    };
    let digits = digits.strip_prefix("0x").unwrap_or(digits);
    let value = i64::from_str_radix(digits, 16).ok()?;
    Some(if negative { -value } else { value })
}
