//! Script tokenization.

use crate::interpreter::ScriptError;
use crate::opcodes::{OP_16, OP_EQUAL, OP_HASH160, OP_PUSHDATA1, OP_PUSHDATA2, OP_PUSHDATA4};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Instruction<'a> {
    pub opcode: u8,
    /// Push payload; empty for non-push opcodes.
    pub data: &'a [u8],
}

/// Read the instruction at `*pc` and advance past it.
///
/// A push whose declared length runs past the end of the script is
/// `BadOpcode`.
pub fn next_instruction<'a>(script: &'a [u8], pc: &mut usize) -> Result<Instruction<'a>, ScriptError> {
    let opcode = *script.get(*pc).ok_or(ScriptError::BadOpcode)?;
    *pc += 1;
    let len = match opcode {
        0x01..=0x4b => opcode as usize,
        OP_PUSHDATA1 => read_len(script, pc, 1)?,
        OP_PUSHDATA2 => read_len(script, pc, 2)?,
        OP_PUSHDATA4 => read_len(script, pc, 4)?,
        _ => {
            return Ok(Instruction {
                opcode,
                data: &[],
            })
        }
    };
    let end = pc
        .checked_add(len)
        .filter(|end| *end <= script.len())
        .ok_or(ScriptError::BadOpcode)?;
    let data = &script[*pc..end];
    *pc = end;
    Ok(Instruction { opcode, data })
}

fn read_len(script: &[u8], pc: &mut usize, width: usize) -> Result<usize, ScriptError> {
    let bytes = script
        .get(*pc..*pc + width)
        .ok_or(ScriptError::BadOpcode)?;
    *pc += width;
    Ok(bytes
        .iter()
        .rev()
        .fold(0usize, |acc, byte| (acc << 8) | *byte as usize))
}

pub struct Instructions<'a> {
    script: &'a [u8],
    pc: usize,
}

impl<'a> Instructions<'a> {
    pub fn new(script: &'a [u8]) -> Self {
        Self { script, pc: 0 }
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pc >= self.script.len() {
            return None;
        }
        let item = next_instruction(self.script, &mut self.pc);
        if item.is_err() {
            self.pc = self.script.len();
        }
        Some(item)
    }
}

/// Minimal push encoding of `data`.
pub fn push_data(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 5);
    match data.len() {
        len if len < OP_PUSHDATA1 as usize => out.push(len as u8),
        len if len <= 0xff => {
            out.push(OP_PUSHDATA1);
            out.push(len as u8);
        }
        len if len <= 0xffff => {
            out.push(OP_PUSHDATA2);
            out.extend_from_slice(&(len as u16).to_le_bytes());
        }
        len => {
            out.push(OP_PUSHDATA4);
            out.extend_from_slice(&(len as u32).to_le_bytes());
        }
    }
    out.extend_from_slice(data);
    out
}

pub fn is_push_only(script: &[u8]) -> bool {
    Instructions::new(script).all(|ins| matches!(ins, Ok(ins) if ins.opcode <= OP_16))
}

pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

/// Remove every instruction-aligned occurrence of `pattern` from `script`.
pub fn find_and_delete(script: &[u8], pattern: &[u8]) -> Vec<u8> {
    if pattern.is_empty() {
        return script.to_vec();
    }
    let mut out = Vec::with_capacity(script.len());
    let mut pc = 0usize;
    while pc < script.len() {
        if script[pc..].starts_with(pattern) {
            pc += pattern.len();
            continue;
        }
        let start = pc;
        if next_instruction(script, &mut pc).is_err() {
            pc = script.len();
        }
        out.extend_from_slice(&script[start..pc]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::{OP_CHECKSIG, OP_DUP, OP_RETURN};

    #[test]
    fn tokenizes_pushes_of_every_width() {
        let mut script = vec![0x02, 0xaa, 0xbb, OP_PUSHDATA1, 0x01, 0xcc];
        script.extend_from_slice(&[OP_PUSHDATA2, 0x01, 0x00, 0xdd]);
        script.extend_from_slice(&[OP_PUSHDATA4, 0x01, 0x00, 0x00, 0x00, 0xee]);
        script.push(OP_DUP);
        let parsed: Vec<_> = Instructions::new(&script)
            .collect::<Result<_, _>>()
            .expect("parse");
        assert_eq!(parsed.len(), 5);
        assert_eq!(parsed[0].data, &[0xaa, 0xbb]);
        assert_eq!(parsed[1].data, &[0xcc]);
        assert_eq!(parsed[2].data, &[0xdd]);
        assert_eq!(parsed[3].data, &[0xee]);
        assert_eq!(parsed[4].opcode, OP_DUP);
    }

    #[test]
    fn truncated_push_is_an_error() {
        let mut iter = Instructions::new(&[0x05, 0x01]);
        assert_eq!(iter.next(), Some(Err(ScriptError::BadOpcode)));
        assert_eq!(iter.next(), None);
        assert!(!is_push_only(&[OP_PUSHDATA2, 0x01]));
    }

    #[test]
    fn push_only_detection() {
        assert!(is_push_only(&[0x01, 0x01, 0x51, 0x00]));
        assert!(!is_push_only(&[0x01, 0x01, OP_RETURN]));
    }

    #[test]
    fn push_data_is_minimal() {
        assert_eq!(push_data(&[0x11; 3])[0], 3);
        assert_eq!(&push_data(&[0x11; 80])[..2], &[OP_PUSHDATA1, 80]);
        assert_eq!(&push_data(&[0x11; 300])[..3], &[OP_PUSHDATA2, 0x2c, 0x01]);
    }

    #[test]
    fn find_and_delete_respects_boundaries() {
        let sig = push_data(&[0xab, 0xcd]);
        let mut script = sig.clone();
        script.push(OP_CHECKSIG);
        script.extend_from_slice(&sig);
        assert_eq!(find_and_delete(&script, &sig), vec![OP_CHECKSIG]);

        // The pattern appears inside a longer push and must survive.
        let mut inner = vec![0x04];
        inner.extend_from_slice(&[0x02, 0xab, 0xcd, 0x00]);
        assert_eq!(find_and_delete(&inner, &sig), inner);
    }
}
