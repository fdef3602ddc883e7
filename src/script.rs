//! Script construction and signature-operation analysis
//!
//! Only the parts of the script system needed to build test scripts and to
//! count signature operations live here; opcode execution is not modelled.

use crate::constants::MAX_PUBKEYS_PER_MULTISIG;
use crate::types::ByteString;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_TRUE: u8 = OP_1;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Minimal signed little-endian script number.
///
/// Zero encodes as the empty string. The sign lives in the high bit of the
/// last byte; when that bit is already taken by the magnitude an extra byte
/// carrying only the sign is appended.
pub fn serialize_script_num(value: i64) -> ByteString {
    let mut result = Vec::new();
    if value == 0 {
        return result;
    }

    let negative = value < 0;
    let mut abs = value.unsigned_abs();
    while abs > 0 {
        result.push((abs & 0xff) as u8);
        abs >>= 8;
    }

    let last = result.len() - 1;
    if result[last] & 0x80 != 0 {
        result.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        result[last] |= 0x80;
    }
    result
}

/// Incremental script builder using minimal push encodings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptBuilder {
    bytes: ByteString,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_opcode(mut self, opcode: u8) -> Self {
        self.bytes.push(opcode);
        self
    }

    /// Push raw data with the shortest push opcode able to carry it
    pub fn push_slice(mut self, data: &[u8]) -> Self {
        let len = data.len();
        if len < OP_PUSHDATA1 as usize {
            self.bytes.push(len as u8);
        } else if len <= 0xff {
            self.bytes.push(OP_PUSHDATA1);
            self.bytes.push(len as u8);
        } else if len <= 0xffff {
            self.bytes.push(OP_PUSHDATA2);
            self.bytes.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            self.bytes.push(OP_PUSHDATA4);
            self.bytes.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.bytes.extend_from_slice(data);
        self
    }

    /// Push an integer: small values use their dedicated opcodes
    pub fn push_int(self, value: i64) -> Self {
        match value {
            0 => self.push_opcode(OP_0),
            -1 => self.push_opcode(OP_1NEGATE),
            1..=16 => self.push_opcode(OP_1 + (value as u8) - 1),
            _ => self.push_slice(&serialize_script_num(value)),
        }
    }

    pub fn into_bytes(self) -> ByteString {
        self.bytes
    }
}

/// One parsed script element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    Op(u8),
    Push(u8, &'a [u8]),
}

/// Iterator over script instructions. Stops at the first truncated push.
pub struct Instructions<'a> {
    script: &'a [u8],
    pos: usize,
}

pub fn instructions(script: &[u8]) -> Instructions<'_> {
    Instructions { script, pos: 0 }
}

impl<'a> Instructions<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.script.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn read_push(&mut self, opcode: u8) -> Option<&'a [u8]> {
        let len = match opcode {
            OP_PUSHDATA1 => self.take(1)?[0] as usize,
            OP_PUSHDATA2 => {
                let raw = self.take(2)?;
                u16::from_le_bytes([raw[0], raw[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let raw = self.take(4)?;
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
            }
            small => small as usize,
        };
        self.take(len)
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Instruction<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let opcode = *self.script.get(self.pos)?;
        self.pos += 1;
        if opcode > OP_PUSHDATA4 {
            return Some(Instruction::Op(opcode));
        }

        let data = match self.read_push(opcode) {
            Some(data) => data,
            None => {
                self.pos = self.script.len();
                return None;
            }
        };
        Some(Instruction::Push(opcode, data))
    }
}

/// External script-analysis capability: reports the signature operations a
/// script would be charged for.
///
/// `accurate` selects exact multisig accounting (key count read from the
/// preceding small-integer opcode) instead of the conservative maximum.
pub trait ScriptAnalyzer {
    fn sig_op_count(&self, script: &[u8], accurate: bool) -> u32;
}

/// Legacy opcode-scanning sigop accounting
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyScriptAnalyzer;

impl ScriptAnalyzer for LegacyScriptAnalyzer {
    fn sig_op_count(&self, script: &[u8], accurate: bool) -> u32 {
        let mut total: u32 = 0;
        let mut last_opcode: Option<u8> = None;
        for instruction in instructions(script) {
            let opcode = match instruction {
                Instruction::Op(op) => op,
                Instruction::Push(op, _) => op,
            };
            match opcode {
                OP_CHECKSIG | OP_CHECKSIGVERIFY => total = total.saturating_add(1),
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    let keys = match last_opcode {
                        Some(op) if accurate && (OP_1..=OP_16).contains(&op) => {
                            (op - OP_1 + 1) as u32
                        }
                        _ => MAX_PUBKEYS_PER_MULTISIG,
                    };
                    total = total.saturating_add(keys);
                }
                _ => {}
            }
            last_opcode = Some(opcode);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_num_zero_is_empty() {
        assert!(serialize_script_num(0).is_empty());
    }

    #[test]
    fn test_script_num_small_values() {
        assert_eq!(serialize_script_num(1), vec![0x01]);
        assert_eq!(serialize_script_num(-1), vec![0x81]);
        assert_eq!(serialize_script_num(127), vec![0x7f]);
        assert_eq!(serialize_script_num(256), vec![0x00, 0x01]);
    }

    #[test]
    fn test_script_num_sign_byte() {
        assert_eq!(serialize_script_num(128), vec![0x80, 0x00]);
        assert_eq!(serialize_script_num(-128), vec![0x80, 0x80]);
        assert_eq!(serialize_script_num(255), vec![0xff, 0x00]);
    }

    #[test]
    fn test_push_slice_encodings() {
        assert_eq!(ScriptBuilder::new().push_slice(&[]).into_bytes(), vec![0x00]);
        assert_eq!(ScriptBuilder::new().push_slice(&[0xab; 75]).into_bytes()[0], 75);
        let pushdata1 = ScriptBuilder::new().push_slice(&[0xab; 76]).into_bytes();
        assert_eq!(&pushdata1[..2], &[OP_PUSHDATA1, 76]);
        let pushdata2 = ScriptBuilder::new().push_slice(&[0xab; 300]).into_bytes();
        assert_eq!(&pushdata2[..3], &[OP_PUSHDATA2, 0x2c, 0x01]);
    }

    #[test]
    fn test_push_int_uses_small_opcodes() {
        assert_eq!(ScriptBuilder::new().push_int(0).into_bytes(), vec![OP_0]);
        assert_eq!(ScriptBuilder::new().push_int(16).into_bytes(), vec![OP_16]);
        assert_eq!(ScriptBuilder::new().push_int(-1).into_bytes(), vec![OP_1NEGATE]);
        assert_eq!(ScriptBuilder::new().push_int(17).into_bytes(), vec![0x01, 0x11]);
    }

    #[test]
    fn test_instructions_skip_push_payload() {
        // Push of a byte equal to OP_CHECKSIG must not be counted
        let script = vec![0x01, OP_CHECKSIG, OP_CHECKSIG];
        let parsed: Vec<_> = instructions(&script).collect();
        assert_eq!(parsed, vec![Instruction::Push(0x01, &[OP_CHECKSIG][..]), Instruction::Op(OP_CHECKSIG)]);
    }

    #[test]
    fn test_instructions_stop_at_truncated_push() {
        let script = vec![OP_CHECKSIG, 0x05, 0x01];
        assert_eq!(instructions(&script).count(), 1);
    }

    #[test]
    fn test_sig_op_count_checksig() {
        let analyzer = LegacyScriptAnalyzer;
        let script = vec![OP_CHECKSIG, OP_CHECKSIGVERIFY];
        assert_eq!(analyzer.sig_op_count(&script, true), 2);
        assert_eq!(analyzer.sig_op_count(&script, false), 2);
    }

    #[test]
    fn test_sig_op_count_multisig_modes() {
        let analyzer = LegacyScriptAnalyzer;
        let script = vec![OP_1 + 2, OP_CHECKMULTISIG]; // OP_3
        assert_eq!(analyzer.sig_op_count(&script, true), 3);
        assert_eq!(analyzer.sig_op_count(&script, false), MAX_PUBKEYS_PER_MULTISIG);

        let bare = vec![OP_CHECKMULTISIGVERIFY];
        assert_eq!(analyzer.sig_op_count(&bare, true), MAX_PUBKEYS_PER_MULTISIG);
    }

    #[test]
    fn test_sig_op_count_counts_before_truncation() {
        let analyzer = LegacyScriptAnalyzer;
        let script = vec![OP_CHECKSIG, OP_PUSHDATA1, 0x10, 0x00, OP_CHECKSIG];
        assert_eq!(analyzer.sig_op_count(&script, true), 1);
    }
}
