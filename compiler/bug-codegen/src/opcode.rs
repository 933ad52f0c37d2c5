//! EVM opcode bytes and metadata for the instruction subset the generator
//! emits.

use std::fmt;

/// A raw EVM opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Op(pub u8);

impl Op {
    pub const STOP: Op = Op(0x00);
    pub const ADD: Op = Op(0x01);
    pub const MUL: Op = Op(0x02);
    pub const SUB: Op = Op(0x03);
    pub const DIV: Op = Op(0x04);
    pub const MOD: Op = Op(0x06);
    pub const LT: Op = Op(0x10);
    pub const GT: Op = Op(0x11);
    pub const EQ: Op = Op(0x14);
    pub const ISZERO: Op = Op(0x15);
    pub const AND: Op = Op(0x16);
    pub const OR: Op = Op(0x17);
    pub const NOT: Op = Op(0x19);
    pub const SHL: Op = Op(0x1b);
    pub const SHR: Op = Op(0x1c);
    pub const KECCAK256: Op = Op(0x20);
    pub const CALLER: Op = Op(0x33);
    pub const CALLVALUE: Op = Op(0x34);
    pub const CALLDATALOAD: Op = Op(0x35);
    pub const CALLDATASIZE: Op = Op(0x36);
    pub const CALLDATACOPY: Op = Op(0x37);
    pub const CODECOPY: Op = Op(0x39);
    pub const TIMESTAMP: Op = Op(0x42);
    pub const NUMBER: Op = Op(0x43);
    pub const POP: Op = Op(0x50);
    pub const MLOAD: Op = Op(0x51);
    pub const MSTORE: Op = Op(0x52);
    pub const SLOAD: Op = Op(0x54);
    pub const SSTORE: Op = Op(0x55);
    pub const JUMP: Op = Op(0x56);
    pub const JUMPI: Op = Op(0x57);
    pub const JUMPDEST: Op = Op(0x5b);
    pub const PUSH0: Op = Op(0x5f);
    pub const RETURN: Op = Op(0xf3);
    pub const REVERT: Op = Op(0xfd);
    pub const INVALID: Op = Op(0xfe);

    /// `PUSH0`..`PUSH32`; `n` is the immediate width in bytes.
    pub fn push(n: u8) -> Op {
        debug_assert!(n <= 32, "PUSH immediates are at most 32 bytes");
        Op(0x5f + n)
    }

    /// `DUP1`..`DUP16`.
    pub fn dup(n: u8) -> Op {
        debug_assert!((1..=16).contains(&n), "DUP reach is 1..=16");
        Op(0x80 + n - 1)
    }

    /// `SWAP1`..`SWAP16`.
    pub fn swap(n: u8) -> Op {
        debug_assert!((1..=16).contains(&n), "SWAP reach is 1..=16");
        Op(0x90 + n - 1)
    }

    /// The number of immediate bytes following the opcode.
    pub fn immediate_len(&self) -> usize {
        if (0x60..=0x7f).contains(&self.0) {
            (self.0 - 0x5f) as usize
        } else {
            0
        }
    }

    pub fn is_push(&self) -> bool {
        (0x5f..=0x7f).contains(&self.0)
    }

    pub fn mnemonic(&self) -> &'static str {
        match self.0 {
            0x00 => "STOP",
            0x01 => "ADD",
            0x02 => "MUL",
            0x03 => "SUB",
            0x04 => "DIV",
            0x06 => "MOD",
            0x10 => "LT",
            0x11 => "GT",
            0x14 => "EQ",
            0x15 => "ISZERO",
            0x16 => "AND",
            0x17 => "OR",
            0x19 => "NOT",
            0x1b => "SHL",
            0x1c => "SHR",
            0x20 => "KECCAK256",
            0x33 => "CALLER",
            0x34 => "CALLVALUE",
            0x35 => "CALLDATALOAD",
            0x36 => "CALLDATASIZE",
            0x37 => "CALLDATACOPY",
            0x39 => "CODECOPY",
            0x42 => "TIMESTAMP",
            0x43 => "NUMBER",
            0x50 => "POP",
            0x51 => "MLOAD",
            0x52 => "MSTORE",
            0x54 => "SLOAD",
            0x55 => "SSTORE",
            0x56 => "JUMP",
            0x57 => "JUMPI",
            0x5b => "JUMPDEST",
            0x5f => "PUSH0",
            0x60..=0x7f => "PUSH",
            0x80..=0x8f => "DUP",
            0x90..=0x9f => "SWAP",
            0xf3 => "RETURN",
            0xfd => "REVERT",
            0xfe => "INVALID",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0x60..=0x7f => write!(f, "PUSH{}", self.0 - 0x5f),
            0x80..=0x8f => write!(f, "DUP{}", self.0 - 0x7f),
            0x90..=0x9f => write!(f, "SWAP{}", self.0 - 0x8f),
            _ => write!(f, "{}", self.mnemonic()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_and_immediates() {
        assert_eq!(Op::push(0), Op::PUSH0);
        assert_eq!(Op::push(1).0, 0x60);
        assert_eq!(Op::push(32).0, 0x7f);
        assert_eq!(Op::push(4).immediate_len(), 4);
        assert_eq!(Op::PUSH0.immediate_len(), 0);
        assert_eq!(Op::dup(1).0, 0x80);
        assert_eq!(Op::dup(16).0, 0x8f);
        assert_eq!(Op::swap(1).0, 0x90);
        assert_eq!(Op::ADD.immediate_len(), 0);
    }

    #[test]
    fn display_forms() {
        assert_eq!(Op::push(2).to_string(), "PUSH2");
        assert_eq!(Op::dup(3).to_string(), "DUP3");
        assert_eq!(Op::swap(16).to_string(), "SWAP16");
        assert_eq!(Op::KECCAK256.to_string(), "KECCAK256");
    }
}
