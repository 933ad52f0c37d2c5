//! A minimal EVM executor covering exactly the opcode subset the BUG code
//! generator emits. It exists so integration tests can deploy and call
//! generated bytecode and assert on storage and return data; it is not a
//! general-purpose EVM.

use std::collections::{HashMap, HashSet};

use alloy_primitives::{keccak256, Address, U256};

/// The execution environment of a single call.
#[derive(Debug, Clone)]
pub struct CallEnv {
    pub caller: Address,
    pub callvalue: U256,
    pub calldata: Vec<u8>,
    pub block_number: u64,
    pub block_timestamp: u64,
}

impl Default for CallEnv {
    fn default() -> Self {
        Self {
            caller: Address::ZERO,
            callvalue: U256::ZERO,
            calldata: vec![],
            block_number: 1,
            block_timestamp: 1,
        }
    }
}

impl CallEnv {
    pub fn with_caller(caller: Address) -> Self {
        Self { caller, ..Default::default() }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// `STOP` or running off the end of the code.
    Stop,
    /// `RETURN` with the returned bytes.
    Return(Vec<u8>),
    /// `REVERT` with the revert payload.
    Revert(Vec<u8>),
}

impl Outcome {
    pub fn returned(&self) -> &[u8] {
        match self {
            Outcome::Return(bytes) | Outcome::Revert(bytes) => bytes,
            Outcome::Stop => &[],
        }
    }
}

/// A failed execution; all of these indicate a compiler bug in the tests
/// this crate serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    StackUnderflow { pc: usize, op: u8 },
    StackOverflow { pc: usize },
    InvalidJump { target: U256 },
    InvalidOpcode { pc: usize, op: u8 },
    StepLimit,
}

const STACK_LIMIT: usize = 1024;
const STEP_LIMIT: usize = 1_000_000;

/// A contract account: persistent storage surviving across calls.
#[derive(Debug, Default)]
pub struct Evm {
    storage: HashMap<U256, U256>,
}

impl Evm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage_at(&self, slot: U256) -> U256 {
        self.storage.get(&slot).copied().unwrap_or(U256::ZERO)
    }

    pub fn set_storage(&mut self, slot: U256, value: U256) {
        self.storage.insert(slot, value);
    }

    /// Run a constructor image and return the runtime code it returns.
    pub fn deploy(&mut self, create_code: &[u8], env: &CallEnv) -> Result<Vec<u8>, ExecError> {
        match self.execute(create_code, env)? {
            Outcome::Return(runtime) => Ok(runtime),
            outcome => panic!("constructor did not return code: {outcome:?}"),
        }
    }

    /// Execute `code` against this account's storage.
    pub fn execute(&mut self, code: &[u8], env: &CallEnv) -> Result<Outcome, ExecError> {
        let jumpdests = valid_jumpdests(code);

        let mut stack: Vec<U256> = vec![];
        let mut memory: Vec<u8> = vec![];
        let mut pc = 0usize;

        for _ in 0..STEP_LIMIT {
            if pc >= code.len() {
                return Ok(Outcome::Stop);
            }
            let op = code[pc];

            macro_rules! pop {
                () => {
                    stack.pop().ok_or(ExecError::StackUnderflow { pc, op })?
                };
            }
            macro_rules! push {
                ($value:expr) => {{
                    if stack.len() >= STACK_LIMIT {
                        return Err(ExecError::StackOverflow { pc });
                    }
                    stack.push($value);
                }};
            }
            macro_rules! binary {
                ($f:expr) => {{
                    let a = pop!();
                    let b = pop!();
                    push!($f(a, b));
                }};
            }

            match op {
                // STOP
                0x00 => return Ok(Outcome::Stop),
                // ADD MUL SUB DIV MOD
                0x01 => binary!(|a: U256, b: U256| a.wrapping_add(b)),
                0x02 => binary!(|a: U256, b: U256| a.wrapping_mul(b)),
                0x03 => binary!(|a: U256, b: U256| a.wrapping_sub(b)),
                0x04 => binary!(|a: U256, b: U256| if b.is_zero() { U256::ZERO } else { a / b }),
                0x06 => binary!(|a: U256, b: U256| if b.is_zero() { U256::ZERO } else { a % b }),
                // LT GT EQ
                0x10 => binary!(|a, b| U256::from((a < b) as u64)),
                0x11 => binary!(|a, b| U256::from((a > b) as u64)),
                0x14 => binary!(|a, b| U256::from((a == b) as u64)),
                // ISZERO
                0x15 => {
                    let a = pop!();
                    push!(U256::from(a.is_zero() as u64));
                }
                // AND OR
                0x16 => binary!(|a: U256, b: U256| a & b),
                0x17 => binary!(|a: U256, b: U256| a | b),
                // NOT
                0x19 => {
                    let a = pop!();
                    push!(!a);
                }
                // SHL SHR: the shift amount is on top.
                0x1b => binary!(|shift: U256, value: U256| {
                    if shift >= U256::from(256u64) {
                        U256::ZERO
                    } else {
                        value << shift.to::<usize>()
                    }
                }),
                0x1c => binary!(|shift: U256, value: U256| {
                    if shift >= U256::from(256u64) {
                        U256::ZERO
                    } else {
                        value >> shift.to::<usize>()
                    }
                }),
                // KECCAK256
                0x20 => {
                    let offset = pop!().to::<usize>();
                    let length = pop!().to::<usize>();
                    grow(&mut memory, offset + length);
                    let hash = keccak256(&memory[offset..offset + length]);
                    push!(U256::from_be_bytes(hash.0));
                }
                // CALLER CALLVALUE
                0x33 => push!(U256::from_be_slice(env.caller.as_slice())),
                0x34 => push!(env.callvalue),
                // CALLDATALOAD CALLDATASIZE CALLDATACOPY
                0x35 => {
                    let offset = pop!().to::<usize>();
                    let mut word = [0u8; 32];
                    for (index, byte) in word.iter_mut().enumerate() {
                        *byte = env.calldata.get(offset + index).copied().unwrap_or(0);
                    }
                    push!(U256::from_be_bytes(word));
                }
                0x36 => push!(U256::from(env.calldata.len() as u64)),
                0x37 => {
                    let dest = pop!().to::<usize>();
                    let offset = pop!().to::<usize>();
                    let length = pop!().to::<usize>();
                    grow(&mut memory, dest + length);
                    for index in 0..length {
                        memory[dest + index] =
                            env.calldata.get(offset + index).copied().unwrap_or(0);
                    }
                }
                // CODECOPY
                0x39 => {
                    let dest = pop!().to::<usize>();
                    let offset = pop!().to::<usize>();
                    let length = pop!().to::<usize>();
                    grow(&mut memory, dest + length);
                    for index in 0..length {
                        memory[dest + index] = code.get(offset + index).copied().unwrap_or(0);
                    }
                }
                // TIMESTAMP NUMBER
                0x42 => push!(U256::from(env.block_timestamp)),
                0x43 => push!(U256::from(env.block_number)),
                // POP
                0x50 => {
                    pop!();
                }
                // MLOAD MSTORE
                0x51 => {
                    let offset = pop!().to::<usize>();
                    grow(&mut memory, offset + 32);
                    let mut word = [0u8; 32];
                    word.copy_from_slice(&memory[offset..offset + 32]);
                    push!(U256::from_be_bytes(word));
                }
                0x52 => {
                    let offset = pop!().to::<usize>();
                    let value = pop!();
                    grow(&mut memory, offset + 32);
                    memory[offset..offset + 32].copy_from_slice(&value.to_be_bytes::<32>());
                }
                // SLOAD SSTORE
                0x54 => {
                    let slot = pop!();
                    push!(self.storage_at(slot));
                }
                0x55 => {
                    let slot = pop!();
                    let value = pop!();
                    self.storage.insert(slot, value);
                }
                // JUMP JUMPI JUMPDEST
                0x56 => {
                    let target = pop!();
                    pc = check_jump(target, &jumpdests)?;
                    continue;
                }
                0x57 => {
                    let target = pop!();
                    let condition = pop!();
                    if !condition.is_zero() {
                        pc = check_jump(target, &jumpdests)?;
                        continue;
                    }
                }
                0x5b => {}
                // PUSH0..PUSH32
                0x5f..=0x7f => {
                    let width = (op - 0x5f) as usize;
                    let mut word = [0u8; 32];
                    for index in 0..width {
                        word[32 - width + index] = code.get(pc + 1 + index).copied().unwrap_or(0);
                    }
                    push!(U256::from_be_bytes(word));
                    pc += 1 + width;
                    continue;
                }
                // DUP1..DUP16
                0x80..=0x8f => {
                    let position = (op - 0x7f) as usize;
                    if stack.len() < position {
                        return Err(ExecError::StackUnderflow { pc, op });
                    }
                    push!(stack[stack.len() - position]);
                }
                // SWAP1..SWAP16
                0x90..=0x9f => {
                    let position = (op - 0x8f) as usize;
                    let len = stack.len();
                    if len < position + 1 {
                        return Err(ExecError::StackUnderflow { pc, op });
                    }
                    stack.swap(len - 1, len - 1 - position);
                }
                // RETURN REVERT
                0xf3 | 0xfd => {
                    let offset = pop!().to::<usize>();
                    let length = pop!().to::<usize>();
                    grow(&mut memory, offset + length);
                    let payload = memory[offset..offset + length].to_vec();
                    return Ok(if op == 0xf3 {
                        Outcome::Return(payload)
                    } else {
                        Outcome::Revert(payload)
                    });
                }
                _ => return Err(ExecError::InvalidOpcode { pc, op }),
            }

            pc += 1;
        }

        Err(ExecError::StepLimit)
    }
}

fn grow(memory: &mut Vec<u8>, required: usize) {
    if memory.len() < required {
        // Word-aligned growth, like the real machine.
        let aligned = (required + 31) & !31;
        memory.resize(aligned, 0);
    }
}

fn check_jump(target: U256, jumpdests: &HashSet<usize>) -> Result<usize, ExecError> {
    let destination: usize =
        target.try_into().map_err(|_| ExecError::InvalidJump { target })?;
    if jumpdests.contains(&destination) {
        Ok(destination)
    } else {
        Err(ExecError::InvalidJump { target })
    }
}

/// The set of valid jump destinations: `JUMPDEST` bytes outside of PUSH
/// immediates.
fn valid_jumpdests(code: &[u8]) -> HashSet<usize> {
    let mut destinations = HashSet::new();
    let mut pc = 0;
    while pc < code.len() {
        let op = code[pc];
        if op == 0x5b {
            destinations.insert(pc);
        }
        let immediate = if (0x60..=0x7f).contains(&op) { (op - 0x5f) as usize } else { 0 };
        pc += 1 + immediate;
    }
    destinations
}
