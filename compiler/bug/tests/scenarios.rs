//! End-to-end scenarios: compile BUG source through the full pipeline, then
//! deploy and call the generated bytecode on the test executor and assert
//! on storage, return data and image structure.

use alloy_primitives::{keccak256, Address, U256};
use bug_evm::{CallEnv, Evm, Outcome};
use bug_pipeline::{CompileOutcome, CompilerSettings, Driver, OptimisationLevel};
use bug_source::Source;

fn compile_at(source: &str, level: OptimisationLevel) -> CompileOutcome {
    let driver = Driver::new(CompilerSettings::default().with_optimisation_level(level));
    let outcome = driver.compile(Source::new("scenario.bug", source));
    assert!(outcome.succeeded(), "compilation failed: {:?}", outcome.reports);
    outcome
}

fn compile(source: &str) -> CompileOutcome {
    compile_at(source, OptimisationLevel::O1)
}

fn address(byte: u8) -> Address {
    Address::from([byte; 20])
}

fn address_word(address: Address) -> U256 {
    U256::from_be_slice(address.as_slice())
}

/// The §6 storage rule for a mapping entry: keccak256(pad32(key) ‖ pad32(base)).
fn mapping_slot(key: U256, base: U256) -> U256 {
    let mut input = [0u8; 64];
    input[..32].copy_from_slice(&key.to_be_bytes::<32>());
    input[32..].copy_from_slice(&base.to_be_bytes::<32>());
    U256::from_be_bytes(keccak256(input).0)
}

/// The §6 storage rule for dynamic array data: keccak256(pad32(base)).
fn array_data_slot(base: U256) -> U256 {
    U256::from_be_bytes(keccak256(base.to_be_bytes::<32>()).0)
}

#[test]
fn minimal_program() {
    let outcome = compile("name Minimal; code {}");
    let image = outcome.image().unwrap();

    assert!(image.create.is_none());
    assert!(image.runtime.len() <= 10, "runtime is {} bytes", image.runtime.len());
    assert_eq!(image.runtime[0], 0x5b, "runtime must begin with JUMPDEST");

    let mut evm = Evm::new();
    let result = evm.execute(&image.runtime, &CallEnv::default()).unwrap();
    assert_eq!(result, Outcome::Stop);
}

#[test]
fn counter_increments_only_for_the_owner() {
    let outcome = compile(
        "name Counter;\n\
         storage { [0] count: uint256; [1] owner: address; }\n\
         code { if (msg.sender != owner) { return; } count = count + 1; }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let owner = address(0xaa);
    let stranger = address(0xbb);

    let mut evm = Evm::new();
    evm.set_storage(U256::from(1u64), address_word(owner));

    // A caller that is not the stored owner leaves slot 0 unchanged.
    evm.execute(runtime, &CallEnv::with_caller(stranger)).unwrap();
    assert_eq!(evm.storage_at(U256::ZERO), U256::ZERO);

    // The owner increments slot 0 once per invocation.
    evm.execute(runtime, &CallEnv::with_caller(owner)).unwrap();
    assert_eq!(evm.storage_at(U256::ZERO), U256::from(1u64));
    evm.execute(runtime, &CallEnv::with_caller(owner)).unwrap();
    assert_eq!(evm.storage_at(U256::ZERO), U256::from(2u64));
}

#[test]
fn mapping_write_lands_on_the_derived_slot() {
    let outcome = compile(
        "name Bank;\n\
         storage { [0] balances: mapping<address,uint256>; }\n\
         code { balances[msg.sender] = 42; }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let caller = address(0x11);
    let mut evm = Evm::new();
    evm.execute(runtime, &CallEnv::with_caller(caller)).unwrap();

    let expected_slot = mapping_slot(address_word(caller), U256::ZERO);
    assert_eq!(evm.storage_at(expected_slot), U256::from(42u64));
}

#[test]
fn nested_mapping_slots_compose() {
    let outcome = compile(
        "name Allowances;\n\
         storage { [0] allowed: mapping<address,mapping<uint256,uint256>>; }\n\
         code { allowed[msg.sender][7] = 99; }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let caller = address(0x42);
    let mut evm = Evm::new();
    evm.execute(runtime, &CallEnv::with_caller(caller)).unwrap();

    // f_2(f_1(base)): the outer key derives the inner mapping's base.
    let inner_base = mapping_slot(address_word(caller), U256::ZERO);
    let expected_slot = mapping_slot(U256::from(7u64), inner_base);
    assert_eq!(evm.storage_at(expected_slot), U256::from(99u64));
}

#[test]
fn ssa_join_selects_the_right_branch_value() {
    let source = "name Join;\n\
         storage { [0] x: uint256; [1] y: uint256; }\n\
         code { let r = 0; if (x > 5) { r = 20; } else { r = 30; } y = r; }";
    let outcome = compile(source);
    let runtime = &outcome.image().unwrap().runtime;

    let mut evm = Evm::new();
    evm.set_storage(U256::ZERO, U256::from(10u64));
    evm.execute(runtime, &CallEnv::default()).unwrap();
    assert_eq!(evm.storage_at(U256::from(1u64)), U256::from(20u64));

    let mut evm = Evm::new();
    evm.set_storage(U256::ZERO, U256::from(3u64));
    evm.execute(runtime, &CallEnv::default()).unwrap();
    assert_eq!(evm.storage_at(U256::from(1u64)), U256::from(30u64));
}

#[test]
fn cse_is_a_refinement() {
    let source = "name Shared;\n\
         storage { [0] x: uint256; [1] y: uint256; [2] z: uint256; }\n\
         code { let a = x + y; let b = x + y; z = a + b; }";

    let mut results = vec![];
    for level in [OptimisationLevel::O0, OptimisationLevel::O2, OptimisationLevel::O3] {
        let outcome = compile_at(source, level);
        let runtime = &outcome.image().unwrap().runtime;

        let mut evm = Evm::new();
        evm.set_storage(U256::ZERO, U256::from(17u64));
        evm.set_storage(U256::from(1u64), U256::from(25u64));
        evm.execute(runtime, &CallEnv::default()).unwrap();
        results.push(evm.storage_at(U256::from(2u64)));
    }

    // (17 + 25) * 2, identical at every level.
    assert!(results.iter().all(|result| *result == U256::from(84u64)));
}

#[test]
fn constant_folding_is_a_refinement() {
    // The unoptimised image computes 7 / x at runtime with x = 0; the
    // optimised image folds a constant 7 / 0. Both must store zero.
    let runtime_division = compile_at(
        "name R; storage { [0] x: uint256; [1] out: uint256; } code { out = 7 / x; }",
        OptimisationLevel::O0,
    );
    let mut evm = Evm::new();
    evm.execute(&runtime_division.image().unwrap().runtime, &CallEnv::default()).unwrap();
    assert_eq!(evm.storage_at(U256::from(1u64)), U256::ZERO);

    let folded = compile_at(
        "name F; storage { [0] out: uint256; } code { out = 7 / 0; }",
        OptimisationLevel::O1,
    );
    assert!(folded
        .reports
        .iter()
        .any(|report| report.code == bug_reporting::DiagnosticCode::FoldDivisionByZero));
    let mut evm = Evm::new();
    evm.execute(&folded.image().unwrap().runtime, &CallEnv::default()).unwrap();
    assert_eq!(evm.storage_at(U256::ZERO), U256::ZERO);
}

#[test]
fn deploy_returns_the_runtime_image_byte_identical() {
    let outcome = compile(
        "name Deployed;\n\
         storage { [0] owner: address; [1] initialised: uint256; }\n\
         create { owner = msg.sender; initialised = 1; }\n\
         code { if (msg.sender == owner) { initialised = initialised + 1; } }",
    );
    let image = outcome.image().unwrap();
    let create = image.create.as_ref().expect("constructor image");

    let deployer = address(0xd0);
    let mut evm = Evm::new();
    let returned = evm.deploy(create, &CallEnv::with_caller(deployer)).unwrap();

    // Deploy → CALL yields runtime bytecode byte-identical to the
    // generator's runtime image.
    assert_eq!(returned, image.runtime);

    // Constructor side effects landed in storage.
    assert_eq!(evm.storage_at(U256::ZERO), address_word(deployer));
    assert_eq!(evm.storage_at(U256::from(1u64)), U256::from(1u64));

    // And the deployed code runs against the same storage.
    evm.execute(&returned, &CallEnv::with_caller(deployer)).unwrap();
    assert_eq!(evm.storage_at(U256::from(1u64)), U256::from(2u64));
}

#[test]
fn storage_string_length_round_trips() {
    let text = "a".repeat(73);
    let outcome = compile(&format!(
        "name Strings;\n\
         storage {{ [0] s: string; [1] len: uint256; }}\n\
         code {{ s = \"{text}\"; len = s.length; }}"
    ));
    let runtime = &outcome.image().unwrap().runtime;

    let mut evm = Evm::new();
    evm.execute(runtime, &CallEnv::default()).unwrap();

    // The slot holds the long-form encoding 2·len + 1 and the decoder
    // recovers 73.
    assert_eq!(evm.storage_at(U256::ZERO), U256::from(73u64 * 2 + 1));
    assert_eq!(evm.storage_at(U256::from(1u64)), U256::from(73u64));

    // Payload chunks live at keccak256(pad32(0)) onwards.
    let data = array_data_slot(U256::ZERO);
    let first_chunk = evm.storage_at(data);
    assert_eq!(first_chunk.to_be_bytes::<32>(), [b'a'; 32]);
    let third_chunk = evm.storage_at(data.wrapping_add(U256::from(2u64)));
    let mut expected = [0u8; 32];
    expected[..9].copy_from_slice(&[b'a'; 9]);
    assert_eq!(third_chunk.to_be_bytes::<32>(), expected);
}

#[test]
fn loops_accumulate() {
    let outcome = compile(
        "name Sum;\n\
         storage { [0] out: uint256; }\n\
         code { \
            let acc = 0; \
            for (let i = 0; i < 5; i = i + 1) { acc = acc + i; } \
            out = acc; \
         }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let mut evm = Evm::new();
    evm.execute(runtime, &CallEnv::default()).unwrap();
    assert_eq!(evm.storage_at(U256::ZERO), U256::from(10u64));
}

#[test]
fn while_loop_with_break_and_continue() {
    let outcome = compile(
        "name Control;\n\
         storage { [0] out: uint256; }\n\
         code { \
            let i = 0; \
            while (true) { \
                i = i + 1; \
                if (i == 3) { continue; } \
                if (i >= 7) { break; } \
            } \
            out = i; \
         }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let mut evm = Evm::new();
    evm.execute(runtime, &CallEnv::default()).unwrap();
    assert_eq!(evm.storage_at(U256::ZERO), U256::from(7u64));
}

#[test]
fn user_functions_compute_through_the_call_convention() {
    let outcome = compile(
        "name Calls;\n\
         define function double(v: uint256) returns uint256 { return v + v; }\n\
         define function add3(a: uint256, b: uint256, c: uint256) returns uint256 { \
            return a + b + c; \
         }\n\
         storage { [0] out: uint256; }\n\
         code { out = add3(double(10), double(1), 20); }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let mut evm = Evm::new();
    evm.execute(runtime, &CallEnv::default()).unwrap();
    assert_eq!(evm.storage_at(U256::ZERO), U256::from(42u64));
}

#[test]
fn environment_reads() {
    let outcome = compile(
        "name Env;\n\
         storage { [0] sender: address; [1] value: uint256; [2] number: uint256; \
                   [3] stamp: uint256; }\n\
         code { \
            sender = msg.sender; \
            value = msg.value; \
            number = block.number; \
            stamp = block.timestamp; \
         }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let caller = address(0x77);
    let env = CallEnv {
        caller,
        callvalue: U256::from(1234u64),
        calldata: vec![],
        block_number: 56,
        block_timestamp: 99,
    };

    let mut evm = Evm::new();
    evm.execute(runtime, &env).unwrap();
    assert_eq!(evm.storage_at(U256::ZERO), address_word(caller));
    assert_eq!(evm.storage_at(U256::from(1u64)), U256::from(1234u64));
    assert_eq!(evm.storage_at(U256::from(2u64)), U256::from(56u64));
    assert_eq!(evm.storage_at(U256::from(3u64)), U256::from(99u64));
}

#[test]
fn keccak_of_a_word_matches_the_reference() {
    let outcome = compile(
        "name Hashing;\n\
         storage { [0] x: uint256; [1] out: bytes32; }\n\
         code { out = keccak256(x); }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let mut evm = Evm::new();
    evm.set_storage(U256::ZERO, U256::from(5u64));
    evm.execute(runtime, &CallEnv::default()).unwrap();

    let expected = U256::from_be_bytes(keccak256(U256::from(5u64).to_be_bytes::<32>()).0);
    assert_eq!(evm.storage_at(U256::from(1u64)), expected);
}

#[test]
fn msg_data_length_and_hash() {
    let outcome = compile(
        "name Data;\n\
         storage { [0] size: uint256; [1] digest: bytes32; }\n\
         code { size = msg.data.length; digest = keccak256(msg.data); }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let calldata = vec![1u8, 2, 3, 4, 5, 6, 7];
    let env = CallEnv { calldata: calldata.clone(), ..Default::default() };

    let mut evm = Evm::new();
    evm.execute(runtime, &env).unwrap();
    assert_eq!(evm.storage_at(U256::ZERO), U256::from(calldata.len() as u64));
    assert_eq!(
        evm.storage_at(U256::from(1u64)),
        U256::from_be_bytes(keccak256(&calldata).0)
    );
}

#[test]
fn struct_fields_and_fixed_arrays_in_storage() {
    let outcome = compile(
        "name Layout;\n\
         struct Pair { first: uint256; second: uint256; }\n\
         storage { [0] pair: Pair; [2] grid: array<uint256,3>; }\n\
         code { \
            pair.second = 11; \
            grid[2] = 22; \
         }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let mut evm = Evm::new();
    evm.execute(runtime, &CallEnv::default()).unwrap();

    // pair.second is base slot 0 + byte offset 32 / 32 = slot 1; the fixed
    // array element lands in place at base 2 + index 2.
    assert_eq!(evm.storage_at(U256::from(1u64)), U256::from(11u64));
    assert_eq!(evm.storage_at(U256::from(4u64)), U256::from(22u64));
}

#[test]
fn dynamic_array_elements_use_keccak_data_slots() {
    let outcome = compile(
        "name Dyn;\n\
         storage { [0] items: array<uint256>; }\n\
         code { items[3] = 77; }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let mut evm = Evm::new();
    evm.execute(runtime, &CallEnv::default()).unwrap();

    let expected_slot = array_data_slot(U256::ZERO).wrapping_add(U256::from(3u64));
    assert_eq!(evm.storage_at(expected_slot), U256::from(77u64));
}

#[test]
fn narrow_arithmetic_wraps_at_runtime_and_under_folding() {
    let source = "name Wrap;\n\
         storage { [0] a: uint256; [1] out: uint256; }\n\
         code { let x = uint8(a); let y: uint8 = 100; out = uint256(x + y); }";

    for level in [OptimisationLevel::O0, OptimisationLevel::O1] {
        let outcome = compile_at(source, level);
        let mut evm = Evm::new();
        evm.set_storage(U256::ZERO, U256::from(200u64));
        evm.execute(&outcome.image().unwrap().runtime, &CallEnv::default()).unwrap();
        // 200 + 100 wraps to 44 in uint8.
        assert_eq!(evm.storage_at(U256::from(1u64)), U256::from(44u64), "level {level}");
    }
}

#[test]
fn return_value_from_main() {
    let outcome = compile(
        "name Ret;\n\
         storage { [0] x: uint256; }\n\
         code { return; }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let mut evm = Evm::new();
    let result = evm.execute(runtime, &CallEnv::default()).unwrap();
    assert_eq!(result, Outcome::Stop);
}

#[test]
fn calldata_byte_and_slice_reads() {
    let outcome = compile(
        "name Slice;\n\
         storage { [0] first: uint256; [1] digest: bytes32; }\n\
         code { \
            first = uint256(msg.data[0]); \
            let selector = msg.data[0:4]; \
            digest = keccak256(selector); \
         }",
    );
    let runtime = &outcome.image().unwrap().runtime;

    let calldata = vec![0xde, 0xad, 0xbe, 0xef, 0x01, 0x02];
    let env = CallEnv { calldata: calldata.clone(), ..Default::default() };

    let mut evm = Evm::new();
    evm.execute(runtime, &env).unwrap();
    assert_eq!(evm.storage_at(U256::ZERO), U256::from(0xdeu64));
    assert_eq!(
        evm.storage_at(U256::from(1u64)),
        U256::from_be_bytes(keccak256(&calldata[0..4]).0)
    );
}
