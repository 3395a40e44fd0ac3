//! I/O page dispatcher: decode, byte/word merge rules, CPU register
//! mirrors, MMU registers, reset, and the write/read round-trip law.

mod common;

use common::*;
use pdp1170::{IoBus, Trap};
use proptest::prelude::*;

const PSW: u32 = 0o17777776;
const PIR: u32 = 0o17777772;
const STACK_LIMIT: u32 = 0o17777774;
const LOWER_SIZE: u32 = 0o17777760;
const MMR0: u32 = 0o17777572;
const MMR3: u32 = 0o17772516;

#[test]
fn odd_word_write_traps_without_side_effects() {
    let mut bus = TestBus::new();
    let mut io = IoBus::new();
    let before = peek(&mut io, &mut bus, RLCS);
    let err = io
        .access(&mut bus, 0o17774401, Some(0o177777), false)
        .unwrap_err();
    assert_eq!(
        err,
        Trap {
            vector: 4,
            code: 0o212
        }
    );
    assert_eq!(peek(&mut io, &mut bus, RLCS), before);
}

#[test]
fn byte_writes_merge_into_the_word() {
    let mut bus = TestBus::new();
    let mut io = IoBus::new();
    poke(&mut io, &mut bus, RKWC, 0xABCD);
    io.access(&mut bus, RKWC, Some(0x12), true).unwrap();
    assert_eq!(peek(&mut io, &mut bus, RKWC), 0xAB12);
    io.access(&mut bus, RKWC + 1, Some(0x34), true).unwrap();
    assert_eq!(peek(&mut io, &mut bus, RKWC), 0x3412);
}

#[test]
fn console_register_block_maps_one_register_per_byte() {
    let mut bus = TestBus::new();
    let mut io = IoBus::new();
    bus.registers[0][2] = 0o111;
    bus.registers[1][2] = 0o222;
    bus.stack_pointers[0] = 0o333;
    bus.stack_pointers[1] = 0o444;
    bus.stack_pointers[3] = 0o555;
    bus.pc = 0o666;

    assert_eq!(peek(&mut io, &mut bus, 0o17777702), 0o111);
    assert_eq!(peek(&mut io, &mut bus, 0o17777712), 0o222);
    assert_eq!(peek(&mut io, &mut bus, 0o17777706), 0o333);
    // Odd addresses select their own registers, not high bytes.
    assert_eq!(
        io.access(&mut bus, 0o17777707, None, false).unwrap(),
        0o666
    );
    assert_eq!(peek(&mut io, &mut bus, 0o17777716), 0o444);
    assert_eq!(
        io.access(&mut bus, 0o17777717, None, false).unwrap(),
        0o555
    );

    // With register set 1 selected the same addresses swap meaning.
    bus.psw = 1 << 11;
    assert_eq!(peek(&mut io, &mut bus, 0o17777702), 0o222);
    assert_eq!(peek(&mut io, &mut bus, 0o17777712), 0o111);

    // Writes land whole even on odd addresses.
    io.access(&mut bus, 0o17777707, Some(0o1234), false).unwrap();
    assert_eq!(bus.pc, 0o1234);
}

#[test]
fn psw_access_delegates_to_the_cpu() {
    let mut bus = TestBus::new();
    let mut io = IoBus::new();
    poke(&mut io, &mut bus, PSW, 0o340);
    assert_eq!(bus.psw, 0o340);
    // High-byte write replaces the mode bits only.
    io.access(&mut bus, PSW + 1, Some(0o300), true).unwrap();
    assert_eq!(bus.psw, 0o140340);
}

#[test]
fn stack_limit_keeps_high_byte_only() {
    let mut bus = TestBus::new();
    let mut io = IoBus::new();
    poke(&mut io, &mut bus, STACK_LIMIT, 0o123456);
    assert_eq!(peek(&mut io, &mut bus, STACK_LIMIT), 0o123400);
}

#[test]
fn pir_mirrors_the_highest_level() {
    let mut bus = TestBus::new();
    let mut io = IoBus::new();
    poke(&mut io, &mut bus, PIR, (1 << 9) | (1 << 15));
    let pir = peek(&mut io, &mut bus, PIR);
    assert_eq!((pir >> 5) & 7, 7);
    assert_eq!((pir >> 1) & 7, 7);
    run(&mut io, &mut bus);
    assert!(bus.delivered.contains(&(0o240, 7)));
    // Clearing the register cancels the request.
    poke(&mut io, &mut bus, PIR, 0);
    assert_eq!(peek(&mut io, &mut bus, PIR), 0);
    assert_eq!(bus.pending_interrupts(), 0);
}

#[test]
fn memory_size_registers() {
    let mut bus = TestBus::new();
    let mut io = IoBus::new();
    io.memory_size = 0o400000; // 128 KiB
    assert_eq!(peek(&mut io, &mut bus, LOWER_SIZE), 0o3777);
    assert_eq!(peek(&mut io, &mut bus, 0o17777762), 0);
}

#[test]
fn mmu_register_writes_reach_the_cpu() {
    let mut bus = TestBus::new();
    let mut io = IoBus::new();
    poke(&mut io, &mut bus, MMR0, 1);
    assert_eq!(peek(&mut io, &mut bus, MMR0), 1);
    poke(&mut io, &mut bus, MMR3, 0o177777);
    assert_eq!(peek(&mut io, &mut bus, MMR3), 0o67);
    assert_eq!(bus.mmu_mode_calls.len(), 2);
}

#[test]
fn segmentation_registers_round_trip() {
    let mut bus = TestBus::new();
    let mut io = IoBus::new();
    // Kernel PAR 3 and its PDR.
    poke(&mut io, &mut bus, 0o17772346, 0o54321);
    assert_eq!(peek(&mut io, &mut bus, 0o17772346), 0o54321);
    poke(&mut io, &mut bus, 0o17772306, 0o077406);
    assert_eq!(peek(&mut io, &mut bus, 0o17772306), 0o077406);
    // User-mode file is distinct.
    assert_eq!(peek(&mut io, &mut bus, 0o17777646), 0);
}

#[test]
fn reset_clears_cpu_adjacent_state_and_devices() {
    let mut bus = TestBus::new();
    let mut io = IoBus::new();
    poke(&mut io, &mut bus, PIR, 1 << 12);
    poke(&mut io, &mut bus, STACK_LIMIT, 0o400);
    io.set_cpu_error(0o20);
    io.rk11.rkcs = 0;
    io.reset(&mut bus);
    assert_eq!(peek(&mut io, &mut bus, PIR), 0);
    assert_eq!(peek(&mut io, &mut bus, STACK_LIMIT), 0);
    assert_eq!(peek(&mut io, &mut bus, 0o17777766), 0);
    assert_eq!(io.rk11.rkcs, 0o200);
    assert_eq!(bus.clear_count(), 1);
    // Every serial line resets its terminal.
    assert_eq!(bus.terminal_resets, vec![0, 1, 2, 3, 4]);
}

proptest! {
    /// Writing a fully-writable register then reading it back returns the
    /// written value under the byte-merge rules.
    #[test]
    fn write_read_round_trip(old in any::<u16>(), value in any::<u16>(), byte: bool, high: bool, reg in 0usize..3) {
        let mut bus = TestBus::new();
        let mut io = IoBus::new();
        let addr = [RKWC, MTCMA, RKDA][reg];
        poke(&mut io, &mut bus, addr, old);
        let target = if byte && high { addr + 1 } else { addr };
        io.access(&mut bus, target, Some(value), byte).unwrap();
        let expected = if !byte {
            value
        } else if high {
            ((value & 0xFF) << 8) | (old & 0xFF)
        } else {
            (old & 0xFF00) | (value & 0xFF)
        };
        prop_assert_eq!(peek(&mut io, &mut bus, addr), expected);
    }
}
