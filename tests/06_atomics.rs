//! A extension — LR/SC reservations and the AMO family, serialized on a
//! single hart.

use librvm::{Machine, MachineOptions};

// ── helpers ───────────────────────────────────────────────────────────────────

fn r_type(op: u32, rd: u32, f3: u32, rs1: u32, rs2: u32, f7: u32) -> u32 {
    (f7 << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

fn s_type(op: u32, f3: u32, rs1: u32, rs2: u32, imm: i32) -> u32 {
    let imm = imm as u32;
    (((imm >> 5) & 0x7F) << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | ((imm & 0x1F) << 7) | op
}

/// AMO encodings: funct5 in the upper bits of funct7, aq/rl clear.
fn amo_w(funct5: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x2F, rd, 2, rs1, rs2, funct5 << 2)
}

fn amo_d(funct5: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
    r_type(0x2F, rd, 3, rs1, rs2, funct5 << 2)
}

fn asm(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn machine(words: &[u32]) -> Machine<u32> {
    Machine::new(&asm(words), MachineOptions::default()).unwrap()
}

// ── LR / SC ──────────────────────────────────────────────────────────────────

#[test]
fn lr_sc_pair_succeeds_once() {
    // lr.w x7, (x5); sc.w x8, x6, (x5); sc.w x9, x6, (x5)
    let mut m = machine(&[
        amo_w(0x02, 7, 5, 0),
        amo_w(0x03, 8, 5, 6),
        amo_w(0x03, 9, 5, 6),
    ]);
    m.copy_to_guest(0x4000, &100u32.to_le_bytes()).unwrap();
    m.cpu.registers.set(5, 0x4000);
    m.cpu.registers.set(6, 5);
    m.simulate::<false>(3).unwrap();
    assert_eq!(m.cpu.registers.get(7), 100);
    assert_eq!(m.cpu.registers.get(8), 0); // success
    assert_eq!(m.cpu.registers.get(9), 1); // no reservation left
    assert_eq!(m.memory.read_u32(0x4000).unwrap(), 5);
}

#[test]
fn intervening_store_clears_the_reservation() {
    // lr.w x7, (x5); sw x6, 0(x5); sc.w x8, x6, (x5)
    let mut m = machine(&[
        amo_w(0x02, 7, 5, 0),
        s_type(0x23, 2, 5, 6, 0),
        amo_w(0x03, 8, 5, 6),
    ]);
    m.copy_to_guest(0x4000, &1u32.to_le_bytes()).unwrap();
    m.cpu.registers.set(5, 0x4000);
    m.cpu.registers.set(6, 9);
    m.simulate::<false>(3).unwrap();
    assert_eq!(m.cpu.registers.get(8), 1); // SC failed
    assert_eq!(m.memory.read_u32(0x4000).unwrap(), 9); // only the sw landed
}

// ── AMO ──────────────────────────────────────────────────────────────────────

#[test]
fn amoadd_returns_old_value_and_updates_memory() {
    let mut m = machine(&[amo_w(0x00, 7, 5, 6)]);
    m.copy_to_guest(0x4000, &10u32.to_le_bytes()).unwrap();
    m.cpu.registers.set(5, 0x4000);
    m.cpu.registers.set(6, 7);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(7), 10);
    assert_eq!(m.memory.read_u32(0x4000).unwrap(), 17);
}

#[test]
fn amoswap_exchanges() {
    let mut m = machine(&[amo_w(0x01, 7, 5, 6)]);
    m.copy_to_guest(0x4000, &0xAAu32.to_le_bytes()).unwrap();
    m.cpu.registers.set(5, 0x4000);
    m.cpu.registers.set(6, 0xBB);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(7), 0xAA);
    assert_eq!(m.memory.read_u32(0x4000).unwrap(), 0xBB);
}

#[test]
fn amomaxu_and_amomin_are_sign_aware() {
    // amomaxu.w x7, x6, (x5); amomin.w x8, x6, (x9)
    let mut m = machine(&[amo_w(0x1C, 7, 5, 6), amo_w(0x10, 8, 9, 6)]);
    m.copy_to_guest(0x4000, &0xFFFF_FFFFu32.to_le_bytes()).unwrap();
    m.copy_to_guest(0x4004, &0xFFFF_FFFFu32.to_le_bytes()).unwrap();
    m.cpu.registers.set(5, 0x4000);
    m.cpu.registers.set(9, 0x4004);
    m.cpu.registers.set(6, 1);
    m.simulate::<false>(2).unwrap();
    // Unsigned max keeps all-ones; signed min keeps -1.
    assert_eq!(m.memory.read_u32(0x4000).unwrap(), 0xFFFF_FFFF);
    assert_eq!(m.memory.read_u32(0x4004).unwrap(), 0xFFFF_FFFF);
    assert_eq!(m.cpu.registers.get(7), 0xFFFF_FFFF);
    assert_eq!(m.cpu.registers.get(8), 0xFFFF_FFFF);
}

#[test]
fn misaligned_amo_faults() {
    let mut m = machine(&[amo_w(0x00, 7, 5, 6)]);
    m.cpu.registers.set(5, 0x4002);
    let err = m.simulate::<true>(1).unwrap_err();
    assert_eq!(err.kind, librvm::ExceptionKind::ProtectionFault);
}

// ── RV64 doubleword forms ────────────────────────────────────────────────────

#[test]
fn amoadd_d_on_rv64() {
    let mut m =
        Machine::<u64>::new(&asm(&[amo_d(0x00, 7, 5, 6)]), MachineOptions::default()).unwrap();
    m.copy_to_guest(0x4000, &0x1_0000_0000u64.to_le_bytes()).unwrap();
    m.cpu.registers.set(5, 0x4000);
    m.cpu.registers.set(6, 2);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(7), 0x1_0000_0000);
    assert_eq!(m.memory.read_u64(0x4000).unwrap(), 0x1_0000_0002);
}

#[test]
fn doubleword_amo_is_illegal_on_rv32() {
    let mut m = machine(&[amo_d(0x00, 7, 5, 6)]);
    m.cpu.registers.set(5, 0x4000);
    let err = m.simulate::<true>(1).unwrap_err();
    assert_eq!(err.kind, librvm::ExceptionKind::IllegalOpcode);
}
