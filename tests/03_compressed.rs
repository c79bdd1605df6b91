//! C extension — 16-bit encodings, mixed-width streams, and the
//! page-crossing fetch.
#![cfg(feature = "compressed")]

use librvm::{Machine, MachineOptions};

// ── helpers ───────────────────────────────────────────────────────────────────

fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (rd << 7) | 0x13
}

/// c.li rd, imm (-32..=31)
fn c_li(rd: u16, imm: i16) -> u16 {
    let imm = imm as u16;
    (0b010 << 13) | (((imm >> 5) & 1) << 12) | (rd << 7) | ((imm & 0x1F) << 2) | 0b01
}

/// c.addi rd, imm (-32..=31)
fn c_addi(rd: u16, imm: i16) -> u16 {
    let imm = imm as u16;
    (((imm >> 5) & 1) << 12) | (rd << 7) | ((imm & 0x1F) << 2) | 0b01
}

/// c.bnez rs1' (x8..x15), offset
fn c_bnez(rs1: u16, off: i16) -> u16 {
    let off = off as u16;
    (0b111 << 13)
        | (((off >> 8) & 1) << 12)
        | (((off >> 3) & 0x3) << 10)
        | ((rs1 - 8) << 7)
        | (((off >> 6) & 0x3) << 5)
        | (((off >> 1) & 0x3) << 3)
        | (((off >> 5) & 1) << 2)
        | 0b01
}

/// c.j offset
fn c_j(off: i16) -> u16 {
    let off = off as u16;
    (0b101 << 13)
        | (((off >> 11) & 1) << 12)
        | (((off >> 4) & 1) << 11)
        | (((off >> 8) & 0x3) << 9)
        | (((off >> 10) & 1) << 8)
        | (((off >> 6) & 1) << 7)
        | (((off >> 7) & 1) << 6)
        | (((off >> 1) & 0x7) << 3)
        | (((off >> 5) & 1) << 2)
        | 0b01
}

fn asm16(halves: &[u16]) -> Vec<u8> {
    halves.iter().flat_map(|h| h.to_le_bytes()).collect()
}

fn machine(image: &[u8]) -> Machine<u32> {
    Machine::new(image, MachineOptions::default()).unwrap()
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[test]
fn compressed_li_advances_pc_by_two() {
    let mut m = machine(&asm16(&[c_li(5, 21)]));
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(5), 21);
    assert_eq!(m.cpu.registers.pc, 0x1002);
}

#[test]
fn compressed_countdown_loop() {
    // c.li a0, 3; c.addi a0, -1; c.bnez a0, -2
    let mut m = machine(&asm16(&[c_li(10, 3), c_addi(10, -1), c_bnez(10, -2)]));
    m.simulate::<false>(7).unwrap();
    assert_eq!(m.cpu.registers.get(10), 0);
    assert_eq!(m.cpu.registers.pc, 0x1006);
    assert_eq!(m.instruction_counter(), 7);
}

#[test]
fn negative_c_li_sign_extends() {
    let mut m = machine(&asm16(&[c_li(5, -2)]));
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(5), (-2i32) as u32);
}

#[test]
fn compressed_jump_skips_a_halfword() {
    // c.j +4 skips over the first c.li.
    let mut m = machine(&asm16(&[c_j(4), c_li(10, 9), c_li(11, 3)]));
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(10), 0);
    assert_eq!(m.cpu.registers.get(11), 3);
}

#[test]
fn page_crossing_32bit_instruction() {
    // A 32-bit `addi x5, x0, 42` whose low half sits in the last two
    // bytes of page 1 and whose high half starts page 2.
    let mut m = machine(&[]);
    m.copy_to_guest(0x1FFE, &addi(5, 0, 42).to_le_bytes()).unwrap();
    m.cpu.jump(0x1FFE).unwrap();
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(5), 42);
    assert_eq!(m.cpu.registers.pc, 0x2002);
    assert_eq!(m.instruction_counter(), 1);
}

#[test]
fn mixed_width_instruction_stream() {
    // 32-bit addi followed by c.addi.
    let mut image = addi(10, 0, 5).to_le_bytes().to_vec();
    image.extend_from_slice(&c_addi(10, 1).to_le_bytes());
    let mut m = machine(&image);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(10), 6);
    assert_eq!(m.cpu.registers.pc, 0x1006);
}

#[test]
fn two_byte_aligned_jump_is_legal() {
    let mut m = machine(&asm16(&[c_li(5, 1), c_li(6, 2)]));
    m.cpu.jump(0x1002).unwrap();
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(6), 2);
    assert_eq!(m.cpu.registers.get(5), 0);
}

#[test]
fn compressed_ebreak_reaches_the_ebreak_slot() {
    fn handler(m: &mut Machine<u32>) -> librvm::Result<u32> {
        m.stop(true);
        Ok(7)
    }
    // c.ebreak = 0x9002
    let mut m = machine(&asm16(&[0x9002]));
    m.install_syscall_handler(0, handler);
    m.simulate::<false>(5).unwrap();
    assert!(m.stopped());
    // The EBREAK slot must not clobber A0 in the default build.
    assert_eq!(m.cpu.registers.get(10), 0);
}
