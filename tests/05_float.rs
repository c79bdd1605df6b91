//! F/D extensions — NaN-boxing, arithmetic, conversions, classification,
//! and FCSR flag accrual.

use librvm::{FpFlags, Machine, MachineOptions};

// ── helpers ───────────────────────────────────────────────────────────────────

fn i_type(op: u32, rd: u32, f3: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

fn s_type(op: u32, f3: u32, rs1: u32, rs2: u32, imm: i32) -> u32 {
    let imm = imm as u32;
    (((imm >> 5) & 0x7F) << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | ((imm & 0x1F) << 7) | op
}

fn r_type(op: u32, rd: u32, f3: u32, rs1: u32, rs2: u32, f7: u32) -> u32 {
    (f7 << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

fn asm(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn machine(words: &[u32]) -> Machine<u32> {
    Machine::new(&asm(words), MachineOptions::default()).unwrap()
}

// ── loads, stores, NaN-boxing ────────────────────────────────────────────────

#[test]
fn flw_fadd_fsw_round_trip() {
    // flw f0, 0(x5); fadd.s f1, f0, f0; fsw f1, 4(x5)
    let mut m = machine(&[
        i_type(0x07, 0, 2, 5, 0),
        r_type(0x53, 1, 0, 0, 0, 0x00),
        s_type(0x27, 2, 5, 1, 4),
    ]);
    m.copy_to_guest(0x2000, &1.5f32.to_le_bytes()).unwrap();
    m.cpu.registers.set(5, 0x2000);
    m.simulate::<false>(3).unwrap();

    assert!(m.cpu.registers.getfl(1).is_nanboxed());
    assert_eq!(m.cpu.registers.getfl(1).float(), 3.0);
    let stored = m.memory.read_u32(0x2004).unwrap();
    assert_eq!(f32::from_bits(stored), 3.0);
}

#[test]
fn every_float_write_nanboxes() {
    let mut m = machine(&[]);
    for i in 0..32 {
        m.cpu.registers.getfl_mut(i).set_float(i as f32);
        assert_eq!(m.cpu.registers.getfl(i).bits() >> 32, 0xFFFF_FFFF);
    }
}

#[test]
fn fld_keeps_full_width() {
    // fld f0, 0(x5); fadd.d f1, f0, f0; fsd f1, 8(x5)
    let mut m = machine(&[
        i_type(0x07, 0, 3, 5, 0),
        r_type(0x53, 1, 0, 0, 0, 0x01),
        s_type(0x27, 3, 5, 1, 8),
    ]);
    m.copy_to_guest(0x2000, &2.25f64.to_le_bytes()).unwrap();
    m.cpu.registers.set(5, 0x2000);
    m.simulate::<false>(3).unwrap();
    assert_eq!(m.memory.read_u64(0x2008).map(f64::from_bits).unwrap(), 4.5);
    assert!(!m.cpu.registers.getfl(1).is_nanboxed());
}

// ── conversions ──────────────────────────────────────────────────────────────

#[test]
fn fcvt_w_s_truncates_with_rtz() {
    // fcvt.w.s x6, f2 with rm = RTZ
    let mut m = machine(&[r_type(0x53, 6, 1, 2, 0, 0x60)]);
    m.cpu.registers.getfl_mut(2).set_float(-2.75);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(6), (-2i32) as u32);
    assert!(m.cpu.registers.fcsr().flags().contains(FpFlags::NX));
}

#[test]
fn fcvt_w_s_rounds_ties_to_even() {
    let mut m = machine(&[r_type(0x53, 6, 0, 2, 0, 0x60), r_type(0x53, 7, 0, 3, 0, 0x60)]);
    m.cpu.registers.getfl_mut(2).set_float(2.5);
    m.cpu.registers.getfl_mut(3).set_float(3.5);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(6), 2);
    assert_eq!(m.cpu.registers.get(7), 4);
}

#[test]
fn fcvt_of_nan_saturates_and_raises_nv() {
    let mut m = machine(&[r_type(0x53, 6, 1, 2, 0, 0x60)]);
    m.cpu.registers.getfl_mut(2).set_float(f32::NAN);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(6), i32::MAX as u32);
    assert!(m.cpu.registers.fcsr().flags().contains(FpFlags::NV));
}

#[test]
fn fcvt_l_saturates_at_the_64_bit_boundary() {
    // fcvt.l.s x6, f2 and fcvt.lu.s x7, f3 with exactly 2^63 and 2^64:
    // both are representable in f32 yet out of range for the result.
    let mut m = Machine::<u64>::new(
        &asm(&[
            r_type(0x53, 6, 1, 2, 2, 0x60),
            r_type(0x53, 7, 1, 3, 3, 0x60),
        ]),
        MachineOptions::default(),
    )
    .unwrap();
    m.cpu.registers.getfl_mut(2).set_float(9223372036854775808.0);
    m.cpu.registers.getfl_mut(3).set_float(18446744073709551616.0);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(6), i64::MAX as u64);
    assert_eq!(m.cpu.registers.get(7), u64::MAX);
    assert!(m.cpu.registers.fcsr().flags().contains(FpFlags::NV));
}

#[test]
fn fcvt_l_accepts_the_largest_in_range_power_of_two() {
    // 2^62 fits a signed 64-bit result; no NV, no saturation.
    let mut m = Machine::<u64>::new(
        &asm(&[r_type(0x53, 6, 1, 2, 2, 0x60)]),
        MachineOptions::default(),
    )
    .unwrap();
    m.cpu.registers.getfl_mut(2).set_float(4611686018427387904.0);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(6), 1u64 << 62);
    assert!(!m.cpu.registers.fcsr().flags().contains(FpFlags::NV));
}

#[test]
fn fcvt_s_w_converts_integers() {
    // fcvt.s.w f1, x5
    let mut m = machine(&[r_type(0x53, 1, 0, 5, 0, 0x68)]);
    m.cpu.registers.set(5, (-7i32) as u32);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.getfl(1).float(), -7.0);
}

#[test]
fn precision_conversions() {
    // fcvt.d.s f1, f0; fcvt.s.d f2, f1
    let mut m = machine(&[r_type(0x53, 1, 0, 0, 0, 0x21), r_type(0x53, 2, 0, 1, 1, 0x20)]);
    m.cpu.registers.getfl_mut(0).set_float(1.25);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.getfl(1).double(), 1.25);
    assert_eq!(m.cpu.registers.getfl(2).float(), 1.25);
    assert!(m.cpu.registers.getfl(2).is_nanboxed());
}

// ── comparisons, min/max, classification ─────────────────────────────────────

#[test]
fn comparisons_write_integer_results() {
    // flt.s x6, f0, f1; fle.s x7, f1, f1; feq.s x8, f0, f1
    let mut m = machine(&[
        r_type(0x53, 6, 1, 0, 1, 0x50),
        r_type(0x53, 7, 0, 1, 1, 0x50),
        r_type(0x53, 8, 2, 0, 1, 0x50),
    ]);
    m.cpu.registers.getfl_mut(0).set_float(1.0);
    m.cpu.registers.getfl_mut(1).set_float(2.0);
    m.simulate::<false>(3).unwrap();
    assert_eq!(m.cpu.registers.get(6), 1);
    assert_eq!(m.cpu.registers.get(7), 1);
    assert_eq!(m.cpu.registers.get(8), 0);
}

#[test]
fn flt_with_nan_is_false_and_raises_nv() {
    let mut m = machine(&[r_type(0x53, 6, 1, 0, 1, 0x50)]);
    m.cpu.registers.getfl_mut(0).set_float(f32::NAN);
    m.cpu.registers.getfl_mut(1).set_float(1.0);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(6), 0);
    assert!(m.cpu.registers.fcsr().flags().contains(FpFlags::NV));
}

#[test]
fn fmin_prefers_the_number_over_nan() {
    // fmin.s f9, f7, f8 with a quiet NaN: no NV.
    let mut m = machine(&[r_type(0x53, 9, 0, 7, 8, 0x14)]);
    m.cpu.registers.getfl_mut(7).set_float(f32::NAN);
    m.cpu.registers.getfl_mut(8).set_float(2.0);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.getfl(9).float(), 2.0);
    assert!(!m.cpu.registers.fcsr().flags().contains(FpFlags::NV));
}

#[test]
fn fmin_with_signaling_nan_raises_nv() {
    // fmin.s f9, f7, f8 where f7 holds an sNaN (quiet bit clear).
    let mut m = machine(&[r_type(0x53, 9, 0, 7, 8, 0x14)]);
    m.cpu.registers.getfl_mut(7).load_u32(0x7F80_0001);
    m.cpu.registers.getfl_mut(8).set_float(2.0);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.getfl(9).float(), 2.0);
    assert!(m.cpu.registers.fcsr().flags().contains(FpFlags::NV));
}

#[test]
fn feq_is_quiet_for_quiet_nans_only() {
    // feq.s x6, f0, f1 twice: first with a quiet NaN, then an sNaN.
    let mut m = machine(&[r_type(0x53, 6, 2, 0, 1, 0x50), r_type(0x53, 7, 2, 2, 1, 0x50)]);
    m.cpu.registers.getfl_mut(0).set_float(f32::NAN);
    m.cpu.registers.getfl_mut(1).set_float(1.0);
    m.cpu.registers.getfl_mut(2).load_u32(0x7F80_0001);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(6), 0);
    assert!(!m.cpu.registers.fcsr().flags().contains(FpFlags::NV));
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(7), 0);
    assert!(m.cpu.registers.fcsr().flags().contains(FpFlags::NV));
}

#[test]
fn fclass_of_negative_zero() {
    // fclass.s x7, f3
    let mut m = machine(&[r_type(0x53, 7, 1, 3, 0, 0x70)]);
    m.cpu.registers.getfl_mut(3).set_float(-0.0);
    m.simulate::<false>(1).unwrap();
    assert_eq!(m.cpu.registers.get(7), 1 << 3);
}

#[test]
fn fmv_moves_raw_bits() {
    // fmv.w.x f1, x5; fmv.x.w x6, f1
    let mut m = machine(&[r_type(0x53, 1, 0, 5, 0, 0x78), r_type(0x53, 6, 0, 1, 0, 0x70)]);
    m.cpu.registers.set(5, 0xC080_0000); // -4.0f32
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.getfl(1).float(), -4.0);
    assert_eq!(m.cpu.registers.get(6), 0xC080_0000);
}

// ── flags and the FCSR ───────────────────────────────────────────────────────

#[test]
fn divide_by_zero_accrues_dz_readable_through_csr() {
    // fdiv.s f6, f4, f5; csrrs x8, fflags, x0
    let mut m = machine(&[r_type(0x53, 6, 0, 4, 5, 0x0C), i_type(0x73, 8, 2, 0, 0x001)]);
    m.cpu.registers.getfl_mut(4).set_float(1.0);
    m.cpu.registers.getfl_mut(5).set_float(0.0);
    m.simulate::<false>(2).unwrap();
    assert!(m.cpu.registers.getfl(6).float().is_infinite());
    assert_eq!(m.cpu.registers.get(8), FpFlags::DZ.bits());
}

#[test]
fn frm_is_writable_through_the_csr() {
    // csrrwi x0, frm, 2; csrrs x8, fcsr, x0
    let mut m = machine(&[i_type(0x73, 0, 5, 2, 0x002), i_type(0x73, 8, 2, 0, 0x003)]);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(8), 2 << 5);
    assert_eq!(m.cpu.registers.fcsr().frm(), 2);
}

#[test]
fn unknown_csr_is_unimplemented() {
    // csrrw x0, mstatus(0x300), x0
    let mut m = machine(&[i_type(0x73, 0, 1, 0, 0x300)]);
    let err = m.simulate::<true>(1).unwrap_err();
    assert_eq!(err.kind, librvm::ExceptionKind::UnimplementedInstruction);
}
