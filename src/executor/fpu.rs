//! F and D extensions: floating-point loads/stores, arithmetic, fused
//! multiply-add, sign injection, min/max, conversions, moves, comparisons,
//! and classification.
//!
//! Single-precision results are NaN-boxed on write-back; a single-precision
//! read of a register that does not carry the NaN box yields the canonical
//! quiet NaN, per the ISA's NaN-boxing rule. Arithmetic uses the host FPU
//! (round-to-nearest); the rounding-mode field is honored where it is
//! observable, in the float-to-integer conversions.

use crate::arch::Xlen;
use crate::error::{MachineException, Result};
use crate::instruction::Instr;
use crate::machine::Machine;
use crate::registers::FpFlags;

// ── operand access ──

/// Read an FP register as single precision; a missing NaN box reads as
/// the canonical NaN.
#[inline]
fn rd_f32<W: Xlen>(m: &Machine<W>, idx: usize) -> f32 {
    let r = m.cpu.registers.getfl(idx);
    if r.is_nanboxed() {
        r.float()
    } else {
        f32::NAN
    }
}

#[inline]
fn rd_f64<W: Xlen>(m: &Machine<W>, idx: usize) -> f64 {
    m.cpu.registers.getfl(idx).double()
}

#[inline]
fn wr_f32<W: Xlen>(m: &mut Machine<W>, idx: usize, v: f32) {
    m.cpu.registers.getfl_mut(idx).set_float(v);
}

#[inline]
fn wr_f64<W: Xlen>(m: &mut Machine<W>, idx: usize, v: f64) {
    m.cpu.registers.getfl_mut(idx).set_double(v);
}

/// Raise NV when an operation on non-NaN inputs produced a NaN.
#[inline]
fn accrue_invalid<W: Xlen>(m: &mut Machine<W>, result_nan: bool, inputs_nan: bool) {
    if result_nan && !inputs_nan {
        m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
    }
}

/// A NaN whose mantissa quiet bit (bit 22) is clear is signaling.
#[inline]
fn is_snan_f32(v: f32) -> bool {
    v.is_nan() && v.to_bits() & 0x0040_0000 == 0
}

/// A NaN whose mantissa quiet bit (bit 51) is clear is signaling.
#[inline]
fn is_snan_f64(v: f64) -> bool {
    v.is_nan() && v.to_bits() & 0x0008_0000_0000_0000 == 0
}

/// Resolve the rounding mode field: 7 selects the dynamic mode from FCSR.
fn resolve_rm<W: Xlen>(m: &Machine<W>, i: Instr) -> Result<u32> {
    let rm = match i.rm() {
        7 => m.cpu.registers.fcsr().frm(),
        rm => rm,
    };
    if rm > 4 {
        return Err(MachineException::illegal_operation(i.whole() as u64));
    }
    Ok(rm)
}

/// Round to an integral value in the given mode.
fn round_with(v: f64, rm: u32) -> f64 {
    match rm {
        0 => v.round_ties_even(), // RNE
        1 => v.trunc(),           // RTZ
        2 => v.floor(),           // RDN
        3 => v.ceil(),            // RUP
        _ => v.round(),           // RMM (ties away from zero)
    }
}

// ── loads / stores ──

pub fn exec_flw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = m.cpu.registers.get(i.rs1()).wrapping_add(&W::from_i64(i.imm_i() as i64));
    let v = m.memory.read_u32(addr)?;
    m.cpu.registers.getfl_mut(i.rd()).load_u32(v);
    Ok(())
}

pub fn exec_fld<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = m.cpu.registers.get(i.rs1()).wrapping_add(&W::from_i64(i.imm_i() as i64));
    let v = m.memory.read_u64(addr)?;
    m.cpu.registers.getfl_mut(i.rd()).load_u64(v);
    Ok(())
}

pub fn exec_fsw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = m.cpu.registers.get(i.rs1()).wrapping_add(&W::from_i64(i.imm_s() as i64));
    let v = m.cpu.registers.getfl(i.rs2()).bits() as u32;
    m.memory.write_u32(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

pub fn exec_fsd<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = m.cpu.registers.get(i.rs1()).wrapping_add(&W::from_i64(i.imm_s() as i64));
    let v = m.cpu.registers.getfl(i.rs2()).bits();
    m.memory.write_u64(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

// ── fused multiply-add ──

macro_rules! fused {
    ($name:ident, $rd:ident, $wr:ident, $ty:ty, |$a:ident, $b:ident, $c:ident| $expr:expr) => {
        pub fn $name<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
            let $a = $rd(m, i.rs1());
            let $b = $rd(m, i.rs2());
            let $c = $rd(m, i.rs3());
            let r: $ty = $expr;
            accrue_invalid(m, r.is_nan(), $a.is_nan() || $b.is_nan() || $c.is_nan());
            $wr(m, i.rd(), r);
            Ok(())
        }
    };
}

fused!(exec_fmadd_s, rd_f32, wr_f32, f32, |a, b, c| a.mul_add(b, c));
fused!(exec_fmsub_s, rd_f32, wr_f32, f32, |a, b, c| a.mul_add(b, -c));
fused!(exec_fnmsub_s, rd_f32, wr_f32, f32, |a, b, c| (-a).mul_add(b, c));
fused!(exec_fnmadd_s, rd_f32, wr_f32, f32, |a, b, c| (-a).mul_add(b, -c));
fused!(exec_fmadd_d, rd_f64, wr_f64, f64, |a, b, c| a.mul_add(b, c));
fused!(exec_fmsub_d, rd_f64, wr_f64, f64, |a, b, c| a.mul_add(b, -c));
fused!(exec_fnmsub_d, rd_f64, wr_f64, f64, |a, b, c| (-a).mul_add(b, c));
fused!(exec_fnmadd_d, rd_f64, wr_f64, f64, |a, b, c| (-a).mul_add(b, -c));

// ── arithmetic ──

macro_rules! binop {
    ($name:ident, $rd:ident, $wr:ident, |$a:ident, $b:ident| $expr:expr) => {
        pub fn $name<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
            let $a = $rd(m, i.rs1());
            let $b = $rd(m, i.rs2());
            let r = $expr;
            accrue_invalid(m, r.is_nan(), $a.is_nan() || $b.is_nan());
            $wr(m, i.rd(), r);
            Ok(())
        }
    };
}

binop!(exec_fadd_s, rd_f32, wr_f32, |a, b| a + b);
binop!(exec_fsub_s, rd_f32, wr_f32, |a, b| a - b);
binop!(exec_fmul_s, rd_f32, wr_f32, |a, b| a * b);
binop!(exec_fadd_d, rd_f64, wr_f64, |a, b| a + b);
binop!(exec_fsub_d, rd_f64, wr_f64, |a, b| a - b);
binop!(exec_fmul_d, rd_f64, wr_f64, |a, b| a * b);

pub fn exec_fdiv_s<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = rd_f32(m, i.rs1());
    let b = rd_f32(m, i.rs2());
    if b == 0.0 && a.is_finite() && a != 0.0 {
        m.cpu.registers.fcsr_mut().raise(FpFlags::DZ);
    }
    let r = a / b;
    accrue_invalid(m, r.is_nan(), a.is_nan() || b.is_nan());
    wr_f32(m, i.rd(), r);
    Ok(())
}

pub fn exec_fdiv_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = rd_f64(m, i.rs1());
    let b = rd_f64(m, i.rs2());
    if b == 0.0 && a.is_finite() && a != 0.0 {
        m.cpu.registers.fcsr_mut().raise(FpFlags::DZ);
    }
    let r = a / b;
    accrue_invalid(m, r.is_nan(), a.is_nan() || b.is_nan());
    wr_f64(m, i.rd(), r);
    Ok(())
}

pub fn exec_fsqrt_s<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = rd_f32(m, i.rs1());
    let r = a.sqrt();
    accrue_invalid(m, r.is_nan(), a.is_nan());
    wr_f32(m, i.rd(), r);
    Ok(())
}

pub fn exec_fsqrt_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = rd_f64(m, i.rs1());
    let r = a.sqrt();
    accrue_invalid(m, r.is_nan(), a.is_nan());
    wr_f64(m, i.rd(), r);
    Ok(())
}

// ── sign injection ──

macro_rules! sgnj {
    ($name:ident, $rd:ident, $bits:ty, $sign:expr, $load:ident, |$sa:ident, $sb:ident| $newsign:expr) => {
        pub fn $name<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
            const SIGN: $bits = $sign;
            let a = $rd(m, i.rs1()).to_bits();
            let b = $rd(m, i.rs2()).to_bits();
            let $sa = a & SIGN;
            let $sb = b & SIGN;
            let r = (a & !SIGN) | $newsign;
            m.cpu.registers.getfl_mut(i.rd()).$load(r);
            Ok(())
        }
    };
}

sgnj!(exec_fsgnj_s, rd_f32, u32, 0x8000_0000, load_u32, |_sa, sb| sb);
sgnj!(exec_fsgnjn_s, rd_f32, u32, 0x8000_0000, load_u32, |_sa, sb| sb ^ SIGN);
sgnj!(exec_fsgnjx_s, rd_f32, u32, 0x8000_0000, load_u32, |sa, sb| sa ^ sb);
sgnj!(exec_fsgnj_d, rd_f64, u64, 0x8000_0000_0000_0000, load_u64, |_sa, sb| sb);
sgnj!(exec_fsgnjn_d, rd_f64, u64, 0x8000_0000_0000_0000, load_u64, |_sa, sb| sb ^ SIGN);
sgnj!(exec_fsgnjx_d, rd_f64, u64, 0x8000_0000_0000_0000, load_u64, |sa, sb| sa ^ sb);

// ── min / max ──
// minNum/maxNum semantics: a NaN operand loses; -0.0 orders below +0.0.

fn min_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else if a == b {
        if a.is_sign_negative() { a } else { b }
    } else if a < b {
        a
    } else {
        b
    }
}

fn max_f64(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else if a == b {
        if a.is_sign_positive() { a } else { b }
    } else if a > b {
        a
    } else {
        b
    }
}

// A signaling-NaN operand raises NV; quiet NaNs merely lose.

pub fn exec_fmin_s<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = rd_f32(m, i.rs1());
    let b = rd_f32(m, i.rs2());
    if is_snan_f32(a) || is_snan_f32(b) {
        m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
    }
    let r = min_f64(a as f64, b as f64) as f32;
    wr_f32(m, i.rd(), r);
    Ok(())
}

pub fn exec_fmax_s<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = rd_f32(m, i.rs1());
    let b = rd_f32(m, i.rs2());
    if is_snan_f32(a) || is_snan_f32(b) {
        m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
    }
    let r = max_f64(a as f64, b as f64) as f32;
    wr_f32(m, i.rd(), r);
    Ok(())
}

pub fn exec_fmin_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = rd_f64(m, i.rs1());
    let b = rd_f64(m, i.rs2());
    if is_snan_f64(a) || is_snan_f64(b) {
        m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
    }
    let r = min_f64(a, b);
    wr_f64(m, i.rd(), r);
    Ok(())
}

pub fn exec_fmax_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = rd_f64(m, i.rs1());
    let b = rd_f64(m, i.rs2());
    if is_snan_f64(a) || is_snan_f64(b) {
        m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
    }
    let r = max_f64(a, b);
    wr_f64(m, i.rd(), r);
    Ok(())
}

// ── comparisons ──

// FLT/FLE are signaling comparisons (any NaN operand raises NV); FEQ is
// quiet and raises NV only for a signaling NaN operand. All three write 0
// when either operand is NaN.
macro_rules! fcmp {
    ($name:ident, $rd:ident, $snan:ident, $any_nan_raises:expr, |$a:ident, $b:ident| $expr:expr) => {
        pub fn $name<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
            let $a = $rd(m, i.rs1());
            let $b = $rd(m, i.rs2());
            let r = if $a.is_nan() || $b.is_nan() {
                if $any_nan_raises || $snan($a) || $snan($b) {
                    m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
                }
                false
            } else {
                $expr
            };
            m.cpu.registers.set(i.rd(), W::from_u64(r as u64));
            Ok(())
        }
    };
}

fcmp!(exec_feq_s, rd_f32, is_snan_f32, false, |a, b| a == b);
fcmp!(exec_flt_s, rd_f32, is_snan_f32, true, |a, b| a < b);
fcmp!(exec_fle_s, rd_f32, is_snan_f32, true, |a, b| a <= b);
fcmp!(exec_feq_d, rd_f64, is_snan_f64, false, |a, b| a == b);
fcmp!(exec_flt_d, rd_f64, is_snan_f64, true, |a, b| a < b);
fcmp!(exec_fle_d, rd_f64, is_snan_f64, true, |a, b| a <= b);

// ── conversions: float -> integer ──

/// Convert with saturation; NaN and out-of-range raise NV, inexact raises
/// NX.
///
/// Range checks compare against the first out-of-range value rather than
/// MAX: 2^31, 2^63, 2^32, and 2^64 are powers of two and therefore exact
/// in f64, while i64::MAX and u64::MAX are not representable and would
/// round up past the boundary.
fn to_int<W: Xlen>(m: &mut Machine<W>, v: f64, rm: u32, min: i64, max: i64) -> i64 {
    if v.is_nan() {
        m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
        return max;
    }
    let r = round_with(v, rm);
    let lower = min as f64; // -2^(N-1), exact
    let past_upper = -(min as f64); // 2^(N-1), exact
    if r < lower {
        m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
        min
    } else if r >= past_upper {
        m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
        max
    } else {
        if r != v {
            m.cpu.registers.fcsr_mut().raise(FpFlags::NX);
        }
        r as i64
    }
}

fn to_uint<W: Xlen>(m: &mut Machine<W>, v: f64, rm: u32, max: u64) -> u64 {
    if v.is_nan() {
        m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
        return max;
    }
    let r = round_with(v, rm);
    let past_upper = (max as u128 + 1) as f64; // 2^N, exact
    if r < 0.0 {
        m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
        0
    } else if r >= past_upper {
        m.cpu.registers.fcsr_mut().raise(FpFlags::NV);
        max
    } else {
        if r != v {
            m.cpu.registers.fcsr_mut().raise(FpFlags::NX);
        }
        r as u64
    }
}

macro_rules! cvt_to_int {
    ($name:ident, $rd:ident, signed: $min:expr, $max:expr) => {
        pub fn $name<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
            let rm = resolve_rm(m, i)?;
            let v = $rd(m, i.rs1()) as f64;
            let r = to_int::<W>(m, v, rm, $min, $max);
            m.cpu.registers.set(i.rd(), W::from_i64(r));
            Ok(())
        }
    };
    ($name:ident, $rd:ident, unsigned: $max:expr) => {
        pub fn $name<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
            let rm = resolve_rm(m, i)?;
            let v = $rd(m, i.rs1()) as f64;
            let r = to_uint::<W>(m, v, rm, $max);
            // 32-bit results are sign-extended into the full register.
            if $max == u32::MAX as u64 {
                m.cpu.registers.set(i.rd(), W::from_i64(r as u32 as i32 as i64));
            } else {
                m.cpu.registers.set(i.rd(), W::from_u64(r));
            }
            Ok(())
        }
    };
}

cvt_to_int!(exec_fcvt_w_s, rd_f32, signed: i32::MIN as i64, i32::MAX as i64);
cvt_to_int!(exec_fcvt_wu_s, rd_f32, unsigned: u32::MAX as u64);
cvt_to_int!(exec_fcvt_w_d, rd_f64, signed: i32::MIN as i64, i32::MAX as i64);
cvt_to_int!(exec_fcvt_wu_d, rd_f64, unsigned: u32::MAX as u64);
cvt_to_int!(exec_fcvt_l_s, rd_f32, signed: i64::MIN, i64::MAX);
cvt_to_int!(exec_fcvt_lu_s, rd_f32, unsigned: u64::MAX);
cvt_to_int!(exec_fcvt_l_d, rd_f64, signed: i64::MIN, i64::MAX);
cvt_to_int!(exec_fcvt_lu_d, rd_f64, unsigned: u64::MAX);

// ── conversions: integer -> float ──

pub fn exec_fcvt_s_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).as_u64() as u32 as i32;
    wr_f32(m, i.rd(), v as f32);
    Ok(())
}

pub fn exec_fcvt_s_wu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).as_u64() as u32;
    wr_f32(m, i.rd(), v as f32);
    Ok(())
}

pub fn exec_fcvt_s_l<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).as_i64();
    wr_f32(m, i.rd(), v as f32);
    Ok(())
}

pub fn exec_fcvt_s_lu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).as_u64();
    wr_f32(m, i.rd(), v as f32);
    Ok(())
}

pub fn exec_fcvt_d_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).as_u64() as u32 as i32;
    wr_f64(m, i.rd(), v as f64);
    Ok(())
}

pub fn exec_fcvt_d_wu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).as_u64() as u32;
    wr_f64(m, i.rd(), v as f64);
    Ok(())
}

pub fn exec_fcvt_d_l<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).as_i64();
    wr_f64(m, i.rd(), v as f64);
    Ok(())
}

pub fn exec_fcvt_d_lu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).as_u64();
    wr_f64(m, i.rd(), v as f64);
    Ok(())
}

// ── conversions: between precisions ──

pub fn exec_fcvt_s_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = rd_f64(m, i.rs1());
    wr_f32(m, i.rd(), v as f32);
    Ok(())
}

pub fn exec_fcvt_d_s<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = rd_f32(m, i.rs1());
    wr_f64(m, i.rd(), v as f64);
    Ok(())
}

// ── moves ──

pub fn exec_fmv_x_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let bits = m.cpu.registers.getfl(i.rs1()).bits() as u32;
    m.cpu.registers.set(i.rd(), W::from_i64(bits as i32 as i64));
    Ok(())
}

pub fn exec_fmv_w_x<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).as_u64() as u32;
    m.cpu.registers.getfl_mut(i.rd()).load_u32(v);
    Ok(())
}

/// RV64 only.
pub fn exec_fmv_x_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let bits = m.cpu.registers.getfl(i.rs1()).bits();
    m.cpu.registers.set(i.rd(), W::from_u64(bits));
    Ok(())
}

/// RV64 only.
pub fn exec_fmv_d_x<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).as_u64();
    m.cpu.registers.getfl_mut(i.rd()).load_u64(v);
    Ok(())
}

// ── classification ──

fn classify_f64(v: f64, quiet_bit: u64, mantissa_mask: u64, bits: u64) -> u32 {
    if v.is_nan() {
        if bits & quiet_bit != 0 {
            1 << 9
        } else {
            1 << 8
        }
    } else if v == f64::NEG_INFINITY {
        1 << 0
    } else if v == f64::INFINITY {
        1 << 7
    } else if v == 0.0 {
        if v.is_sign_negative() {
            1 << 3
        } else {
            1 << 4
        }
    } else if v.is_sign_negative() {
        if bits & !mantissa_mask & !(1 << 63) == 0 {
            1 << 2 // negative subnormal
        } else {
            1 << 1
        }
    } else if bits & !mantissa_mask & !(1 << 63) == 0 {
        1 << 5 // positive subnormal
    } else {
        1 << 6
    }
}

pub fn exec_fclass_s<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = rd_f32(m, i.rs1());
    let bits = v.to_bits();
    let class = classify_f64(
        v as f64,
        (0x0040_0000u64) << 32,
        0x007F_FFFFu64 << 32,
        (bits as u64) << 32,
    );
    m.cpu.registers.set(i.rd(), W::from_u64(class as u64));
    Ok(())
}

pub fn exec_fclass_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = rd_f64(m, i.rs1());
    let class = classify_f64(v, 0x0008_0000_0000_0000, 0x000F_FFFF_FFFF_FFFF, v.to_bits());
    m.cpu.registers.set(i.rd(), W::from_u64(class as u64));
    Ok(())
}
