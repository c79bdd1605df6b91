//! CPU register file: integer registers, floating-point registers, FCSR.
//!
//! Contains the full architectural register state of one hart. Register x0
//! is hardwired to zero: reads always return zero and writes are routed to
//! a scratch sink cell so hot paths need not branch on the destination
//! index. Floating-point registers are 64 bits wide; single-precision
//! values are NaN-boxed (upper 32 bits all-ones) so a double-width read of
//! a single-precision value yields a quiet NaN.

use core::fmt::Write as _;

use bitflags::bitflags;

use crate::arch::{flpname, regname, Xlen};

// ── Floating-point register ──

/// One 64-bit floating-point register.
///
/// Stores raw bits; the typed accessors implement the NaN-boxing rules for
/// single-precision values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FpReg {
    bits: u64,
}

const NANBOX_HIGH: u64 = 0xFFFF_FFFF_0000_0000;

impl FpReg {
    /// Store a single-precision value, NaN-boxing the upper half.
    #[inline]
    pub fn set_float(&mut self, f: f32) {
        self.bits = NANBOX_HIGH | f.to_bits() as u64;
    }

    /// Store a double-precision value, occupying all 64 bits.
    #[inline]
    pub fn set_double(&mut self, d: f64) {
        self.bits = d.to_bits();
    }

    /// Store raw 32-bit payload (FMV.W.X), NaN-boxing the upper half.
    #[inline]
    pub fn load_u32(&mut self, v: u32) {
        self.bits = NANBOX_HIGH | v as u64;
    }

    /// Store raw 64-bit payload (FMV.D.X, FLD).
    #[inline]
    pub fn load_u64(&mut self, v: u64) {
        self.bits = v;
    }

    /// Read as single precision (low 32 bits).
    #[inline]
    pub fn float(self) -> f32 {
        f32::from_bits(self.bits as u32)
    }

    /// Read as double precision. A NaN-boxed single reads as a NaN.
    #[inline]
    pub fn double(self) -> f64 {
        f64::from_bits(self.bits)
    }

    /// Raw 64-bit contents.
    #[inline]
    pub fn bits(self) -> u64 {
        self.bits
    }

    /// True when the upper half carries the single-precision NaN box.
    #[inline]
    pub fn is_nanboxed(self) -> bool {
        self.bits & NANBOX_HIGH == NANBOX_HIGH
    }
}

// ── FCSR ──

bitflags! {
    /// Accrued floating-point exception flags (the `fflags` CSR).
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct FpFlags: u32 {
        /// Inexact.
        const NX = 1 << 0;
        /// Underflow.
        const UF = 1 << 1;
        /// Overflow.
        const OF = 1 << 2;
        /// Divide by zero.
        const DZ = 1 << 3;
        /// Invalid operation.
        const NV = 1 << 4;
    }
}

/// Floating-point control and status register: 5 exception flags plus a
/// 3-bit rounding mode; the remaining bits read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fcsr {
    flags: FpFlags,
    frm: u8,
}

impl Fcsr {
    #[inline]
    pub fn flags(&self) -> FpFlags {
        self.flags
    }

    #[inline]
    pub fn raise(&mut self, f: FpFlags) {
        self.flags |= f;
    }

    #[inline]
    pub fn set_flags(&mut self, f: FpFlags) {
        self.flags = f;
    }

    /// Rounding mode (0 = round to nearest, ties to even).
    #[inline]
    pub fn frm(&self) -> u32 {
        self.frm as u32
    }

    #[inline]
    pub fn set_frm(&mut self, frm: u32) {
        self.frm = (frm & 0x7) as u8;
    }

    /// The packed `fcsr` CSR value.
    #[inline]
    pub fn whole(&self) -> u32 {
        self.flags.bits() | ((self.frm as u32) << 5)
    }

    #[inline]
    pub fn set_whole(&mut self, v: u32) {
        self.flags = FpFlags::from_bits_truncate(v & 0x1F);
        self.frm = ((v >> 5) & 0x7) as u8;
    }
}

// ── Register file ──

/// Architectural register state of one hart.
#[derive(Clone)]
pub struct Registers<W: Xlen> {
    /// Program counter.
    pub pc: W,
    reg: [W; 32],
    /// Write sink for x0; never read back by guest logic.
    sink: W,
    regfl: [FpReg; 32],
    fcsr: Fcsr,
}

impl<W: Xlen> Default for Registers<W> {
    fn default() -> Self {
        Registers {
            pc: W::zero(),
            reg: [W::zero(); 32],
            sink: W::zero(),
            regfl: [FpReg::default(); 32],
            fcsr: Fcsr::default(),
        }
    }
}

impl<W: Xlen> Registers<W> {
    /// Read integer register `idx`. x0 always reads zero.
    #[inline]
    pub fn get(&self, idx: usize) -> W {
        self.reg[idx & 31]
    }

    /// Write integer register `idx`. Writes to x0 are discarded.
    #[inline]
    pub fn set(&mut self, idx: usize, val: W) {
        *self.get_mut_or_sink(idx) = val;
    }

    /// Mutable access to register `idx`, with index 0 routed to the
    /// scratch sink so that decoded writes never branch on the
    /// destination.
    #[inline]
    pub fn get_mut_or_sink(&mut self, idx: usize) -> &mut W {
        if idx != 0 {
            &mut self.reg[idx & 31]
        } else {
            &mut self.sink
        }
    }

    /// Read floating-point register `idx`.
    #[inline]
    pub fn getfl(&self, idx: usize) -> FpReg {
        self.regfl[idx & 31]
    }

    /// Mutable access to floating-point register `idx`.
    #[inline]
    pub fn getfl_mut(&mut self, idx: usize) -> &mut FpReg {
        &mut self.regfl[idx & 31]
    }

    #[inline]
    pub fn fcsr(&self) -> &Fcsr {
        &self.fcsr
    }

    #[inline]
    pub fn fcsr_mut(&mut self) -> &mut Fcsr {
        &mut self.fcsr
    }

    /// Human-readable dump of the integer registers, five per line.
    pub fn dump(&self) -> String {
        let mut out = String::with_capacity(600);
        for i in 1..32 {
            let _ = write!(out, "[{}\t{:08X}] ", regname(i), self.get(i).as_u64());
            if i % 5 == 4 {
                out.push('\n');
            }
        }
        out
    }

    /// Human-readable dump of the floating-point registers; NaN-boxed
    /// singles print with an `S` tag, doubles with a `D` tag.
    pub fn dump_fp(&self) -> String {
        let mut out = String::with_capacity(800);
        for i in 0..32 {
            let src = self.getfl(i);
            let (tag, val) = if src.is_nanboxed() {
                ('S', src.float() as f64)
            } else {
                ('D', src.double())
            };
            let _ = write!(out, "[{}\t{}{:+.2}] ", flpname(i), tag, val);
            if i % 5 == 4 {
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x0_reads_zero_after_writes() {
        let mut r = Registers::<u32>::default();
        r.set(0, 1234);
        assert_eq!(r.get(0), 0);
        *r.get_mut_or_sink(0) = 99;
        assert_eq!(r.get(0), 0);
        r.set(5, 42);
        assert_eq!(r.get(5), 42);
    }

    #[test]
    fn float_writes_nanbox() {
        let mut f = FpReg::default();
        f.set_float(1.5);
        assert_eq!(f.bits() >> 32, 0xFFFF_FFFF);
        assert_eq!(f.float(), 1.5);
        // a boxed single reads as NaN when taken as a double
        assert!(f.double().is_nan());
        f.set_double(2.0);
        assert!(!f.is_nanboxed());
        assert_eq!(f.double(), 2.0);
    }

    #[test]
    fn fcsr_packing() {
        let mut f = Fcsr::default();
        f.raise(FpFlags::DZ | FpFlags::NX);
        f.set_frm(0b010);
        assert_eq!(f.whole(), 0b010_0_1001);
        f.set_whole(0xFFFF_FFFF);
        assert_eq!(f.whole(), 0xFF);
        assert_eq!(f.frm(), 7);
    }
}
