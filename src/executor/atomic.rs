//! A extension: LR/SC and the AMO family.
//!
//! On a single hart these execute as plain load-modify-store sequences
//! with no cross-thread guarantees. LR places a reservation on the
//! addressed granule; SC succeeds only while that reservation is intact,
//! and any intervening store to the granule clears it.

use crate::arch::Xlen;
use crate::error::Result;
use crate::instruction::Instr;
use crate::machine::Machine;

#[inline]
fn amo_addr<W: Xlen>(m: &Machine<W>, i: Instr) -> W {
    m.cpu.registers.get(i.rs1())
}

// ── LR / SC ──

pub fn exec_lr_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = amo_addr(m, i);
    let v = m.memory.read_u32(addr)?;
    m.cpu.set_reservation(addr);
    m.cpu.registers.set(i.rd(), W::from_i64(v as i32 as i64));
    Ok(())
}

pub fn exec_sc_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = amo_addr(m, i);
    if m.cpu.take_reservation(addr) {
        let v = m.cpu.registers.get(i.rs2()).as_u64() as u32;
        m.memory.write_u32(addr, v)?;
        m.cpu.registers.set(i.rd(), W::zero());
    } else {
        m.cpu.registers.set(i.rd(), W::one());
    }
    Ok(())
}

/// RV64 only.
pub fn exec_lr_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = amo_addr(m, i);
    let v = m.memory.read_u64(addr)?;
    m.cpu.set_reservation(addr);
    m.cpu.registers.set(i.rd(), W::from_u64(v));
    Ok(())
}

/// RV64 only.
pub fn exec_sc_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = amo_addr(m, i);
    if m.cpu.take_reservation(addr) {
        let v = m.cpu.registers.get(i.rs2()).as_u64();
        m.memory.write_u64(addr, v)?;
        m.cpu.registers.set(i.rd(), W::zero());
    } else {
        m.cpu.registers.set(i.rd(), W::one());
    }
    Ok(())
}

// ── AMO ──

/// Single-instruction load-modify-store on a 32-bit word; rd receives the
/// sign-extended old value.
#[inline]
fn amo_w<W: Xlen>(m: &mut Machine<W>, i: Instr, f: fn(u32, u32) -> u32) -> Result<()> {
    let addr = amo_addr(m, i);
    let old = m.memory.read_u32(addr)?;
    let src = m.cpu.registers.get(i.rs2()).as_u64() as u32;
    m.memory.write_u32(addr, f(old, src))?;
    m.cpu.snoop_store(addr);
    m.cpu.registers.set(i.rd(), W::from_i64(old as i32 as i64));
    Ok(())
}

#[inline]
fn amo_d<W: Xlen>(m: &mut Machine<W>, i: Instr, f: fn(u64, u64) -> u64) -> Result<()> {
    let addr = amo_addr(m, i);
    let old = m.memory.read_u64(addr)?;
    let src = m.cpu.registers.get(i.rs2()).as_u64();
    m.memory.write_u64(addr, f(old, src))?;
    m.cpu.snoop_store(addr);
    m.cpu.registers.set(i.rd(), W::from_u64(old));
    Ok(())
}

pub fn exec_amoswap_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_w(m, i, |_old, src| src)
}

pub fn exec_amoadd_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_w(m, i, u32::wrapping_add)
}

pub fn exec_amoxor_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_w(m, i, |old, src| old ^ src)
}

pub fn exec_amoand_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_w(m, i, |old, src| old & src)
}

pub fn exec_amoor_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_w(m, i, |old, src| old | src)
}

pub fn exec_amomin_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_w(m, i, |old, src| (old as i32).min(src as i32) as u32)
}

pub fn exec_amomax_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_w(m, i, |old, src| (old as i32).max(src as i32) as u32)
}

pub fn exec_amominu_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_w(m, i, u32::min)
}

pub fn exec_amomaxu_w<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_w(m, i, u32::max)
}

pub fn exec_amoswap_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_d(m, i, |_old, src| src)
}

pub fn exec_amoadd_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_d(m, i, u64::wrapping_add)
}

pub fn exec_amoxor_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_d(m, i, |old, src| old ^ src)
}

pub fn exec_amoand_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_d(m, i, |old, src| old & src)
}

pub fn exec_amoor_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_d(m, i, |old, src| old | src)
}

pub fn exec_amomin_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_d(m, i, |old, src| (old as i64).min(src as i64) as u64)
}

pub fn exec_amomax_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_d(m, i, |old, src| (old as i64).max(src as i64) as u64)
}

pub fn exec_amominu_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_d(m, i, u64::min)
}

pub fn exec_amomaxu_d<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    amo_d(m, i, u64::max)
}
