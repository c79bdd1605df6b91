//! Loads and stores.
//!
//! Addresses are `rs1 + imm`. Alignment and permissions are enforced by
//! the memory accessors; every store additionally snoops the LR/SC
//! reservation.

use crate::arch::Xlen;
use crate::error::Result;
use crate::instruction::Instr;
use crate::machine::Machine;

#[inline]
fn load_addr<W: Xlen>(m: &Machine<W>, i: Instr) -> W {
    m.cpu.registers.get(i.rs1()).wrapping_add(&W::from_i64(i.imm_i() as i64))
}

#[inline]
fn store_addr<W: Xlen>(m: &Machine<W>, i: Instr) -> W {
    m.cpu.registers.get(i.rs1()).wrapping_add(&W::from_i64(i.imm_s() as i64))
}

// ── loads ──

pub fn exec_lb<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.memory.read_u8(load_addr(m, i))?;
    m.cpu.registers.set(i.rd(), W::from_i64(v as i8 as i64));
    Ok(())
}

pub fn exec_lh<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.memory.read_u16(load_addr(m, i))?;
    m.cpu.registers.set(i.rd(), W::from_i64(v as i16 as i64));
    Ok(())
}

pub fn exec_lw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.memory.read_u32(load_addr(m, i))?;
    m.cpu.registers.set(i.rd(), W::from_i64(v as i32 as i64));
    Ok(())
}

pub fn exec_lbu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.memory.read_u8(load_addr(m, i))?;
    m.cpu.registers.set(i.rd(), W::from_u64(v as u64));
    Ok(())
}

pub fn exec_lhu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.memory.read_u16(load_addr(m, i))?;
    m.cpu.registers.set(i.rd(), W::from_u64(v as u64));
    Ok(())
}

/// RV64 only.
pub fn exec_lwu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.memory.read_u32(load_addr(m, i))?;
    m.cpu.registers.set(i.rd(), W::from_u64(v as u64));
    Ok(())
}

/// RV64 only.
pub fn exec_ld<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.memory.read_u64(load_addr(m, i))?;
    m.cpu.registers.set(i.rd(), W::from_u64(v));
    Ok(())
}

// ── stores ──

pub fn exec_sb<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = store_addr(m, i);
    let v = m.cpu.registers.get(i.rs2()).as_u64() as u8;
    m.memory.write_u8(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

pub fn exec_sh<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = store_addr(m, i);
    let v = m.cpu.registers.get(i.rs2()).as_u64() as u16;
    m.memory.write_u16(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

pub fn exec_sw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = store_addr(m, i);
    let v = m.cpu.registers.get(i.rs2()).as_u64() as u32;
    m.memory.write_u32(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

/// RV64 only.
pub fn exec_sd<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let addr = store_addr(m, i);
    let v = m.cpu.registers.get(i.rs2()).as_u64();
    m.memory.write_u64(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}
