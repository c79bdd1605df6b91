//! Control transfer: conditional branches, JAL, JALR.
//!
//! Taken transfers retarget the PC through `Cpu::jump`, which validates
//! target alignment and cancels the engine's post-step PC advance. A
//! not-taken branch simply lets the engine advance past the instruction.

use crate::arch::Xlen;
use crate::error::Result;
use crate::instruction::Instr;
use crate::machine::Machine;

pub fn exec_jal<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let pc = m.cpu.registers.pc;
    let target = pc.wrapping_add(&W::from_i64(i.imm_j() as i64));
    m.cpu.registers.set(i.rd(), pc.wrapping_add(&W::from_u64(4)));
    m.cpu.jump(target)
}

pub fn exec_jalr<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    // The target drops its lowest bit; rd may alias rs1, so compute first.
    let base = m.cpu.registers.get(i.rs1());
    let target = base.wrapping_add(&W::from_i64(i.imm_i() as i64)) & !W::one();
    let link = m.cpu.registers.pc.wrapping_add(&W::from_u64(4));
    m.cpu.registers.set(i.rd(), link);
    m.cpu.jump(target)
}

#[inline]
fn branch<W: Xlen>(m: &mut Machine<W>, i: Instr, taken: bool) -> Result<()> {
    if taken {
        let target = m.cpu.registers.pc.wrapping_add(&W::from_i64(i.imm_b() as i64));
        m.cpu.jump(target)
    } else {
        Ok(())
    }
}

pub fn exec_beq<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let taken = m.cpu.registers.get(i.rs1()) == m.cpu.registers.get(i.rs2());
    branch(m, i, taken)
}

pub fn exec_bne<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let taken = m.cpu.registers.get(i.rs1()) != m.cpu.registers.get(i.rs2());
    branch(m, i, taken)
}

pub fn exec_blt<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let taken = m.cpu.registers.get(i.rs1()).as_i64() < m.cpu.registers.get(i.rs2()).as_i64();
    branch(m, i, taken)
}

pub fn exec_bge<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let taken = m.cpu.registers.get(i.rs1()).as_i64() >= m.cpu.registers.get(i.rs2()).as_i64();
    branch(m, i, taken)
}

pub fn exec_bltu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let taken = m.cpu.registers.get(i.rs1()) < m.cpu.registers.get(i.rs2());
    branch(m, i, taken)
}

pub fn exec_bgeu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let taken = m.cpu.registers.get(i.rs1()) >= m.cpu.registers.get(i.rs2());
    branch(m, i, taken)
}
