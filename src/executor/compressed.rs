//! C extension: 16-bit compressed instruction forms.
//!
//! Each handler extracts its fields straight from the compressed encoding
//! and performs the semantics of the 32-bit instruction it expands to.
//! Link registers are written with `pc + 2`, and the engine's post-step
//! advance is 2 for these encodings; everything else matches the expanded
//! forms. Reserved encodings are rejected at decode time.

use crate::arch::{Xlen, REG_RA, REG_SP};
use crate::error::Result;
use crate::instruction::Instr;
use crate::machine::Machine;

// ── quadrant 0 ──

pub fn exec_c_addi4spn<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let v = m
        .cpu
        .registers
        .get(REG_SP)
        .wrapping_add(&W::from_u64(c.addi4spn_imm() as u64));
    m.cpu.registers.set(c.rd_short(), v);
    Ok(())
}

pub fn exec_c_fld<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(c.rs1_short()).wrapping_add(&W::from_u64(c.ld_imm() as u64));
    let v = m.memory.read_u64(addr)?;
    m.cpu.registers.getfl_mut(c.rd_short()).load_u64(v);
    Ok(())
}

pub fn exec_c_lw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(c.rs1_short()).wrapping_add(&W::from_u64(c.lw_imm() as u64));
    let v = m.memory.read_u32(addr)?;
    m.cpu.registers.set(c.rd_short(), W::from_i64(v as i32 as i64));
    Ok(())
}

/// RV32 only.
pub fn exec_c_flw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(c.rs1_short()).wrapping_add(&W::from_u64(c.lw_imm() as u64));
    let v = m.memory.read_u32(addr)?;
    m.cpu.registers.getfl_mut(c.rd_short()).load_u32(v);
    Ok(())
}

/// RV64 only.
pub fn exec_c_ld<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(c.rs1_short()).wrapping_add(&W::from_u64(c.ld_imm() as u64));
    let v = m.memory.read_u64(addr)?;
    m.cpu.registers.set(c.rd_short(), W::from_u64(v));
    Ok(())
}

pub fn exec_c_fsd<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(c.rs1_short()).wrapping_add(&W::from_u64(c.ld_imm() as u64));
    let v = m.cpu.registers.getfl(c.rd_short()).bits();
    m.memory.write_u64(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

pub fn exec_c_sw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(c.rs1_short()).wrapping_add(&W::from_u64(c.lw_imm() as u64));
    let v = m.cpu.registers.get(c.rd_short()).as_u64() as u32;
    m.memory.write_u32(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

/// RV32 only.
pub fn exec_c_fsw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(c.rs1_short()).wrapping_add(&W::from_u64(c.lw_imm() as u64));
    let v = m.cpu.registers.getfl(c.rd_short()).bits() as u32;
    m.memory.write_u32(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

/// RV64 only.
pub fn exec_c_sd<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(c.rs1_short()).wrapping_add(&W::from_u64(c.ld_imm() as u64));
    let v = m.cpu.registers.get(c.rd_short()).as_u64();
    m.memory.write_u64(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

// ── quadrant 1 ──

/// C.ADDI; rd = x0 encodes C.NOP, which the x0 write rule absorbs.
pub fn exec_c_addi<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let v = m.cpu.registers.get(c.rd()).wrapping_add(&W::from_i64(c.imm6() as i64));
    m.cpu.registers.set(c.rd(), v);
    Ok(())
}

/// RV32 only.
pub fn exec_c_jal<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let pc = m.cpu.registers.pc;
    let target = pc.wrapping_add(&W::from_i64(c.cj_off() as i64));
    m.cpu.registers.set(REG_RA, pc.wrapping_add(&W::from_u64(2)));
    m.cpu.jump(target)
}

/// RV64 only.
pub fn exec_c_addiw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let v = (m.cpu.registers.get(c.rd()).as_u64() as u32).wrapping_add(c.imm6() as u32);
    m.cpu.registers.set(c.rd(), W::from_i64(v as i32 as i64));
    Ok(())
}

pub fn exec_c_li<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    m.cpu.registers.set(c.rd(), W::from_i64(c.imm6() as i64));
    Ok(())
}

pub fn exec_c_addi16sp<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let v = m
        .cpu
        .registers
        .get(REG_SP)
        .wrapping_add(&W::from_i64(c.addi16sp_imm() as i64));
    m.cpu.registers.set(REG_SP, v);
    Ok(())
}

pub fn exec_c_lui<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    m.cpu.registers.set(c.rd(), W::from_i64(c.lui_imm() as i64));
    Ok(())
}

pub fn exec_c_srli<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let sh = c.shamt6() & (W::BITS - 1);
    let v = m.cpu.registers.get(c.rs1_short()) >> sh as usize;
    m.cpu.registers.set(c.rs1_short(), v);
    Ok(())
}

pub fn exec_c_srai<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let sh = c.shamt6() & (W::BITS - 1);
    let v = W::from_i64(m.cpu.registers.get(c.rs1_short()).as_i64() >> sh);
    m.cpu.registers.set(c.rs1_short(), v);
    Ok(())
}

pub fn exec_c_andi<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let v = m.cpu.registers.get(c.rs1_short()) & W::from_i64(c.imm6() as i64);
    m.cpu.registers.set(c.rs1_short(), v);
    Ok(())
}

macro_rules! c_reg_op {
    ($name:ident, |$a:ident, $b:ident| $expr:expr) => {
        pub fn $name<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
            let c = i.compressed();
            let $a = m.cpu.registers.get(c.rs1_short());
            let $b = m.cpu.registers.get(c.rd_short());
            m.cpu.registers.set(c.rs1_short(), $expr);
            Ok(())
        }
    };
}

c_reg_op!(exec_c_sub, |a, b| a.wrapping_sub(&b));
c_reg_op!(exec_c_xor, |a, b| a ^ b);
c_reg_op!(exec_c_or, |a, b| a | b);
c_reg_op!(exec_c_and, |a, b| a & b);

/// RV64 only.
pub fn exec_c_subw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let a = m.cpu.registers.get(c.rs1_short()).as_u64() as u32;
    let b = m.cpu.registers.get(c.rd_short()).as_u64() as u32;
    m.cpu
        .registers
        .set(c.rs1_short(), W::from_i64(a.wrapping_sub(b) as i32 as i64));
    Ok(())
}

/// RV64 only.
pub fn exec_c_addw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let a = m.cpu.registers.get(c.rs1_short()).as_u64() as u32;
    let b = m.cpu.registers.get(c.rd_short()).as_u64() as u32;
    m.cpu
        .registers
        .set(c.rs1_short(), W::from_i64(a.wrapping_add(b) as i32 as i64));
    Ok(())
}

pub fn exec_c_j<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let target = m.cpu.registers.pc.wrapping_add(&W::from_i64(c.cj_off() as i64));
    m.cpu.jump(target)
}

pub fn exec_c_beqz<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    if m.cpu.registers.get(c.rs1_short()) == W::zero() {
        let target = m.cpu.registers.pc.wrapping_add(&W::from_i64(c.cb_off() as i64));
        return m.cpu.jump(target);
    }
    Ok(())
}

pub fn exec_c_bnez<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    if m.cpu.registers.get(c.rs1_short()) != W::zero() {
        let target = m.cpu.registers.pc.wrapping_add(&W::from_i64(c.cb_off() as i64));
        return m.cpu.jump(target);
    }
    Ok(())
}

// ── quadrant 2 ──

pub fn exec_c_slli<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let sh = c.shamt6() & (W::BITS - 1);
    let v = m.cpu.registers.get(c.rd()) << sh as usize;
    m.cpu.registers.set(c.rd(), v);
    Ok(())
}

pub fn exec_c_fldsp<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(REG_SP).wrapping_add(&W::from_u64(c.ldsp_imm() as u64));
    let v = m.memory.read_u64(addr)?;
    m.cpu.registers.getfl_mut(c.rd()).load_u64(v);
    Ok(())
}

pub fn exec_c_lwsp<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(REG_SP).wrapping_add(&W::from_u64(c.lwsp_imm() as u64));
    let v = m.memory.read_u32(addr)?;
    m.cpu.registers.set(c.rd(), W::from_i64(v as i32 as i64));
    Ok(())
}

/// RV32 only.
pub fn exec_c_flwsp<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(REG_SP).wrapping_add(&W::from_u64(c.lwsp_imm() as u64));
    let v = m.memory.read_u32(addr)?;
    m.cpu.registers.getfl_mut(c.rd()).load_u32(v);
    Ok(())
}

/// RV64 only.
pub fn exec_c_ldsp<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(REG_SP).wrapping_add(&W::from_u64(c.ldsp_imm() as u64));
    let v = m.memory.read_u64(addr)?;
    m.cpu.registers.set(c.rd(), W::from_u64(v));
    Ok(())
}

pub fn exec_c_jr<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let target = m.cpu.registers.get(c.rd()) & !W::one();
    m.cpu.jump(target)
}

pub fn exec_c_mv<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let v = m.cpu.registers.get(c.rs2());
    m.cpu.registers.set(c.rd(), v);
    Ok(())
}

pub fn exec_c_ebreak<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    super::system::exec_ebreak(m, i)
}

pub fn exec_c_jalr<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    // rd may be ra itself; take the target before linking.
    let target = m.cpu.registers.get(c.rd()) & !W::one();
    let link = m.cpu.registers.pc.wrapping_add(&W::from_u64(2));
    m.cpu.registers.set(REG_RA, link);
    m.cpu.jump(target)
}

pub fn exec_c_add<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let v = m.cpu.registers.get(c.rd()).wrapping_add(&m.cpu.registers.get(c.rs2()));
    m.cpu.registers.set(c.rd(), v);
    Ok(())
}

pub fn exec_c_fsdsp<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(REG_SP).wrapping_add(&W::from_u64(c.sdsp_imm() as u64));
    let v = m.cpu.registers.getfl(c.rs2()).bits();
    m.memory.write_u64(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

pub fn exec_c_swsp<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(REG_SP).wrapping_add(&W::from_u64(c.swsp_imm() as u64));
    let v = m.cpu.registers.get(c.rs2()).as_u64() as u32;
    m.memory.write_u32(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

/// RV32 only.
pub fn exec_c_fswsp<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(REG_SP).wrapping_add(&W::from_u64(c.swsp_imm() as u64));
    let v = m.cpu.registers.getfl(c.rs2()).bits() as u32;
    m.memory.write_u32(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}

/// RV64 only.
pub fn exec_c_sdsp<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let c = i.compressed();
    let addr = m.cpu.registers.get(REG_SP).wrapping_add(&W::from_u64(c.sdsp_imm() as u64));
    let v = m.cpu.registers.get(c.rs2()).as_u64();
    m.memory.write_u64(addr, v)?;
    m.cpu.snoop_store(addr);
    Ok(())
}
