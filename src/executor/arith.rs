//! Integer computational instructions: OP, OP-IMM, LUI/AUIPC, the M
//! extension, and the RV64 W-suffixed word forms.
//!
//! Shift-amount legality (the reserved high bit of the immediate forms) is
//! validated at decode time; handlers here only mask to the XLEN width.

use crate::arch::Xlen;
use crate::error::Result;
use crate::instruction::Instr;
use crate::machine::Machine;

#[inline]
fn shamt_mask<W: Xlen>() -> u32 {
    W::BITS - 1
}

// ── OP-IMM ──

pub fn exec_addi<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).wrapping_add(&W::from_i64(i.imm_i() as i64));
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_slti<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let cond = m.cpu.registers.get(i.rs1()).as_i64() < i.imm_i() as i64;
    m.cpu.registers.set(i.rd(), W::from_u64(cond as u64));
    Ok(())
}

pub fn exec_sltiu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let cond = m.cpu.registers.get(i.rs1()) < W::from_i64(i.imm_i() as i64);
    m.cpu.registers.set(i.rd(), W::from_u64(cond as u64));
    Ok(())
}

pub fn exec_xori<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()) ^ W::from_i64(i.imm_i() as i64);
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_ori<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()) | W::from_i64(i.imm_i() as i64);
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_andi<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()) & W::from_i64(i.imm_i() as i64);
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_slli<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let sh = i.shamt() & shamt_mask::<W>();
    let v = m.cpu.registers.get(i.rs1()) << sh as usize;
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_srli<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let sh = i.shamt() & shamt_mask::<W>();
    let v = m.cpu.registers.get(i.rs1()) >> sh as usize;
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_srai<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let sh = i.shamt() & shamt_mask::<W>();
    let v = W::from_i64(m.cpu.registers.get(i.rs1()).as_i64() >> sh);
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

// ── OP ──

pub fn exec_add<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).wrapping_add(&m.cpu.registers.get(i.rs2()));
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_sub<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).wrapping_sub(&m.cpu.registers.get(i.rs2()));
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_sll<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let sh = (m.cpu.registers.get(i.rs2()).as_u64() as u32) & shamt_mask::<W>();
    let v = m.cpu.registers.get(i.rs1()) << sh as usize;
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_slt<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let cond = m.cpu.registers.get(i.rs1()).as_i64() < m.cpu.registers.get(i.rs2()).as_i64();
    m.cpu.registers.set(i.rd(), W::from_u64(cond as u64));
    Ok(())
}

pub fn exec_sltu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let cond = m.cpu.registers.get(i.rs1()) < m.cpu.registers.get(i.rs2());
    m.cpu.registers.set(i.rd(), W::from_u64(cond as u64));
    Ok(())
}

pub fn exec_xor<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()) ^ m.cpu.registers.get(i.rs2());
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_srl<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let sh = (m.cpu.registers.get(i.rs2()).as_u64() as u32) & shamt_mask::<W>();
    let v = m.cpu.registers.get(i.rs1()) >> sh as usize;
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_sra<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let sh = (m.cpu.registers.get(i.rs2()).as_u64() as u32) & shamt_mask::<W>();
    let v = W::from_i64(m.cpu.registers.get(i.rs1()).as_i64() >> sh);
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_or<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()) | m.cpu.registers.get(i.rs2());
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_and<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()) & m.cpu.registers.get(i.rs2());
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

// ── LUI / AUIPC ──

pub fn exec_lui<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    m.cpu.registers.set(i.rd(), W::from_i64(i.imm_u() as i64));
    Ok(())
}

pub fn exec_auipc<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.pc.wrapping_add(&W::from_i64(i.imm_u() as i64));
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

// ── M extension ──

pub fn exec_mul<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = m.cpu.registers.get(i.rs1()).wrapping_mul(&m.cpu.registers.get(i.rs2()));
    m.cpu.registers.set(i.rd(), v);
    Ok(())
}

pub fn exec_mulh<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_i64() as i128;
    let b = m.cpu.registers.get(i.rs2()).as_i64() as i128;
    m.cpu.registers.set(i.rd(), W::from_i64(((a * b) >> W::BITS) as i64));
    Ok(())
}

pub fn exec_mulhsu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_i64() as i128;
    let b = m.cpu.registers.get(i.rs2()).as_u64() as i128;
    m.cpu.registers.set(i.rd(), W::from_i64(((a * b) >> W::BITS) as i64));
    Ok(())
}

pub fn exec_mulhu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_u64() as u128;
    let b = m.cpu.registers.get(i.rs2()).as_u64() as u128;
    m.cpu.registers.set(i.rd(), W::from_u64(((a * b) >> W::BITS) as u64));
    Ok(())
}

/// Most negative value of the signed XLEN range.
#[inline]
fn int_min<W: Xlen>() -> i64 {
    i64::MIN >> (64 - W::BITS)
}

pub fn exec_div<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_i64();
    let b = m.cpu.registers.get(i.rs2()).as_i64();
    // Division by zero yields all-ones; signed overflow yields the dividend.
    let q = if b == 0 {
        -1
    } else if a == int_min::<W>() && b == -1 {
        a
    } else {
        a / b
    };
    m.cpu.registers.set(i.rd(), W::from_i64(q));
    Ok(())
}

pub fn exec_divu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1());
    let b = m.cpu.registers.get(i.rs2());
    let q = if b == W::zero() { W::max_value() } else { a / b };
    m.cpu.registers.set(i.rd(), q);
    Ok(())
}

pub fn exec_rem<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_i64();
    let b = m.cpu.registers.get(i.rs2()).as_i64();
    let r = if b == 0 {
        a
    } else if a == int_min::<W>() && b == -1 {
        0
    } else {
        a % b
    };
    m.cpu.registers.set(i.rd(), W::from_i64(r));
    Ok(())
}

pub fn exec_remu<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1());
    let b = m.cpu.registers.get(i.rs2());
    let r = if b == W::zero() { a } else { a % b };
    m.cpu.registers.set(i.rd(), r);
    Ok(())
}

// ── RV64 word forms (OP-IMM-32 / OP-32) ──
// Results are computed in 32 bits and sign-extended to the full register.

#[inline]
fn set_word<W: Xlen>(m: &mut Machine<W>, rd: usize, v: u32) {
    m.cpu.registers.set(rd, W::from_i64(v as i32 as i64));
}

pub fn exec_addiw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = (m.cpu.registers.get(i.rs1()).as_u64() as u32).wrapping_add(i.imm_i() as u32);
    set_word(m, i.rd(), v);
    Ok(())
}

pub fn exec_slliw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = (m.cpu.registers.get(i.rs1()).as_u64() as u32) << (i.shamt() & 31);
    set_word(m, i.rd(), v);
    Ok(())
}

pub fn exec_srliw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = (m.cpu.registers.get(i.rs1()).as_u64() as u32) >> (i.shamt() & 31);
    set_word(m, i.rd(), v);
    Ok(())
}

pub fn exec_sraiw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let v = (m.cpu.registers.get(i.rs1()).as_u64() as u32 as i32) >> (i.shamt() & 31);
    set_word(m, i.rd(), v as u32);
    Ok(())
}

pub fn exec_addw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_u64() as u32;
    let b = m.cpu.registers.get(i.rs2()).as_u64() as u32;
    set_word(m, i.rd(), a.wrapping_add(b));
    Ok(())
}

pub fn exec_subw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_u64() as u32;
    let b = m.cpu.registers.get(i.rs2()).as_u64() as u32;
    set_word(m, i.rd(), a.wrapping_sub(b));
    Ok(())
}

pub fn exec_sllw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_u64() as u32;
    let sh = (m.cpu.registers.get(i.rs2()).as_u64() as u32) & 31;
    set_word(m, i.rd(), a << sh);
    Ok(())
}

pub fn exec_srlw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_u64() as u32;
    let sh = (m.cpu.registers.get(i.rs2()).as_u64() as u32) & 31;
    set_word(m, i.rd(), a >> sh);
    Ok(())
}

pub fn exec_sraw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_u64() as u32 as i32;
    let sh = (m.cpu.registers.get(i.rs2()).as_u64() as u32) & 31;
    set_word(m, i.rd(), (a >> sh) as u32);
    Ok(())
}

pub fn exec_mulw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_u64() as u32;
    let b = m.cpu.registers.get(i.rs2()).as_u64() as u32;
    set_word(m, i.rd(), a.wrapping_mul(b));
    Ok(())
}

pub fn exec_divw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_u64() as u32 as i32;
    let b = m.cpu.registers.get(i.rs2()).as_u64() as u32 as i32;
    let q = if b == 0 {
        -1
    } else if a == i32::MIN && b == -1 {
        a
    } else {
        a / b
    };
    set_word(m, i.rd(), q as u32);
    Ok(())
}

pub fn exec_divuw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_u64() as u32;
    let b = m.cpu.registers.get(i.rs2()).as_u64() as u32;
    let q = if b == 0 { u32::MAX } else { a / b };
    set_word(m, i.rd(), q);
    Ok(())
}

pub fn exec_remw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_u64() as u32 as i32;
    let b = m.cpu.registers.get(i.rs2()).as_u64() as u32 as i32;
    let r = if b == 0 {
        a
    } else if a == i32::MIN && b == -1 {
        0
    } else {
        a % b
    };
    set_word(m, i.rd(), r as u32);
    Ok(())
}

pub fn exec_remuw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let a = m.cpu.registers.get(i.rs1()).as_u64() as u32;
    let b = m.cpu.registers.get(i.rs2()).as_u64() as u32;
    let r = if b == 0 { a } else { a % b };
    set_word(m, i.rd(), r);
    Ok(())
}
