//! SYSTEM instructions: ECALL, EBREAK, FENCE, FENCE.I, and the user-level
//! CSR operations.
//!
//! Only the floating-point CSRs and the cycle/instret counters are
//! modelled; other CSR numbers raise `UNIMPLEMENTED_INSTRUCTION`. The
//! counters are read-only; write attempts raise `ILLEGAL_OPERATION`.

use crate::arch::{Xlen, REG_ECALL};
use crate::error::{MachineException, Result};
use crate::instruction::Instr;
use crate::machine::Machine;
use crate::registers::FpFlags;

const CSR_FFLAGS: u32 = 0x001;
const CSR_FRM: u32 = 0x002;
const CSR_FCSR: u32 = 0x003;
const CSR_CYCLE: u32 = 0xC00;
const CSR_INSTRET: u32 = 0xC02;
const CSR_CYCLEH: u32 = 0xC80;
const CSR_INSTRETH: u32 = 0xC82;

pub fn exec_ecall<W: Xlen>(m: &mut Machine<W>, _i: Instr) -> Result<()> {
    let number = m.cpu.registers.get(REG_ECALL).as_u64() as usize;
    m.system_call(number)
}

pub fn exec_ebreak<W: Xlen>(m: &mut Machine<W>, _i: Instr) -> Result<()> {
    if cfg!(feature = "ebreak-means-stop") {
        m.stop(true);
        Ok(())
    } else {
        let slot = m.ebreak_syscall_number();
        m.system_call(slot)
    }
}

/// Memory ordering is trivial on a single hart.
pub fn exec_fence<W: Xlen>(_m: &mut Machine<W>, _i: Instr) -> Result<()> {
    Ok(())
}

/// FENCE.I synchronizes the instruction stream with prior stores by
/// dropping every decoder cache.
pub fn exec_fence_i<W: Xlen>(m: &mut Machine<W>, _i: Instr) -> Result<()> {
    m.memory.evict_decoder_caches();
    Ok(())
}

// ── CSR access ──

fn read_csr<W: Xlen>(m: &Machine<W>, csr: u32, word: u32) -> Result<u64> {
    match csr {
        CSR_FFLAGS => Ok(m.cpu.registers.fcsr().flags().bits() as u64),
        CSR_FRM => Ok(m.cpu.registers.fcsr().frm() as u64),
        CSR_FCSR => Ok(m.cpu.registers.fcsr().whole() as u64),
        CSR_CYCLE | CSR_INSTRET => Ok(m.cpu.instruction_counter()),
        CSR_CYCLEH | CSR_INSTRETH if W::BITS == 32 => Ok(m.cpu.instruction_counter() >> 32),
        _ => Err(MachineException::unimplemented_instruction(word as u64)),
    }
}

fn write_csr<W: Xlen>(m: &mut Machine<W>, csr: u32, val: u64, word: u32) -> Result<()> {
    match csr {
        CSR_FFLAGS => {
            let fcsr = m.cpu.registers.fcsr_mut();
            fcsr.set_flags(FpFlags::from_bits_truncate(val as u32));
            Ok(())
        }
        CSR_FRM => {
            m.cpu.registers.fcsr_mut().set_frm(val as u32);
            Ok(())
        }
        CSR_FCSR => {
            m.cpu.registers.fcsr_mut().set_whole(val as u32);
            Ok(())
        }
        CSR_CYCLE | CSR_INSTRET | CSR_CYCLEH | CSR_INSTRETH => {
            Err(MachineException::illegal_operation(word as u64))
        }
        _ => Err(MachineException::unimplemented_instruction(word as u64)),
    }
}

pub fn exec_csrrw<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let old = read_csr(m, i.csr(), i.whole())?;
    let src = m.cpu.registers.get(i.rs1()).as_u64();
    write_csr(m, i.csr(), src, i.whole())?;
    m.cpu.registers.set(i.rd(), W::from_u64(old));
    Ok(())
}

pub fn exec_csrrs<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let old = read_csr(m, i.csr(), i.whole())?;
    // rs1 = x0 is a pure read; no write side effect.
    if i.rs1() != 0 {
        let mask = m.cpu.registers.get(i.rs1()).as_u64();
        write_csr(m, i.csr(), old | mask, i.whole())?;
    }
    m.cpu.registers.set(i.rd(), W::from_u64(old));
    Ok(())
}

pub fn exec_csrrc<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let old = read_csr(m, i.csr(), i.whole())?;
    if i.rs1() != 0 {
        let mask = m.cpu.registers.get(i.rs1()).as_u64();
        write_csr(m, i.csr(), old & !mask, i.whole())?;
    }
    m.cpu.registers.set(i.rd(), W::from_u64(old));
    Ok(())
}

pub fn exec_csrrwi<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let old = read_csr(m, i.csr(), i.whole())?;
    write_csr(m, i.csr(), i.rs1() as u64, i.whole())?;
    m.cpu.registers.set(i.rd(), W::from_u64(old));
    Ok(())
}

pub fn exec_csrrsi<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let old = read_csr(m, i.csr(), i.whole())?;
    if i.rs1() != 0 {
        write_csr(m, i.csr(), old | i.rs1() as u64, i.whole())?;
    }
    m.cpu.registers.set(i.rd(), W::from_u64(old));
    Ok(())
}

pub fn exec_csrrci<W: Xlen>(m: &mut Machine<W>, i: Instr) -> Result<()> {
    let old = read_csr(m, i.csr(), i.whole())?;
    if i.rs1() != 0 {
        write_csr(m, i.csr(), old & !(i.rs1() as u64), i.whole())?;
    }
    m.cpu.registers.set(i.rd(), W::from_u64(old));
    Ok(())
}
