//! Instruction decoder: maps an instruction word to its handler.
//!
//! The decoder is pure: no hidden state, no table mutation, so its output
//! is cacheable per instruction address. Dispatch is nested — compressed
//! quadrant/funct3 first when the C extension is enabled, otherwise the
//! 32-bit opcode, then funct3/funct7 disambiguation. Unrecognized
//! encodings decode to a sentinel handler that raises `ILLEGAL_OPCODE`
//! with the offending word as data; reserved field combinations (e.g. the
//! high bit of a 32-bit shift amount) decode to an `ILLEGAL_OPERATION`
//! sentinel.
//!
//! [`disassemble`] is the pretty-print companion used for trace-level
//! instruction logging.

use crate::arch::{regname, Xlen};
use crate::error::{MachineException, Result};
use crate::executor::{arith, atomic, control, data, fpu, system};
use crate::instruction::Instr;
use crate::machine::Machine;

/// A decoded instruction handler; the artifact stored in decode caches.
pub type Handler<W> = fn(&mut Machine<W>, Instr) -> Result<()>;

// ── sentinels ──

fn illegal_opcode<W: Xlen>(_m: &mut Machine<W>, i: Instr) -> Result<()> {
    Err(MachineException::illegal_opcode(i.whole() as u64))
}

#[cfg(feature = "compressed")]
fn illegal_compressed<W: Xlen>(_m: &mut Machine<W>, i: Instr) -> Result<()> {
    Err(MachineException::illegal_opcode(i.low_half() as u64))
}

fn illegal_operation<W: Xlen>(_m: &mut Machine<W>, i: Instr) -> Result<()> {
    Err(MachineException::illegal_operation(i.whole() as u64))
}

// ── decode ──

/// Select the handler for one instruction word.
pub fn decode<W: Xlen>(i: Instr) -> Handler<W> {
    #[cfg(feature = "compressed")]
    if i.is_compressed() {
        return decode_compressed(i);
    }

    match i.opcode() {
        0x37 => arith::exec_lui,
        0x17 => arith::exec_auipc,
        0x6F => control::exec_jal,
        0x67 => {
            if i.funct3() == 0 {
                control::exec_jalr
            } else {
                illegal_opcode
            }
        }
        0x63 => match i.funct3() {
            0 => control::exec_beq,
            1 => control::exec_bne,
            4 => control::exec_blt,
            5 => control::exec_bge,
            6 => control::exec_bltu,
            7 => control::exec_bgeu,
            _ => illegal_opcode,
        },
        0x03 => match i.funct3() {
            0 => data::exec_lb,
            1 => data::exec_lh,
            2 => data::exec_lw,
            4 => data::exec_lbu,
            5 => data::exec_lhu,
            3 if W::BITS == 64 => data::exec_ld,
            6 if W::BITS == 64 => data::exec_lwu,
            _ => illegal_opcode,
        },
        0x23 => match i.funct3() {
            0 => data::exec_sb,
            1 => data::exec_sh,
            2 => data::exec_sw,
            3 if W::BITS == 64 => data::exec_sd,
            _ => illegal_opcode,
        },
        0x13 => decode_op_imm::<W>(i),
        0x33 => decode_op::<W>(i),
        0x1B if W::BITS == 64 => decode_op_imm32::<W>(i),
        0x3B if W::BITS == 64 => decode_op32::<W>(i),
        0x0F => match i.funct3() {
            0 => system::exec_fence,
            1 => system::exec_fence_i,
            _ => illegal_opcode,
        },
        0x73 => decode_system::<W>(i),
        0x07 => match i.funct3() {
            2 => fpu::exec_flw,
            3 => fpu::exec_fld,
            _ => illegal_opcode,
        },
        0x27 => match i.funct3() {
            2 => fpu::exec_fsw,
            3 => fpu::exec_fsd,
            _ => illegal_opcode,
        },
        0x43 => match i.funct7() & 0x3 {
            0 => fpu::exec_fmadd_s,
            1 => fpu::exec_fmadd_d,
            _ => illegal_opcode,
        },
        0x47 => match i.funct7() & 0x3 {
            0 => fpu::exec_fmsub_s,
            1 => fpu::exec_fmsub_d,
            _ => illegal_opcode,
        },
        0x4B => match i.funct7() & 0x3 {
            0 => fpu::exec_fnmsub_s,
            1 => fpu::exec_fnmsub_d,
            _ => illegal_opcode,
        },
        0x4F => match i.funct7() & 0x3 {
            0 => fpu::exec_fnmadd_s,
            1 => fpu::exec_fnmadd_d,
            _ => illegal_opcode,
        },
        0x53 => decode_op_fp::<W>(i),
        0x2F => decode_atomic::<W>(i),
        _ => illegal_opcode,
    }
}

fn decode_op_imm<W: Xlen>(i: Instr) -> Handler<W> {
    match i.funct3() {
        0 => arith::exec_addi,
        2 => arith::exec_slti,
        3 => arith::exec_sltiu,
        4 => arith::exec_xori,
        6 => arith::exec_ori,
        7 => arith::exec_andi,
        // The bit above the XLEN-wide shift amount is reserved-zero.
        1 => {
            let hi = if W::BITS == 64 { i.funct7() >> 1 } else { i.funct7() };
            if hi == 0 {
                arith::exec_slli
            } else {
                illegal_operation
            }
        }
        5 => {
            let (hi, sra) = if W::BITS == 64 {
                (i.funct7() >> 1, 0x10)
            } else {
                (i.funct7(), 0x20)
            };
            if hi == 0 {
                arith::exec_srli
            } else if hi == sra {
                arith::exec_srai
            } else {
                illegal_operation
            }
        }
        _ => illegal_opcode,
    }
}

fn decode_op<W: Xlen>(i: Instr) -> Handler<W> {
    match (i.funct7(), i.funct3()) {
        (0x00, 0) => arith::exec_add,
        (0x00, 1) => arith::exec_sll,
        (0x00, 2) => arith::exec_slt,
        (0x00, 3) => arith::exec_sltu,
        (0x00, 4) => arith::exec_xor,
        (0x00, 5) => arith::exec_srl,
        (0x00, 6) => arith::exec_or,
        (0x00, 7) => arith::exec_and,
        (0x20, 0) => arith::exec_sub,
        (0x20, 5) => arith::exec_sra,
        (0x01, 0) => arith::exec_mul,
        (0x01, 1) => arith::exec_mulh,
        (0x01, 2) => arith::exec_mulhsu,
        (0x01, 3) => arith::exec_mulhu,
        (0x01, 4) => arith::exec_div,
        (0x01, 5) => arith::exec_divu,
        (0x01, 6) => arith::exec_rem,
        (0x01, 7) => arith::exec_remu,
        _ => illegal_opcode,
    }
}

fn decode_op_imm32<W: Xlen>(i: Instr) -> Handler<W> {
    match i.funct3() {
        0 => arith::exec_addiw,
        // Word shifts keep a 5-bit amount; bit 25 is reserved-zero.
        1 if i.funct7() == 0x00 => arith::exec_slliw,
        1 => illegal_operation,
        5 if i.funct7() == 0x00 => arith::exec_srliw,
        5 if i.funct7() == 0x20 => arith::exec_sraiw,
        5 => illegal_operation,
        _ => illegal_opcode,
    }
}

fn decode_op32<W: Xlen>(i: Instr) -> Handler<W> {
    match (i.funct7(), i.funct3()) {
        (0x00, 0) => arith::exec_addw,
        (0x00, 1) => arith::exec_sllw,
        (0x00, 5) => arith::exec_srlw,
        (0x20, 0) => arith::exec_subw,
        (0x20, 5) => arith::exec_sraw,
        (0x01, 0) => arith::exec_mulw,
        (0x01, 4) => arith::exec_divw,
        (0x01, 5) => arith::exec_divuw,
        (0x01, 6) => arith::exec_remw,
        (0x01, 7) => arith::exec_remuw,
        _ => illegal_opcode,
    }
}

fn decode_system<W: Xlen>(i: Instr) -> Handler<W> {
    match i.funct3() {
        0 => match i.whole() {
            0x0000_0073 => system::exec_ecall,
            0x0010_0073 => system::exec_ebreak,
            _ => illegal_opcode,
        },
        1 => system::exec_csrrw,
        2 => system::exec_csrrs,
        3 => system::exec_csrrc,
        5 => system::exec_csrrwi,
        6 => system::exec_csrrsi,
        7 => system::exec_csrrci,
        _ => illegal_opcode,
    }
}

fn decode_op_fp<W: Xlen>(i: Instr) -> Handler<W> {
    match i.funct7() {
        0x00 => fpu::exec_fadd_s,
        0x04 => fpu::exec_fsub_s,
        0x08 => fpu::exec_fmul_s,
        0x0C => fpu::exec_fdiv_s,
        0x01 => fpu::exec_fadd_d,
        0x05 => fpu::exec_fsub_d,
        0x09 => fpu::exec_fmul_d,
        0x0D => fpu::exec_fdiv_d,
        0x2C if i.rs2() == 0 => fpu::exec_fsqrt_s,
        0x2D if i.rs2() == 0 => fpu::exec_fsqrt_d,
        0x10 => match i.funct3() {
            0 => fpu::exec_fsgnj_s,
            1 => fpu::exec_fsgnjn_s,
            2 => fpu::exec_fsgnjx_s,
            _ => illegal_opcode,
        },
        0x11 => match i.funct3() {
            0 => fpu::exec_fsgnj_d,
            1 => fpu::exec_fsgnjn_d,
            2 => fpu::exec_fsgnjx_d,
            _ => illegal_opcode,
        },
        0x14 => match i.funct3() {
            0 => fpu::exec_fmin_s,
            1 => fpu::exec_fmax_s,
            _ => illegal_opcode,
        },
        0x15 => match i.funct3() {
            0 => fpu::exec_fmin_d,
            1 => fpu::exec_fmax_d,
            _ => illegal_opcode,
        },
        0x20 if i.rs2() == 1 => fpu::exec_fcvt_s_d,
        0x21 if i.rs2() == 0 => fpu::exec_fcvt_d_s,
        0x50 => match i.funct3() {
            0 => fpu::exec_fle_s,
            1 => fpu::exec_flt_s,
            2 => fpu::exec_feq_s,
            _ => illegal_opcode,
        },
        0x51 => match i.funct3() {
            0 => fpu::exec_fle_d,
            1 => fpu::exec_flt_d,
            2 => fpu::exec_feq_d,
            _ => illegal_opcode,
        },
        0x60 => match i.rs2() {
            0 => fpu::exec_fcvt_w_s,
            1 => fpu::exec_fcvt_wu_s,
            2 if W::BITS == 64 => fpu::exec_fcvt_l_s,
            3 if W::BITS == 64 => fpu::exec_fcvt_lu_s,
            _ => illegal_opcode,
        },
        0x61 => match i.rs2() {
            0 => fpu::exec_fcvt_w_d,
            1 => fpu::exec_fcvt_wu_d,
            2 if W::BITS == 64 => fpu::exec_fcvt_l_d,
            3 if W::BITS == 64 => fpu::exec_fcvt_lu_d,
            _ => illegal_opcode,
        },
        0x68 => match i.rs2() {
            0 => fpu::exec_fcvt_s_w,
            1 => fpu::exec_fcvt_s_wu,
            2 if W::BITS == 64 => fpu::exec_fcvt_s_l,
            3 if W::BITS == 64 => fpu::exec_fcvt_s_lu,
            _ => illegal_opcode,
        },
        0x69 => match i.rs2() {
            0 => fpu::exec_fcvt_d_w,
            1 => fpu::exec_fcvt_d_wu,
            2 if W::BITS == 64 => fpu::exec_fcvt_d_l,
            3 if W::BITS == 64 => fpu::exec_fcvt_d_lu,
            _ => illegal_opcode,
        },
        0x70 if i.rs2() == 0 => match i.funct3() {
            0 => fpu::exec_fmv_x_w,
            1 => fpu::exec_fclass_s,
            _ => illegal_opcode,
        },
        0x71 if i.rs2() == 0 => match i.funct3() {
            0 if W::BITS == 64 => fpu::exec_fmv_x_d,
            1 => fpu::exec_fclass_d,
            _ => illegal_opcode,
        },
        0x78 if i.rs2() == 0 && i.funct3() == 0 => fpu::exec_fmv_w_x,
        0x79 if i.rs2() == 0 && i.funct3() == 0 && W::BITS == 64 => fpu::exec_fmv_d_x,
        _ => illegal_opcode,
    }
}

fn decode_atomic<W: Xlen>(i: Instr) -> Handler<W> {
    let funct5 = i.funct7() >> 2;
    match i.funct3() {
        2 => match funct5 {
            0x02 if i.rs2() == 0 => atomic::exec_lr_w,
            0x03 => atomic::exec_sc_w,
            0x01 => atomic::exec_amoswap_w,
            0x00 => atomic::exec_amoadd_w,
            0x04 => atomic::exec_amoxor_w,
            0x0C => atomic::exec_amoand_w,
            0x08 => atomic::exec_amoor_w,
            0x10 => atomic::exec_amomin_w,
            0x14 => atomic::exec_amomax_w,
            0x18 => atomic::exec_amominu_w,
            0x1C => atomic::exec_amomaxu_w,
            _ => illegal_opcode,
        },
        3 if W::BITS == 64 => match funct5 {
            0x02 if i.rs2() == 0 => atomic::exec_lr_d,
            0x03 => atomic::exec_sc_d,
            0x01 => atomic::exec_amoswap_d,
            0x00 => atomic::exec_amoadd_d,
            0x04 => atomic::exec_amoxor_d,
            0x0C => atomic::exec_amoand_d,
            0x08 => atomic::exec_amoor_d,
            0x10 => atomic::exec_amomin_d,
            0x14 => atomic::exec_amomax_d,
            0x18 => atomic::exec_amominu_d,
            0x1C => atomic::exec_amomaxu_d,
            _ => illegal_opcode,
        },
        _ => illegal_opcode,
    }
}

#[cfg(feature = "compressed")]
fn decode_compressed<W: Xlen>(i: Instr) -> Handler<W> {
    use crate::executor::compressed as c;

    let ci = i.compressed();
    match (ci.op(), ci.funct3()) {
        (0, 0) => {
            if ci.addi4spn_imm() != 0 {
                c::exec_c_addi4spn
            } else {
                illegal_compressed
            }
        }
        (0, 1) => c::exec_c_fld,
        (0, 2) => c::exec_c_lw,
        (0, 3) => {
            if W::BITS == 32 {
                c::exec_c_flw
            } else {
                c::exec_c_ld
            }
        }
        (0, 5) => c::exec_c_fsd,
        (0, 6) => c::exec_c_sw,
        (0, 7) => {
            if W::BITS == 32 {
                c::exec_c_fsw
            } else {
                c::exec_c_sd
            }
        }
        (1, 0) => c::exec_c_addi,
        (1, 1) => {
            if W::BITS == 32 {
                c::exec_c_jal
            } else {
                c::exec_c_addiw
            }
        }
        (1, 2) => c::exec_c_li,
        (1, 3) => {
            if ci.rd() == 2 {
                if ci.addi16sp_imm() != 0 {
                    c::exec_c_addi16sp
                } else {
                    illegal_compressed
                }
            } else if ci.lui_imm() != 0 {
                c::exec_c_lui
            } else {
                illegal_compressed
            }
        }
        (1, 4) => match (ci.0 >> 10) & 0x3 {
            0 => {
                if W::BITS == 32 && ci.shamt6() >= 32 {
                    illegal_operation
                } else {
                    c::exec_c_srli
                }
            }
            1 => {
                if W::BITS == 32 && ci.shamt6() >= 32 {
                    illegal_operation
                } else {
                    c::exec_c_srai
                }
            }
            2 => c::exec_c_andi,
            _ => {
                let sel = (ci.0 >> 5) & 0x3;
                if (ci.0 >> 12) & 1 == 0 {
                    match sel {
                        0 => c::exec_c_sub,
                        1 => c::exec_c_xor,
                        2 => c::exec_c_or,
                        _ => c::exec_c_and,
                    }
                } else if W::BITS == 64 {
                    match sel {
                        0 => c::exec_c_subw,
                        1 => c::exec_c_addw,
                        _ => illegal_compressed,
                    }
                } else {
                    illegal_compressed
                }
            }
        },
        (1, 5) => c::exec_c_j,
        (1, 6) => c::exec_c_beqz,
        (1, 7) => c::exec_c_bnez,
        (2, 0) => {
            if W::BITS == 32 && ci.shamt6() >= 32 {
                illegal_operation
            } else {
                c::exec_c_slli
            }
        }
        (2, 1) => c::exec_c_fldsp,
        (2, 2) => {
            if ci.rd() != 0 {
                c::exec_c_lwsp
            } else {
                illegal_compressed
            }
        }
        (2, 3) => {
            if W::BITS == 32 {
                c::exec_c_flwsp
            } else if ci.rd() != 0 {
                c::exec_c_ldsp
            } else {
                illegal_compressed
            }
        }
        (2, 4) => {
            if (ci.0 >> 12) & 1 == 0 {
                if ci.rs2() == 0 {
                    if ci.rd() != 0 {
                        c::exec_c_jr
                    } else {
                        illegal_compressed
                    }
                } else {
                    c::exec_c_mv
                }
            } else if ci.rs2() == 0 {
                if ci.rd() == 0 {
                    c::exec_c_ebreak
                } else {
                    c::exec_c_jalr
                }
            } else {
                c::exec_c_add
            }
        }
        (2, 5) => c::exec_c_fsdsp,
        (2, 6) => c::exec_c_swsp,
        (2, 7) => {
            if W::BITS == 32 {
                c::exec_c_fswsp
            } else {
                c::exec_c_sdsp
            }
        }
        _ => illegal_compressed,
    }
}

// ── disassembly (trace logging) ──

/// Render an instruction word for the trace log. Covers the forms the
/// engine executes most; anything else prints as raw data.
pub fn disassemble(i: Instr) -> String {
    if cfg!(feature = "compressed") && i.is_compressed() {
        return format!(".2byte 0x{:04x}", i.low_half());
    }
    let rd = regname(i.rd());
    let rs1 = regname(i.rs1());
    let rs2 = regname(i.rs2());
    match i.opcode() {
        0x37 => format!("lui {}, 0x{:x}", rd, (i.imm_u() as u32) >> 12),
        0x17 => format!("auipc {}, 0x{:x}", rd, (i.imm_u() as u32) >> 12),
        0x6F => format!("jal {}, {}", rd, i.imm_j()),
        0x67 => format!("jalr {}, {}({})", rd, i.imm_i(), rs1),
        0x63 => {
            let mn = ["beq", "bne", "?", "?", "blt", "bge", "bltu", "bgeu"][i.funct3() as usize];
            format!("{} {}, {}, {}", mn, rs1, rs2, i.imm_b())
        }
        0x03 => {
            let mn = ["lb", "lh", "lw", "ld", "lbu", "lhu", "lwu", "?"][i.funct3() as usize];
            format!("{} {}, {}({})", mn, rd, i.imm_i(), rs1)
        }
        0x23 => {
            let mn = ["sb", "sh", "sw", "sd", "?", "?", "?", "?"][i.funct3() as usize];
            format!("{} {}, {}({})", mn, rs2, i.imm_s(), rs1)
        }
        0x13 => match i.funct3() {
            0 => format!("addi {}, {}, {}", rd, rs1, i.imm_i()),
            1 => format!("slli {}, {}, {}", rd, rs1, i.shamt()),
            2 => format!("slti {}, {}, {}", rd, rs1, i.imm_i()),
            3 => format!("sltiu {}, {}, {}", rd, rs1, i.imm_i()),
            4 => format!("xori {}, {}, {}", rd, rs1, i.imm_i()),
            5 if i.funct7() & 0x20 != 0 => format!("srai {}, {}, {}", rd, rs1, i.shamt() & 0x3F),
            5 => format!("srli {}, {}, {}", rd, rs1, i.shamt() & 0x3F),
            6 => format!("ori {}, {}, {}", rd, rs1, i.imm_i()),
            _ => format!("andi {}, {}, {}", rd, rs1, i.imm_i()),
        },
        0x33 => {
            let mn = match (i.funct7(), i.funct3()) {
                (0x00, 0) => "add",
                (0x20, 0) => "sub",
                (0x00, 1) => "sll",
                (0x00, 2) => "slt",
                (0x00, 3) => "sltu",
                (0x00, 4) => "xor",
                (0x00, 5) => "srl",
                (0x20, 5) => "sra",
                (0x00, 6) => "or",
                (0x00, 7) => "and",
                (0x01, 0) => "mul",
                (0x01, 1) => "mulh",
                (0x01, 2) => "mulhsu",
                (0x01, 3) => "mulhu",
                (0x01, 4) => "div",
                (0x01, 5) => "divu",
                (0x01, 6) => "rem",
                (0x01, 7) => "remu",
                _ => "?",
            };
            format!("{} {}, {}, {}", mn, rd, rs1, rs2)
        }
        0x0F => {
            if i.funct3() == 1 {
                "fence.i".to_string()
            } else {
                "fence".to_string()
            }
        }
        0x73 => match i.whole() {
            0x0000_0073 => "ecall".to_string(),
            0x0010_0073 => "ebreak".to_string(),
            _ => {
                let mn = ["?", "csrrw", "csrrs", "csrrc", "?", "csrrwi", "csrrsi", "csrrci"]
                    [i.funct3() as usize];
                format!("{} {}, 0x{:x}, {}", mn, rd, i.csr(), rs1)
            }
        },
        0x07 | 0x27 | 0x43 | 0x47 | 0x4B | 0x4F | 0x53 => {
            format!("<fp> 0x{:08x}", i.whole())
        }
        0x2F => format!("<amo> 0x{:08x}", i.whole()),
        _ => format!(".4byte 0x{:08x}", i.whole()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassembles_base_forms() {
        assert_eq!(disassemble(Instr(0x00500013)), "addi zero, zero, 5");
        assert_eq!(disassemble(Instr(0x0000006F)), "jal zero, 0");
        assert_eq!(disassemble(Instr(0x00000073)), "ecall");
        assert_eq!(disassemble(Instr(0xFE009EE3)), "bne ra, zero, -4");
    }

    #[test]
    fn reserved_shift_bit_is_an_illegal_operation() {
        // RV32 slli with shamt bit 5 set (funct7 = 0x01).
        let word = (0x01 << 25) | (1 << 20) | (1 << 15) | (1 << 12) | (1 << 7) | 0x13;
        let mut m = crate::machine::Machine::<u32>::new(&[], Default::default()).unwrap();
        let err = decode::<u32>(Instr(word))(&mut m, Instr(word)).unwrap_err();
        assert_eq!(err.kind, crate::error::ExceptionKind::IllegalOperation);
    }

    #[test]
    fn unknown_opcode_raises_illegal_opcode_with_word() {
        let mut m = crate::machine::Machine::<u32>::new(&[], Default::default()).unwrap();
        let err = decode::<u32>(Instr(0xFFFF_FFFF))(&mut m, Instr(0xFFFF_FFFF)).unwrap_err();
        assert_eq!(err.kind, crate::error::ExceptionKind::IllegalOpcode);
        assert_eq!(err.data, 0xFFFF_FFFF);
    }
}
