//! librvm — software RISC-V guest machine emulator.
//!
//! An in-process interpreter that executes RV32 / RV64 guest programs
//! (IMAFD, optionally C) for a host that embeds it. A host loads a flat
//! binary image, creates a [`Machine`] with paged guest memory, and drives
//! the guest forward until it stops, traps, or exhausts an instruction
//! budget.
//!
//! # Architecture
//!
//! The library is organized into these layers:
//! - **Decoder** (`decoder.rs`) — pure instruction-word to handler dispatch
//! - **Executor** (`executor/`) — instruction semantics grouped by category
//! - **Memory** (`memory/`) — demand-paged guest RAM with per-page
//!   permissions and decoder caches
//! - **CPU** (`cpu.rs`) — per-hart state: registers, page cursor, LR/SC
//!   reservation
//! - **Machine** (`machine.rs`) — ties everything together: the simulate
//!   loop, system-call dispatch, argument marshalling, stack helpers
//!
//! # Example
//!
//! ```
//! use librvm::{Machine, MachineOptions};
//!
//! // addi x10, x0, 7
//! let program = 0x0070_0513u32.to_le_bytes();
//! let mut machine = Machine::<u32>::new(&program, MachineOptions::default()).unwrap();
//! machine.simulate::<false>(1).unwrap();
//! assert_eq!(machine.cpu.registers.get(10), 7);
//! ```
//!
//! # Width polymorphism
//!
//! The engine is generic over the register width: `Machine<u32>` is an
//! RV32 machine and `Machine<u64>` an RV64 machine. Both monomorphize from
//! one implementation, may coexist in a process, and share no state.

pub mod arch;
pub mod cpu;
pub mod decoder;
pub mod decoder_cache;
pub mod error;
pub mod executor;
pub mod instruction;
pub mod machine;
pub mod memory;
pub mod registers;

pub use arch::Xlen;
pub use cpu::Cpu;
pub use error::{ExceptionKind, MachineException, Result};
pub use instruction::Instr;
pub use machine::{
    Machine, MachineOptions, SysArg, SysArgs, SyscallHandler, DEFAULT_MEMORY_MAX, SYSCALLS_MAX,
};
pub use memory::{Buffer, Memory, PageAttributes, PAGE_SIZE};
pub use registers::{Fcsr, FpFlags, FpReg, Registers};

/// An RV32 machine.
pub type Machine32 = Machine<u32>;
/// An RV64 machine.
pub type Machine64 = Machine<u64>;
