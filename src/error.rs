//! Error types for librvm.
//!
//! [`MachineException`] serves dual purpose: it is both the Rust error type
//! returned from fallible operations and the representation of guest CPU
//! traps. Every ISA-level fault unwinds out of the execution step as an
//! `Err` and terminates the `simulate` loop; the host inspects the `kind`
//! at that boundary. Normal termination (stop flag, instruction budget with
//! the non-throwing variant) never takes this path.

use thiserror::Error;

/// The trap/exception taxonomy of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// The decoder produced no handler for the instruction word.
    IllegalOpcode,
    /// A handler detected an invalid field combination.
    IllegalOperation,
    /// A data access violated page permissions or alignment.
    ProtectionFault,
    /// A fetch touched a non-executable page or left the execute segment.
    ExecutionSpaceProtectionFault,
    /// A branch, jump, or fetch target violated instruction alignment.
    MisalignedInstruction,
    /// The handler exists but is not implemented in this build.
    UnimplementedInstruction,
    /// The instruction budget given to `simulate` was exhausted.
    MaxInstructionsReached,
    /// Strict-mode syscall dispatch found no handler.
    UnhandledSyscall,
    /// Page allocation would exceed the configured memory limit.
    OutOfMemory,
    /// Fallback for kinds added in the future.
    Unknown,
}

/// A guest trap or engine fault, carrying the kind and a numeric datum
/// (typically the PC or the offending instruction word).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (data: 0x{data:X})")]
pub struct MachineException {
    pub kind: ExceptionKind,
    pub message: &'static str,
    pub data: u64,
}

impl MachineException {
    pub fn new(kind: ExceptionKind, message: &'static str, data: u64) -> Self {
        MachineException { kind, message, data }
    }

    pub fn illegal_opcode(data: u64) -> Self {
        Self::new(ExceptionKind::IllegalOpcode, "Illegal opcode executed", data)
    }

    pub fn illegal_operation(data: u64) -> Self {
        Self::new(
            ExceptionKind::IllegalOperation,
            "Illegal operation during instruction decoding",
            data,
        )
    }

    pub fn protection_fault(data: u64) -> Self {
        Self::new(ExceptionKind::ProtectionFault, "Protection fault", data)
    }

    pub fn execution_space_protection_fault(data: u64) -> Self {
        Self::new(
            ExceptionKind::ExecutionSpaceProtectionFault,
            "Execution space protection fault",
            data,
        )
    }

    pub fn misaligned_instruction(data: u64) -> Self {
        Self::new(
            ExceptionKind::MisalignedInstruction,
            "Misaligned instruction executed",
            data,
        )
    }

    pub fn unimplemented_instruction(data: u64) -> Self {
        Self::new(
            ExceptionKind::UnimplementedInstruction,
            "Unimplemented instruction executed",
            data,
        )
    }

    /// The distinguished budget-exhaustion exception; `data` is the
    /// absolute instruction-counter limit that was reached.
    pub fn timeout(data: u64) -> Self {
        Self::new(
            ExceptionKind::MaxInstructionsReached,
            "Maximum instruction counter reached",
            data,
        )
    }

    pub fn unhandled_syscall(number: u64) -> Self {
        Self::new(ExceptionKind::UnhandledSyscall, "Unhandled system call", number)
    }

    pub fn out_of_memory(data: u64) -> Self {
        Self::new(ExceptionKind::OutOfMemory, "Out of guest memory", data)
    }

    /// True for the budget-exhaustion exception raised by
    /// `simulate::<true>`.
    pub fn is_timeout(&self) -> bool {
        self.kind == ExceptionKind::MaxInstructionsReached
    }
}

/// Convenience result alias for machine operations.
pub type Result<T> = core::result::Result<T, MachineException>;
