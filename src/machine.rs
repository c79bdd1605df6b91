//! The machine: one CPU plus its memory, the simulate loop, and the
//! host-facing surface (system calls, argument marshalling, stack helpers).
//!
//! A `Machine` is single-threaded and cooperative: `simulate` runs the
//! fetch/decode/execute step in a tight loop until the stop flag is set,
//! an exception unwinds out, or the instruction budget is reached. The
//! stop flag is checked at the top of each iteration, so a syscall handler
//! may call [`Machine::stop`] to halt the loop at the next boundary.

use bytemuck::Pod;
use log::{debug, log_enabled, trace, Level};

use crate::arch::{Xlen, REG_ARG0, REG_FA0, REG_RA, REG_RETVAL, REG_SP};
use crate::cpu::Cpu;
use crate::decoder::{decode, disassemble, Handler};
use crate::decoder_cache::{DecoderCache, DIVISOR};
use crate::error::{MachineException, Result};
use crate::instruction::Instr;
use crate::memory::{Buffer, Memory, PAGE_SHIFT, PAGE_SIZE};

/// Size of the system-call dispatch table.
pub const SYSCALLS_MAX: usize = 512;

/// Default guest memory budget: 16 MiB.
pub const DEFAULT_MEMORY_MAX: u64 = 16 * 1024 * 1024;

/// A system-call handler. The returned value is written to `A0` (except
/// for the EBREAK slot in the default build).
pub type SyscallHandler<W> = fn(&mut Machine<W>) -> Result<W>;

/// Callback invoked when no handler is installed for a system call.
pub type UnhandledSyscall<W> = fn(&mut Machine<W>, usize);

// ── options ──

/// Construction-time machine configuration.
pub struct MachineOptions<'m, W: Xlen> {
    /// Cap on total page-backed guest memory, in bytes.
    pub memory_max: u64,
    /// Where the binary image is copied, and the default start address.
    pub load_address: W,
    /// Initial stack pointer; defaults to the top of `memory_max`.
    pub stack_address: Option<W>,
    /// Copy register state and instruction counter from this machine
    /// instead of resetting. Memory is not shared; a loader populates it
    /// separately.
    pub owning_machine: Option<&'m Machine<W>>,
    /// Dispatch slot used by EBREAK in the default build.
    pub ebreak_syscall: usize,
}

impl<W: Xlen> Default for MachineOptions<'_, W> {
    fn default() -> Self {
        MachineOptions {
            memory_max: DEFAULT_MEMORY_MAX,
            load_address: W::from_u64(0x1000),
            stack_address: None,
            owning_machine: None,
            ebreak_syscall: 0,
        }
    }
}

// ── machine ──

/// A RISC-V guest machine: CPU, paged memory, and syscall dispatch.
pub struct Machine<W: Xlen> {
    pub cpu: Cpu<W>,
    pub memory: Memory<W>,
    stopped: bool,
    syscall_handlers: Vec<Option<SyscallHandler<W>>>,
    ebreak_syscall: usize,
    on_unhandled_syscall: Option<UnhandledSyscall<W>>,
    destructor_callbacks: Vec<Box<dyn FnOnce()>>,
    exit_address: W,
}

impl<W: Xlen> Machine<W> {
    /// Create a machine holding `binary` at the configured load address.
    ///
    /// With `owning_machine` set, register state and the instruction
    /// counter are copied from the source machine; otherwise the CPU is
    /// reset to the image's start address.
    pub fn new(binary: &[u8], options: MachineOptions<'_, W>) -> Result<Self> {
        let memory = Memory::new(
            binary.to_vec(),
            options.memory_max,
            options.load_address,
            options.stack_address,
        )?;
        let mut machine = Machine {
            cpu: Cpu::new(),
            memory,
            stopped: false,
            syscall_handlers: vec![None; SYSCALLS_MAX],
            ebreak_syscall: options.ebreak_syscall,
            on_unhandled_syscall: None,
            destructor_callbacks: Vec::new(),
            exit_address: W::zero(),
        };
        match options.owning_machine {
            None => {
                let start = machine.memory.start_address();
                let stack = machine.memory.stack_address();
                machine.cpu.reset(start, stack)?;
            }
            Some(src) => {
                machine.cpu.registers = src.cpu.registers.clone();
                machine.cpu.increment_counter(src.cpu.instruction_counter());
                let pc = machine.cpu.registers.pc;
                machine.cpu.jump(pc)?;
            }
        }
        debug!(
            "created RV{} machine: {} byte image at {:#x}, memory_max {} KiB",
            W::BITS,
            binary.len(),
            options.load_address.as_u64(),
            options.memory_max / 1024,
        );
        Ok(machine)
    }

    // ── execution ──

    /// Run until the stop flag is set, an exception is raised, or the
    /// instruction counter advances by `max_instr` (0 = unbounded).
    ///
    /// With `THROW = true` budget exhaustion raises the timeout exception
    /// (`data` = the absolute counter limit); with `THROW = false` it
    /// returns `Ok(())` silently.
    pub fn simulate<const THROW: bool>(&mut self, max_instr: u64) -> Result<()> {
        self.stopped = false;
        if max_instr != 0 {
            let max = self.cpu.instruction_counter() + max_instr;
            while !self.stopped {
                self.step_logged()?;
                if self.cpu.instruction_counter() >= max {
                    if THROW {
                        return Err(MachineException::timeout(max));
                    }
                    break;
                }
            }
        } else {
            while !self.stopped {
                self.step_logged()?;
            }
        }
        Ok(())
    }

    /// One fetch/decode/execute iteration.
    pub fn step(&mut self) -> Result<()> {
        let instr = self.fetch_instruction()?;
        let handler = self.lookup_handler(instr)?;
        if log_enabled!(Level::Trace) {
            trace!(
                "{:#010x}: {}",
                self.cpu.registers.pc.as_u64(),
                disassemble(instr)
            );
        }
        self.cpu.begin_step(instr.length());
        handler(self, instr)?;
        self.cpu.bump_counter();
        let advance = self.cpu.pending_advance();
        self.cpu.registers.pc = self
            .cpu
            .registers
            .pc
            .wrapping_add(&W::from_u64(advance as u64));
        Ok(())
    }

    #[inline]
    fn step_logged(&mut self) -> Result<()> {
        match self.step() {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!(
                    "machine exception at pc {:#x} after {} instructions: {}",
                    self.cpu.registers.pc.as_u64(),
                    self.cpu.instruction_counter(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Fetch the instruction word at the current PC, crossing into the
    /// next page when a 32-bit instruction straddles the boundary in
    /// compressed mode.
    fn fetch_instruction(&mut self) -> Result<Instr> {
        let pc = self.cpu.registers.pc;
        let align = if cfg!(feature = "compressed") { 1 } else { 3 };
        if pc.as_u64() & align != 0 {
            return Err(MachineException::misaligned_instruction(pc.as_u64()));
        }

        // Execute-segment fast path: one bounds check, no page management.
        if let Some(seg) = self.memory.exec_segment() {
            if pc >= seg.begin && pc < seg.end {
                let idx = (pc.as_u64() - seg.begin.as_u64()) as usize;
                let mut b = [0u8; 4];
                b.copy_from_slice(&seg.data[idx..idx + 4]);
                return Ok(Instr(u32::from_le_bytes(b)));
            }
            return Err(MachineException::execution_space_protection_fault(
                pc.as_u64(),
            ));
        }

        let page_no = pc.as_u64() >> PAGE_SHIFT;
        if self.cpu.current_page() != Some(page_no) {
            // Execute-permission check happens on page change only.
            self.memory.exec_page(page_no)?;
            self.cpu.set_current_page(page_no);
        }
        let offset = (pc.as_u64() & (PAGE_SIZE as u64 - 1)) as usize;

        if !cfg!(feature = "compressed") || offset <= PAGE_SIZE - 4 {
            return Ok(Instr(self.memory.exec_page(page_no)?.read_u32(offset)));
        }

        // Compressed mode, last half-word of the page: read the low half
        // here and, for a 32-bit instruction, the high half from offset 0
        // of the next page.
        let low = self.memory.exec_page(page_no)?.read_u16(offset);
        let instr = Instr(low as u32);
        if instr.is_compressed() {
            return Ok(instr);
        }
        let next = page_no + 1;
        let high = self.memory.exec_page(next)?.read_u16(0);
        self.cpu.set_current_page(next);
        Ok(Instr::from_halves(low, high))
    }

    /// Look up (or populate) the decode-cache slot for the current PC.
    fn lookup_handler(&mut self, instr: Instr) -> Result<Handler<W>> {
        if !cfg!(feature = "instr-cache") {
            return Ok(decode::<W>(instr));
        }
        let pc = self.cpu.registers.pc;
        if let Some(seg) = self.memory.exec_segment_mut() {
            let idx = ((pc.as_u64() - seg.begin.as_u64()) as usize) / DIVISOR;
            if let Some(h) = seg.cache[idx] {
                return Ok(h);
            }
            let h = decode::<W>(instr);
            seg.cache[idx] = Some(h);
            return Ok(h);
        }
        let page_no = pc.as_u64() >> PAGE_SHIFT;
        let offset = (pc.as_u64() & (PAGE_SIZE as u64 - 1)) as usize;
        match self.memory.page_mut_if_present(page_no) {
            Some(page) => {
                let idx = DecoderCache::<W>::index_of(offset);
                let cache = page.decoder_cache_mut();
                if let Some(h) = cache.get(idx) {
                    return Ok(h);
                }
                let h = decode::<W>(instr);
                cache.set(idx, h);
                Ok(h)
            }
            // The shared zero page carries no cache; decode directly.
            None => Ok(decode::<W>(instr)),
        }
    }

    // ── stop / reset ──

    /// Cooperatively halt (or un-halt) the simulate loop. Callable from a
    /// syscall handler; the flag is checked at the top of each iteration.
    pub fn stop(&mut self, value: bool) {
        self.stopped = value;
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Reset CPU then memory. The instruction counter is preserved.
    pub fn reset(&mut self) -> Result<()> {
        let start = self.memory.start_address();
        let stack = self.memory.stack_address();
        self.cpu.reset(start, stack)?;
        self.memory.reset()
    }

    /// Instructions executed since construction.
    pub fn instruction_counter(&self) -> u64 {
        self.cpu.instruction_counter()
    }

    // ── guest memory helpers ──

    /// Copy host bytes into guest memory; returns `dst + len`.
    pub fn copy_to_guest(&mut self, dst: W, buf: &[u8]) -> Result<W> {
        self.memory.memcpy(dst, buf)?;
        Ok(dst.wrapping_add(&W::from_u64(buf.len() as u64)))
    }

    /// Push bytes onto the guest stack: SP is decremented by the length,
    /// word-aligned, and written back. Returns the new SP.
    pub fn stack_push(&mut self, data: &[u8]) -> Result<W> {
        let sp = self.cpu.registers.get(REG_SP).as_u64();
        let sp = W::from_u64(sp.wrapping_sub(data.len() as u64) & !(W::BYTES as u64 - 1));
        self.copy_to_guest(sp, data)?;
        self.cpu.registers.set(REG_SP, sp);
        Ok(sp)
    }

    /// Push a string plus its terminating zero.
    pub fn stack_push_str(&mut self, s: &str) -> Result<W> {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.stack_push(&bytes)
    }

    /// Push a trivially-copyable value.
    pub fn stack_push_value<T: Pod>(&mut self, value: &T) -> Result<W> {
        self.stack_push(bytemuck::bytes_of(value))
    }

    /// Force SP to the RISC-V calling convention's 16-byte boundary.
    pub fn realign_stack(&mut self) {
        let sp = self.cpu.registers.get(REG_SP);
        self.cpu.registers.set(REG_SP, sp & !W::from_u64(0xF));
    }

    /// Resolve a loader-installed symbol.
    pub fn address_of(&self, name: &str) -> Option<W> {
        self.memory.resolve_address(name)
    }

    // ── system calls ──

    /// Install a handler in dispatch slot `number`.
    ///
    /// # Panics
    ///
    /// Panics if `number >= SYSCALLS_MAX`.
    pub fn install_syscall_handler(&mut self, number: usize, handler: SyscallHandler<W>) {
        self.syscall_handlers[number] = Some(handler);
    }

    /// Install a list of `(number, handler)` pairs.
    pub fn install_syscall_handlers(&mut self, list: &[(usize, SyscallHandler<W>)]) {
        for &(number, handler) in list {
            self.install_syscall_handler(number, handler);
        }
    }

    /// Install consecutive handlers starting at `base`. Out-of-range
    /// installs are ignored.
    pub fn install_syscall_handler_range(&mut self, base: usize, handlers: &[SyscallHandler<W>]) {
        if base + handlers.len() <= self.syscall_handlers.len() {
            for (slot, &handler) in handlers.iter().enumerate() {
                self.syscall_handlers[base + slot] = Some(handler);
            }
        }
    }

    /// Callback for system calls with no installed handler (non-strict
    /// builds).
    pub fn set_on_unhandled_syscall(&mut self, callback: UnhandledSyscall<W>) {
        self.on_unhandled_syscall = Some(callback);
    }

    /// The dispatch slot EBREAK routes to in the default build.
    pub fn ebreak_syscall_number(&self) -> usize {
        self.ebreak_syscall
    }

    /// Dispatch system call `number`.
    ///
    /// An installed handler's return value is written to `A0`, except for
    /// the EBREAK slot in the default build, which must not clobber
    /// registers. Without a handler: the strict build raises
    /// `UNHANDLED_SYSCALL`; otherwise the fallback callback (if any) runs
    /// and `A0` receives `-ENOSYS`.
    pub fn system_call(&mut self, number: usize) -> Result<()> {
        if let Some(Some(handler)) = self.syscall_handlers.get(number).copied() {
            let ret = handler(self)?;
            if cfg!(feature = "ebreak-means-stop") || number != self.ebreak_syscall {
                self.cpu.registers.set(REG_RETVAL, ret);
            }
            return Ok(());
        }
        if cfg!(feature = "throw-on-unhandled-syscall") {
            return Err(MachineException::unhandled_syscall(number as u64));
        }
        debug!("unhandled system call {}", number);
        if let Some(callback) = self.on_unhandled_syscall {
            callback(self, number);
        }
        if cfg!(feature = "ebreak-means-stop") || number != self.ebreak_syscall {
            self.cpu.registers.set(REG_RETVAL, W::from_i64(-38)); // -ENOSYS
        }
        Ok(())
    }

    // ── typed syscall arguments ──

    /// Fetch one typed argument from slot `idx` of the calling
    /// convention (integer slots A0.., FP slots FA0..).
    pub fn sysarg<T: SysArg<W>>(&self, idx: usize) -> Result<T> {
        T::extract(self, idx, idx)
    }

    /// Fetch a tuple of typed arguments, assigning integer and FP slots
    /// in order (a 64-bit integer on RV32 consumes two integer slots, a
    /// buffer consumes pointer and length slots).
    pub fn sysargs<T: SysArgs<W>>(&self) -> Result<T> {
        T::extract(self)
    }

    /// Fetch a trivially-copyable value through the pointer in integer
    /// slot `idx`.
    pub fn sysarg_value<T: Pod>(&self, idx: usize) -> Result<T> {
        let addr = self.cpu.registers.get(REG_ARG0 + idx);
        let mut value = T::zeroed();
        self.memory.memcpy_out(bytemuck::bytes_of_mut(&mut value), addr)?;
        Ok(value)
    }

    // ── guest function calls ──

    /// Address a returning guest function lands on (where the loader has
    /// planted an exit/stop trap).
    pub fn set_exit_address(&mut self, addr: W) {
        self.exit_address = addr;
    }

    pub fn exit_address(&self) -> W {
        self.exit_address
    }

    /// Call a guest function: realign the stack, marshal up to eight
    /// integer arguments into A0.., point RA at the exit address, and
    /// simulate with the given budget. Returns A0.
    pub fn vmcall(&mut self, addr: W, args: &[W], max_instr: u64) -> Result<W> {
        self.realign_stack();
        for (slot, &arg) in args.iter().take(8).enumerate() {
            self.cpu.registers.set(REG_ARG0 + slot, arg);
        }
        let ra = self.exit_address;
        self.cpu.registers.set(REG_RA, ra);
        self.cpu.jump(addr)?;
        self.simulate::<true>(max_instr)?;
        Ok(self.cpu.registers.get(REG_RETVAL))
    }

    // ── teardown ──

    /// Register a callback run at machine destruction, in registration
    /// order. Callbacks must not re-enter `simulate`.
    pub fn add_destructor_callback(&mut self, callback: Box<dyn FnOnce()>) {
        self.destructor_callbacks.push(callback);
    }
}

impl<W: Xlen> Drop for Machine<W> {
    fn drop(&mut self) {
        for callback in std::mem::take(&mut self.destructor_callbacks) {
            callback();
        }
    }
}

// ── typed argument extraction ──

/// One typed system-call argument.
///
/// Implementations declare how many integer and FP argument slots the
/// type consumes and how to read it from a machine.
pub trait SysArg<W: Xlen>: Sized {
    fn int_slots() -> usize {
        1
    }

    fn fp_slots() -> usize {
        0
    }

    fn extract(machine: &Machine<W>, int_slot: usize, fp_slot: usize) -> Result<Self>;
}

macro_rules! impl_sysarg_small_int {
    ($($t:ty),+) => {
        $(
            impl<W: Xlen> SysArg<W> for $t {
                fn extract(machine: &Machine<W>, int_slot: usize, _fp_slot: usize) -> Result<Self> {
                    Ok(machine.cpu.registers.get(REG_ARG0 + int_slot).as_u64() as $t)
                }
            }
        )+
    };
}

impl_sysarg_small_int!(u8, u16, u32, i8, i16, i32);

impl<W: Xlen> SysArg<W> for u64 {
    // Two consecutive integer slots on RV32 (low word first).
    fn int_slots() -> usize {
        if W::BYTES < 8 {
            2
        } else {
            1
        }
    }

    fn extract(machine: &Machine<W>, int_slot: usize, _fp_slot: usize) -> Result<Self> {
        if W::BYTES < 8 {
            let lo = machine.cpu.registers.get(REG_ARG0 + int_slot).as_u64() & 0xFFFF_FFFF;
            let hi = machine.cpu.registers.get(REG_ARG0 + int_slot + 1).as_u64();
            Ok(lo | (hi << 32))
        } else {
            Ok(machine.cpu.registers.get(REG_ARG0 + int_slot).as_u64())
        }
    }
}

impl<W: Xlen> SysArg<W> for i64 {
    fn int_slots() -> usize {
        <u64 as SysArg<W>>::int_slots()
    }

    fn extract(machine: &Machine<W>, int_slot: usize, fp_slot: usize) -> Result<Self> {
        Ok(<u64 as SysArg<W>>::extract(machine, int_slot, fp_slot)? as i64)
    }
}

impl<W: Xlen> SysArg<W> for f32 {
    fn int_slots() -> usize {
        0
    }

    fn fp_slots() -> usize {
        1
    }

    fn extract(machine: &Machine<W>, _int_slot: usize, fp_slot: usize) -> Result<Self> {
        Ok(machine.cpu.registers.getfl(REG_FA0 + fp_slot).float())
    }
}

impl<W: Xlen> SysArg<W> for f64 {
    fn int_slots() -> usize {
        0
    }

    fn fp_slots() -> usize {
        1
    }

    fn extract(machine: &Machine<W>, _int_slot: usize, fp_slot: usize) -> Result<Self> {
        Ok(machine.cpu.registers.getfl(REG_FA0 + fp_slot).double())
    }
}

impl<W: Xlen> SysArg<W> for String {
    fn extract(machine: &Machine<W>, int_slot: usize, _fp_slot: usize) -> Result<Self> {
        let ptr = machine.cpu.registers.get(REG_ARG0 + int_slot);
        machine.memory.memstring(ptr)
    }
}

impl<W: Xlen> SysArg<W> for Buffer {
    // Pointer then length.
    fn int_slots() -> usize {
        2
    }

    fn extract(machine: &Machine<W>, int_slot: usize, _fp_slot: usize) -> Result<Self> {
        let ptr = machine.cpu.registers.get(REG_ARG0 + int_slot);
        let len = machine.cpu.registers.get(REG_ARG0 + int_slot + 1).as_u64() as usize;
        machine.memory.rvbuffer(ptr, len)
    }
}

/// A tuple of typed system-call arguments.
pub trait SysArgs<W: Xlen>: Sized {
    fn extract(machine: &Machine<W>) -> Result<Self>;
}

macro_rules! impl_sysargs_tuple {
    ($($t:ident),+) => {
        impl<W: Xlen, $($t: SysArg<W>),+> SysArgs<W> for ($($t,)+) {
            #[allow(unused_assignments)]
            fn extract(machine: &Machine<W>) -> Result<Self> {
                let mut int_slot = 0usize;
                let mut fp_slot = 0usize;
                Ok(($(
                    {
                        let value = $t::extract(machine, int_slot, fp_slot)?;
                        int_slot += $t::int_slots();
                        fp_slot += $t::fp_slots();
                        value
                    },
                )+))
            }
        }
    };
}

impl_sysargs_tuple!(A);
impl_sysargs_tuple!(A, B);
impl_sysargs_tuple!(A, B, C);
impl_sysargs_tuple!(A, B, C, D);
impl_sysargs_tuple!(A, B, C, D, E);
impl_sysargs_tuple!(A, B, C, D, E, F);
impl_sysargs_tuple!(A, B, C, D, E, F, G);
