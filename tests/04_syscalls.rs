//! System-call dispatch, typed argument marshalling, guest function
//! calls, and machine teardown.

use std::sync::{Arc, Mutex};

use librvm::memory::Buffer;
use librvm::{Machine, MachineOptions};

// ── helpers ───────────────────────────────────────────────────────────────────

fn i_type(op: u32, rd: u32, f3: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

fn r_type(op: u32, rd: u32, f3: u32, rs1: u32, rs2: u32, f7: u32) -> u32 {
    (f7 << 25) | (rs2 << 20) | (rs1 << 15) | (f3 << 12) | (rd << 7) | op
}

fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    i_type(0x13, rd, 0, rs1, imm)
}

const ECALL: u32 = 0x0000_0073;
const EBREAK: u32 = 0x0010_0073;

fn asm(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn machine(words: &[u32]) -> Machine<u32> {
    Machine::new(&asm(words), MachineOptions::default()).unwrap()
}

/// A program that sets A7 and traps.
fn ecall_program(number: i32) -> Machine<u32> {
    machine(&[addi(17, 0, number), ECALL])
}

// ── dispatch ─────────────────────────────────────────────────────────────────

#[test]
fn handler_return_value_lands_in_a0() {
    fn handler(_m: &mut Machine<u32>) -> librvm::Result<u32> {
        Ok(0xBEEF)
    }
    let mut m = ecall_program(64);
    m.install_syscall_handler(64, handler);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(10), 0xBEEF);
}

#[cfg(not(feature = "throw-on-unhandled-syscall"))]
#[test]
fn unhandled_syscall_returns_enosys() {
    let mut m = ecall_program(99);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(10), (-38i32) as u32);
}

#[cfg(feature = "throw-on-unhandled-syscall")]
#[test]
fn unhandled_syscall_raises_in_strict_builds() {
    let mut m = ecall_program(99);
    let err = m.simulate::<true>(2).unwrap_err();
    assert_eq!(err.kind, librvm::ExceptionKind::UnhandledSyscall);
    assert_eq!(err.data, 99);
}

#[cfg(not(feature = "throw-on-unhandled-syscall"))]
#[test]
fn unhandled_syscall_callback_observes_the_number() {
    fn fallback(m: &mut Machine<u32>, number: usize) {
        let bytes = (number as u32).to_le_bytes();
        m.copy_to_guest(0x7000, &bytes).unwrap();
    }
    let mut m = ecall_program(99);
    m.set_on_unhandled_syscall(fallback);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.memory.read_u32(0x7000).unwrap(), 99);
}

#[test]
fn handler_range_installation() {
    fn h0(_m: &mut Machine<u32>) -> librvm::Result<u32> {
        Ok(100)
    }
    fn h1(_m: &mut Machine<u32>) -> librvm::Result<u32> {
        Ok(101)
    }
    let mut m = ecall_program(201);
    m.install_syscall_handler_range(200, &[h0, h1]);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(10), 101);
}

#[cfg(not(feature = "ebreak-means-stop"))]
#[test]
fn ebreak_does_not_clobber_a0() {
    fn handler(m: &mut Machine<u32>) -> librvm::Result<u32> {
        m.stop(true);
        Ok(0x9999)
    }
    let mut m = machine(&[addi(10, 0, 0x123), EBREAK]);
    m.install_syscall_handler(0, handler);
    m.simulate::<false>(10).unwrap();
    assert!(m.stopped());
    assert_eq!(m.cpu.registers.get(10), 0x123);
}

#[cfg(feature = "ebreak-means-stop")]
#[test]
fn ebreak_stops_the_machine() {
    let mut m = machine(&[addi(10, 0, 0x123), EBREAK]);
    m.simulate::<false>(10).unwrap();
    assert!(m.stopped());
    assert_eq!(m.instruction_counter(), 2);
}

// ── typed arguments ──────────────────────────────────────────────────────────

#[test]
fn sysargs_mixed_tuple() {
    fn handler(m: &mut Machine<u32>) -> librvm::Result<u32> {
        let (a, s, d): (u32, String, f64) = m.sysargs()?;
        assert_eq!(s, "hello");
        Ok(a + s.len() as u32 + d as u32)
    }
    let mut m = ecall_program(70);
    m.install_syscall_handler(70, handler);
    let ptr = m.stack_push_str("hello").unwrap();
    m.cpu.registers.set(10, 5);
    m.cpu.registers.set(11, ptr);
    m.cpu.registers.getfl_mut(10).set_double(2.0);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(10), 5 + 5 + 2);
}

#[test]
fn u64_argument_spans_two_slots_on_rv32() {
    fn handler(m: &mut Machine<u32>) -> librvm::Result<u32> {
        let v: u64 = m.sysarg(0)?;
        assert_eq!(v, 0x1234_5678_DEAD_BEEF);
        Ok((v >> 32) as u32)
    }
    let mut m = ecall_program(71);
    m.install_syscall_handler(71, handler);
    m.cpu.registers.set(10, 0xDEAD_BEEF);
    m.cpu.registers.set(11, 0x1234_5678);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(10), 0x1234_5678);
}

#[test]
fn buffer_argument_consumes_pointer_and_length() {
    fn handler(m: &mut Machine<u32>) -> librvm::Result<u32> {
        let (buf,): (Buffer,) = m.sysargs()?;
        Ok(buf.as_slice().iter().map(|&b| b as u32).sum())
    }
    let mut m = ecall_program(72);
    m.install_syscall_handler(72, handler);
    m.copy_to_guest(0x6000, &[1, 2, 3, 4]).unwrap();
    m.cpu.registers.set(10, 0x6000);
    m.cpu.registers.set(11, 4);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(10), 10);
}

#[test]
fn pod_argument_copies_out_of_guest_memory() {
    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Point {
        x: u32,
        y: u32,
    }

    fn handler(m: &mut Machine<u32>) -> librvm::Result<u32> {
        let p: Point = m.sysarg_value(0)?;
        Ok(p.x + p.y)
    }
    let mut m = ecall_program(73);
    m.install_syscall_handler(73, handler);
    m.copy_to_guest(0x6100, bytemuck::bytes_of(&Point { x: 40, y: 2 }))
        .unwrap();
    m.cpu.registers.set(10, 0x6100);
    m.simulate::<false>(2).unwrap();
    assert_eq!(m.cpu.registers.get(10), 42);
}

// ── guest function calls ─────────────────────────────────────────────────────

#[test]
fn vmcall_round_trip() {
    fn exit_handler(m: &mut Machine<u32>) -> librvm::Result<u32> {
        m.stop(true);
        Ok(m.cpu.registers.get(10))
    }
    // Guest function: add a0, a0, a1; ret.
    let mut m = machine(&[r_type(0x33, 10, 0, 10, 11, 0), i_type(0x67, 0, 0, 1, 0)]);
    // Exit trap: addi a7, x0, 93; ecall.
    m.copy_to_guest(0x2000, &asm(&[addi(17, 0, 93), ECALL])).unwrap();
    m.install_syscall_handler(93, exit_handler);
    m.set_exit_address(0x2000);
    let ret = m.vmcall(0x1000, &[7, 35], 100).unwrap();
    assert_eq!(ret, 42);
}

// ── teardown ─────────────────────────────────────────────────────────────────

#[test]
fn destructor_callbacks_run_in_registration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut m = machine(&[]);
    let first = Arc::clone(&order);
    m.add_destructor_callback(Box::new(move || first.lock().unwrap().push(1)));
    let second = Arc::clone(&order);
    m.add_destructor_callback(Box::new(move || second.lock().unwrap().push(2)));
    drop(m);
    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
}
