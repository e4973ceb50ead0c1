// Interrupt Descriptor Table: CPU exceptions, PIC lines, and the int 0x80
// system-call gate.

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use super::frame::TrapFrame;
use crate::{
    irq::IrqNumber,
    trap::{self, TrapCause, TrapDisposition},
};

/// First vector of the remapped master PIC.
pub const PIC_VECTOR_BASE: u8 = 32;

/// Software-interrupt vector for system calls.
pub const SYSCALL_VECTOR: u8 = 0x80;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.alignment_check.set_handler_fn(alignment_check_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        // SAFETY: the IST index refers to the double-fault stack installed
        // by gdt::init(); the syscall stub below is a valid gate target that
        // ends in iretq.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(super::gdt::DOUBLE_FAULT_IST_INDEX);
            idt[SYSCALL_VECTOR]
                .set_handler_addr(x86_64::VirtAddr::new(syscall_gate as usize as u64));
        }
        idt[PIC_VECTOR_BASE + crate::config::TIMER_IRQ as u8].set_handler_fn(timer_irq_handler);
        idt[PIC_VECTOR_BASE + crate::config::UART_IRQ as u8].set_handler_fn(uart_irq_handler);
        idt
    };
}

pub fn init() {
    IDT.load();
}

fn frame_of(stack_frame: &InterruptStackFrame) -> TrapFrame {
    TrapFrame::new(
        stack_frame.instruction_pointer.as_u64(),
        stack_frame.code_segment.0 as u64,
        stack_frame.cpu_flags.bits(),
        stack_frame.stack_pointer.as_u64(),
        stack_frame.stack_segment.0 as u64,
    )
}

fn run(frame: &mut TrapFrame, cause: TrapCause) {
    match trap::handle(frame, cause) {
        TrapDisposition::FaultHandled => {}
        TrapDisposition::Terminate(reason) => crate::sched::kill_current(reason),
        TrapDisposition::Reschedule => crate::sched::preempt(),
    }
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    let mut frame = frame_of(&stack_frame);
    run(&mut frame, TrapCause::Breakpoint);
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    let mut frame = frame_of(&stack_frame);
    run(&mut frame, TrapCause::InvalidInstruction);
}

extern "x86-interrupt" fn alignment_check_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    let mut frame = frame_of(&stack_frame);
    frame.error_code = error_code;
    run(&mut frame, TrapCause::Alignment);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    let mut frame = frame_of(&stack_frame);
    frame.error_code = error_code.bits();
    frame.fault_addr = Cr2::read().map(|a| a.as_u64()).unwrap_or(0);
    run(
        &mut frame,
        TrapCause::PageFault {
            addr: frame.fault_addr as usize,
            write: error_code.contains(PageFaultErrorCode::CAUSED_BY_WRITE),
        },
    );
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    let mut frame = frame_of(&stack_frame);
    frame.error_code = error_code;
    run(&mut frame, TrapCause::Other(0xD));
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn timer_irq_handler(_stack_frame: InterruptStackFrame) {
    crate::irq::handle_vectored(IrqNumber::new(crate::config::TIMER_IRQ));
    if crate::sched::need_resched() {
        crate::sched::preempt();
    }
}

extern "x86-interrupt" fn uart_irq_handler(_stack_frame: InterruptStackFrame) {
    crate::irq::handle_vectored(IrqNumber::new(crate::config::UART_IRQ));
}

// ---------------------------------------------------------------------------
// int 0x80 system-call gate
// ---------------------------------------------------------------------------

/// Register block the syscall gate stub pushes. Convention: rax = number,
/// rdi/rsi/rdx/r10/r8/r9 = arguments, result returned in rax.
#[repr(C)]
pub struct SyscallRegs {
    pub rax: u64, // 0x00
    pub rdi: u64, // 0x08
    pub rsi: u64, // 0x10
    pub rdx: u64, // 0x18
    pub r10: u64, // 0x20
    pub r8: u64,  // 0x28
    pub r9: u64,  // 0x30
    pub rcx: u64, // 0x38
    pub r11: u64, // 0x40
}

#[no_mangle]
extern "C" fn x86_64_syscall_handler(regs: &mut SyscallRegs) {
    let nr = regs.rax as usize;
    let args = [
        regs.rdi as usize,
        regs.rsi as usize,
        regs.rdx as usize,
        regs.r10 as usize,
        regs.r8 as usize,
        regs.r9 as usize,
    ];
    regs.rax = crate::syscall::dispatch(nr, args) as u64;
}

extern "C" {
    fn syscall_gate();
}

// The gate saves every caller-visible scratch register, hands the block to
// the Rust handler, and restores it around iretq. Callee-saved registers
// survive the Rust call by ABI.
core::arch::global_asm!(
    ".global syscall_gate",
    "syscall_gate:",
    "    push r11",
    "    push rcx",
    "    push r9",
    "    push r8",
    "    push r10",
    "    push rdx",
    "    push rsi",
    "    push rdi",
    "    push rax",
    "    mov rdi, rsp",
    "    call x86_64_syscall_handler",
    "    pop rax",
    "    pop rdi",
    "    pop rsi",
    "    pop rdx",
    "    pop r10",
    "    pop r8",
    "    pop r9",
    "    pop rcx",
    "    pop r11",
    "    iretq",
);
