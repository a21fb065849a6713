//! Assembly glue for launching a program and for returning to the
//! kernel without unwinding.
//!
//! `launch_image` arms the [`RunnerState`](super::runner::RunnerState)
//! (kernel `esp`/`ebp` snapshot plus the resumption address), switches
//! to the user stack and jumps to the entry point. A plain call-stack
//! return is unsupported: control comes back only through one of the
//! trampolines, which the interrupt dispatcher installs as the `iret`
//! target. Each trampoline reloads the saved kernel `esp`/`ebp` with
//! interrupts disabled and jumps to the resumption address inside
//! `launch_image`, which then returns normally to its Rust caller.
//!
//! Field offsets into the exported `RUNNER_STATE` symbol:
//!
//! |  0 | saved_esp  |  8 | exit_esp  | 16 | resume_eip     |
//! |  4 | saved_ebp  | 12 | exit_ebp  | 20 | exit_requested |

use core::arch::global_asm;

global_asm!(
    r#"
    .code32

    .global launch_image
launch_image:
    push ebp
    mov ebp, esp
    push ebx
    push esi
    push edi

    mov eax, [ebp + 8]              # entry point
    mov edx, [ebp + 12]             # initial user stack pointer

    # Arm the runner state: live snapshot + resumption point.
    mov [RUNNER_STATE], esp         # saved_esp
    mov [RUNNER_STATE + 4], ebp     # saved_ebp
    lea ecx, [resume_from_program]
    mov [RUNNER_STATE + 16], ecx    # resume_eip

    # One-way transfer: a call would push a return address on top of
    # the argc word the program expects at its stack pointer.
    mov esp, edx
    sti
    jmp eax

resume_from_program:
    # Entered from a trampoline with kernel esp/ebp already restored.
    cld
    pop edi
    pop esi
    pop ebx
    pop ebp
    ret

    .global exit_trampoline
exit_trampoline:
    cli
    mov esp, [RUNNER_STATE + 8]     # exit_esp
    mov ebp, [RUNNER_STATE + 12]    # exit_ebp
    mov eax, [RUNNER_STATE + 16]    # resume_eip
    jmp eax

    .global fault_trampoline
fault_trampoline:
    cli
    mov esp, [RUNNER_STATE + 8]
    mov ebp, [RUNNER_STATE + 12]
    mov eax, [RUNNER_STATE + 16]
    jmp eax
"#
);

extern "C" {
    /// Enter a loaded image. Returns when the program exits or faults.
    pub fn launch_image(entry: u32, user_esp: u32);

    fn exit_trampoline();
    fn fault_trampoline();
}

/// Address the dispatcher installs as the `iret` target on `exit`.
pub fn exit_trampoline_addr() -> u32 {
    exit_trampoline as usize as u32
}

/// Address the dispatcher installs as the `iret` target on a fault.
pub fn fault_trampoline_addr() -> u32 {
    fault_trampoline as usize as u32
}
