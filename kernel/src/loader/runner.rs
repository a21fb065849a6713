//! Program runner: launch, exit, fault recovery, `execve`.
//!
//! One user program runs at a time. All control state lives in a single
//! [`RunnerState`] the dispatcher and the trampolines share; its
//! liveness invariant (`saved_esp != 0 && resume_eip != 0` exactly while
//! a program runs) is what lets the fault path tell "fault in user"
//! (recover) from "fault in kernel" (halt).

#![allow(dead_code)]

use super::image::LoadedImage;
use super::stack::{build_initial_stack, AuxInfo};
use super::trampoline;
use crate::config::{USER_STACK_BASE, USER_STACK_SIZE};
use crate::interrupts::pic;
use crate::loader::elf::ElfError;
use crate::vfs::ramfs;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

/// Program load failures; all recoverable (the shell reports and
/// continues).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The file (or its interpreter) does not exist.
    NotFound,
    /// Header or segment validation failed.
    BadElf(ElfError),
    /// The kernel heap could not hold the image.
    OutOfMemory,
    /// The argv/envp/auxv frame did not fit the stack window.
    StackTooLarge,
    /// `exec` was requested with no program live.
    NoProgram,
}

impl From<ElfError> for LoadError {
    fn from(err: ElfError) -> Self {
        LoadError::BadElf(err)
    }
}

/// Runner control state.
///
/// `#[repr(C)]` with a fixed field order: the trampolines address the
/// fields through the exported `RUNNER_STATE` symbol at offsets
/// 0/4/8/12/16/20 (see `trampoline.rs`).
#[repr(C)]
pub struct RunnerState {
    saved_esp: AtomicU32,
    saved_ebp: AtomicU32,
    exit_esp: AtomicU32,
    exit_ebp: AtomicU32,
    resume_eip: AtomicU32,
    exit_requested: AtomicU32,
}

impl RunnerState {
    pub const fn new() -> Self {
        RunnerState {
            saved_esp: AtomicU32::new(0),
            saved_ebp: AtomicU32::new(0),
            exit_esp: AtomicU32::new(0),
            exit_ebp: AtomicU32::new(0),
            resume_eip: AtomicU32::new(0),
            exit_requested: AtomicU32::new(0),
        }
    }

    /// True exactly while a user program is running.
    pub fn is_live(&self) -> bool {
        self.saved_esp.load(Ordering::SeqCst) != 0
            && self.resume_eip.load(Ordering::SeqCst) != 0
    }

    /// Raise the exit flag (syscall side).
    pub fn request_exit(&self) {
        self.exit_requested.store(1, Ordering::SeqCst);
    }

    /// Consume the exit flag (dispatcher side).
    pub fn take_exit_request(&self) -> bool {
        self.exit_requested.swap(0, Ordering::SeqCst) == 1
    }

    /// Move the live snapshot into the exit slots and clear liveness.
    ///
    /// After this the trampolines own the only copies; the shell must
    /// never observe `saved_esp != 0` again for this program.
    pub fn stage_exit(&self) {
        self.exit_esp
            .store(self.saved_esp.swap(0, Ordering::SeqCst), Ordering::SeqCst);
        self.exit_ebp
            .store(self.saved_ebp.swap(0, Ordering::SeqCst), Ordering::SeqCst);
    }

    /// Zero everything; called once control is back in the runner.
    pub fn clear(&self) {
        self.saved_esp.store(0, Ordering::SeqCst);
        self.saved_ebp.store(0, Ordering::SeqCst);
        self.exit_esp.store(0, Ordering::SeqCst);
        self.exit_ebp.store(0, Ordering::SeqCst);
        self.resume_eip.store(0, Ordering::SeqCst);
        self.exit_requested.store(0, Ordering::SeqCst);
    }

    /// Mirror of the store sequence `launch_image` performs in
    /// assembly; the runner itself never arms the state from Rust.
    pub fn arm(&self, esp: u32, ebp: u32, resume: u32) {
        self.saved_esp.store(esp, Ordering::SeqCst);
        self.saved_ebp.store(ebp, Ordering::SeqCst);
        self.resume_eip.store(resume, Ordering::SeqCst);
    }

    pub fn saved_esp(&self) -> u32 {
        self.saved_esp.load(Ordering::SeqCst)
    }

    pub fn exit_esp(&self) -> u32 {
        self.exit_esp.load(Ordering::SeqCst)
    }

    pub fn exit_ebp(&self) -> u32 {
        self.exit_ebp.load(Ordering::SeqCst)
    }

    pub fn resume_eip(&self) -> u32 {
        self.resume_eip.load(Ordering::SeqCst)
    }
}

/// The one runner state; `no_mangle` so the trampolines can address it.
#[no_mangle]
pub static RUNNER_STATE: RunnerState = RunnerState::new();

/// Dispatcher access point.
pub fn state() -> &'static RunnerState {
    &RUNNER_STATE
}

/// Syscall-side exit request (`exit` / `exit_group`).
pub fn request_exit() {
    RUNNER_STATE.request_exit();
}

/// Images of the running program (program first, then its interpreter
/// when one was loaded). Freed on return to the shell.
static ACTIVE_IMAGES: spin::Mutex<Vec<LoadedImage>> = spin::Mutex::new(Vec::new());

/// A staged `execve`: images already loaded and validated, argv/envp
/// already copied into kernel strings.
struct ExecRequest {
    path: String,
    images: Vec<LoadedImage>,
    argv: Vec<String>,
    envp: Vec<String>,
}

/// `execve` hand-off between the syscall context and the runner.
static PENDING_EXEC: spin::Mutex<Option<ExecRequest>> = spin::Mutex::new(None);

/// Load and run a program; returns when it (or whatever it `execve`d
/// into) exits or faults.
pub fn run(path: &str) -> Result<(), LoadError> {
    let mut images = load_program(path)?;
    let mut argv: Vec<String> = alloc::vec!["loader".to_string(), path.to_string()];
    let mut envp: Vec<String> = Vec::new();
    // Loader convention: argv[0] is the loader itself, argv[1] names
    // the program (and AT_EXECFN).
    let mut execfn_index = 1;

    loop {
        let entry = images.last().map(|image| image.entry).ok_or(LoadError::NotFound)?;
        let argv_refs: Vec<&str> = argv.iter().map(String::as_str).collect();
        let envp_refs: Vec<&str> = envp.iter().map(String::as_str).collect();
        let esp = build_user_stack(&images, &argv_refs, &envp_refs, execfn_index)?;

        log::info!("entering user program at {:#x}, user esp {:#x}", entry, esp);
        *ACTIVE_IMAGES.lock() = images;

        // No device interrupts while user code runs; the syscall gate
        // and CPU exceptions are the only ways back in.
        pic::mask_all();
        unsafe {
            trampoline::launch_image(entry, esp);
        }

        // Back from the exit or fault trampoline, on the kernel stack.
        ACTIVE_IMAGES.lock().clear();
        RUNNER_STATE.clear();
        crate::port::enable_interrupts();

        // An execve staged by the syscall layer restarts the loop with
        // the replacement image; anything else is a real exit.
        match PENDING_EXEC.lock().take() {
            Some(request) => {
                log::info!("execve: replacing program with {}", request.path);
                images = request.images;
                argv = if request.argv.is_empty() {
                    alloc::vec![request.path]
                } else {
                    request.argv
                };
                envp = request.envp;
                execfn_index = 0;
            }
            None => break,
        }
    }

    log::info!("returned to shell from {}", path);
    Ok(())
}

/// `execve` entry, called from syscall context.
///
/// The images are loaded and validated here so failure can still be
/// reported to the caller (`-ENOENT`). On success the request is
/// parked and the exit flag raised: the dispatcher sends the `iret`
/// through the exit trampoline, and [`run`], back on the kernel
/// stack with the user window quiescent, builds the new initial
/// stack and relaunches. The syscall's return value is never observed.
pub fn exec(path: &str, argv: &[String], envp: &[String]) -> Result<(), LoadError> {
    if !RUNNER_STATE.is_live() {
        return Err(LoadError::NoProgram);
    }

    let images = load_program(path)?;
    *PENDING_EXEC.lock() = Some(ExecRequest {
        path: path.to_string(),
        images,
        argv: argv.to_vec(),
        envp: envp.to_vec(),
    });
    RUNNER_STATE.request_exit();
    Ok(())
}

/// Read the binary (and its interpreter, if any) into loaded images.
fn load_program(path: &str) -> Result<Vec<LoadedImage>, LoadError> {
    let data = ramfs::with_fs(|fs| fs.read_file(path)).map_err(|_| LoadError::NotFound)?;
    let program = LoadedImage::load(&data)?;

    let mut images = Vec::with_capacity(2);
    let interpreter = program.interpreter.clone();
    images.push(program);

    if let Some(interp_path) = interpreter {
        log::info!("binary requests interpreter {}", interp_path);
        let interp_data = ramfs::with_fs(|fs| fs.read_file(&interp_path))
            .map_err(|_| LoadError::NotFound)?;
        images.push(LoadedImage::load(&interp_data)?);
    }
    Ok(images)
}

/// Lay out the initial stack in the fixed user window.
fn build_user_stack(
    images: &[LoadedImage],
    argv: &[&str],
    envp: &[&str],
    execfn_index: usize,
) -> Result<u32, LoadError> {
    let program = &images[0];
    let aux = AuxInfo {
        phdr: program.phdr_addr,
        phent: program.phentsize as u32,
        phnum: program.phnum as u32,
        entry: program.entry,
        base: images.get(1).map(|interp| interp.base_addr()).unwrap_or(0),
        execfn_index,
    };

    // The window is fixed and otherwise unused; building in place is
    // safe because no program is executing while we are here.
    let window = unsafe {
        core::slice::from_raw_parts_mut(USER_STACK_BASE as *mut u8, USER_STACK_SIZE as usize)
    };
    build_initial_stack(window, USER_STACK_BASE, argv, envp, &aux)
        .ok_or(LoadError::StackTooLarge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_state_is_not_live() {
        let state = RunnerState::new();
        assert!(!state.is_live());
        assert_eq!(state.saved_esp(), 0);
        assert_eq!(state.resume_eip(), 0);
    }

    #[test]
    fn test_exit_path_symmetry() {
        let state = RunnerState::new();
        state.arm(0x001F_F000, 0x001F_F010, 0x0010_1234);
        assert!(state.is_live());

        state.request_exit();
        assert!(state.take_exit_request());
        // The flag is one-shot.
        assert!(!state.take_exit_request());

        state.stage_exit();
        // Liveness drops before the shell can observe control again.
        assert!(!state.is_live());
        assert_eq!(state.saved_esp(), 0);
        assert_eq!(state.exit_esp(), 0x001F_F000);
        assert_eq!(state.exit_ebp(), 0x001F_F010);
        // The resumption point survives for the trampoline.
        assert_eq!(state.resume_eip(), 0x0010_1234);

        state.clear();
        assert_eq!(state.exit_esp(), 0);
        assert_eq!(state.resume_eip(), 0);
        assert!(!state.is_live());
    }

    #[test]
    fn test_fault_path_uses_same_staging() {
        // The fault path reuses stage_exit; a second program must see
        // clean state.
        let state = RunnerState::new();
        state.arm(0xAAAA, 0xBBBB, 0xCCCC);
        state.stage_exit();
        state.clear();

        state.arm(0xAAAA, 0xBBBB, 0xCCCC);
        assert!(state.is_live());
        assert_eq!(state.exit_esp(), 0);
    }

    #[test]
    fn test_state_field_offsets_match_trampolines() {
        assert_eq!(core::mem::offset_of!(RunnerState, saved_esp), 0);
        assert_eq!(core::mem::offset_of!(RunnerState, saved_ebp), 4);
        assert_eq!(core::mem::offset_of!(RunnerState, exit_esp), 8);
        assert_eq!(core::mem::offset_of!(RunnerState, exit_ebp), 12);
        assert_eq!(core::mem::offset_of!(RunnerState, resume_eip), 16);
        assert_eq!(core::mem::offset_of!(RunnerState, exit_requested), 20);
    }
}
