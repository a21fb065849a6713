//! User-program execution pipeline.
//!
//! `elf` parses and validates ELF32 headers, `image` places the
//! segments in one kernel-heap allocation, `stack` lays out the System
//! V i386 initial stack, and `runner` owns the launch/return state
//! machine with its assembly `trampoline` helpers.

pub mod elf;
pub mod image;
pub mod runner;
pub mod stack;
pub mod trampoline;

pub use runner::LoadError;
