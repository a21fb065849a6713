//! System V i386 initial-stack construction.
//!
//! The window is filled from the top down: NUL-terminated strings
//! first, then a 4-byte-aligned pointer frame so the final stack
//! pointer lands on `argc`:
//!
//! ```text
//! esp → argc
//!       argv[0] … argv[n-1], NULL
//!       envp[0] … envp[m-1], NULL
//!       auxv pairs …, AT_NULL
//!       (strings live above, near the window top)
//! ```

use alloc::vec::Vec;

/// Auxiliary vector entry types.
pub mod auxv {
    /// End of auxiliary vector
    pub const AT_NULL: u32 = 0;
    /// Program headers location
    pub const AT_PHDR: u32 = 3;
    /// Size of one program header entry
    pub const AT_PHENT: u32 = 4;
    /// Number of program headers
    pub const AT_PHNUM: u32 = 5;
    /// Base address of the interpreter (0 when none is loaded)
    pub const AT_BASE: u32 = 7;
    /// Program entry point
    pub const AT_ENTRY: u32 = 9;
    /// Filename of the executed program
    pub const AT_EXECFN: u32 = 31;
}

/// Image facts the auxiliary vector advertises.
#[derive(Debug, Clone, Copy)]
pub struct AuxInfo {
    pub phdr: u32,
    pub phent: u32,
    pub phnum: u32,
    pub entry: u32,
    /// Interpreter base when one is loaded, else 0.
    pub base: u32,
    /// Which argv slot `AT_EXECFN` points at.
    pub execfn_index: usize,
}

/// Lay out the initial stack inside `window` (mapped at `window_base`).
///
/// Returns the initial stack pointer (the address of `argc`), or `None`
/// when the frame does not fit.
pub fn build_initial_stack(
    window: &mut [u8],
    window_base: u32,
    argv: &[&str],
    envp: &[&str],
    aux: &AuxInfo,
) -> Option<u32> {
    let mut top = window.len();

    // Strings first, from the top down.
    let mut argv_addrs = Vec::with_capacity(argv.len());
    for s in argv {
        top = push_str(window, top, s)?;
        argv_addrs.push(window_base + top as u32);
    }
    let mut envp_addrs = Vec::with_capacity(envp.len());
    for s in envp {
        top = push_str(window, top, s)?;
        envp_addrs.push(window_base + top as u32);
    }

    // Pointer frame, 4-byte aligned.
    top &= !3;

    let execfn = argv_addrs.get(aux.execfn_index).copied().unwrap_or(0);
    let mut words: Vec<u32> = Vec::new();
    words.push(argv.len() as u32);
    words.extend_from_slice(&argv_addrs);
    words.push(0);
    words.extend_from_slice(&envp_addrs);
    words.push(0);
    for (key, value) in [
        (auxv::AT_PHDR, aux.phdr),
        (auxv::AT_PHENT, aux.phent),
        (auxv::AT_PHNUM, aux.phnum),
        (auxv::AT_ENTRY, aux.entry),
        (auxv::AT_EXECFN, execfn),
        (auxv::AT_BASE, aux.base),
        (auxv::AT_NULL, 0),
    ] {
        words.push(key);
        words.push(value);
    }

    let frame_len = words.len() * 4;
    if frame_len > top {
        return None;
    }
    top -= frame_len;
    for (i, word) in words.iter().enumerate() {
        window[top + i * 4..top + i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }

    Some(window_base + top as u32)
}

/// Copy one NUL-terminated string downward; returns the new cursor.
fn push_str(window: &mut [u8], top: usize, s: &str) -> Option<usize> {
    let needed = s.len() + 1;
    if needed > top {
        return None;
    }
    let start = top - needed;
    window[start..start + s.len()].copy_from_slice(s.as_bytes());
    window[start + s.len()] = 0;
    Some(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec;

    const BASE: u32 = 0x0080_0000;

    fn word_at(window: &[u8], addr: u32) -> u32 {
        let idx = (addr - BASE) as usize;
        u32::from_le_bytes(window[idx..idx + 4].try_into().unwrap())
    }

    fn str_at(window: &[u8], addr: u32) -> String {
        let idx = (addr - BASE) as usize;
        let end = window[idx..].iter().position(|&b| b == 0).unwrap() + idx;
        String::from_utf8(window[idx..end].to_vec()).unwrap()
    }

    fn demo_aux() -> AuxInfo {
        AuxInfo {
            phdr: 0x0110_0034,
            phent: 32,
            phnum: 2,
            entry: 0x0110_0094,
            base: 0,
            execfn_index: 1,
        }
    }

    #[test]
    fn test_frame_shape() {
        let mut window = vec![0u8; 4096];
        let esp = build_initial_stack(
            &mut window,
            BASE,
            &["loader", "/BIN/HELLO"],
            &[],
            &demo_aux(),
        )
        .unwrap();

        assert_eq!(esp % 4, 0);
        assert_eq!(word_at(&window, esp), 2); // argc

        let argv0 = word_at(&window, esp + 4);
        let argv1 = word_at(&window, esp + 8);
        assert_eq!(str_at(&window, argv0), "loader");
        assert_eq!(str_at(&window, argv1), "/BIN/HELLO");
        assert_eq!(word_at(&window, esp + 12), 0); // argv NULL
        assert_eq!(word_at(&window, esp + 16), 0); // envp NULL (empty)
    }

    #[test]
    fn test_auxv_contents() {
        let mut window = vec![0u8; 4096];
        let aux = demo_aux();
        let esp =
            build_initial_stack(&mut window, BASE, &["loader", "/X"], &[], &aux).unwrap();

        // Skip argc, two argv slots, argv NULL, envp NULL.
        let mut cursor = esp + 5 * 4;
        let mut pairs = alloc::collections::BTreeMap::new();
        loop {
            let key = word_at(&window, cursor);
            let value = word_at(&window, cursor + 4);
            pairs.insert(key, value);
            cursor += 8;
            if key == auxv::AT_NULL {
                break;
            }
        }

        assert_eq!(pairs[&auxv::AT_PHDR], aux.phdr);
        assert_eq!(pairs[&auxv::AT_PHENT], 32);
        assert_eq!(pairs[&auxv::AT_PHNUM], 2);
        assert_eq!(pairs[&auxv::AT_ENTRY], aux.entry);
        assert_eq!(pairs[&auxv::AT_BASE], 0);
        assert_eq!(str_at(&window, pairs[&auxv::AT_EXECFN]), "/X");
    }

    #[test]
    fn test_envp_pointers() {
        let mut window = vec![0u8; 4096];
        let esp = build_initial_stack(
            &mut window,
            BASE,
            &["/BIN/SH"],
            &["TERM=ferrite", "USER=root"],
            &AuxInfo {
                execfn_index: 0,
                ..demo_aux()
            },
        )
        .unwrap();

        assert_eq!(word_at(&window, esp), 1);
        // argc, argv[0], NULL → envp starts at +12.
        let env0 = word_at(&window, esp + 12);
        let env1 = word_at(&window, esp + 16);
        assert_eq!(str_at(&window, env0), "TERM=ferrite");
        assert_eq!(str_at(&window, env1), "USER=root");
        assert_eq!(word_at(&window, esp + 20), 0);
    }

    #[test]
    fn test_window_too_small() {
        let mut window = vec![0u8; 32];
        assert!(build_initial_stack(
            &mut window,
            BASE,
            &["loader", "/some/long/path/to/a/program"],
            &[],
            &demo_aux()
        )
        .is_none());
    }
}
