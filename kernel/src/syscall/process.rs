//! Process-side system calls: exit, print, getpid, sleep, exec.

use super::{buffer, copy_path, errno_or, SyscallArgs};
use crate::{
    error::{KernelError, KernelResult},
    sched::{self, Priority},
};

/// Registered kernel programs, runnable via `exec`. There is no loader in
/// this core; `/bin` names map to kernel functions.
static PROGRAMS: [(&str, extern "C" fn(usize)); 2] =
    [("hello", prog_hello), ("yes", prog_yes)];

extern "C" fn prog_hello(_arg: usize) {
    crate::println!("Hello from /bin/hello");
    sched::exit(0)
}

extern "C" fn prog_yes(arg: usize) {
    // Bounded: prints a batch and exits rather than hogging the console.
    for _ in 0..arg.clamp(1, 64) {
        crate::println!("y");
    }
    sched::exit(0)
}

/// Program names visible under /bin.
pub fn program_names() -> impl Iterator<Item = &'static str> {
    PROGRAMS.iter().map(|(name, _)| *name)
}

/// Spawn a registered program. `path` may be a bare name or a /bin path.
pub fn exec(path: &str, arg: usize) -> KernelResult<sched::TaskId> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let entry = PROGRAMS
        .iter()
        .find(|(program, _)| *program == name)
        .map(|(_, entry)| *entry)
        .ok_or(KernelError::NotFound { what: "program" })?;
    sched::spawn(entry, arg, name, Priority::Normal)
}

pub(super) fn raw_exit(args: &SyscallArgs) -> i64 {
    sched::exit(args[0] as i32)
}

pub(super) fn raw_print(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let data = buffer(args[0], args[1])?;
        match core::str::from_utf8(data) {
            Ok(text) => crate::print!("{}", text),
            Err(_) => {
                return Err(KernelError::InvalidArgument {
                    what: "print of non-UTF-8 bytes",
                })
            }
        }
        Ok(data.len() as i64)
    })())
}

pub(super) fn raw_getpid(_args: &SyscallArgs) -> i64 {
    sched::current_pid() as i64
}

pub(super) fn raw_sleep(args: &SyscallArgs) -> i64 {
    // Argument is milliseconds.
    crate::drivers::timer::sleep_us(args[0] as u64 * 1000);
    0
}

pub(super) fn raw_exec(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let path = copy_path(args[0])?;
        Ok(exec(&path, args[1])? as i64)
    })())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_program_not_found() {
        assert!(matches!(
            exec("/bin/definitely-not-here", 0).unwrap_err(),
            KernelError::NotFound { .. }
        ));
    }

    #[test]
    fn program_table_lists_hello() {
        assert!(program_names().any(|n| n == "hello"));
    }
}
