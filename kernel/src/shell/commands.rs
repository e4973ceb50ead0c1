//! Built-in shell commands.
//!
//! Each handler gets the shell context and argv (command name included).
//! Output goes through `ctx.emit*`, which honors the active redirection;
//! errors bubble up as [`CommandError`] and the shell prints them.

use alloc::{format, string::String, vec::Vec};

use super::{CommandError, CommandResult, ShellContext};
use crate::{
    error::KernelError,
    fs::{
        self,
        file::{O_CREAT, O_WRONLY},
        NodeType,
    },
    sched::{self, TaskState},
    syscall,
};

pub struct Command {
    pub name: &'static str,
    pub help: &'static str,
    pub handler: fn(&mut ShellContext, &[String]) -> CommandResult,
}

pub static BUILTINS: &[Command] = &[
    Command {
        name: "cd",
        help: "change working directory",
        handler: cmd_cd,
    },
    Command {
        name: "pwd",
        help: "print working directory",
        handler: cmd_pwd,
    },
    Command {
        name: "ls",
        help: "list directory contents",
        handler: cmd_ls,
    },
    Command {
        name: "cat",
        help: "print file contents",
        handler: cmd_cat,
    },
    Command {
        name: "mkdir",
        help: "create a directory",
        handler: cmd_mkdir,
    },
    Command {
        name: "rmdir",
        help: "remove an empty directory",
        handler: cmd_rmdir,
    },
    Command {
        name: "rm",
        help: "remove a file",
        handler: cmd_rm,
    },
    Command {
        name: "cp",
        help: "copy a file",
        handler: cmd_cp,
    },
    Command {
        name: "mv",
        help: "move or rename",
        handler: cmd_mv,
    },
    Command {
        name: "touch",
        help: "create an empty file",
        handler: cmd_touch,
    },
    Command {
        name: "echo",
        help: "print arguments",
        handler: cmd_echo,
    },
    Command {
        name: "clear",
        help: "clear the screen",
        handler: cmd_clear,
    },
    Command {
        name: "help",
        help: "list commands",
        handler: cmd_help,
    },
    Command {
        name: "exit",
        help: "leave the shell",
        handler: cmd_exit,
    },
    Command {
        name: "ps",
        help: "list tasks",
        handler: cmd_ps,
    },
    Command {
        name: "free",
        help: "memory usage",
        handler: cmd_free,
    },
    Command {
        name: "uname",
        help: "system information",
        handler: cmd_uname,
    },
    Command {
        name: "date",
        help: "time since boot",
        handler: cmd_date,
    },
    Command {
        name: "uptime",
        help: "seconds since boot",
        handler: cmd_uptime,
    },
    Command {
        name: "history",
        help: "recent command lines",
        handler: cmd_history,
    },
    Command {
        name: "lsdev",
        help: "list devices and drivers",
        handler: cmd_lsdev,
    },
    Command {
        name: "mount",
        help: "mount a filesystem (or list mounts)",
        handler: cmd_mount,
    },
    Command {
        name: "umount",
        help: "unmount a filesystem",
        handler: cmd_umount,
    },
    Command {
        name: "status",
        help: "last exit status",
        handler: cmd_status,
    },
];

pub fn find(name: &str) -> Option<&'static Command> {
    BUILTINS.iter().find(|c| c.name == name)
}

fn missing_operand(what: &'static str) -> CommandError {
    CommandError::new(
        KernelError::InvalidArgument {
            what: "missing operand",
        },
        what,
    )
}

fn path_err(e: KernelError, path: &str) -> CommandError {
    CommandError::new(e, path)
}

fn cmd_cd(ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let target = argv.get(1).map(String::as_str).unwrap_or("/");
    syscall::fs::chdir(target).map_err(|e| path_err(e, target))?;
    ctx.cwd = syscall::fs::getcwd();
    Ok(())
}

fn cmd_pwd(ctx: &mut ShellContext, _argv: &[String]) -> CommandResult {
    let cwd = syscall::fs::getcwd();
    ctx.emitln(&cwd);
    Ok(())
}

fn cmd_ls(ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let target = argv
        .get(1)
        .cloned()
        .unwrap_or_else(syscall::fs::getcwd);
    let abs = fs::canonicalize(&sched::current_cwd(), &target);
    let node = fs::vfs()
        .read()
        .resolve_abs(&abs)
        .map_err(|e| path_err(e, &target))?;

    if node.node_type() != NodeType::Directory {
        ctx.emitln(&target);
        return Ok(());
    }
    let entries = node.readdir().map_err(|e| path_err(e, &target))?;
    for entry in entries {
        match entry.node_type {
            NodeType::Directory => ctx.emitln(&format!("{}/", entry.name)),
            NodeType::File => ctx.emitln(&entry.name),
        }
    }
    Ok(())
}

fn cmd_cat(ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let mut sources: Vec<String> = argv[1..].to_vec();
    if sources.is_empty() {
        // `cat < file` reads the input redirection.
        match ctx.input_redirect_path.clone() {
            Some(path) => sources.push(path),
            None => return Err(missing_operand("cat")),
        }
    }
    for path in &sources {
        let abs = fs::canonicalize(&sched::current_cwd(), path);
        let data = fs::read_file(&abs).map_err(|e| path_err(e, path))?;
        ctx.emit_bytes(&data);
    }
    Ok(())
}

fn cmd_mkdir(_ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let path = argv.get(1).ok_or(missing_operand("mkdir"))?;
    syscall::fs::mkdir(path, fs::DEFAULT_DIR_MODE).map_err(|e| path_err(e, path))
}

fn cmd_rmdir(_ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let path = argv.get(1).ok_or(missing_operand("rmdir"))?;
    syscall::fs::rmdir(path).map_err(|e| path_err(e, path))
}

fn cmd_rm(_ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let path = argv.get(1).ok_or(missing_operand("rm"))?;
    syscall::fs::unlink(path).map_err(|e| path_err(e, path))
}

fn cmd_cp(_ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let src = argv.get(1).ok_or(missing_operand("cp"))?;
    let dst = argv.get(2).ok_or(missing_operand("cp"))?;
    let cwd = sched::current_cwd();
    let data =
        fs::read_file(&fs::canonicalize(&cwd, src)).map_err(|e| path_err(e, src))?;
    fs::write_file(&fs::canonicalize(&cwd, dst), &data)
        .map(|_| ())
        .map_err(|e| path_err(e, dst))
}

fn cmd_mv(ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let src = argv.get(1).ok_or(missing_operand("mv"))?;
    let dst = argv.get(2).ok_or(missing_operand("mv"))?;
    let cwd = sched::current_cwd();
    let (old_abs, new_abs) = (fs::canonicalize(&cwd, src), fs::canonicalize(&cwd, dst));
    match fs::vfs().read().rename(&old_abs, &new_abs) {
        Ok(()) => Ok(()),
        // Cross-filesystem move degrades to copy + unlink.
        Err(KernelError::Fs(crate::error::FsError::NotSupported)) => {
            cmd_cp(ctx, argv)?;
            syscall::fs::unlink(src).map_err(|e| path_err(e, src))
        }
        Err(e) => Err(path_err(e, src)),
    }
}

fn cmd_touch(_ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let path = argv.get(1).ok_or(missing_operand("touch"))?;
    let fd = syscall::fs::open(path, O_WRONLY | O_CREAT, fs::DEFAULT_FILE_MODE)
        .map_err(|e| path_err(e, path))?;
    let _ = syscall::fs::close(fd);
    Ok(())
}

fn cmd_echo(ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let line = argv[1..].join(" ");
    ctx.emitln(&line);
    Ok(())
}

fn cmd_clear(ctx: &mut ShellContext, _argv: &[String]) -> CommandResult {
    // ANSI: clear screen, cursor home.
    ctx.emit("\x1b[2J\x1b[H");
    Ok(())
}

fn cmd_help(ctx: &mut ShellContext, _argv: &[String]) -> CommandResult {
    for command in BUILTINS {
        ctx.emitln(&format!("{:<10} {}", command.name, command.help));
    }
    for program in syscall::process::program_names() {
        ctx.emitln(&format!("{:<10} (program)", program));
    }
    Ok(())
}

fn cmd_exit(ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    ctx.running = false;
    if let Some(code) = argv.get(1).and_then(|s| s.parse().ok()) {
        ctx.last_status = code;
    }
    Ok(())
}

fn state_str(state: TaskState) -> &'static str {
    match state {
        TaskState::New => "new",
        TaskState::Ready => "ready",
        TaskState::Running => "running",
        TaskState::Blocked => "blocked",
        TaskState::Zombie => "zombie",
    }
}

fn cmd_ps(ctx: &mut ShellContext, _argv: &[String]) -> CommandResult {
    ctx.emitln("  PID PRI   STATE    TICKS NAME");
    for task in sched::all_tasks() {
        ctx.emitln(&format!(
            "{:>5} {:>3} {:>8} {:>8} {}",
            task.id(),
            task.priority() as u8,
            state_str(task.state()),
            task.stats
                .runtime_ticks
                .load(core::sync::atomic::Ordering::Relaxed),
            task.name()
        ));
    }
    Ok(())
}

fn cmd_free(ctx: &mut ShellContext, _argv: &[String]) -> CommandResult {
    let frames = crate::mm::frame_allocator::stats();
    let heap = crate::mm::heap::stats();
    let page_kib = crate::mm::PAGE_SIZE / 1024;
    ctx.emitln(&format!(
        "frames: {:>8} total {:>8} free ({} KiB free)",
        frames.total_frames,
        frames.free_frames,
        frames.free_frames * page_kib
    ));
    ctx.emitln(&format!(
        "heap:   {:>8} used {:>8} peak of {} bytes",
        heap.used_bytes, heap.peak_bytes, heap.total_bytes
    ));
    Ok(())
}

fn cmd_uname(ctx: &mut ShellContext, _argv: &[String]) -> CommandResult {
    #[cfg(target_arch = "x86_64")]
    const ARCH: &str = "x86_64";
    #[cfg(target_arch = "aarch64")]
    const ARCH: &str = "aarch64";
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    const ARCH: &str = "unknown";

    ctx.emitln(&format!(
        "MiniOS {} {}",
        env!("CARGO_PKG_VERSION"),
        ARCH
    ));
    Ok(())
}

fn cmd_date(ctx: &mut ShellContext, _argv: &[String]) -> CommandResult {
    // No RTC in the core: report time since boot.
    let secs = crate::drivers::timer::uptime_secs();
    ctx.emitln(&format!(
        "boot +{:02}:{:02}:{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    ));
    Ok(())
}

fn cmd_uptime(ctx: &mut ShellContext, _argv: &[String]) -> CommandResult {
    ctx.emitln(&format!(
        "up {} seconds",
        crate::drivers::timer::uptime_secs()
    ));
    Ok(())
}

fn cmd_history(ctx: &mut ShellContext, _argv: &[String]) -> CommandResult {
    let lines: Vec<String> = ctx
        .history()
        .enumerate()
        .map(|(i, line)| format!("{:>4}  {}", i + 1, line))
        .collect();
    for line in lines {
        ctx.emitln(&line);
    }
    Ok(())
}

fn cmd_lsdev(ctx: &mut ShellContext, _argv: &[String]) -> CommandResult {
    ctx.emitln("DEVICE               TYPE       STATE        DRIVER");
    for device in crate::devices::all_devices() {
        ctx.emitln(&format!(
            "{:<20} {:<10} {:<12} {}",
            device.name(),
            format!("{:?}", device.device_type()),
            format!("{:?}", device.state()),
            device.driver_name().unwrap_or("-")
        ));
    }
    Ok(())
}

/// `mount` lists the mount table; `mount <path> [fstype]` mounts a new
/// instance there. The `sfs` type grabs the system RAM disk and formats it
/// on first use.
fn cmd_mount(ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let Some(path) = argv.get(1) else {
        let mounts = fs::vfs().read().mount_points();
        for (path, fsname) in mounts {
            ctx.emitln(&format!("{} on {}", fsname, path));
        }
        return Ok(());
    };
    let fstype = argv.get(2).map(String::as_str).unwrap_or("ramfs");

    let device = match fstype {
        #[cfg(feature = "sfs")]
        "sfs" => {
            let dev = crate::drivers::ramdisk::device().ok_or(CommandError::new(
                KernelError::NotFound { what: "ramdisk" },
                "ramdisk",
            ))?;
            if fs::sfs::mount(Some(dev.clone()), 0).is_err() {
                fs::sfs::mkfs(&dev).map_err(|e| path_err(e, path))?;
            }
            Some(dev)
        }
        _ => None,
    };

    let abs = fs::canonicalize(&sched::current_cwd(), path);
    fs::vfs()
        .write()
        .mount(&abs, fstype, device, 0)
        .map_err(|e| path_err(e, path))
}

fn cmd_umount(_ctx: &mut ShellContext, argv: &[String]) -> CommandResult {
    let path = argv.get(1).ok_or(missing_operand("umount"))?;
    let abs = fs::canonicalize(&sched::current_cwd(), path);
    fs::vfs().write().unmount(&abs).map_err(|e| path_err(e, path))
}

fn cmd_status(ctx: &mut ShellContext, _argv: &[String]) -> CommandResult {
    let status = ctx.last_status;
    ctx.emitln(&format!("{}", status));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_covers_the_contract() {
        for name in [
            "cd", "pwd", "ls", "cat", "mkdir", "rmdir", "rm", "cp", "mv", "touch", "echo",
            "clear", "help", "exit", "ps", "free", "uname", "date", "uptime",
        ] {
            assert!(find(name).is_some(), "missing builtin {}", name);
        }
        assert!(find("frobnicate").is_none());
    }

    #[test]
    fn echo_joins_arguments() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        assert_eq!(ctx.run_line("echo a b   c > /tmp/cmd-echo"), 0);
        assert_eq!(crate::fs::read_file("/tmp/cmd-echo").unwrap(), b"a b c\n");
    }

    #[test]
    fn touch_then_rm() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        assert_eq!(ctx.run_line("touch /tmp/cmd-touched"), 0);
        assert!(crate::fs::file_exists("/tmp/cmd-touched"));
        // touch of an existing file does not truncate.
        crate::fs::write_file("/tmp/cmd-touched", b"keep").unwrap();
        assert_eq!(ctx.run_line("touch /tmp/cmd-touched"), 0);
        assert_eq!(crate::fs::read_file("/tmp/cmd-touched").unwrap(), b"keep");
        assert_eq!(ctx.run_line("rm /tmp/cmd-touched"), 0);
        assert!(!crate::fs::file_exists("/tmp/cmd-touched"));
    }

    #[test]
    fn cp_copies_and_mv_moves() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        crate::fs::write_file("/tmp/cmd-src", b"payload").unwrap();
        assert_eq!(ctx.run_line("cp /tmp/cmd-src /tmp/cmd-dst"), 0);
        assert_eq!(crate::fs::read_file("/tmp/cmd-dst").unwrap(), b"payload");
        assert!(crate::fs::file_exists("/tmp/cmd-src"));

        assert_eq!(ctx.run_line("mv /tmp/cmd-dst /tmp/cmd-moved"), 0);
        assert!(!crate::fs::file_exists("/tmp/cmd-dst"));
        assert_eq!(crate::fs::read_file("/tmp/cmd-moved").unwrap(), b"payload");
    }

    #[test]
    fn mkdir_missing_operand_fails() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        assert_eq!(ctx.run_line("mkdir"), 1);
    }

    #[test]
    fn rmdir_of_nonempty_fails() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        ctx.run_line("mkdir /cmd-full");
        ctx.run_line("touch /cmd-full/x");
        assert_eq!(ctx.run_line("rmdir /cmd-full"), 1);
        ctx.run_line("rm /cmd-full/x");
        assert_eq!(ctx.run_line("rmdir /cmd-full"), 0);
    }

    #[test]
    fn uname_mentions_minios() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        assert_eq!(ctx.run_line("uname > /tmp/cmd-uname"), 0);
        let out = String::from_utf8(crate::fs::read_file("/tmp/cmd-uname").unwrap()).unwrap();
        assert!(out.starts_with("MiniOS "));
    }

    #[test]
    fn status_echoes_last_exit_code() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        ctx.run_line("cat /definitely-missing");
        assert_eq!(ctx.last_status, 1);
        assert_eq!(ctx.run_line("status > /tmp/cmd-status"), 0);
        assert_eq!(crate::fs::read_file("/tmp/cmd-status").unwrap(), b"1\n");
    }

    #[test]
    fn cat_with_input_redirect() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        crate::fs::write_file("/tmp/cmd-in", b"from stdin\n").unwrap();
        assert_eq!(ctx.run_line("cat < /tmp/cmd-in > /tmp/cmd-out"), 0);
        assert_eq!(
            crate::fs::read_file("/tmp/cmd-out").unwrap(),
            b"from stdin\n"
        );
    }

    #[test]
    fn mount_lists_root() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        assert_eq!(ctx.run_line("mount > /tmp/cmd-mounts"), 0);
        let out = String::from_utf8(crate::fs::read_file("/tmp/cmd-mounts").unwrap()).unwrap();
        assert!(out.contains("ramfs on /"));
    }

    #[test]
    fn mount_ramfs_then_umount() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        ctx.run_line("mkdir /cmd-mnt");
        assert_eq!(ctx.run_line("mount /cmd-mnt ramfs"), 0);
        assert_eq!(ctx.run_line("touch /cmd-mnt/inside"), 0);
        assert_eq!(ctx.run_line("umount /cmd-mnt"), 0);
        // The file lived on the unmounted instance.
        assert!(!crate::fs::file_exists("/cmd-mnt/inside"));
        ctx.run_line("rmdir /cmd-mnt");
    }

    #[cfg(feature = "sfs")]
    #[test]
    fn mount_sfs_formats_the_ramdisk() {
        crate::fs::init();
        crate::drivers::init();
        let mut ctx = ShellContext::new();
        ctx.run_line("mkdir /cmd-sfs");
        assert_eq!(ctx.run_line("mount /cmd-sfs sfs"), 0);
        assert_eq!(ctx.run_line("echo persisted > /cmd-sfs/on-disk"), 0);
        assert_eq!(
            crate::fs::read_file("/cmd-sfs/on-disk").unwrap(),
            b"persisted\n"
        );
        assert_eq!(ctx.run_line("umount /cmd-sfs"), 0);
        // Remounting the same disk finds the file again.
        assert_eq!(ctx.run_line("mount /cmd-sfs sfs"), 0);
        assert_eq!(
            crate::fs::read_file("/cmd-sfs/on-disk").unwrap(),
            b"persisted\n"
        );
        ctx.run_line("umount /cmd-sfs");
    }

    #[test]
    fn exit_stops_the_loop_flag() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        assert!(ctx.running);
        assert_eq!(ctx.run_line("exit"), 0);
        assert!(!ctx.running);
    }
}
