//! Interactive shell over the serial console.
//!
//! The shell is an ordinary kernel task riding on the syscall surface:
//! console I/O goes through the stdio descriptors, file manipulation
//! through the filesystem calls. Redirection is resolved by the parser and
//! carried on the [`ShellContext`] -- commands consult
//! `output_redirect_path` instead of re-scanning argv.

pub mod commands;
pub mod parser;

use alloc::{
    boxed::Box,
    collections::VecDeque,
    format,
    string::{String, ToString},
    vec::Vec,
};

use crate::{
    config,
    error::KernelError,
    fs::file::{O_APPEND, O_CREAT, O_TRUNC, O_WRONLY},
    sched, syscall,
};

/// Pending output redirection, as stored on the context by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub path: String,
    pub append: bool,
}

/// A command failure: the error plus the operand it concerns. The shell
/// renders it as `error: <kind>: <context>`.
#[derive(Debug)]
pub struct CommandError {
    pub err: KernelError,
    pub context: String,
}

impl CommandError {
    pub fn new(err: KernelError, context: impl Into<String>) -> Self {
        Self {
            err,
            context: context.into(),
        }
    }

    pub fn render(&self) -> String {
        if self.context.is_empty() {
            format!("error: {}", self.err.kind_str())
        } else {
            format!("error: {}: {}", self.err.kind_str(), self.context)
        }
    }
}

pub type CommandResult = Result<(), CommandError>;

/// Shell state. Large (history ring plus buffers), so it lives on the
/// heap; the shell task owns the Box for its whole life.
pub struct ShellContext {
    /// Mirror of the task's working directory, kept for the prompt.
    pub cwd: String,
    /// Output redirection target for the command being dispatched.
    /// Written by the dispatcher, read by commands, restored afterwards.
    pub output_redirect_path: Option<Redirect>,
    /// Input redirection source, same lifecycle.
    pub input_redirect_path: Option<String>,
    /// Buffered redirect output, flushed to the target file after the
    /// command returns.
    out_buf: Vec<u8>,
    history: VecDeque<String>,
    pub last_status: i32,
    pub running: bool,
}

impl ShellContext {
    pub fn new() -> Box<Self> {
        Box::new(Self {
            cwd: sched::current_cwd(),
            output_redirect_path: None,
            input_redirect_path: None,
            out_buf: Vec::new(),
            history: VecDeque::new(),
            last_status: 0,
            running: true,
        })
    }

    /// Write command output: to the redirect buffer when a redirection is
    /// active, to stdout otherwise.
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        if self.output_redirect_path.is_some() {
            self.out_buf.extend_from_slice(bytes);
        } else {
            let _ = syscall::fs::write(crate::fs::file::STDOUT, bytes);
        }
    }

    pub fn emit(&mut self, text: &str) {
        self.emit_bytes(text.as_bytes());
    }

    pub fn emitln(&mut self, text: &str) {
        self.emit(text);
        self.emit("\n");
    }

    /// Error output always reaches the console, never the redirect.
    fn report(&mut self, text: &str) {
        let _ = syscall::fs::write(crate::fs::file::STDOUT, text.as_bytes());
        let _ = syscall::fs::write(crate::fs::file::STDOUT, b"\n");
    }

    pub fn history(&self) -> impl Iterator<Item = &String> {
        self.history.iter()
    }

    fn push_history(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if self.history.len() == config::SHELL_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(line.to_string());
    }

    /// Open the redirect target with the contract flags and write the
    /// buffered output: `O_WRONLY|O_CREAT|O_TRUNC` for `>`, plus
    /// `O_APPEND` (minus truncate) for `>>`.
    fn flush_redirect(&mut self) -> Result<(), CommandError> {
        let Some(redirect) = self.output_redirect_path.clone() else {
            return Ok(());
        };
        let flags = if redirect.append {
            O_WRONLY | O_CREAT | O_APPEND
        } else {
            O_WRONLY | O_CREAT | O_TRUNC
        };
        let map = |e: KernelError| CommandError::new(e, redirect.path.clone());
        let fd = syscall::fs::open(&redirect.path, flags, 0o644).map_err(map)?;
        let buf = core::mem::take(&mut self.out_buf);
        let result = syscall::fs::write(fd, &buf).map(|_| ()).map_err(map);
        let _ = syscall::fs::close(fd);
        result
    }

    /// Parse and run one input line; returns the exit status.
    pub fn run_line(&mut self, line: &str) -> i32 {
        let parsed = match parser::parse_line(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                let msg = format!("error: invalid argument: {}", e.message());
                self.report(&msg);
                self.last_status = 2;
                return self.last_status;
            }
        };
        self.push_history(line);
        if parsed.argv.is_empty() {
            // An empty line (or a pure redirection) is a no-op.
            return self.last_status;
        }

        // Install the redirection for the duration of the command and
        // restore the previous value afterwards.
        let prev_out = self.output_redirect_path.take();
        let prev_in = self.input_redirect_path.take();
        self.output_redirect_path = parsed
            .redirect_out
            .map(|(path, append)| Redirect { path, append });
        self.input_redirect_path = parsed.redirect_in;
        self.out_buf.clear();

        let status = self.dispatch(&parsed.argv);

        let flush = self.flush_redirect();
        self.output_redirect_path = prev_out;
        self.input_redirect_path = prev_in;
        let status = match flush {
            Ok(()) => status,
            Err(e) => {
                let msg = e.render();
                self.report(&msg);
                1
            }
        };

        self.last_status = status;
        status
    }

    fn dispatch(&mut self, argv: &[String]) -> i32 {
        let name = argv[0].as_str();
        if let Some(command) = commands::find(name) {
            return match (command.handler)(self, argv) {
                Ok(()) => 0,
                Err(e) => {
                    let msg = e.render();
                    self.report(&msg);
                    1
                }
            };
        }

        // Not a builtin: try the registered programs.
        match syscall::process::exec(name, 0) {
            Ok(_) => 0,
            Err(KernelError::NotFound { .. }) => {
                let msg = format!("{}: command not found", name);
                self.report(&msg);
                127
            }
            Err(e) => {
                let msg = CommandError::new(e, name).render();
                self.report(&msg);
                1
            }
        }
    }
}

/// What the line editor wants echoed for a keystroke.
pub enum EditResult {
    /// Keep collecting; echo `&str` (may be empty).
    Pending(&'static str),
    /// Echo the typed character itself.
    PendingEcho(char),
    /// Line complete (newline already echoed).
    Submit(String),
}

/// Line editor state: printable collection, backspace erase, CR/LF
/// normalization.
#[derive(Default)]
pub struct LineEditor {
    buf: String,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) -> EditResult {
        match byte {
            b'\r' | b'\n' => EditResult::Submit(core::mem::take(&mut self.buf)),
            // Backspace and DEL both erase.
            0x08 | 0x7F => {
                if self.buf.pop().is_some() {
                    EditResult::Pending("\x08 \x08")
                } else {
                    EditResult::Pending("")
                }
            }
            b if (0x20..0x7F).contains(&b) && self.buf.len() < config::SHELL_LINE_MAX => {
                let ch = b as char;
                self.buf.push(ch);
                EditResult::PendingEcho(ch)
            }
            // Control bytes and overlong lines are dropped.
            _ => EditResult::Pending(""),
        }
    }
}

/// Read one line from the console with echo.
fn read_line(ctx: &mut ShellContext) -> String {
    let mut editor = LineEditor::new();
    loop {
        let mut byte = [0u8; 1];
        if syscall::fs::read(crate::fs::file::STDIN, &mut byte).unwrap_or(0) == 0 {
            continue;
        }
        match editor.push(byte[0]) {
            EditResult::Pending(echo) => ctx.emit(echo),
            EditResult::PendingEcho(ch) => {
                let mut tmp = [0u8; 4];
                ctx.emit(ch.encode_utf8(&mut tmp));
            }
            EditResult::Submit(line) => {
                ctx.emit("\n");
                return line;
            }
        }
    }
}

/// Shell task entry point.
pub extern "C" fn shell_task(_arg: usize) {
    let mut ctx = ShellContext::new();
    crate::println!("MiniOS Shell v1.0");

    while ctx.running {
        ctx.cwd = sched::current_cwd();
        let prompt = format!("{}MiniOS> ", ctx.cwd);
        ctx.emit(&prompt);
        let line = read_line(&mut ctx);
        ctx.run_line(&line);
    }
    sched::exit(ctx.last_status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editor_collects_printables_and_submits() {
        let mut editor = LineEditor::new();
        for b in b"ls /tmp" {
            assert!(matches!(editor.push(*b), EditResult::PendingEcho(_)));
        }
        match editor.push(b'\r') {
            EditResult::Submit(line) => assert_eq!(line, "ls /tmp"),
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn editor_backspace_erases() {
        let mut editor = LineEditor::new();
        editor.push(b'a');
        editor.push(b'b');
        match editor.push(0x7F) {
            EditResult::Pending(echo) => assert_eq!(echo, "\x08 \x08"),
            _ => panic!("expected erase echo"),
        }
        match editor.push(b'\n') {
            EditResult::Submit(line) => assert_eq!(line, "a"),
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn editor_backspace_on_empty_is_silent() {
        let mut editor = LineEditor::new();
        match editor.push(0x08) {
            EditResult::Pending(echo) => assert_eq!(echo, ""),
            _ => panic!("expected silent"),
        }
    }

    #[test]
    fn error_rendering_matches_contract() {
        let e = CommandError::new(
            crate::error::KernelError::Fs(crate::error::FsError::NotFound),
            "/no_such_file",
        );
        assert_eq!(e.render(), "error: not found: /no_such_file");
    }

    #[test]
    fn echo_redirect_writes_file_byte_exact() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        let status = ctx.run_line("echo Hello World > /tmp/shtest-x");
        assert_eq!(status, 0);
        // `C > f` produces exactly C's console bytes in f.
        assert_eq!(
            crate::fs::read_file("/tmp/shtest-x").unwrap(),
            b"Hello World\n"
        );
        // The redirect did not stick to the context.
        assert!(ctx.output_redirect_path.is_none());
    }

    #[test]
    fn append_redirect_accumulates() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        assert_eq!(ctx.run_line("echo line1 > /tmp/shtest-f"), 0);
        assert_eq!(ctx.run_line("echo line2 >> /tmp/shtest-f"), 0);
        assert_eq!(
            crate::fs::read_file("/tmp/shtest-f").unwrap(),
            b"line1\nline2\n"
        );
    }

    #[test]
    fn truncating_redirect_replaces_content() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        ctx.run_line("echo aaaaaaaaaaaa > /tmp/shtest-t");
        ctx.run_line("echo b > /tmp/shtest-t");
        assert_eq!(crate::fs::read_file("/tmp/shtest-t").unwrap(), b"b\n");
    }

    #[test]
    fn directory_scenario_mkdir_touch_ls() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        assert_eq!(ctx.run_line("mkdir /shtest-a"), 0);
        assert_eq!(ctx.run_line("mkdir /shtest-a/b"), 0);
        assert_eq!(ctx.run_line("touch /shtest-a/b/c"), 0);
        assert_eq!(ctx.run_line("ls /shtest-a/b > /tmp/shtest-ls"), 0);
        let listing = crate::fs::read_file("/tmp/shtest-ls").unwrap();
        assert!(String::from_utf8(listing).unwrap().contains('c'));
    }

    #[test]
    fn cat_round_trip_of_two_writes() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        ctx.run_line("echo line1 > /shtest-rt");
        ctx.run_line("echo line2 >> /shtest-rt");
        assert_eq!(ctx.run_line("cat /shtest-rt > /tmp/shtest-cat"), 0);
        assert_eq!(
            crate::fs::read_file("/tmp/shtest-cat").unwrap(),
            b"line1\nline2\n"
        );
    }

    #[test]
    fn missing_file_fails_nonzero() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        let status = ctx.run_line("cat /no_such_file");
        assert_ne!(status, 0);
        assert_eq!(ctx.last_status, status);
    }

    #[test]
    fn unknown_command_is_127() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        assert_eq!(ctx.run_line("frobnicate"), 127);
    }

    #[test]
    fn empty_line_keeps_previous_status() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        ctx.run_line("cat /no_such_file");
        let status = ctx.last_status;
        assert_eq!(ctx.run_line(""), status);
    }

    #[test]
    fn pipe_reports_unsupported() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        assert_eq!(ctx.run_line("ls | sort"), 2);
    }

    #[test]
    fn history_records_lines_with_bounded_depth() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        for i in 0..config::SHELL_HISTORY + 4 {
            ctx.run_line(&format!("echo {} > /tmp/shtest-h", i));
        }
        let lines: Vec<&String> = ctx.history().collect();
        assert_eq!(lines.len(), config::SHELL_HISTORY);
        assert!(lines[0].contains("echo 4"));
    }

    #[test]
    fn quoted_argument_survives_to_file() {
        crate::fs::init();
        let mut ctx = ShellContext::new();
        ctx.run_line("echo \"two  spaces\" > /tmp/shtest-q");
        assert_eq!(
            crate::fs::read_file("/tmp/shtest-q").unwrap(),
            b"two  spaces\n"
        );
    }
}
