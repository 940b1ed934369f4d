//! Front-end launcher for the debugging memory allocator.
//!
//! `spec.md` §6 specifies this binary only at the interface level: it
//! accepts the same option keys the library recognizes, assembles them
//! into the library's `KEY=VALUE,KEY=VALUE` option string, sets it (and
//! optionally a preload library) in the child's environment, then
//! exec-substitutes the child command so the launcher itself leaves no
//! trace in the process tree. None of the detection logic lives here.

use std::ffi::OsString;
use std::process::{Command, ExitCode};

use clap::Parser;
use dbgalloc_core::config::{self, Config};

/// Run a command under the debugging allocator.
#[derive(Debug, Parser)]
#[command(name = "dbgalloc")]
#[command(about = "Run a command with the debugging allocator's option string and preload library set")]
struct Cli {
    /// A library option in `KEY=VALUE` form; repeatable. Uses the same
    /// keys the library's option string recognizes (see
    /// `dbgalloc_core::config::Config::apply_options`).
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Path to the shared library to preload (sets `LD_PRELOAD` on the
    /// child's environment); omit to run against a statically-linked or
    /// already-linked target.
    #[arg(long)]
    preload: Option<String>,

    /// The command to run, followed by its own arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<OsString>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let option_string = cli.options.join(",");
    if !option_string.is_empty() {
        let unknown = Config::default().apply_options(&option_string);
        for key in &unknown {
            eprintln!("dbgalloc: warning: unrecognized option key '{}'", key.0);
        }
    }

    let Some((program, args)) = cli.command.split_first() else {
        eprintln!("dbgalloc: no command given");
        return ExitCode::FAILURE;
    };

    let mut command = Command::new(program);
    command.args(args);
    if !option_string.is_empty() {
        command.env(config::ENV_VAR, &option_string);
    }
    if let Some(preload) = &cli.preload {
        command.env("LD_PRELOAD", preload);
    }

    run(command)
}

/// Exec-substitute the current process with `command` on Unix, so the
/// launcher does not linger as a parent process; fall back to a
/// spawn-and-wait with the child's exit code (high byte masked, per
/// POSIX `wait` status convention) on platforms without `exec`.
#[cfg(unix)]
fn run(mut command: Command) -> ExitCode {
    use std::os::unix::process::CommandExt;
    let err = command.exec();
    eprintln!("dbgalloc: failed to exec child command: {err}");
    ExitCode::FAILURE
}

#[cfg(not(unix))]
fn run(mut command: Command) -> ExitCode {
    match command.status() {
        Ok(status) => {
            let code = status.code().unwrap_or(1) & 0xFF;
            ExitCode::from(code as u8)
        }
        Err(err) => {
            eprintln!("dbgalloc: failed to run child command: {err}");
            ExitCode::FAILURE
        }
    }
}
