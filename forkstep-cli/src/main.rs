//! Forkstep CLI - コマンドラインインターフェース
//!
//! ブレークポイントで制御する2つのカウンタプロセスを使って、
//! 更新の消失を再現・観察するためのツール

mod command;

use anyhow::Result;
use clap::{Parser, Subcommand};
use command::{Command, Target};
use file_counter::{counter_process, read_counter, synced_race};
use forkstep_core::{Controller, WaitHandle};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Forkstep - deterministic interleaving of forked processes
#[derive(Parser)]
#[command(name = "forkstep")]
#[command(version)]
#[command(about = "Drive forked processes through named breakpoints", long_about = None)]
struct Cli {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Reproduce the two-process counter race and print the final value
    Race {
        /// Counter file (a temporary file is used when omitted)
        #[arg(long)]
        counter: Option<PathBuf>,

        /// Increment without taking the file lock
        #[arg(long)]
        no_lock: bool,

        /// Milliseconds to let the second process block on the lock
        #[arg(long, default_value_t = 100)]
        settle_ms: u64,
    },

    /// Drive two counter processes interactively
    Repl {
        /// Counter file (a temporary file is used when omitted)
        #[arg(long)]
        counter: Option<PathBuf>,

        /// Increment without taking the file lock
        #[arg(long)]
        no_lock: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Mode::Race {
            counter,
            no_lock,
            settle_ms,
        } => run_race(counter, !no_lock, Duration::from_millis(settle_ms)),
        Mode::Repl { counter, no_lock } => run_repl(counter, !no_lock),
    }
}

/// ログ出力を初期化する
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// カウンタファイルのパスを決める
///
/// 指定がなければ一時ディレクトリを作成し、そのガードも返します。
fn counter_path(counter: Option<PathBuf>) -> Result<(PathBuf, Option<tempfile::TempDir>)> {
    match counter {
        Some(path) => Ok((path, None)),
        None => {
            let tmpdir = tempfile::tempdir()?;
            Ok((tmpdir.path().join("counter"), Some(tmpdir)))
        }
    }
}

/// Raceサブコマンドを処理する
fn run_race(counter: Option<PathBuf>, use_lock: bool, settle: Duration) -> Result<()> {
    let (path, _guard) = counter_path(counter)?;
    let start = if path.exists() { read_counter(&path)? } else { 0 };

    println!("Counter file: {}", path.display());
    println!("Locking: {}", if use_lock { "enabled" } else { "disabled" });

    let value = synced_race(&path, use_lock, settle)?;
    println!("Counter: {} -> {} (expected {})", start, value, start + 2);
    if value != start + 2 {
        println!("Lost update reproduced");
    }
    Ok(())
}

/// REPLで操作する2つのプロセス
struct ReplSession {
    path: PathBuf,
    use_lock: bool,
    processes: [Controller; 2],
    handles: [Option<WaitHandle>; 2],
}

impl ReplSession {
    fn new(path: PathBuf, use_lock: bool) -> Self {
        let processes = [
            counter_process("p1", &path, use_lock),
            counter_process("p2", &path, use_lock),
        ];
        Self {
            path,
            use_lock,
            processes,
            handles: [None, None],
        }
    }

    /// プロセスを作り直し、カウンタを0に戻す
    fn reset(&mut self) -> Result<()> {
        // 旧プロセスはドロップ時に強制終了される
        *self = Self::new(self.path.clone(), self.use_lock);
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// REPLループを実行する
fn run_repl(counter: Option<PathBuf>, use_lock: bool) -> Result<()> {
    let (path, _guard) = counter_path(counter)?;
    let mut session = ReplSession::new(path, use_lock);

    println!("Forkstep - counter race REPL");
    println!("Counter file: {}", session.path.display());
    println!("Locking: {}", if use_lock { "enabled" } else { "disabled" });
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(forkstep) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match Command::parse(line) {
                    Some(Command::Quit) => {
                        println!("Goodbye!");
                        break;
                    }
                    Some(command) => {
                        if let Err(e) = handle_command(&mut session, command) {
                            eprintln!("Error: {}", e);
                        }
                    }
                    None => {
                        println!("Unknown command: {}", line);
                        println!("Type 'help' for available commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

fn handle_command(session: &mut ReplSession, command: Command) -> Result<()> {
    match command {
        Command::Until(target, label) => {
            let handle = session.processes[target.index()].run_until(label.as_str())?;
            handle.wait()?;
            println!("{} stopped at '{}'", target.name(), label);
        }
        Command::Resume(target, label) => {
            let handle = session.processes[target.index()].run_until(label.as_str())?;
            session.handles[target.index()] = Some(handle);
            println!("{} resumed towards '{}' (use 'wait {}')", target.name(), label, target.name());
        }
        Command::Wait(target) => handle_wait(session, target)?,
        Command::Finish(target) => {
            session.processes[target.index()].finish()?.wait()?;
            session.handles[target.index()] = None;
            println!("{} finished", target.name());
        }
        Command::Status => print_status(session),
        Command::Counter => {
            if session.path.exists() {
                println!("Counter: {}", read_counter(&session.path)?);
            } else {
                println!("Counter: (not created yet)");
            }
        }
        Command::Reset => {
            session.reset()?;
            println!("Processes and counter reset");
        }
        Command::Help => print_help(),
        Command::Quit => {}
    }

    Ok(())
}

/// Waitコマンドを処理する
fn handle_wait(session: &mut ReplSession, target: Target) -> Result<()> {
    match session.handles[target.index()].take() {
        Some(handle) => {
            handle.wait()?;
            println!("{} reached {:?}", target.name(), handle.kind());
        }
        None => println!("{} has no outstanding request", target.name()),
    }
    Ok(())
}

fn print_status(session: &ReplSession) {
    for (process, handle) in session.processes.iter().zip(&session.handles) {
        let pid = process
            .pid()
            .map_or_else(|| "-".to_string(), |pid| pid.to_string());
        let outstanding = match handle {
            Some(handle) if !handle.is_resolved() => format!(" (waiting: {:?})", handle.kind()),
            _ => String::new(),
        };
        println!("  {} [pid {}]: {:?}{}", process.name(), pid, process.state(), outstanding);
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  help            - Show this help message");
    println!("  quit/exit/q     - Exit (unfinished processes are killed)");
    println!();
    println!("Process commands (target is p1 or p2):");
    println!("  until <p> <bp>  - Run until breakpoint and wait for it");
    println!("  resume <p> <bp> - Run until breakpoint without waiting");
    println!("  wait <p>        - Wait for the last resumed request");
    println!("  finish <p>      - Run to completion, ignoring breakpoints");
    println!("  status          - Show process states");
    println!("  counter         - Show the counter value");
    println!("  reset           - Kill both processes and reset the counter");
    println!();
    println!("Breakpoints: before_lock, after_read");
    println!();
    println!("Example (with locking, p2 blocks on the lock after 'resume'):");
    println!("  until p1 after_read");
    println!("  until p2 before_lock");
    println!("  resume p2 after_read");
    println!("  finish p1");
    println!("  finish p2");
    println!("  counter");
}
