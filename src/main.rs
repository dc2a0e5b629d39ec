use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use cashledger::config::{LedgerConfig, StoreBackend};
use cashledger::dispatch::Payload;
use cashledger::ledger::LedgerError;
use cashledger::runtime::{open_runtime, Runtime, RuntimeError};
use cashledger::StateStore;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cashledger")]
#[command(about = "Key-value cash ledger with atomic transfers", long_about = None)]
struct Cli {
    /// Directory of the on-disk state
    #[arg(long, global = true, default_value = "cashledger_data")]
    data_dir: PathBuf,

    /// sled tree holding this ledger's keys
    #[arg(long, global = true, default_value = "state")]
    tree: String,

    /// Keep state in memory only (lost on exit)
    #[arg(long, global = true)]
    memory: bool,

    /// Skip the fsync after each write
    #[arg(long, global = true)]
    no_flush: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a state-changing function: init, createAccount, set_user, write
    Invoke {
        function: String,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run a read-only function: read
    Query {
        function: String,
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Sum every account balance and print a state digest
    Audit,
    /// Interactive prompt against one open ledger
    Shell,
}

impl Cli {
    fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            backend: if self.memory {
                StoreBackend::Memory
            } else {
                StoreBackend::Sled
            },
            data_dir: self.data_dir.clone(),
            tree_name: self.tree.clone(),
            flush_on_commit: !self.no_flush,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "cashledger=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, RuntimeError> {
    let runtime = open_runtime(&cli.ledger_config())?;

    let code = match cli.command {
        Commands::Invoke { function, args } => report(runtime.invoke(&function, &args)),
        Commands::Query { function, args } => report(runtime.query(&function, &args)),
        Commands::Audit => {
            let audit = runtime.audit()?;
            println!(
                "accounts={} total_balance={} digest={}",
                audit.accounts, audit.total_balance, audit.state_digest
            );
            ExitCode::SUCCESS
        }
        Commands::Shell => {
            let stdin = io::stdin();
            match shell(&runtime, stdin.lock(), &mut io::stdout()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("error: shell i/o failed: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    };
    Ok(code)
}

fn report(result: Result<Payload, LedgerError>) -> ExitCode {
    let mut stdout = io::stdout();
    match write_result(&mut stdout, result) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Print a call's outcome. Returns whether the call succeeded.
fn write_result<W: Write>(out: &mut W, result: Result<Payload, LedgerError>) -> io::Result<bool> {
    match result {
        Ok(payload) => {
            write_payload(out, payload)?;
            Ok(true)
        }
        Err(e) => {
            eprintln!("error[{}]: {}", e.kind(), e);
            Ok(false)
        }
    }
}

fn write_payload<W: Write>(out: &mut W, payload: Payload) -> io::Result<()> {
    match payload {
        None => writeln!(out, "ok"),
        Some(bytes) => match String::from_utf8(bytes) {
            Ok(text) => writeln!(out, "{}", text),
            Err(e) => writeln!(out, "0x{}", hex::encode(e.as_bytes())),
        },
    }
}

fn shell<S: StateStore, R: BufRead, W: Write>(
    runtime: &Runtime<S>,
    input: R,
    out: &mut W,
) -> io::Result<()> {
    writeln!(out, "cashledger shell. Type 'help' for commands.")?;

    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let mut words = line.split_whitespace().map(str::to_string);
        let Some(command) = words.next() else {
            continue;
        };

        match command.as_str() {
            "exit" | "quit" => break,
            "help" => {
                writeln!(out, "invoke <function> [args...]   init | createAccount | set_user | write")?;
                writeln!(out, "query <function> [args...]    read")?;
                writeln!(out, "audit                         total balance across accounts")?;
                writeln!(out, "exit")?;
            }
            "audit" => match runtime.audit() {
                Ok(audit) => writeln!(
                    out,
                    "accounts={} total_balance={} digest={}",
                    audit.accounts, audit.total_balance, audit.state_digest
                )?,
                Err(e) => eprintln!("error[{}]: {}", e.kind(), e),
            },
            "invoke" | "query" => {
                let Some(function) = words.next() else {
                    writeln!(out, "usage: {} <function> [args...]", command)?;
                    continue;
                };
                let args: Vec<String> = words.collect();
                let result = if command == "invoke" {
                    runtime.invoke(&function, &args)
                } else {
                    runtime.query(&function, &args)
                };
                write_result(out, result)?;
            }
            other => writeln!(out, "Unknown command: {}", other)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashledger::MemStorage;

    /// Accepts a fixed number of bytes, then fails every write and flush.
    struct ClosedPipe {
        room: usize,
    }

    impl Write for ClosedPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            let n = buf.len().min(self.room);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            if self.room == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_shell_session() {
        let runtime = Runtime::new(MemStorage::new());
        let input = "invoke createAccount alice\ninvoke createAccount bob\n\
                     invoke set_user alice 120 bob\nquery read bob\naudit\nexit\n";
        let mut out = Vec::new();
        shell(&runtime, input.as_bytes(), &mut out).unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains(r#"{"ID":"bob","CashBalance":620}"#));
        assert!(out.contains("accounts=2 total_balance=1000"));
        assert_eq!(runtime.ledger().balance("alice").unwrap(), 380);
    }

    #[test]
    fn test_shell_reports_output_failure() {
        let runtime = Runtime::new(MemStorage::new());
        let banner = "cashledger shell. Type 'help' for commands.\n> ";
        let mut out = ClosedPipe { room: banner.len() };
        let err = shell(&runtime, "help\nexit\n".as_bytes(), &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
