//! Command-line client and demo server for lrpc.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod json;
mod remote;
mod serve;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use lrpc::{ClientConfig, ServerConfig};
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lrpc",
    version,
    about = "Remote procedure calls over TCP or serial lines"
)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the demo namespace.
    Serve(serve::ServeArgs),

    /// Call a remote function and print its results.
    Call(remote::CallArgs),

    /// Print a remote value.
    Get(remote::GetArgs),

    /// Assign a remote value.
    ///
    /// The last path segment is the key, the rest names the table.
    Set(remote::SetArgs),

    /// Write default settings to a JSON file.
    Config {
        /// Write server settings instead of client settings.
        #[arg(long)]
        server: bool,
        /// Destination file.
        path: PathBuf,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = cli.command.dispatch() {
        eprintln!("lrpc: {e:#}");
        std::process::exit(1);
    }
}

/// Logs go to stderr; `RUST_LOG` refines the level picked by `-v`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

impl Command {
    fn dispatch(self) -> Result<()> {
        match self {
            Self::Serve(args) => serve::run(&args),
            Self::Call(args) => remote::call(&args),
            Self::Get(args) => remote::get(&args),
            Self::Set(args) => remote::set(&args),
            Self::Config { server, path } => {
                if server {
                    ServerConfig::default().save(&path)
                } else {
                    ClientConfig::default().save(&path)
                }
                .with_context(|| format!("failed to write {}", path.display()))?;
                println!("{}", path.display());
                Ok(())
            }
            Self::Completion { shell } => {
                clap_complete::generate(shell, &mut Cli::command(), "lrpc", &mut std::io::stdout());
                Ok(())
            }
        }
    }
}
