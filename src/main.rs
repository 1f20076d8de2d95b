//! `roomkeeper` - per-room session engine

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use clap::Parser;
use tokio_util::sync::CancellationToken;

use roomkeeper::cli::args::Cli;
use roomkeeper::cli::commands;
use roomkeeper::error::ExitCode;
use roomkeeper::observability::{LogFormat, init_logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(LogFormat::Human, cli.verbose, cli.color);
    }

    let cancel = CancellationToken::new();
    let signal_exit = Arc::new(AtomicI32::new(ExitCode::SUCCESS));

    // First signal cancels and lets the command flush; a second one exits.
    {
        let cancel = cancel.clone();
        let signal_exit = Arc::clone(&signal_exit);
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");

            let code = tokio::select! {
                _ = tokio::signal::ctrl_c() => ExitCode::INTERRUPTED,
                _ = sigterm.recv() => ExitCode::TERMINATED,
            };
            signal_exit.store(code, Ordering::SeqCst);
            cancel.cancel();

            eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");

            tokio::select! {
                _ = tokio::signal::ctrl_c() => std::process::exit(ExitCode::INTERRUPTED),
                _ = sigterm.recv() => std::process::exit(ExitCode::TERMINATED),
            }
        });
    }

    let result = commands::dispatch(cli, cancel).await;

    match result {
        Ok(()) => std::process::exit(signal_exit.load(Ordering::SeqCst)),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
