use clap::Parser;
use console::style;
use scurry::cli::{run_cli, Cli};
use scurry::commands::Outcome;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "scurry=debug" } else { "scurry=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    match run_cli(cli, cancel).await {
        Ok(outcome) => std::process::exit(report_outcome(outcome)),
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// On SIGINT or SIGTERM, cancel in-flight work. Database calls abort,
/// the shadow database stops with the process; migrations already sent
/// to the target are the recovery loop's problem on next start.
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let terminate = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sig) => {
                        sig.recv().await;
                    }
                    Err(_) => std::future::pending::<()>().await,
                }
            }
            #[cfg(not(unix))]
            std::future::pending::<()>().await
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate => {}
        }
        eprintln!("\nInterrupted, shutting down.");
        cancel.cancel();
    });
}

fn report_outcome(outcome: Outcome) -> i32 {
    match outcome {
        Outcome::NothingToDo => 0,
        Outcome::MigrationGenerated { name, path, mode } => {
            println!(
                "New {} migration created: {} ({})",
                mode,
                name,
                path.display()
            );
            0
        }
        Outcome::AppliedMigrations {
            applied,
            kicked_async,
        } => {
            if kicked_async > 0 {
                println!(
                    "Applied {} migration(s), {} running asynchronously.",
                    applied, kicked_async
                );
            } else {
                println!("Applied {} migration(s).", applied);
            }
            0
        }
        Outcome::DryRun => 0,
        Outcome::Recovered => {
            println!("Recovery complete.");
            0
        }
        Outcome::Aborted => {
            println!("Aborted, no changes made.");
            0
        }
        Outcome::CheckpointsWritten { count } => {
            println!("Wrote {} checkpoint(s).", count);
            0
        }
        Outcome::TableSizesWritten { tables } => {
            println!("Recorded sizes for {} table(s).", tables);
            0
        }
        Outcome::Pushed { statements } => {
            println!("Pushed {} statement(s).", statements);
            0
        }
        Outcome::Dumped { path } => {
            println!("Schema written to {}.", path.display());
            0
        }
        Outcome::Valid | Outcome::LintClean => 0,
        Outcome::LintIssues { count } => {
            eprintln!("{} lint issue(s) found.", count);
            1
        }
        Outcome::Unimplemented => {
            eprintln!("No command specified; see --help.");
            0
        }
    }
}
