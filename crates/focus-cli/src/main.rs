//! Focus CLI - offline-first tasks and focus sessions from the terminal
//!
//! Every edit lands in the local database first and is queued for the sync
//! server; `focus sync` replays the queue and pulls remote changes.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands, QueueCommands, SessionCommands, TaskCommands};
use crate::commands::common::{open_agent, ClientSettings};
use crate::commands::task::TaskChanges;
use crate::commands::{queue, session, sync, task};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "focus_cli=info"
        .parse::<tracing_subscriber::filter::Directive>()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    let cli = Cli::parse();
    let settings = ClientSettings::resolve(&cli)?;

    if let Commands::Conflicts { limit, json } = cli.command {
        return sync::run_conflicts(&settings, limit, json).await;
    }

    let agent = open_agent(&settings).await?;

    match cli.command {
        Commands::Task { command } => match command {
            TaskCommands::Add {
                title,
                description,
                priority,
                tags,
            } => task::run_add(&agent, &title, description, priority, tags).await?,
            TaskCommands::Update {
                id,
                title,
                description,
                priority,
                status,
            } => {
                let changes = TaskChanges {
                    title,
                    description,
                    priority,
                    status,
                };
                task::run_update(&agent, &id, changes).await?;
            }
            TaskCommands::Done { id } => task::run_done(&agent, &id).await?,
            TaskCommands::Delete { id } => task::run_delete(&agent, &id).await?,
            TaskCommands::List { status, json } => task::run_list(&agent, status, json)?,
        },
        Commands::Session { command } => match command {
            SessionCommands::Start {
                task,
                kind,
                minutes,
            } => session::run_start(&agent, task.as_deref(), kind, minutes).await?,
            SessionCommands::Finish { id } => session::run_finish(&agent, &id).await?,
            SessionCommands::List { json } => session::run_list(&agent, json)?,
        },
        Commands::Queue { command } => match command {
            QueueCommands::List { status, json } => queue::run_list(&agent, status, json)?,
            QueueCommands::Purge => queue::run_purge(&agent)?,
        },
        Commands::Sync => sync::run_sync(&agent, &settings).await?,
        Commands::Status { json } => sync::run_status(&agent, &settings, json)?,
        Commands::Conflicts { .. } => {}
    }

    Ok(())
}
