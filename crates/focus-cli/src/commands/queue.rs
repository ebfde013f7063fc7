use focus_core::models::OperationStatus;

use crate::cli::QueueStatusArg;
use crate::commands::common::{format_operation_lines, operation_to_item, Agent};
use crate::error::CliError;

pub fn run_list(
    agent: &Agent,
    status: Option<QueueStatusArg>,
    as_json: bool,
) -> Result<(), CliError> {
    let operations = agent.queue().list(status.map(OperationStatus::from))?;

    if as_json {
        let items = operations.iter().map(operation_to_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_operation_lines(&operations) {
        println!("{line}");
    }
    Ok(())
}

pub fn run_purge(agent: &Agent) -> Result<(), CliError> {
    let purged = agent.queue().purge_completed()?;
    println!("Purged {purged} completed operation(s)");
    Ok(())
}
