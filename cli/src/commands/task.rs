// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task submission and inspection commands: `submit`, `status`, `logs`.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;
use uuid::Uuid;

use codebroker_core::domain::task::{Task, TaskId, TaskOrigin};

use crate::daemon::server::{ServiceGraph, DEFAULT_WORKSPACE};
use crate::embedded;

#[derive(Subcommand)]
pub enum TaskCommand {
    /// Typecheck and run a snippet of code against the registered tools
    Submit {
        /// Inline code, or `@file.ts` to read it from a file
        code: String,

        /// Milliseconds before the sandbox is torn down (default: broker's configured default)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Named sandbox runtime variant to run against
        #[arg(long)]
        runtime_id: Option<String>,

        /// Block until the task reaches a terminal status
        #[arg(short, long)]
        wait: bool,
    },

    /// Print a previously submitted task's current state
    Status {
        #[arg(value_name = "TASK_ID")]
        task_id: Uuid,
    },

    /// Print a task's captured stdout/stderr
    Logs {
        #[arg(value_name = "TASK_ID")]
        task_id: Uuid,
    },
}

pub async fn handle_command(command: TaskCommand, config_path: Option<PathBuf>) -> Result<()> {
    let graph = embedded::connect(config_path).await?;

    match command {
        TaskCommand::Submit {
            code,
            timeout_ms,
            runtime_id,
            wait,
        } => submit(graph, code, timeout_ms, runtime_id, wait).await,
        TaskCommand::Status { task_id } => status(graph, task_id).await,
        TaskCommand::Logs { task_id } => logs(graph, task_id).await,
    }
}

async fn submit(
    graph: ServiceGraph,
    code: String,
    timeout_ms: Option<u64>,
    runtime_id: Option<String>,
    wait: bool,
) -> Result<()> {
    let code = read_code(code)?;
    let origin = TaskOrigin {
        workspace_id: DEFAULT_WORKSPACE.to_string(),
        actor_id: None,
        client_id: Some("cli".to_string()),
    };

    let outcome = graph
        .task_service
        .submit(origin, code, timeout_ms, runtime_id, HashMap::new())
        .await
        .context("submitting the task")?;

    let task = match outcome {
        Ok(task) => task,
        Err(check) => {
            println!("{}", "✗ type error".red().bold());
            for error in check.errors {
                println!("  {error}");
            }
            return Ok(());
        }
    };

    println!("{}", format!("✓ task {} queued", task.id).green());

    let task = graph.task_service.execute(task).await.context("executing the task")?;
    print_task(&task);

    if wait && !task.is_terminal() {
        if let Some(final_task) = graph
            .task_service
            .wait_for_terminal(task.id, task.timeout_ms)
            .await
            .context("waiting for the task to finish")?
        {
            print_task(&final_task);
        }
    }

    Ok(())
}

async fn status(graph: ServiceGraph, task_id: Uuid) -> Result<()> {
    let Some(task) = find_task(&graph, task_id).await? else {
        bail!("no task {task_id} found");
    };
    print_task(&task);
    Ok(())
}

async fn logs(graph: ServiceGraph, task_id: Uuid) -> Result<()> {
    let Some(task) = find_task(&graph, task_id).await? else {
        bail!("no task {task_id} found");
    };
    print!("{}", task.stdout);
    if !task.stderr.is_empty() {
        eprint!("{}", task.stderr);
    }
    Ok(())
}

async fn find_task(graph: &ServiceGraph, task_id: Uuid) -> Result<Option<Task>> {
    graph.tasks.find_by_id(TaskId(task_id)).await.context("looking up the task")
}

fn print_task(task: &Task) {
    println!("task {}", task.id);
    println!("  status: {}", format_status(&task.status.to_string()));
    if let Some(code) = task.exit_code {
        println!("  exit code: {code}");
    }
    if let Some(error) = &task.error {
        println!("  error: {error}");
    }
}

fn format_status(status: &str) -> colored::ColoredString {
    match status {
        "running" | "queued" => status.yellow(),
        "completed" => status.green(),
        "failed" | "timed_out" | "denied" => status.red(),
        _ => status.normal(),
    }
}

fn read_code(arg: String) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {path}")),
        None => Ok(arg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_code_passes_inline_code_through() {
        assert_eq!(read_code("return 1;".to_string()).unwrap(), "return 1;");
    }

    #[test]
    fn read_code_reads_from_an_at_prefixed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snippet.ts");
        std::fs::write(&path, "return 2;").unwrap();
        let arg = format!("@{}", path.display());
        assert_eq!(read_code(arg).unwrap(), "return 2;");
    }

    #[test]
    fn read_code_errors_on_a_missing_file() {
        assert!(read_code("@/no/such/file.ts".to_string()).is_err());
    }
}
