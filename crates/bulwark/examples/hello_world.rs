// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Runs a command on a worker pool and inspects what happened.

use bulwark::{Command, Context, RunError};
use layered::{Execute, Stack};

#[tokio::main]
async fn main() -> Result<(), bulwark::CommandError> {
    let context = Context::new_tokio();

    let service = (
        Command::layer("HelloWorld", &context).group_key("Greetings"),
        Execute::new(|name: String| async move { Ok::<_, RunError>(format!("Hello {name}!")) }),
    )
        .into_service();

    let command = service.command("World".to_string());
    let greeting = command.execute().await?;

    println!("{greeting}");
    println!("events: {:?}", command.execution_events());
    println!("executed on a worker: {}", command.is_executed_in_thread());
    println!("total latency: {:?}", command.total_latency());

    Ok(())
}
