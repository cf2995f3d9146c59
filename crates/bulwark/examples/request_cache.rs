// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Deduplicates identical lookups within one request and prints the request log.

use std::time::Duration;

use bulwark::{Command, Context, RequestContext, RunError};
use layered::{Execute, Service, Stack};

#[tokio::main]
async fn main() {
    let context = Context::new_tokio();

    let service = (
        Command::layer("GetUser", &context).cache_key(|id: &u64| Some(id.to_string())),
        Execute::new(|id: u64| async move {
            println!("loading user {id}");
            tokio::time::sleep(Duration::from_millis(25)).await;
            Ok::<_, RunError>(format!("user-{id}"))
        }),
    )
        .into_service();

    // Everything executed with `scoped` belongs to the same request.
    let request = RequestContext::new();
    let scoped = service.with_request_context(&request);

    for id in [1, 2, 1, 1, 3, 2] {
        let command = scoped.command(id);
        match command.execute().await {
            Ok(user) => println!("{user} (from cache: {})", command.is_response_from_cache()),
            Err(error) => println!("{id}: {error}"),
        }
    }

    println!("{}", request.request_log().executed_commands_string());
    request.shutdown();
}
