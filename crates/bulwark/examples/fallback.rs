// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Degrades gracefully when the primary call fails or is too slow.
//!
//! Every third request fails and every fifth one hangs. The fallback answers both with a
//! default recommendation and tells apart why it was called.

use std::time::Duration;

use bulwark::{Command, Context, FailureType, RunError};
use layered::{Execute, Service, Stack};

#[tokio::main]
async fn main() {
    let context = Context::new_tokio();

    let service = (
        Command::layer("GetRecommendations", &context)
            .timeout(Duration::from_millis(100))
            .fallback(|args| {
                let reason = match args.failure_type() {
                    FailureType::Timeout => "timed out",
                    FailureType::CommandException => "failed",
                    _ => "unavailable",
                };
                Ok(format!("bestsellers (primary {reason}: {})", args.cause()))
            }),
        Execute::new(recommendations),
    )
        .into_service();

    for user in 1..=10 {
        match service.execute(user).await {
            Ok(output) => println!("{user}: {output}"),
            Err(error) => println!("{user}: {error}"),
        }
    }
}

async fn recommendations(user: u32) -> Result<String, RunError> {
    if user % 5 == 0 {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    if user % 3 == 0 {
        return Err(RunError::failure("recommendation engine returned 503"));
    }

    Ok(format!("personalized list for user {user}"))
}
