// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Simulates an outage of a dependency and shows the circuit breaker at work:
//!
//! 1. errors pile up in the rolling window until the error threshold is crossed;
//! 2. the breaker opens and requests are answered by the fallback without calling the dependency;
//! 3. after the sleep window a single trial request is let through;
//! 4. once the dependency recovered, the trial succeeds and the breaker closes.
//!
//! Breaker transitions are logged through `tracing`.

use std::time::Duration;

use bulwark::{Command, CommandProperties, Context, IsolationStrategy, RunError};
use layered::{Execute, Service, Stack};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let context = Context::new_tokio().name("outage_example").enable_logs();

    let mut properties = CommandProperties::default();
    properties.isolation_strategy = IsolationStrategy::Semaphore;
    properties.circuit_breaker_request_volume_threshold = 5;
    properties.circuit_breaker_error_threshold_percentage = 50;
    properties.circuit_breaker_sleep_window = Duration::from_millis(500);
    properties.metrics_rolling_window = Duration::from_secs(2);

    let service = (
        Command::layer("GetInventory", &context)
            .properties(properties)
            .fallback_value("inventory unknown".to_string()),
        Execute::new(inventory),
    )
        .into_service();

    for attempt in 0..60 {
        tokio::time::sleep(Duration::from_millis(50)).await;

        let command = service.command(attempt);
        match command.execute().await {
            Ok(output) => println!(
                "{attempt}: {output} (circuit {}, short-circuited: {})",
                service.circuit_breaker().state(),
                command.is_response_short_circuited()
            ),
            Err(error) => println!("{attempt}: {error}"),
        }
    }
}

// The dependency is down for attempts 10 to 29.
async fn inventory(attempt: u32) -> Result<String, RunError> {
    if (10..30).contains(&attempt) {
        Err(RunError::failure("inventory service unavailable"))
    } else {
        Ok(format!("42 items in stock ({attempt})"))
    }
}
