// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use opentelemetry::InstrumentationScope;
use opentelemetry::metrics::{Counter, Meter, MeterProvider};

/// Instrumentation scope of every instrument the crate creates.
const SCOPE: &str = "bulwark";
const SCOPE_VERSION: &str = env!("CARGO_PKG_VERSION");
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";

/// Name shared with the other resilience libraries, so dashboards can aggregate across them.
const EVENT_COUNTER: &str = "resilience.event";

pub(crate) fn create_meter(meter_provider: &dyn MeterProvider) -> Meter {
    let scope = InstrumentationScope::builder(SCOPE)
        .with_version(SCOPE_VERSION)
        .with_schema_url(SCHEMA_URL)
        .build();

    meter_provider.meter_with_scope(scope)
}

/// One increment per command lifecycle event or circuit transition.
pub(crate) fn create_resilience_event_counter(meter: &Meter) -> Counter<u64> {
    meter
        .u64_counter(EVENT_COUNTER)
        .with_description("Counts command lifecycle events and circuit breaker transitions.")
        .with_unit("{event}")
        .build()
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};

    use super::*;
    use crate::telemetry::{COMMAND_GROUP, COMMAND_KEY, COMMAND_POOL, EVENT_NAME, PIPELINE_NAME, STRATEGY_NAME, TelemetryHelper};
    use crate::{CommandInfo, CommandKey, EventType, GroupKey, IsolationStrategy, PoolKey};

    #[test]
    #[cfg(not(miri))]
    fn command_events_carry_identity_attributes() {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder().with_periodic_exporter(exporter.clone()).build();

        let mut telemetry = TelemetryHelper::new("checkout".into(), false);
        telemetry.event_reporter = Some(create_resilience_event_counter(&create_meter(&provider)));

        let info = CommandInfo::new(
            CommandKey::new("ReserveStock"),
            GroupKey::new("Inventory"),
            PoolKey::new("InventoryPool"),
            IsolationStrategy::Thread,
        );
        telemetry.report_event(&info, EventType::ShortCircuited);

        provider.force_flush().unwrap();
        let dump = format!("{:?}", exporter.get_finished_metrics().unwrap());

        for expected in [
            EVENT_COUNTER,
            SCOPE,
            SCOPE_VERSION,
            PIPELINE_NAME,
            STRATEGY_NAME,
            EVENT_NAME,
            COMMAND_KEY,
            COMMAND_GROUP,
            COMMAND_POOL,
            "checkout",
            "command",
            "short_circuited",
            "ReserveStock",
            "Inventory",
            "InventoryPool",
        ] {
            assert!(dump.contains(expected), "missing `{expected}` in {dump}");
        }
    }
}
