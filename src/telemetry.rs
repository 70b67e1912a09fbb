// Copyright 2024-2025 Felipe Torres González
//
//    Licensed under the Apache License, Version 2.0 (the "License");
//    you may not use this file except in compliance with the License.
//    You may obtain a copy of the License at
//
//        http://www.apache.org/licenses/LICENSE-2.0
//
//    Unless required by applicable law or agreed to in writing, software
//    distributed under the License is distributed on an "AS IS" BASIS,
//    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//    See the License for the specific language governing permissions and
//    limitations under the License.

use tracing::{Level, level_filters::LevelFilter};
use tracing_subscriber::{Layer, filter::Targets, fmt, prelude::*};

/// Translate the level string found in the settings into tracing's types.
pub fn parse_level(tracing_level: &str) -> (Level, LevelFilter) {
    match tracing_level {
        "info" => (Level::INFO, LevelFilter::INFO),
        "debug" => (Level::DEBUG, LevelFilter::DEBUG),
        "warn" => (Level::WARN, LevelFilter::WARN),
        "error" => (Level::ERROR, LevelFilter::ERROR),
        _ => (Level::TRACE, LevelFilter::TRACE),
    }
}

/// Install the global subscriber.
///
/// # Description
///
/// Only events emitted from this crate pass the [Targets] filter, so the noise from the Valkey
/// client, SQLx and teloxide stays out of the logs unless their level is raised explicitly.
pub fn configure_tracing(tracing_level: &str) {
    let (tracing_level, tracing_levelfilter) = parse_level(tracing_level);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_filter(tracing_levelfilter),
        )
        .with(Targets::new().with_target("chatcount", tracing_level))
        .init();
}

/// Subscriber for the unit tests, enabled by setting `TEST_LOG` to a level string.
#[cfg(test)]
pub(crate) static TEST_TRACING: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    if let Ok(level) = std::env::var("TEST_LOG") {
        let (tracing_level, tracing_levelfilter) = parse_level(&level);

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_filter(tracing_levelfilter),
            )
            .with(Targets::new().with_target("chatcount", tracing_level))
            .try_init();
    }
});
