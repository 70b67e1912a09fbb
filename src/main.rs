// Copyright 2025 Felipe Torres González
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

//! Main file of the ChatCount service

use chatcount::{
    CountCache, ParticipantsUpdater, RefreshWorker,
    configuration::Settings,
    platform::{PgChatDirectory, TelegramCountSource},
    store::ValkeyStore,
    telemetry::configure_tracing,
};
use std::{process::exit, sync::Arc};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load the settings.
    let settings = Settings::new().expect("Failed to parse configuration files.");

    // Initialize the tracing subsystem.
    configure_tracing(settings.tracing_level.as_str());

    let config = settings.participants.validated();

    // The store is owned here and shared by everything that touches the cache.
    let store = match ValkeyStore::connect(&settings.valkey).await {
        Ok(store) => store,
        Err(e) => {
            error!("An error occurred while attempting to connect to the Valkey server:\n{e}");
            exit(69)
        }
    };

    let directory = match PgChatDirectory::connect(&settings.database).await {
        Ok(directory) => directory,
        Err(e) => {
            error!("An error occurred while attempting to connect to the chats DB:\n{e}");
            exit(69)
        }
    };

    let source = TelegramCountSource::new(&settings.application);
    let cache = CountCache::new(store);
    let updater = Arc::new(ParticipantsUpdater::new(cache, source, directory, &config));

    let mut worker = RefreshWorker::new(updater, config);
    worker.start();

    info!("Started ChatCount service");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    worker.stop().await;

    info!("Gracefully closed ChatCount service");

    Ok(())
}
