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

//! Library of the ChatCount crate.
//!
//! # Description
//!
//! ChatCount keeps an approximate participants count for a large set of Telegram chats. Counts
//! are served from a Valkey cache and refreshed in the background. See [participants] for the
//! details of the refresh.

pub mod configuration;
pub mod errors;
pub mod participants;
pub mod platform;
pub mod store;
pub mod telemetry;

pub use errors::{CacheError, UpdateError};
pub use participants::{
    CountCache, ParticipantsConfig, ParticipantsInfo, ParticipantsUpdater, RefreshWorker,
    ShutdownToken, Updater,
};
