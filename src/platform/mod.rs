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

//! Collaborators that feed the participants refresh.
//!
//! # Description
//!
//! The refresh needs two things from the outside world: the real number of members of a chat
//! ([CountSource]) and the list of the chats known by the application ([ChatDirectory]). The
//! directory also keeps the last count of each chat, used when the platform can't answer.

use crate::{errors::UpdateError, participants::ParticipantsInfo};
use std::future::Future;

mod directory;
mod telegram;

pub use directory::PgChatDirectory;
pub use telegram::TelegramCountSource;

/// Source of truth of the participants count of a chat.
pub trait CountSource: Send + Sync + 'static {
    fn fetch_count(&self, chat_id: i64) -> impl Future<Output = Result<u64, UpdateError>> + Send;
}

/// Directory of every chat known by the application.
pub trait ChatDirectory: Send + Sync + 'static {
    /// Retrieve a page of chat IDs.
    ///
    /// # Description
    ///
    /// Pages start at 0 and are sorted by chat ID. A page shorter than `page_size` is the last one.
    fn list_chat_ids(
        &self,
        page: usize,
        page_size: usize,
    ) -> impl Future<Output = Result<Vec<i64>, UpdateError>> + Send;

    /// Last participants count saved for a chat, with [crate::participants::Origin::Database] as
    /// source. `None` for an unknown chat.
    fn stored_count(
        &self,
        chat_id: i64,
    ) -> impl Future<Output = Result<Option<ParticipantsInfo>, UpdateError>> + Send;

    /// Save a fresh participants count of a chat.
    fn save_count(
        &self,
        chat_id: i64,
        count: u64,
    ) -> impl Future<Output = Result<(), UpdateError>> + Send;
}
