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

use crate::{configuration::ApplicationSettings, errors::UpdateError, platform::CountSource};
use secrecy::ExposeSecret;
use teloxide::{
    adaptors::{Throttle, throttle::Limits},
    prelude::*,
    requests::RequesterExt,
};
use tracing::trace;

/// [CountSource] backed by the Telegram Bot API.
///
/// # Description
///
/// Requests go through the [Throttle] adaptor, so a full refresh of many chats can't exceed the
/// rate limits of the API.
#[derive(Clone)]
pub struct TelegramCountSource {
    bot: Throttle<Bot>,
}

impl TelegramCountSource {
    /// Build a throttled bot. Must be called within a Tokio runtime.
    pub fn new(settings: &ApplicationSettings) -> Self {
        let bot = Bot::new(settings.api_token.expose_secret()).throttle(Limits::default());

        TelegramCountSource { bot }
    }

    pub fn from_bot(bot: Throttle<Bot>) -> Self {
        TelegramCountSource { bot }
    }
}

impl CountSource for TelegramCountSource {
    async fn fetch_count(&self, chat_id: i64) -> Result<u64, UpdateError> {
        let count = self.bot.get_chat_member_count(ChatId(chat_id)).await?;
        trace!(chat_id, count, "Participants count received from Telegram");

        Ok(u64::from(count))
    }
}
