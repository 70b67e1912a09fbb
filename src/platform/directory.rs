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

use crate::{
    configuration::DatabaseSettings,
    errors::UpdateError,
    participants::{Origin, ParticipantsInfo},
    platform::ChatDirectory,
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{debug, error, instrument, trace};

/// [ChatDirectory] backed by the `chats` table of a PostgreSQL DB.
///
/// # Description
///
/// The table is expected to have, at least, the columns `id`, `participants_count` and
/// `updated_at`.
#[derive(Clone)]
pub struct PgChatDirectory {
    db_pool: PgPool,
}

impl PgChatDirectory {
    #[instrument(name = "Connect DB backend for the chat directory", skip(settings))]
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, UpdateError> {
        let db_pool = PgPoolOptions::new()
            .connect_with(settings.connect_options())
            .await
            .map_err(|e| {
                error!("{e}");
                UpdateError::from(e)
            })?;

        trace!("PostgreSQL database server successfully connected");

        Ok(Self { db_pool })
    }

    pub fn from_pool(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

impl ChatDirectory for PgChatDirectory {
    async fn list_chat_ids(&self, page: usize, page_size: usize) -> Result<Vec<i64>, UpdateError> {
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
        let offset = i64::try_from(page.saturating_mul(page_size)).unwrap_or(i64::MAX);

        let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM chats ORDER BY id LIMIT $1 OFFSET $2")
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db_pool)
            .await?;

        debug!("Obtained {} chats from the DB (page {page})", ids.len());

        Ok(ids)
    }

    async fn stored_count(&self, chat_id: i64) -> Result<Option<ParticipantsInfo>, UpdateError> {
        let row = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "SELECT participants_count::BIGINT, updated_at::TIMESTAMPTZ FROM chats WHERE id = $1",
        )
        .bind(chat_id)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some((count, updated_at)) = row else {
            debug!(chat_id, "Chat not found in the DB");
            return Ok(None);
        };
        let count = u64::try_from(count).map_err(|_| {
            UpdateError::Directory(format!("negative participants count in the DB: {count}"))
        })?;

        Ok(Some(ParticipantsInfo {
            count,
            updated_at,
            source: Origin::Database,
        }))
    }

    async fn save_count(&self, chat_id: i64, count: u64) -> Result<(), UpdateError> {
        let count = i64::try_from(count)
            .map_err(|_| UpdateError::Directory(format!("count out of range: {count}")))?;

        let result = sqlx::query(
            "UPDATE chats SET participants_count = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(count)
        .bind(chat_id)
        .execute(&self.db_pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(chat_id, "No chat to save the participants count to");
        } else {
            trace!(chat_id, count, "Participants count saved in the DB");
        }

        Ok(())
    }
}
