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

//! Custom error types.
use thiserror::Error;

/// Errors raised by the participants cache and the stores behind it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The key is absent from the store (never written or already expired).
    #[error("participants count not cached")]
    NotCached,
    #[error("error from Valkey DB server: {0}")]
    Transport(String),
    #[error("malformed participants entry: {0}")]
    Format(String),
}

impl CacheError {
    /// Transport errors are worth retrying on the next scheduled pass, the rest are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Transport(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(value: redis::RedisError) -> Self {
        CacheError::Transport(value.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(value: serde_json::Error) -> Self {
        CacheError::Format(value.to_string())
    }
}

/// Errors raised while refreshing participant counts from the chat platform.
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("error from the chat platform: {0}")]
    Platform(String),
    /// The platform answered, but refused to serve this chat (unknown chat, bot kicked...).
    #[error("chat unavailable in the platform: {0}")]
    ChatUnavailable(String),
    #[error("error from the chat directory: {0}")]
    Directory(String),
    #[error("the chat platform circuit breaker is open")]
    CircuitOpen,
}

impl UpdateError {
    /// Whether the error tells something about the health of the platform. Only those count
    /// against the circuit breaker and deserve a retry.
    pub fn is_platform_failure(&self) -> bool {
        matches!(self, UpdateError::Platform(_))
    }
}

impl From<teloxide::RequestError> for UpdateError {
    fn from(value: teloxide::RequestError) -> Self {
        match value {
            // A bad token is a problem of the whole platform, not of a chat.
            teloxide::RequestError::Api(teloxide::ApiError::InvalidToken) => {
                UpdateError::Platform(value.to_string())
            }
            teloxide::RequestError::Api(_) | teloxide::RequestError::MigrateToChatId(_) => {
                UpdateError::ChatUnavailable(value.to_string())
            }
            _ => UpdateError::Platform(value.to_string()),
        }
    }
}

impl From<sqlx::Error> for UpdateError {
    fn from(value: sqlx::Error) -> Self {
        UpdateError::Directory(value.to_string())
    }
}
