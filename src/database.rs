use sqlx::sqlite::SqlitePool;
pub use sqlx::Error;
use sqlx::{query, query_as, query_scalar};
use teloxide::types::ChatId;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, Error> {
        let pool = SqlitePool::connect(database_url).await?;

        query(
            "CREATE TABLE IF NOT EXISTS chat_settings (
                chat_id INTEGER PRIMARY KEY,
                channel TEXT,
                welcome TEXT
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn set_channel(&self, chat_id: ChatId, channel: &str) -> Result<(), Error> {
        query(
            "INSERT INTO chat_settings (chat_id, channel) VALUES (?, ?)
                ON CONFLICT(chat_id) DO UPDATE SET channel = excluded.channel",
        )
        .bind(chat_id.0)
        .bind(channel)
        .execute(&self.pool)
        .await
        .map(|_| ())
    }

    pub async fn get_channel(&self, chat_id: ChatId) -> Result<Option<String>, Error> {
        query_scalar("SELECT channel FROM chat_settings WHERE chat_id = ?")
            .bind(chat_id.0)
            .fetch_optional(&self.pool)
            .await
            .map(|row: Option<Option<String>>| row.flatten())
    }

    pub async fn remove_channel(&self, chat_id: ChatId) -> Result<(), Error> {
        query("UPDATE chat_settings SET channel = NULL WHERE chat_id = ?")
            .bind(chat_id.0)
            .execute(&self.pool)
            .await
            .map(|_| ())
    }

    pub async fn set_welcome(&self, chat_id: ChatId, text: &str) -> Result<(), Error> {
        query(
            "INSERT INTO chat_settings (chat_id, welcome) VALUES (?, ?)
                ON CONFLICT(chat_id) DO UPDATE SET welcome = excluded.welcome",
        )
        .bind(chat_id.0)
        .bind(text)
        .execute(&self.pool)
        .await
        .map(|_| ())
    }

    pub async fn get_welcome(&self, chat_id: ChatId) -> Result<Option<String>, Error> {
        query_scalar("SELECT welcome FROM chat_settings WHERE chat_id = ?")
            .bind(chat_id.0)
            .fetch_optional(&self.pool)
            .await
            .map(|row: Option<Option<String>>| row.flatten())
    }

    pub async fn remove_welcome(&self, chat_id: ChatId) -> Result<(), Error> {
        query("UPDATE chat_settings SET welcome = NULL WHERE chat_id = ?")
            .bind(chat_id.0)
            .execute(&self.pool)
            .await
            .map(|_| ())
    }

    /// Both settings in one round trip, for the join handler.
    pub async fn get_settings(&self, chat_id: ChatId) -> Result<ChatSettings, Error> {
        query_as("SELECT channel, welcome FROM chat_settings WHERE chat_id = ?")
            .bind(chat_id.0)
            .fetch_optional(&self.pool)
            .await
            .map(Option::unwrap_or_default)
    }
}

#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct ChatSettings {
    pub channel: Option<String>,
    pub welcome: Option<String>,
}
