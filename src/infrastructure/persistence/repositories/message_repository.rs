use super::{opt_ts_from_db, ts_from_db, ts_to_db};
use crate::domain::message::{
    Message, MessageAnswer, MessageCode, MessageDirection, NewAnswer, NewMessage, RequestKey,
};
use crate::domain::repositories::MessageRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::debug;

const MESSAGE_COLUMNS: &str = "SELECT id, peer_id, timestamp, direction, message_code, payload, \
     request_key, reply_to, answer_id, delivered, error FROM gt_net_message";

const ANSWER_COLUMNS: &str = "SELECT id, request_key, request_code, response_code, payload, \
     created_at, expires_at FROM gt_net_message_answer";

pub struct SqliteMessageRepository {
    pool: SqlitePool,
}

impl SqliteMessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_message(row: &SqliteRow) -> Result<Message> {
        let direction: String = row.try_get("direction")?;
        let code: String = row.try_get("message_code")?;
        let payload: String = row.try_get("payload")?;
        let request_key: Option<String> = row.try_get("request_key")?;

        Ok(Message {
            id: row.try_get("id")?,
            peer_id: row.try_get("peer_id")?,
            timestamp: ts_from_db(row.try_get("timestamp")?)?,
            direction: MessageDirection::from_str(&direction)?,
            code: MessageCode::from_str(&code)?,
            payload: serde_json::from_str(&payload).context("Invalid stored message payload")?,
            request_key: request_key.map(RequestKey::from_stored),
            reply_to: row.try_get("reply_to")?,
            answer_id: row.try_get("answer_id")?,
            delivered: row.try_get("delivered")?,
            error: row.try_get("error")?,
        })
    }

    fn map_answer(row: &SqliteRow) -> Result<MessageAnswer> {
        let request_code: String = row.try_get("request_code")?;
        let response_code: String = row.try_get("response_code")?;
        let payload: String = row.try_get("payload")?;

        Ok(MessageAnswer {
            id: row.try_get("id")?,
            request_key: RequestKey::from_stored(row.try_get("request_key")?),
            request_code: MessageCode::from_str(&request_code)?,
            response_code: MessageCode::from_str(&response_code)?,
            payload: serde_json::from_str(&payload).context("Invalid stored answer payload")?,
            created_at: ts_from_db(row.try_get("created_at")?)?,
            expires_at: opt_ts_from_db(row.try_get("expires_at")?)?,
        })
    }

    async fn insert_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        message: &NewMessage,
    ) -> Result<Message> {
        let payload = serde_json::to_string(&message.payload)?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO gt_net_message
            (peer_id, timestamp, direction, message_code, payload, request_key, reply_to,
             answer_id, delivered, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(message.peer_id)
        .bind(ts_to_db(message.timestamp))
        .bind(message.direction.to_string())
        .bind(message.code.as_str())
        .bind(&payload)
        .bind(message.request_key.as_ref().map(|k| k.as_str().to_string()))
        .bind(message.reply_to)
        .bind(message.answer_id)
        .bind(message.delivered)
        .bind(&message.error)
        .fetch_one(&mut **tx)
        .await
        .with_context(|| format!("Failed to store {} message", message.code))?;

        let row = sqlx::query(&format!("{} WHERE id = ?", MESSAGE_COLUMNS))
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
        Self::map_message(&row)
    }
}

#[async_trait]
impl MessageRepository for SqliteMessageRepository {
    async fn insert(&self, message: &NewMessage) -> Result<Message> {
        let mut tx = self.pool.begin().await?;
        let stored = Self::insert_in_tx(&mut tx, message).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Message>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", MESSAGE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_message).transpose()
    }

    async fn find_by_peer(&self, peer_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "{} WHERE peer_id = ? ORDER BY timestamp ASC, id ASC",
            MESSAGE_COLUMNS
        ))
        .bind(peer_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load messages of peer")?;
        rows.iter().map(Self::map_message).collect()
    }

    async fn pending_outbound(&self, limit: usize) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "{} WHERE direction = 'SENT' AND delivered = 0 ORDER BY timestamp ASC, id ASC LIMIT ?",
            MESSAGE_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::map_message).collect()
    }

    async fn mark_delivered(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE gt_net_message SET delivered = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to mark message {} delivered", id))?;
        Ok(())
    }

    async fn find_answer(&self, key: &RequestKey) -> Result<Option<MessageAnswer>> {
        let row = sqlx::query(&format!("{} WHERE request_key = ?", ANSWER_COLUMNS))
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::map_answer).transpose()
    }

    async fn record_reply(
        &self,
        reply: &NewMessage,
        answer: Option<&NewAnswer>,
    ) -> Result<(Message, Option<MessageAnswer>)> {
        let mut tx = self.pool.begin().await?;

        let stored_answer = match answer {
            Some(answer) => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO gt_net_message_answer
                    (request_key, request_code, response_code, payload, created_at, expires_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    ON CONFLICT(request_key) DO UPDATE SET
                        response_code = excluded.response_code,
                        payload = excluded.payload,
                        created_at = excluded.created_at,
                        expires_at = excluded.expires_at
                    RETURNING id, request_key, request_code, response_code, payload,
                        created_at, expires_at
                    "#,
                )
                .bind(answer.request_key.as_str())
                .bind(answer.request_code.as_str())
                .bind(answer.response_code.as_str())
                .bind(serde_json::to_string(&answer.payload)?)
                .bind(ts_to_db(answer.created_at))
                .bind(answer.expires_at.map(ts_to_db))
                .fetch_one(&mut *tx)
                .await
                .context("Failed to cache message answer")?;
                Some(Self::map_answer(&row)?)
            }
            None => None,
        };

        let mut reply = reply.clone();
        if let Some(stored) = &stored_answer {
            reply.answer_id = Some(stored.id);
        }
        let stored_reply = Self::insert_in_tx(&mut tx, &reply).await?;

        if let Some(original_id) = reply.reply_to {
            sqlx::query("UPDATE gt_net_message SET delivered = 1 WHERE id = ?")
                .bind(original_id)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to mark message {} delivered", original_id))?;
        }

        tx.commit().await?;

        debug!(
            "Recorded {} reply {} (cached answer: {})",
            stored_reply.code,
            stored_reply.id,
            stored_answer.is_some()
        );
        Ok((stored_reply, stored_answer))
    }
}
