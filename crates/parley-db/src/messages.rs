use chrono::{DateTime, Utc};

use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub group_id: Option<String>,
    pub message_type: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct NewMessage<'a> {
    pub id: i64,
    pub sender_id: &'a str,
    pub receiver_id: Option<&'a str>,
    pub group_id: Option<&'a str>,
    pub message_type: &'a str,
    pub content: &'a str,
    pub created_at: DateTime<Utc>,
}

pub async fn create_message(pool: &DbPool, message: NewMessage<'_>) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO chat_messages (id, sender_id, receiver_id, group_id, message_type, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(message.id)
    .bind(message.sender_id)
    .bind(message.receiver_id.map(str::to_string))
    .bind(message.group_id.map(str::to_string))
    .bind(message.message_type)
    .bind(message.content)
    .bind(datetime_to_db_text(message.created_at))
    .execute(pool)
    .await?;
    Ok(())
}

type RawMessageRow = (
    i64,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
);

fn decode_row(raw: RawMessageRow) -> Result<MessageRow, DbError> {
    let (id, sender_id, receiver_id, group_id, message_type, content, created_at) = raw;
    Ok(MessageRow {
        id,
        sender_id,
        receiver_id,
        group_id,
        message_type,
        content,
        created_at: datetime_from_db_text(&created_at)?,
    })
}

pub async fn get_message(pool: &DbPool, id: i64) -> Result<Option<MessageRow>, DbError> {
    let row: Option<RawMessageRow> = sqlx::query_as(
        "SELECT id, sender_id, receiver_id, group_id, message_type, content, created_at
         FROM chat_messages WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(decode_row).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> DbPool {
        let pool = crate::create_pool("sqlite::memory:", 1).await.expect("pool");
        crate::run_migrations(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn direct_message_round_trips() {
        let pool = pool().await;
        let created_at = Utc::now();
        create_message(
            &pool,
            NewMessage {
                id: 7,
                sender_id: "a",
                receiver_id: Some("b"),
                group_id: None,
                message_type: "dm",
                content: "hello",
                created_at,
            },
        )
        .await
        .expect("insert");

        let row = get_message(&pool, 7).await.expect("query").expect("row");
        assert_eq!(row.receiver_id.as_deref(), Some("b"));
        assert_eq!(row.group_id, None);
        assert_eq!(row.content, "hello");
        assert_eq!(
            row.created_at.timestamp_millis(),
            created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn message_must_have_exactly_one_target() {
        let pool = pool().await;
        let result = create_message(
            &pool,
            NewMessage {
                id: 8,
                sender_id: "a",
                receiver_id: Some("b"),
                group_id: Some("g"),
                message_type: "dm",
                content: "both",
                created_at: Utc::now(),
            },
        )
        .await;
        assert!(result.is_err());
    }
}
