//! Conversation log persistence.
//!
//! Append-only: one row per inbound/outbound exchange attempt. Rows are
//! never updated or deleted by the service.

use chrono::Utc;
use nursetalk_core::models::{ConversationTurn, TurnStatus};
use sqlx::SqlitePool;

/// Record one exchange. Returns the row id.
pub async fn append_turn(
    pool: &SqlitePool,
    phone_number: &str,
    user_input: &str,
    bot_response: &str,
    response_time: Option<f64>,
    status: TurnStatus,
) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO conversation (phone_number, timestamp, user_input, bot_response, response_time, status)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        RETURNING id
        "#,
    )
    .bind(phone_number)
    .bind(Utc::now())
    .bind(user_input)
    .bind(bot_response)
    .bind(response_time)
    .bind(status.as_str())
    .fetch_one(pool)
    .await?;

    Ok(row.0)
}

/// The phone number's most recent turns, newest first.
pub async fn recent_turns(
    pool: &SqlitePool,
    phone_number: &str,
    limit: i64,
) -> Result<Vec<ConversationTurn>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, phone_number, timestamp, user_input, bot_response, response_time, status
        FROM conversation
        WHERE phone_number = ?1
        ORDER BY timestamp DESC, id DESC
        LIMIT ?2
        "#,
    )
    .bind(phone_number)
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn make_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory SQLite pool");
        nursetalk_core::db::init_schema(&pool)
            .await
            .expect("schema init");
        pool
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let pool = make_pool().await;

        let id = append_turn(
            &pool,
            "+15550001111",
            "fever",
            "I've noted that.",
            None,
            TurnStatus::Processing,
        )
        .await
        .expect("append failed");
        assert!(id > 0);

        let turns = recent_turns(&pool, "+15550001111", 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].user_input, "fever");
        assert_eq!(turns[0].status, "processing");
        assert!(turns[0].response_time.is_none());
    }

    #[tokio::test]
    async fn test_recent_returns_newest_first_and_respects_limit() {
        let pool = make_pool().await;

        for i in 0..5 {
            append_turn(
                &pool,
                "+15550001111",
                &format!("symptom {}", i),
                "ack",
                None,
                TurnStatus::Processing,
            )
            .await
            .unwrap();
        }

        let turns = recent_turns(&pool, "+15550001111", 3).await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].user_input, "symptom 4");
        assert_eq!(turns[2].user_input, "symptom 2");
    }

    #[tokio::test]
    async fn test_recent_is_scoped_to_phone_number() {
        let pool = make_pool().await;

        append_turn(&pool, "+15550001111", "fever", "ack", None, TurnStatus::Processing)
            .await
            .unwrap();
        append_turn(&pool, "+15552223333", "rash", "ack", None, TurnStatus::Processing)
            .await
            .unwrap();

        let turns = recent_turns(&pool, "+15550001111", 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].phone_number, "+15550001111");
    }

    #[tokio::test]
    async fn test_response_time_round_trips() {
        let pool = make_pool().await;

        append_turn(
            &pool,
            "+15550001111",
            "no",
            "Diagnosis:\nflu",
            Some(2.75),
            TurnStatus::Sent,
        )
        .await
        .unwrap();

        let turns = recent_turns(&pool, "+15550001111", 1).await.unwrap();
        assert_eq!(turns[0].response_time, Some(2.75));
        assert_eq!(turns[0].status, "sent");
    }
}
