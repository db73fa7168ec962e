use chrono::Utc;
use sqlx::SqlitePool;

use crate::{errors::RequestError, models::Notification, notifier::NewNotification};

const NOTIFICATION_QUERY: &str = r#"
            SELECT notifications.id            AS "id",
                   notifications.user_id       AS "user_id",
                   notifications.kind          AS "kind",
                   notifications.message       AS "message",
                   notifications.link          AS "link",
                   notifications.from_user_id  AS "from_user_id",
                   notifications.comment_id    AS "comment_id",
                   notifications.is_read       AS "is_read",
                   notifications.created_at    AS "created_at",
                   users.name                  AS "from_user_name",
                   users.avatar_url            AS "from_user_avatar"
            FROM   notifications
                   LEFT JOIN users
                          ON users.id = notifications.from_user_id
"#;

pub async fn insert_notification_in_db(
    pool: &SqlitePool,
    notification: &NewNotification,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO notifications (user_id, kind, message, link, from_user_id, comment_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING id
        "#,
    )
    .bind(notification.user_id)
    .bind(notification.kind.as_str())
    .bind(&notification.message)
    .bind(&notification.link)
    .bind(notification.from_user_id)
    .bind(notification.comment_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
}

/// Newest first.
pub async fn get_notifications_in_db(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Vec<Notification>, RequestError> {
    let query = format!(
        "{NOTIFICATION_QUERY} WHERE notifications.user_id = ?1 ORDER BY notifications.created_at DESC, notifications.id DESC"
    );
    let result = sqlx::query_as::<_, Notification>(&query)
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(result)
}

pub async fn count_unread_notifications_in_db(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<i64, RequestError> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Ownership is part of the filter, so another user's notification reads as
/// missing.
pub async fn mark_notification_read_in_db(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
) -> Result<(), RequestError> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(RequestError::NotFound("Notification not found"));
    }
    Ok(())
}

pub async fn mark_all_notifications_read_in_db(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<u64, RequestError> {
    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_read_notifications_in_db(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<u64, RequestError> {
    let result = sqlx::query("DELETE FROM notifications WHERE user_id = ?1 AND is_read = 1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_notification_in_db(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
) -> Result<(), RequestError> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = ?1 AND user_id = ?2")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(RequestError::NotFound("Notification not found"));
    }
    Ok(())
}

pub async fn delete_all_notifications_in_db(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<u64, RequestError> {
    let result = sqlx::query("DELETE FROM notifications WHERE user_id = ?1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
