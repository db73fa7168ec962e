use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub password: Option<String>,
    pub name: String,
    pub avatar_url: Option<String>,
    pub provider: String,
    pub is_admin: bool,
    pub google_id: Option<String>,
    pub github_id: Option<String>,
    /// Hash of a temporary password issued by a reset request. It is accepted
    /// next to `password` until `reset_expires_at`.
    pub reset_password: Option<String>,
    pub reset_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An article joined with its author and its category names as a JSON array.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub slug: String,
    pub status: String,
    pub image: Option<String>,
    pub author_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub categories: Option<String>,
    pub author_name: Option<String>,
    pub author_avatar: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// A comment joined with the public fields of its author.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub content: String,
    pub author_id: i64,
    pub article_id: i64,
    pub parent_id: Option<i64>,
    pub likes: i64,
    pub dislikes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author_name: String,
    pub author_avatar: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub message: String,
    pub link: Option<String>,
    pub from_user_id: Option<i64>,
    pub comment_id: Option<i64>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub from_user_name: Option<String>,
    pub from_user_avatar: Option<String>,
}
