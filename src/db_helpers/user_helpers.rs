use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{errors::RequestError, models::User};

use super::{get_user_by_email, get_user_by_id, USER_COLUMNS};

/// Profile returned by a social-login provider.
#[derive(Debug, Clone)]
pub struct SocialProfile {
    pub provider: SocialProvider,
    pub provider_id: String,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialProvider {
    Google,
    Github,
}

impl SocialProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialProvider::Google => "google",
            SocialProvider::Github => "github",
        }
    }

    fn id_column(&self) -> &'static str {
        match self {
            SocialProvider::Google => "google_id",
            SocialProvider::Github => "github_id",
        }
    }
}

/// Creates a local account. The first account ever registered becomes admin;
/// the check runs inside the insert so two racing sign-ups cannot both win.
pub async fn insert_user(
    pool: &SqlitePool,
    email: &str,
    password_hash: &str,
    name: &str,
) -> Result<User, RequestError> {
    let query = format!(
        "INSERT INTO users (email, password, name, provider, is_admin, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'local', NOT EXISTS (SELECT 1 FROM users), ?4, ?4)
         RETURNING {USER_COLUMNS}"
    );
    let user = sqlx::query_as::<_, User>(&query)
        .bind(email.to_lowercase())
        .bind(password_hash)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
    Ok(user)
}

pub async fn update_avatar_in_db(
    pool: &SqlitePool,
    id: i64,
    avatar_url: &str,
) -> Result<(), RequestError> {
    let result = sqlx::query("UPDATE users SET avatar_url = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(avatar_url)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(RequestError::NotFound("User not found"));
    }
    Ok(())
}

/// Stores the hash of a temporary password. The current password keeps
/// working; a newer request replaces an older pending one.
pub async fn set_pending_reset_in_db(
    pool: &SqlitePool,
    id: i64,
    reset_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), RequestError> {
    sqlx::query("UPDATE users SET reset_password = ?1, reset_expires_at = ?2 WHERE id = ?3")
        .bind(reset_hash)
        .bind(expires_at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Makes the pending temporary password the account password.
pub async fn promote_pending_reset_in_db(pool: &SqlitePool, id: i64) -> Result<(), RequestError> {
    sqlx::query(
        r#"
        UPDATE users
        SET password = reset_password, reset_password = NULL, reset_expires_at = NULL, updated_at = ?1
        WHERE id = ?2 AND reset_password IS NOT NULL
        "#,
    )
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Links the provider to the account with the same e-mail, or creates a
/// password-less account for it.
pub async fn upsert_social_user(
    pool: &SqlitePool,
    SocialProfile {
        provider,
        provider_id,
        email,
        name,
        avatar_url,
    }: SocialProfile,
) -> Result<User, RequestError> {
    let email = email.to_lowercase();
    let now = Utc::now();
    let id_column = provider.id_column();

    let id = match get_user_by_email(pool, &email).await? {
        Some(user) => {
            let query = format!(
                "UPDATE users SET {id_column} = ?1, provider = ?2, avatar_url = COALESCE(?3, avatar_url), updated_at = ?4 WHERE id = ?5"
            );
            sqlx::query(&query)
                .bind(&provider_id)
                .bind(provider.as_str())
                .bind(&avatar_url)
                .bind(now)
                .bind(user.id)
                .execute(pool)
                .await?;
            user.id
        }
        None => {
            let query = format!(
                "INSERT INTO users (email, password, name, provider, {id_column}, avatar_url, created_at, updated_at)
                 VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?6)
                 RETURNING id"
            );
            sqlx::query_scalar::<_, i64>(&query)
                .bind(&email)
                .bind(&name)
                .bind(provider.as_str())
                .bind(&provider_id)
                .bind(&avatar_url)
                .bind(now)
                .fetch_one(pool)
                .await?
        }
    };

    get_user_by_id(pool, id)
        .await?
        .ok_or(RequestError::NotFound("User not found"))
}
