use chrono::Utc;
use sqlx::SqlitePool;

use crate::{errors::RequestError, models::Comment};

const COMMENT_QUERY: &str = r#"
            SELECT comments.id          AS "id",
                   comments.content     AS "content",
                   comments.author_id   AS "author_id",
                   comments.article_id  AS "article_id",
                   comments.parent_id   AS "parent_id",
                   comments.likes       AS "likes",
                   comments.dislikes    AS "dislikes",
                   comments.created_at  AS "created_at",
                   comments.updated_at  AS "updated_at",
                   users.name           AS "author_name",
                   users.avatar_url     AS "author_avatar"
            FROM   comments
                   JOIN users
                     ON users.id = comments.author_id
"#;

/// A freshly stored comment along with what the notification rules need to
/// know about where it was posted.
#[derive(Debug, Clone)]
pub struct PostedComment {
    pub comment: Comment,
    pub article_slug: String,
    pub article_author_id: Option<i64>,
    pub parent_author_id: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct ArticleRef {
    id: i64,
    slug: String,
    author_id: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct ParentRef {
    article_id: i64,
    author_id: i64,
}

/// All comments of an article, oldest first. An unknown slug has no
/// comments.
pub async fn get_comments_for_article_in_db(
    pool: &SqlitePool,
    slug: &str,
) -> Result<Vec<Comment>, RequestError> {
    let query = format!(
        "{COMMENT_QUERY}
                   JOIN articles
                     ON articles.id = comments.article_id
            WHERE  articles.slug = ?1
            ORDER  BY comments.created_at ASC, comments.id ASC"
    );
    let result = sqlx::query_as::<_, Comment>(&query)
        .bind(slug)
        .fetch_all(pool)
        .await?;
    Ok(result)
}

pub async fn get_comment_by_id_in_db(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<Comment>, RequestError> {
    let query = format!("{COMMENT_QUERY} WHERE comments.id = ?1");
    let result = sqlx::query_as::<_, Comment>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(result)
}

/// Stores a comment. A parent, when given, must belong to the same article.
/// A parent or article deleted between the checks and the insert is caught
/// by the foreign keys.
pub async fn add_comment_to_article_in_db(
    pool: &SqlitePool,
    author_id: i64,
    slug: &str,
    content: &str,
    parent_id: Option<i64>,
) -> Result<PostedComment, RequestError> {
    let article = sqlx::query_as::<_, ArticleRef>(
        "SELECT id, slug, author_id FROM articles WHERE slug = ?1",
    )
    .bind(slug)
    .fetch_optional(pool)
    .await?
    .ok_or(RequestError::NotFound("Article not found"))?;

    let parent_author_id = match parent_id {
        Some(parent_id) => {
            let parent = sqlx::query_as::<_, ParentRef>(
                "SELECT article_id, author_id FROM comments WHERE id = ?1",
            )
            .bind(parent_id)
            .fetch_optional(pool)
            .await?
            .ok_or(RequestError::NotFound("Parent comment not found"))?;
            if parent.article_id != article.id {
                return Err(RequestError::BadRequest(
                    "Parent comment belongs to another article",
                ));
            }
            Some(parent.author_id)
        }
        None => None,
    };

    let now = Utc::now();
    let comment_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO comments (content, author_id, article_id, parent_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?5)
        RETURNING id
        "#,
    )
    .bind(content)
    .bind(author_id)
    .bind(article.id)
    .bind(parent_id)
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        RequestError::from(e).on_foreign_key_violation("Article or parent comment not found")
    })?;

    let comment = get_comment_by_id_in_db(pool, comment_id)
        .await?
        .ok_or(RequestError::NotFound("Comment not found"))?;

    Ok(PostedComment {
        comment,
        article_slug: article.slug,
        article_author_id: article.author_id,
        parent_author_id,
    })
}

/// Only the author may edit a comment.
pub async fn update_comment_in_db(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
    content: &str,
) -> Result<Comment, RequestError> {
    let existing = get_comment_by_id_in_db(pool, id)
        .await?
        .ok_or(RequestError::NotFound("Comment not found"))?;
    if existing.author_id != user_id {
        return Err(RequestError::Forbidden);
    }

    sqlx::query("UPDATE comments SET content = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(content)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

    get_comment_by_id_in_db(pool, id)
        .await?
        .ok_or(RequestError::NotFound("Comment not found"))
}

/// Deletes a comment and, through the foreign key cascade, all its replies.
/// Allowed for the author and for admins.
pub async fn delete_comment_in_db(
    pool: &SqlitePool,
    id: i64,
    user_id: i64,
    is_admin: bool,
) -> Result<(), RequestError> {
    let author_id: i64 = sqlx::query_scalar("SELECT author_id FROM comments WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(RequestError::NotFound("Comment not found"))?;
    if author_id != user_id && !is_admin {
        return Err(RequestError::Forbidden);
    }

    let result = sqlx::query("DELETE FROM comments WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(RequestError::NotFound("Comment not found"));
    }
    Ok(())
}
