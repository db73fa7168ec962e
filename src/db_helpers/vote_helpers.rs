use chrono::Utc;
use sqlx::SqlitePool;

use crate::errors::{is_unique_violation, RequestError};
use crate::vote::{apply_vote, VoteChange, VoteOutcome, VoteType};

#[derive(Debug, Clone)]
pub struct CastVote {
    pub outcome: VoteOutcome,
    pub likes: i64,
    pub dislikes: i64,
    pub comment_author_id: i64,
    pub article_id: i64,
}

#[derive(sqlx::FromRow)]
struct VotedComment {
    author_id: i64,
    article_id: i64,
}

#[derive(sqlx::FromRow)]
struct Counters {
    likes: i64,
    dislikes: i64,
}

/// Records `requested` for `user_id` and moves the comment counters in the
/// same transaction.
///
/// The transaction opens with a write on the comment row, so concurrent votes
/// queue on the database lock instead of failing a read-to-write upgrade. A
/// duplicate first vote that still trips the unique `(user_id, comment_id)`
/// constraint is retried once and then sees the winner's row as its prior
/// vote.
pub async fn cast_vote_in_db(
    pool: &SqlitePool,
    user_id: i64,
    comment_id: i64,
    requested: VoteType,
) -> Result<CastVote, RequestError> {
    let mut retried = false;
    loop {
        match try_cast_vote(pool, user_id, comment_id, requested).await {
            Err(RequestError::DatabaseError(e)) if !retried && is_unique_violation(&e) => {
                tracing::warn!(user_id, comment_id, "Concurrent vote detected, retrying");
                retried = true;
            }
            result => return result,
        }
    }
}

async fn try_cast_vote(
    pool: &SqlitePool,
    user_id: i64,
    comment_id: i64,
    requested: VoteType,
) -> Result<CastVote, RequestError> {
    let mut tx = pool.begin().await?;

    let comment = sqlx::query_as::<_, VotedComment>(
        "UPDATE comments SET likes = likes WHERE id = ?1 RETURNING author_id, article_id",
    )
    .bind(comment_id)
    .fetch_optional(&mut tx)
    .await?
    .ok_or(RequestError::NotFound("Comment not found"))?;

    let existing = sqlx::query_scalar::<_, String>(
        "SELECT vote_type FROM comment_votes WHERE user_id = ?1 AND comment_id = ?2",
    )
    .bind(user_id)
    .bind(comment_id)
    .fetch_optional(&mut tx)
    .await?
    .and_then(|vote| vote.parse::<VoteType>().ok());

    let outcome = apply_vote(existing, requested);
    match outcome.change {
        VoteChange::Create(vote) => {
            sqlx::query(
                "INSERT INTO comment_votes (user_id, comment_id, vote_type, created_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(user_id)
            .bind(comment_id)
            .bind(vote.as_str())
            .bind(Utc::now())
            .execute(&mut tx)
            .await?;
        }
        VoteChange::Update(vote) => {
            sqlx::query(
                "UPDATE comment_votes SET vote_type = ?1 WHERE user_id = ?2 AND comment_id = ?3",
            )
            .bind(vote.as_str())
            .bind(user_id)
            .bind(comment_id)
            .execute(&mut tx)
            .await?;
        }
        VoteChange::Delete => {
            sqlx::query("DELETE FROM comment_votes WHERE user_id = ?1 AND comment_id = ?2")
                .bind(user_id)
                .bind(comment_id)
                .execute(&mut tx)
                .await?;
        }
    }

    let counters = sqlx::query_as::<_, Counters>(
        r#"
        UPDATE comments
        SET likes = likes + ?1, dislikes = dislikes + ?2
        WHERE id = ?3
        RETURNING likes, dislikes
        "#,
    )
    .bind(outcome.like_delta)
    .bind(outcome.dislike_delta)
    .bind(comment_id)
    .fetch_one(&mut tx)
    .await?;
    tx.commit().await?;

    Ok(CastVote {
        outcome,
        likes: counters.likes,
        dislikes: counters.dislikes,
        comment_author_id: comment.author_id,
        article_id: comment.article_id,
    })
}
