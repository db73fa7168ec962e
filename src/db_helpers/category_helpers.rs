use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::{errors::RequestError, models::Category};

pub async fn get_categories_in_db(pool: &SqlitePool) -> Result<Vec<Category>, RequestError> {
    let result = sqlx::query_as::<_, Category>("SELECT id, name FROM categories ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(result)
}

pub async fn create_category_in_db(pool: &SqlitePool, name: &str) -> Result<Category, RequestError> {
    let result = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (name) VALUES (?1) RETURNING id, name",
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .map_err(|e| RequestError::from(e).on_unique_violation("Category with this name already exists"))?;
    Ok(result)
}

/// Tags an article, creating the category on first use.
pub(super) async fn attach_category(
    tx: &mut Transaction<'_, Sqlite>,
    article_id: i64,
    name: &str,
) -> Result<(), RequestError> {
    let category_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO categories (name)
        VALUES (?1)
        ON CONFLICT (name) DO UPDATE SET name = ?1
        RETURNING id
        "#,
    )
    .bind(name)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO article_categories (article_id, category_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
    )
    .bind(article_id)
    .bind(category_id)
    .execute(&mut *tx)
    .await?;
    Ok(())
}

/// Name of the first category the article was tagged with.
pub async fn primary_category_in_db(
    pool: &SqlitePool,
    article_id: i64,
) -> Result<Option<String>, RequestError> {
    let result = sqlx::query_scalar::<_, String>(
        r#"
        SELECT categories.name
        FROM article_categories
            JOIN categories ON categories.id = article_categories.category_id
        WHERE article_categories.article_id = ?1
        ORDER BY article_categories.rowid
        LIMIT 1
        "#,
    )
    .bind(article_id)
    .fetch_optional(pool)
    .await?;
    Ok(result)
}
