use chrono::Utc;
use sqlx::SqlitePool;

use crate::data_formats::ArticleForm;
use crate::errors::RequestError;
use crate::models::Article;

use super::{attach_category, QueryBuilder};

const ARTICLE_QUERY: &str = r#"
            SELECT articles.id                                      AS "id",
                   articles.title                                   AS "title",
                   articles.content                                 AS "content",
                   articles.excerpt                                 AS "excerpt",
                   articles.slug                                    AS "slug",
                   articles.status                                  AS "status",
                   articles.image                                   AS "image",
                   articles.author_id                               AS "author_id",
                   articles.created_at                              AS "created_at",
                   articles.updated_at                              AS "updated_at",
                   (SELECT Json_group_array(tagged.name)
                    FROM   (SELECT categories.name
                            FROM   categories
                                   JOIN article_categories
                                     ON article_categories.category_id = categories.id
                            WHERE  article_categories.article_id = articles.id
                            ORDER  BY article_categories.rowid) AS tagged) AS "categories",
                   users.name                                       AS "author_name",
                   users.avatar_url                                 AS "author_avatar"
            FROM   articles
                   LEFT JOIN users
                          ON users.id = articles.author_id
"#;

pub async fn list_articles_in_db(
    pool: &SqlitePool,
    search: Option<&str>,
) -> Result<Vec<Article>, RequestError> {
    let query = format!(
        "{ARTICLE_QUERY}
            WHERE ?1 IS NULL
               OR articles.title LIKE '%' || ?1 || '%'
               OR articles.content LIKE '%' || ?1 || '%'
            ORDER BY articles.created_at DESC, articles.id DESC"
    );
    let search = search.map(str::trim).filter(|s| !s.is_empty());
    let result = sqlx::query_as::<_, Article>(&query)
        .bind(search)
        .fetch_all(pool)
        .await?;
    Ok(result)
}

pub async fn get_article_by_slug_in_db(
    pool: &SqlitePool,
    slug: &str,
) -> Result<Option<Article>, RequestError> {
    let query = format!("{ARTICLE_QUERY} WHERE articles.slug = ?1");
    let result = sqlx::query_as::<_, Article>(&query)
        .bind(slug)
        .fetch_optional(pool)
        .await?;
    Ok(result)
}

pub async fn get_article_by_id_in_db(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<Article>, RequestError> {
    let query = format!("{ARTICLE_QUERY} WHERE articles.id = ?1");
    let result = sqlx::query_as::<_, Article>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(result)
}

/// Inserts a validated article. `title`, `content` and `slug` must be set.
pub async fn create_article_in_db(
    pool: &SqlitePool,
    author_id: i64,
    ArticleForm {
        title,
        content,
        excerpt,
        slug,
        status,
        category_name,
        image,
    }: ArticleForm,
) -> Result<Article, RequestError> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let article_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO articles (title, content, excerpt, slug, status, image, author_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        RETURNING id
        "#,
    )
    .bind(title)
    .bind(content)
    .bind(excerpt)
    .bind(slug)
    .bind(status.unwrap_or_else(|| "draft".to_string()))
    .bind(image)
    .bind(author_id)
    .bind(now)
    .fetch_one(&mut tx)
    .await
    .map_err(|e| RequestError::from(e).on_unique_violation("An article with this slug already exists"))?;

    if let Some(name) = category_name {
        attach_category(&mut tx, article_id, &name).await?;
    }
    tx.commit().await?;

    get_article_by_id_in_db(pool, article_id)
        .await?
        .ok_or(RequestError::NotFound("Article not found"))
}

/// Applies the fields present in `form`; absent ones are left as they are.
pub async fn update_article_in_db(
    pool: &SqlitePool,
    id: i64,
    ArticleForm {
        title,
        content,
        excerpt,
        slug,
        status,
        category_name,
        image,
    }: ArticleForm,
) -> Result<Article, RequestError> {
    let mut tx = pool.begin().await?;

    let builder = QueryBuilder::new("UPDATE articles SET ".to_owned(), ", ")
        .add_param("title", title)
        .add_param("content", content)
        .add_param("excerpt", excerpt)
        .add_param("slug", slug)
        .add_param("status", status)
        .add_param("image", image)
        .add_param("updated_at", Some(Utc::now().to_rfc3339()));
    let where_index = builder.next_index();
    let (query, params) = builder.build().ok_or(RequestError::ServerError)?;
    let query = format!("{query} WHERE id = ?{where_index}");

    let mut update = sqlx::query(&query);
    for param in params {
        update = update.bind(param);
    }
    let result = update
        .bind(id)
        .execute(&mut tx)
        .await
        .map_err(|e| RequestError::from(e).on_unique_violation("An article with this slug already exists"))?;
    if result.rows_affected() == 0 {
        return Err(RequestError::NotFound("Article not found"));
    }

    if let Some(name) = category_name {
        attach_category(&mut tx, id, &name).await?;
    }
    tx.commit().await?;

    get_article_by_id_in_db(pool, id)
        .await?
        .ok_or(RequestError::NotFound("Article not found"))
}

pub async fn delete_article_in_db(pool: &SqlitePool, id: i64) -> Result<(), RequestError> {
    let result = sqlx::query("DELETE FROM articles WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(RequestError::NotFound("Article not found"));
    }
    Ok(())
}
