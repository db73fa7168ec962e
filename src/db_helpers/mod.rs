use sqlx::SqlitePool;

use crate::{errors::RequestError, models::User};

mod article_helpers;
mod category_helpers;
mod comment_helpers;
mod notification_helpers;
mod user_helpers;
mod vote_helpers;

pub use article_helpers::*;
pub use category_helpers::*;
pub use comment_helpers::*;
pub use notification_helpers::*;
pub use user_helpers::*;
pub use vote_helpers::*;

/// Builds the `SET` list of a partial update from the fields that are present.
struct QueryBuilder {
    query: String,
    params: Vec<String>,
    seperator: &'static str,
}

impl QueryBuilder {
    fn new(initial: String, seperator: &'static str) -> Self {
        Self {
            query: initial,
            params: vec![],
            seperator,
        }
    }

    fn add_param(mut self, column: &str, param: Option<String>) -> Self {
        if let Some(value) = param {
            if !self.params.is_empty() {
                self.query.push_str(self.seperator);
            }
            self.query
                .push_str(&format!("{} = ?{}", column, self.params.len() + 1));
            self.params.push(value);
        }
        self
    }

    /// Index the next placeholder appended by the caller should use.
    fn next_index(&self) -> usize {
        self.params.len() + 1
    }

    /// `None` when no field was set.
    fn build(self) -> Option<(String, Vec<String>)> {
        if self.params.is_empty() {
            None
        } else {
            Some((self.query, self.params))
        }
    }
}

// ----------------- Helper Functions -----------------

const USER_COLUMNS: &str = "id, email, password, name, avatar_url, provider, is_admin, google_id, github_id, reset_password, reset_expires_at, created_at, updated_at";

pub async fn get_user_by_email(
    pool: &SqlitePool,
    email: &str,
) -> Result<Option<User>, RequestError> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
    let result = sqlx::query_as::<_, User>(&query)
        .bind(email.to_lowercase())
        .fetch_optional(pool)
        .await?;
    Ok(result)
}

pub async fn get_user_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>, RequestError> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    let result = sqlx::query_as::<_, User>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_builder_skips_missing_fields() {
        let (query, params) = QueryBuilder::new("UPDATE articles SET ".to_owned(), ", ")
            .add_param("title", Some("Paranoid".to_string()))
            .add_param("content", None)
            .add_param("slug", Some("paranoid".to_string()))
            .build()
            .unwrap();
        assert_eq!(query, "UPDATE articles SET title = ?1, slug = ?2");
        assert_eq!(params, vec!["Paranoid", "paranoid"]);
    }

    #[test]
    fn query_builder_without_fields_builds_nothing() {
        let builder = QueryBuilder::new("UPDATE articles SET ".to_owned(), ", ")
            .add_param("title", None);
        assert_eq!(builder.next_index(), 1);
        assert!(builder.build().is_none());
    }
}
