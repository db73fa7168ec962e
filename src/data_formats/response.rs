use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Article, Category, Comment, Notification, User};
use crate::vote::VoteType;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub provider: String,
    pub is_admin: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorResponse {
    pub id: i64,
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ArticleResponse {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub excerpt: Option<String>,
    pub slug: String,
    pub status: String,
    pub image: Option<String>,
    pub author_id: Option<i64>,
    pub author: Option<AuthorResponse>,
    pub categories: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CategoryResponse {
    pub id: i64,
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentResponse {
    pub id: i64,
    pub content: String,
    pub author_id: i64,
    pub article_id: i64,
    pub parent_id: Option<i64>,
    pub likes: i64,
    pub dislikes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: AuthorResponse,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub comment_id: i64,
    pub likes: i64,
    pub dislikes: i64,
    pub user_vote: Option<VoteType>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FromUserResponse {
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub link: Option<String>,
    pub from_user_id: Option<i64>,
    pub from_user: Option<FromUserResponse>,
    pub comment_id: Option<i64>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct UnreadCountResponse {
    pub count: i64,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct ImageLocationResponse {
    pub location: String,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AvatarResponse {
    pub avatar_url: String,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct StatusResponse {
    pub status: String,
    pub db: String,
}

impl UserResponse {
    pub fn new(
        User {
            id,
            email,
            name,
            avatar_url,
            provider,
            is_admin,
            ..
        }: User,
    ) -> Self {
        UserResponse {
            id,
            email,
            name,
            avatar_url,
            provider,
            is_admin,
        }
    }
}

/// Category names arrive as a JSON array so that any character may appear in
/// a name.
fn parse_category_names(names: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<Option<String>>>(names) {
        Ok(names) => names.into_iter().flatten().collect(),
        Err(e) => {
            tracing::warn!("Unreadable category list {:?}: {}", names, e);
            Vec::new()
        }
    }
}

impl ArticleResponse {
    pub fn new(
        Article {
            id,
            title,
            content,
            excerpt,
            slug,
            status,
            image,
            author_id,
            created_at,
            updated_at,
            categories,
            author_name,
            author_avatar,
        }: Article,
    ) -> Self {
        let author = match (author_id, author_name) {
            (Some(id), Some(name)) => Some(AuthorResponse {
                id,
                name,
                avatar_url: author_avatar,
            }),
            _ => None,
        };
        ArticleResponse {
            id,
            title,
            content,
            excerpt,
            slug,
            status,
            image,
            author_id,
            author,
            categories: categories
                .as_deref()
                .map(parse_category_names)
                .unwrap_or_default(),
            created_at,
            updated_at,
        }
    }
}

impl From<Category> for CategoryResponse {
    fn from(Category { id, name }: Category) -> Self {
        CategoryResponse { id, name }
    }
}

impl CommentResponse {
    pub fn new(
        Comment {
            id,
            content,
            author_id,
            article_id,
            parent_id,
            likes,
            dislikes,
            created_at,
            updated_at,
            author_name,
            author_avatar,
        }: Comment,
    ) -> Self {
        CommentResponse {
            id,
            content,
            author_id,
            article_id,
            parent_id,
            likes,
            dislikes,
            created_at,
            updated_at,
            author: AuthorResponse {
                id: author_id,
                name: author_name,
                avatar_url: author_avatar,
            },
        }
    }
}

impl NotificationResponse {
    pub fn new(
        Notification {
            id,
            user_id,
            kind,
            message,
            link,
            from_user_id,
            comment_id,
            is_read,
            created_at,
            from_user_name,
            from_user_avatar,
        }: Notification,
    ) -> Self {
        NotificationResponse {
            id,
            user_id,
            kind,
            message,
            link,
            from_user_id,
            from_user: from_user_name.map(|name| FromUserResponse {
                name,
                avatar_url: from_user_avatar,
            }),
            comment_id,
            read: is_read,
            created_at,
        }
    }
}
