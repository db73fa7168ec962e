use serde::{Deserialize, Serialize};

use crate::vote::VoteType;

// ----------------- User Request -----------------
#[derive(Deserialize, Serialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Serialize, Debug, Default)]
#[serde(default)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

// ----------------- Article Request -----------------
#[derive(Deserialize, Serialize, Debug, Default)]
pub struct ArticleQueryParams {
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct CategoryRequest {
    #[serde(default)]
    pub name: String,
}

// ----------------- Comment Request -----------------
#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommentRequest {
    pub article_slug: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

#[derive(Deserialize, Serialize, Debug)]
pub struct UpdateCommentRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub comment_id: i64,
    pub vote_type: VoteType,
}

// ----------------- OAuth Request -----------------
#[derive(Deserialize, Serialize, Debug, Default)]
pub struct OAuthCallbackParams {
    #[serde(default)]
    pub code: Option<String>,
}

/// Text fields of the multipart article form, plus the stored image path.
#[derive(Debug, Default, Clone)]
pub struct ArticleForm {
    pub title: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub slug: Option<String>,
    pub status: Option<String>,
    pub category_name: Option<String>,
    pub image: Option<String>,
}
