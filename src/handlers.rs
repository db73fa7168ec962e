use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Multipart, Path, Query},
    http::{StatusCode, Uri},
    response::Redirect,
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{Duration, Utc};
use rand::{distributions::Alphanumeric, Rng};

use crate::{
    authentication::{
        hash_password_argon2, match_password, removal_cookie, session_cookie, AdminUser,
        AuthUser, PasswordMatch,
    },
    comment_tree::{build_tree, CommentNode},
    data_formats::*,
    db_helpers::*,
    errors::{RequestError, RequestErrorJson},
    notifier::{comment_link, comment_notification, like_notification, CommentEvent},
    oauth,
    uploads::{read_multipart, store_image, MultipartForm},
    vote::VoteType,
    AppState, JsonResponse,
};

type UserJson = UserWrapper<UserResponse>;

type JsonResult<T> = Result<Json<T>, JsonResponse<RequestErrorJson>>;
type CreatedResult<T> = Result<JsonResponse<T>, JsonResponse<RequestErrorJson>>;

fn parse_id(raw: &str) -> Result<i64, RequestError> {
    raw.parse().map_err(|_| RequestError::BadRequest("Invalid id"))
}

// ----------------- Helper Handlers -----------------
pub async fn status(Extension(state): Extension<Arc<AppState>>) -> JsonResult<StatusResponse> {
    sqlx::query("SELECT 1")
        .execute(&state.pool)
        .await
        .map_err(RequestError::from)?;
    Ok(Json(StatusResponse {
        status: "OK".to_string(),
        db: "Connected".to_string(),
    }))
}

pub async fn not_found(uri: Uri) -> JsonResponse<RequestErrorJson> {
    (
        StatusCode::NOT_FOUND,
        Json(RequestErrorJson::new(&format!(
            "URL {} provided was not found",
            uri
        ))),
    )
}

// ----------------- Category Handlers -----------------
pub async fn list_categories(
    Extension(state): Extension<Arc<AppState>>,
) -> JsonResult<Vec<CategoryResponse>> {
    let categories = get_categories_in_db(&state.pool).await?;
    Ok(Json(categories.into_iter().map(Into::into).collect()))
}

pub async fn create_category(
    _admin: AdminUser,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<CategoryRequest>,
) -> CreatedResult<CategoryResponse> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(RequestError::BadRequest("Category name is required").into());
    }
    let category = create_category_in_db(&state.pool, name).await?;
    Ok((StatusCode::CREATED, Json(category.into())))
}

// ----------------- User Handlers -----------------
pub async fn register_user(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> CreatedResult<UserJson> {
    let email = request.email.trim();
    let name = request.name.trim();
    if email.is_empty() || request.password.is_empty() || name.is_empty() {
        return Err(RequestError::BadRequest("Email, password and name are required").into());
    }
    if !email.contains('@') {
        return Err(RequestError::BadRequest("Invalid email address").into());
    }

    let password_hash = hash_password_argon2(request.password).await.map_err(|e| {
        tracing::error!("Could not hash password: {:#}", e);
        RequestError::ServerError
    })?;
    let user = insert_user(&state.pool, email, &password_hash, name)
        .await
        .map_err(|e| e.on_unique_violation("Email already exists"))?;
    tracing::info!(user_id = user.id, admin = user.is_admin, "Registered user");

    Ok((
        StatusCode::CREATED,
        Json(UserWrapper::wrap_with_user_data(UserResponse::new(user))),
    ))
}

pub async fn login_user(
    Extension(state): Extension<Arc<AppState>>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<UserJson>), JsonResponse<RequestErrorJson>> {
    let user = get_user_by_email(&state.pool, request.email.trim())
        .await?
        .ok_or(RequestError::NotAuthorized("Invalid email or password"))?;
    let matched = match_password(&user, &request.password, Utc::now())
        .await
        .map_err(|e| {
            tracing::error!("Could not verify password: {:#}", e);
            RequestError::ServerError
        })?;
    match matched {
        PasswordMatch::Account => {}
        PasswordMatch::PendingReset => {
            promote_pending_reset_in_db(&state.pool, user.id).await?;
            tracing::info!(user_id = user.id, "Temporary password became the account password");
        }
        PasswordMatch::Neither => {
            return Err(RequestError::NotAuthorized("Invalid email or password").into());
        }
    }

    let cookie = session_cookie(&state.config.jwt_secret, user.id, state.config.cookie_secure)
        .map_err(|e| {
            tracing::error!("Could not issue session: {:#}", e);
            RequestError::ServerError
        })?;
    Ok((
        jar.add(cookie),
        Json(UserWrapper::wrap_with_user_data(UserResponse::new(user))),
    ))
}

pub async fn logout_user(jar: CookieJar) -> (CookieJar, Json<MessageWrapper>) {
    (
        jar.remove(removal_cookie()),
        Json(MessageWrapper::new("Logged out")),
    )
}

pub async fn get_current_user(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
) -> JsonResult<UserJson> {
    let user = get_user_by_id(&state.pool, user.id)
        .await?
        .ok_or(RequestError::NotFound("User not found"))?;
    Ok(Json(UserWrapper::wrap_with_user_data(UserResponse::new(user))))
}

pub async fn upload_avatar(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> JsonResult<AvatarResponse> {
    let form = read_multipart(multipart, "avatar").await?;
    let file = form
        .file
        .ok_or(RequestError::BadRequest("No file uploaded"))?;
    let avatar_url = store_image(&state.config.upload_dir, Some("avatars"), &file).await?;
    update_avatar_in_db(&state.pool, user.id, &avatar_url).await?;
    Ok(Json(AvatarResponse { avatar_url }))
}

/// How long a temporary password from a reset request stays valid.
const RESET_HOURS: i64 = 1;

fn temporary_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Answers the same way whether or not the address is registered.
///
/// The temporary password is kept next to the current one until it is used
/// or expires.
pub async fn forgot_password(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> JsonResult<MessageWrapper> {
    const REPLY: &str = "If the address is registered, a new password has been sent";

    let user = match get_user_by_email(&state.pool, request.email.trim()).await? {
        Some(user) => user,
        None => return Ok(Json(MessageWrapper::new(REPLY))),
    };
    let password_hash = hash_password_argon2(temporary_password()).await.map_err(|e| {
        tracing::error!("Could not hash password: {:#}", e);
        RequestError::ServerError
    })?;
    let expires_at = Utc::now() + Duration::hours(RESET_HOURS);
    set_pending_reset_in_db(&state.pool, user.id, &password_hash, expires_at).await?;

    // TODO: mail the temporary password to the user once an SMTP transport is configured.
    tracing::info!(user_id = user.id, %expires_at, "Issued temporary password");
    Ok(Json(MessageWrapper::new(REPLY)))
}

// ----------------- Article Handlers -----------------
pub async fn list_articles(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ArticleQueryParams>,
) -> JsonResult<Vec<ArticleResponse>> {
    let articles = list_articles_in_db(&state.pool, params.search.as_deref()).await?;
    Ok(Json(
        articles.into_iter().map(ArticleResponse::new).collect(),
    ))
}

pub async fn get_article(
    Extension(state): Extension<Arc<AppState>>,
    Path(slug): Path<String>,
) -> JsonResult<ArticleResponse> {
    let article = get_article_by_slug_in_db(&state.pool, &slug)
        .await?
        .ok_or(RequestError::NotFound("Article not found"))?;
    Ok(Json(ArticleResponse::new(article)))
}

fn normalize_status(status: Option<String>) -> Result<Option<String>, RequestError> {
    match status.map(|s| s.to_lowercase()) {
        None => Ok(None),
        Some(status) if status == "draft" || status == "published" => Ok(Some(status)),
        Some(_) => Err(RequestError::BadRequest("Status must be draft or published")),
    }
}

fn article_form(form: &MultipartForm) -> Result<ArticleForm, RequestError> {
    Ok(ArticleForm {
        title: form.text("title"),
        content: form.text("content"),
        excerpt: form.text("excerpt"),
        slug: form.text("slug"),
        status: normalize_status(form.text("status"))?,
        category_name: form.text("categoryName"),
        image: None,
    })
}

pub async fn create_article(
    AdminUser(admin): AdminUser,
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> CreatedResult<ArticleResponse> {
    let form = read_multipart(multipart, "imageFile").await?;
    let mut article = article_form(&form)?;
    if article.title.is_none() || article.content.is_none() || article.slug.is_none() {
        return Err(RequestError::BadRequest("Title, content and slug are required").into());
    }
    if let Some(file) = &form.file {
        article.image = Some(store_image(&state.config.upload_dir, None, file).await?);
    }

    let article = create_article_in_db(&state.pool, admin.id, article).await?;
    tracing::info!(article_id = article.id, slug = %article.slug, "Created article");
    Ok((StatusCode::CREATED, Json(ArticleResponse::new(article))))
}

pub async fn update_article(
    _admin: AdminUser,
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> JsonResult<ArticleResponse> {
    let id = parse_id(&id)?;
    let form = read_multipart(multipart, "imageFile").await?;
    let mut article = article_form(&form)?;
    if get_article_by_id_in_db(&state.pool, id).await?.is_none() {
        return Err(RequestError::NotFound("Article not found").into());
    }
    if let Some(file) = &form.file {
        article.image = Some(store_image(&state.config.upload_dir, None, file).await?);
    }

    let article = update_article_in_db(&state.pool, id, article).await?;
    Ok(Json(ArticleResponse::new(article)))
}

pub async fn delete_article(
    _admin: AdminUser,
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> JsonResult<MessageWrapper> {
    let id = parse_id(&id)?;
    delete_article_in_db(&state.pool, id).await?;
    tracing::info!(article_id = id, "Deleted article");
    Ok(Json(MessageWrapper::new("Article deleted successfully")))
}

pub async fn upload_article_image(
    _admin: AdminUser,
    Extension(state): Extension<Arc<AppState>>,
    multipart: Multipart,
) -> JsonResult<ImageLocationResponse> {
    let form = read_multipart(multipart, "uploadFile").await?;
    let file = form
        .file
        .ok_or(RequestError::BadRequest("No file uploaded"))?;
    let location = store_image(&state.config.upload_dir, None, &file).await?;
    Ok(Json(ImageLocationResponse { location }))
}

// ----------------- Comment Handlers -----------------
pub async fn list_comments(
    Extension(state): Extension<Arc<AppState>>,
    Path(slug): Path<String>,
) -> JsonResult<Vec<CommentResponse>> {
    let comments = get_comments_for_article_in_db(&state.pool, &slug).await?;
    Ok(Json(
        comments.into_iter().map(CommentResponse::new).collect(),
    ))
}

pub async fn get_comment_tree(
    Extension(state): Extension<Arc<AppState>>,
    Path(slug): Path<String>,
) -> JsonResult<Vec<CommentNode>> {
    let comments = get_comments_for_article_in_db(&state.pool, &slug).await?;
    Ok(Json(build_tree(
        comments.into_iter().map(CommentResponse::new).collect(),
    )))
}

/// Link to a comment under its article's section. Falls back to the default
/// section when the category lookup fails.
async fn link_to_comment(state: &AppState, article_id: i64, slug: &str, comment_id: i64) -> String {
    let category = match primary_category_in_db(&state.pool, article_id).await {
        Ok(category) => category,
        Err(e) => {
            tracing::warn!(article_id, "Could not load article category: {}", e);
            None
        }
    };
    comment_link(category.as_deref(), slug, comment_id)
}

pub async fn create_comment(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<CommentRequest>,
) -> CreatedResult<CommentResponse> {
    let content = request.content.trim();
    if content.is_empty() {
        return Err(RequestError::BadRequest("Comment cannot be empty").into());
    }

    let posted = add_comment_to_article_in_db(
        &state.pool,
        user.id,
        &request.article_slug,
        content,
        request.parent_id,
    )
    .await?;
    let comment = posted.comment;

    let link = link_to_comment(&state, comment.article_id, &posted.article_slug, comment.id).await;
    let event = CommentEvent {
        actor_id: user.id,
        actor_name: &comment.author_name,
        comment_id: comment.id,
        parent_author_id: posted.parent_author_id,
        article_author_id: posted.article_author_id,
        link,
    };
    if let Some(notification) = comment_notification(event) {
        state.notifier.notify(notification);
    }

    Ok((StatusCode::CREATED, Json(CommentResponse::new(comment))))
}

pub async fn update_comment(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateCommentRequest>,
) -> JsonResult<CommentResponse> {
    let id = parse_id(&id)?;
    let content = request.content.trim();
    if content.is_empty() {
        return Err(RequestError::BadRequest("Comment cannot be empty").into());
    }
    let comment = update_comment_in_db(&state.pool, id, user.id, content).await?;
    Ok(Json(CommentResponse::new(comment)))
}

pub async fn delete_comment(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> JsonResult<MessageWrapper> {
    let id = parse_id(&id)?;
    let is_admin = get_user_by_id(&state.pool, user.id)
        .await?
        .map(|u| u.is_admin)
        .unwrap_or(false);
    delete_comment_in_db(&state.pool, id, user.id, is_admin).await?;
    Ok(Json(MessageWrapper::new("Comment deleted")))
}

pub async fn vote_comment(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<VoteRequest>,
) -> JsonResult<VoteResponse> {
    let cast = cast_vote_in_db(&state.pool, user.id, request.comment_id, request.vote_type).await?;

    if cast.outcome.new_state == Some(VoteType::Like) && cast.comment_author_id != user.id {
        let actor = get_user_by_id(&state.pool, user.id).await?;
        let article = get_article_by_id_in_db(&state.pool, cast.article_id).await?;
        if let (Some(actor), Some(article)) = (actor, article) {
            let link = link_to_comment(&state, article.id, &article.slug, request.comment_id).await;
            if let Some(notification) = like_notification(
                user.id,
                &actor.name,
                cast.comment_author_id,
                request.comment_id,
                link,
                &cast.outcome,
            ) {
                state.notifier.notify(notification);
            }
        }
    }

    Ok(Json(VoteResponse {
        comment_id: request.comment_id,
        likes: cast.likes,
        dislikes: cast.dislikes,
        user_vote: cast.outcome.new_state,
    }))
}

// ----------------- Notification Handlers -----------------
pub async fn list_notifications(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
) -> JsonResult<Vec<NotificationResponse>> {
    let notifications = get_notifications_in_db(&state.pool, user.id).await?;
    Ok(Json(
        notifications
            .into_iter()
            .map(NotificationResponse::new)
            .collect(),
    ))
}

pub async fn unread_count(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
) -> JsonResult<UnreadCountResponse> {
    let count = count_unread_notifications_in_db(&state.pool, user.id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

pub async fn mark_all_read(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
) -> JsonResult<MessageWrapper> {
    let updated = mark_all_notifications_read_in_db(&state.pool, user.id).await?;
    tracing::debug!(user_id = user.id, updated, "Marked notifications as read");
    Ok(Json(MessageWrapper::new("All notifications marked as read")))
}

pub async fn clean_read_notifications(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
) -> JsonResult<MessageWrapper> {
    let deleted = delete_read_notifications_in_db(&state.pool, user.id).await?;
    tracing::debug!(user_id = user.id, deleted, "Deleted read notifications");
    Ok(Json(MessageWrapper::new("Read notifications deleted")))
}

pub async fn mark_notification_read(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> JsonResult<MessageWrapper> {
    let id = parse_id(&id)?;
    mark_notification_read_in_db(&state.pool, id, user.id).await?;
    Ok(Json(MessageWrapper::new("Notification marked as read")))
}

pub async fn delete_notification(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> JsonResult<MessageWrapper> {
    let id = parse_id(&id)?;
    delete_notification_in_db(&state.pool, id, user.id).await?;
    Ok(Json(MessageWrapper::new("Notification deleted")))
}

pub async fn delete_all_notifications(
    user: AuthUser,
    Extension(state): Extension<Arc<AppState>>,
) -> JsonResult<MessageWrapper> {
    let deleted = delete_all_notifications_in_db(&state.pool, user.id).await?;
    tracing::debug!(user_id = user.id, deleted, "Deleted all notifications");
    Ok(Json(MessageWrapper::new("All notifications deleted")))
}

// ----------------- OAuth Handlers -----------------
pub async fn google_login(
    Extension(state): Extension<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<OAuthCallbackParams>,
) -> (CookieJar, Redirect) {
    social_login(&state, jar, SocialProvider::Google, params.code).await
}

pub async fn github_login(
    Extension(state): Extension<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<OAuthCallbackParams>,
) -> (CookieJar, Redirect) {
    social_login(&state, jar, SocialProvider::Github, params.code).await
}

async fn social_login(
    state: &AppState,
    jar: CookieJar,
    provider: SocialProvider,
    code: Option<String>,
) -> (CookieJar, Redirect) {
    let frontend = &state.config.frontend_url;
    match try_social_login(state, provider, code).await {
        Ok(cookie) => (
            jar.add(cookie),
            Redirect::to(&format!("{frontend}?auth=success")),
        ),
        Err(e) => {
            tracing::warn!(provider = provider.as_str(), "Social login failed: {:#}", e);
            (jar, Redirect::to(&format!("{frontend}?error=oauth_failed")))
        }
    }
}

async fn try_social_login(
    state: &AppState,
    provider: SocialProvider,
    code: Option<String>,
) -> anyhow::Result<Cookie<'static>> {
    let code = code.context("Missing authorization code")?;
    let client = match provider {
        SocialProvider::Google => state.config.google.as_ref(),
        SocialProvider::Github => state.config.github.as_ref(),
    }
    .context("Provider is not configured")?;

    let profile = oauth::fetch_profile(&state.http, provider, client, &code).await?;
    let user = upsert_social_user(&state.pool, profile).await?;
    tracing::info!(user_id = user.id, provider = provider.as_str(), "Social login");
    session_cookie(&state.config.jwt_secret, user.id, state.config.cookie_secure)
}
