//! Best-effort notification delivery.
//!
//! Handlers commit their own write first and then hand a [`NewNotification`]
//! to the [`Notifier`]. A single worker task drains the queue and inserts the
//! rows; a failed insert is logged and dropped, never reported back to the
//! request that caused it.

use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};

use crate::db_helpers::insert_notification_in_db;
use crate::vote::{VoteChange, VoteOutcome, VoteType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    NewComment,
    CommentReply,
    CommentLike,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewComment => "NEW_COMMENT",
            NotificationKind::CommentReply => "COMMENT_REPLY",
            NotificationKind::CommentLike => "COMMENT_LIKE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub message: String,
    pub link: Option<String>,
    pub from_user_id: Option<i64>,
    pub comment_id: Option<i64>,
}

/// Site section an article lives under, picked from its primary category.
pub fn section_for_category(category: Option<&str>) -> &'static str {
    match category.map(|c| c.trim().to_lowercase()).as_deref() {
        Some("события") | Some("events") => "events",
        Some("исполнители") | Some("performers") => "performers",
        _ => "news",
    }
}

pub fn comment_link(category: Option<&str>, article_slug: &str, comment_id: i64) -> String {
    format!(
        "/{}/{}#comment-{}",
        section_for_category(category),
        article_slug,
        comment_id
    )
}

/// Who gets told about a new comment.
#[derive(Debug, Clone)]
pub struct CommentEvent<'a> {
    pub actor_id: i64,
    pub actor_name: &'a str,
    pub comment_id: i64,
    /// Author of the comment being replied to; `None` for a root comment.
    pub parent_author_id: Option<i64>,
    pub article_author_id: Option<i64>,
    pub link: String,
}

/// A reply notifies the parent's author, a root comment the article's
/// author. Nobody is notified about their own actions.
pub fn comment_notification(event: CommentEvent<'_>) -> Option<NewNotification> {
    let (recipient, kind, message) = match event.parent_author_id {
        Some(parent_author) => (
            parent_author,
            NotificationKind::CommentReply,
            format!("{} replied to your comment", event.actor_name),
        ),
        None => (
            event.article_author_id?,
            NotificationKind::NewComment,
            format!("{} commented on your article", event.actor_name),
        ),
    };
    if recipient == event.actor_id {
        return None;
    }
    Some(NewNotification {
        user_id: recipient,
        kind,
        message,
        link: Some(event.link),
        from_user_id: Some(event.actor_id),
        comment_id: Some(event.comment_id),
    })
}

/// Only a vote that turns into a like is announced.
pub fn like_notification(
    actor_id: i64,
    actor_name: &str,
    comment_author_id: i64,
    comment_id: i64,
    link: String,
    outcome: &VoteOutcome,
) -> Option<NewNotification> {
    let became_like = matches!(
        outcome.change,
        VoteChange::Create(VoteType::Like) | VoteChange::Update(VoteType::Like)
    );
    if !became_like || actor_id == comment_author_id {
        return None;
    }
    Some(NewNotification {
        user_id: comment_author_id,
        kind: NotificationKind::CommentLike,
        message: format!("{actor_name} liked your comment"),
        link: Some(link),
        from_user_id: Some(actor_id),
        comment_id: Some(comment_id),
    })
}

enum Job {
    Deliver(NewNotification),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct Notifier {
    sender: mpsc::UnboundedSender<Job>,
}

impl Notifier {
    /// Starts the delivery worker on the current runtime.
    pub fn spawn(pool: SqlitePool) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(deliver(pool, receiver));
        Notifier { sender }
    }

    pub fn notify(&self, notification: NewNotification) {
        if notification.from_user_id == Some(notification.user_id) {
            tracing::debug!(user_id = notification.user_id, "Skipping self notification");
            return;
        }
        if self.sender.send(Job::Deliver(notification)).is_err() {
            tracing::warn!("Notification queue is closed, dropping notification");
        }
    }

    /// Resolves once everything queued before this call has been processed.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Job::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

async fn deliver(pool: SqlitePool, mut receiver: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = receiver.recv().await {
        match job {
            Job::Deliver(notification) => {
                match insert_notification_in_db(&pool, &notification).await {
                    Ok(id) => tracing::debug!(
                        id,
                        user_id = notification.user_id,
                        kind = notification.kind.as_str(),
                        "Notification stored"
                    ),
                    Err(e) => tracing::warn!(
                        user_id = notification.user_id,
                        "Failed to store notification: {}",
                        e
                    ),
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Notification worker stopped");
}
