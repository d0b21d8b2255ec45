//! In-app notification inbox.

use sqlx::PgPool;

use stockroom_core::{NotificationId, UserId};

use super::RepositoryError;

/// A notification ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: UserId,
    pub kind: &'static str,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

/// Insert a notification.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if the insert fails.
pub async fn insert(pool: &PgPool, notification: &NewNotification) -> Result<NotificationId, RepositoryError> {
    let id: i32 = sqlx::query_scalar(
        r"
        INSERT INTO store.notifications (user_id, kind, title, message, link)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        ",
    )
    .bind(notification.user_id)
    .bind(notification.kind)
    .bind(&notification.title)
    .bind(&notification.message)
    .bind(notification.link.as_deref())
    .fetch_one(pool)
    .await?;
    Ok(NotificationId::new(id))
}
