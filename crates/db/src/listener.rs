//! LISTEN/NOTIFY adapter turning row-level triggers into change notifications.

use runlatch_core::error::StoreError;
use runlatch_core::trigger::{path_from_resource, ChangeNotification};
use sqlx::postgres::PgListener;
use sqlx::PgPool;

/// Channel the `notify_document_change` trigger publishes on.
pub const CHANGE_CHANNEL: &str = "document_changes";

/// A dedicated connection subscribed to [`CHANGE_CHANNEL`].
///
/// Notifications are delivered only for committed transactions, in commit
/// order. If the connection drops, sqlx reconnects on the next `recv` and
/// anything sent in between is lost; callers that cannot tolerate that
/// should also sweep periodically.
pub struct ChangeListener {
    inner: PgListener,
}

impl ChangeListener {
    pub async fn connect(pool: &PgPool) -> Result<Self, StoreError> {
        let mut inner = PgListener::connect_with(pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        inner
            .listen(CHANGE_CHANNEL)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        tracing::info!(channel = CHANGE_CHANNEL, "Listening for document changes");
        Ok(Self { inner })
    }

    /// Wait for the next well-formed change notification.
    pub async fn recv(&mut self) -> Result<ChangeNotification, StoreError> {
        loop {
            let notification = self
                .inner
                .recv()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            match decode_payload(notification.payload()) {
                Ok(change) => return Ok(change),
                Err(e) => {
                    tracing::warn!(
                        payload = notification.payload(),
                        error = %e,
                        "Ignoring malformed change notification"
                    );
                }
            }
        }
    }
}

/// Decode a `{"path", "kind"}` payload.
///
/// External publishers on the channel may send fully-qualified resource
/// names (`.../databases/(default)/documents/<path>`); those are unwrapped
/// to the bare document path.
fn decode_payload(payload: &str) -> Result<ChangeNotification, String> {
    let mut change: ChangeNotification =
        serde_json::from_str(payload).map_err(|e| e.to_string())?;
    if change.path.contains("/databases/") {
        change.path = path_from_resource(&change.path).map_err(|e| e.to_string())?;
    }
    Ok(change)
}
