use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth::Auth;
use crate::database::{DbError, DbPort};
use crate::error::panic_message;
use crate::notify::{Notification, NotificationSender, NotifyError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

impl AppInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Process-wide services, built once at startup and then only read.
/// Shared by every in-flight request behind an `Arc`.
pub struct Env {
    profile: String,
    app: AppInfo,
    db: Arc<dyn DbPort>,
    notifier: Arc<dyn NotificationSender>,
}

impl Env {
    pub fn new(
        profile: impl Into<String>,
        app: AppInfo,
        db: Arc<dyn DbPort>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            profile: profile.into(),
            app,
            db,
            notifier,
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn app(&self) -> &AppInfo {
        &self.app
    }

    pub fn db(&self) -> Arc<dyn DbPort> {
        Arc::clone(&self.db)
    }

    pub fn is_production(&self) -> bool {
        is_production(&self.profile)
    }

    pub async fn send_notification(&self, notification: Notification) -> Result<(), NotifyError> {
        self.notifier.send(notification).await
    }

    /// Runs `f` against a transaction-scoped port. `Ok` commits and hands back
    /// the value; an error or a panic inside `f` rolls every write back.
    pub async fn with_transaction<R, E, F, Fut>(&self, f: F) -> Result<R, E>
    where
        R: Send,
        E: From<DbError> + Send,
        F: FnOnce(Arc<dyn DbPort>) -> Fut + Send,
        Fut: std::future::Future<Output = Result<R, E>> + Send,
    {
        let mut outcome: Option<Result<R, E>> = None;
        let slot = &mut outcome;

        let committed = self
            .db
            .transaction(Box::new(move |tx| {
                async move {
                    match AssertUnwindSafe(f(tx)).catch_unwind().await {
                        Ok(Ok(value)) => {
                            *slot = Some(Ok(value));
                            Ok(())
                        }
                        Ok(Err(e)) => {
                            *slot = Some(Err(e));
                            Err(DbError::RolledBack("callback returned an error".into()))
                        }
                        Err(panic) => {
                            let message = panic_message(panic.as_ref());
                            warn!("transaction callback panicked: {}", message);
                            Err(DbError::RolledBack(format!("callback panicked: {message}")))
                        }
                    }
                }
                .boxed()
            }))
            .await;

        match (committed, outcome) {
            (Ok(()), Some(Ok(value))) => Ok(value),
            (Err(_), Some(Err(e))) => Err(e),
            (Err(e), _) => Err(E::from(e)),
            (Ok(()), _) => Err(E::from(DbError::Backend(
                "transaction committed without running its callback".into(),
            ))),
        }
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("profile", &self.profile)
            .field("app", &self.app)
            .finish_non_exhaustive()
    }
}

pub fn is_production(profile: &str) -> bool {
    matches!(profile.trim().to_ascii_lowercase().as_str(), "prod" | "production")
}

/// What a handler runs against: the shared environment and the caller
#[derive(Debug, Clone)]
pub struct Ctx {
    pub env: Arc<Env>,
    pub auth: Auth,
}

impl Ctx {
    pub fn new(env: Arc<Env>, auth: Auth) -> Self {
        Self { env, auth }
    }
}
