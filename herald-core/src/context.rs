//! Ambient task context.
//!
//! Async work submitted to the pipeline's pools must carry the identity of
//! whoever triggered it and the correlation id of the originating request.
//! Both are captured into a [`TaskContext`] at submission time and installed
//! for the duration of the task via a scoped task-local, so they are
//! released on every exit path - completion, error, panic and cancellation
//! alike. Nothing here mutates a thread-local outside the scope.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::types::{RequestId, UserId};

/// Role of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular user.
    User,
    /// Channel manager.
    ChannelManager,
    /// Administrator.
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::ChannelManager => write!(f, "channel_manager"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// The authenticated principal on whose behalf work is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// User id of the principal.
    pub user_id: UserId,
    /// Role of the principal.
    pub role: Role,
}

impl Principal {
    /// Creates a new principal.
    #[must_use]
    pub const fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }
}

tokio::task_local! {
    static TASK_CONTEXT: TaskContext;
}

/// Ambient identity + correlation context for one unit of async work.
///
/// An empty context (no principal, no request id) is valid: background work
/// that no request triggered runs with one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskContext {
    principal: Option<Principal>,
    request_id: Option<RequestId>,
}

impl TaskContext {
    /// Creates an empty context.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            principal: None,
            request_id: None,
        }
    }

    /// Creates a context carrying a principal and a request id.
    #[must_use]
    pub const fn new(principal: Principal, request_id: RequestId) -> Self {
        Self {
            principal: Some(principal),
            request_id: Some(request_id),
        }
    }

    /// Sets the principal.
    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Returns the principal, if any.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Returns the request id, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Returns true if neither principal nor request id is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.principal.is_none() && self.request_id.is_none()
    }

    /// Snapshots the context installed on the current task.
    ///
    /// Returns the empty context when none is installed, so callers can
    /// capture unconditionally at submission time.
    #[must_use]
    pub fn current() -> Self {
        TASK_CONTEXT
            .try_with(Clone::clone)
            .unwrap_or_else(|_| Self::empty())
    }

    /// Runs `future` with this context installed on the current task.
    ///
    /// The context is visible through [`TaskContext::current`] for the whole
    /// duration of the future and released when it finishes, fails, panics
    /// or is cancelled.
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        TASK_CONTEXT.scope(self, future).await
    }
}
