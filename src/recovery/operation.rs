//! # Registered recovery operations.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::Result;

/// Urgency of a recovery operation. Ordered `Low < Normal < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    /// A failing critical operation aborts the batch.
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type RecoverFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A named, prioritized recovery procedure.
#[derive(Clone)]
pub struct RecoveryOperation {
    id: String,
    description: String,
    priority: Priority,
    recover: RecoverFn,
}

impl RecoveryOperation {
    pub fn new<F, Fut>(
        id: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        recover: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            priority,
            recover: Arc::new(move || recover().boxed()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn recover(&self) -> BoxFuture<'static, Result<()>> {
        (self.recover)()
    }
}

impl fmt::Debug for RecoveryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryOperation")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
