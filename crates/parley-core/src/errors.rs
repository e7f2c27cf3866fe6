/// Typed error hierarchy for the chat pipeline. Classifies failures by where
/// they arose and by whether the user sees a specific reason or the generic
/// apology.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ChatError {
    // Rejected before any transport attempt
    #[error("{0}")]
    Validation(String),
    #[error("content blocked by safety guidelines")]
    ContentBlocked { reason: Option<String> },

    // Delivery failures
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream invocation failed: {0}")]
    Upstream(String),

    // Operational
    #[error("cancelled")]
    Cancelled,
}

/// The one message surfaced for failures the user can't act on.
pub const GENERIC_ERROR: &str =
    "I apologize, but I encountered an error processing your request. Please try again.";

impl ChatError {
    pub fn empty_message() -> Self {
        Self::Validation("Message is required".into())
    }

    pub fn message_too_long() -> Self {
        Self::Validation("Message is too long. Please keep it under 4000 characters.".into())
    }

    /// Validation and filter failures carry an actionable reason; everything
    /// else collapses to the generic message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(reason) => reason.clone(),
            Self::ContentBlocked { .. } => "Content blocked by safety guidelines".into(),
            _ => GENERIC_ERROR.into(),
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::ContentBlocked { .. })
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ContentBlocked { .. } => "content_blocked",
            Self::Transport(_) => "transport",
            Self::Upstream(_) => "upstream",
            Self::Cancelled => "cancelled",
        }
    }
}
