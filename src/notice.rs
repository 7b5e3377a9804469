//! User-facing notices: the single surface every recovered failure ends in.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
    /// Set when the user should revisit the provider configuration.
    pub suggest_config: bool,
}

impl Notice {
    pub fn new(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            suggest_config: false,
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title, message)
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, title, message)
    }

    pub fn with_config_hint(mut self) -> Self {
        self.suggest_config = true;
        self
    }

    /// Logs the notice at a level matching its severity.
    pub fn log(&self) {
        match self.level {
            NoticeLevel::Info | NoticeLevel::Success => {
                tracing::info!("{}: {}", self.title, self.message)
            }
            NoticeLevel::Warning => tracing::warn!("{}: {}", self.title, self.message),
            NoticeLevel::Error => tracing::error!("{}: {}", self.title, self.message),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)?;
        if self.suggest_config {
            write!(f, " (check the AI provider configuration)")?;
        }
        Ok(())
    }
}
