//! Draft autosave in the key-value store.

use crate::constants::{KEY_AUTO_SAVE, KEY_AUTO_SAVE_TIMESTAMP};
use crate::document::Document;
use crate::notice::Notice;
use crate::store::{SharedStore, StoreError};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub saved_at: Option<String>,
}

pub struct DraftStore {
    store: SharedStore,
}

impl DraftStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Saves `text`; a blank text clears the draft instead.
    pub fn save(&self, text: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if text.trim().is_empty() {
            return self.clear();
        }
        self.store.set(KEY_AUTO_SAVE, text)?;
        self.store.set(KEY_AUTO_SAVE_TIMESTAMP, &at.to_rfc3339())
    }

    pub fn load(&self) -> Option<Draft> {
        let text = self.store.get(KEY_AUTO_SAVE).filter(|t| !t.is_empty())?;
        Some(Draft {
            text,
            saved_at: self.store.get(KEY_AUTO_SAVE_TIMESTAMP),
        })
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(KEY_AUTO_SAVE)?;
        self.store.remove(KEY_AUTO_SAVE_TIMESTAMP)
    }

    /// Loads the draft into an empty document. Text the user already typed is
    /// never overwritten.
    pub fn restore_into(&self, document: &mut Document) -> Option<Notice> {
        if !document.text().trim().is_empty() {
            return None;
        }
        let draft = self.load()?;
        document.set_text(draft.text);
        let when = draft.saved_at.unwrap_or_else(|| "an unknown time".to_string());
        tracing::info!("Restored draft saved at {}", when);
        Some(Notice::info("Draft restored", format!("Autosaved at {}", when)))
    }
}
