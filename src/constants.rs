//! Application-wide constants for mdcraft.
//!
//! Centralizes all magic numbers and configuration values to improve maintainability
//! and make the codebase self-documenting.

use std::time::Duration;

// ============================================================================
// Application Identity
// ============================================================================

/// Directory name used under the platform config dir.
pub const APP_DIR_NAME: &str = "mdcraft";

/// Application name displayed in generated preview pages.
pub const APP_NAME: &str = "mdcraft";

// ============================================================================
// AI Request Policy
// ============================================================================

/// Minimum spacing between two AI calls (milliseconds).
pub const AI_MIN_INTERVAL_MS: i64 = 3000;

/// Timeout applied to each individual network attempt.
pub const AI_REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

/// Extra attempts after the first one fails.
pub const AI_MAX_RETRY: u32 = 2;

/// Pause between a failed attempt and the next one.
pub const AI_RETRY_BACKOFF: Duration = Duration::from_millis(600);

/// Default sampling temperature when the stored settings carry none.
pub const AI_DEFAULT_TEMPERATURE: f64 = 0.3;

/// Default completion budget when the stored settings carry none.
pub const AI_DEFAULT_MAX_TOKENS: u32 = 4096;

/// Accepted temperature range, inclusive.
pub const AI_TEMPERATURE_RANGE: (f64, f64) = (0.0, 2.0);

/// Message sent by the connection test.
pub const AI_PING_MESSAGE: &str = "Connection test";

// ============================================================================
// Daily Quotas
// ============================================================================

/// Daily fixes for the basic tier.
pub const QUOTA_BASIC: i64 = 20;

/// Daily fixes for the advanced tier.
pub const QUOTA_ADVANCED: i64 = 20;

/// Marker for tiers without a daily ceiling.
pub const QUOTA_UNLIMITED: i64 = -1;

// ============================================================================
// Line Diff
// ============================================================================

/// Either side above this many lines skips the LCS table entirely.
pub const DIFF_MAX_LINES: usize = 1200;

/// Unchanged runs longer than this are collapsed.
pub const DIFF_CONDENSE_THRESHOLD: usize = 6;

/// Unchanged lines kept on each side of a collapsed run.
pub const DIFF_CONTEXT_LINES: usize = 2;

// ============================================================================
// Document & Preview
// ============================================================================

/// Reading speed used for the estimated reading time.
pub const WORDS_PER_MINUTE: usize = 200;

/// Documents above this many characters are flagged as large for export.
pub const LARGE_DOC_CHARS: usize = 10_000;

/// Documents above this many lines are flagged as large for export.
pub const LARGE_DOC_LINES: usize = 500;

/// Buffer size for the preview render queue channel.
/// Size of 1 ensures only one render runs at a time,
/// with new requests dropped while one is pending.
pub const PREVIEW_QUEUE_BUFFER: usize = 1;

/// Prefix of generated preview block ids.
pub const BLOCK_ID_PREFIX: &str = "pb-";

// ============================================================================
// Persistence Keys
// ============================================================================

/// Draft autosave content.
pub const KEY_AUTO_SAVE: &str = "markdown-auto-save";

/// Timestamp of the last draft autosave.
pub const KEY_AUTO_SAVE_TIMESTAMP: &str = "markdown-auto-save-timestamp";

/// User-defined provider descriptors.
pub const KEY_CUSTOM_PROVIDERS: &str = "customAIConfigs";

/// Active AI settings.
pub const KEY_AI_SETTINGS: &str = "aiConfig";

/// Prefix of the per-tier, per-day usage counters.
pub const KEY_USAGE_PREFIX: &str = "ai_usage";

/// Version tag written into exported provider configs.
pub const PROVIDER_EXPORT_VERSION: &str = "1.0";
