//! Runs AI fix requests: preconditions, prompt and body composition, and the
//! timed, retried, cancellable network exchange.

use crate::api::{
    build_chat_body, extract_completion, ApiError, ChatRequest, ChatTransport, Message,
};
use crate::config::AiSettings;
use crate::constants::{
    AI_MAX_RETRY, AI_MIN_INTERVAL_MS, AI_PING_MESSAGE, AI_REQUEST_TIMEOUT, AI_RETRY_BACKOFF,
};
use crate::notice::Notice;
use crate::prompt::{compose_system_prompt, FixOptions};
use crate::registry::{ProviderDescriptor, ProviderRegistry};
use crate::store::{SharedStore, StoreError};
use crate::usage::{Clock, Tier, UsageCounter};
use serde_json::Value;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const PING_MAX_TOKENS: u32 = 16;

#[derive(Error, Debug)]
pub enum FixError {
    #[error("An AI request is already in progress")]
    InProgress,
    #[error("There is no content to fix")]
    EmptyContent,
    #[error("The selected text changed after it was selected")]
    StaleSelection,
    #[error("Requests are too frequent; wait {wait_ms} ms")]
    TooFrequent { wait_ms: i64 },
    #[error("Daily quota of {limit} fixes for the {tier} tier is used up")]
    QuotaExceeded { tier: Tier, limit: i64 },
    #[error("Unknown AI provider '{0}'")]
    UnknownProvider(String),
    #[error("The provider returned no usable completion")]
    MalformedResponse,
    #[error(transparent)]
    Transport(ApiError),
    #[error("No response after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error("Request cancelled")]
    Cancelled,
}

impl FixError {
    /// 401/403 answers, which point at the provider configuration.
    pub fn is_auth(&self) -> bool {
        matches!(self, FixError::Transport(e) if matches!(e.status(), Some(401) | Some(403)))
    }

    /// A definitive timeout still costs the user one of their daily fixes.
    pub fn debits_usage(&self) -> bool {
        matches!(self, FixError::Timeout { .. })
    }

    pub fn notice(&self, provider: &str) -> Notice {
        match self {
            FixError::InProgress => Notice::warning(
                "AI busy",
                "An AI fix is already running; wait for it or cancel it first",
            ),
            FixError::EmptyContent => {
                Notice::warning("Nothing to fix", "Enter some Markdown before running a fix")
            }
            FixError::StaleSelection => Notice::warning(
                "Selection changed",
                "The selected content changed; select it again and retry",
            ),
            FixError::TooFrequent { wait_ms } => Notice::warning(
                "Too many requests",
                format!("Please wait {} s and try again", (wait_ms + 999) / 1000),
            ),
            FixError::QuotaExceeded { .. } => Notice::warning(
                "Quota used up",
                "Today's AI fixes are used up; try again tomorrow",
            ),
            FixError::UnknownProvider(id) => {
                Notice::error("Configuration error", format!("Unsupported AI provider '{}'", id))
                    .with_config_hint()
            }
            FixError::MalformedResponse => Notice::error(
                "Fix failed",
                format!("{} returned an empty or malformed result; please retry", provider),
            ),
            FixError::Timeout { .. } => Notice::error(
                "Fix failed",
                format!("{} did not respond in time; check the network or retry later", provider),
            ),
            FixError::Cancelled => {
                Notice::info("Cancelled", "The AI fix was cancelled; the document is unchanged")
            }
            FixError::Transport(e) => match e.status() {
                Some(401) => Notice::error(
                    "Fix failed",
                    format!("{} rejected the API key; check or regenerate it", provider),
                )
                .with_config_hint(),
                Some(403) => Notice::error(
                    "Fix failed",
                    format!("{} denied access; check the account permissions", provider),
                )
                .with_config_hint(),
                Some(429) => Notice::error(
                    "Fix failed",
                    format!("{} is rate limiting requests; retry later", provider),
                ),
                _ if matches!(e, ApiError::HttpClient(_)) => Notice::error(
                    "Fix failed",
                    format!("Could not reach {}; check the network and retry", provider),
                ),
                _ => Notice::error("Fix failed", format!("{}: {}; please retry", provider, e)),
            },
        }
    }
}

/// Per-session state the orchestrator reads on every request.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub tier: Tier,
    pub settings: AiSettings,
}

/// A request that passed every precondition and is ready to send.
#[derive(Debug, Clone)]
pub struct PreparedFix {
    pub request: ChatRequest,
    pub provider_name: String,
    pub content: String,
    pub options: FixOptions,
}

/// Clears the in-flight flag even when the request future is dropped.
struct InFlight<'a>(&'a Cell<bool>);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct Orchestrator {
    transport: Arc<dyn ChatTransport>,
    registry: ProviderRegistry,
    usage: UsageCounter,
    clock: Rc<dyn Clock>,
    session: SessionContext,
    last_call_at: Cell<Option<i64>>,
    in_flight: Cell<bool>,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: SharedStore,
        clock: Rc<dyn Clock>,
        session: SessionContext,
    ) -> Self {
        Self {
            transport,
            registry: ProviderRegistry::new(store.clone()),
            usage: UsageCounter::new(store),
            clock,
            session,
            last_call_at: Cell::new(None),
            in_flight: Cell::new(false),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn usage(&self) -> &UsageCounter {
        &self.usage
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn set_session(&mut self, session: SessionContext) {
        self.session = session;
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.get()
    }

    pub fn remaining_today(&self) -> Option<i64> {
        self.usage.remaining(self.session.tier, self.clock.today())
    }

    /// Records one consumed fix for the session tier and today.
    pub fn debit_usage(&self) -> Result<i64, StoreError> {
        self.usage.increment(self.session.tier, self.clock.today())
    }

    pub fn active_provider(&self) -> Result<ProviderDescriptor, FixError> {
        let id = &self.session.settings.provider;
        self.registry
            .get(id)
            .ok_or_else(|| FixError::UnknownProvider(id.clone()))
    }

    /// Display name of the active provider, falling back to its id.
    pub fn provider_name(&self) -> String {
        self.active_provider()
            .map(|d| d.config().display_name.clone())
            .unwrap_or_else(|_| self.session.settings.provider.clone())
    }

    fn chat_request(&self, provider: &ProviderDescriptor, body: Value) -> ChatRequest {
        let config = provider.config();
        ChatRequest {
            endpoint: config.endpoint_url.clone(),
            api_key: self
                .session
                .settings
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty()),
            headers: config.headers.clone(),
            body,
        }
    }

    fn model_for(&self, provider: &ProviderDescriptor) -> String {
        let settings = &self.session.settings;
        if settings.model.is_empty() {
            provider
                .config()
                .default_model()
                .map(|m| m.id.clone())
                .unwrap_or_default()
        } else {
            settings.model.clone()
        }
    }

    /// Checks every precondition against the live document text and composes
    /// the request. Starts the rate-limit window on success.
    pub fn prepare(
        &self,
        document_text: &str,
        content: &str,
        options: &FixOptions,
    ) -> Result<PreparedFix, FixError> {
        if self.in_flight.get() {
            return Err(FixError::InProgress);
        }
        if content.trim().is_empty() {
            return Err(FixError::EmptyContent);
        }
        if let Some(range) = &options.range {
            if !range.is_current(document_text) {
                return Err(FixError::StaleSelection);
            }
        }

        let now = self.clock.now_millis();
        if let Some(last) = self.last_call_at.get() {
            let elapsed = now - last;
            if elapsed < AI_MIN_INTERVAL_MS {
                return Err(FixError::TooFrequent {
                    wait_ms: AI_MIN_INTERVAL_MS - elapsed,
                });
            }
        }

        let tier = self.session.tier;
        if !self.usage.has_remaining(tier, self.clock.today()) {
            return Err(FixError::QuotaExceeded {
                tier,
                limit: tier.daily_limit(),
            });
        }

        let provider = self.active_provider()?;
        self.last_call_at.set(Some(now));

        let messages = [
            Message::system(compose_system_prompt(options)),
            Message::user(content),
        ];
        let settings = &self.session.settings;
        let body = build_chat_body(
            &self.model_for(&provider),
            &messages,
            settings.temperature,
            settings.max_tokens,
            &provider.config().params,
        );

        Ok(PreparedFix {
            request: self.chat_request(&provider, body),
            provider_name: provider.config().display_name.clone(),
            content: content.to_string(),
            options: options.clone(),
        })
    }

    /// Sends a prepared request and returns the trimmed completion text.
    pub async fn execute(
        &self,
        prepared: &PreparedFix,
        cancel: &CancellationToken,
    ) -> Result<String, FixError> {
        if self.in_flight.get() {
            return Err(FixError::InProgress);
        }
        let _in_flight = InFlight::enter(&self.in_flight);

        tracing::info!(
            "Starting {} with {} ({} chars)",
            prepared.options.kind.label(),
            prepared.provider_name,
            prepared.content.chars().count()
        );
        let response = self
            .send_with_retry(&prepared.request, cancel, 1 + AI_MAX_RETRY)
            .await?;
        extract_completion(&response).ok_or(FixError::MalformedResponse)
    }

    pub async fn run_fix(
        &self,
        document_text: &str,
        content: &str,
        options: &FixOptions,
        cancel: &CancellationToken,
    ) -> Result<String, FixError> {
        let prepared = self.prepare(document_text, content, options)?;
        self.execute(&prepared, cancel).await
    }

    /// One-shot connection test against the active provider. No retry and no
    /// quota effect.
    pub async fn check_availability(&self, cancel: &CancellationToken) -> Result<(), FixError> {
        let provider = self.active_provider()?;
        let body = build_chat_body(
            &self.model_for(&provider),
            &[Message::user(AI_PING_MESSAGE)],
            self.session.settings.temperature,
            PING_MAX_TOKENS,
            &provider.config().params,
        );
        let request = self.chat_request(&provider, body);
        self.send_with_retry(&request, cancel, 1).await?;
        tracing::info!("{} is reachable", provider.config().display_name);
        Ok(())
    }

    async fn send_with_retry(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        max_attempts: u32,
    ) -> Result<Value, FixError> {
        let mut attempt = 1;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("AI request cancelled during attempt {}", attempt);
                    return Err(FixError::Cancelled);
                }
                result = tokio::time::timeout(AI_REQUEST_TIMEOUT, self.transport.post(request)) => result,
            };

            let error = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_timeout() => FixError::Timeout { attempts: attempt },
                Ok(Err(e)) => FixError::Transport(e),
                Err(_) => FixError::Timeout { attempts: attempt },
            };

            if attempt >= max_attempts {
                tracing::error!("AI request failed after {} attempt(s): {}", attempt, error);
                return Err(error);
            }
            tracing::warn!(
                "Attempt {}/{} failed: {}; retrying",
                attempt,
                max_attempts,
                error
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FixError::Cancelled),
                _ = tokio::time::sleep(AI_RETRY_BACKOFF) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::document::SelectionRange;
    use crate::prompt::FixKind;
    use crate::store::MemoryStore;
    use crate::usage::ManualClock;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) enum Reply {
        Ok(&'static str),
        Status(u16),
        Raw(Value),
        Hang,
    }

    /// Replays a fixed script of replies; the last one repeats.
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Reply>>,
        pub calls: AtomicUsize,
        pub last_request: Mutex<Option<ChatRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn post(&self, request: &ChatRequest) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            let reply = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().map(|r| match r {
                        Reply::Ok(s) => Reply::Ok(*s),
                        Reply::Status(s) => Reply::Status(*s),
                        Reply::Raw(v) => Reply::Raw(v.clone()),
                        Reply::Hang => Reply::Hang,
                    })
                }
            };
            match reply {
                Some(Reply::Ok(text)) => {
                    Ok(json!({"choices": [{"message": {"role": "assistant", "content": text}}]}))
                }
                Some(Reply::Status(status)) => Err(ApiError::Status {
                    status,
                    message: "scripted failure".to_string(),
                }),
                Some(Reply::Raw(value)) => Ok(value),
                Some(Reply::Hang) | None => std::future::pending().await,
            }
        }
    }

    pub(crate) fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
    }

    pub(crate) fn orchestrator(
        transport: Arc<ScriptedTransport>,
        tier: Tier,
    ) -> (Orchestrator, Rc<ManualClock>, SharedStore) {
        let store: SharedStore = Rc::new(MemoryStore::new());
        let clock = Rc::new(ManualClock::new(1_000_000, day()));
        let session = SessionContext {
            tier,
            settings: AiSettings {
                api_key: Some("sk-test".to_string()),
                ..AiSettings::default()
            },
        };
        let orchestrator = Orchestrator::new(transport, store.clone(), clock.clone(), session);
        (orchestrator, clock, store)
    }

    #[tokio::test]
    async fn test_successful_fix_builds_request() {
        let transport = ScriptedTransport::new(vec![Reply::Ok("  # Fixed  \n")]);
        let (orch, _, _) = orchestrator(transport.clone(), Tier::Basic);
        let options = FixOptions::for_kind(FixKind::QuickFix);

        let fixed = orch
            .run_fix("#Broken", "#Broken", &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fixed, "# Fixed");
        assert_eq!(transport.calls(), 1);
        assert!(!orch.is_busy());

        let request = transport.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.endpoint, "https://api.moonshot.cn/v1/chat/completions");
        assert_eq!(request.api_key.as_deref(), Some("sk-test"));
        assert_eq!(request.body["model"], "moonshot-v1-32k");
        assert_eq!(request.body["messages"][0]["role"], "system");
        assert_eq!(request.body["messages"][1]["content"], "#Broken");
    }

    #[tokio::test]
    async fn test_second_call_within_interval_is_rejected_without_network() {
        let transport = ScriptedTransport::new(vec![Reply::Ok("ok")]);
        let (orch, clock, _) = orchestrator(transport.clone(), Tier::Basic);
        let options = FixOptions::default();
        let cancel = CancellationToken::new();

        orch.run_fix("a", "a", &options, &cancel).await.unwrap();
        clock.advance_millis(1_000);
        let err = orch.run_fix("a", "a", &options, &cancel).await.unwrap_err();
        assert!(matches!(err, FixError::TooFrequent { wait_ms: 2_000 }));
        assert_eq!(transport.calls(), 1);

        clock.advance_millis(2_000);
        assert!(orch.run_fix("a", "a", &options, &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_call_still_throttles() {
        let transport = ScriptedTransport::new(vec![Reply::Raw(json!({"choices": []}))]);
        let (orch, _, _) = orchestrator(transport.clone(), Tier::Basic);
        let cancel = CancellationToken::new();

        let err = orch
            .run_fix("a", "a", &FixOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FixError::MalformedResponse));
        let err = orch
            .run_fix("a", "a", &FixOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FixError::TooFrequent { .. }));
    }

    #[tokio::test]
    async fn test_quota_exhausted_short_circuits() {
        let transport = ScriptedTransport::new(vec![Reply::Ok("ok")]);
        let (orch, _, _) = orchestrator(transport.clone(), Tier::Basic);
        for _ in 0..20 {
            orch.debit_usage().unwrap();
        }
        let err = orch
            .run_fix("a", "a", &FixOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FixError::QuotaExceeded { limit: 20, .. }));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_selection_and_empty_content() {
        let transport = ScriptedTransport::new(vec![Reply::Ok("ok")]);
        let (orch, _, _) = orchestrator(transport.clone(), Tier::Basic);
        let range = SelectionRange::capture("hello world", 6, 11).unwrap();
        let options = FixOptions::default().with_range(range);

        let err = orch
            .run_fix("hello there", "world", &options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FixError::StaleSelection));

        let err = orch
            .run_fix("", "  \n", &FixOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FixError::EmptyContent));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let transport = ScriptedTransport::new(vec![Reply::Ok("ok")]);
        let (mut orch, _, _) = orchestrator(transport.clone(), Tier::Basic);
        let mut session = orch.session().clone();
        session.settings.provider = "nope".to_string();
        orch.set_session(session);

        let err = orch
            .run_fix("a", "a", &FixOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FixError::UnknownProvider(ref id) if id == "nope"));
        assert!(err.notice("nope").suggest_config);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_on_every_attempt() {
        let transport = ScriptedTransport::new(vec![Reply::Hang]);
        let (orch, _, _) = orchestrator(transport.clone(), Tier::Basic);

        let err = orch
            .run_fix("a", "a", &FixOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FixError::Timeout { attempts: 3 }));
        assert!(err.debits_usage());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_failures() {
        let transport = ScriptedTransport::new(vec![
            Reply::Status(500),
            Reply::Hang,
            Reply::Ok("done"),
        ]);
        let (orch, _, _) = orchestrator(transport.clone(), Tier::Basic);
        let fixed = orch
            .run_fix("a", "a", &FixOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fixed, "done");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_retried_and_surface_last() {
        let transport = ScriptedTransport::new(vec![Reply::Status(401)]);
        let (orch, _, _) = orchestrator(transport.clone(), Tier::Basic);
        let err = orch
            .run_fix("a", "a", &FixOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert!(!err.debits_usage());
        assert!(err.notice("Kimi").suggest_config);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_flight_skips_retries() {
        let transport = ScriptedTransport::new(vec![Reply::Hang]);
        let (orch, _, _) = orchestrator(transport.clone(), Tier::Basic);
        let cancel = CancellationToken::new();

        let canceller = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        };
        let opts = FixOptions::default();
        let (result, _) = tokio::join!(
            orch.run_fix("a", "a", &opts, &cancel),
            canceller
        );
        let err = result.unwrap_err();
        assert!(matches!(err, FixError::Cancelled));
        assert!(!err.debits_usage());
        assert_eq!(err.notice("Kimi").level, crate::notice::NoticeLevel::Info);
        assert_eq!(transport.calls(), 1);
        assert!(!orch.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_skips_retry() {
        let transport = ScriptedTransport::new(vec![Reply::Status(500)]);
        let (orch, _, _) = orchestrator(transport.clone(), Tier::Basic);
        let cancel = CancellationToken::new();

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        };
        let opts = FixOptions::default();
        let (result, _) = tokio::join!(
            orch.run_fix("a", "a", &opts, &cancel),
            canceller
        );
        assert!(matches!(result.unwrap_err(), FixError::Cancelled));
        assert_eq!(transport.calls(), 1);
        assert!(!orch.is_busy());
    }

    #[tokio::test]
    async fn test_check_availability_single_attempt() {
        let transport = ScriptedTransport::new(vec![Reply::Status(503)]);
        let (orch, _, _) = orchestrator(transport.clone(), Tier::Basic);
        let err = orch
            .check_availability(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FixError::Transport(_)));
        assert_eq!(transport.calls(), 1);
        assert_eq!(orch.usage().count(Tier::Basic, day()), 0);
    }
}
