//! Session controller tying the document, preview and AI fix flow together.

use crate::document::{Document, SelectionRange};
use crate::drafts::DraftStore;
use crate::math::MathGate;
use crate::notice::Notice;
use crate::orchestrator::{FixError, Orchestrator};
use crate::preview::{Preview, RenderedPreview};
use crate::prompt::{FixKind, FixOptions};
use crate::reconcile::{FixResultPacket, ReviewView};
use crate::store::SharedStore;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

/// A fix the user triggered and has not yet configured.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveFixRequest {
    pub source_text: String,
    pub kind: FixKind,
    pub operation_label: String,
    pub range: Option<SelectionRange>,
}

impl ActiveFixRequest {
    /// Mode-dialog defaults for this request, carrying its range.
    pub fn default_options(&self) -> FixOptions {
        FixOptions {
            range: self.range.clone(),
            ..FixOptions::for_kind(self.kind)
        }
    }
}

pub struct Workspace {
    document: Document,
    orchestrator: Orchestrator,
    preview: Preview,
    drafts: DraftStore,
    math_gate: MathGate,
    pending_request: Option<ActiveFixRequest>,
    pending_result: Option<FixResultPacket>,
    last_preview: Option<RenderedPreview>,
}

impl Workspace {
    pub fn new(orchestrator: Orchestrator, preview: Preview, store: SharedStore) -> Self {
        Self {
            document: Document::default(),
            orchestrator,
            preview,
            drafts: DraftStore::new(store),
            math_gate: MathGate::new(),
            pending_request: None,
            pending_result: None,
            last_preview: None,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator {
        &mut self.orchestrator
    }

    pub fn last_preview(&self) -> Option<&RenderedPreview> {
        self.last_preview.as_ref()
    }

    /// A user edit: replaces the text and drops the stale preview.
    pub fn edit(&mut self, text: impl Into<String>) {
        self.document.set_text(text);
        self.last_preview = None;
    }

    /// Renders the current text and installs its block mapping. Returns
    /// whether the math collaborator should run on this render.
    pub fn refresh_preview(&mut self) -> bool {
        let revision = self.document.revision();
        let rendered = self.preview.render(self.document.text());
        self.install_preview(revision, rendered)
    }

    /// Installs a render produced elsewhere, e.g. by the preview queue.
    /// Renders of an older revision are ignored.
    pub fn install_preview(&mut self, revision: u64, rendered: RenderedPreview) -> bool {
        if !self.document.apply_mapping(revision, rendered.mapping.clone()) {
            return false;
        }
        let run_math = rendered.has_math && self.math_gate.should_render(&rendered.html);
        self.last_preview = Some(rendered);
        run_math
    }

    pub fn click_block(&mut self, block_id: &str, multi: bool) {
        self.document.click_block(block_id, multi);
    }

    /// Selects an explicit byte range of the text; `None` when it does not fit.
    pub fn select_range(&mut self, start: usize, end: usize) -> Option<&SelectionRange> {
        let range = SelectionRange::capture(self.document.text(), start, end)?;
        self.document.select_range(range);
        self.document.selection()
    }

    /// Starts a fix on the current selection, or on the whole document when
    /// nothing is selected.
    pub fn request_fix(&mut self, kind: FixKind) -> Result<&ActiveFixRequest, Notice> {
        let provider = self.orchestrator.provider_name();
        if self.pending_request.is_some() || self.orchestrator.is_busy() {
            return Err(FixError::InProgress.notice(&provider));
        }
        if self.pending_result.is_some() {
            return Err(Notice::warning(
                "Review pending",
                "Accept or reject the current AI result before starting another fix",
            ));
        }

        let range = self.document.selection().cloned();
        let source_text = match &range {
            Some(r) => r.snapshot.clone(),
            None => self.document.text().trim().to_string(),
        };
        if source_text.trim().is_empty() {
            return Err(FixError::EmptyContent.notice(&provider));
        }
        if self.orchestrator.remaining_today() == Some(0) {
            let tier = self.orchestrator.session().tier;
            return Err(FixError::QuotaExceeded {
                tier,
                limit: tier.daily_limit(),
            }
            .notice(&provider));
        }

        let operation_label = if range.is_some() {
            format!("{} (selection)", kind.label())
        } else {
            kind.label().to_string()
        };
        let request = self.pending_request.insert(ActiveFixRequest {
            source_text,
            kind,
            operation_label,
            range,
        });
        Ok(&*request)
    }

    pub fn pending_request(&self) -> Option<&ActiveFixRequest> {
        self.pending_request.as_ref()
    }

    pub fn dismiss_request(&mut self) {
        self.pending_request = None;
    }

    /// Runs the pending request with the confirmed toggles. The request's kind
    /// and range always win over whatever `options` carries.
    pub async fn confirm(
        &mut self,
        mut options: FixOptions,
        cancel: &CancellationToken,
    ) -> Result<ReviewView, Notice> {
        let Some(request) = self.pending_request.take() else {
            return Err(Notice::info("No pending fix", "Trigger a fix first"));
        };
        options.kind = request.kind;
        options.range = request.range.clone();

        let result = self
            .orchestrator
            .run_fix(self.document.text(), &request.source_text, &options, cancel)
            .await;

        match result {
            Ok(improved) => {
                if let Some(previous) = self.pending_result.take() {
                    previous.reject().log();
                }
                let packet = FixResultPacket {
                    original_text: request.source_text,
                    improved_text: improved,
                    provider_name: self.orchestrator.provider_name(),
                    options_used: options,
                };
                let view = packet.review();
                self.pending_result = Some(packet);
                Ok(view)
            }
            Err(e) => {
                if e.debits_usage() {
                    if let Err(store_err) = self.orchestrator.debit_usage() {
                        tracing::warn!("Failed to record timed-out request: {}", store_err);
                    }
                }
                let notice = e.notice(&self.orchestrator.provider_name());
                notice.log();
                Err(notice)
            }
        }
    }

    pub fn pending_result(&self) -> Option<&FixResultPacket> {
        self.pending_result.as_ref()
    }

    pub fn accept(&mut self) -> Notice {
        let Some(packet) = self.pending_result.take() else {
            return Notice::info("Nothing to apply", "No AI result is waiting for review");
        };
        match packet.accept(&mut self.document, &self.orchestrator) {
            Ok(applied) => {
                self.refresh_preview();
                applied.notice
            }
            Err(e) => e.notice(),
        }
    }

    pub fn reject(&mut self) -> Option<Notice> {
        self.pending_result.take().map(FixResultPacket::reject)
    }

    pub fn autosave(&self) {
        if let Err(e) = self.drafts.save(self.document.text(), Utc::now()) {
            tracing::warn!("Autosave failed: {}", e);
        }
    }

    pub fn restore_draft(&mut self) -> Option<Notice> {
        let notice = self.drafts.restore_into(&mut self.document)?;
        self.refresh_preview();
        Some(notice)
    }

    pub fn clear_document(&mut self) {
        self.edit(String::new());
        if let Err(e) = self.drafts.clear() {
            tracing::warn!("Failed to clear draft: {}", e);
        }
    }
}
