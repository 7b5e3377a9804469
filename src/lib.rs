//! Markdown authoring core: live preview with block-to-source mapping,
//! AI-assisted cleanup with diff review, and export mapping.

pub mod api;
pub mod config;
pub mod constants;
pub mod diff;
pub mod document;
pub mod drafts;
pub mod export;
pub mod html;
pub mod mapper;
pub mod math;
pub mod notice;
pub mod orchestrator;
pub mod preview;
pub mod prompt;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod render;
pub mod state;
pub mod store;
pub mod usage;
pub mod utils;
