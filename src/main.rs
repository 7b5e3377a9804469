use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use mdcraft::api::OpenAiCompatibleTransport;
use mdcraft::config::{AiSettings, AppConfig};
use mdcraft::diff::{condense, diff_lines};
use mdcraft::export::build_export;
use mdcraft::notice::NoticeLevel;
use mdcraft::orchestrator::{Orchestrator, SessionContext};
use mdcraft::preview::Preview;
use mdcraft::prompt::FixKind;
use mdcraft::queue::PreviewQueue;
use mdcraft::registry::{template, templates, ProviderConfig, ProviderRegistry};
use mdcraft::render::CmarkRenderer;
use mdcraft::state::Workspace;
use mdcraft::store::{FileStore, SharedStore};
use mdcraft::usage::SystemClock;
use mdcraft::utils::{open_file, parse_range, save_file};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Markdown authoring with live preview mapping and AI-assisted cleanup
#[derive(Parser, Debug)]
#[command(name = "mdcraft")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the active AI provider to clean up a Markdown file
    Fix {
        file: PathBuf,

        /// Deep optimization instead of a quick fix
        #[arg(long)]
        advanced: bool,

        /// Only fix the byte range `start:end`
        #[arg(long)]
        range: Option<String>,

        /// Write the result back to the file instead of only showing the diff
        #[arg(long)]
        apply: bool,
    },

    /// Show a line diff between two files
    Diff { old: PathBuf, new: PathBuf },

    /// Render a Markdown file to a standalone preview page
    Preview {
        file: PathBuf,

        /// Write the page here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the export structure of a Markdown file as JSON
    Export { file: PathBuf },

    /// Print document statistics
    Stats { file: PathBuf },

    /// Manage AI providers
    Providers {
        #[command(subcommand)]
        command: ProvidersCommand,
    },

    /// Choose the active provider, model and API key
    Use {
        provider: String,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        api_key: Option<String>,
    },

    /// Test the connection to the active provider
    Check,
}

#[derive(Subcommand, Debug)]
enum ProvidersCommand {
    /// List built-in and user-defined providers
    List,

    /// List the templates available to `add --template`
    Templates,

    /// Add a user-defined provider from a JSON file or a template
    Add {
        #[arg(long, conflicts_with = "template")]
        file: Option<PathBuf>,

        #[arg(long)]
        template: Option<String>,
    },

    /// Remove a user-defined provider
    Remove { id: String },

    /// Print a provider as a shareable JSON envelope
    Export { id: String },

    /// Import a provider from an exported JSON envelope
    Import { file: PathBuf },
}

struct Host {
    config: AppConfig,
    store: SharedStore,
}

impl Host {
    fn load() -> Self {
        let config = AppConfig::load();
        let store: SharedStore = Rc::new(FileStore::open(config.store_file()));
        Self { config, store }
    }

    fn preview(&self) -> Preview {
        Preview::with_renderer(Arc::new(CmarkRenderer {
            allow_raw_html: self.config.allow_raw_html,
        }))
    }

    fn orchestrator(&self) -> Result<Orchestrator> {
        let mut settings = AiSettings::load(self.store.as_ref());
        if let Ok(key) = std::env::var("MDCRAFT_API_KEY") {
            settings.api_key = Some(key);
        }
        let transport = OpenAiCompatibleTransport::new()?;
        Ok(Orchestrator::new(
            Arc::new(transport),
            self.store.clone(),
            Rc::new(SystemClock),
            SessionContext {
                tier: self.config.tier,
                settings,
            },
        ))
    }
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let host = Host::load();

    match cli.command {
        Command::Fix {
            file,
            advanced,
            range,
            apply,
        } => fix(&host, file, advanced, range, apply).await,
        Command::Diff { old, new } => {
            let old = open_file(&old)?;
            let new = open_file(&new)?;
            for entry in condense(diff_lines(&old, &new)) {
                println!("{}", entry.display_line());
            }
            Ok(())
        }
        Command::Preview { file, output } => {
            let text = open_file(&file)?;
            let queue = PreviewQueue::new(host.preview());
            let rendered = queue
                .enqueue(0, text)
                .await
                .context("Preview worker did not return a render")?;
            queue.shutdown().await;
            match output {
                Some(path) => save_file(&path, &rendered.preview.page)?,
                None => println!("{}", rendered.preview.page),
            }
            Ok(())
        }
        Command::Export { file } => {
            let text = open_file(&file)?;
            let renderer = CmarkRenderer {
                allow_raw_html: host.config.allow_raw_html,
            };
            let document = build_export(&text, &renderer);
            println!("{}", serde_json::to_string_pretty(&document)?);
            Ok(())
        }
        Command::Stats { file } => {
            let text = open_file(&file)?;
            let stats = mdcraft::document::DocumentStats::of(&text);
            println!(
                "{} characters, {} words, {} lines, ~{} min read",
                stats.chars, stats.words, stats.lines, stats.read_minutes
            );
            Ok(())
        }
        Command::Providers { command } => providers(&host, command),
        Command::Use {
            provider,
            model,
            api_key,
        } => {
            let registry = ProviderRegistry::new(host.store.clone());
            let descriptor = registry
                .get(&provider)
                .ok_or_else(|| anyhow!("Unknown provider '{}'", provider))?;
            let config = descriptor.config();
            let model = match model {
                Some(m) if config.has_model(&m) => m,
                Some(m) => bail!("Provider '{}' has no model '{}'", provider, m),
                None => config
                    .default_model()
                    .map(|m| m.id.clone())
                    .unwrap_or_default(),
            };
            let mut settings = AiSettings::load(host.store.as_ref());
            settings.provider = provider;
            settings.model = model;
            if api_key.is_some() {
                settings.api_key = api_key;
            }
            settings.save(host.store.as_ref())?;
            println!("Using {} ({})", config.display_name, settings.model);
            Ok(())
        }
        Command::Check => {
            let orchestrator = host.orchestrator()?;
            let cancel = cancel_on_ctrl_c();
            match orchestrator.check_availability(&cancel).await {
                Ok(()) => {
                    println!("{} is reachable", orchestrator.provider_name());
                    Ok(())
                }
                Err(e) => Err(anyhow!("{}", e.notice(&orchestrator.provider_name()))),
            }
        }
    }
}

async fn fix(
    host: &Host,
    file: PathBuf,
    advanced: bool,
    range: Option<String>,
    apply: bool,
) -> Result<()> {
    let text = open_file(&file)?;
    let mut workspace = Workspace::new(host.orchestrator()?, host.preview(), host.store.clone());
    workspace.edit(text);
    workspace.refresh_preview();

    if let Some(range) = range {
        let (start, end) = parse_range(&range)?;
        workspace
            .select_range(start, end)
            .with_context(|| format!("Range {}:{} does not fit the document", start, end))?;
    }

    let kind = if advanced {
        FixKind::AdvancedOptimize
    } else {
        host.config.default_kind
    };
    let options = match workspace.request_fix(kind) {
        Ok(request) => {
            tracing::info!("{} ({} bytes)", request.operation_label, request.source_text.len());
            request.default_options()
        }
        Err(notice) => bail!("{}", notice),
    };

    let cancel = cancel_on_ctrl_c();
    let view = workspace
        .confirm(options, &cancel)
        .await
        .map_err(|notice| anyhow!("{}", notice))?;

    println!("{}", view.chips.join(" | "));
    println!("+{} -{}", view.added, view.removed);
    if let Some(packet) = workspace.pending_result() {
        print!("{}", packet.unified_patch());
    }

    if !apply {
        if let Some(notice) = workspace.reject() {
            notice.log();
        }
        return Ok(());
    }

    let notice = workspace.accept();
    if notice.level != NoticeLevel::Success {
        bail!("{}", notice);
    }
    save_file(&file, workspace.document().text())?;
    println!("{}", notice);
    Ok(())
}

fn providers(host: &Host, command: ProvidersCommand) -> Result<()> {
    let registry = ProviderRegistry::new(host.store.clone());
    match command {
        ProvidersCommand::List => {
            for descriptor in registry.list_all() {
                let config = descriptor.config();
                let models: Vec<&str> = config.models.iter().map(|m| m.id.as_str()).collect();
                println!(
                    "{:<20} {:<28} {}{}",
                    config.id,
                    config.display_name,
                    models.join(", "),
                    if descriptor.is_user_defined() {
                        " [custom]"
                    } else {
                        ""
                    }
                );
            }
        }
        ProvidersCommand::Templates => {
            for (key, config) in templates() {
                println!("{:<12} {}", key, config.display_name);
            }
        }
        ProvidersCommand::Add { file, template: key } => {
            let config: ProviderConfig = match (file, key) {
                (Some(path), _) => serde_json::from_str(&open_file(&path)?)
                    .with_context(|| format!("Invalid provider config in {:?}", path))?,
                (None, Some(key)) => {
                    template(&key).ok_or_else(|| anyhow!("Unknown template '{}'", key))?
                }
                (None, None) => bail!("Pass either --file or --template"),
            };
            let id = registry.add(config)?;
            println!("Added provider {}", id);
        }
        ProvidersCommand::Remove { id } => {
            if registry.remove(&id)? {
                println!("Removed provider {}", id);
            } else {
                bail!("No user-defined provider '{}'", id);
            }
        }
        ProvidersCommand::Export { id } => {
            let descriptor = registry
                .get(&id)
                .ok_or_else(|| anyhow!("Unknown provider '{}'", id))?;
            println!("{}", ProviderRegistry::export_config(descriptor.config())?);
        }
        ProvidersCommand::Import { file } => {
            let config = ProviderRegistry::import_config(&open_file(&file)?)?;
            let id = registry.add(config)?;
            println!("Imported provider {}", id);
        }
    }
    Ok(())
}
