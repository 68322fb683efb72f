//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use docflow_core::{DEFAULT_URL_TTL, IngestionPipeline, Services, Upload};
use docflow_shared::{
    AppConfig, Document, DocumentQuery, DocumentUpdate, SortOrder, init_config, load_config,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docflow: document ingestion with normalization and summaries.
#[derive(Parser)]
#[command(
    name = "docflow",
    version,
    about = "Upload documents, normalize them to PDF, and browse the resulting library.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Acting user. Every document and folder command is scoped to it.
    #[arg(long, env = "DOCFLOW_OWNER", global = true)]
    pub owner: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Paging and ordering flags shared by `list` and `search`.
#[derive(clap::Args, Debug)]
pub(crate) struct PageArgs {
    /// Restrict to one folder.
    #[arg(long)]
    pub folder: Option<String>,

    /// Page size.
    #[arg(long, default_value_t = 20)]
    pub limit: u32,

    /// Rows to skip.
    #[arg(long, default_value_t = 0)]
    pub offset: u32,

    /// Oldest first instead of newest first.
    #[arg(long)]
    pub oldest: bool,
}

impl PageArgs {
    fn query(&self) -> DocumentQuery {
        DocumentQuery {
            folder_id: self.folder.clone(),
            limit: self.limit,
            offset: self.offset,
            order: if self.oldest {
                SortOrder::OldestFirst
            } else {
                SortOrder::NewestFirst
            },
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Upload a file and ingest it.
    Upload {
        /// File to upload.
        file: PathBuf,

        /// Folder to file the document in.
        #[arg(long)]
        folder: Option<String>,

        /// Content type claimed for the file. Recorded, never trusted.
        #[arg(long)]
        mime: Option<String>,

        /// Return once the document is PROCESSING instead of waiting.
        #[arg(long)]
        detach: bool,
    },

    /// Print the status of a document.
    Status { id: String },

    /// Print a document as JSON.
    Show { id: String },

    /// List READY documents.
    List {
        #[command(flatten)]
        page: PageArgs,
    },

    /// Search documents by name, any status.
    Search {
        term: String,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Rename a document.
    Rename { id: String, name: String },

    /// Move a document into a folder, or out of any folder.
    Move {
        id: String,

        /// Target folder. Omit to detach the document.
        #[arg(long)]
        folder: Option<String>,
    },

    /// Delete a document and its stored file.
    Delete { id: String },

    /// Print a time-limited download URL for a READY document.
    Url {
        id: String,

        /// URL lifetime in seconds.
        #[arg(long, default_value_t = DEFAULT_URL_TTL.as_secs())]
        ttl: u64,
    },

    /// Print the summary of a document.
    Summary { id: String },

    /// Give another user read access to a document, or revoke it.
    Share {
        id: String,

        /// User to share with.
        #[arg(long = "with", value_name = "USER")]
        with_user: String,

        /// Share lifetime in hours.
        #[arg(long, value_name = "HOURS", default_value_t = 24, conflicts_with = "revoke")]
        expires: u32,

        /// Revoke an existing share instead.
        #[arg(long)]
        revoke: bool,
    },

    /// List the shares of a document.
    Shares { id: String },

    /// Folder management.
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },

    /// Resume interrupted ingestions and fail stale records.
    Resume,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Folder subcommands.
#[derive(Subcommand)]
pub(crate) enum FolderAction {
    /// Create a folder.
    Create { name: String },
    /// Rename a folder.
    Rename { id: String, name: String },
    /// Delete a folder. Its documents are kept.
    Delete { id: String },
    /// List folders.
    List,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docflow=info",
        1 => "docflow=debug",
        _ => "docflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
        Command::Resume => {
            let config = load_config()?;
            let services = Services::open(&config).await?;
            cmd_resume(&config, &services).await
        }
        command => {
            let owner = cli
                .owner
                .ok_or_else(|| eyre!("--owner (or DOCFLOW_OWNER) is required"))?;
            let config = load_config()?;
            let services = Services::open(&config).await?;
            run_owned(command, &owner, &config, &services).await
        }
    }
}

async fn run_owned(
    command: Command,
    owner: &str,
    config: &AppConfig,
    services: &Services,
) -> Result<()> {
    let documents = &services.documents;
    match command {
        Command::Upload {
            file,
            folder,
            mime,
            detach,
        } => cmd_upload(config, services, owner, &file, folder, mime, detach).await,
        Command::Status { id } => {
            let document = documents.find_one(owner, &id).await?;
            println!("{}", document.status);
            Ok(())
        }
        Command::Show { id } => {
            let document = documents.find_one(owner, &id).await?;
            println!("{}", serde_json::to_string_pretty(&document)?);
            Ok(())
        }
        Command::List { page } => {
            print_documents(&documents.list(owner, &page.query()).await?);
            Ok(())
        }
        Command::Search { term, page } => {
            print_documents(&documents.search(owner, &term, &page.query()).await?);
            Ok(())
        }
        Command::Rename { id, name } => {
            let update = DocumentUpdate {
                name: Some(name),
                folder_id: None,
            };
            let document = documents.update(owner, &id, update).await?;
            println!("Renamed {} to {}", document.id, document.name);
            Ok(())
        }
        Command::Move { id, folder } => {
            let update = DocumentUpdate {
                name: None,
                folder_id: Some(folder),
            };
            let document = documents.update(owner, &id, update).await?;
            match &document.folder_id {
                Some(folder_id) => println!("Moved {} to folder {folder_id}", document.id),
                None => println!("Removed {} from its folder", document.id),
            }
            Ok(())
        }
        Command::Delete { id } => {
            let document = documents.delete(owner, &id).await?;
            println!("Deleted {} ({})", document.id, document.name);
            Ok(())
        }
        Command::Url { id, ttl } => {
            let url = documents
                .signed_url(owner, &id, Duration::from_secs(ttl))
                .await?;
            println!("{url}");
            Ok(())
        }
        Command::Summary { id } => {
            match documents.get_summary(owner, &id).await? {
                Some(summary) => println!("{}", summary.summary),
                None => println!("No summary yet."),
            }
            Ok(())
        }
        Command::Share {
            id,
            with_user,
            expires,
            revoke,
        } => {
            if revoke {
                documents.unshare(owner, &id, &with_user).await?;
                println!("Revoked access to {id} for {with_user}");
            } else {
                let expires_at = Utc::now() + chrono::Duration::hours(i64::from(expires));
                let share = documents.share(owner, &id, &with_user, expires_at).await?;
                println!(
                    "Shared {} with {} until {}",
                    share.document_id,
                    share.user_id,
                    share.expires_at.to_rfc3339()
                );
            }
            Ok(())
        }
        Command::Shares { id } => {
            let now = Utc::now();
            for share in documents.shares(owner, &id).await? {
                let state = if share.is_active_at(now) { "active" } else { "expired" };
                println!("{:<24} {:<8} {}", share.user_id, state, share.expires_at.to_rfc3339());
            }
            Ok(())
        }
        Command::Folder { action } => cmd_folder(services, owner, action).await,
        Command::Resume | Command::Config { .. } => {
            Err(eyre!("command does not act on behalf of an owner"))
        }
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_upload(
    config: &AppConfig,
    services: &Services,
    owner: &str,
    file: &Path,
    folder: Option<String>,
    mime: Option<String>,
    detach: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .wrap_err_with(|| format!("cannot read '{}'", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| eyre!("'{}' has no usable file name", file.display()))?
        .to_string();

    let pipeline = services.pipeline(config)?;
    info!(file = %file.display(), size = bytes.len(), "uploading");

    let submitted = pipeline
        .submit(Upload {
            bytes,
            filename,
            declared_mime: mime,
            owner_id: owner.to_string(),
            folder_id: folder,
        })
        .await?;

    println!("Document: {}", submitted.document_id);
    if detach {
        println!("Status:   {} (run `docflow resume` to finish)", submitted.status);
        return Ok(());
    }

    drain(&pipeline, "Processing document").await?;
    let document = services.documents.find_one(owner, &submitted.document_id).await?;
    println!("Status:   {}", document.status);
    if let Some(key) = &document.storage_key {
        println!("Stored:   {key} ({} bytes)", document.size_bytes);
    }
    Ok(())
}

async fn cmd_resume(config: &AppConfig, services: &Services) -> Result<()> {
    let pipeline = services.pipeline(config)?;
    let stale_after = Duration::from_secs(config.pipeline.stale_after_secs);
    let (resumed, swept) = services.recover(&pipeline, stale_after).await?;

    if resumed > 0 {
        drain(&pipeline, &format!("Resuming {resumed} workflow(s)")).await?;
    }
    println!("Resumed: {resumed}");
    println!("Failed stale records: {}", swept.len());
    for document in &swept {
        println!("  {}  {}", document.id, document.name);
    }
    Ok(())
}

async fn cmd_folder(services: &Services, owner: &str, action: FolderAction) -> Result<()> {
    let folders = &services.folders;
    match action {
        FolderAction::Create { name } => {
            let folder = folders.create(owner, &name).await?;
            println!("{}  {}", folder.id, folder.name);
        }
        FolderAction::Rename { id, name } => {
            let folder = folders.rename(owner, &id, &name).await?;
            println!("{}  {}", folder.id, folder.name);
        }
        FolderAction::Delete { id } => {
            let folder = folders.delete(owner, &id).await?;
            println!("Deleted folder {}", folder.name);
        }
        FolderAction::List => {
            for folder in folders.list(owner).await? {
                println!("{}  {}", folder.id, folder.name);
            }
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

/// Wait for background work with a spinner.
async fn drain(pipeline: &IngestionPipeline, message: &str) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    pipeline.wait_idle().await;
    spinner.finish_and_clear();
    Ok(())
}

fn print_documents(documents: &[Document]) {
    if documents.is_empty() {
        println!("No documents.");
        return;
    }
    for d in documents {
        println!(
            "{}  {:<10}  {:>10}  {}  {}",
            d.id,
            d.status.as_str(),
            d.size_bytes,
            d.created_at.format("%Y-%m-%d %H:%M"),
            d.name
        );
    }
}
