use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use core_model::{BinaryHandle, ItemKind, Payload, SettingValue, TenantId};
use library::{
    ActivityLog, FixedTenant, HistoryLibrary, NewHistoryItem, NewLogEntry, SettingsTenant,
    TenantResolver,
};
use store_sqlite::{Database, DbConfig, SettingsStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod render;

#[derive(Parser)]
#[command(name = "studio")]
#[command(about = "Local generation history and activity log")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Database file; overrides `database_path` from config.toml.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Act as this tenant instead of the signed-in session.
    #[arg(long, global = true)]
    user: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    Init,
    Login { tenant: String },
    Logout,
    Whoami,
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    Log {
        #[command(subcommand)]
        command: LogCommand,
    },
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    Doctor,
}

#[derive(Subcommand)]
enum HistoryCommand {
    Add(HistoryAddArgs),
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    Delete { id: String },
    Clear,
}

#[derive(Args)]
struct HistoryAddArgs {
    #[arg(long, value_enum)]
    kind: KindOpt,
    #[arg(long)]
    prompt: String,
    #[arg(long, conflicts_with = "file")]
    text: Option<String>,
    #[arg(long)]
    file: Option<PathBuf>,
    #[arg(long, default_value = "application/octet-stream")]
    mime: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindOpt {
    Image,
    Video,
    Audio,
    Storyboard,
    Canvas,
    Copy,
}

impl From<KindOpt> for ItemKind {
    fn from(opt: KindOpt) -> Self {
        match opt {
            KindOpt::Image => ItemKind::Image,
            KindOpt::Video => ItemKind::Video,
            KindOpt::Audio => ItemKind::Audio,
            KindOpt::Storyboard => ItemKind::Storyboard,
            KindOpt::Canvas => ItemKind::Canvas,
            KindOpt::Copy => ItemKind::Copy,
        }
    }
}

#[derive(Subcommand)]
enum LogCommand {
    Add(LogAddArgs),
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    Delete { id: String },
    Clear,
}

#[derive(Args)]
struct LogAddArgs {
    #[arg(long)]
    model: String,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "")]
    output: String,
    #[arg(long, default_value_t = 0)]
    tokens: u64,
    /// Records the call as failed with this detail.
    #[arg(long)]
    error: Option<String>,
}

#[derive(Subcommand)]
enum SettingsCommand {
    Get { key: String },
    Set { key: String, value: String },
    Remove { key: String },
    List,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let t = Instant::now();

    let path = cli.db.clone().unwrap_or_else(|| config.database_path());
    if path != PathBuf::from(":memory:")
        && let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating parent dir for {}", path.display()))?;
    }
    info!(path = %path.display(), "opening database");
    let db = Database::new(DbConfig::at(&path));
    let settings = SettingsStore::new(db.clone());
    let session = SettingsTenant::new(settings.clone());

    let tenants: Arc<dyn TenantResolver> = match cli.user.as_deref() {
        Some(raw) => {
            let tenant = TenantId::new(raw).with_context(|| "--user must not be blank")?;
            Arc::new(FixedTenant::new(tenant))
        }
        None => Arc::new(session.clone()),
    };
    let history = HistoryLibrary::with_cap(db.clone(), tenants.clone(), config.capacity.history);
    let activity = ActivityLog::with_cap(db.clone(), tenants.clone(), config.capacity.logs);
    let use_color = render::color_enabled();
    let now_ms = chrono::Utc::now().timestamp_millis();

    match cli.command {
        Commands::Init => {
            db.ensure_open().with_context(|| "initializing storage")?;
            info!(elapsed = ?t.elapsed(), "initialized");
            println!("schema_version={}", db.schema_version()?);
        }
        Commands::Login { tenant } => {
            let tenant = TenantId::new(tenant).with_context(|| "tenant must not be blank")?;
            session.sign_in(&tenant)?;
            println!("signed in as {tenant}");
        }
        Commands::Logout => {
            session.sign_out()?;
            println!("signed out");
        }
        Commands::Whoami => match tenants.current_tenant() {
            Some(tenant) => println!("{tenant}"),
            None => println!("signed out"),
        },
        Commands::History { command } => match command {
            HistoryCommand::Add(args) => {
                let payload = match (args.text, args.file) {
                    (Some(text), None) => Payload::Text(text),
                    (None, Some(file)) => {
                        let bytes = std::fs::read(&file)
                            .with_context(|| format!("reading {}", file.display()))?;
                        Payload::Binary(BinaryHandle::new(args.mime, bytes))
                    }
                    _ => anyhow::bail!("pass exactly one of --text or --file"),
                };
                let saved = history.add(NewHistoryItem {
                    kind: args.kind.into(),
                    prompt: args.prompt,
                    payload,
                })?;
                report_saved(saved.as_ref().map(|item| item.id.as_str()));
            }
            HistoryCommand::List { json } => {
                let items = history.list()?;
                info!(items = items.len(), elapsed = ?t.elapsed(), "history listed");
                if json {
                    println!("{}", serde_json::to_string_pretty(&items)?);
                } else {
                    for (i, item) in items.iter().enumerate() {
                        println!("{}", render::history_line(i, item, now_ms, use_color));
                    }
                }
            }
            HistoryCommand::Delete { id } => {
                let removed = history.delete_by_id(&id)?;
                println!("{}", if removed { "deleted" } else { "not found" });
            }
            HistoryCommand::Clear => {
                let removed = history.clear()?;
                println!("cleared {removed} items");
            }
        },
        Commands::Log { command } => match command {
            LogCommand::Add(args) => {
                let entry = match args.error {
                    Some(detail) => NewLogEntry::failure(args.model, args.prompt, detail),
                    None => NewLogEntry::success(args.model, args.prompt, args.output, args.tokens),
                };
                let saved = activity.add(entry)?;
                report_saved(saved.as_ref().map(|item| item.id.as_str()));
            }
            LogCommand::List { json } => {
                let items = activity.list()?;
                info!(items = items.len(), elapsed = ?t.elapsed(), "log listed");
                if json {
                    println!("{}", serde_json::to_string_pretty(&items)?);
                } else {
                    for (i, item) in items.iter().enumerate() {
                        println!("{}", render::log_line(i, item, now_ms, use_color));
                    }
                }
            }
            LogCommand::Delete { id } => {
                let removed = activity.delete_by_id(&id)?;
                println!("{}", if removed { "deleted" } else { "not found" });
            }
            LogCommand::Clear => {
                let removed = activity.clear()?;
                println!("cleared {removed} entries");
            }
        },
        Commands::Settings { command } => match command {
            SettingsCommand::Get { key } => match settings.get(&key)? {
                Some(value) => println!("{value}"),
                None => println!("(unset)"),
            },
            SettingsCommand::Set { key, value } => {
                settings.set(&key, &SettingValue::parse_loose(&value))?;
            }
            SettingsCommand::Remove { key } => {
                settings.remove(&key)?;
            }
            SettingsCommand::List => {
                for key in settings.keys()? {
                    let value = settings.get(&key)?.map(|v| v.to_string()).unwrap_or_default();
                    println!("{key}={value}");
                }
            }
        },
        Commands::Doctor => {
            info!("running integrity check");
            let check = db.integrity_check()?;
            let version = db.schema_version()?;
            info!(elapsed = ?t.elapsed(), "integrity check done");
            println!("path={}", db.path().display());
            println!("integrity_check={check}");
            println!("schema_version={version}");
            println!("history_cap={}", history.cap());
            println!("log_cap={}", activity.cap());
            if tenants.current_tenant().is_some() {
                println!("history_items={}", history.list()?.len());
                println!("log_entries={}", activity.list()?.len());
            }
        }
    }

    Ok(())
}

fn report_saved(id: Option<&str>) {
    match id {
        Some(id) => println!("{id}"),
        None => eprintln!("not saved: no active session or storage unavailable"),
    }
}
