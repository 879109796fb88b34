use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use media_courier::config::{self, Config};
use media_courier::localization::{BuiltinLocalizer, DEFAULT_LANGUAGE};
use media_courier::media::MediaKind;
use media_courier::security::InputValidator;
use media_courier::uploader::cleanup::{self, CleanupManager};
use media_courier::uploader::{DeliveryRequest, Dispatcher, TelegramClient};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a downloaded file or folder to a chat, then clean it up
    Deliver {
        /// File or directory under the downloads root
        path: PathBuf,

        #[arg(long)]
        chat_id: i64,

        #[arg(long, default_value = DEFAULT_LANGUAGE)]
        lang: String,

        /// Kind to assume when a single file has an unknown extension
        #[arg(long)]
        kind: Option<MediaKind>,

        #[arg(long)]
        caption: Option<String>,

        /// Audio title
        #[arg(long)]
        title: Option<String>,

        /// Audio performer
        #[arg(long)]
        performer: Option<String>,
    },
    /// Remove stale downloads and check free disk space
    Sweep {
        /// Run one pass and exit instead of sweeping periodically
        #[clap(long)]
        once: bool,
    },
    /// Show or reset the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = config::load_config().context("Failed to load configuration")?;
    init_logging(&config);

    match cli.command {
        Command::Deliver {
            path,
            chat_id,
            lang,
            kind,
            caption,
            title,
            performer,
        } => {
            let request = DeliveryRequest {
                chat_id,
                source_path: path,
                language: lang,
                kind_hint: kind,
                caption,
                title,
                performer,
            };
            deliver(&config, request).await
        }
        Command::Sweep { once } => sweep(&config, once).await,
        Command::Config { action } => match action {
            ConfigAction::Show => {
                let mut shown = config.clone();
                if shown.bot_token.is_some() {
                    shown.bot_token = Some("<redacted>".to_string());
                }
                println!("{}", serde_json::to_string_pretty(&shown)?);
                Ok(())
            }
            ConfigAction::Reset => {
                config::reset_config().context("Failed to reset configuration")?;
                println!("Configuration reset to defaults");
                Ok(())
            }
        },
    }
}

fn init_logging(config: &Config) {
    let level = config
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or(log::LevelFilter::Info);

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

async fn deliver(config: &Config, request: DeliveryRequest) -> anyhow::Result<()> {
    config::validate_config(config).context("Invalid configuration")?;
    InputValidator::validate_chat_id(request.chat_id)?;
    InputValidator::validate_source_path(&request.source_path)?;

    let token = config.resolve_bot_token()?;
    let client = TelegramClient::new(&token, &config.client_settings())
        .context("Failed to create Telegram client")?;

    log::info!("Starting media courier v{}", env!("CARGO_PKG_VERSION"));

    let cleanup = CleanupManager::start(config.cleanup_settings());
    let dispatcher = Dispatcher::new(
        Arc::new(client),
        Arc::new(BuiltinLocalizer),
        cleanup.clone(),
        config.dispatcher_settings(),
    );

    let report = dispatcher.deliver(request).await;
    cleanup.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn sweep(config: &Config, once: bool) -> anyhow::Result<()> {
    let root = config.downloads_root.clone();
    let settings = config.sweep_settings();

    if once {
        let removed = cleanup::sweep_old_downloads(&root, settings.max_age).await;
        let probe = root.clone();
        let (available, used) = tokio::task::spawn_blocking(move || {
            (cleanup::check_disk_space(&probe), cleanup::directory_size(&probe))
        })
        .await?;

        println!("Removed {} stale download(s)", removed);
        println!("Downloads root uses {:.2} MB", used as f64 / 1024.0 / 1024.0);
        if let Some(bytes) = available {
            println!("{:.2} GB free", bytes as f64 / 1024.0 / 1024.0 / 1024.0);
        }
        return Ok(());
    }

    log::info!(
        "🧹 Sweeping {} every {:?} (max age {:?})",
        root.display(),
        settings.interval,
        settings.max_age
    );

    tokio::select! {
        _ = cleanup::periodic_sweep(root, settings) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            log::info!("Shutting down sweeper");
        }
    }
    Ok(())
}
