//! provider-cache - command line access to provider configurations.
//!
//! Runs every command through the reactive store, so reads are served from
//! the cache and writes are applied optimistically before the store confirms.
//!
//! Use `--memory` to run against a seeded in-process store instead of MongoDB.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use provider_cache::config::Config;
use provider_cache::database::Database;
use provider_cache::{
    EntityStore, Gateway, MemoryGateway, MongoGateway, ProviderConfig, ProviderPatch,
};

#[derive(Debug, Parser)]
#[command(name = "provider-cache", version, about = "Inspect and edit provider configurations")]
struct Cli {
    /// Use a seeded in-memory store instead of MongoDB
    #[arg(long)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List providers, enabled first
    List,
    /// Show one provider as JSON
    Show { id: String },
    /// Enable a provider
    Enable { id: String },
    /// Disable a provider
    Disable { id: String },
    /// Select the model of a provider
    SetModel { id: String, model: String },
    /// Show the default provider
    Default,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("provider_cache=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!("Configuration loaded successfully");

    let gateway: Arc<dyn Gateway<ProviderConfig>> = if cli.memory {
        info!("Using in-memory provider store");
        Arc::new(demo_gateway())
    } else {
        info!("Connecting to MongoDB...");
        let db = Database::connect(&config).await?;
        Arc::new(MongoGateway::new(&db))
    };

    let store = EntityStore::new(gateway, config.cache.clone());
    run(&store, cli.command).await
}

async fn run(store: &EntityStore<ProviderConfig>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::List => {
            let providers = store.list_sorted_by(ProviderConfig::display_key).await?;
            // `*` usable, `!` enabled without a model
            for provider in providers {
                let marker = match (provider.is_usable(), provider.enabled) {
                    (true, _) => "*",
                    (false, true) => "!",
                    (false, false) => " ",
                };
                println!(
                    "{} {:<16} {:<24} {}",
                    marker,
                    provider.id,
                    provider.name,
                    provider.model.as_deref().unwrap_or("-"),
                );
            }
        }
        Command::Show { id } => {
            let provider = store.load(&id).await?;
            println!("{}", serde_json::to_string_pretty(provider.as_ref())?);
        }
        Command::Enable { id } => {
            apply(store, &id, ProviderPatch::default().enabled(true)).await?;
        }
        Command::Disable { id } => {
            apply(store, &id, ProviderPatch::default().enabled(false)).await?;
        }
        Command::SetModel { id, model } => {
            apply(store, &id, ProviderPatch::default().model(model)).await?;
        }
        Command::Default => {
            let provider = store.initialize().await?;
            println!("{} ({})", provider.name, provider.id);
        }
    }

    Ok(())
}

/// Apply a patch, logging every change the store announces.
async fn apply(
    store: &EntityStore<ProviderConfig>,
    id: &str,
    patch: ProviderPatch,
) -> anyhow::Result<()> {
    store.load(id).await?;

    let reader = store.clone();
    let key = id.to_string();
    let _watch = store.subscribe(id, move || {
        if let Some(provider) = reader.get_snapshot(&key) {
            info!(
                "{} changed: enabled={}, model={:?}",
                provider.id, provider.enabled, provider.model
            );
        }
    });

    let pending = store.update(id, patch);
    let confirmed = pending.await?;
    println!(
        "{} ({}) enabled={} model={}",
        confirmed.name,
        confirmed.id,
        confirmed.enabled,
        confirmed.model.as_deref().unwrap_or("-"),
    );
    Ok(())
}

/// Store used by `--memory`.
fn demo_gateway() -> MemoryGateway<ProviderConfig> {
    let mut openai = ProviderConfig::new("openai", "OpenAI");
    openai.base_url = Some("https://api.openai.com/v1".to_string());
    openai.model = Some("gpt-4o".to_string());
    openai.enabled = true;
    openai.is_default = true;

    let mut anthropic = ProviderConfig::new("anthropic", "Anthropic");
    anthropic.base_url = Some("https://api.anthropic.com".to_string());
    anthropic.sort_order = 1;

    let mut ollama = ProviderConfig::new("ollama", "Ollama");
    ollama.base_url = Some("http://localhost:11434".to_string());
    ollama.sort_order = 2;

    let gateway = MemoryGateway::with_entities([openai, anthropic, ollama]);
    gateway.set_default("openai");
    gateway
}
