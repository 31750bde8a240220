//! vaultkit - developer CLI for vault sessions
//!
//! Opens the vault of a wallet address against a vault node and manages its bookmark records.
//! The session is persisted under the state directory, so consecutive invocations reuse it the
//! way a reloaded page would.

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vaultkit_core::{
    session::FileKeyValueStore, BookmarkPatch, HttpTransport, InitState, NewBookmark,
    RecordRepository, SessionStore, VaultConfig, VaultInitializer,
};

/// vaultkit - open per-user vaults and manage bookmark records
#[derive(Parser, Debug)]
#[command(name = "vaultkit")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Vault API base URL
    #[arg(long, env = "VAULTKIT_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Deployment preset (local, staging, production)
    #[arg(long, env = "VAULTKIT_ENVIRONMENT", global = true)]
    environment: Option<String>,

    /// Hex-encoded builder private key
    #[arg(long, env = "VAULTKIT_BUILDER_PRIVATE_KEY", hide_env_values = true, global = true)]
    builder_private_key: Option<String>,

    /// Wallet address whose vault is opened
    #[arg(short, long, env = "VAULTKIT_USER_ADDRESS", global = true)]
    user_address: Option<String>,

    /// Name of the record collection
    #[arg(long, env = "VAULTKIT_COLLECTION_NAME", global = true)]
    collection: Option<String>,

    /// Directory holding the persisted session
    #[arg(long, env = "VAULTKIT_STATE_DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// Allow a plain http base URL
    #[arg(long, global = true)]
    allow_insecure: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open the vault, provisioning identity and collection if needed
    Init,

    /// Show the persisted session without contacting the vault
    Status,

    /// Store a bookmark
    Create {
        /// Title
        #[arg(short, long)]
        title: String,

        /// Target URL
        #[arg(long)]
        url: String,

        /// Description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Preview image URL
        #[arg(long)]
        image: Option<String>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Mark as favorite
        #[arg(long)]
        favorite: bool,

        /// Mark as archived
        #[arg(long)]
        archived: bool,
    },

    /// List bookmarks as JSON
    #[command(alias = "ls")]
    List,

    /// Delete a bookmark by id
    Delete {
        /// Bookmark id
        id: String,
    },

    /// Edit a bookmark [not supported by the vault]
    Update {
        /// Bookmark id
        id: String,

        /// New title
        #[arg(short, long)]
        title: Option<String>,

        /// New URL
        #[arg(long)]
        url: Option<String>,
    },

    /// Forget the persisted session
    Clear,
}

struct Vault {
    initializer: VaultInitializer,
    records: RecordRepository,
}

impl Cli {
    /// Resolves `VAULTKIT_*` settings, with flags taking precedence over the environment.
    fn config(&self) -> Result<VaultConfig> {
        let config = VaultConfig::from_env_with(|key| match key {
            "VAULTKIT_BASE_URL" => self.base_url.clone(),
            "VAULTKIT_ENVIRONMENT" => self.environment.clone(),
            "VAULTKIT_BUILDER_PRIVATE_KEY" => self.builder_private_key.clone(),
            "VAULTKIT_COLLECTION_NAME" => self.collection.clone(),
            "VAULTKIT_ALLOW_INSECURE_HTTP" if self.allow_insecure => Some("true".to_string()),
            other => std::env::var(other).ok(),
        })?;
        Ok(config)
    }

    fn state_dir(&self) -> Result<PathBuf> {
        self.state_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("vaultkit")))
            .ok_or_else(|| eyre!("no state directory; pass --state-dir"))
    }

    fn user_address(&self) -> Result<&str> {
        self.user_address.as_deref().ok_or_else(|| {
            eyre!("no user address; pass --user-address or set VAULTKIT_USER_ADDRESS")
        })
    }

    fn open(&self) -> Result<Vault> {
        let config = self.config()?;
        let transport = HttpTransport::from_config(&config)?;
        let store = FileKeyValueStore::new(self.state_dir()?)
            .wrap_err("failed to open the state directory")?;
        let sessions = SessionStore::with_ttl(Arc::new(store), config.session_ttl_seconds);
        let initializer = VaultInitializer::new(Arc::new(config), Arc::new(transport), sessions);
        let records = RecordRepository::new(initializer.clone());
        Ok(Vault {
            initializer,
            records,
        })
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: &Cli) -> Result<()> {
    let vault = cli.open()?;

    match &cli.command {
        Commands::Init => {
            let address = cli.user_address()?;
            let handle = vault
                .initializer
                .initialize(address)
                .await
                .wrap_err("vault initialization failed")?;
            tracing::info!(collection = handle.collection_id(), "vault ready");
            print_json(&vault.initializer.sessions().load())?;
        }
        Commands::Status => {
            if let Some(address) = cli.user_address.as_deref() {
                vault.initializer.restore(address)?;
                let ready = vault.initializer.state(address) == InitState::Ready;
                println!("{address}: {}", if ready { "ready" } else { "not initialized" });
            }
            print_json(&vault.initializer.sessions().load())?;
        }
        Commands::Create {
            title,
            url,
            description,
            image,
            tags,
            favorite,
            archived,
        } => {
            let address = cli.user_address()?;
            vault.initializer.initialize(address).await?;
            let id = vault
                .records
                .create(
                    address,
                    NewBookmark {
                        title: title.clone(),
                        url: url.clone(),
                        description: description.clone(),
                        image: image.clone(),
                        tags: tags.clone(),
                        archived: *archived,
                        favorite: *favorite,
                    },
                )
                .await?;
            println!("{id}");
        }
        Commands::List => {
            let address = cli.user_address()?;
            vault.initializer.initialize(address).await?;
            print_json(&vault.records.list(address).await?)?;
        }
        Commands::Delete { id } => {
            let address = cli.user_address()?;
            vault.initializer.initialize(address).await?;
            vault.records.delete(address, id).await?;
            tracing::info!(%id, "bookmark deleted");
        }
        Commands::Update { id, title, url } => {
            let address = cli.user_address()?;
            let patch = BookmarkPatch {
                title: title.clone(),
                url: url.clone(),
                ..BookmarkPatch::default()
            };
            vault.records.update(address, id, &patch)?;
        }
        Commands::Clear => {
            match cli.user_address.as_deref() {
                Some(address) => vault.initializer.clear(address),
                None => vault.initializer.sessions().clear(),
            }
            tracing::info!("vault session cleared");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    run(&cli).await
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    const KEY: &str = "0x3333333333333333333333333333333333333333333333333333333333333333";

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("vaultkit").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_environment() {
        let cli = parse(&[
            "--base-url",
            "http://localhost:9000",
            "--allow-insecure",
            "--builder-private-key",
            KEY,
            "--collection",
            "reading-list",
            "status",
        ]);
        let config = cli.config().unwrap();
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.collection_name, "reading-list");
        assert!(config.allow_insecure_http);
    }

    #[test]
    fn test_plain_http_needs_opt_in() {
        let cli = parse(&["--base-url", "http://localhost:9000", "status"]);
        assert!(cli.config().is_err());
    }

    #[test]
    fn test_open_without_session_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("state");
        let cli = parse(&[
            "--base-url",
            "https://vault.example.org",
            "--builder-private-key",
            KEY,
            "--state-dir",
            state_dir.to_str().unwrap(),
            "-u",
            "addr1",
            "list",
        ]);

        let vault = cli.open().unwrap();
        assert!(state_dir.is_dir());
        assert!(vault.initializer.restore("addr1").unwrap().is_none());
        assert_eq!(vault.initializer.state("addr1"), InitState::Idle);
    }

    #[test]
    fn test_missing_user_address() {
        let cli = parse(&["--base-url", "https://vault.example.org", "list"]);
        if std::env::var("VAULTKIT_USER_ADDRESS").is_err() {
            assert!(cli.user_address().is_err());
        }
    }
}
