//! Strongbox - CLI
//!
//! Command-line interface for vault operations over a local data directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use strongbox_keystore::{device_key_from_passphrase, Argon2Config, FileKeyStore, KeyStore};
use strongbox_vault::{
    hash_pin, CacheDb, FsRemote, ImportRequest, ImportSource, PinAuthenticator, SortOption, Vault,
    VaultConfig, VaultItem, VaultServices,
};

const PIN_FILE: &str = "pin.phc";
const CONFIG_FILE: &str = "config.json";
const CACHE_FILE: &str = "cache.db";
const KEYS_DIR: &str = "keys";
const REMOTE_DIR: &str = "remote";

#[derive(Parser)]
#[command(name = "strongbox")]
#[command(version = strongbox_vault::VERSION)]
#[command(about = "Strongbox - encrypted vault for files, photos and scanned documents")]
struct Cli {
    /// Data directory
    #[arg(short, long, env = "STRONGBOX_DATA_DIR", default_value = "./strongbox")]
    data_dir: PathBuf,

    /// Owner id the session runs as
    #[arg(short, long, env = "STRONGBOX_OWNER", default_value = "local")]
    owner: String,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault and set its PIN
    Init,

    /// Import files
    Import {
        paths: Vec<PathBuf>,

        /// Destination folder id
        #[arg(long)]
        parent: Option<String>,
    },

    /// Compose page images into one PDF and import it
    Scan {
        title: String,

        images: Vec<PathBuf>,

        #[arg(long)]
        parent: Option<String>,
    },

    /// Create a folder
    Mkdir {
        name: String,

        #[arg(long)]
        parent: Option<String>,
    },

    /// List a folder
    Ls {
        #[arg(long)]
        parent: Option<String>,

        /// Include items in the recycle bin
        #[arg(long)]
        all: bool,

        /// name, date or size
        #[arg(long)]
        sort: Option<SortOption>,
    },

    /// Move an item (to the root without --to)
    Mv {
        id: String,

        #[arg(long)]
        to: Option<String>,
    },

    /// Rename an item
    Rename { id: String, name: String },

    /// Move an item to the recycle bin
    Rm { id: String },

    /// Take an item out of the recycle bin
    Restore { id: String },

    /// Permanently delete an item, its content and its key
    Purge { id: String },

    /// Purge recycle-bin items past the retention period
    Sweep {
        /// Override the configured retention
        #[arg(long)]
        days: Option<u32>,
    },

    /// Decrypt an item to a file
    Export { id: String, output: PathBuf },

    /// Delete stored content and keys no item references
    Reconcile,

    /// Show files with identical content
    Duplicates,

    /// Show vault statistics
    Stats,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "strongbox=debug" } else { "strongbox=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_pin(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pin) = std::env::var("STRONGBOX_PIN") {
        return Ok(Zeroizing::new(pin));
    }
    let pin = rpassword::prompt_password(prompt).context("failed to read PIN")?;
    Ok(Zeroizing::new(pin))
}

fn open_keystore(data_dir: &Path, pin: &str) -> Result<FileKeyStore> {
    let device_key = device_key_from_passphrase(data_dir, pin, &Argon2Config::default())
        .context("failed to derive device key")?;
    FileKeyStore::open(data_dir.join(KEYS_DIR), device_key).context("failed to open keystore")
}

fn init(data_dir: &Path) -> Result<()> {
    if data_dir.join(PIN_FILE).exists() {
        bail!("a vault already exists at {}", data_dir.display());
    }
    std::fs::create_dir_all(data_dir)?;

    let pin = read_pin("New PIN: ")?;
    if pin.is_empty() {
        bail!("PIN must not be empty");
    }
    if std::env::var("STRONGBOX_PIN").is_err() {
        let again = read_pin("Repeat PIN: ")?;
        if *again != *pin {
            bail!("PINs do not match");
        }
    }

    println!("🔐 Creating Strongbox vault...");
    open_keystore(data_dir, &pin)?;
    FsRemote::open(data_dir.join(REMOTE_DIR)).context("failed to create remote store")?;
    std::fs::write(data_dir.join(PIN_FILE), hash_pin(&pin)?)?;
    VaultConfig::default().save(data_dir.join(CONFIG_FILE))?;

    println!("✅ Vault created at: {}", data_dir.display());
    println!("📁 Structure:");
    println!("   /keys/    - Sealed per-item keys");
    println!("   /remote/  - Encrypted content and item metadata");
    println!("   cache.db  - Encrypted metadata cache");
    Ok(())
}

/// Open the data directory and unlock as `owner`
async fn open_vault(data_dir: &Path, owner: &str) -> Result<Vault> {
    let phc = std::fs::read_to_string(data_dir.join(PIN_FILE))
        .with_context(|| format!("no vault at {} (run `strongbox init`)", data_dir.display()))?;
    let config = VaultConfig::load_or_default(data_dir.join(CONFIG_FILE))?;

    let pin = read_pin("PIN: ")?;
    let keystore: Arc<dyn KeyStore> = Arc::new(open_keystore(data_dir, &pin)?);
    let remote = Arc::new(FsRemote::open(data_dir.join(REMOTE_DIR))?);
    let cache_db = Arc::new(CacheDb::open(data_dir.join(CACHE_FILE), Arc::clone(&keystore))?);

    // The PIN was already entered for the keystore; answer the challenge with it
    let authenticator = PinAuthenticator::new(phc.trim(), move |_reason| Some(pin.to_string()))?;

    let vault = Vault::with_cache_db(
        config,
        VaultServices {
            keystore,
            metadata_remote: remote.clone(),
            blobs: remote,
            authenticator: Arc::new(authenticator),
        },
        cache_db,
    )?;
    vault.on_identity_changed(Some(owner.to_string()));
    vault.unlock().await?;
    Ok(vault)
}

fn print_item(item: &VaultItem) {
    let marker = if item.is_folder() { "📁" } else { "📄" };
    let deleted = if item.is_deleted { " (deleted)" } else { "" };
    if item.is_folder() {
        println!("{marker} {}  {}{deleted}", item.id, item.name);
    } else {
        println!(
            "{marker} {}  {}  {}  {} bytes{deleted}",
            item.id, item.name, item.mime_type, item.size_bytes
        );
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init => init(&cli.data_dir),
        command => {
            let vault = open_vault(&cli.data_dir, &cli.owner).await?;
            let result = execute(&vault, &cli.owner, command).await;
            vault.lock();
            result
        }
    }
}

async fn execute(vault: &Vault, owner: &str, command: Commands) -> Result<()> {
    match command {
        Commands::Init => bail!("vault is already initialised"),

        Commands::Import { paths, parent } => {
            if paths.is_empty() {
                bail!("nothing to import");
            }
            let requests = paths
                .iter()
                .map(|path| ImportRequest::new(ImportSource::File { path: path.clone() }, parent.clone()))
                .collect();

            let results = vault.import_batch(requests, owner).await?;
            let mut failed = 0;
            for (path, result) in paths.iter().zip(results) {
                match result {
                    Ok(item) => println!("✅ {} -> {}", path.display(), item.id),
                    Err(e) => {
                        failed += 1;
                        println!("❌ {}: {e}", path.display());
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} of {} imports failed", paths.len());
            }
        }

        Commands::Scan { title, images, parent } => {
            let pages = images
                .iter()
                .map(|path| std::fs::read(path).with_context(|| format!("failed to read {}", path.display())))
                .collect::<Result<Vec<_>>>()?;
            let item = vault
                .import(ImportRequest::new(ImportSource::Scan { pages, title }, parent), owner)
                .await?;
            println!("✅ Scanned {} pages into {} ({})", images.len(), item.name, item.id);
        }

        Commands::Mkdir { name, parent } => {
            let folder = vault.create_folder(&name, parent.as_deref(), owner).await?;
            println!("✅ Folder created with ID: {}", folder.id);
        }

        Commands::Ls { parent, all, sort } => {
            if let Some(sort) = sort {
                vault.set_sort_option(sort);
            }
            let listing = vault.list(owner, parent.as_deref(), all).await?;
            if listing.is_empty() {
                println!("📭 Empty");
            }
            for item in listing {
                print_item(&item);
            }
        }

        Commands::Mv { id, to } => {
            vault.move_item(owner, &id, to.as_deref()).await?;
            println!("✅ Moved");
        }

        Commands::Rename { id, name } => {
            let item = vault.rename(owner, &id, &name).await?;
            println!("✅ Renamed to {}", item.name);
        }

        Commands::Rm { id } => {
            vault.soft_delete(owner, &id).await?;
            println!("🗑️ Moved to recycle bin");
        }

        Commands::Restore { id } => {
            let item = vault.restore(owner, &id).await?;
            let location = item.parent_id.as_deref().unwrap_or("root");
            println!("✅ Restored to {location}");
        }

        Commands::Purge { id } => {
            vault.purge(owner, &id).await?;
            println!("✅ Permanently deleted");
        }

        Commands::Sweep { days } => {
            let report = match days {
                Some(days) => {
                    vault
                        .sweep_with_retention(owner, chrono::Duration::days(i64::from(days)))
                        .await?
                }
                None => vault.sweep_recycle_bin(owner).await?,
            };
            println!("🧹 Purged {} item(s)", report.purged.len());
            for (id, reason) in &report.failed {
                println!("   ⚠️ {id}: {reason}");
            }
        }

        Commands::Export { id, output } => {
            let written = vault.export_item(owner, &id, &output).await?;
            println!("✅ Exported {written} bytes to: {}", output.display());
        }

        Commands::Reconcile => {
            let report = vault.reconcile(owner).await?;
            println!("🔧 Reconcile complete");
            println!("   Orphan blobs deleted: {}", report.blobs_deleted.len());
            println!("   Orphan keys deleted:  {}", report.keys_deleted.len());
            for failure in &report.failures {
                println!("   ⚠️ {failure}");
            }
        }

        Commands::Duplicates => {
            let groups = vault.find_duplicates(owner).await?;
            if groups.is_empty() {
                println!("No duplicates");
            }
            for group in groups {
                println!("{:-<60}", "");
                for item in &group {
                    print_item(item);
                }
            }
        }

        Commands::Stats => {
            let stats = vault.stats(owner).await?;
            println!("📊 Strongbox Statistics");
            println!("{:-<40}", "");
            println!("Files:          {}", stats.files);
            println!("Folders:        {}", stats.folders);
            println!("In recycle bin: {}", stats.deleted);
            println!("Purge pending:  {}", stats.purge_pending);
            println!("Total size:     {} MB", stats.total_bytes / 1024 / 1024);
        }
    }
    Ok(())
}
