//! Command line interface for operating the service. Supports initialization,
//! serving the HTTP API, managing pubkey links directly against the store,
//! and signing or verifying authentication events.

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use nostr_link::{
    auth::unix_now,
    binding::{bind, RequestTarget},
    config::{Settings, StoreBackend},
    directory::IdentityDirectory,
    event::AuthEvent,
    header::{decode_event, encode_event},
    link::IdentityLinkService,
    server::{serve_http, AppState},
    store::{FileStore, MemoryStore, RecordStore},
    token::Hs256Verifier,
    touch::{self, TouchQueue},
    verify::verify_event,
};
use secp256k1::{Keypair, Secp256k1};
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for queued last-used updates.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "nostr-link",
    author,
    version,
    about = "Nostr HTTP authentication and pubkey linking service"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the directory tree at `STORE_ROOT`.
    Init,
    /// Launch the HTTP API.
    Serve,
    /// Rebuild the by-account index from identity records.
    Reindex,
    /// Link a pubkey to an account.
    Link { pubkey: String, account: String },
    /// Unlink a pubkey from the account that owns it.
    Unlink { pubkey: String, account: String },
    /// List the pubkeys actively linked to an account.
    List { account: String },
    /// Verify an event stored as JSON or as a `Nostr <base64>` header value.
    Verify {
        file: String,
        /// Also require the event to authorize this URL.
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value = "GET")]
        method: String,
    },
    /// Sign an authentication event and print the header value.
    Sign {
        /// Hex secret key.
        #[arg(long)]
        secret: String,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "GET")]
        method: String,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        // Signing and verifying need no configuration.
        Commands::Verify { file, url, method } => verify_file(&file, url, &method)?,
        Commands::Sign {
            secret,
            url,
            method,
        } => println!("{}", sign(&secret, &url, &method)?),
        Commands::Init => {
            // Create the on-disk directory structure.
            open_store(&load_settings(&cli.env)?)?;
        }
        Commands::Reindex => {
            let cfg = load_settings(&cli.env)?;
            if cfg.store_backend != StoreBackend::File {
                bail!("reindex requires STORE_BACKEND=file");
            }
            let store = FileStore::new(cfg.store_root.clone());
            store.init()?;
            let n = store.reindex()?;
            println!("indexed {n} identities");
        }
        Commands::Serve => serve(load_settings(&cli.env)?).await?,
        Commands::Link { pubkey, account } => {
            let cfg = load_settings(&cli.env)?;
            let link = link_service(&cfg)?.link(&pubkey, &account).await?;
            println!("{}", serde_json::to_string_pretty(&link)?);
        }
        Commands::Unlink { pubkey, account } => {
            let cfg = load_settings(&cli.env)?;
            link_service(&cfg)?.unlink(&pubkey, &account).await?;
            println!("unlinked {pubkey}");
        }
        Commands::List { account } => {
            let cfg = load_settings(&cli.env)?;
            for link in link_service(&cfg)?.list_linked(&account).await? {
                println!(
                    "{}\t{}\t{}",
                    link.pubkey,
                    link.display_pubkey(),
                    link.linked_at.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}

/// Create the env file with defaults if needed, then load settings from it.
fn load_settings(env: &str) -> anyhow::Result<Settings> {
    ensure_env_file(env)?;
    Settings::from_env(env)
}

fn open_store(cfg: &Settings) -> anyhow::Result<Arc<dyn RecordStore>> {
    Ok(match cfg.store_backend {
        StoreBackend::File => {
            let store = FileStore::new(cfg.store_root.clone());
            store.init()?;
            Arc::new(store)
        }
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    })
}

fn link_service(cfg: &Settings) -> anyhow::Result<IdentityLinkService> {
    let store = open_store(cfg)?;
    let (touches, _) = TouchQueue::channel(1);
    let directory = IdentityDirectory::new(store.clone(), cfg.store_timeout, touches);
    Ok(IdentityLinkService::new(store, directory, cfg.store_timeout))
}

async fn serve(cfg: Settings) -> anyhow::Result<()> {
    let store = open_store(&cfg)?;
    let addr: SocketAddr = cfg.bind_http.as_str().parse()?;
    let (touches, worker) = touch::spawn(store.clone(), cfg.touch_queue, cfg.store_timeout);
    let mut state = AppState::new(store, touches, cfg.store_timeout)
        .with_public_scheme(cfg.public_scheme.clone())
        .with_commit_sha(cfg.commit_sha.clone());
    match &cfg.token_secret {
        Some(secret) => state = state.with_tokens(Arc::new(Hs256Verifier::new(secret))),
        None => tracing::warn!("TOKEN_SECRET not set, token routes will reject"),
    }
    serve_http(addr, state, shutdown_signal()).await?;
    // The server dropped every queue handle; let the worker drain.
    if tokio::time::timeout(DRAIN_TIMEOUT, worker).await.is_err() {
        tracing::warn!("last-used updates still pending at shutdown, abandoning");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn verify_file(path: &str, url: Option<String>, method: &str) -> anyhow::Result<()> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let data = data.trim();
    let ev: AuthEvent = if data.starts_with("Nostr ") {
        decode_event(data)?
    } else {
        serde_json::from_str(data)?
    };
    verify_event(&ev)?;
    if let Some(url) = url {
        bind(&ev, &RequestTarget::new(url, method), unix_now())?;
    }
    println!("ok {}", ev.pubkey);
    Ok(())
}

fn sign(secret: &str, url: &str, method: &str) -> anyhow::Result<String> {
    let bytes = hex::decode(secret).context("secret must be hex")?;
    let kp = Keypair::from_seckey_slice(&Secp256k1::new(), &bytes).context("invalid secret key")?;
    let ev = AuthEvent::sign_http_auth(&kp, url, method, unix_now());
    Ok(encode_event(&ev))
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("nostr-link-data");
    let mut content = String::new();
    content.push_str("STORE_BACKEND=file\n");
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("BIND_HTTP=127.0.0.1:7777\n");
    content.push_str("PUBLIC_SCHEME=http\n");
    content.push_str("TOKEN_SECRET=\n");
    content.push_str("STORE_TIMEOUT_MS=5000\n");
    content.push_str("TOUCH_QUEUE=256\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    run(cli).await
}
