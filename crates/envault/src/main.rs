//! `envault` — storage service binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from the file named by `CONFIG_PATH`.
//! 2. Initialise the tracing subscriber.
//! 3. Open the SQLite store and apply the schema.
//! 4. Ensure the file storage directory exists.
//! 5. Build the Vault key-service client from the environment.
//! 6. Wire the envelope crypter and session-token keys.
//! 7. Build the Axum router and run the accept loop.

mod auth;
mod config;
mod crypto;
mod db;
mod kms;
mod server;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tower::ServiceExt as _;
use tracing::{debug, error, info};

use auth::AuthKeys;
use config::Config;
use crypto::{AesGcmProvider, EnvelopeCrypter, OsRandom};
use db::Store;
use kms::VaultTransit;
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::load().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.environment)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?cfg.environment,
        "envault starting"
    );
    debug!(
        rotation_period = ?cfg.dec_rotation_period.get(),
        max_upload_size = cfg.max_upload_size,
        "crypter settings"
    );

    // -----------------------------------------------------------------------
    // 3. Database
    // -----------------------------------------------------------------------
    let store = Store::open(&cfg.db_path)
        .await
        .with_context(|| format!("could not open database at {}", cfg.db_path))?;

    // -----------------------------------------------------------------------
    // 4. Storage directory
    // -----------------------------------------------------------------------
    let storage_dir = ensure_storage_dir(&cfg.file_storage_path)?;

    // -----------------------------------------------------------------------
    // 5. Key service
    // -----------------------------------------------------------------------
    let vault = VaultTransit::from_env().context("could not initialise key service client")?;

    // -----------------------------------------------------------------------
    // 6. Crypter and session keys
    // -----------------------------------------------------------------------
    let random = Arc::new(OsRandom);
    let crypter = EnvelopeCrypter::new(
        store.clone(),
        Arc::new(vault),
        random.clone(),
        AesGcmProvider::new(cfg.max_upload_size as usize),
        cfg.dec_rotation_period.get(),
    );
    let auth_keys = AuthKeys::new(random.as_ref(), cfg.token_time_to_live.get());

    // -----------------------------------------------------------------------
    // 7. HTTP server
    // -----------------------------------------------------------------------
    let state = AppState::new(
        store,
        Arc::new(crypter),
        Arc::new(auth_keys),
        storage_dir,
        cfg.max_upload_size,
    );
    let request_timeout = (!cfg.write_timeout.is_zero()).then(|| cfg.write_timeout.get());
    let router = server::router::build(state, request_timeout);

    let addr: SocketAddr = cfg.address.parse().context("invalid listen address")?;
    info!(
        %addr,
        max_upload_size = cfg.max_upload_size,
        "starting server"
    );
    debug!(
        read_timeout = ?cfg.read_timeout.get(),
        write_timeout = ?cfg.write_timeout.get(),
        idle_timeout = ?cfg.idle_timeout.get(),
        "server timeouts"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;

    loop {
        let (tcp_stream, peer_addr) = listener.accept().await?;
        let router = router.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(tcp_stream);
            let svc =
                hyper::service::service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    router.clone().oneshot(req.map(axum::body::Body::new))
                });

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, svc)
                .await
            {
                error!(peer = %peer_addr, err = %e, "connection error");
            }
        });
    }
}

/// Resolve the storage directory to an absolute path, creating it if absent.
/// A pre-existing non-directory at the path is a hard error.
fn ensure_storage_dir(path: &str) -> Result<PathBuf> {
    let full_path =
        std::path::absolute(path).with_context(|| format!("could not resolve path {path}"))?;

    match std::fs::metadata(&full_path) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => anyhow::bail!(
            "storage path {} exists and is not a directory",
            full_path.display()
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %full_path.display(), "storage dir does not exist; creating");
            std::fs::create_dir_all(&full_path)
                .with_context(|| format!("could not create {}", full_path.display()))?;
        }
        Err(e) => return Err(e).context("could not stat storage path"),
    }

    Ok(full_path)
}
