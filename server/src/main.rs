use shellcache_server::config::{ServerConfig, ShellConfig};
use shellcache_server::offline_cache::fetcher::HttpNetwork;
use shellcache_server::offline_cache::sqlite::SqliteCacheStorage;
use shellcache_server::offline_cache::CacheStorage;
use shellcache_server::{server, NotificationOutbox, ShellState};
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::io;
use std::sync::Arc;
use tower::Service;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shellcache_server=debug".into()),
        )
        .init();

    // STORAGE_DIR structure:
    //   - shellcache.db (SQLite database holding every cache generation)
    let config = ServerConfig::from_env();
    std::fs::create_dir_all(&config.storage_dir)
        .expect("Failed to create storage directory");

    let shell = match &config.shell_config {
        Some(path) => ShellConfig::load(path).expect("Failed to load shell config"),
        None => ShellConfig::default(),
    };

    let storage: Arc<dyn CacheStorage> = Arc::new(
        SqliteCacheStorage::new(config.db_path())
            .expect("Failed to initialize cache storage"),
    );
    let network = Box::new(
        HttpNetwork::new(&config.upstream, Some(concat!("shellcache/", env!("CARGO_PKG_VERSION"))))
            .expect("Failed to initialize network client"),
    );

    let state = Arc::new(ShellState::new(
        storage,
        network,
        shell.push.clone(),
        Arc::new(NotificationOutbox::new()),
    ));

    // A failed install is not fatal: requests pass through until a deploy succeeds
    match state.deploy(shell.cache_config()).await {
        Ok(report) => info!(
            "Generation {} ready with {} precached entries",
            report.install.generation, report.install.entries
        ),
        Err(e) => error!(
            "Initial install of {} failed, retry with POST /__shell/deploy: {}",
            shell.generation, e
        ),
    }

    let app = server::create_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .expect("Failed to bind listener");
    info!("Shellcache listening on http://{} (upstream {})", config.bind, config.upstream);
    info!("Storage directory: {}", config.storage_dir.display());

    // Use hyper's auto-negotiating server to support both HTTP/1.1 and HTTP/2
    let conn_builder = ConnBuilder::new(hyper_util::rt::TokioExecutor::new());

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };
        debug!("New connection from: {}", addr);
        let io = TokioIo::new(stream);
        let app_clone = app.clone();
        let conn_builder = conn_builder.clone();

        tokio::spawn(async move {
            if let Err(err) = conn_builder
                .serve_connection(
                    io,
                    hyper::service::service_fn(move |req| app_clone.clone().call(req)),
                )
                .await
            {
                // Check if the error is an io::Error indicating a normal close
                let is_normal_close = err
                    .source()
                    .and_then(|e| e.downcast_ref::<io::Error>())
                    .map(|io_err| {
                        matches!(
                            io_err.kind(),
                            io::ErrorKind::ConnectionReset
                                | io::ErrorKind::BrokenPipe
                                | io::ErrorKind::UnexpectedEof
                        )
                    })
                    .unwrap_or(false);

                if is_normal_close {
                    debug!("Connection from {} closed normally", addr);
                } else {
                    error!("Error serving connection from {}: {}", addr, err);
                }
            }
        });
    }
}
