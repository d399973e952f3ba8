use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use atelier::{RefreshLimiter, SessionRegistry, UpstreamClient, WorkspaceInspector};
use atelier_gateway::sandbox::{ContainerSandbox, Sandbox, StopGuard};
use atelier_gateway::state::{AppState, proxy_client};
use atelier_gateway::{router, templates};
use clap::Parser;
use parking_lot::Mutex;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Bounded drain on shutdown; SSE connections outlive any drain, so the
/// race against this timeout is what actually ends the process.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the gateway to
    #[arg(long, env = "ATELIER_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,
    /// Base URL of the upstream agent control plane
    #[arg(long, env = "ATELIER_UPSTREAM", default_value = "http://127.0.0.1:4096")]
    upstream: String,
    /// Sandbox container name (used for archive and stop)
    #[arg(long, env = "ATELIER_CONTAINER", default_value = "atelier-sandbox")]
    container: String,
    /// Network address of the sandbox container
    #[arg(long, env = "ATELIER_SANDBOX_HOST", default_value = "127.0.0.1")]
    sandbox_host: String,
    /// Port of the terminal server inside the sandbox
    #[arg(long, env = "ATELIER_TERMINAL_PORT", default_value_t = 7681)]
    terminal_port: u16,
    /// Minimum interval between code-updates frames, in milliseconds
    #[arg(long, env = "ATELIER_REFRESH_MS", default_value_t = 3000)]
    refresh_ms: u64,
    /// Directory served under /static
    #[arg(long, env = "ATELIER_STATIC_DIR", default_value = "static")]
    static_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("atelier_gateway=info,atelier=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();
    info!(addr = %args.addr, upstream = %args.upstream, container = %args.container, "starting gateway");

    let upstream =
        Arc::new(UpstreamClient::new(&args.upstream).context("invalid upstream base url")?);

    let providers = upstream
        .providers()
        .await
        .context("failed to fetch providers from upstream")?;
    info!(providers = providers.providers.len(), "loaded provider list");

    // The workspace session exists for the whole process lifetime and is
    // used only for introspection shell commands.
    let workspace_session = upstream
        .create_session()
        .await
        .context("failed to create workspace session")?;
    info!(session_id = %workspace_session, "created workspace session");

    let gateway_port = args
        .addr
        .rsplit(':')
        .next()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(0);
    let upstream_port = url::Url::parse(&args.upstream)
        .ok()
        .and_then(|u| u.port_or_known_default())
        .unwrap_or(0);
    let denied_ports = [gateway_port, upstream_port, args.terminal_port];

    let sandbox = Arc::new(ContainerSandbox::new(
        args.container.clone(),
        args.sandbox_host.clone(),
        args.terminal_port,
    ));
    let stop_guard = StopGuard::new(args.container.clone());

    let state = AppState {
        registry: Arc::new(SessionRegistry::new(upstream.clone())),
        inspector: Arc::new(WorkspaceInspector::new(
            upstream.clone(),
            workspace_session.clone(),
            denied_ports,
        )),
        limiter: Arc::new(RefreshLimiter::new(Duration::from_millis(args.refresh_ms))),
        providers: Arc::new(providers),
        templates: Arc::new(templates::build_environment().context("invalid template set")?),
        selected_files: Arc::new(Mutex::new(HashMap::new())),
        sandbox: sandbox.clone(),
        proxy_client: proxy_client(),
        upstream,
        workspace_session,
    };

    let app = router(state, &args.static_dir);
    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("failed to bind {}", args.addr))?;
    info!("gateway listening on http://{}", args.addr);

    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = drain_rx.await;
            })
            .await
    });

    tokio::select! {
        result = &mut server => {
            sandbox.stop().await;
            stop_guard.disarm();
            return result.context("server task panicked")?.context("server failed");
        }
        _ = shutdown_signal() => {}
    }

    let _ = drain_tx.send(());
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut server).await.is_err() {
        warn!("drain timed out; aborting open connections");
        server.abort();
    }

    sandbox.stop().await;
    stop_guard.disarm();
    info!("shutdown complete");
    Ok(())
}

/// Resolve on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("received SIGTERM, initiating graceful shutdown"),
    }
}
