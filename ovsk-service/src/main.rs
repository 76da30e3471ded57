//! ovsk daemon
//!
//! Per-node service proxy:
//! - OVSDB session (bridge, controller and tunnel ports)
//! - OpenFlow controller the bridge connects back to
//! - Kubernetes watchers feeding the reconciler

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ovsk_core::config::{self, ProxyConfig, DEFAULT_CONFIG_FILE};
use ovsk_openflow::OpenFlowController;
use ovsk_ovsdb::{OvsdbError, SwitchDriver, SwitchStore};
use ovsk_proxy::{node_ip_for_host, ServiceProxy};

#[derive(Parser, Debug)]
#[command(name = "ovsk-service")]
#[command(about = "Kubernetes service proxy on Open vSwitch")]
struct Args {
    /// Proxy configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// OVSDB Unix socket (overrides the config file)
    #[arg(long)]
    ovsdb_socket: Option<String>,

    /// Node name (defaults to the lowercased hostname)
    #[arg(long)]
    node_name: Option<String>,

    /// OpenFlow listen address (defaults to 0.0.0.0:<ctlrPort>)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from /etc/ovsk/environment (if exists)
    config::load_environment();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ovsk_service=info".parse()?)
                .add_directive("ovsk_proxy=info".parse()?)
                .add_directive("ovsk_openflow=info".parse()?)
                .add_directive("ovsk_ovsdb=info".parse()?)
                .add_directive("kube=warn".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut cfg = ProxyConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?
        .with_env_overrides();
    if let Some(socket) = args.ovsdb_socket {
        cfg.ovsdb_socket = socket;
    }
    if let Some(node) = args.node_name {
        cfg.node_name = Some(node);
    }
    let cfg = cfg.normalized();

    // --- 1. Switch database ---

    let store = SwitchStore::connect(&cfg.ovsdb_socket)
        .await
        .map_err(|e| fatal(e, format!("connecting to OVSDB at {}", cfg.ovsdb_socket)))?;
    store
        .monitor_all()
        .await
        .map_err(|e| fatal(e, "OVSDB monitor".into()))?;
    let store = Arc::new(store);
    let driver = SwitchDriver::new(store.clone(), cfg.ovs_bridge.clone());

    driver
        .create_bridge(&cfg.ovs_bridge)
        .await
        .map_err(|e| fatal(e, format!("creating bridge {}", cfg.ovs_bridge)))?;
    register(
        "controller",
        driver.set_active_controller("127.0.0.1", cfg.ctlr_port).await,
    )?;
    if cfg.mgr_active {
        register(
            "manager",
            driver.set_active_manager(&cfg.manager, cfg.mgr_port).await,
        )?;
    }

    // --- 2. Host identity ---

    let client = kube::Client::try_default()
        .await
        .context("Kubernetes client")?;
    let node_name = match cfg.node_name.clone() {
        Some(name) => name,
        None => gethostname::gethostname()
            .to_string_lossy()
            .to_lowercase(),
    };
    let node_ip = match node_ip_for_host(client.clone(), &node_name).await {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Cannot resolve IP of node {}: {}", node_name, e);
            None
        }
    };
    info!(
        "Node {} ({})",
        node_name,
        node_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "no IP yet".into())
    );

    // --- 3. Controller and watchers ---

    let proxy = Arc::new(ServiceProxy::new(node_name, node_ip, driver));
    let shutdown = CancellationToken::new();

    let listen = args
        .listen
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, cfg.ctlr_port)));
    let controller = Arc::new(OpenFlowController::new(proxy.clone()));
    let controller_task = tokio::spawn(controller.serve(listen, shutdown.clone()));

    let watchers = ovsk_proxy::spawn_all(client, proxy.clone(), shutdown.clone());
    info!("ovsk running, OpenFlow on {}", listen);

    let outcome = tokio::select! {
        _ = store.closed() => Err(fatal(OvsdbError::Disconnected, "OVSDB session".into())),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            if cfg.delete_bridge_on_exit {
                match proxy.driver().delete().await {
                    Ok(()) => info!("Deleted bridge {}", cfg.ovs_bridge),
                    Err(e) => warn!("Failed to delete bridge {}: {}", cfg.ovs_bridge, e),
                }
            }
            Ok(())
        }
    };

    shutdown.cancel();
    for watcher in watchers {
        let _ = watcher.await;
    }
    match controller_task.await {
        Ok(Err(e)) => error!("OpenFlow controller failed: {}", e),
        Err(e) => error!("OpenFlow controller panicked: {}", e),
        Ok(Ok(())) => {}
    }
    outcome
}

/// A target left behind by a previous run is fine
fn register(what: &str, result: ovsk_ovsdb::Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e @ OvsdbError::AlreadyExists { .. }) => {
            warn!("{} already registered: {}", what, e);
            Ok(())
        }
        Err(e) => Err(fatal(e, format!("registering {}", what))),
    }
}

/// Log an OVSDB failure with its operator hint and wrap it for `main`
fn fatal(e: OvsdbError, what: String) -> anyhow::Error {
    match e.suggestion() {
        Some(hint) => error!("{} failed: {} ({})", what, e, hint),
        None => error!("{} failed: {}", what, e),
    }
    anyhow::Error::new(e).context(what)
}
