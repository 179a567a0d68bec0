//! Device model server binary: loads a device description, bootstraps a
//! `DeviceRegistry`, and serves `dm-grpc`'s tonic service and `dm-http`'s
//! axum router side by side against the same registry.
//!
//! Tracing is `RUST_LOG`-driven through an `EnvFilter`, falling back to
//! `info` when unset.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dm_core::config::{load_devices, ServerConfig};
use dm_core::events::DeviceEvent;
use dm_core::DeviceRegistry;
use dm_grpc::DeviceModelService;
use dm_http::AppState;
use dm_proto::device_service_server::DeviceServiceServer;

#[derive(Parser, Debug)]
#[command(name = "dm-server", about = "Device model gRPC+HTTP server")]
struct Cli {
    /// Path to the TOML device description (`[[device]]` tables). Falls
    /// back to a bundled single-device example when omitted, so the server
    /// has something to serve with zero configuration.
    #[arg(long)]
    device_description: Option<PathBuf>,

    /// Path to an optional server config TOML (grpc/http addrs, asset root).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    grpc_addr: Option<String>,

    #[arg(long)]
    http_addr: Option<String>,

    #[arg(long)]
    authz_disabled: bool,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".parse().unwrap()))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();

    let config_contents = match &cli.config {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => String::new(),
    };
    let mut config = ServerConfig::load_from_str(&config_contents)?;
    if let Some(addr) = cli.grpc_addr {
        config.grpc_addr = addr;
    }
    if let Some(addr) = cli.http_addr {
        config.http_addr = addr;
    }
    if cli.authz_disabled {
        config.authz_disabled = true;
    }

    const BUNDLED_DEVICE_DESCRIPTION: &str =
        include_str!("../resources/example_device.toml");

    let device_description = match &cli.device_description {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => {
            tracing::info!("no --device-description given, serving the bundled example device");
            BUNDLED_DEVICE_DESCRIPTION.to_string()
        }
    };
    let devices = load_devices(&device_description)?;

    let registry = Arc::new(DeviceRegistry::new());
    for device in devices {
        tracing::info!(slot = device.slot, "registering device");
        registry.insert(device.slot, Arc::new(device));
    }

    let grpc_addr: SocketAddr = config.grpc_addr.parse()?;
    let http_addr: SocketAddr = config.http_addr.parse()?;

    let grpc_service = DeviceModelService::new(registry.clone(), config.authz_disabled);
    let grpc_server = tonic::transport::Server::builder()
        .add_service(DeviceServiceServer::new(grpc_service))
        .serve(grpc_addr);

    let http_state = AppState {
        registry: registry.clone(),
        authz_disabled: config.authz_disabled,
        asset_root: PathBuf::from(&config.asset_root),
    };
    let http_router = dm_http::build_router(http_state);
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(
        http_listener,
        http_router.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tracing::info!(%grpc_addr, %http_addr, "device model server starting");

    let shutdown_registry = registry.clone();
    tokio::select! {
        result = grpc_server => {
            if let Err(err) = result {
                tracing::error!(%err, "gRPC server exited with an error");
            }
        }
        result = http_server => {
            if let Err(err) = result {
                tracing::error!(%err, "HTTP server exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    for slot in shutdown_registry.populated_slots() {
        if let Ok(device) = shutdown_registry.get(slot) {
            device.events.publish(DeviceEvent::Shutdown);
        }
    }

    Ok(())
}
