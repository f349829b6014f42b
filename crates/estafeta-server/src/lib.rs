//! The estafeta gRPC server: binds the queue manager to a loopback
//! tonic endpoint with allow/deny access control.

mod acl;
mod error;
mod service;

use std::net::SocketAddr;
use std::sync::Arc;

use estafeta_core::{BrokerConfig, DiskStore, Manager, ManagerConfig, MessageStore, StoreConfig};
use estafeta_proto::broker_server::BrokerServer;
use tonic::transport::Server;
use tonic::{Request, Status};
use tracing::{info, warn};

pub use acl::Acl;
use service::BrokerService;

/// Run the server until a shutdown signal (SIGINT/SIGTERM or the
/// `Stop` RPC) arrives, then stop the process-wide manager.
pub async fn run(config: BrokerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn MessageStore> = match config.store {
        StoreConfig::Disk { path, fsync } => Arc::new(DiskStore::new(path, fsync)),
        StoreConfig::Mysql { .. } => {
            return Err("the mysql store backend is provided by a separate crate".into());
        }
    };

    let manager = Manager::start(store, ManagerConfig::default())?;

    let acl = Arc::new(Acl::parse(&config.rpc.acl)?);
    let addr = SocketAddr::from(([127, 0, 0, 1], config.rpc.port));

    let (stop_tx, stop_rx) = tokio::sync::mpsc::channel::<()>(1);
    let broker = BrokerService::new(Arc::clone(&manager), stop_tx);

    info!(%addr, "starting gRPC server");

    let serve = Server::builder()
        .add_service(BrokerServer::with_interceptor(
            broker,
            move |request: Request<()>| check_acl(&acl, request),
        ))
        .serve_with_shutdown(addr, shutdown_signal(stop_rx));

    let result = serve.await;

    info!("gRPC server stopped, shutting down queue manager");
    if let Err(err) = Manager::stop() {
        warn!(error = %err, "manager was not running at server shutdown");
    }

    result?;
    Ok(())
}

fn check_acl(acl: &Acl, request: Request<()>) -> Result<Request<()>, Status> {
    match request.remote_addr() {
        Some(peer) if !acl.permits(peer.ip()) => {
            warn!(%peer, "connection rejected by acl");
            Err(Status::permission_denied("address rejected by acl"))
        }
        // In-process transports carry no peer address; the ACL only
        // guards the network surface.
        _ => Ok(request),
    }
}

async fn shutdown_signal(mut stop: tokio::sync::mpsc::Receiver<()>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
            _ = stop.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = ctrl_c => {},
            _ = stop.recv() => {},
        }
    }

    info!("received shutdown signal");
}
