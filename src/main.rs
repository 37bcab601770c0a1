use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use warp::Filter;

use randomly::config::Config;
use randomly::server::Server;
use randomly::store::memory::MemoryStore;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let server = Server::new(Arc::new(MemoryStore::new()), config.session_settings());

    let ws_server = server.clone();
    let ws_route = warp::path("ws")
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let server = ws_server.clone();
            ws.on_upgrade(move |socket| async move {
                server.handle_connection(socket).await;
            })
        });

    let static_files = warp::fs::dir(config.public_dir.clone());

    let routes = ws_route
        .or(static_files)
        .with(warp::cors().allow_any_origin());

    let addr = config.addr();
    let tls = match config.tls() {
        Ok(tls) => tls,
        Err(e) => {
            warn!("Failed to load TLS config ({}), falling back to HTTP/WS", e);
            None
        }
    };

    match tls {
        Some(tls) => {
            info!("Starting secure server (HTTPS/WSS) on {}...", addr);
            let (_, serving) = warp::serve(routes)
                .tls()
                .cert_path(&tls.cert)
                .key_path(&tls.key)
                .bind_with_graceful_shutdown(addr, shutdown_signal());
            serving.await;
        }
        None => match warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown_signal()) {
            Ok((bound, serving)) => {
                info!("Server starting on {}...", bound);
                serving.await;
            }
            Err(e) => {
                error!("Failed to bind to {}: {}", addr, e);
                std::process::exit(1);
            }
        },
    }

    server.shutdown().await;
    info!("Server stopped");
}
