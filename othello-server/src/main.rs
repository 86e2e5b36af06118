use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use othello_server::{Coordinator, MemoryStore, ServerConfig, SessionStore};
use protocol::{Connection, Listener, TcpListener};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("othello_server=debug".parse()?))
        .init();

    info!("黑白棋服务端启动中...");

    let config = ServerConfig::load()?;
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(config.clone(), store);
    coordinator.recover_orphans().await?;

    let mut listener = TcpListener::bind(&config.bind_addr()).await?;
    info!(addr = ?listener.local_addr(), ?config, "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => {
                    info!(peer = ?conn.peer_addr(), "connection accepted");
                    let (reader, writer) = conn.split();
                    tokio::spawn(coordinator.clone().serve(reader, writer));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}
