//! TCP accept loop: binds the listening socket with an explicit backlog
//! and `SO_REUSEADDR`, then hands each accepted connection to the
//! [`Engine`] on its own task.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};

use crate::config::LISTEN_BACKLOG;
use crate::engine::Engine;

pub async fn bind(listen_port: u16) -> anyhow::Result<TcpListener> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], listen_port));
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

/// Runs the accept loop until the listener itself fails (never, in
/// practice, short of resource exhaustion). A single connection's accept
/// error is logged and does not bring down the listener.
pub async fn serve(listener: TcpListener, engine: Arc<Engine>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    engine.handle_connection(stream, peer).await;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}
