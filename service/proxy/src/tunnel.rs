//! Full-duplex byte relay between the client and an upstream socket, used
//! once a `CONNECT` tunnel is established. No interpretation of contents;
//! no buffering across iterations; bytes from one direction are written to
//! the peer in the order received.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

const FRAME_SIZE: usize = 8 * 1024;

/// Relays bytes between `client` and `upstream` until either side reports
/// EOF (a zero-length read) or an I/O error. Closes `upstream` on exit; the
/// caller remains responsible for the client socket's lifetime.
#[instrument(skip(client, upstream))]
pub async fn tunnel(client: &mut TcpStream, mut upstream: TcpStream) {
    let (mut client_rd, mut client_wr) = client.split();
    let (mut upstream_rd, mut upstream_wr) = upstream.split();

    let mut client_buf = [0u8; FRAME_SIZE];
    let mut upstream_buf = [0u8; FRAME_SIZE];

    loop {
        tokio::select! {
            result = client_rd.read(&mut client_buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if upstream_wr.write_all(&client_buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
            result = upstream_rd.read(&mut upstream_buf) => {
                match result {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if client_wr.write_all(&upstream_buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    let _ = upstream_wr.shutdown().await;
}
