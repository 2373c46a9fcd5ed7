//! Remote control over TCP
//!
//! One command per line; every line gets exactly one reply line. Commands
//! are handed to the arbiter loop, which applies them between ticks.

use std::net::SocketAddr;

use dvh_mux::HostCommand;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Longest command line accepted, newline included
const MAX_LINE_LEN: usize = 256;

/// Accept clients until the arbiter loop goes away
pub async fn serve(listener: TcpListener, cmd_tx: mpsc::Sender<HostCommand>) {
    match listener.local_addr() {
        Ok(addr) => info!("Remote control listening on {}", addr),
        Err(e) => warn!("Remote control listening on unknown address: {}", e),
    }

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Remote control accept failed: {}", e);
                continue;
            }
        };
        if cmd_tx.is_closed() {
            break;
        }

        info!("Remote client connected: {}", addr);
        let cmd_tx = cmd_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, addr, cmd_tx).await {
                warn!("Remote client {} error: {}", addr, e);
            }
        });
    }
}

async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    cmd_tx: mpsc::Sender<HostCommand>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = (&mut reader)
            .take(MAX_LINE_LEN as u64)
            .read_line(&mut line)
            .await?;
        if n == 0 {
            debug!("Remote client {} disconnected", addr);
            break;
        }
        if n == MAX_LINE_LEN && !line.ends_with('\n') {
            warn!("Remote client {} sent an overlong line, closing", addr);
            writer.write_all(b"ERR MALFORMED line too long\n").await?;
            writer.flush().await?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let reply = submit(&cmd_tx, trimmed).await;
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

async fn submit(cmd_tx: &mpsc::Sender<HostCommand>, line: &str) -> String {
    let (response, reply) = oneshot::channel();
    let command = HostCommand::Remote {
        line: line.to_string(),
        response,
    };

    if cmd_tx.send(command).await.is_err() {
        return "ERR HALTED host is shutting down".to_string();
    }
    reply
        .await
        .unwrap_or_else(|_| "ERR HALTED host is shutting down".to_string())
}
