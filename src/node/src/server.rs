//! Newline-delimited TCP command server
//!
//! One task per connection. Each line is executed to completion before its
//! response is written, so a client that goes away can only lose the reply.

use crate::command::CommandError;
use crate::processor::CommandProcessor;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Framed};
use tracing::{debug, error, info, warn};

/// Per-connection limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    pub max_line_length: usize,
    pub idle_timeout: Duration,
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            max_line_length: 8192,
            idle_timeout: Duration::from_secs(30),
            max_connections: 1024,
        }
    }
}

pub struct LedgerServer {
    listener: TcpListener,
    processor: Arc<CommandProcessor>,
    settings: ServerSettings,
}

impl LedgerServer {
    pub async fn bind(addr: SocketAddr, processor: CommandProcessor, settings: ServerSettings) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(LedgerServer {
            listener,
            processor: Arc::new(processor),
            settings,
        })
    }

    /// Bound address; useful when binding port 0
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = self.local_addr()?;
        info!(addr = %local, "ledger server listening");

        let slots = Arc::new(Semaphore::new(self.settings.max_connections));
        tokio::pin!(shutdown);

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (socket, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "failed to accept connection");
                        continue;
                    }
                },
            };

            if let Some(metrics) = self.processor.metrics() {
                metrics.record_connection();
            }

            let processor = self.processor.clone();
            let settings = self.settings;
            tokio::spawn(async move {
                debug!(%peer, "client connected");
                if let Err(err) = handle_connection(socket, peer, processor, settings).await {
                    error!(%peer, error = %err, "connection error");
                }
                debug!(%peer, "client disconnected");
                drop(permit);
            });
        }

        info!(addr = %local, "ledger server stopped");
        Ok(())
    }
}

async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    processor: Arc<CommandProcessor>,
    settings: ServerSettings,
) -> Result<(), AnyDelimiterCodecError> {
    // Frames are raw bytes so a line that is not UTF-8 costs only that line
    let codec = AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), settings.max_line_length);
    let mut framed = Framed::new(socket, codec);

    loop {
        let next = match timeout(settings.idle_timeout, framed.next()).await {
            Ok(Some(next)) => next,
            Ok(None) => break,
            Err(_) => {
                debug!(%peer, "idle timeout");
                break;
            }
        };

        match next {
            Ok(frame) => {
                let response = match std::str::from_utf8(&frame) {
                    Ok(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        processor.execute(line)
                    }
                    Err(_) => {
                        debug!(%peer, "line is not valid UTF-8");
                        processor.failure(&CommandError::BadArguments("line is not valid UTF-8".to_string()))
                    }
                };
                framed.send(response).await?;
            }
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                let err = CommandError::BadArguments(format!(
                    "line exceeds {} bytes",
                    settings.max_line_length
                ));
                framed.send(processor.failure(&err)).await?;
                break;
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}
