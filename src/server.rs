//! TCP front end: one task per connection, every queue command run under
//! the engine lock on the blocking pool.

use std::net::SocketAddr;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::engine::SharedEngine;
use crate::protocol::{Command, NIL, PROTOCOL_VERSION};
use crate::{Error, Result};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 11311;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to listen on; empty means all interfaces.
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    fn listen_addr(&self) -> String {
        let host = if self.address.is_empty() {
            "0.0.0.0"
        } else {
            self.address.as_str()
        };
        format!("{}:{}", host, self.port)
    }
}

pub struct Server {
    listener: TcpListener,
    engine: SharedEngine,
}

impl Server {
    pub async fn bind(config: &ServerConfig, engine: SharedEngine) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        Ok(Self { listener, engine })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    /// Accepts connections until an engine error occurs, then returns it.
    ///
    /// Journal failures leave no state worth serving, so the first one
    /// reported by any connection stops the server.
    pub async fn run(self) -> Result<()> {
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<Error>();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Connected to {peer}");
                        let engine = self.engine.clone();
                        let fatal = fatal_tx.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, &engine).await {
                                error!("Queue failure on connection {peer}: {err}");
                                let _ = fatal.send(err);
                            }
                            info!("Disconnected {peer}");
                        });
                    }
                    Err(err) => warn!("Failed to accept connection: {err}"),
                },
                Some(err) = fatal_rx.recv() => return Err(err),
            }
        }
    }
}

/// Serves one client. Socket errors end the connection quietly; engine
/// errors are returned.
async fn handle_connection(stream: TcpStream, engine: &SharedEngine) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => return Ok(()),
            Ok(_) if !line.ends_with(b"\n") => return Ok(()),
            Ok(_) => {}
            Err(err) => {
                debug!("Read failed: {err}");
                return Ok(());
            }
        }

        let reply = match Command::parse(&line) {
            Command::Quit => return Ok(()),
            Command::Unknown => continue,
            command => respond(engine, command).await?,
        };
        if let Some(reply) = reply {
            if let Err(err) = write_half.write_all(&reply).await {
                debug!("Write failed: {err}");
                return Ok(());
            }
        }
    }
}

async fn respond(engine: &SharedEngine, command: Command) -> Result<Option<Vec<u8>>> {
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || execute(&engine, command)).await?
}

fn execute(engine: &SharedEngine, command: Command) -> Result<Option<Vec<u8>>> {
    let mut reply = match command {
        Command::Enq(data) => {
            engine.enqueue(data)?;
            return Ok(None);
        }
        Command::Deq => engine.dequeue()?.unwrap_or_else(|| NIL.to_vec()),
        Command::Stats => engine.stats()?.to_json().into_bytes(),
        Command::Version => PROTOCOL_VERSION.as_bytes().to_vec(),
        Command::Quit | Command::Unknown => return Ok(None),
    };
    reply.push(b'\n');
    Ok(Some(reply))
}
