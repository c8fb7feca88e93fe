//! Front-end listener
//!
//! Handles the TCP accept loop and spawns a local task per connection.

use std::cell::Cell;
use std::future::Future;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::broker::Broker;
use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;

/// Line-protocol front-end
///
/// Connections run as local tasks, so the server must be driven from
/// inside a `tokio::task::LocalSet`.
pub struct BrokerServer {
    config: ServerConfig,
    broker: Rc<Broker>,
    next_session_id: Cell<u64>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl BrokerServer {
    /// Create a new server with the given configuration and broker
    pub fn new(config: ServerConfig, broker: Rc<Broker>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            broker,
            next_session_id: Cell::new(1),
            connection_semaphore,
        }
    }

    pub fn broker(&self) -> &Rc<Broker> {
        &self.broker
    }

    /// Run the server
    ///
    /// Only returns if binding fails.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Broker listening");

        self.serve(listener).await
    }

    /// Run the server until `shutdown` resolves
    ///
    /// Connections already accepted keep running; call
    /// [`Broker::shutdown`] to release their subscriptions.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Broker listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.get();
        self.next_session_id.set(session_id + 1);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let config = self.config.clone();
        let broker = Rc::clone(&self.broker);

        tokio::task::spawn_local(async move {
            let _permit = permit;
            let mut connection = Connection::new(session_id, socket, peer_addr, config, broker);

            if let Err(e) = connection.run().await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Connection error"
                );
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::task::LocalSet;

    use super::*;
    use crate::device::ManualDriver;
    use crate::event::ValueEvent;

    async fn start(config: ServerConfig, driver: Rc<ManualDriver>) -> (SocketAddr, Rc<Broker>) {
        let broker = Rc::new(Broker::new());
        broker.add_driver("epics", driver).unwrap();

        let server = BrokerServer::new(config, Rc::clone(&broker));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::task::spawn_local(async move {
            let _ = server.serve(listener).await;
        });
        (addr, broker)
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_subscribe_over_tcp() {
        LocalSet::new()
            .run_until(async {
                let driver = Rc::new(ManualDriver::new());
                let (addr, broker) = start(ServerConfig::default(), driver.clone()).await;

                let stream = TcpStream::connect(addr).await.unwrap();
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();

                write.write_all(b"SUB epics:pv?scale=2\n").await.unwrap();
                wait_for(|| driver.connects() == 1).await;

                let publisher = driver.publisher("pv").unwrap();
                publisher.connected();
                publisher.value(ValueEvent::from_number(3.0));

                let line = lines.next_line().await.unwrap().unwrap();
                let reply: Value = serde_json::from_str(&line).unwrap();
                assert_eq!(reply["epics:pv?scale=2"]["value"], 6.0);

                write.write_all(b"BOGUS\r\n").await.unwrap();
                let line = lines.next_line().await.unwrap().unwrap();
                let reply: Value = serde_json::from_str(&line).unwrap();
                assert_eq!(reply["url"], "BOGUS");

                drop(write);
                drop(lines);
                wait_for(|| broker.registry().is_empty()).await;
                wait_for(|| publisher.is_closed()).await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_connection_limit() {
        LocalSet::new()
            .run_until(async {
                let driver = Rc::new(ManualDriver::new());
                let config = ServerConfig::default().max_connections(1);
                let (addr, _broker) = start(config, driver.clone()).await;

                let mut first = TcpStream::connect(addr).await.unwrap();
                first.write_all(b"SUB epics:pv\n").await.unwrap();
                wait_for(|| driver.connects() == 1).await;

                let second = TcpStream::connect(addr).await.unwrap();
                let mut lines = BufReader::new(second).lines();
                assert_eq!(lines.next_line().await.unwrap(), None);
            })
            .await;
    }

    #[tokio::test]
    async fn test_oversized_line_closes_connection() {
        LocalSet::new()
            .run_until(async {
                let driver = Rc::new(ManualDriver::new());
                let config = ServerConfig::default().max_line_length(32);
                let (addr, _broker) = start(config, driver).await;

                let stream = TcpStream::connect(addr).await.unwrap();
                let (read, mut write) = stream.into_split();
                write.write_all(&[b'x'; 64]).await.unwrap();

                let mut lines = BufReader::new(read).lines();
                assert!(!matches!(lines.next_line().await, Ok(Some(_))));
            })
            .await;
    }
}
