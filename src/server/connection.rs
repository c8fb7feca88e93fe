//! Per-connection handler
//!
//! Reads newline-terminated requests into a [`ClientSession`] and writes the
//! session's reply lines back to the socket. When the peer goes away, or the
//! connection fails, every subscription the session holds is released.

use std::net::SocketAddr;
use std::rc::Rc;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::broker::Broker;
use crate::error::{Error, Result};
use crate::server::config::ServerConfig;
use crate::session::{ClientSession, SessionContext};

/// Split the next complete line off the front of `buf`
pub(crate) fn next_line(buf: &mut BytesMut) -> Option<String> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let line = buf.split_to(pos + 1);
    Some(String::from_utf8_lossy(&line[..pos]).into_owned())
}

pub struct Connection {
    context: SessionContext,
    socket: TcpStream,
    config: ServerConfig,
    broker: Rc<Broker>,
}

impl Connection {
    pub fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: ServerConfig,
        broker: Rc<Broker>,
    ) -> Self {
        Self {
            context: SessionContext::new(session_id, peer_addr),
            socket,
            config,
            broker,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Serve the connection until the peer closes it or an error occurs
    pub async fn run(&mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = ClientSession::new(self.context.session_id, Rc::clone(&self.broker), tx);

        let result = self.serve(&mut session, &mut rx).await;
        session.close();

        let stats = &self.context.stats;
        tracing::debug!(
            session_id = self.context.session_id,
            requests = stats.requests,
            rejected = stats.rejected,
            lines_sent = stats.lines_sent,
            duration_ms = self.context.duration().as_millis() as u64,
            "Session finished"
        );

        result
    }

    async fn serve(
        &mut self,
        session: &mut ClientSession,
        rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> Result<()> {
        let max_line_length = self.config.max_line_length;
        let stats = &mut self.context.stats;
        let (mut reader, mut writer) = self.socket.split();
        let mut buf = BytesMut::with_capacity(self.config.read_buffer_size);

        loop {
            tokio::select! {
                read = reader.read_buf(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(());
                    }
                    stats.bytes_received += n as u64;

                    while let Some(line) = next_line(&mut buf) {
                        stats.requests += 1;
                        if session.handle_line(&line).is_err() {
                            stats.rejected += 1;
                        }
                    }

                    if buf.len() > max_line_length {
                        return Err(Error::Protocol(format!(
                            "request line longer than {} bytes",
                            max_line_length
                        )));
                    }
                }
                Some(line) = rx.recv() => {
                    let mut out = BytesMut::with_capacity(line.len() + 1);
                    let mut next = Some(line);
                    while let Some(line) = next.take().or_else(|| rx.try_recv().ok()) {
                        out.extend_from_slice(line.as_bytes());
                        out.put_u8(b'\n');
                        stats.record_line(line.len());
                    }
                    writer.write_all(&out).await?;
                }
            }
        }
    }
}
