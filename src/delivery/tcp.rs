//! TCP 传输 - 每行一个 JSON 帧
//!
//! 帧格式：
//! - client `{"type":"auth","token":"..."}`, answered by `{"type":"auth_ok"}`
//!   or `{"type":"auth_error","message":"..."}`
//! - client `{"type":"event","event":"service_status","data":{...}}`
//! - anything else from the collector is logged and ignored

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use super::transport::{ConnectionListener, Transport};
use crate::error::{MonitorError, Result};

const MAX_FRAME_LENGTH: usize = 64 * 1024;

type LineFramed = Framed<TcpStream, LinesCodec>;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Auth {
        token: &'a str,
    },
    Event {
        event: &'a str,
        data: serde_json::Value,
    },
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    AuthOk,
    AuthError {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

struct Session {
    sink: SplitSink<LineFramed, String>,
    reader: JoinHandle<()>,
    listener: Arc<dyn ConnectionListener>,
}

/// TCP collector transport
pub struct TcpTransport {
    handshake_timeout: Duration,
    /// 单帧写入上限，超时视为连接已断
    write_timeout: Duration,
    session: Mutex<Option<Session>>,
}

impl TcpTransport {
    /// Writes are bounded by `handshake_timeout` until `with_write_timeout` says otherwise
    pub fn new(handshake_timeout: Duration) -> Self {
        Self {
            handshake_timeout,
            write_timeout: handshake_timeout,
            session: Mutex::new(None),
        }
    }

    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    async fn handshake(&self, addr: &str, credential: &str) -> Result<LineFramed> {
        let stream = timeout(self.handshake_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| MonitorError::Transport(format!("connect to {} timed out", addr)))?
            .map_err(|e| MonitorError::Transport(format!("connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH));
        let auth = serde_json::to_string(&ClientFrame::Auth { token: credential })?;
        framed
            .send(auth)
            .await
            .map_err(|e| MonitorError::Transport(format!("send auth: {}", e)))?;

        let reply = timeout(self.handshake_timeout, framed.next())
            .await
            .map_err(|_| MonitorError::Transport("auth reply timed out".to_string()))?;

        match reply {
            Some(Ok(line)) => match serde_json::from_str::<ServerFrame>(&line) {
                Ok(ServerFrame::AuthOk) => Ok(framed),
                Ok(ServerFrame::AuthError { message }) => Err(MonitorError::Authentication(message)),
                Ok(ServerFrame::Other) => Err(MonitorError::Transport(format!(
                    "unexpected reply to auth: {}",
                    line
                ))),
                Err(e) => Err(MonitorError::Transport(format!("malformed auth reply: {}", e))),
            },
            Some(Err(e)) => Err(MonitorError::Transport(format!("read auth reply: {}", e))),
            None => Err(MonitorError::Transport(
                "collector closed connection during auth".to_string(),
            )),
        }
    }
}

/// Parse `tcp://host:port` or bare `host:port`
pub fn socket_addr_from_url(url: &str) -> Result<&str> {
    let addr = match url.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(MonitorError::Config(format!(
                "unsupported collector scheme: {}",
                scheme
            )))
        }
        None => url,
    };
    let addr = addr.trim_end_matches('/');
    if addr.is_empty() || !addr.contains(':') {
        return Err(MonitorError::Config(format!(
            "collector url needs host:port: {}",
            url
        )));
    }
    Ok(addr)
}

async fn read_until_closed(
    mut stream: SplitStream<LineFramed>,
    listener: Arc<dyn ConnectionListener>,
) {
    loop {
        match stream.next().await {
            Some(Ok(line)) => debug!(frame = %line, "Collector frame ignored"),
            Some(Err(e)) => {
                listener.on_disconnect(&e.to_string());
                return;
            }
            None => {
                listener.on_disconnect("closed by collector");
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(
        &self,
        url: &str,
        credential: &str,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<()> {
        let addr = socket_addr_from_url(url)?;
        let framed = self.handshake(addr, credential).await?;
        let (sink, stream) = framed.split();

        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            // Old reader must not report on the new connection
            old.reader.abort();
        }

        info!(addr = %addr, "Connected to collector");
        // Before the reader starts, so an early hang-up always lands last
        listener.on_connect();
        let reader = tokio::spawn(read_until_closed(stream, Arc::clone(&listener)));
        *session = Some(Session {
            sink,
            reader,
            listener,
        });
        Ok(())
    }

    async fn emit(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        let frame = serde_json::to_string(&ClientFrame::Event {
            event,
            data: payload,
        })?;

        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| MonitorError::Transport("not connected".to_string()))?;

        let failure = match timeout(self.write_timeout, session.sink.send(frame)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            // Collector stopped reading or the peer is half-open
            Err(_) => format!("write timed out after {}ms", self.write_timeout.as_millis()),
        };

        warn!(error = %failure, "Write to collector failed, dropping connection");
        if let Some(dead) = guard.take() {
            dead.reader.abort();
            dead.listener.on_disconnect(&failure);
        }
        Err(MonitorError::Transport(format!("emit {}: {}", event, failure)))
    }

    async fn close(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };
        session.reader.abort();
        if let Err(e) = session.sink.close().await {
            debug!(error = %e, "Error closing collector connection");
        }
        session.listener.on_disconnect("closed locally");
    }
}
