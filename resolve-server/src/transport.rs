//! Real socket transport for [`resolve_engine::Upstream`] (spec §4.6): one
//! fire-and-forget UDP datagram per call, or a length-prefixed TCP stream
//! when `tcp` is set. The [`crate::OutboundMultiplexer`]-equivalent retry
//! and timeout policy lives in `resolve-engine`; this type only knows how
//! to move bytes.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use resolve_engine::{Upstream, UpstreamError};

pub struct SocketUpstream {
    pub per_call_timeout: Duration,
}

impl SocketUpstream {
    pub fn new(per_call_timeout: Duration) -> Self {
        Self { per_call_timeout }
    }

    async fn send_udp(&self, target: SocketAddr, message: Message) -> Result<Message, UpstreamError> {
        let local: SocketAddr = if target.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" }
            .parse()
            .expect("static bind address");
        let socket = UdpSocket::bind(local).await.map_err(|e| UpstreamError::Io(e.to_string()))?;
        socket.connect(target).await.map_err(|e| UpstreamError::Io(e.to_string()))?;

        let wire = message.to_vec().map_err(|e| UpstreamError::Io(e.to_string()))?;
        timeout(self.per_call_timeout, socket.send(&wire)).await.map_err(|_| UpstreamError::Timeout)?.map_err(|e| UpstreamError::Io(e.to_string()))?;

        let mut buf = vec![0u8; 4096];
        let n = timeout(self.per_call_timeout, socket.recv(&mut buf)).await.map_err(|_| UpstreamError::Timeout)?.map_err(|e| UpstreamError::Io(e.to_string()))?;
        Message::from_vec(&buf[..n]).map_err(|e| UpstreamError::Io(e.to_string()))
    }

    async fn send_tcp(&self, target: SocketAddr, message: Message) -> Result<Message, UpstreamError> {
        let mut stream = timeout(self.per_call_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(|e| UpstreamError::Io(e.to_string()))?;

        let wire = message.to_vec().map_err(|e| UpstreamError::Io(e.to_string()))?;
        let len = u16::try_from(wire.len()).map_err(|_| UpstreamError::Io("message too large for TCP framing".into()))?;

        let write = async {
            stream.write_all(&len.to_be_bytes()).await?;
            stream.write_all(&wire).await
        };
        timeout(self.per_call_timeout, write).await.map_err(|_| UpstreamError::Timeout)?.map_err(|e| UpstreamError::Io(e.to_string()))?;

        let mut len_buf = [0u8; 2];
        timeout(self.per_call_timeout, stream.read_exact(&mut len_buf)).await.map_err(|_| UpstreamError::Timeout)?.map_err(|e| UpstreamError::Io(e.to_string()))?;
        let reply_len = u16::from_be_bytes(len_buf) as usize;

        let mut reply_buf = vec![0u8; reply_len];
        timeout(self.per_call_timeout, stream.read_exact(&mut reply_buf)).await.map_err(|_| UpstreamError::Timeout)?.map_err(|e| UpstreamError::Io(e.to_string()))?;

        Message::from_vec(&reply_buf).map_err(|e| UpstreamError::Io(e.to_string()))
    }
}

#[async_trait]
impl Upstream for SocketUpstream {
    async fn send(&self, target: SocketAddr, message: Message, tcp: bool) -> Result<Message, UpstreamError> {
        if tcp {
            self.send_tcp(target, message).await
        } else {
            self.send_udp(target, message).await
        }
    }
}
