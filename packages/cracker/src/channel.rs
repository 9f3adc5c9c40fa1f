//! 带认证的长度分帧消息通道。
//!
//! 线缆格式：u32 小端长度 + `crack-protocol` 编码的报文本体。
//! 连接建立后先走质询应答握手，口令不对的对端在这里就被挡下。

use std::net::SocketAddr;
use std::time::Duration;

use crack_protocol::{Message, auth, parse_body, to_body};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// 单帧上限，抵挡畸形的长度前缀。
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
/// 握手全程的时限。
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("preshared secret authentication failed")]
    AuthFailure,
    #[error("channel closed")]
    Closed,
    #[error("timed out waiting for the peer")]
    Timeout,
    #[error("unexpected message for this stage of the protocol")]
    Protocol,
    #[error("codec error: {0}")]
    Codec(#[source] anyhow::Error),
}

async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin,
{
    let body = to_body(message).map_err(ChannelError::Codec)?;
    let len = u32::try_from(body.len())
        .map_err(|_| ChannelError::Codec(anyhow::anyhow!("frame body too large")))?;
    writer
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|_| ChannelError::Closed)?;
    writer.write_all(&body).await.map_err(|_| ChannelError::Closed)?;
    Ok(())
}

async fn read_frame<R>(reader: &mut R) -> Result<Message, ChannelError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|_| ChannelError::Closed)?;
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::Codec(anyhow::anyhow!(
            "frame of {len} bytes exceeds the limit"
        )));
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|_| ChannelError::Closed)?;
    parse_body(&body).map_err(ChannelError::Codec)
}

/// 双向消息流，工作端整条连接用它收发。
pub struct MsgStream {
    stream: TcpStream,
}

impl MsgStream {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        write_frame(&mut self.stream, message).await
    }

    pub async fn recv(&mut self) -> Result<Message, ChannelError> {
        read_frame(&mut self.stream).await
    }

    /// 拆成独立的读写两半；管理端把读端交给转发任务，写端留在事件循环里。
    pub fn into_split(self) -> (MsgReader, MsgWriter) {
        let (reader, writer) = self.stream.into_split();
        (MsgReader { reader }, MsgWriter { writer })
    }
}

pub struct MsgReader {
    reader: OwnedReadHalf,
}

impl MsgReader {
    pub async fn recv(&mut self) -> Result<Message, ChannelError> {
        read_frame(&mut self.reader).await
    }
}

pub struct MsgWriter {
    writer: OwnedWriteHalf,
}

impl MsgWriter {
    pub async fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        write_frame(&mut self.writer, message).await
    }
}

/// 监听端的握手：下发质询，校验应答，放行或拒绝。
pub async fn server_handshake(chan: &mut MsgStream, secret: &[u8]) -> Result<(), ChannelError> {
    let nonce: [u8; auth::CHALLENGE_LEN] = rand::random();
    chan.send(&Message::AuthChallenge { nonce }).await?;
    match chan.recv().await? {
        Message::AuthDigest { digest } => {
            if auth::verify_digest(secret, &nonce, &digest) {
                chan.send(&Message::AuthOk).await
            } else {
                // 先告知再断开，让对端分得清是口令错还是网络断
                let _ = chan.send(&Message::AuthReject).await;
                Err(ChannelError::AuthFailure)
            }
        }
        _ => Err(ChannelError::Protocol),
    }
}

/// 连接端的握手：应答质询并等待放行。
pub async fn client_handshake(chan: &mut MsgStream, secret: &[u8]) -> Result<(), ChannelError> {
    match chan.recv().await? {
        Message::AuthChallenge { nonce } => {
            let digest = auth::challenge_digest(secret, &nonce);
            chan.send(&Message::AuthDigest { digest }).await?;
            match chan.recv().await? {
                Message::AuthOk => Ok(()),
                Message::AuthReject => Err(ChannelError::AuthFailure),
                _ => Err(ChannelError::Protocol),
            }
        }
        _ => Err(ChannelError::Protocol),
    }
}

/// 管理端的监听套接字，持有预共享口令。
pub struct CrackListener {
    listener: TcpListener,
    secret: Vec<u8>,
}

impl CrackListener {
    pub async fn bind(addr: &str, secret: &[u8]) -> std::io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
            secret: secret.to_vec(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 只做 TCP accept，不含握手；可以安全地放进 `select!` 里被取消。
    pub async fn accept_raw(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    pub fn secret_bytes(&self) -> Vec<u8> {
        self.secret.clone()
    }
}

/// 以工作端身份连接并完成认证。
pub async fn connect(addr: &str, secret: &[u8]) -> Result<MsgStream, ChannelError> {
    let stream = TcpStream::connect(addr).await.map_err(|_| ChannelError::Closed)?;
    let mut chan = MsgStream::new(stream);
    match timeout(HANDSHAKE_TIMEOUT, client_handshake(&mut chan, secret)).await {
        Ok(Ok(())) => Ok(chan),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(ChannelError::Timeout),
    }
}
