//! In-process SOCKS5 proxy and destination servers for end-to-end tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn tcp_listener_or_skip() -> Option<TcpListener> {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => Some(listener),
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => None,
        Err(err) => panic!("Failed to bind TCP listener for test: {err}"),
    }
}

/// Minimal SOCKS5 server: method negotiation, RFC 1929 auth, CONNECT.
pub struct MockSocks5 {
    pub addr: SocketAddr,
    /// Connections that reached method negotiation.
    pub handshakes: Arc<AtomicUsize>,
    /// Successful CONNECT requests.
    pub connects: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockSocks5 {
    /// Start the mock. `credentials` of `None` means no authentication.
    pub async fn spawn(credentials: Option<(&str, &str)>) -> Option<Self> {
        let listener = tcp_listener_or_skip().await?;
        let addr = listener.local_addr().unwrap();
        let credentials: Option<Arc<(String, String)>> =
            credentials.map(|(u, p)| Arc::new((u.to_string(), p.to_string())));
        let handshakes = Arc::new(AtomicUsize::new(0));
        let connects = Arc::new(AtomicUsize::new(0));

        let task = {
            let handshakes = Arc::clone(&handshakes);
            let connects = Arc::clone(&connects);
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    let credentials = credentials.clone();
                    let handshakes = Arc::clone(&handshakes);
                    let connects = Arc::clone(&connects);
                    tokio::spawn(async move {
                        let _ = serve(socket, credentials, handshakes, connects).await;
                    });
                }
            })
        };

        Some(Self {
            addr,
            handshakes,
            connects,
            task,
        })
    }

    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Drop for MockSocks5 {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    credentials: Option<Arc<(String, String)>>,
    handshakes: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    // Greeting: VER NMETHODS METHODS...
    let mut header = [0u8; 2];
    socket.read_exact(&mut header).await?;
    let mut methods = vec![0u8; header[1] as usize];
    socket.read_exact(&mut methods).await?;
    handshakes.fetch_add(1, Ordering::SeqCst);

    let wanted = if credentials.is_some() { 0x02 } else { 0x00 };
    if header[0] != 0x05 || !methods.contains(&wanted) {
        socket.write_all(&[0x05, 0xFF]).await?;
        return Ok(());
    }
    socket.write_all(&[0x05, wanted]).await?;

    if let Some(expected) = credentials {
        // RFC 1929: VER ULEN UNAME PLEN PASSWD
        let mut ver_len = [0u8; 2];
        socket.read_exact(&mut ver_len).await?;
        let mut username = vec![0u8; ver_len[1] as usize];
        socket.read_exact(&mut username).await?;
        let mut plen = [0u8; 1];
        socket.read_exact(&mut plen).await?;
        let mut password = vec![0u8; plen[0] as usize];
        socket.read_exact(&mut password).await?;

        if username != expected.0.as_bytes() || password != expected.1.as_bytes() {
            socket.write_all(&[0x01, 0x01]).await?;
            return Ok(());
        }
        socket.write_all(&[0x01, 0x00]).await?;
    }

    // Request: VER CMD RSV ATYP DST.ADDR DST.PORT
    let mut request = [0u8; 4];
    socket.read_exact(&mut request).await?;
    let host = match request[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            socket.read_exact(&mut ip).await?;
            std::net::Ipv4Addr::from(ip).to_string()
        }
        0x03 => {
            let mut len = [0u8; 1];
            socket.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            socket.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        0x04 => {
            let mut ip = [0u8; 16];
            socket.read_exact(&mut ip).await?;
            format!("[{}]", std::net::Ipv6Addr::from(ip))
        }
        _ => {
            socket.write_all(&[0x05, 0x08, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await?;
            return Ok(());
        }
    };
    let mut port = [0u8; 2];
    socket.read_exact(&mut port).await?;
    let target = format!("{host}:{}", u16::from_be_bytes(port));

    let mut upstream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(_) => {
            socket.write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await?;
            return Ok(());
        }
    };
    connects.fetch_add(1, Ordering::SeqCst);
    socket.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await?;

    tokio::io::copy_bidirectional(&mut socket, &mut upstream).await?;
    Ok(())
}

/// Destination server that runs `handler` for every accepted connection.
pub struct Destination {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Destination {
    pub async fn spawn<F, Fut>(handler: F) -> Option<Self>
    where
        F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tcp_listener_or_skip().await?;
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(handler(socket));
            }
        });
        Some(Self { addr, task })
    }

    /// Echo every byte back until the peer closes.
    pub async fn echo() -> Option<Self> {
        Self::spawn(|mut socket| async move {
            let (mut reader, mut writer) = socket.split();
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        })
        .await
    }
}

impl Drop for Destination {
    fn drop(&mut self) {
        self.task.abort();
    }
}
