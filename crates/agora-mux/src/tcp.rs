//! TCP transport with length-prefixed frames.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes. The
//! first frame a client sends is its agent address; every later frame in
//! either direction is an encoded [`Envelope`]. A server keeps one writer per
//! announced client address and routes outbound envelopes by `to`.

use crate::connection::{Connection, ConnectionState, EnvelopeStream, StateCell};
use crate::error::ConnectionError;
use agora_types::config::{TcpConfig, TcpMode};
use agora_types::{Address, ConnectionId, Envelope};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Maximum single frame size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

const INBOUND_CAPACITY: usize = 1024;

type Inbound = mpsc::Sender<Result<Envelope, ConnectionError>>;
type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

/// Write one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), ConnectionError> {
    let size = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    if size > MAX_FRAME_SIZE {
        return Err(ConnectionError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }
    writer.write_all(&size.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. A clean EOF before the header is
/// reported as [`ConnectionError::Closed`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ConnectionError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ConnectionError::Closed);
        }
        Err(e) => return Err(ConnectionError::Io(e)),
    }

    let size = u32::from_be_bytes(header);
    if size > MAX_FRAME_SIZE {
        return Err(ConnectionError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; size as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// A TCP link in server or client mode.
pub struct TcpConnection {
    id: ConnectionId,
    address: Address,
    mode: TcpMode,
    remote: SocketAddr,
    state: StateCell,
    local_addr: StdMutex<Option<SocketAddr>>,
    /// Server mode: writers keyed by the address each client announced.
    peers: Arc<DashMap<Address, SharedWriter>>,
    /// Client mode: the writer towards the server.
    upstream: Mutex<Option<OwnedWriteHalf>>,
    shutdown: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl TcpConnection {
    pub fn new(address: Address, config: &TcpConfig) -> Self {
        let (shutdown, _) = watch::channel(true);
        Self {
            id: ConnectionId::new("tcp"),
            address,
            mode: config.mode,
            remote: config.address,
            state: StateCell::new(),
            local_addr: StdMutex::new(None),
            peers: Arc::new(DashMap::new()),
            upstream: Mutex::new(None),
            shutdown,
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Listen on `bind` and accept clients.
    pub fn server(address: impl Into<Address>, bind: SocketAddr) -> Self {
        Self::new(
            address.into(),
            &TcpConfig {
                mode: TcpMode::Server,
                address: bind,
            },
        )
    }

    /// Connect to the server at `remote`.
    pub fn client(address: impl Into<Address>, remote: SocketAddr) -> Self {
        Self::new(
            address.into(),
            &TcpConfig {
                mode: TcpMode::Client,
                address: remote,
            },
        )
    }

    pub fn with_id(mut self, id: ConnectionId) -> Self {
        self.id = id;
        self
    }

    pub fn mode(&self) -> TcpMode {
        self.mode
    }

    /// The bound listener address once a server is connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Client addresses a server currently has a link to.
    pub fn peers(&self) -> Vec<Address> {
        self.peers.iter().map(|e| e.key().clone()).collect()
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    async fn start_server(&self, inbound: Inbound) -> Result<(), ConnectionError> {
        let listener = TcpListener::bind(self.remote).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(local_addr);
        info!(address = %self.address, listen = %local_addr, "TCP server listening");

        let peers = self.peers.clone();
        let shutdown = self.shutdown.subscribe();
        self.track(tokio::spawn(accept_loop(listener, peers, inbound, shutdown)));
        Ok(())
    }

    async fn start_client(&self, inbound: Inbound) -> Result<(), ConnectionError> {
        let stream = TcpStream::connect(self.remote).await?;
        let (reader, mut writer) = stream.into_split();
        write_frame(&mut writer, self.address.as_str().as_bytes())
            .await
            .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        *self.upstream.lock().await = Some(writer);
        info!(address = %self.address, server = %self.remote, "TCP client connected");

        let shutdown = self.shutdown.subscribe();
        let peer = self.remote.to_string();
        self.track(tokio::spawn(read_loop(peer, reader, inbound, shutdown)));
        Ok(())
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("mode", &self.mode)
            .field("remote", &self.remote)
            .field("state", &self.state.get())
            .finish()
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    async fn connect(&self) -> Result<EnvelopeStream, ConnectionError> {
        if !self
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            return Err(ConnectionError::AlreadyConnected(self.id.clone()));
        }
        self.shutdown.send_replace(false);

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let started = match self.mode {
            TcpMode::Server => self.start_server(tx).await,
            TcpMode::Client => self.start_client(tx).await,
        };
        if let Err(e) = started {
            self.shutdown.send_replace(true);
            self.state.set(ConnectionState::Disconnected);
            return Err(e);
        }
        self.state.set(ConnectionState::Connected);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        if self.state.get() == ConnectionState::Disconnected {
            return Ok(());
        }
        self.state.set(ConnectionState::Disconnecting);
        self.shutdown.send_replace(true);

        let handles: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(mut writer) = self.upstream.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.peers.clear();
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.state.set(ConnectionState::Disconnected);
        info!(address = %self.address, "TCP connection closed");
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected(self.id.clone()));
        }
        let frame = envelope.encode();
        match self.mode {
            TcpMode::Client => {
                let mut upstream = self.upstream.lock().await;
                let writer = upstream.as_mut().ok_or(ConnectionError::Closed)?;
                write_frame(writer, &frame).await
            }
            TcpMode::Server => {
                let writer = self
                    .peers
                    .get(&envelope.to)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| ConnectionError::UnknownRecipient(envelope.to.clone()))?;
                let mut writer = writer.lock().await;
                write_frame(&mut *writer, &frame).await
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    peers: Arc<DashMap<Address, SharedWriter>>,
    inbound: Inbound,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "Accepted TCP connection");
                    tokio::spawn(serve_client(
                        stream,
                        addr,
                        peers.clone(),
                        inbound.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "Failed to accept TCP connection"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    peers: Arc<DashMap<Address, SharedWriter>>,
    inbound: Inbound,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut reader, writer) = stream.into_split();
    let announced = tokio::select! {
        frame = read_frame(&mut reader) => frame,
        _ = shutdown.changed() => return,
    };
    let client = match announced.map(String::from_utf8) {
        Ok(Ok(name)) if !name.is_empty() => Address::new(name),
        Ok(_) => {
            warn!(peer = %addr, "Client announced an invalid address");
            return;
        }
        Err(e) => {
            warn!(peer = %addr, error = %e, "Client handshake failed");
            return;
        }
    };
    let writer: SharedWriter = Arc::new(Mutex::new(writer));
    if peers.insert(client.clone(), writer.clone()).is_some() {
        info!(peer = %addr, client = %client, "TCP client replaced an earlier socket");
    } else {
        info!(peer = %addr, client = %client, "TCP client registered");
    }

    read_loop(addr.to_string(), reader, inbound, shutdown).await;
    // A newer socket may have taken over the address in the meantime.
    peers.remove_if(&client, |_, current| Arc::ptr_eq(current, &writer));
}

async fn read_loop(
    peer: String,
    mut reader: OwnedReadHalf,
    inbound: Inbound,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let item = tokio::select! {
            frame = read_frame(&mut reader) => frame,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        let item = match item {
            Ok(frame) => Envelope::decode(&frame).map_err(ConnectionError::from),
            Err(ConnectionError::Closed) => {
                debug!(peer = %peer, "TCP peer closed the connection");
                break;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "TCP read failed");
                let _ = inbound.send(Err(e)).await;
                break;
            }
        };
        if inbound.send(item).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_roundtrip_and_eof() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"hello").await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), b"hello");
        drop(a);
        assert!(matches!(read_frame(&mut b).await, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_frame_header_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_SIZE + 1).to_be_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(ConnectionError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_closing_replaced_socket_keeps_newer_writer() {
        let server = TcpConnection::server("hub", "127.0.0.1:0".parse().unwrap());
        let _stream = server.connect().await.unwrap();
        let listen = server.local_addr().unwrap();
        let ping = |n: u8| {
            Envelope::new(
                Address::from("alice"),
                Address::from("hub"),
                agora_types::ProtocolId::from_static("acme/ping:1.0.0"),
                vec![n],
            )
        };

        let mut first = TcpStream::connect(listen).await.unwrap();
        write_frame(&mut first, b"alice").await.unwrap();
        for _ in 0..100 {
            if !server.peers().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(server.peers(), vec![Address::from("alice")]);

        // The second socket takes over once its handshake is processed.
        let mut second = TcpStream::connect(listen).await.unwrap();
        write_frame(&mut second, b"alice").await.unwrap();
        let mut delivered = false;
        for n in 0..100u8 {
            server.send(ping(n)).await.unwrap();
            let read = tokio::time::timeout(
                std::time::Duration::from_millis(20),
                read_frame(&mut second),
            )
            .await;
            if let Ok(frame) = read {
                assert_eq!(Envelope::decode(&frame.unwrap()).unwrap().to.as_str(), "alice");
                delivered = true;
                break;
            }
        }
        assert!(delivered, "second socket never became the writer for alice");

        drop(first);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(server.peers(), vec![Address::from("alice")]);
        server.send(ping(200)).await.unwrap();
        let last = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let frame = read_frame(&mut second).await.unwrap();
                let envelope = Envelope::decode(&frame).unwrap();
                if envelope.message[..] == [200] {
                    break envelope;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(last.to.as_str(), "alice");
        server.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_disconnect_is_idempotent() {
        let server = TcpConnection::server("hub", "127.0.0.1:0".parse().unwrap());
        let _stream = server.connect().await.unwrap();
        assert!(server.local_addr().is_some());
        assert!(server.is_connected());
        server.disconnect().await.unwrap();
        server.disconnect().await.unwrap();
        assert_eq!(server.state(), ConnectionState::Disconnected);
        assert!(server.local_addr().is_none());
    }
}
