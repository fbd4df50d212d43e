//! Browser-facing WebSocket server. Telemetry is pushed as binary frames to
//! every client that announced itself with `CONNECT`.

use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{Message, WebSocket, accept};

use crate::config::{MAX_UI_CLIENTS, READ_POLL_MS, UI_CONNECT_MESSAGE};

const CLIENT_QUEUE_DEPTH: usize = 8;

struct Client {
    id: u64,
    queue: SyncSender<Vec<u8>>,
}

pub struct UiServer {
    clients: Mutex<Vec<Client>>,
    next_id: AtomicU64,
    max_clients: usize,
}

impl UiServer {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(MAX_UI_CLIENTS)
    }

    pub fn with_capacity(max_clients: usize) -> Arc<Self> {
        Arc::new(UiServer {
            clients: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            max_clients,
        })
    }

    /// Accept browser connections on `listener` from a background thread.
    pub fn serve(self: &Arc<Self>, listener: TcpListener) -> io::Result<JoinHandle<()>> {
        let addr = listener.local_addr()?;
        log::info!("UI WebSocket server listening on port {}", addr.port());

        let server = Arc::clone(self);
        thread::Builder::new().name(String::from("ui-accept")).spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        log::warn!("UI connection error: {}", e);
                        continue;
                    }
                };
                let server = Arc::clone(&server);
                let spawned = thread::Builder::new()
                    .name(String::from("ui-client"))
                    .spawn(move || server.handle_client(stream));
                if let Err(e) = spawned {
                    log::error!("Unable to start UI client thread: {}", e);
                }
            }
        })
    }

    /// Best-effort broadcast. No registered client: silently dropped.
    pub fn push(&self, bytes: &[u8]) {
        let mut clients = self.clients.lock();
        if clients.is_empty() {
            return;
        }
        clients.retain(|client| match client.queue.try_send(bytes.to_vec()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("UI client {} queue full, dropping {} bytes", client.id, bytes.len());
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    fn register(&self) -> Option<(u64, Receiver<Vec<u8>>)> {
        let mut clients = self.clients.lock();
        if clients.len() >= self.max_clients {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, rx) = mpsc::sync_channel(CLIENT_QUEUE_DEPTH);
        clients.push(Client { id, queue });
        Some((id, rx))
    }

    fn unregister(&self, id: u64) {
        self.clients.lock().retain(|client| client.id != id);
    }

    fn handle_client(&self, stream: TcpStream) {
        let peer = stream.peer_addr().ok();
        let mut websocket = match accept(stream) {
            Ok(ws) => ws,
            Err(e) => {
                log::warn!("UI WebSocket handshake error: {}", e);
                return;
            }
        };
        if let Err(e) = websocket.get_ref().set_read_timeout(Some(Duration::from_millis(READ_POLL_MS))) {
            log::warn!("UI client setup failed: {}", e);
            return;
        }
        log::info!("UI client connected from {:?}", peer);

        let registered = self.client_loop(&mut websocket, peer);
        if let Some(id) = registered {
            self.unregister(id);
        }
        log::info!("UI client {:?} disconnected", peer);
    }

    fn client_loop(&self, websocket: &mut WebSocket<TcpStream>, peer: Option<SocketAddr>) -> Option<u64> {
        let mut registered: Option<(u64, Receiver<Vec<u8>>)> = None;
        loop {
            if let Some((id, rx)) = &registered {
                while let Ok(bytes) = rx.try_recv() {
                    if websocket.send(Message::Binary(bytes)).is_err() {
                        return Some(*id);
                    }
                }
            }

            match websocket.read() {
                Ok(Message::Text(text)) if text == UI_CONNECT_MESSAGE => {
                    if registered.is_some() {
                        continue;
                    }
                    match self.register() {
                        Some(client) => {
                            log::info!("UI client {} registered ({:?})", client.0, peer);
                            registered = Some(client);
                        }
                        None => {
                            log::warn!("Refusing UI client {:?}, {} already connected", peer, self.max_clients);
                            let _ = websocket.close(None);
                            let _ = websocket.flush();
                            return None;
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(tungstenite::Error::Io(e))
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) => {
                    log::debug!("UI client {:?} error: {}", peer, e);
                    break;
                }
            }
        }
        registered.map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn client(addr: SocketAddr) -> WebSocket<TcpStream> {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let (ws, _) = tungstenite::client(format!("ws://{}/ws", addr), stream).unwrap();
        ws
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn serve(max_clients: usize) -> (Arc<UiServer>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = UiServer::with_capacity(max_clients);
        server.serve(listener).unwrap();
        (server, addr)
    }

    #[test]
    fn push_without_clients_is_silent() {
        let server = UiServer::new();
        server.push(b"telemetry");
        assert_eq!(server.client_count(), 0);
    }

    #[test]
    fn registered_client_receives_pushes() {
        let (server, addr) = serve(2);
        let mut browser = client(addr);

        // not registered before CONNECT
        thread::sleep(Duration::from_millis(50));
        assert_eq!(server.client_count(), 0);

        browser.send(Message::Text(String::from("CONNECT"))).unwrap();
        wait_for(|| server.client_count() == 1);

        server.push(b"[12.4V]");
        assert_eq!(browser.read().unwrap(), Message::Binary(b"[12.4V]".to_vec()));
    }

    #[test]
    fn client_limit_is_enforced() {
        let (server, addr) = serve(1);
        let mut first = client(addr);
        first.send(Message::Text(String::from("CONNECT"))).unwrap();
        wait_for(|| server.client_count() == 1);

        let mut second = client(addr);
        second.send(Message::Text(String::from("CONNECT"))).unwrap();
        assert!(matches!(second.read(), Ok(Message::Close(_))));
        assert_eq!(server.client_count(), 1);

        drop(first);
        wait_for(|| {
            server.push(b"x");
            server.client_count() == 0
        });
    }
}
