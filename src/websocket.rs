use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tungstenite::http::Uri;
use tungstenite::{Message, WebSocket};

use crate::config::{ControllerConfig, READ_POLL_MS};
use crate::error::LinkError;
use crate::link::{Connector, Inbound, Link};
use crate::relay::TelemetryMessage;

/// Opens WebSocket connections to the vehicle.
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
    read_poll: Duration,
}

impl WsConnector {
    pub fn new(config: &ControllerConfig) -> Self {
        WsConnector {
            url: config.vehicle_url.clone(),
            connect_timeout: config.connect_timeout(),
            read_poll: Duration::from_millis(READ_POLL_MS),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Resolve a `ws://host[:port]/path` URL to a socket address.
pub fn resolve(url: &str) -> Result<SocketAddr, LinkError> {
    let uri: Uri = url
        .parse()
        .map_err(|e| LinkError::InvalidUrl(format!("{}: {}", url, e)))?;
    if uri.scheme_str() != Some("ws") {
        return Err(LinkError::InvalidUrl(format!("{}: only ws:// is supported", url)));
    }
    let host = uri
        .host()
        .ok_or_else(|| LinkError::InvalidUrl(format!("{}: missing host", url)))?;
    let port = uri.port_u16().unwrap_or(80);

    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| LinkError::InvalidUrl(format!("{}: host did not resolve", url)))
}

impl Connector for WsConnector {
    fn connect(&self) -> Result<Box<dyn Link>, LinkError> {
        let addr = resolve(&self.url)?;
        log::info!("Connecting to {}", self.url);

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.connect_timeout))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;

        let (socket, _response) =
            tungstenite::client(self.url.as_str(), stream).map_err(|e| LinkError::Handshake(e.to_string()))?;
        socket.get_ref().set_read_timeout(Some(self.read_poll))?;

        log::info!("WebSocket connected to {}", self.url);
        Ok(Box::new(WsLink { socket }))
    }
}

pub struct WsLink {
    socket: WebSocket<TcpStream>,
}

impl Link for WsLink {
    fn is_connected(&self) -> bool {
        self.socket.can_write()
    }

    fn send(&mut self, payload: &[u8], timeout: Duration) -> Result<usize, LinkError> {
        self.socket.get_ref().set_write_timeout(Some(timeout))?;
        self.socket.send(Message::Binary(payload.to_vec()))?;
        Ok(payload.len())
    }

    fn recv(&mut self) -> Result<Option<Inbound>, LinkError> {
        match self.socket.read() {
            Ok(Message::Binary(data)) => Ok(Some(Inbound::Data(TelemetryMessage::new(data)))),
            Ok(Message::Text(text)) => Ok(Some(Inbound::Data(TelemetryMessage::new(text.into_bytes())))),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Ok(Some(Inbound::Activity)),
            Ok(Message::Close(_)) => Err(LinkError::Closed),
            Ok(Message::Frame(_)) => Ok(None),
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                Err(LinkError::Closed)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
        let _ = self.socket.get_ref().shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_literal_address() {
        let addr = resolve("ws://127.0.0.1:81").unwrap();
        assert_eq!(addr, "127.0.0.1:81".parse::<SocketAddr>().unwrap());
        assert_eq!(resolve("ws://127.0.0.1/telemetry").unwrap().port(), 80);
    }

    #[test]
    fn rejects_unsupported_urls() {
        assert!(matches!(resolve("wss://127.0.0.1:81"), Err(LinkError::InvalidUrl(_))));
        assert!(matches!(resolve("http://127.0.0.1:81"), Err(LinkError::InvalidUrl(_))));
        assert!(matches!(resolve("not a url"), Err(LinkError::InvalidUrl(_))));
    }
}
