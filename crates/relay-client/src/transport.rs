//! Push and pull transports.
//!
//! The session drives these through traits so tests can script the relay.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use relay_core::{
    ClientCredentials, Message,
    protocol::{InboundFrame, RawHistory},
    traits::StoredObject,
};
use reqwest::{RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use url::Url;

use crate::error::TransportError;

/// Header names used by the relay's pull transport.
pub mod headers {
    pub const CREDENTIAL: &str = "x-relay-credential";
    pub const ORIGIN: &str = "x-relay-origin";
    pub const OFFSET: &str = "x-history-offset";
    pub const EPOCH: &str = "x-history-epoch";
}

/// Opens push links.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Connect and complete the handshake, returning the link and the
    /// catch-up history the relay sends first.
    async fn connect(
        &self,
        url: &Url,
        origin_id: &str,
    ) -> Result<(Box<dyn PushLink>, RawHistory), TransportError>;
}

/// An open push connection.
#[async_trait]
pub trait PushLink: Send {
    /// Send a text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next frame from the relay. `None` once the relay closed the link.
    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>>;

    /// Close the link. Idempotent.
    async fn close(&mut self);
}

/// The relay's HTTP API.
#[async_trait]
pub trait PullApi: Send + Sync {
    /// Current history with its offset.
    async fn history(&self, base: &Url, origin_id: &str) -> Result<RawHistory, TransportError>;

    /// Publish a message.
    async fn publish(&self, base: &Url, message: &Message) -> Result<(), TransportError>;

    /// Participant count.
    async fn presence(&self, base: &Url) -> Result<usize, TransportError>;

    /// Upload a file, returning its absolute locator.
    async fn upload(&self, base: &Url, data: Bytes, mime: &str) -> Result<Url, TransportError>;
}

/// WebSocket push transport.
#[derive(Debug, Clone)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl WsConnector {
    /// Create a connector giving up on handshakes after `handshake_timeout`.
    #[must_use]
    pub const fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(
        &self,
        url: &Url,
        origin_id: &str,
    ) -> Result<(Box<dyn PushLink>, RawHistory), TransportError> {
        let mut url = url.clone();
        url.query_pairs_mut().append_pair("originId", origin_id);

        let (link, history) = tokio::time::timeout(self.handshake_timeout, handshake(&url))
            .await
            .map_err(|_| TransportError::Timeout)??;
        tracing::debug!(%url, offset = history.offset, "push handshake complete");
        Ok((Box::new(link), history))
    }
}

async fn handshake(url: &Url) -> Result<(WsLink, RawHistory), TransportError> {
    let (socket, _) = connect_async(url.as_str()).await.map_err(Box::new)?;
    let mut link = WsLink {
        socket,
        closed: false,
    };
    match link.recv().await {
        Some(Ok(InboundFrame::History(history))) => Ok((link, history)),
        Some(Ok(other)) => Err(TransportError::Handshake(format!(
            "expected history, got {other:?}"
        ))),
        Some(Err(e)) => Err(e),
        None => Err(TransportError::Closed),
    }
}

struct WsLink {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl PushLink for WsLink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.socket
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| TransportError::from(Box::new(e)))
    }

    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            // Pings are answered by tungstenite while reading
            let text = match self.socket.next().await? {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(Box::new(e).into())),
            };
            return Some(InboundFrame::decode(text.as_str()).map_err(Into::into));
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.socket.close(None).await;
        }
    }
}

enum Access {
    Read,
    Write,
}

/// HTTP pull transport.
///
/// Every guarded call fetches a fresh one-time credential first. If another
/// client consumed it in between the relay answers 403 and the call is
/// retried once with a new one.
#[derive(Debug, Clone)]
pub struct HttpPullApi {
    http: reqwest::Client,
}

impl HttpPullApi {
    /// Create an API client with a per-request timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    async fn credentials(&self, base: &Url) -> Result<ClientCredentials, TransportError> {
        let response = self.http.get(base.join("credentials")?).send().await?;
        Ok(check(response)?.json().await?)
    }

    async fn guarded<F>(&self, base: &Url, access: Access, build: F) -> Result<Response, TransportError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let response = self.send_guarded(base, &access, &build).await?;
        if response.status() != StatusCode::FORBIDDEN {
            return check(response);
        }
        tracing::debug!("credential already consumed, retrying with a fresh one");
        check(self.send_guarded(base, &access, &build).await?)
    }

    async fn send_guarded<F>(
        &self,
        base: &Url,
        access: &Access,
        build: &F,
    ) -> Result<Response, TransportError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let credentials = self.credentials(base).await?;
        let secret = match access {
            Access::Read => credentials.read,
            Access::Write => credentials.write,
        };
        Ok(build(&self.http)
            .header(headers::CREDENTIAL, secret)
            .send()
            .await?)
    }
}

fn check(response: Response) -> Result<Response, TransportError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(TransportError::Status(response.status()))
    }
}

fn numeric_header(response: &Response, name: &str) -> u64 {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

#[derive(Deserialize)]
struct PresenceCount {
    count: usize,
}

#[async_trait]
impl PullApi for HttpPullApi {
    async fn history(&self, base: &Url, origin_id: &str) -> Result<RawHistory, TransportError> {
        let url = base.join("history")?;
        let response = self
            .guarded(base, Access::Read, |http| {
                http.get(url.clone()).header(headers::ORIGIN, origin_id)
            })
            .await?;
        let offset = numeric_header(&response, headers::OFFSET);
        let epoch = numeric_header(&response, headers::EPOCH);
        let entries: Vec<Value> = response.json().await?;
        Ok(RawHistory {
            offset,
            epoch,
            entries,
            notice: None,
        })
    }

    async fn publish(&self, base: &Url, message: &Message) -> Result<(), TransportError> {
        let url = base.join("publish")?;
        self.guarded(base, Access::Write, |http| http.post(url.clone()).json(message))
            .await?;
        Ok(())
    }

    async fn presence(&self, base: &Url) -> Result<usize, TransportError> {
        let response = self.http.get(base.join("presence")?).send().await?;
        let presence: PresenceCount = check(response)?.json().await?;
        Ok(presence.count)
    }

    async fn upload(&self, base: &Url, data: Bytes, mime: &str) -> Result<Url, TransportError> {
        let url = base.join("upload")?;
        let response = self
            .guarded(base, Access::Write, |http| {
                http.post(url.clone())
                    .header(header::CONTENT_TYPE, mime)
                    .body(data.clone())
            })
            .await?;
        let stored: StoredObject = response.json().await?;
        Ok(base.join(stored.locator.trim_start_matches('/'))?)
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::{self, error::UrlError};

    use super::*;

    #[tokio::test]
    async fn test_wss_attempts_tls_handshake() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        // Accepts TCP, then hangs up before any TLS
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let url = Url::parse(&format!("wss://{addr}/ws")).unwrap();
        let err = WsConnector::new(Duration::from_secs(2))
            .connect(&url, "me")
            .await
            .err()
            .unwrap();
        match err {
            TransportError::WebSocket(e) => assert!(
                !matches!(*e, tungstenite::Error::Url(UrlError::TlsFeatureNotEnabled)),
                "wss refused without a TLS attempt"
            ),
            other => panic!("unexpected error: {other}"),
        }
    }
}
