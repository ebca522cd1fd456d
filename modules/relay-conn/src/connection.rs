use crate::error::{ConnectionError, RelayError};
use crate::message::{ClientMessage, RelayMessage, SubscriptionId};
use crate::{Connector, RelayStream};
use async_trait::async_trait;
use dvmscan_core::{FilterSet, ProtocolError};
use futures::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens real WebSocket sessions.
#[derive(Debug, Clone, Copy)]
pub struct WsConnector {
    verify_ids: bool,
}

impl WsConnector {
    pub fn new(verify_ids: bool) -> Self {
        WsConnector { verify_ids }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        WsConnector::new(true)
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Stream = RelayConnection;

    async fn connect(&self, url: &str, timeout: Duration) -> Result<RelayConnection, ConnectionError> {
        RelayConnection::connect(url, timeout, self.verify_ids).await
    }
}

/// WebSocket session to a single relay.
pub struct RelayConnection {
    url: String,
    ws: WsStream,
    subscription: Option<SubscriptionId>,
    verify_ids: bool,
    closed: bool,
}

impl RelayConnection {
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        verify_ids: bool,
    ) -> Result<Self, ConnectionError> {
        let parsed = validate_url(url)?;
        let started = Instant::now();
        let (ws, _response) = timeout(connect_timeout, connect_async(parsed.as_str()))
            .await
            .map_err(|_| ConnectionError::Timeout(connect_timeout))?
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))?;
        info!(relay = %url, elapsed = ?started.elapsed(), "connected");
        Ok(RelayConnection {
            url: url.to_string(),
            ws,
            subscription: None,
            verify_ids,
            closed: false,
        })
    }

    /// Subscription-scoped frames must name the subscription this session opened.
    fn check_subscription(&self, msg: RelayMessage) -> Result<RelayMessage, ProtocolError> {
        let sub = match &msg {
            RelayMessage::Event { subscription_id, .. }
            | RelayMessage::Eose { subscription_id }
            | RelayMessage::Closed { subscription_id, .. } => subscription_id,
            RelayMessage::Notice { .. } | RelayMessage::Other { .. } => return Ok(msg),
        };
        if self.subscription.as_ref() != Some(sub) {
            return Err(ProtocolError::Malformed(format!("message for unknown subscription {sub}")));
        }
        Ok(msg)
    }

    async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.ws
            .send(Message::text(text))
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))
    }
}

#[async_trait]
impl RelayStream for RelayConnection {
    fn url(&self) -> &str {
        &self.url
    }

    async fn subscribe(&mut self, filters: &[FilterSet]) -> Result<SubscriptionId, ConnectionError> {
        let id = SubscriptionId::generate();
        let req = ClientMessage::Req { subscription_id: &id, filters }.to_json();
        self.send_text(req).await?;
        debug!(relay = %self.url, subscription = %id, filters = filters.len(), "subscribed");
        self.subscription = Some(id.clone());
        Ok(id)
    }

    async fn next_message(&mut self) -> Option<Result<RelayMessage, RelayError>> {
        loop {
            if self.closed {
                return None;
            }
            match self.ws.next().await {
                None => {
                    self.closed = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.closed = true;
                    return Some(Err(ConnectionError::WebSocket(e.to_string()).into()));
                }
                Some(Ok(Message::Text(text))) => {
                    let parsed = RelayMessage::parse(text.as_str(), &self.url, self.verify_ids)
                        .and_then(|msg| self.check_subscription(msg));
                    return Some(parsed.map_err(RelayError::from));
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = self.ws.send(Message::Pong(payload)).await {
                        debug!(relay = %self.url, error = %e, "pong failed");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(relay = %self.url, ?frame, "relay closed connection");
                    self.closed = true;
                    return None;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(id) = self.subscription.take() {
            let close = ClientMessage::Close { subscription_id: &id }.to_json();
            if let Err(e) = self.send_text(close).await {
                debug!(relay = %self.url, error = %e, "CLOSE not delivered");
            }
        }
        self.ws
            .close(None)
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))
    }
}

fn validate_url(url: &str) -> Result<Url, ConnectionError> {
    let parsed = Url::parse(url).map_err(|e| ConnectionError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(ConnectionError::InvalidUrl(format!(
            "{url}: scheme must be ws or wss, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dvmscan_core::{PublicKey, RawEvent};
    use serde_json::json;
    use tokio::net::TcpListener;

    fn wire(ev: &RawEvent) -> serde_json::Value {
        json!({
            "id": ev.id.to_hex(),
            "pubkey": ev.pubkey.to_hex(),
            "created_at": ev.created_at,
            "kind": ev.kind,
            "tags": ev.tags,
            "content": ev.content,
            "sig": "",
        })
    }

    /// Accepts one client, answers its REQ with `replies` (`$SUB` stands for
    /// the subscription id the client chose), returns every text frame the
    /// client sent.
    async fn serve_once(listener: TcpListener, replies: Vec<String>) -> Vec<String> {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let mut received = Vec::new();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let text = text.as_str().to_string();
                let is_req = text.starts_with(r#"["REQ""#);
                if is_req {
                    let req: serde_json::Value = serde_json::from_str(&text).unwrap();
                    let sub = req[1].as_str().unwrap().to_string();
                    for r in &replies {
                        ws.send(Message::text(r.replace("$SUB", &sub))).await.unwrap();
                    }
                }
                received.push(text);
            }
        }
        received
    }

    #[tokio::test]
    async fn subscribes_receives_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let ev = RawEvent::compose(PublicKey::from_bytes([0xaa; 32]), 1_700_000_000, 31990, vec![vec!["d".into(), "svc".into()]], "{}");
        let replies = vec![
            json!(["NOTICE", "welcome"]).to_string(),
            json!(["EVENT", "$SUB", wire(&ev)]).to_string(),
            "garbage".to_string(),
            json!(["EOSE", "stale-subscription"]).to_string(),
            json!(["EOSE", "$SUB"]).to_string(),
        ];
        let server = tokio::spawn(serve_once(listener, replies));

        let mut conn = WsConnector::default().connect(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(conn.url(), url);
        let filters = vec![FilterSet::builder().kind(31990).limit(10).build().unwrap()];
        let sub = conn.subscribe(&filters).await.unwrap();

        assert!(matches!(conn.next_message().await, Some(Ok(RelayMessage::Notice { .. }))));
        match conn.next_message().await {
            Some(Ok(RelayMessage::Event { event, .. })) => {
                assert_eq!(event.id, ev.id);
                assert_eq!(event.relay, url);
            }
            other => panic!("expected event, got {other:?}"),
        }
        assert!(matches!(conn.next_message().await, Some(Err(RelayError::Protocol(_)))));
        match conn.next_message().await {
            Some(Err(RelayError::Protocol(ProtocolError::Malformed(reason)))) => {
                assert!(reason.contains("stale-subscription"));
            }
            other => panic!("expected foreign EOSE to be rejected, got {other:?}"),
        }
        match conn.next_message().await {
            Some(Ok(RelayMessage::Eose { subscription_id })) => assert_eq!(subscription_id, sub),
            other => panic!("expected EOSE, got {other:?}"),
        }
        conn.close().await.unwrap();
        assert!(conn.next_message().await.is_none());

        let received = server.await.unwrap();
        assert_eq!(received.len(), 2);
        assert!(received[0].contains(sub.as_str()));
        assert_eq!(received[1], json!(["CLOSE", sub.as_str()]).to_string());
    }

    #[tokio::test]
    async fn rejects_non_websocket_urls() {
        let err = WsConnector::default()
            .connect("https://relay.example", Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectionError::InvalidUrl(_)));
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("wss://relay.damus.io").is_ok());
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        // Bound but never accepted: TCP completes, the WebSocket upgrade never does.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let err = WsConnector::default()
            .connect(&url, Duration::from_millis(200))
            .await
            .err()
            .unwrap();
        assert_eq!(err, ConnectionError::Timeout(Duration::from_millis(200)));
        drop(listener);
    }
}
