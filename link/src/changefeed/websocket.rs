//! WebSocket implementation of [`ChangeFeedTransport`].
//!
//! One socket per table at `{ws(s)://host}/realtime/v1`. After the handshake
//! the client sends `{"type":"subscribe","table":..}` and the server streams
//! `change` frames. A reader task owns the socket, answers pings, sends
//! keepalive pings and forwards parsed events through a channel.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, SinkExt, StreamExt};
use log::{debug, info, warn};
use reqwest::Url;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::transport::{ChangeFeedTransport, ChangeStream};
use crate::auth::AuthProvider;
use crate::error::{LinkError, Result};
use crate::event_handlers::{ConnectionError, EventHandlers};
use crate::models::{ChangeEvent, ClientMessage, ServerMessage};
use crate::timeouts::LinkTimeouts;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const REALTIME_PATH: &str = "/realtime/v1";

/// Events buffered between the reader task and the feed client.
const EVENT_BUFFER: usize = 256;

const MAX_TEXT_FRAME_BYTES: usize = 4 * 1024 * 1024;

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365);

/// Changefeed transport over `tokio-tungstenite`.
#[derive(Clone)]
pub struct WebSocketTransport {
    ws_url: String,
    auth: AuthProvider,
    timeouts: LinkTimeouts,
    event_handlers: EventHandlers,
}

impl WebSocketTransport {
    pub fn new(
        base_url: &str,
        auth: AuthProvider,
        timeouts: LinkTimeouts,
        event_handlers: EventHandlers,
    ) -> Result<Self> {
        Ok(Self {
            ws_url: resolve_ws_url(base_url)?,
            auth,
            timeouts,
            event_handlers,
        })
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    async fn establish(&self, table: &str) -> Result<WsStream> {
        debug!("[LINK_FEED] Establishing WebSocket connection to {} for '{}'", self.ws_url, table);

        let mut request = self.ws_url.as_str().into_client_request().map_err(|e| {
            LinkError::TransportError(format!("Failed to build WebSocket request: {}", e))
        })?;
        self.auth.apply_to_ws_request(&mut request)?;

        let connect = tokio_tungstenite::connect_async(request);
        let connect_result = if LinkTimeouts::is_no_timeout(self.timeouts.connection_timeout) {
            Ok(connect.await)
        } else {
            tokio::time::timeout(self.timeouts.connection_timeout, connect).await
        };

        let mut ws = match connect_result {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(tokio_tungstenite::tungstenite::Error::Http(response))) => {
                let message = match response.status().as_u16() {
                    401 => "Unauthorized: realtime channel requires valid credentials".to_string(),
                    403 => "Forbidden: access to realtime channel denied".to_string(),
                    code => format!("WebSocket HTTP error: {}", code),
                };
                return Err(LinkError::TransportError(message));
            },
            Ok(Err(e)) => {
                return Err(LinkError::TransportError(format!("Connection failed: {}", e)));
            },
            Err(_) => {
                return Err(LinkError::TimeoutError(format!(
                    "Connection timeout ({:?})",
                    self.timeouts.connection_timeout
                )));
            },
        };

        let subscribe = serde_json::to_string(&ClientMessage::Subscribe {
            table: table.to_string(),
        })?;
        let send = ws.send(Message::text(subscribe));
        if LinkTimeouts::is_no_timeout(self.timeouts.subscribe_timeout) {
            send.await?;
        } else {
            tokio::time::timeout(self.timeouts.subscribe_timeout, send)
                .await
                .map_err(|_| {
                    LinkError::TimeoutError(format!(
                        "Subscribe timeout ({:?})",
                        self.timeouts.subscribe_timeout
                    ))
                })??;
        }

        info!("[LINK_FEED] Realtime channel open for '{}'", table);
        Ok(ws)
    }
}

#[async_trait]
impl ChangeFeedTransport for WebSocketTransport {
    async fn connect(&self, table: &str) -> Result<ChangeStream> {
        let ws = self.establish(table).await?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(reader_task(
            ws,
            table.to_string(),
            tx,
            self.timeouts.clone(),
            self.event_handlers.clone(),
        ));

        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(events.boxed())
    }
}

/// Turn the store's base URL into the realtime endpoint.
pub(crate) fn resolve_ws_url(base_url: &str) -> Result<String> {
    let base = Url::parse(base_url.trim()).map_err(|e| {
        LinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
    })?;

    if base.host_str().is_none() {
        return Err(LinkError::ConfigurationError("base_url must include a host".to_string()));
    }

    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        },
    };

    let mut ws_url = base.clone();
    ws_url.set_scheme(ws_scheme).map_err(|_| {
        LinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;
    ws_url.set_fragment(None);
    ws_url.set_query(None);
    let prefix = base.path().trim_end_matches('/');
    ws_url.set_path(&format!("{}{}", prefix, REALTIME_PATH));

    Ok(ws_url.to_string())
}

async fn reader_task(
    mut ws: WsStream,
    table: String,
    tx: mpsc::Sender<Result<ChangeEvent>>,
    timeouts: LinkTimeouts,
    event_handlers: EventHandlers,
) {
    let has_keepalive = !timeouts.keepalive_interval.is_zero();
    let keepalive_dur = if has_keepalive {
        timeouts.keepalive_interval
    } else {
        FAR_FUTURE
    };
    let has_pong_timeout = has_keepalive && !timeouts.pong_timeout.is_zero();

    let mut idle_deadline = TokioInstant::now() + keepalive_dur;
    let mut awaiting_pong = false;
    let mut pong_deadline = TokioInstant::now() + FAR_FUTURE;

    loop {
        let idle_sleep = tokio::time::sleep_until(idle_deadline);
        tokio::pin!(idle_sleep);
        let pong_sleep = tokio::time::sleep_until(pong_deadline);
        tokio::pin!(pong_sleep);

        tokio::select! {
            biased;

            // Feed client dropped the stream: leave politely.
            _ = tx.closed() => {
                if let Ok(text) = serde_json::to_string(&ClientMessage::Unsubscribe { table: table.clone() }) {
                    let _ = ws.send(Message::text(text)).await;
                }
                let _ = ws.close(None).await;
                debug!("[LINK_FEED] Reader for '{}' stopped", table);
                return;
            }

            _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                warn!("[LINK_FEED] Pong timeout ({:?}) on '{}'", timeouts.pong_timeout, table);
                let _ = tx
                    .send(Err(LinkError::TransportError(format!(
                        "Pong timeout ({:?})",
                        timeouts.pong_timeout
                    ))))
                    .await;
                return;
            }

            _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                    warn!("[LINK_FEED] Keepalive ping failed on '{}': {}", table, e);
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
                if has_pong_timeout {
                    awaiting_pong = true;
                    pong_deadline = TokioInstant::now() + timeouts.pong_timeout;
                }
                idle_deadline = TokioInstant::now() + keepalive_dur;
            }

            frame = ws.next() => {
                idle_deadline = TokioInstant::now() + keepalive_dur;
                if awaiting_pong {
                    awaiting_pong = false;
                    pong_deadline = TokioInstant::now() + FAR_FUTURE;
                }

                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_TEXT_FRAME_BYTES {
                            warn!("[LINK_FEED] Text frame too large ({} bytes)", text.len());
                            continue;
                        }
                        event_handlers.emit_receive(&table, text.as_str());
                        if let Some(event) = parse_frame(text.as_str(), &table, &event_handlers) {
                            if tx.send(Ok(event)).await.is_err() {
                                let _ = ws.close(None).await;
                                return;
                            }
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    },
                    Some(Ok(Message::Pong(_))) => {
                        debug!("[LINK_FEED] Keepalive: received Pong on '{}'", table);
                    },
                    Some(Ok(Message::Binary(data))) => {
                        debug!("[LINK_FEED] Ignoring {}-byte binary frame on '{}'", data.len(), table);
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(f) => format!("Server closed connection: {} (code: {})", f.reason, u16::from(f.code)),
                            None => "Server closed connection".to_string(),
                        };
                        let _ = tx.send(Err(LinkError::TransportError(reason))).await;
                        return;
                    },
                    Some(Ok(Message::Frame(_))) => {},
                    Some(Err(e)) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    },
                    None => return,
                }
            }
        }
    }
}

/// Parse one text frame. Control frames and malformed payloads yield `None`.
fn parse_frame(text: &str, table: &str, event_handlers: &EventHandlers) -> Option<ChangeEvent> {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("[LINK_FEED] Failed to parse frame on '{}': {}", table, e);
            return None;
        },
    };

    match message {
        ServerMessage::Error { message, code } => {
            warn!(
                "[LINK_FEED] Server error on '{}': {} (code: {})",
                table,
                message,
                code.as_deref().unwrap_or("-")
            );
            event_handlers.emit_error(ConnectionError::new(table, message, true));
            None
        },
        ServerMessage::Subscribed { .. } => {
            debug!("[LINK_FEED] Subscription acknowledged for '{}'", table);
            None
        },
        other => match other.into_change_event() {
            Ok(event) => event,
            Err(e) => {
                warn!("[LINK_FEED] Dropping malformed change on '{}': {}", table, e);
                None
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ws_url() {
        assert_eq!(
            resolve_ws_url("http://localhost:54321").unwrap(),
            "ws://localhost:54321/realtime/v1"
        );
        assert_eq!(
            resolve_ws_url("https://estate.example.com/").unwrap(),
            "wss://estate.example.com/realtime/v1"
        );
        assert_eq!(
            resolve_ws_url("https://example.com/api?x=1").unwrap(),
            "wss://example.com/api/realtime/v1"
        );
    }

    #[test]
    fn test_resolve_ws_url_rejects_bad_input() {
        assert!(matches!(
            resolve_ws_url("not a url"),
            Err(LinkError::ConfigurationError(_))
        ));
        assert!(matches!(
            resolve_ws_url("ftp://example.com"),
            Err(LinkError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_parse_frame() {
        let handlers = EventHandlers::new();
        let change = r#"{"type":"change","table":"parcels","operation":"delete","id":9}"#;
        let event = parse_frame(change, "parcels", &handlers).unwrap();
        assert_eq!(event.key("id"), Some("9".to_string()));

        assert!(parse_frame(r#"{"type":"pong"}"#, "parcels", &handlers).is_none());
        assert!(parse_frame("{garbage", "parcels", &handlers).is_none());
        assert!(
            parse_frame(r#"{"type":"error","message":"rls denied"}"#, "parcels", &handlers)
                .is_none()
        );
    }
}
