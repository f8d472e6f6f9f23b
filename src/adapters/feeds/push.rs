//! WebSocket Push Feed - Primary Depth Source
//!
//! One session per `open()`:
//! - Connects with a handshake timeout and sends the venue's
//!   subscription message, then reports `Opened`
//! - Forwards every depth message as raw depth
//! - Answers protocol pings, text `ping` and JSON `{"ping":x}` keep-alives
//! - Sends its own ping frame every keep-alive interval
//! - Reports `Dropped` on error, close or end of stream and exits
//!
//! Reconnecting is not this adapter's job: the supervisor opens a new
//! session when it decides to.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, instrument};

use super::venue::VenueProfile;
use crate::domain::connection::Transport;
use crate::domain::normalizer::{PayloadShape, RawDepth};
use crate::ports::feed::{FeedAdapter, FeedError, FeedHandle, FeedRequest, FeedSink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Push adapter for one venue profile.
#[derive(Debug, Clone)]
pub struct PushFeed {
    profile: Arc<VenueProfile>,
}

impl PushFeed {
    pub fn new(profile: Arc<VenueProfile>) -> Self {
        Self { profile }
    }
}

impl FeedAdapter for PushFeed {
    fn transport(&self) -> Transport {
        Transport::Push
    }

    fn open(&self, request: &FeedRequest, sink: FeedSink) -> Result<FeedHandle, FeedError> {
        let url = self.profile.push_url(request);
        let ws_request = url
            .as_str()
            .into_client_request()
            .map_err(|e| FeedError::Construction(format!("invalid push url {url}: {e}")))?;

        let session = PushSession {
            venue: self.profile.name.clone(),
            request: ws_request,
            subscribe: self.profile.subscribe_message(request),
            shape: self.profile.shape.clone(),
            handshake_timeout: self.profile.handshake_timeout,
            ping_interval: self.profile.ping_interval,
        };
        let id = sink.session();
        let task = tokio::spawn(session.run(sink));
        Ok(FeedHandle::new(id, task))
    }
}

struct PushSession {
    venue: String,
    request: Request,
    subscribe: Option<String>,
    shape: PayloadShape,
    handshake_timeout: Duration,
    ping_interval: Option<Duration>,
}

impl PushSession {
    #[instrument(skip_all, fields(venue = %self.venue, session = sink.session().0))]
    async fn run(self, sink: FeedSink) {
        let connect = tokio::time::timeout(self.handshake_timeout, connect_async(self.request)).await;
        let ws = match connect {
            Err(_) => {
                sink.failed(FeedError::HandshakeTimeout(self.handshake_timeout));
                return;
            }
            Ok(Err(e)) => {
                sink.failed(FeedError::Handshake(e.to_string()));
                return;
            }
            Ok(Ok((ws, _))) => ws,
        };

        let (mut write, mut read) = ws.split();

        if let Some(message) = self.subscribe {
            if let Err(e) = write.send(Message::Text(message)).await {
                sink.failed(FeedError::Handshake(format!("subscribe failed: {e}")));
                return;
            }
        }

        info!("Push session connected");
        if !sink.opened() {
            return;
        }

        let reason = stream(&mut write, &mut read, &self.shape, self.ping_interval, &sink).await;
        let _ = write.close().await;
        sink.failed(FeedError::Dropped(reason));
    }
}

/// Pump messages until the session ends; returns why it ended.
async fn stream(
    write: &mut WsWrite,
    read: &mut WsRead,
    shape: &PayloadShape,
    ping_interval: Option<Duration>,
    sink: &FeedSink,
) -> String {
    let mut keepalive = ping_interval.map(|every| {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            biased;

            msg = read.next() => {
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => on_text(&text, shape, sink),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => on_text(text, shape, sink),
                        Err(_) => {
                            debug!(len = bytes.len(), "Ignoring non-UTF-8 binary frame");
                            None
                        }
                    },
                    Some(Ok(Message::Ping(data))) => Some(Message::Pong(data)),
                    Some(Ok(Message::Close(frame))) => {
                        return frame.map_or_else(
                            || "closed by venue".to_string(),
                            |f| format!("closed by venue: {} {}", f.code, f.reason),
                        );
                    }
                    Some(Ok(_)) => None,
                    Some(Err(e)) => return format!("websocket error: {e}"),
                    None => return "stream ended".to_string(),
                };

                if sink.is_closed() {
                    return "subscription gone".to_string();
                }
                if let Some(reply) = reply {
                    if let Err(e) = write.send(reply).await {
                        return format!("keep-alive reply failed: {e}");
                    }
                }
            }

            () = tick(&mut keepalive) => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    return format!("ping failed: {e}");
                }
            }
        }
    }
}

/// Handle one text payload, returning a keep-alive reply if one is due.
fn on_text(text: &str, shape: &PayloadShape, sink: &FeedSink) -> Option<Message> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("ping") {
        return Some(Message::Text("pong".to_string()));
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        debug!(len = text.len(), "Discarding unparsable push message");
        return None;
    };

    if let Some(token) = value.get("ping") {
        return Some(Message::Text(serde_json::json!({ "pong": token }).to_string()));
    }

    match RawDepth::from_message(&value, shape) {
        Some(depth) => {
            sink.data(depth);
        }
        None => debug!("Ignoring non-depth push message"),
    }
    None
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
