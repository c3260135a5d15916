//! WebSocket realtime session to the inference service.
//!
//! A background task owns the socket. Frames reach it through a small bounded
//! queue; when the queue is full or the socket is down the frame is dropped.
//! Binary messages in both directions are MessagePack envelopes (see
//! [`envelope`]); text messages from the service are JSON status or error
//! notices and only get logged. Throttled frames wait without blocking reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{envelope, ChannelConfig, ResultPayload, StreamingChannel};
use crate::normalize::NormalizedFrame;
use crate::Error;

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct WsChannel {
    outbound: flume::Sender<Bytes>,
    results: flume::Receiver<ResultPayload>,
    connected: Arc<AtomicBool>,
}

impl WsChannel {
    /// Start the session task. Returns at once; the socket connects in the background.
    pub fn open(config: ChannelConfig) -> Self {
        let (outbound, outbound_rx) = flume::bounded(config.outbound_capacity.max(1));
        let (results_tx, results) = flume::unbounded();
        let connected = Arc::new(AtomicBool::new(false));

        let session = Session {
            config,
            outbound: outbound_rx,
            results: results_tx,
            connected: connected.clone(),
        };
        tokio::spawn(session.run());

        Self {
            outbound,
            results,
            connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl StreamingChannel for WsChannel {
    fn send(&self, frame: NormalizedFrame) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::ChannelSend("session not established".into()));
        }
        self.outbound.try_send(frame.payload).map_err(|e| match e {
            flume::TrySendError::Full(_) => {
                metrics::counter!("frames_dropped").increment(1);
                Error::ChannelSend("outbound queue full, frame dropped".into())
            }
            flume::TrySendError::Disconnected(_) => Error::ChannelClosed,
        })
    }

    fn results(&self) -> flume::Receiver<ResultPayload> {
        self.results.clone()
    }
}

struct Session {
    config: ChannelConfig,
    outbound: flume::Receiver<Bytes>,
    results: flume::Sender<ResultPayload>,
    connected: Arc<AtomicBool>,
}

enum SessionEnd {
    /// The owning `WsChannel` was dropped.
    Shutdown,
    /// The socket went away; reconnect.
    Lost(Error),
}

impl Session {
    /// Connect, pump, and reconnect with exponential backoff until the channel is dropped.
    async fn run(self) {
        let url = self.config.url();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            info!(url = %url, model = %self.config.model_id, "connecting to inference service");
            match self.connect(&url).await {
                Ok(ws) => {
                    info!(connection_key = %self.config.connection_key, "realtime session established");
                    backoff = INITIAL_BACKOFF;
                    self.connected.store(true, Ordering::Release);
                    let end = self.pump(ws).await;
                    self.connected.store(false, Ordering::Release);
                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(e) => warn!(error = %e, "realtime session lost"),
                    }
                }
                Err(e) => warn!(error = %e, "connect failed, retrying in {:?}", backoff),
            }

            if !self.idle(backoff).await {
                break;
            }
            backoff = (backoff * 2).min(self.config.reconnect_max);
        }
        info!("realtime session task stopped");
    }

    async fn connect(&self, url: &str) -> Result<WsStream, Error> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::ChannelSend(e.to_string()))?;
        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(&format!("Key {}", key))
                .map_err(|e| Error::ChannelSend(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| Error::ChannelSend("connect timed out".into()))?
            .map_err(|e| Error::ChannelSend(e.to_string()))?;
        Ok(ws)
    }

    async fn pump(&self, ws: WsStream) -> SessionEnd {
        let (mut write, mut read) = ws.split();
        // A frame taken off the queue waits here until the throttle allows it out.
        let mut pending: Option<Bytes> = None;
        let mut send_at = Instant::now();

        loop {
            tokio::select! {
                outbound = self.outbound.recv_async(), if pending.is_none() => {
                    let Ok(payload) = outbound else {
                        let _ = write.close().await;
                        return SessionEnd::Shutdown;
                    };
                    pending = Some(payload);
                }
                _ = tokio::time::sleep_until(send_at), if pending.is_some() => {
                    let Some(payload) = pending.take() else { continue };
                    let message = match envelope::encode_frame(&payload) {
                        Ok(message) => message,
                        Err(e) => {
                            metrics::counter!("send_failures").increment(1);
                            warn!(error = %e, "frame envelope encode failed");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::binary(message)).await {
                        metrics::counter!("send_failures").increment(1);
                        return SessionEnd::Lost(Error::ChannelSend(e.to_string()));
                    }
                    send_at = next_send_at(Instant::now(), self.config.throttle_interval);
                    metrics::counter!("frames_sent").increment(1);
                    debug!(bytes = payload.len(), "frame transmitted");
                }
                incoming = read.next() => match incoming {
                    None => return SessionEnd::Lost(Error::ChannelClosed),
                    Some(Err(e)) => return SessionEnd::Lost(Error::ChannelSend(e.to_string())),
                    Some(Ok(Message::Binary(data))) => match envelope::decode_result(&data) {
                        Ok(content) => {
                            if self.results.send(ResultPayload::new(content)).is_err() {
                                return SessionEnd::Shutdown;
                            }
                        }
                        Err(e) => {
                            metrics::counter!("malformed_results").increment(1);
                            warn!(error = %e, bytes = data.len(), "result dropped");
                        }
                    },
                    Some(Ok(Message::Text(text))) => log_notice(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "service closed the session");
                        return SessionEnd::Lost(Error::ChannelClosed);
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Wait out the backoff, discarding frames queued meanwhile. `false` once the channel is dropped.
    async fn idle(&self, backoff: Duration) -> bool {
        let deadline = Instant::now() + backoff;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                outbound = self.outbound.recv_async() => {
                    if outbound.is_err() {
                        return false;
                    }
                    metrics::counter!("send_failures").increment(1);
                }
            }
        }
    }
}

/// Earliest instant the next frame may go out. A zero interval never waits.
fn next_send_at(sent_at: Instant, throttle: Duration) -> Instant {
    sent_at + throttle
}

/// Text frames carry JSON status; surface errors, keep the rest at debug.
fn log_notice(text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => {
            if let Some(err) = value.get("error").or_else(|| value.get("detail")) {
                warn!(error = %err, "inference service reported an error");
            } else {
                debug!(notice = %value, "inference service notice");
            }
        }
        Err(_) => debug!(notice = text, "non-JSON text message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RawFrame;
    use crate::Normalizer;
    use image::{Rgb, RgbImage};

    fn frame() -> NormalizedFrame {
        let raw = RawFrame::new(RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])), 1);
        Normalizer::new(8, 0.7).normalize(&raw).unwrap().unwrap()
    }

    #[tokio::test]
    async fn send_before_connect_is_swallowable_error() {
        let channel = WsChannel::open(ChannelConfig {
            endpoint: "ws://127.0.0.1:9".into(),
            ..ChannelConfig::default()
        });
        assert!(!channel.is_connected());
        let result = channel.send(frame());
        assert!(matches!(result, Err(Error::ChannelSend(_))));
        assert!(channel.results().try_recv().is_err());
    }

    #[tokio::test]
    async fn results_flow_while_a_frame_waits_on_the_throttle() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let channel = WsChannel::open(ChannelConfig {
            endpoint: format!("ws://{}", addr),
            throttle_interval: Duration::from_secs(60),
            api_key: None,
            ..ChannelConfig::default()
        });

        let (tcp, _) = listener.accept().await.unwrap();
        let mut service = tokio_tungstenite::accept_async(tcp).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !channel.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let first = frame();
        let expected = first.payload.clone();
        channel.send(first).unwrap();
        let Some(Ok(Message::Binary(wire))) = service.next().await else {
            panic!("expected a binary frame");
        };
        assert_eq!(envelope::testing::decode_frame(&wire), expected);

        // Held back for a full minute by the throttle.
        channel.send(frame()).unwrap();

        let mut png = Vec::new();
        RgbImage::from_pixel(2, 2, Rgb([0, 255, 0]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        service.send(Message::binary(b"not an envelope".to_vec())).await.unwrap();
        service
            .send(Message::binary(envelope::testing::encode_result(&png)))
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), channel.results().recv_async())
            .await
            .expect("result blocked behind throttled frame")
            .unwrap();
        assert_eq!(&result.content[..], &png[..]);
        assert!(channel.results().try_recv().is_err());
    }

    #[test]
    fn zero_throttle_sends_immediately() {
        let now = Instant::now();
        assert_eq!(next_send_at(now, Duration::ZERO), now);
        assert_eq!(
            next_send_at(now, Duration::from_millis(250)),
            now + Duration::from_millis(250)
        );
    }

    #[test]
    fn notices_never_panic() {
        log_notice(r#"{"error": "quota exceeded"}"#);
        log_notice(r#"{"status": "ok"}"#);
        log_notice("plain text");
    }
}
