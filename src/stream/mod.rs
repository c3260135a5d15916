//! Streaming channel to the external inference service
//!
//! Sending is fire-and-forget and never blocks the capture loop. Results come
//! back on a separate receiver, in delivery order, with no pairing to sends.

pub mod envelope;
pub mod loopback;
pub mod ws;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::normalize::NormalizedFrame;
use crate::{ChannelKind, ChannelSettings, Error};

pub use loopback::LoopbackChannel;
pub use ws::WsChannel;

/// Opaque result blob delivered by the inference service.
#[derive(Debug, Clone)]
pub struct ResultPayload {
    pub content: Bytes,
    pub received_at: Instant,
}

impl ResultPayload {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            received_at: Instant::now(),
        }
    }
}

/// Realtime session parameters.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub endpoint: String,
    /// Logical model identifier, e.g. `fal-ai/birefnet`.
    pub model_id: String,
    /// Sessions opened with the same key are reused by the service.
    pub connection_key: String,
    /// Minimum spacing between transmissions. Zero disables channel throttling.
    pub throttle_interval: Duration,
    pub api_key: Option<String>,
    pub reconnect_max: Duration,
    pub outbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelSettings::default().channel_config()
    }
}

impl ChannelConfig {
    pub fn url(&self) -> String {
        format!(
            "{}/{}/ws?connection_key={}",
            self.endpoint.trim_end_matches('/'),
            self.model_id.trim_matches('/'),
            self.connection_key
        )
    }
}

pub trait StreamingChannel: Send + Sync {
    /// Hand a frame to the channel. Returns immediately; an error means the
    /// frame was not taken and is simply lost.
    fn send(&self, frame: NormalizedFrame) -> Result<(), Error>;

    /// Receiver for results, in the order the service delivers them.
    fn results(&self) -> flume::Receiver<ResultPayload>;
}

/// Open the channel described by `settings`. Must be called inside a Tokio runtime.
pub fn open(settings: &ChannelSettings) -> Arc<dyn StreamingChannel> {
    match settings.kind {
        ChannelKind::Websocket => Arc::new(WsChannel::open(settings.channel_config())),
        ChannelKind::Loopback => Arc::new(LoopbackChannel::new()),
    }
}
