use std::sync::atomic::{AtomicU64, Ordering};

use super::{ResultPayload, StreamingChannel};
use crate::normalize::NormalizedFrame;
use crate::Error;

/// Echoes every sent payload straight back as a result.
pub struct LoopbackChannel {
    tx: flume::Sender<ResultPayload>,
    rx: flume::Receiver<ResultPayload>,
    sent: AtomicU64,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            tx,
            rx,
            sent: AtomicU64::new(0),
        }
    }

    /// Frames accepted by `send` so far.
    pub fn frames_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingChannel for LoopbackChannel {
    fn send(&self, frame: NormalizedFrame) -> Result<(), Error> {
        self.tx
            .send(ResultPayload::new(frame.payload))
            .map_err(|_| Error::ChannelClosed)?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_sent").increment(1);
        Ok(())
    }

    fn results(&self) -> flume::Receiver<ResultPayload> {
        self.rx.clone()
    }
}
