//! MessagePack envelopes used on the realtime socket.
//!
//! Outbound frames travel as `{image_bytes: <bin>}`; results come back as
//! `{image: {content: <bin>, ..}, ..}`. Only `image.content` reaches the display.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::Error;

#[derive(Serialize)]
struct FrameEnvelope<'a> {
    #[serde(with = "serde_bytes")]
    image_bytes: &'a [u8],
}

#[derive(Deserialize)]
struct ResultEnvelope {
    image: Option<ResultImage>,
}

#[derive(Deserialize)]
struct ResultImage {
    content: ByteBuf,
}

/// Wrap an encoded frame for transmission.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, Error> {
    rmp_serde::to_vec_named(&FrameEnvelope {
        image_bytes: payload,
    })
    .map_err(|e| Error::Envelope(e.to_string()))
}

/// Extract the result image bytes from a service message.
pub fn decode_result(message: &[u8]) -> Result<Bytes, Error> {
    let envelope: ResultEnvelope =
        rmp_serde::from_slice(message).map_err(|e| Error::Envelope(e.to_string()))?;
    match envelope.image {
        Some(image) if !image.content.is_empty() => Ok(Bytes::from(image.content.into_vec())),
        Some(_) => Err(Error::Envelope("result image is empty".into())),
        None => Err(Error::Envelope("result carries no image".into())),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Service side of the envelope, for socket tests.

    use super::*;

    #[derive(Deserialize)]
    struct InboundFrame {
        image_bytes: ByteBuf,
    }

    #[derive(Serialize)]
    struct OutboundImage<'a> {
        #[serde(with = "serde_bytes")]
        content: &'a [u8],
        content_type: &'a str,
    }

    #[derive(Serialize)]
    struct OutboundResult<'a> {
        image: OutboundImage<'a>,
    }

    pub fn decode_frame(message: &[u8]) -> Vec<u8> {
        let frame: InboundFrame = rmp_serde::from_slice(message).unwrap();
        frame.image_bytes.into_vec()
    }

    pub fn encode_result(content: &[u8]) -> Vec<u8> {
        rmp_serde::to_vec_named(&OutboundResult {
            image: OutboundImage {
                content,
                content_type: "image/png",
            },
        })
        .unwrap()
    }
}
