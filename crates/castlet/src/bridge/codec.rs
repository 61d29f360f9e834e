//! Newline-delimited JSON codec for worker communication.
//!
//! Wraps `LinesCodec` for framing and adds serde_json serialization, so the
//! correlator only ever sees typed messages. Works over any
//! AsyncRead/AsyncWrite (child stdio, in-memory duplex pipes in tests).

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Longest frame we accept from the worker. Anything larger is discarded up
/// to the next newline, like any other undecodable line.
const MAX_LINE_LEN: usize = 1024 * 1024;

/// Codec that frames messages one-per-line and serializes with JSON.
///
/// Undecodable lines (bad JSON, oversized lines) are logged and skipped —
/// the frame reader must survive worker garbage without losing subsequent
/// frames.
pub struct JsonLineCodec<T> {
    inner: LinesCodec,
    skipped: u64,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonLineCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonLineCodec<T> {
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_LINE_LEN),
            skipped: 0,
            _phantom: PhantomData,
        }
    }

    /// Number of lines dropped because they did not decode.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<T: DeserializeOwned> Decoder for JsonLineCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.inner.decode(src) {
                Ok(Some(line)) => match serde_json::from_str(&line) {
                    Ok(item) => return Ok(Some(item)),
                    Err(e) => {
                        self.skipped += 1;
                        tracing::warn!(error = %e, skipped = self.skipped, "Dropping undecodable frame");
                    }
                },
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    self.skipped += 1;
                    tracing::warn!(
                        max_len = MAX_LINE_LEN,
                        skipped = self.skipped,
                        "Dropping oversized frame"
                    );
                }
                Err(LinesCodecError::Io(e)) => return Err(e),
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonLineCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_string(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.inner.encode(json, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            LinesCodecError::MaxLineLengthExceeded => {
                io::Error::new(io::ErrorKind::InvalidData, "frame exceeds line limit")
            }
        })
    }
}
