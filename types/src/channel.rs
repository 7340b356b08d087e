//! In-memory cross-context channel.
//!
//! Models the frame pipe between a sandboxed game surface and its embedder:
//! byte frames, no delivery or ordering guarantee beyond what the pipe itself
//! provides, and possibly foreign traffic. Each end encodes [`Envelope`]s on
//! send and, on receive, silently drops frames that fail to decode or carry a
//! foreign namespace — recovery from lost frames is the snapshot protocol's
//! job, not the transport's.

use crate::api::{Envelope, Message};
use crate::ClientId;
use bytes::{Bytes, BytesMut};
use commonware_codec::{EncodeSize, ReadExt, Write};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// The peer end has been dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("channel closed")]
pub struct ChannelClosed;

/// One end of the channel.
pub struct ChannelEnd {
    namespace: String,
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

/// Cloneable sending half of a [`ChannelEnd`], for callers that need to send
/// while another task owns the receiving loop.
#[derive(Clone)]
pub struct ChannelSender {
    namespace: String,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSender {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Encode and send one message under this channel's namespace.
    pub fn send(
        &self,
        message: Message,
        request_id: Option<ClientId>,
    ) -> Result<(), ChannelClosed> {
        let mut envelope = Envelope::new(self.namespace.clone(), message);
        envelope.request_id = request_id;
        let mut buf = BytesMut::with_capacity(envelope.encode_size());
        envelope.write(&mut buf);
        self.tx.send(buf.freeze()).map_err(|_| ChannelClosed)
    }
}

/// Build both ends of a channel bound to `namespace`.
pub fn channel_pair(namespace: &str) -> (ChannelEnd, ChannelEnd) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();
    (
        ChannelEnd {
            namespace: namespace.to_owned(),
            tx: left_tx,
            rx: right_rx,
        },
        ChannelEnd {
            namespace: namespace.to_owned(),
            tx: right_tx,
            rx: left_rx,
        },
    )
}

impl ChannelEnd {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// A cloneable handle for sending on this end.
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            namespace: self.namespace.clone(),
            tx: self.tx.clone(),
        }
    }

    /// Encode and send one message under this end's namespace.
    pub fn send(
        &self,
        message: Message,
        request_id: Option<ClientId>,
    ) -> Result<(), ChannelClosed> {
        self.sender().send(message, request_id)
    }

    /// Inject a raw frame, bypassing the envelope codec. Lets tests model
    /// foreign or corrupt traffic sharing the pipe.
    pub fn send_raw(&self, frame: Bytes) -> Result<(), ChannelClosed> {
        self.tx.send(frame).map_err(|_| ChannelClosed)
    }

    /// Receive the next envelope addressed to this namespace. Foreign and
    /// undecodable frames are dropped without surfacing an error. Returns
    /// `None` once the peer end is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let frame = self.rx.recv().await?;
            let mut reader = frame.as_ref();
            let envelope = match Envelope::read(&mut reader) {
                Ok(envelope) => envelope,
                Err(err) => {
                    debug!(len = frame.len(), error = %err, "dropping undecodable frame");
                    continue;
                }
            };
            if !reader.is_empty() {
                debug!(
                    kind = envelope.message.kind(),
                    remaining = reader.len(),
                    "decoded frame with trailing bytes"
                );
            }
            if envelope.namespace != self.namespace {
                trace!(
                    namespace = %envelope.namespace,
                    expected = %self.namespace,
                    "dropping foreign-namespace frame"
                );
                continue;
            }
            return Some(envelope);
        }
    }
}
