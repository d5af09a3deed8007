//! Logical MRCPv2 channels.
//!
//! A [`Channel`] is one end of the MRCP control plane of a session,
//! identified on the wire as `id@resource`. It mints outbound messages with
//! monotonically increasing request ids, stamps every one of them with the
//! `Channel-Identifier` header, and forwards inbound messages to the
//! application handler. The TCP transport behind it lives in
//! [`connection`]; a channel starts unbound on the server side and is bound
//! to the first connection that presents its identifier.

use crate::message::{headers, Message, MessageKind};
use crate::sdp::Resource;
use crate::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

pub(crate) mod connection;

#[cfg(test)]
mod tests;

use connection::Connection;

/// Routing key for MRCP messages, wire form `id@resource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelId {
    pub id: String,
    pub resource: Resource,
}

impl ChannelId {
    pub fn new(id: impl Into<String>, resource: Resource) -> ChannelId {
        ChannelId {
            id: id.into(),
            resource,
        }
    }

    /// Mints a fresh identifier with a random opaque part.
    pub(crate) fn generate(resource: Resource) -> ChannelId {
        ChannelId::new(random_id(10), resource)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.resource)
    }
}

impl FromStr for ChannelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((id, resource)) = s.split_once('@') else {
            return Err(Error::ChannelIdentifier(s.to_string()));
        };
        if id.is_empty() {
            return Err(Error::ChannelIdentifier(s.to_string()));
        }
        let resource = resource
            .parse::<Resource>()
            .map_err(|_| Error::ChannelIdentifier(s.to_string()))?;
        Ok(ChannelId::new(id, resource))
    }
}

pub(crate) fn random_id(len: usize) -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}

/// Handler for MRCP messages delivered on a channel.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    async fn on_message(&self, channel: &Channel, msg: Message);
}

struct ChannelInner {
    id: ChannelId,
    // outbound request-id counter, the next request takes current + 1
    request_id: AtomicU32,
    // most recently observed request id in either direction
    last_request_id: AtomicU32,
    connection: OnceLock<Arc<Connection>>,
    handler: OnceLock<Arc<dyn ChannelHandler>>,
    closed: AtomicBool,
}

/// The logical MRCPv2 endpoint of one session.
///
/// Cheap to clone; all clones address the same channel. Outbound requests
/// carry the strictly increasing sequence 1, 2, 3, … of this channel.
/// Correlation of responses to outstanding requests is left to the
/// application, this is a transport layer.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    pub(crate) fn new(id: ChannelId) -> Channel {
        Channel {
            inner: Arc::new(ChannelInner {
                id,
                request_id: AtomicU32::new(0),
                last_request_id: AtomicU32::new(0),
                connection: OnceLock::new(),
                handler: OnceLock::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.inner.id
    }

    pub fn resource(&self) -> Resource {
        self.inner.id.resource
    }

    /// Builds an empty request for `method` with the next request id.
    pub fn new_request(&self, method: &str) -> Message {
        let request_id = self.inner.request_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .last_request_id
            .store(request_id, Ordering::Relaxed);
        let mut msg = Message::new_request(method, request_id);
        msg.set_header(headers::CHANNEL_IDENTIFIER, self.inner.id.to_string());
        msg
    }

    /// Builds a response echoing the request's id. The outbound counter is
    /// left untouched so locally minted requests keep strictly increasing.
    pub fn new_response(&self, req: &Message, status_code: u16, request_state: &str) -> Message {
        let mut msg = Message::new_response(req.request_id(), status_code, request_state);
        msg.set_header(headers::CHANNEL_IDENTIFIER, self.inner.id.to_string());
        msg
    }

    /// Builds an event inheriting the last observed request id.
    pub fn new_event(&self, event: &str, request_state: &str) -> Message {
        let request_id = self.inner.last_request_id.load(Ordering::Relaxed);
        let mut msg = Message::new_event(event, request_id, request_state);
        msg.set_header(headers::CHANNEL_IDENTIFIER, self.inner.id.to_string());
        msg
    }

    /// Writes the message as one frame on the owning connection.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        let conn = self.inner.connection.get().ok_or(Error::ChannelUnbound)?;
        conn.send(msg).await
    }

    /// Closes the underlying connection. Safe to call more than once.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(conn) = self.inner.connection.get() {
            conn.close().await;
        }
    }

    pub(crate) fn bound(&self) -> bool {
        self.inner.connection.get().is_some()
    }

    /// Binds the channel to its transport. The first bind wins, later calls
    /// are ignored.
    pub(crate) fn bind(&self, conn: Arc<Connection>, handler: Option<Arc<dyn ChannelHandler>>) {
        if self.inner.connection.set(conn).is_err() {
            debug!(channel = %self.inner.id, "channel already bound");
            return;
        }
        if let Some(handler) = handler {
            let _ = self.inner.handler.set(handler);
        }
    }

    pub(crate) async fn on_message(&self, msg: Message) {
        if msg.kind() == MessageKind::Request {
            self.inner
                .last_request_id
                .store(msg.request_id(), Ordering::Relaxed);
        }
        if let Some(handler) = self.inner.handler.get() {
            handler.on_message(self, msg).await;
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("bound", &self.bound())
            .finish()
    }
}
