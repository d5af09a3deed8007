//! Session orchestration.
//!
//! A dialog couples the three planes of one MRCPv2 session: the SIP dialog
//! carrying session state, the SDP-described RTP audio stream, and the TCP
//! control channel. [`DialogClient`] drives the initiator flow,
//! [`DialogServer`] the responder flow; both own their channel, media and
//! leased RTP port exclusively and tear everything down exactly once, in a
//! fixed order, whichever side ends the session first.

use crate::channel::{Channel, ChannelHandler};
use crate::media::{Media, MediaHandler};
use crate::sdp::{Direction, Resource};
use async_trait::async_trait;
use std::sync::Arc;

pub mod client_dialog;
pub mod server_dialog;

#[cfg(test)]
mod tests;

pub use client_dialog::DialogClient;
pub use server_dialog::DialogServer;

/// Per-dialog application callbacks.
///
/// Returning `None` from an open hook leaves the corresponding plane
/// running without application involvement: media loops stay unstarted,
/// channel messages are dropped.
#[async_trait]
pub trait DialogHandler: Send + Sync {
    /// The media endpoint opened; the returned handler feeds and drains RTP.
    async fn on_media_open(&self, _media: &Media) -> Option<Arc<dyn MediaHandler>> {
        None
    }

    /// The MRCP channel got bound to its transport.
    async fn on_channel_open(&self, _channel: &Channel) -> Option<Arc<dyn ChannelHandler>> {
        None
    }

    /// The dialog finished its teardown. Called exactly once.
    async fn on_close(&self) {}
}

/// Audio direction the initiator offers for a resource: recognition sends
/// audio to the peer, synthesis receives it.
pub(crate) fn client_direction(resource: Resource) -> Direction {
    match resource {
        Resource::Speechrecog => Direction::Sendonly,
        Resource::Speechsynth => Direction::Recvonly,
    }
}

/// Mirror image of [`client_direction`], derived from the resource the
/// remote side asked for.
pub(crate) fn server_direction(resource: Resource) -> Direction {
    match resource {
        Resource::Speechrecog => Direction::Recvonly,
        Resource::Speechsynth => Direction::Sendonly,
    }
}
