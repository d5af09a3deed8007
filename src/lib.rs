// An MRCPv2 stack in Rust
pub type Result<T> = std::result::Result<T, crate::error::Error>;
pub use crate::error::Error;
pub mod channel;
pub mod client;
pub mod dialog;
pub mod error;
pub mod media;
pub mod message;
pub mod sdp;
pub mod server;

pub use channel::{Channel, ChannelHandler, ChannelId};
pub use client::{Client, ClientOption};
pub use dialog::{DialogClient, DialogHandler, DialogServer};
pub use media::{Media, MediaHandler};
pub use message::{CompletionCause, Message, MessageKind};
pub use sdp::{CodecDesc, ControlDesc, Desc, Direction, MediaDesc, Resource};
pub use server::{Server, ServerHandler, ServerOption};

pub(crate) const DEFAULT_USER_AGENT: &str = "mrcpstack";
pub(crate) const DEFAULT_RTP_PORT_MIN: u16 = 20000;
pub(crate) const DEFAULT_RTP_PORT_MAX: u16 = 40000;
