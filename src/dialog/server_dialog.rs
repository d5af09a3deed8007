//! Responder-side dialog.

use super::{server_direction, DialogHandler};
use crate::channel::{Channel, ChannelId};
use crate::media::Media;
use crate::sdp::{Desc, Direction};
use crate::server::ServerInner;
use crate::{Error, Result};
use rsipstack::dialog::server_dialog::ServerInviteDialog;
use rsipstack::transaction::transaction::Transaction;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct DialogServerInner {
    call_id: String,
    local_desc: Mutex<Desc>,
    remote_desc: Mutex<Desc>,
    rtp_port: OnceLock<u16>,
    sip_dialog: ServerInviteDialog,
    channel: OnceLock<Channel>,
    media: OnceLock<Media>,
    handler: OnceLock<Arc<dyn DialogHandler>>,
    token: CancellationToken,
    closed: AtomicBool,
    server: Weak<ServerInner>,
}

/// One accepted session on the server side.
///
/// The channel is minted here and sits unbound in the server's channel
/// index until the peer connects and its first message carries the matching
/// `Channel-Identifier`.
#[derive(Clone)]
pub struct DialogServer {
    inner: Arc<DialogServerInner>,
}

pub(crate) struct ReinviteAction {
    pub(crate) close_channel: bool,
    pub(crate) close_media: bool,
}

/// A re-INVITE only ever narrows the session: a zeroed control port closes
/// the MRCP channel, a zeroed audio port closes the stream and flips the
/// local direction to inactive. Other modifications are not supported.
pub(crate) fn apply_reinvite(local: &mut Desc, remote: &Desc) -> ReinviteAction {
    let mut action = ReinviteAction {
        close_channel: false,
        close_media: false,
    };
    if remote.control.port == 0 {
        local.control.port = 0;
        action.close_channel = true;
    }
    if remote.audio.port == 0 {
        local.audio.port = 0;
        local.audio.direction = Direction::Inactive;
        action.close_media = true;
    }
    action
}

impl DialogServer {
    pub(crate) fn new(
        server: Weak<ServerInner>,
        call_id: String,
        local_desc: Desc,
        sip_dialog: ServerInviteDialog,
        token: CancellationToken,
    ) -> DialogServer {
        DialogServer {
            inner: Arc::new(DialogServerInner {
                call_id,
                local_desc: Mutex::new(local_desc),
                remote_desc: Mutex::new(Desc::default()),
                rtp_port: OnceLock::new(),
                sip_dialog,
                channel: OnceLock::new(),
                media: OnceLock::new(),
                handler: OnceLock::new(),
                token,
                closed: AtomicBool::new(false),
                server,
            }),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.inner.call_id
    }

    pub fn channel(&self) -> Option<Channel> {
        self.inner.channel.get().cloned()
    }

    pub fn media(&self) -> Option<Media> {
        self.inner.media.get().cloned()
    }

    pub fn local_desc(&self) -> Desc {
        self.inner.local_desc.lock().unwrap().clone()
    }

    pub fn remote_desc(&self) -> Desc {
        self.inner.remote_desc.lock().unwrap().clone()
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn DialogHandler>> {
        self.inner.handler.get().cloned()
    }

    pub(crate) fn reject(&self) {
        if let Err(e) = self.inner.sip_dialog.reject(None, None) {
            warn!(call_id = %self.inner.call_id, error = %e, "failed to reject invite");
        }
    }

    /// Responder setup: parse the offer, derive the local direction from
    /// the requested resource, run the application hook, mint and index the
    /// channel, lease an RTP port, open media, and answer with an SDP that
    /// advertises exactly the negotiated codecs.
    pub(crate) async fn on_invite(&self) -> Result<()> {
        let server = self
            .inner
            .server
            .upgrade()
            .ok_or_else(|| Error::Dialog("server is gone".to_string()))?;

        let rdesc = Desc::parse(self.inner.sip_dialog.initial_request().body())?;
        let resource = rdesc.control.resource.ok_or_else(|| {
            Error::UnsupportedResource("missing or unknown control resource".to_string())
        })?;
        *self.inner.remote_desc.lock().unwrap() = rdesc;

        {
            let mut ldesc = self.inner.local_desc.lock().unwrap();
            ldesc.audio.direction = server_direction(resource);
            ldesc.control.resource = Some(resource);
        }

        let handler = server.handler.on_dialog_create(self).await?;
        let _ = self.inner.handler.set(handler);

        let channel = Channel::new(ChannelId::generate(resource));
        self.inner.local_desc.lock().unwrap().control.channel = Some(channel.id().clone());
        let opaque_id = channel.id().id.clone();
        let _ = self.inner.channel.set(channel);
        server.channels.write().unwrap().insert(opaque_id, self.clone());

        let port = server.porter.get()?;
        let _ = self.inner.rtp_port.set(port);
        self.inner.local_desc.lock().unwrap().audio.port = port;

        let (local_audio, remote_audio) = {
            let ldesc = self.inner.local_desc.lock().unwrap();
            let rdesc = self.inner.remote_desc.lock().unwrap();
            (ldesc.audio.clone(), rdesc.audio.clone())
        };
        let media = Media::open(local_audio, remote_audio, self.inner.token.child_token()).await?;
        let _ = self.inner.media.set(media.clone());

        {
            let mut ldesc = self.inner.local_desc.lock().unwrap();
            ldesc.audio.codecs = vec![media.audio_codec().clone()];
            if let Some(event) = media.event_codec() {
                ldesc.audio.codecs.push(event.clone());
            }
        }

        if let Some(handler) = self.inner.handler.get() {
            if let Some(media_handler) = handler.on_media_open(&media).await {
                media.start(media_handler).await?;
            }
        }

        let answer = self.inner.local_desc.lock().unwrap().render();
        let headers = vec![rsip::Header::ContentType("application/sdp".into())];
        self.inner.sip_dialog.accept(Some(headers), Some(answer))?;

        info!(call_id = %self.inner.call_id, resource = %resource, "dialog accepted");
        Ok(())
    }

    /// In-dialog re-INVITE: the peer zeroes a media port to tear that
    /// stream down; answer with the narrowed local description.
    pub(crate) async fn on_reinvite(&self, tx: &mut Transaction) -> Result<()> {
        tx.send_trying().await?;

        let rdesc = match Desc::parse(&tx.original.body) {
            Ok(d) => d,
            Err(e) => {
                tx.reply(rsip::StatusCode::ServerInternalError).await?;
                return Err(e);
            }
        };

        let action = {
            let mut ldesc = self.inner.local_desc.lock().unwrap();
            apply_reinvite(&mut ldesc, &rdesc)
        };
        *self.inner.remote_desc.lock().unwrap() = rdesc;

        if action.close_channel {
            if let Some(channel) = self.inner.channel.get() {
                channel.close().await;
            }
        }
        if action.close_media {
            if let Some(media) = self.inner.media.get() {
                media.close();
            }
        }

        let answer = self.inner.local_desc.lock().unwrap().render();
        let headers = vec![rsip::Header::ContentType("application/sdp".into())];
        tx.reply_with(rsip::StatusCode::OK, headers, Some(answer))
            .await?;
        Ok(())
    }

    /// Teardown in fixed order: cancel, close media, close channel, BYE if
    /// the SIP dialog is confirmed, release the port, deregister, notify
    /// the application. Runs at most once.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.token.cancel();
        if let Some(media) = self.inner.media.get() {
            media.close();
        }
        if let Some(channel) = self.inner.channel.get() {
            channel.close().await;
        }
        if let Err(e) = self.inner.sip_dialog.bye().await {
            warn!(call_id = %self.inner.call_id, error = %e, "failed to send bye");
        }
        if let Some(server) = self.inner.server.upgrade() {
            if let Some(port) = self.inner.rtp_port.get() {
                server.porter.free(*port);
            }
            server.dialog_layer.remove_dialog(&self.inner.sip_dialog.id());
            server.dialogs.write().unwrap().remove(&self.inner.call_id);
            if let Some(channel) = self.inner.channel.get() {
                server.channels.write().unwrap().remove(&channel.id().id);
            }
        }
        if let Some(handler) = self.inner.handler.get() {
            handler.on_close().await;
        }
        info!(call_id = %self.inner.call_id, "dialog closed");
    }
}
