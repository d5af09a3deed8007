//! Initiator-side dialog.

use super::DialogHandler;
use crate::channel::connection::{Connection, ConnectionHandler};
use crate::channel::Channel;
use crate::client::ClientInner;
use crate::media::Media;
use crate::message::Message;
use crate::sdp::Desc;
use crate::{Error, Result};
use async_trait::async_trait;
use rsipstack::dialog::client_dialog::ClientInviteDialog;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct DialogClientInner {
    call_id: String,
    local_desc: Desc,
    remote_desc: Desc,
    rtp_port: u16,
    sip_dialog: ClientInviteDialog,
    channel: OnceLock<Channel>,
    media: OnceLock<Media>,
    handler: Arc<dyn DialogHandler>,
    token: CancellationToken,
    closed: AtomicBool,
    client: Weak<ClientInner>,
}

/// One initiated session: SIP dialog, RTP stream and MRCP channel.
///
/// Created by [`crate::Client::dial`]; closing it cascades over all three
/// planes and releases the leased RTP port.
#[derive(Clone)]
pub struct DialogClient {
    inner: Arc<DialogClientInner>,
}

// forwards every frame of the single connection to the dialog's channel
struct ChannelForwarder {
    channel: Channel,
}

#[async_trait]
impl ConnectionHandler for ChannelForwarder {
    async fn on_message(&self, _conn: &Arc<Connection>, msg: Message) {
        self.channel.on_message(msg).await;
    }
}

impl DialogClient {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client: Weak<ClientInner>,
        call_id: String,
        local_desc: Desc,
        remote_desc: Desc,
        rtp_port: u16,
        sip_dialog: ClientInviteDialog,
        handler: Arc<dyn DialogHandler>,
        token: CancellationToken,
    ) -> DialogClient {
        DialogClient {
            inner: Arc::new(DialogClientInner {
                call_id,
                local_desc,
                remote_desc,
                rtp_port,
                sip_dialog,
                channel: OnceLock::new(),
                media: OnceLock::new(),
                handler,
                token,
                closed: AtomicBool::new(false),
                client,
            }),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.inner.call_id
    }

    pub fn local_desc(&self) -> &Desc {
        &self.inner.local_desc
    }

    pub fn remote_desc(&self) -> &Desc {
        &self.inner.remote_desc
    }

    pub fn channel(&self) -> Option<Channel> {
        self.inner.channel.get().cloned()
    }

    pub fn media(&self) -> Option<Media> {
        self.inner.media.get().cloned()
    }

    /// Negotiates codecs, binds the RTP socket and starts the loops the
    /// offered direction asks for.
    pub(crate) async fn init_media(&self) -> Result<()> {
        let media = Media::open(
            self.inner.local_desc.audio.clone(),
            self.inner.remote_desc.audio.clone(),
            self.inner.token.child_token(),
        )
        .await?;
        let _ = self.inner.media.set(media.clone());

        if let Some(handler) = self.inner.handler.on_media_open(&media).await {
            media.start(handler).await?;
        }
        Ok(())
    }

    /// Opens the TCP control connection to the address the answer
    /// advertised and binds the channel under the answered identifier.
    pub(crate) async fn dial_mrcp_server(&self) -> Result<()> {
        if self.inner.channel.get().is_some() {
            return Ok(());
        }
        let control = &self.inner.remote_desc.control;
        let Some(channel_id) = control.channel.clone() else {
            return Err(Error::ChannelIdentifier(
                "missing channel attribute in answer".to_string(),
            ));
        };

        let addr = format!("{}:{}", control.host, control.port);
        let (conn, read_half) =
            Connection::connect(&addr, self.inner.token.child_token()).await?;

        let channel = Channel::new(channel_id);
        let handler = self.inner.handler.on_channel_open(&channel).await;
        channel.bind(conn.clone(), handler);
        let _ = self.inner.channel.set(channel.clone());

        tokio::spawn(conn.serve_loop(read_half, Arc::new(ChannelForwarder { channel })));
        Ok(())
    }

    /// Tears the session down: cancel in-flight work, close media and
    /// channel, hang up the SIP dialog (CANCEL before confirmation, BYE
    /// after), release the RTP port and deregister. Runs at most once, so
    /// concurrent calls are safe.
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
        if let Err(e) = self.inner.sip_dialog.hangup().await {
            warn!(call_id = %self.inner.call_id, error = %e, "failed to hang up sip dialog");
        }
        if let Some(client) = self.inner.client.upgrade() {
            client.porter.free(self.inner.rtp_port);
            client.dialog_layer.remove_dialog(&self.inner.sip_dialog.id());
            client.dialogs.write().unwrap().remove(&self.inner.call_id);
        }
        self.inner.handler.on_close().await;
        info!(call_id = %self.inner.call_id, "dialog closed");
    }
}
