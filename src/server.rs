//! Responder façade.

use crate::channel::connection::{Connection, ConnectionHandler};
use crate::channel::ChannelId;
use crate::dialog::{DialogHandler, DialogServer};
use crate::media::porter::Porter;
use crate::message::{headers, Message};
use crate::sdp::{
    default_audio_codecs, CodecDesc, ControlDesc, Desc, Direction, MediaDesc, CONNECTION_NEW,
    PROTO_TCP_MRCPV2, SETUP_PASSIVE,
};
use crate::{Result, DEFAULT_RTP_PORT_MAX, DEFAULT_RTP_PORT_MIN, DEFAULT_USER_AGENT};
use async_trait::async_trait;
use rsip::prelude::{HeadersExt, UntypedHeader};
use rsipstack::dialog::dialog::{DialogState, DialogStateReceiver, DialogStateSender};
use rsipstack::dialog::dialog_layer::DialogLayer;
use rsipstack::transaction::TransactionReceiver;
use rsipstack::transport::{udp::UdpConnection, TransportLayer};
use rsipstack::EndpointBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, Weak};
use tokio::net::TcpListener;
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Application hook deciding what happens to each incoming session.
#[async_trait]
pub trait ServerHandler: Send + Sync {
    /// Invoked for every new INVITE before media and channel setup. The
    /// returned handler owns the dialog's callbacks; an error rejects the
    /// session.
    async fn on_dialog_create(&self, dialog: &DialogServer) -> Result<Arc<dyn DialogHandler>>;
}

/// Configuration of a [`Server`]. Zero values fall back to the defaults.
pub struct ServerOption {
    /// Local host, default `127.0.0.1`.
    pub host: String,
    /// SIP port, default 5060.
    pub sip_port: u16,
    /// MRCP control port, default 1544.
    pub mrcp_port: u16,
    /// SIP user agent, also the username offered in SDP origin lines.
    pub user_agent: String,
    /// Codecs supported for audio, default PCMU, PCMA and telephone-event.
    pub audio_codecs: Vec<CodecDesc>,
    /// RTP port range, default `[20000, 40000)`.
    pub rtp_port_min: u16,
    pub rtp_port_max: u16,
}

impl Default for ServerOption {
    fn default() -> Self {
        ServerOption {
            host: "127.0.0.1".to_string(),
            sip_port: 5060,
            mrcp_port: 1544,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            audio_codecs: default_audio_codecs(),
            rtp_port_min: DEFAULT_RTP_PORT_MIN,
            rtp_port_max: DEFAULT_RTP_PORT_MAX,
        }
    }
}

fn normalize(mut opt: ServerOption) -> ServerOption {
    let defaults = ServerOption::default();
    if opt.host.is_empty() {
        opt.host = defaults.host;
    }
    if opt.sip_port == 0 {
        opt.sip_port = defaults.sip_port;
    }
    if opt.mrcp_port == 0 {
        opt.mrcp_port = defaults.mrcp_port;
    }
    if opt.user_agent.is_empty() {
        opt.user_agent = defaults.user_agent;
    }
    if opt.audio_codecs.is_empty() {
        opt.audio_codecs = defaults.audio_codecs;
    }
    if opt.rtp_port_min == 0 {
        opt.rtp_port_min = defaults.rtp_port_min;
    }
    if opt.rtp_port_max == 0 {
        opt.rtp_port_max = defaults.rtp_port_max;
    }
    opt
}

pub(crate) struct ServerInner {
    pub(crate) opt: ServerOption,
    pub(crate) porter: Porter,
    pub(crate) dialog_layer: Arc<DialogLayer>,
    /// Dialogs by SIP Call-ID.
    pub(crate) dialogs: RwLock<HashMap<String, DialogServer>>,
    /// Dialogs by the opaque part of their channel identifier, the
    /// demultiplex key for inbound MRCP connections.
    pub(crate) channels: RwLock<HashMap<String, DialogServer>>,
    pub(crate) handler: Arc<dyn ServerHandler>,
    pub(crate) token: CancellationToken,
    state_sender: DialogStateSender,
    contact: rsip::Uri,
}

/// The responder façade: a SIP user agent answering INVITEs with hosted
/// speech resources, plus the TCP listener accepting MRCP control
/// connections.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Binds the SIP and MRCP transports and starts serving in the
    /// background. [`Server::close`] shuts the whole agent down.
    pub async fn new(opt: ServerOption, handler: Arc<dyn ServerHandler>) -> Result<Server> {
        let opt = normalize(opt);
        let porter = Porter::new(opt.rtp_port_min, opt.rtp_port_max)?;
        let token = CancellationToken::new();

        let local_addr: SocketAddr = format!("{}:{}", opt.host, opt.sip_port).parse()?;
        let transport_layer = TransportLayer::new(token.child_token());
        let connection =
            UdpConnection::create_connection(local_addr, None, Some(token.child_token())).await?;
        transport_layer.add_transport(connection.into());

        let endpoint = EndpointBuilder::new()
            .with_user_agent(&opt.user_agent)
            .with_cancel_token(token.child_token())
            .with_transport_layer(transport_layer)
            .build();
        let incoming = endpoint.incoming_transactions()?;
        let dialog_layer = Arc::new(DialogLayer::new(endpoint.inner.clone()));

        let (state_sender, state_receiver) = unbounded_channel();

        let contact = rsip::Uri {
            scheme: Some(rsip::Scheme::Sip),
            auth: Some(rsip::Auth {
                user: opt.user_agent.clone(),
                password: None,
            }),
            host_with_port: rsip::HostWithPort::try_from(local_addr.to_string().as_str())?,
            params: vec![],
            headers: vec![],
        };

        let listener = TcpListener::bind((opt.host.as_str(), opt.mrcp_port)).await?;
        info!(listen = %format!("{}:{}", opt.host, opt.mrcp_port), "mrcp server listening");

        let inner = Arc::new(ServerInner {
            opt,
            porter,
            dialog_layer,
            dialogs: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            handler,
            token,
            state_sender,
            contact,
        });

        tokio::spawn(async move {
            endpoint.serve().await;
        });
        tokio::spawn(process_incoming(inner.clone(), incoming));
        tokio::spawn(process_state(inner.clone(), state_receiver));
        tokio::spawn(accept_loop(inner.clone(), listener));

        info!(listen = %local_addr, "sip server started");
        Ok(Server { inner })
    }

    /// Cancels the user agent and every loop spawned under it.
    pub fn close(&self) {
        self.inner.token.cancel();
        info!("sip server closed");
    }
}

fn local_desc_template(inner: &ServerInner) -> Desc {
    Desc {
        user_agent: inner.opt.user_agent.clone(),
        host: inner.opt.host.clone(),
        audio: MediaDesc {
            host: inner.opt.host.clone(),
            port: 0,
            direction: Direction::Inactive,
            ptime: 20,
            codecs: inner.opt.audio_codecs.clone(),
        },
        control: ControlDesc {
            host: inner.opt.host.clone(),
            port: inner.opt.mrcp_port,
            proto: PROTO_TCP_MRCPV2.to_string(),
            setup: SETUP_PASSIVE.to_string(),
            connection: CONNECTION_NEW.to_string(),
            channel: None,
            resource: None,
        },
    }
}

async fn process_incoming(inner: Arc<ServerInner>, mut incoming: TransactionReceiver) {
    while let Some(mut tx) = incoming.recv().await {
        let in_dialog = tx
            .original
            .to_header()
            .ok()
            .and_then(|to| to.tag().ok())
            .flatten()
            .is_some();

        if in_dialog {
            if tx.original.method == rsip::Method::Invite {
                // re-INVITE, handled at the session layer
                let call_id = tx
                    .original
                    .call_id_header()
                    .ok()
                    .map(|h| h.value().to_string());
                let dialog = call_id
                    .and_then(|id| inner.dialogs.read().unwrap().get(&id).cloned());
                if let Some(dialog) = dialog {
                    tokio::spawn(async move {
                        if let Err(e) = dialog.on_reinvite(&mut tx).await {
                            warn!(call_id = %dialog.call_id(), error = %e, "failed to handle re-invite");
                        }
                    });
                    continue;
                }
            }
            if let Some(mut dialog) = inner.dialog_layer.match_dialog(&tx.original) {
                tokio::spawn(async move {
                    if let Err(e) = dialog.handle(&mut tx).await {
                        warn!(error = %e, "failed to handle in-dialog request");
                    }
                });
                continue;
            }
        }

        match tx.original.method {
            rsip::Method::Invite => {
                let call_id = match tx.original.call_id_header() {
                    Ok(h) => h.value().to_string(),
                    Err(e) => {
                        warn!(error = %e, "invite without call id");
                        if let Err(e) = tx.reply(rsip::StatusCode::ServerInternalError).await {
                            warn!(error = %e, "failed to reply 500");
                        }
                        continue;
                    }
                };
                let mut sip_dialog = match inner.dialog_layer.get_or_create_server_invite(
                    &tx,
                    inner.state_sender.clone(),
                    None,
                    Some(inner.contact.clone()),
                ) {
                    Ok(d) => d,
                    Err(e) => {
                        error!(call_id = %call_id, error = %e, "failed to create server dialog");
                        if let Err(e) = tx.reply(rsip::StatusCode::ServerInternalError).await {
                            warn!(error = %e, "failed to reply 500");
                        }
                        continue;
                    }
                };
                let dialog = DialogServer::new(
                    Arc::downgrade(&inner),
                    call_id.clone(),
                    local_desc_template(&inner),
                    sip_dialog.clone(),
                    inner.token.child_token(),
                );
                inner.dialogs.write().unwrap().insert(call_id, dialog);
                tokio::spawn(async move {
                    if let Err(e) = sip_dialog.handle(&mut tx).await {
                        warn!(error = %e, "invite transaction ended with error");
                    }
                });
            }
            rsip::Method::Bye => {
                // unknown dialog, answer it anyway
                if let Err(e) = tx.reply(rsip::StatusCode::OK).await {
                    warn!(error = %e, "failed to reply to bye");
                }
            }
            rsip::Method::Ack => {}
            method => {
                warn!(%method, "sip request handler not found");
                if let Err(e) = tx.reply(rsip::StatusCode::MethodNotAllowed).await {
                    warn!(error = %e, "failed to reply 405");
                }
            }
        }
    }
}

async fn process_state(inner: Arc<ServerInner>, mut receiver: DialogStateReceiver) {
    while let Some(state) = receiver.recv().await {
        match state {
            DialogState::Calling(id) => {
                let dialog = inner.dialogs.read().unwrap().get(&id.call_id).cloned();
                let Some(dialog) = dialog else {
                    warn!(dialog = %id, "dialog not found");
                    continue;
                };
                tokio::spawn(async move {
                    if let Err(e) = dialog.on_invite().await {
                        error!(call_id = %dialog.call_id(), error = %e, "failed to set up dialog");
                        dialog.reject();
                        dialog.close().await;
                    }
                });
            }
            DialogState::Terminated(id, reason) => {
                info!(dialog = %id, reason = ?reason, "sip dialog terminated");
                inner.dialog_layer.remove_dialog(&id);
                let dialog = inner.dialogs.read().unwrap().get(&id.call_id).cloned();
                if let Some(dialog) = dialog {
                    dialog.close().await;
                }
            }
            _ => {}
        }
    }
}

async fn accept_loop(inner: Arc<ServerInner>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = inner.token.cancelled() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!(peer = %peer, "mrcp connection accepted");
                        let (conn, read_half) = Connection::new(stream, inner.token.child_token());
                        let dispatcher = Arc::new(ServerDispatcher {
                            inner: Arc::downgrade(&inner),
                        });
                        tokio::spawn(conn.serve_loop(read_half, dispatcher));
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept mrcp connection");
                        return;
                    }
                }
            }
        }
    }
}

/// Routes each inbound frame to the channel named by its
/// `Channel-Identifier`; the first frame for a still unbound channel binds
/// the connection to it.
struct ServerDispatcher {
    inner: Weak<ServerInner>,
}

#[async_trait]
impl ConnectionHandler for ServerDispatcher {
    async fn on_message(&self, conn: &Arc<Connection>, msg: Message) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let Some(raw) = msg.header(headers::CHANNEL_IDENTIFIER) else {
            warn!(peer = ?conn.peer_addr(), "mrcp message without channel identifier");
            return;
        };
        let channel_id = match raw.parse::<ChannelId>() {
            Ok(id) => id,
            Err(e) => {
                warn!(peer = ?conn.peer_addr(), error = %e, "bad channel identifier");
                return;
            }
        };
        let dialog = inner.channels.read().unwrap().get(&channel_id.id).cloned();
        let Some(dialog) = dialog else {
            warn!(channel = %channel_id, "no such channel");
            return;
        };
        let Some(channel) = dialog.channel() else {
            return;
        };
        if !channel.bound() {
            let handler = match dialog.handler() {
                Some(handler) => handler.on_channel_open(&channel).await,
                None => None,
            };
            channel.bind(conn.clone(), handler);
        }
        channel.on_message(msg).await;
    }
}
