//! Initiator façade.

use crate::dialog::{client_direction, DialogClient, DialogHandler};
use crate::media::porter::Porter;
use crate::sdp::{
    default_audio_codecs, CodecDesc, ControlDesc, Desc, MediaDesc, Resource, CONNECTION_NEW,
    PROTO_TCP_MRCPV2, SETUP_ACTIVE,
};
use crate::{Error, Result, DEFAULT_RTP_PORT_MAX, DEFAULT_RTP_PORT_MIN, DEFAULT_USER_AGENT};
use rsip::prelude::HeadersExt;
use rsipstack::dialog::dialog::{DialogState, DialogStateReceiver, DialogStateSender};
use rsipstack::dialog::dialog_layer::DialogLayer;
use rsipstack::dialog::invitation::InviteOption;
use rsipstack::transaction::TransactionReceiver;
use rsipstack::transport::{udp::UdpConnection, TransportLayer};
use rsipstack::EndpointBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Configuration of a [`Client`]. Zero values fall back to the defaults.
pub struct ClientOption {
    /// Local host, default `127.0.0.1`.
    pub host: String,
    /// SIP port, default 5060.
    pub sip_port: u16,
    /// SIP user agent, also the username offered in SDP origin lines.
    pub user_agent: String,
    /// Codecs offered for audio, default PCMU, PCMA and telephone-event.
    pub audio_codecs: Vec<CodecDesc>,
    /// RTP port range, default `[20000, 40000)`.
    pub rtp_port_min: u16,
    pub rtp_port_max: u16,
}

impl Default for ClientOption {
    fn default() -> Self {
        ClientOption {
            host: "127.0.0.1".to_string(),
            sip_port: 5060,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            audio_codecs: default_audio_codecs(),
            rtp_port_min: DEFAULT_RTP_PORT_MIN,
            rtp_port_max: DEFAULT_RTP_PORT_MAX,
        }
    }
}

fn normalize(mut opt: ClientOption) -> ClientOption {
    let defaults = ClientOption::default();
    if opt.host.is_empty() {
        opt.host = defaults.host;
    }
    if opt.sip_port == 0 {
        opt.sip_port = defaults.sip_port;
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

pub(crate) struct ClientInner {
    pub(crate) opt: ClientOption,
    pub(crate) porter: Porter,
    pub(crate) dialog_layer: Arc<DialogLayer>,
    pub(crate) dialogs: RwLock<HashMap<String, DialogClient>>,
    pub(crate) token: CancellationToken,
    state_sender: DialogStateSender,
    contact: rsip::Uri,
}

/// The initiator façade: owns the SIP user agent and the RTP port
/// allocator, dials remote speech resources and routes inbound SIP traffic
/// to the dialog it belongs to.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Binds the SIP transport and starts serving in the background. The
    /// returned handle is cheap to clone; [`Client::close`] shuts the whole
    /// agent down.
    pub async fn new(opt: ClientOption) -> Result<Client> {
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

        let inner = Arc::new(ClientInner {
            opt,
            porter,
            dialog_layer,
            dialogs: RwLock::new(HashMap::new()),
            token,
            state_sender,
            contact,
        });

        tokio::spawn(async move {
            endpoint.serve().await;
        });
        tokio::spawn(process_incoming(inner.clone(), incoming));
        tokio::spawn(process_state(inner.clone(), state_receiver));

        info!(listen = %local_addr, "sip client started");
        Ok(Client { inner })
    }

    /// Establishes a session with the remote speech resource at `raddr`
    /// (`host:port`): SDP offer/answer over SIP, then the RTP socket, then
    /// the MRCP control connection. Any failure rolls the whole setup back.
    pub async fn dial(
        &self,
        raddr: &str,
        resource: Resource,
        handler: Arc<dyn DialogHandler>,
    ) -> Result<DialogClient> {
        let inner = &self.inner;
        let rtp_port = inner.porter.get()?;

        let local_desc = Desc {
            user_agent: inner.opt.user_agent.clone(),
            host: inner.opt.host.clone(),
            audio: MediaDesc {
                host: inner.opt.host.clone(),
                port: rtp_port,
                direction: client_direction(resource),
                ptime: 20,
                codecs: inner.opt.audio_codecs.clone(),
            },
            control: ControlDesc {
                host: inner.opt.host.clone(),
                // the offered control port is the discard port, the
                // initiator connects out rather than listening
                port: 9,
                proto: PROTO_TCP_MRCPV2.to_string(),
                setup: SETUP_ACTIVE.to_string(),
                connection: CONNECTION_NEW.to_string(),
                channel: None,
                resource: Some(resource),
            },
        };

        let callee = match rsip::Uri::try_from(format!("sip:{raddr}").as_str()) {
            Ok(uri) => uri,
            Err(e) => {
                inner.porter.free(rtp_port);
                return Err(e.into());
            }
        };

        let invite_option = InviteOption {
            caller: inner.contact.clone(),
            callee,
            content_type: Some("application/sdp".to_string()),
            offer: Some(local_desc.render()),
            contact: inner.contact.clone(),
            credential: None,
            ..Default::default()
        };

        let (sip_dialog, resp) = match inner
            .dialog_layer
            .do_invite(invite_option, inner.state_sender.clone())
            .await
        {
            Ok(done) => done,
            Err(e) => {
                inner.porter.free(rtp_port);
                return Err(e.into());
            }
        };

        let resp = match resp {
            Some(resp) if resp.status_code == rsip::StatusCode::OK => resp,
            other => {
                inner.porter.free(rtp_port);
                let status = other.map(|r| r.status_code.to_string());
                return Err(Error::Dialog(format!(
                    "invite not accepted: {}",
                    status.as_deref().unwrap_or("no response")
                )));
            }
        };

        let remote_desc = match Desc::parse(resp.body()) {
            Ok(desc) => desc,
            Err(e) => {
                error!(error = %e, "failed to parse answer sdp");
                inner.porter.free(rtp_port);
                if let Err(e) = sip_dialog.hangup().await {
                    warn!(error = %e, "failed to hang up sip dialog");
                }
                return Err(e);
            }
        };

        let call_id = sip_dialog.id().call_id.clone();
        let dialog = DialogClient::new(
            Arc::downgrade(inner),
            call_id.clone(),
            local_desc,
            remote_desc,
            rtp_port,
            sip_dialog,
            handler,
            inner.token.child_token(),
        );
        inner
            .dialogs
            .write()
            .unwrap()
            .insert(call_id, dialog.clone());

        if let Err(e) = dialog.init_media().await {
            dialog.close().await;
            return Err(e);
        }
        if let Err(e) = dialog.dial_mrcp_server().await {
            dialog.close().await;
            return Err(e);
        }
        Ok(dialog)
    }

    /// Cancels the user agent and every loop spawned under it.
    pub fn close(&self) {
        self.inner.token.cancel();
        info!("sip client closed");
    }
}

async fn process_incoming(inner: Arc<ClientInner>, mut incoming: TransactionReceiver) {
    while let Some(mut tx) = incoming.recv().await {
        let in_dialog = tx
            .original
            .to_header()
            .ok()
            .and_then(|to| to.tag().ok())
            .flatten()
            .is_some();
        if in_dialog {
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

async fn process_state(inner: Arc<ClientInner>, mut receiver: DialogStateReceiver) {
    while let Some(state) = receiver.recv().await {
        if let DialogState::Terminated(id, reason) = state {
            info!(dialog = %id, reason = ?reason, "sip dialog terminated");
            inner.dialog_layer.remove_dialog(&id);
            let dialog = inner.dialogs.read().unwrap().get(&id.call_id).cloned();
            if let Some(dialog) = dialog {
                dialog.close().await;
            }
        }
    }
}
