//! RTP media endpoint.
//!
//! [`Media`] owns the per-session UDP socket and runs up to one receive
//! loop and one paced send loop, chosen by the local direction attribute.
//! The endpoint is transport-only: RTP headers are built and consumed by
//! the application handler, the loops move opaque datagrams.
//!
//! The remote address starts as the one the peer's SDP declared and is
//! replaced by the source of the first inbound datagram, so media keeps
//! flowing when the peer sits behind a NAT.

use crate::sdp::{CodecDesc, MediaDesc};
use crate::{Error, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, error};

pub(crate) mod porter;

#[cfg(test)]
mod tests;

/// Application hooks feeding and draining the RTP stream.
///
/// `read_rtp_packet` returning `None` ends the send loop;
/// `write_rtp_packet` returning `false` ends the receive loop.
#[async_trait]
pub trait MediaHandler: Send + Sync {
    /// Called once before the send loop starts.
    async fn start_tx(&self, _media: &Media, _codec: &CodecDesc) -> Result<()> {
        Ok(())
    }

    /// Pulls the next RTP packet to transmit.
    async fn read_rtp_packet(&self, _media: &Media) -> Option<Vec<u8>> {
        None
    }

    /// Called once before the receive loop starts.
    async fn start_rx(&self, _media: &Media, _codec: &CodecDesc) -> Result<()> {
        Ok(())
    }

    /// Delivers one received RTP packet.
    async fn write_rtp_packet(&self, _media: &Media, _packet: &[u8]) -> bool {
        false
    }
}

struct MediaInner {
    socket: UdpSocket,
    remote: Mutex<SocketAddr>,
    // flips on the first inbound datagram, after which `remote` holds the
    // observed source instead of the SDP-declared address
    remote_verified: AtomicBool,
    local_desc: MediaDesc,
    remote_desc: MediaDesc,
    audio_codec: CodecDesc,
    event_codec: Option<CodecDesc>,
    token: tokio_util::sync::CancellationToken,
    started: AtomicBool,
}

/// One session's RTP endpoint. Cheap to clone.
#[derive(Clone)]
pub struct Media {
    inner: Arc<MediaInner>,
}

impl Media {
    /// Negotiates codecs and binds the UDP socket. Loops are not running
    /// until [`Media::start`] is called with a handler.
    pub(crate) async fn open(
        local_desc: MediaDesc,
        remote_desc: MediaDesc,
        token: tokio_util::sync::CancellationToken,
    ) -> Result<Media> {
        let (audio_codec, event_codec) =
            negotiate_codecs(&local_desc.codecs, &remote_desc.codecs)?;

        let remote: SocketAddr =
            format!("{}:{}", remote_desc.host, remote_desc.port).parse()?;
        let socket = UdpSocket::bind((local_desc.host.as_str(), local_desc.port)).await?;
        debug!(
            local = %socket.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            remote = %remote,
            codec = %audio_codec.name,
            "media endpoint open"
        );

        Ok(Media {
            inner: Arc::new(MediaInner {
                socket,
                remote: Mutex::new(remote),
                remote_verified: AtomicBool::new(false),
                local_desc,
                remote_desc,
                audio_codec,
                event_codec,
                token,
                started: AtomicBool::new(false),
            }),
        })
    }

    /// Starts the receive and/or send loop according to the local
    /// direction. A second call is a no-op, so at most one loop of each
    /// kind ever runs.
    pub(crate) async fn start(&self, handler: Arc<dyn MediaHandler>) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let direction = self.inner.local_desc.direction;

        if direction.is_recv() {
            handler.start_rx(self, &self.inner.audio_codec).await?;
            let media = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move { media.recv_loop(handler).await });
        }
        if direction.is_send() {
            handler.start_tx(self, &self.inner.audio_codec).await?;
            let media = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move { media.send_loop(handler).await });
        }
        Ok(())
    }

    async fn recv_loop(self, handler: Arc<dyn MediaHandler>) {
        let mut buf = vec![0u8; 1500];
        loop {
            tokio::select! {
                _ = self.inner.token.cancelled() => break,
                read = self.inner.socket.recv_from(&mut buf) => {
                    match read {
                        Ok((n, addr)) => {
                            if !self.inner.remote_verified.load(Ordering::Acquire) {
                                *self.inner.remote.lock().unwrap() = addr;
                                self.inner.remote_verified.store(true, Ordering::Release);
                            }
                            if !handler.write_rtp_packet(&self, &buf[..n]).await {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "failed to read media");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn send_loop(self, handler: Arc<dyn MediaHandler>) {
        let ptime = self.inner.local_desc.ptime.max(1);
        let mut ticker = tokio::time::interval(Duration::from_millis(ptime));
        loop {
            tokio::select! {
                _ = self.inner.token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(data) = handler.read_rtp_packet(&self).await else {
                        break;
                    };
                    let remote = *self.inner.remote.lock().unwrap();
                    if let Err(e) = self.inner.socket.send_to(&data, remote).await {
                        error!(error = %e, "failed to send media");
                        break;
                    }
                }
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    pub fn local_audio_desc(&self) -> &MediaDesc {
        &self.inner.local_desc
    }

    pub fn remote_audio_desc(&self) -> &MediaDesc {
        &self.inner.remote_desc
    }

    /// The negotiated audio codec.
    pub fn audio_codec(&self) -> &CodecDesc {
        &self.inner.audio_codec
    }

    /// The negotiated DTMF carriage codec, when one matched.
    pub fn event_codec(&self) -> Option<&CodecDesc> {
        self.inner.event_codec.as_ref()
    }

    /// Stops both loops at their next wake-up and releases the socket when
    /// the last clone drops.
    pub(crate) fn close(&self) {
        self.inner.token.cancel();
    }
}

/// Walks the remote codec list in order and picks the first entry the local
/// list also carries; that pair becomes the audio codec. A telephone-event
/// codec with the audio codec's sample rate is then chosen, preferring the
/// remote list over the local one, and may be absent.
pub(crate) fn negotiate_codecs(
    local: &[CodecDesc],
    remote: &[CodecDesc],
) -> Result<(CodecDesc, Option<CodecDesc>)> {
    let mut audio = None;
    'outer: for rcodec in remote {
        for lcodec in local {
            if rcodec.matches(lcodec) {
                audio = Some(rcodec.clone());
                break 'outer;
            }
        }
    }
    let audio = audio.ok_or(Error::NoAudioCodec)?;

    let event = remote
        .iter()
        .find(|c| c.is_telephone_event() && c.sample_rate == audio.sample_rate)
        .or_else(|| {
            local
                .iter()
                .find(|c| c.is_telephone_event() && c.sample_rate == audio.sample_rate)
        })
        .cloned();

    Ok((audio, event))
}
