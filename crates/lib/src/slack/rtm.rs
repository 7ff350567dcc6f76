//! RTM websocket transport.
//!
//! One connection per process and no reconnect. The receive loop owns the read half and ends
//! (cancelling everything else) when the server closes, the stream ends, or a read fails.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::api::{RtmSession, SlackClient, SlackError};
use super::types::{Event, OutboundFrame, Reply, TsClock};

pub type RtmSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// rtm.start followed by dialing the returned URL.
pub async fn connect(client: &SlackClient) -> Result<(RtmSession, RtmSocket), SlackError> {
    let session = client.rtm_start().await?;
    log::info!("rtm: handshake ok, bot id {}", session.self_id);
    let socket = dial(&session.url).await?;
    Ok((session, socket))
}

pub async fn dial(url: &str) -> Result<RtmSocket, SlackError> {
    let (socket, response) = tokio_tungstenite::connect_async(url).await?;
    log::info!("rtm: connected ({})", response.status());
    Ok(socket)
}

/// Decode text frames into [`Event`]s and forward them to `inbound`.
/// Undecodable frames are logged and skipped; non-text frames are ignored.
pub async fn receive_loop<S>(mut stream: S, inbound: mpsc::Sender<Event>, cancel: CancellationToken)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                let event: Event = match serde_json::from_str(&text) {
                    Ok(ev) => ev,
                    Err(e) => {
                        log::warn!("rtm: cannot decode frame: {}: {}", e, text);
                        continue;
                    }
                };
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = inbound.send(event) => r,
                };
                if sent.is_err() {
                    log::debug!("rtm: inbound closed, stopping receive loop");
                    break;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                log::info!("rtm: server closed the connection: {:?}", frame);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                log::error!("rtm: read failed: {}", e);
                break;
            }
            None => {
                log::info!("rtm: connection ended");
                break;
            }
        }
    }
    cancel.cancel();
}

/// Write each reply from `outbound` as an [`OutboundFrame`] sent by `self_id`.
/// A failed write is logged and the loop moves on to the next reply.
pub async fn send_loop<Si>(
    mut sink: Si,
    mut outbound: mpsc::Receiver<Reply>,
    self_id: String,
    clock: TsClock,
    cancel: CancellationToken,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: std::fmt::Display,
{
    loop {
        let reply = tokio::select! {
            _ = cancel.cancelled() => break,
            r = outbound.recv() => match r {
                Some(r) => r,
                None => break,
            },
        };
        let frame = OutboundFrame::stamp(reply, &self_id, clock.next());
        let text = match serde_json::to_string(&frame) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("rtm: cannot encode frame: {}", e);
                continue;
            }
        };
        log::debug!("rtm: send {}", text);
        if let Err(e) = sink.send(Message::Text(text)).await {
            log::warn!("rtm: write failed: {}", e);
        }
    }
    let _ = sink.close().await;
    log::debug!("rtm: send loop stopped");
}
