//! Relay pipeline for the RTM bot: socket -> inbound conduit -> responder -> outbound conduit -> socket.
//!
//! Both conduits hold a single item, so a slow consumer holds up its producer. Every inbound
//! event is answered in its own task; a stalling reply waiting on its delay never blocks the
//! events behind it.

use std::sync::Arc;

use futures_util::{Sink, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::responder::{Outgoing, Responder};
use crate::slack::rtm::{receive_loop, send_loop};
use crate::slack::{Event, Reply, TsClock};

pub const CONDUIT_CAPACITY: usize = 1;

/// Run the relay over an open RTM socket until the connection ends or `cancel` fires.
pub async fn run<T>(socket: T, self_id: &str, responder: Arc<Responder>, cancel: CancellationToken)
where
    T: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::channel(CONDUIT_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(CONDUIT_CAPACITY);
    let (sink, stream) = socket.split();

    let receiver = tokio::spawn(receive_loop(stream, inbound_tx, cancel.clone()));
    let sender = tokio::spawn(send_loop(
        sink,
        outbound_rx,
        self_id.to_string(),
        TsClock::new(),
        cancel.clone(),
    ));
    let classifier = tokio::spawn(run_responder(responder, inbound_rx, outbound_tx, cancel.clone()));

    let (r, s, c) = tokio::join!(receiver, sender, classifier);
    for (name, res) in [("receive", r), ("send", s), ("responder", c)] {
        if let Err(e) = res {
            log::error!("relay: {} task failed: {}", name, e);
        }
    }
    log::info!("relay stopped");
}

/// Take events off `inbound` and answer each one in its own task.
pub async fn run_responder(
    responder: Arc<Responder>,
    mut inbound: mpsc::Receiver<Event>,
    outbound: mpsc::Sender<Reply>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            ev = inbound.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
        };
        let responder = responder.clone();
        let outbound = outbound.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let replies = responder.respond(&event).await;
            emit(replies, &outbound, &cancel).await;
        });
    }
}

/// Send replies in order, sleeping each one's delay first. Stops early on cancel or a closed conduit.
pub async fn emit(replies: Vec<Outgoing>, outbound: &mpsc::Sender<Reply>, cancel: &CancellationToken) {
    for out in replies {
        if !out.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(out.delay) => {}
            }
        }
        let sent = tokio::select! {
            _ = cancel.cancelled() => return,
            r = outbound.send(out.reply) => r,
        };
        if sent.is_err() {
            log::debug!("relay: outbound closed, dropping remaining replies");
            return;
        }
    }
}
