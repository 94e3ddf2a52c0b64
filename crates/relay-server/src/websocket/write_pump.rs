//! Outbound side of a connection.
//!
//! The write pump is the only task that writes to the transport. It drains
//! the outbound queue one message per text frame, pings on the heartbeat
//! schedule, and when the queue closes sends a close frame and closes the
//! sink. Every exit path closes the sink exactly once and cancels
//! `transport_closed`, which stops the read pump.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use relay_core::RelayError;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::heartbeat::{Deadlines, ping_ticker};
use super::hub::Outbound;

/// Why the write pump stopped.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The hub closed the outbound queue; a close frame was sent.
    QueueClosed,
    /// A frame could not be written in time or the transport failed.
    Failed(RelayError),
    /// The read side went away first.
    Cancelled,
}

/// Drive `sink` from `outbound` until the queue closes or a write fails.
pub async fn run_write_pump<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<Outbound>,
    deadlines: Deadlines,
    transport_closed: CancellationToken,
) -> WriteOutcome
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ticker = ping_ticker(deadlines.ping_interval);
    let outcome = loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(text) => {
                    let frame = Message::Text(text.as_str().to_owned().into());
                    if let Err(e) = write_frame(&mut sink, frame, deadlines.write_timeout).await {
                        break WriteOutcome::Failed(e);
                    }
                }
                None => {
                    if let Err(e) = write_frame(&mut sink, Message::Close(None), deadlines.write_timeout).await {
                        debug!(error = %e, "close frame not delivered");
                    }
                    break WriteOutcome::QueueClosed;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(vec![].into()), deadlines.write_timeout).await {
                    break WriteOutcome::Failed(e);
                }
            }
            () = transport_closed.cancelled() => break WriteOutcome::Cancelled,
        }
    };

    if let WriteOutcome::Failed(ref e) = outcome {
        warn!(error = %e, "write failed, closing transport");
    }
    match timeout(deadlines.write_timeout, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "transport close failed"),
        Err(_) => debug!("transport close timed out"),
    }
    transport_closed.cancel();
    outcome
}

async fn write_frame<W>(sink: &mut W, frame: Message, deadline: Duration) -> Result<(), RelayError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match timeout(deadline, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(RelayError::Transport(e.to_string())),
        Err(_) => Err(RelayError::WriteTimeout(deadline)),
    }
}
