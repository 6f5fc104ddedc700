//! Session write loop.
//!
//! Drains the session's outbound queue into the socket. Frames already
//! waiting when the loop wakes are joined with `\n` into one binary
//! message, so a burst of broadcasts costs a single write.

use std::fmt;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::session::SessionSettings;
use crate::error::EngineError;
use crate::protocol::EncodedFrame;
use crate::protocol::frame::BATCH_SEPARATOR;

/// Joins `first` with every frame already waiting in `outbound`.
pub fn coalesce(first: &EncodedFrame, outbound: &mut mpsc::Receiver<EncodedFrame>) -> Vec<u8> {
    let mut batch = first.to_vec();
    while let Ok(next) = outbound.try_recv() {
        batch.push(BATCH_SEPARATOR);
        batch.extend_from_slice(&next);
    }
    batch
}

/// Runs until the queue is closed, a write fails or `closed` is
/// cancelled. On exit it sends a close frame and cancels `closed` so the
/// read loop stops too.
pub async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<EncodedFrame>,
    settings: SessionSettings,
    closed: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + settings.ping_interval, settings.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            () = closed.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Binary(coalesce(&frame, &mut outbound).into()),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };
        if let Err(err) = send_within(&mut sink, message, settings.write_timeout).await {
            tracing::debug!(error = %err, "write failed");
            break;
        }
    }

    let _ = send_within(&mut sink, Message::Close(None), settings.write_timeout).await;
    closed.cancel();
}

async fn send_within<S>(sink: &mut S, message: Message, limit: Duration) -> Result<(), EngineError>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(EngineError::Connection(err.to_string())),
        Err(_) => Err(EngineError::Connection("write deadline exceeded".to_string())),
    }
}
