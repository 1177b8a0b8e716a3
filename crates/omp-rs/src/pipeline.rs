// Copyright (C) 2025 Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

//! Command pipeline and reply dispatch
//!
//! OMP replies carry no request id. The manager answers every command
//! exactly once and in order, so replies are matched to callers purely by
//! position: the oldest awaiting continuation takes the next reply. To keep
//! that sound only one command is on the wire at a time.
//!
//! A single task owns the stream, both queues and the session state. Callers
//! talk to it over an unbounded channel and wait on a oneshot.

use crate::codec::{MAX_REPLY_LENGTH, ReplyFramer, decode_reply};
use crate::error::{OmpError, Result};
use crate::message::Element;
use crate::session::SessionState;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

const READ_CHUNK_SIZE: usize = 8192;

type Resolve = Box<dyn FnOnce(Result<Element>, &mut SessionState) + Send>;

/// One caller waiting for a reply
pub(crate) struct Continuation {
    command: String,
    resolve: Resolve,
}

impl Continuation {
    /// Pair an interpretation with a oneshot the caller awaits
    ///
    /// Failures, whether from the pipeline or from `interpret`, are recorded as
    /// the session's last error before they reach the caller.
    pub(crate) fn channel<T, F>(command: impl Into<String>, interpret: F) -> (Self, oneshot::Receiver<Result<T>>)
    where
        T: Send + 'static,
        F: FnOnce(&Element, &mut SessionState) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let command = command.into();
        let name = command.clone();

        let resolve = move |reply: Result<Element>, session: &mut SessionState| {
            let result = reply.and_then(|element| interpret(&element, session));
            if let Err(e) = &result {
                debug!(command = %name, error = %e, "command failed");
                session.last_error = Some(e.to_string());
            }
            if tx.send(result).is_err() {
                debug!(command = %name, "caller stopped waiting for reply");
            }
        };

        (
            Self {
                command,
                resolve: Box::new(resolve),
            },
            rx,
        )
    }

    /// Whether `reply` is named as the answer to this command
    fn answered_by(&self, reply: &Element) -> bool {
        reply.name.strip_suffix("_response") == Some(self.command.as_str())
    }

    fn resolve(self, reply: Result<Element>, session: &mut SessionState) {
        (self.resolve)(reply, session)
    }
}

pub(crate) struct PendingCommand {
    pub(crate) wire: String,
    pub(crate) continuation: Continuation,
    pub(crate) timeout: Option<Duration>,
}

/// Ordered queue of outgoing commands plus the continuations awaiting replies
///
/// `awaiting` never holds more than one entry: `transmitting` stays set from
/// the moment a command is handed to the transport until its reply (or its
/// timeout) is processed.
#[derive(Default)]
pub(crate) struct Pipeline {
    outgoing: VecDeque<PendingCommand>,
    awaiting: VecDeque<Continuation>,
    transmitting: bool,
    deadline: Option<(Instant, Duration)>,
    /// Replies possibly still owed for commands that timed out
    stale_replies: usize,
}

impl Pipeline {
    pub(crate) fn submit(&mut self, command: PendingCommand) -> Option<String> {
        self.outgoing.push_back(command);
        self.pump()
    }

    /// Dequeue the next command if nothing is in flight, returning its wire text
    pub(crate) fn pump(&mut self) -> Option<String> {
        if self.transmitting {
            return None;
        }
        let command = self.outgoing.pop_front()?;

        debug!(command = %command.continuation.command, queued = self.outgoing.len(), "transmitting command");
        self.transmitting = true;
        self.deadline = command.timeout.map(|timeout| (Instant::now() + timeout, timeout));
        self.awaiting.push_back(command.continuation);
        Some(command.wire)
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|(at, _)| at)
    }

    pub(crate) fn on_reply(&mut self, chunk: &[u8], session: &mut SessionState) {
        let reply = decode_reply(chunk);
        if let Err(e) = &reply {
            warn!(error = %e, "failed to decode reply");
        }
        self.on_decoded(reply, session);
    }

    /// Hand a decoded reply, or the reason it could not be decoded, to the oldest waiter
    ///
    /// While replies to timed out commands are outstanding, a reply named for
    /// the awaiting command is taken as its answer and the outstanding count
    /// is dropped: the manager never answered the timed out commands. Any
    /// other reply is discarded as late.
    pub(crate) fn on_decoded(&mut self, reply: Result<Element>, session: &mut SessionState) {
        if self.stale_replies > 0 {
            let answers_awaiting = match (&reply, self.awaiting.front()) {
                (Ok(element), Some(continuation)) => continuation.answered_by(element),
                _ => false,
            };
            if !answers_awaiting {
                self.stale_replies -= 1;
                warn!(remaining = self.stale_replies, "discarding late reply to a timed out command");
                return;
            }
            debug!(skipped = self.stale_replies, "reply answers the awaiting command, dropping owed replies");
            self.stale_replies = 0;
        }

        let Some(continuation) = self.awaiting.pop_front() else {
            warn!("discarding reply with no command awaiting it");
            return;
        };

        debug!(command = %continuation.command, "dispatching reply");
        continuation.resolve(reply, session);
        self.transmitting = false;
        self.deadline = None;
    }

    /// Fail the in-flight command with `Timeout` and let the queue move on
    ///
    /// Its reply may still arrive; it is counted so that it is dropped rather
    /// than handed to the next caller, unless it cannot be told apart from
    /// the next caller's own reply.
    pub(crate) fn on_timeout(&mut self, session: &mut SessionState) {
        let duration = self.deadline.take().map(|(_, d)| d).unwrap_or_default();
        if let Some(continuation) = self.awaiting.pop_front() {
            warn!(command = %continuation.command, ?duration, "command timed out");
            let operation = format!("waiting for <{}> reply", continuation.command);
            continuation.resolve(Err(OmpError::Timeout { operation, duration }), session);
            self.stale_replies += 1;
        }
        self.transmitting = false;
    }

    /// Reject every waiting and queued command
    ///
    /// The in-flight command gets `in_flight_error` when given, everything
    /// else gets `ConnectionClosed`.
    pub(crate) fn close(&mut self, in_flight_error: Option<OmpError>, session: &mut SessionState) {
        let mut in_flight_error = in_flight_error;
        for continuation in self.awaiting.drain(..) {
            let error = in_flight_error.take().unwrap_or(OmpError::ConnectionClosed);
            continuation.resolve(Err(error), session);
        }
        for command in self.outgoing.drain(..) {
            command.continuation.resolve(Err(OmpError::ConnectionClosed), session);
        }
        self.transmitting = false;
        self.deadline = None;
        session.closed = true;
    }
}

/// Start the task that owns `stream` and return the submission channel
pub(crate) fn spawn<S>(stream: S, state: watch::Sender<SessionState>) -> mpsc::UnboundedSender<PendingCommand>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher {
        stream,
        commands: rx,
        pipeline: Pipeline::default(),
        state,
        buffer: Vec::new(),
        framer: ReplyFramer::new(),
    };
    tokio::spawn(dispatcher.run());
    tx
}

struct Dispatcher<S> {
    stream: S,
    commands: mpsc::UnboundedReceiver<PendingCommand>,
    pipeline: Pipeline,
    state: watch::Sender<SessionState>,
    buffer: Vec<u8>,
    framer: ReplyFramer,
}

impl<S> Dispatcher<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        let in_flight_error = loop {
            let deadline = self.pipeline.deadline();
            // Never polled while no command is timed
            let sleep_target = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Some(wire) = self.pipeline.submit(command) {
                            if let Err(e) = self.write(&wire).await {
                                break Some(e);
                            }
                        }
                    }
                    None => {
                        debug!("all client handles dropped, closing connection");
                        break None;
                    }
                },
                read = self.stream.read(&mut chunk) => match read {
                    Ok(0) => {
                        warn!("connection closed by remote host");
                        break None;
                    }
                    Ok(n) => {
                        self.buffer.extend_from_slice(&chunk[..n]);
                        if let Err(e) = self.dispatch().await {
                            break Some(e);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "read from manager failed");
                        break None;
                    }
                },
                _ = sleep_until(sleep_target), if deadline.is_some() => {
                    let pipeline = &mut self.pipeline;
                    self.state.send_modify(|session| pipeline.on_timeout(session));
                    if let Err(e) = self.advance().await {
                        break Some(e);
                    }
                }
            }
        };

        self.shutdown(in_flight_error).await;
    }

    /// Dispatch every complete reply in the read buffer
    async fn dispatch(&mut self) -> Result<()> {
        loop {
            match self.framer.advance(&self.buffer) {
                Ok(Some(end)) => {
                    let reply: Vec<u8> = self.buffer.drain(..end).collect();
                    let pipeline = &mut self.pipeline;
                    self.state.send_modify(|session| pipeline.on_reply(&reply, session));
                }
                Ok(None) if self.buffer.len() > MAX_REPLY_LENGTH => {
                    let error = OmpError::malformed(
                        format!("Reply exceeds maximum size of {} bytes", MAX_REPLY_LENGTH),
                        self.buffer.len(),
                    );
                    self.reject_buffer(error);
                }
                Ok(None) => return Ok(()),
                Err(error) => self.reject_buffer(error),
            }
            self.advance().await?;
        }
    }

    /// The buffer cannot be framed; fail the waiting command and resynchronise on fresh bytes
    fn reject_buffer(&mut self, error: OmpError) {
        warn!(error = %error, discarded = self.buffer.len(), "discarding unreadable reply data");
        self.buffer.clear();
        self.framer = ReplyFramer::new();
        let pipeline = &mut self.pipeline;
        self.state.send_modify(|session| pipeline.on_decoded(Err(error), session));
    }

    async fn advance(&mut self) -> Result<()> {
        if let Some(wire) = self.pipeline.pump() {
            self.write(&wire).await?;
        }
        Ok(())
    }

    async fn write(&mut self, wire: &str) -> Result<()> {
        debug!(bytes = wire.len(), "writing command");
        self.stream.write_all(wire.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn shutdown(mut self, in_flight_error: Option<OmpError>) {
        // Refuse new submissions, then fail whatever was already sent our way
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            self.pipeline.outgoing.push_back(command);
        }

        let pipeline = &mut self.pipeline;
        self.state
            .send_modify(|session| pipeline.close(in_flight_error, session));

        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "stream shutdown failed");
        }
    }
}
