//! Full-duplex byte pump between the client and origin endpoints.
//!
//! Custom poll-based relay instead of tokio's `copy_bidirectional`: each side
//! enforces a single in-flight write, bytes read while the opposite write is
//! outstanding are parked in a deferred queue and coalesced into the next
//! write, and a half-closed direction drains its buffered bytes before the
//! shutdown policy tears the opposite endpoint down.

use crate::buffer_pool::{BufferLease, BufferPool};
use bytes::BytesMut;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

/// Which endpoint of the tunnel a state or failure belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
    Client,
    Origin,
}

impl Side {
    fn read_failure(self) -> Failure {
        match self {
            Side::Client => Failure::ClientRead,
            Side::Origin => Failure::OriginRead,
        }
    }

    fn write_failure(self) -> Failure {
        match self {
            Side::Client => Failure::ClientWrite,
            Side::Origin => Failure::OriginWrite,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Origin => f.write_str("origin"),
        }
    }
}

/// Direction-specific relay failure, the input to the shutdown policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Failure {
    ClientRead,
    ClientWrite,
    OriginRead,
    OriginWrite,
}

/// Flag snapshot consumed by [`decide_shutdowns`]. The failure that is being
/// decided has already been recorded in these flags.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RelayFlags {
    pub client_read_failed: bool,
    pub client_write_failed: bool,
    pub origin_read_failed: bool,
    pub origin_write_failed: bool,
    pub client_is_writing: bool,
    pub origin_is_writing: bool,
}

/// Which endpoints to shut down after a failure.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ShutdownPlan {
    pub client: bool,
    pub origin: bool,
}

/// Decide which endpoints a failure tears down.
///
/// A side whose opposite-direction write is still in flight is left alone so
/// the terminal buffer can drain; it is only collected once its own I/O fails
/// or the drain completes and a later failure selects it.
pub fn decide_shutdowns(failure: Failure, flags: &RelayFlags) -> ShutdownPlan {
    match failure {
        Failure::ClientRead => ShutdownPlan {
            client: flags.client_write_failed,
            origin: !flags.origin_is_writing,
        },
        Failure::ClientWrite => ShutdownPlan {
            client: flags.client_read_failed,
            origin: false,
        },
        Failure::OriginRead => ShutdownPlan {
            client: !flags.client_is_writing,
            origin: flags.origin_write_failed,
        },
        Failure::OriginWrite => ShutdownPlan {
            client: false,
            origin: flags.origin_read_failed,
        },
    }
}

/// How the relay terminated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Termination {
    /// Both directions ended with a peer close.
    Completed,
    /// At least one direction ended with an I/O error.
    Error,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Completed => f.write_str("completed"),
            Termination::Error => f.write_str("error"),
        }
    }
}

/// Byte totals and termination reason reported when the relay resolves.
#[derive(Clone, Copy, Debug)]
pub struct RelayOutcome {
    pub client_to_origin: u64,
    pub origin_to_client: u64,
    pub termination: Termination,
}

/// Per-endpoint relay state. `write_buf` holds the bytes of the in-flight
/// write on this side; `deferred_buf` collects bytes read from the opposite
/// endpoint while that write is outstanding.
struct SideState {
    staging: BufferLease,
    write_buf: BytesMut,
    write_pos: usize,
    deferred_buf: BytesMut,
    is_writing: bool,
    read_open: bool,
    read_failed: bool,
    write_failed: bool,
    shutdown: bool,
    shutdown_done: bool,
    written: u64,
}

impl SideState {
    fn new(staging: BufferLease) -> Self {
        Self {
            staging,
            write_buf: BytesMut::new(),
            write_pos: 0,
            deferred_buf: BytesMut::new(),
            is_writing: false,
            read_open: true,
            read_failed: false,
            write_failed: false,
            shutdown: false,
            shutdown_done: false,
            written: 0,
        }
    }

    fn fail_write(&mut self, which: Side, err: io::Error) -> IoFailure {
        info!("HTTP proxy {which} write: {err}");
        self.is_writing = false;
        self.write_failed = true;
        self.write_buf.clear();
        self.deferred_buf.clear();
        self.write_pos = 0;
        IoFailure {
            failure: which.write_failure(),
            clean_eof: false,
        }
    }

    /// Shut this endpoint down at most once: no further reads are armed and
    /// queued bytes are dropped. The policy never selects a side whose write
    /// is still in flight.
    fn begin_shutdown(&mut self) {
        if self.shutdown {
            return;
        }
        debug_assert!(!self.is_writing);
        self.shutdown = true;
        self.read_open = false;
        self.is_writing = false;
        self.write_buf.clear();
        self.deferred_buf.clear();
        self.write_pos = 0;
    }

    /// No completion can fire on this side any more.
    fn terminal(&self) -> bool {
        !self.read_open && !self.is_writing && (!self.shutdown || self.shutdown_done)
    }
}

struct IoFailure {
    failure: Failure,
    clean_eof: bool,
}

/// Drive the in-flight write on one side until it drains, errors or would
/// block. A drained write immediately picks up the deferred queue, so bytes
/// parked during the write go out as one coalesced follow-up write.
fn drive_write<S>(
    cx: &mut Context<'_>,
    stream: &mut S,
    side: &mut SideState,
    which: Side,
) -> Option<IoFailure>
where
    S: AsyncWrite + Unpin,
{
    if !side.is_writing {
        return None;
    }

    let mut progressed = false;
    while side.is_writing {
        let pending = &side.write_buf[side.write_pos..];
        debug_assert!(!pending.is_empty());
        match Pin::new(&mut *stream).poll_write(cx, pending) {
            Poll::Ready(Ok(0)) => {
                let err = io::Error::new(io::ErrorKind::WriteZero, "write returned zero bytes");
                return Some(side.fail_write(which, err));
            }
            Poll::Ready(Ok(n)) => {
                progressed = true;
                side.write_pos += n;
                side.written += n as u64;
                if side.write_pos == side.write_buf.len() {
                    side.write_buf.clear();
                    side.write_pos = 0;
                    if side.deferred_buf.is_empty() {
                        side.is_writing = false;
                    } else {
                        std::mem::swap(&mut side.write_buf, &mut side.deferred_buf);
                    }
                }
            }
            Poll::Ready(Err(e)) => return Some(side.fail_write(which, e)),
            Poll::Pending => break,
        }
    }

    if progressed {
        // Best-effort flush; TCP has nothing to buffer but test doubles might.
        if let Poll::Ready(Err(e)) = Pin::new(stream).poll_flush(cx) {
            return Some(side.fail_write(which, e));
        }
    }
    None
}

/// Read from one side until it would block, handing each chunk to the
/// opposite side: parked in the deferred queue while a write is in flight,
/// otherwise started as a new write. A peer close is routed through the same
/// failure path as a read error, which is what the shutdown policy expects.
fn drive_read<R, W>(
    cx: &mut Context<'_>,
    reader_stream: &mut R,
    reader: &mut SideState,
    reader_side: Side,
    writer_stream: &mut W,
    writer: &mut SideState,
    writer_side: Side,
) -> (Option<IoFailure>, Option<IoFailure>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut write_failure = None;

    while reader.read_open {
        let mut buf = ReadBuf::new(reader.staging.as_mut_slice());
        match Pin::new(&mut *reader_stream).poll_read(cx, &mut buf) {
            Poll::Ready(Ok(())) => {
                let filled = buf.filled();
                if filled.is_empty() {
                    info!("HTTP proxy {reader_side} read: socket closed");
                    reader.read_open = false;
                    reader.read_failed = true;
                    let read_failure = IoFailure {
                        failure: reader_side.read_failure(),
                        clean_eof: true,
                    };
                    return (Some(read_failure), write_failure);
                }

                if writer.shutdown || writer.write_failed {
                    debug!(
                        "HTTP proxy {writer_side} write: discarding {} bytes read after teardown",
                        filled.len()
                    );
                } else if writer.is_writing {
                    writer.deferred_buf.extend_from_slice(filled);
                } else {
                    debug_assert!(writer.write_buf.is_empty());
                    writer.write_buf.extend_from_slice(filled);
                    writer.write_pos = 0;
                    writer.is_writing = true;
                    if write_failure.is_none() {
                        write_failure = drive_write(cx, writer_stream, writer, writer_side);
                    }
                }
            }
            Poll::Ready(Err(e)) => {
                info!("HTTP proxy {reader_side} read: {e}");
                reader.read_open = false;
                reader.read_failed = true;
                let read_failure = IoFailure {
                    failure: reader_side.read_failure(),
                    clean_eof: false,
                };
                return (Some(read_failure), write_failure);
            }
            Poll::Pending => break,
        }
    }

    (None, write_failure)
}

/// The relay itself: two symmetric half-duplex pumps coupled by the shutdown
/// policy. All state is owned by this value and mutated only from its `poll`,
/// so completions arriving on any executor thread are serialized for free.
pub struct Relay<C, O> {
    client_stream: C,
    origin_stream: O,
    client: SideState,
    origin: SideState,
    saw_error: bool,
}

impl<C, O> Relay<C, O>
where
    C: AsyncRead + AsyncWrite + Unpin,
    O: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client_stream: C, origin_stream: O, pool: &Arc<BufferPool>) -> Self {
        Self {
            client_stream,
            origin_stream,
            client: SideState::new(BufferLease::new(pool)),
            origin: SideState::new(BufferLease::new(pool)),
            saw_error: false,
        }
    }

    /// Pump until no completion can fire on either endpoint.
    pub async fn run(mut self) -> RelayOutcome {
        poll_fn(|cx| self.poll_relay(cx)).await
    }

    fn flags(&self) -> RelayFlags {
        RelayFlags {
            client_read_failed: self.client.read_failed,
            client_write_failed: self.client.write_failed,
            origin_read_failed: self.origin.read_failed,
            origin_write_failed: self.origin.write_failed,
            client_is_writing: self.client.is_writing,
            origin_is_writing: self.origin.is_writing,
        }
    }

    fn apply_failure(&mut self, event: IoFailure) {
        if !event.clean_eof {
            self.saw_error = true;
        }
        let plan = decide_shutdowns(event.failure, &self.flags());
        if plan.client {
            self.client.begin_shutdown();
        }
        if plan.origin {
            self.origin.begin_shutdown();
        }
    }

    fn poll_relay(&mut self, cx: &mut Context<'_>) -> Poll<RelayOutcome> {
        // Writes first, so a completed write drains its deferred queue before
        // this poll's reads park more bytes behind it.
        if let Some(f) = drive_write(cx, &mut self.origin_stream, &mut self.origin, Side::Origin) {
            self.apply_failure(f);
        }
        if let Some(f) = drive_write(cx, &mut self.client_stream, &mut self.client, Side::Client) {
            self.apply_failure(f);
        }

        let (read_f, write_f) = drive_read(
            cx,
            &mut self.client_stream,
            &mut self.client,
            Side::Client,
            &mut self.origin_stream,
            &mut self.origin,
            Side::Origin,
        );
        if let Some(f) = write_f {
            self.apply_failure(f);
        }
        if let Some(f) = read_f {
            self.apply_failure(f);
        }

        let (read_f, write_f) = drive_read(
            cx,
            &mut self.origin_stream,
            &mut self.origin,
            Side::Origin,
            &mut self.client_stream,
            &mut self.client,
            Side::Client,
        );
        if let Some(f) = write_f {
            self.apply_failure(f);
        }
        if let Some(f) = read_f {
            self.apply_failure(f);
        }

        if self.client.shutdown && !self.client.shutdown_done {
            // Errors here mean the peer is already gone; nothing left to do.
            if Pin::new(&mut self.client_stream).poll_shutdown(cx).is_ready() {
                self.client.shutdown_done = true;
            }
        }
        if self.origin.shutdown && !self.origin.shutdown_done {
            if Pin::new(&mut self.origin_stream).poll_shutdown(cx).is_ready() {
                self.origin.shutdown_done = true;
            }
        }

        if self.client.terminal() && self.origin.terminal() {
            return Poll::Ready(RelayOutcome {
                client_to_origin: self.origin.written,
                origin_to_client: self.client.written,
                termination: if self.saw_error {
                    Termination::Error
                } else {
                    Termination::Completed
                },
            });
        }
        Poll::Pending
    }
}
