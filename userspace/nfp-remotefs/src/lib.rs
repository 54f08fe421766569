// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Chunked file reads from card firmware over the mailbox
//! OWNERS: @host-tools
//! STATUS: Stable for the read path
//!
//! PUBLIC API:
//!   - RemoteFile: open/read/close over the mailbox protocol
//!   - PollConfig: polling and timeout knobs
//!   - TransferError: caller-facing failure taxonomy
//!
//! DEPENDENCIES:
//!   - nfp-pipe::Pipe: the mailbox endpoint
//!   - nfp-card::NfpCard: brought-up device and transfer regions
//!
//! The master side drives one polling state machine per opened file:
//! `Init -> OperationStart -> TransactionStart -> TransactionEnd ->
//! OperationEnd -> Exit`, looping `TransactionStart/TransactionEnd` for each
//! chunk and `OperationEnd -> OperationStart` for chained operations (the
//! path set that precedes every read). There are no interrupts; progress is
//! observed purely by re-reading the control block, with the poll cadence
//! adapting to how fast the worker actually responds.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

use nfp_card::NfpCard;
use nfp_hal::Aperture;
use nfp_pipe::ops::{self, TransferMeta};
use nfp_pipe::{Endpoint, Pipe, PipeError, PipeStatus, TransactionStatus};

// Pending-operation bits, consumed in this priority order: the path must be
// set before any data operation can refer to it.
const OP_NONE: u32 = 0;
const OP_PATH: u32 = 0x1;
const OP_INFO: u32 = 0x2;
const OP_READ: u32 = 0x4;
const OP_WRITE: u32 = 0x8;
const OP_ERASE: u32 = 0x10;

/// Polling and timeout knobs for the transfer state machine.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Poll delay the machine starts from.
    pub initial_delay: Duration,
    /// Stuck-state dwell time after which a single warning is logged.
    pub warn_after: Duration,
    /// Per-state budget for `read` resumption.
    pub hard_timeout: Duration,
    /// Idle polls after which the delay is nudged up.
    pub idle_upper: u32,
    /// Idle-count bound under which a state change nudges the delay down.
    pub idle_lower: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            warn_after: Duration::from_secs(2),
            hard_timeout: Duration::from_secs(12),
            idle_upper: 10,
            idle_lower: 8,
        }
    }
}

/// Errors surfaced by file transfers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The worker made no progress within the budget. Retrying the whole
    /// open may be sensible; see the crate docs for the stale-state caveat.
    #[error("worker endpoint not responding (gave up after {elapsed:?})")]
    Timeout {
        /// How long the machine waited in the stuck state.
        elapsed: Duration,
    },
    /// The worker violated the protocol contract; unrecoverable for this
    /// operation.
    #[error("protocol inconsistency: {0}")]
    Protocol(&'static str),
    /// `read` resumed in a state it does not handle.
    #[error("read resumed in an unexpected protocol state")]
    InvalidState,
    /// Malformed call.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Mailbox or window failure underneath the transfer.
    #[error(transparent)]
    Pipe(#[from] PipeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    OperationStart,
    TransactionStart,
    TransactionEnd,
    OperationEnd,
    Exit,
}

/// A file open on the card's firmware agent.
///
/// `open` drives the machine through the path-set operation and the first
/// read chunk (or, for files that fit one chunk, the whole read); each
/// `read` call delivers the next chunk. Dropping the handle releases the
/// mailbox mirrors; the worker is deliberately left wherever it is, so a
/// reopen after a timeout may observe stale peer state.
pub struct RemoteFile<'a, A: Aperture> {
    pipe: Pipe<'a, A>,
    cfg: PollConfig,
    state: State,
    prev_state: State,
    pending: u32,
    current: u32,
    chained: bool,
    busy: bool,
    warned: bool,
    timer: Instant,
    poll_delay_ms: u64,
    idle_count: u32,
    size: u64,
    eof: bool,
    chunks: VecDeque<Vec<u8>>,
    name: String,
}

impl<'a, A: Aperture> std::fmt::Debug for RemoteFile<'a, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile").finish_non_exhaustive()
    }
}

impl<'a, A: Aperture> RemoteFile<'a, A> {
    /// Opens `name` on the worker, waiting up to `timeout` per state.
    pub fn open(card: &'a NfpCard<A>, name: &str, timeout: Duration) -> Result<Self, TransferError> {
        Self::open_with(card, name, timeout, PollConfig::default())
    }

    /// Like [`RemoteFile::open`] with explicit polling knobs.
    pub fn open_with(
        card: &'a NfpCard<A>,
        name: &str,
        timeout: Duration,
        cfg: PollConfig,
    ) -> Result<Self, TransferError> {
        if name.len() >= ops::PATH_MAX_LEN {
            return Err(TransferError::InvalidArgument("file name too long"));
        }

        let mut pipe = Pipe::new(
            card.device(),
            Endpoint::Master,
            card.buffer(),
            card.control(),
            ops::MAX_META_SIZE,
        )?;
        let control = card.control();
        let buffer = card.buffer();
        debug!("control block: address {:#x}, size {:#x}", control.addr, control.size);
        debug!("buffer block: address {:#x}, size {:#x}", buffer.addr, buffer.size);

        // Push the reset master field group before the first poll.
        pipe.control_write()?;

        let mut file = Self {
            pipe,
            cfg,
            state: State::Init,
            prev_state: State::Init,
            pending: OP_PATH | OP_READ,
            current: OP_NONE,
            chained: false,
            busy: true,
            warned: false,
            timer: Instant::now(),
            poll_delay_ms: cfg.initial_delay.as_millis() as u64,
            idle_count: 0,
            size: 0,
            eof: false,
            chunks: VecDeque::new(),
            name: name.to_string(),
        };
        file.operation_next();
        file.drive(timeout)?;
        Ok(file)
    }

    /// Name this file was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total file size reported by the worker's first read meta; zero until
    /// the first chunk arrives.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the final chunk has been produced.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Delivers the next chunk, resuming the state machine when none is
    /// queued yet. `Ok(None)` signals end-of-file.
    ///
    /// Only `open` advances through the first poll of a chained operation;
    /// resuming from any state outside the transaction loop reports
    /// [`TransferError::InvalidState`].
    pub fn read(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }
        if self.eof || self.state == State::Exit {
            return Ok(None);
        }
        self.resume()?;
        Ok(self.chunks.pop_front())
    }

    /// Releases the pipe's mirror buffers.
    pub fn close(self) {}

    // Open-time loop: poll every state until the machine exits, handing the
    // first queued chunk back early when more are pending.
    fn drive(&mut self, budget: Duration) -> Result<(), TransferError> {
        while self.busy {
            self.poll_tick(budget)?;
            self.pipe.control_read()?;
            match self.state {
                State::Init => {
                    if self.pipe.worker_status() == PipeStatus::Waiting {
                        self.operation_init()?;
                        self.state = State::OperationStart;
                    }
                }
                State::OperationStart => {
                    // First operation: the worker just left initialization
                    // and sits in Setup. Chained operation: it parks in
                    // Waiting after finishing the previous one.
                    let ready = self.pipe.worker_status() == PipeStatus::Setup
                        || (self.chained && self.pipe.worker_status() == PipeStatus::Waiting);
                    if ready && self.pipe.worker_transaction() == TransactionStatus::None {
                        self.chained = false;
                        self.operation_start()?;
                        self.state = State::TransactionStart;
                    }
                }
                State::TransactionStart => {
                    if self.transaction_ready() {
                        self.transaction_start()?;
                        self.state = State::TransactionEnd;
                    }
                }
                State::TransactionEnd => {
                    if self.pipe.worker_transaction() == TransactionStatus::End {
                        let next = self.transaction_stop()?;
                        self.state = next;
                        if next == State::TransactionStart {
                            // A chunk is queued and more follow; let the
                            // caller consume it before polling on.
                            return Ok(());
                        }
                    }
                }
                State::OperationEnd => {
                    if self.pipe.worker_transaction() == TransactionStatus::None {
                        self.operation_stop()?;
                        self.operation_next();
                        if self.current == OP_NONE {
                            self.state = State::Exit;
                        } else {
                            self.state = State::OperationStart;
                            self.chained = true;
                        }
                    }
                }
                State::Exit => self.busy = false,
            }
            thread::sleep(Duration::from_millis(self.poll_delay_ms));
        }
        Ok(())
    }

    // Read-time loop: only the transaction states and operation teardown are
    // reachable once open has returned.
    fn resume(&mut self) -> Result<(), TransferError> {
        let budget = self.cfg.hard_timeout;
        loop {
            self.poll_tick(budget)?;
            self.pipe.control_read()?;
            match self.state {
                State::TransactionStart => {
                    if self.transaction_ready() {
                        self.transaction_start()?;
                        self.state = State::TransactionEnd;
                    }
                }
                State::TransactionEnd => {
                    if self.pipe.worker_transaction() == TransactionStatus::End {
                        let next = self.transaction_stop()?;
                        self.state = next;
                        if next == State::TransactionStart {
                            return Ok(());
                        }
                    }
                }
                State::OperationEnd => {
                    if self.pipe.worker_transaction() == TransactionStatus::None {
                        self.operation_stop()?;
                        self.state = State::Exit;
                        self.busy = false;
                        return Ok(());
                    }
                }
                _ => return Err(TransferError::InvalidState),
            }
            if self.prev_state == self.state {
                thread::sleep(Duration::from_millis(self.poll_delay_ms));
            }
        }
    }

    // Edge detection, adaptive poll cadence, and the two-tier timeout.
    fn poll_tick(&mut self, budget: Duration) -> Result<(), TransferError> {
        if self.state != self.prev_state {
            self.prev_state = self.state;
            self.warned = false;
            self.timer = Instant::now();
            if self.idle_count <= self.cfg.idle_lower {
                self.poll_delay_ms = self.poll_delay_ms.saturating_sub(1);
            }
            self.idle_count = 0;
            debug!("state machine advanced to {:?}", self.state);
        } else {
            let elapsed = self.timer.elapsed();
            self.idle_count += 1;
            if self.idle_count > self.cfg.idle_upper && self.state != State::Init {
                let max_ms = budget.as_millis() as u64;
                if self.poll_delay_ms < max_ms {
                    self.poll_delay_ms += 1;
                }
            }
            if elapsed > self.cfg.warn_after && !self.warned {
                self.warned = true;
                warn!(
                    "waiting for the worker endpoint (time left: {:?})",
                    budget.saturating_sub(elapsed)
                );
            }
            if elapsed > budget {
                return Err(TransferError::Timeout { elapsed });
            }
        }
        Ok(())
    }

    fn transaction_ready(&self) -> bool {
        self.pipe.worker_status() == PipeStatus::Processing
            && self.pipe.worker_transaction() == TransactionStatus::None
    }

    fn operation_next(&mut self) {
        self.current = select_operation(&mut self.pending);
    }

    fn operation_init(&mut self) -> Result<(), TransferError> {
        self.pipe.set_master_transaction(TransactionStatus::None)?;
        self.pipe.control_write()?;
        self.pipe.set_master_status(PipeStatus::Setup)?;
        self.pipe.control_write()?;
        Ok(())
    }

    fn operation_start(&mut self) -> Result<(), TransferError> {
        match self.current {
            OP_PATH => {
                self.pipe.set_operation(ops::OP_FILE_NAME, Some(Endpoint::Master))?;
                ops::encode_path(&self.name, self.pipe.meta_mut())?;
            }
            OP_READ => {
                self.pipe.set_operation(ops::OP_FILE_READ, Some(Endpoint::Worker))?;
            }
            _ => return Err(TransferError::Protocol("operation not driven by this endpoint")),
        }
        self.pipe.control_write()?;
        self.pipe.set_master_status(PipeStatus::Processing)?;
        self.pipe.control_write()?;
        Ok(())
    }

    fn operation_stop(&mut self) -> Result<(), TransferError> {
        self.pipe.set_master_status(PipeStatus::Waiting)?;
        self.pipe.control_write()?;
        Ok(())
    }

    fn transaction_start(&mut self) -> Result<(), TransferError> {
        self.pipe.set_master_transaction(TransactionStatus::Start)?;
        self.pipe.control_write()?;
        Ok(())
    }

    // Consumes one completed transaction. For a read this is where the chunk
    // is pulled from the buffer and queued; the returned state loops back to
    // `TransactionStart` while chunks remain.
    fn transaction_stop(&mut self) -> Result<State, TransferError> {
        let mut next = State::OperationEnd;
        match self.current {
            OP_PATH => {}
            OP_READ => {
                let meta = TransferMeta::decode(self.pipe.meta());
                if meta.transaction_total == 0 {
                    return Err(TransferError::Protocol("declared chunk count is zero"));
                }
                if meta.transaction_count > meta.transaction_total {
                    debug!("file read transaction count exceeds the declared total");
                    return Err(TransferError::Protocol(
                        "chunk index exceeds the declared chunk count",
                    ));
                }
                let bytes = if meta.transaction_count == meta.transaction_total {
                    meta.size
                        .checked_sub(
                            (meta.transaction_total as u64 - 1) * meta.transaction_size as u64,
                        )
                        .ok_or(TransferError::Protocol("chunk sizes exceed the file size"))?
                } else {
                    meta.transaction_size as u64
                };

                if self.size == 0 {
                    self.size = meta.size;
                }

                self.pipe.buffer_read(bytes as usize)?;
                let chunk = self.pipe.data()[..bytes as usize].to_vec();
                self.chunks.push_back(chunk);
                debug!(
                    "reading (chunk {}/{}, {}%, poll delay {} ms)",
                    meta.transaction_count,
                    meta.transaction_total,
                    (meta.transaction_count as u64 * 100) / meta.transaction_total as u64,
                    self.poll_delay_ms
                );

                if meta.transaction_count != meta.transaction_total {
                    next = State::TransactionStart;
                } else {
                    self.eof = true;
                }
            }
            _ => return Err(TransferError::Protocol("operation not driven by this endpoint")),
        }

        self.pipe.control_write()?;
        self.pipe.set_master_transaction(TransactionStatus::None)?;
        self.pipe.control_write()?;
        Ok(next)
    }
}

/// Picks exactly one pending operation bit in priority order, clearing it
/// from the mask. The path must be set before any data operation, so it
/// always goes first.
fn select_operation(pending: &mut u32) -> u32 {
    let mut current = OP_NONE;
    for op in [OP_PATH, OP_INFO, OP_ERASE, OP_WRITE, OP_READ] {
        if *pending & op != 0 && current == OP_NONE {
            current = op;
            *pending &= !op;
        }
    }
    current
}
