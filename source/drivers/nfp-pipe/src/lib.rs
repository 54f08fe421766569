// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Master/worker mailbox over shared card memory
//! OWNERS: @host-tools
//! STATUS: Stable for the file-transfer path
//!
//! PUBLIC API:
//!   - Pipe: one endpoint of the mailbox, role-gated accessors
//!   - Endpoint/PipeStatus/TransactionStatus/HashMode: wire enums
//!   - ops: operation codes and payload layouts
//!
//! DEPENDENCIES:
//!   - nfp-cpp::DeviceContext: window access to the shared regions
//!
//! The shared control block concatenates a master-owned field group, a
//! worker-owned field group, and a variable-size meta block whose writer is
//! whichever endpoint the `meta owner` field names. Each group has exactly
//! one legitimate writer; the data buffer is a separate region carrying one
//! chunk of payload per transaction.
//!
//! Ordering: writers push shared meta first and their own field group last;
//! readers pull the peer's field group first and shared meta last. A peer
//! that observes a status transition is therefore guaranteed the meta that
//! accompanied it is already complete, with no other synchronization.

pub mod ops;

use log::{debug, trace};
use thiserror::Error;

use nfp_cpp::{CppError, CppRegion, DeviceContext};
use nfp_hal::{round_down, round_up8, Aperture};

/// Smallest acceptable data-buffer region; derived from the largest flash
/// sector the worker may have to stage.
pub const MIN_BUFFER_SIZE: u64 = 4096;

const MASTER_FIELDS_SIZE: u64 = 24;
const WORKER_FIELDS_SIZE: u64 = 8;

/// Errors surfaced by the mailbox.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipeError {
    /// Malformed call or an unusable region descriptor.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Window translation or access failure underneath the mailbox.
    #[error(transparent)]
    Cpp(#[from] CppError),
}

/// Protocol role of a pipe endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Requester; initiates operations.
    Master,
    /// Follower; executes operation requests.
    Worker,
}

impl Endpoint {
    /// Wire encoding; zero is reserved for "no endpoint".
    pub const fn wire(self) -> u32 {
        match self {
            Self::Master => 1,
            Self::Worker => 2,
        }
    }

    /// Decodes a wire value, `None` for the reserved zero or anything else.
    pub const fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Master),
            2 => Some(Self::Worker),
            _ => None,
        }
    }
}

/// Endpoint state advertised through the control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeStatus {
    /// Not in a state to participate in operations.
    Unavailable,
    /// Worker waiting for setup.
    Waiting,
    /// Master preparing an operation.
    Setup,
    /// Busy with an operation.
    Processing,
}

impl PipeStatus {
    const fn wire(self) -> u32 {
        match self {
            Self::Unavailable => 0,
            Self::Waiting => 1,
            Self::Setup => 2,
            Self::Processing => 3,
        }
    }

    const fn from_wire(raw: u32) -> Self {
        match raw {
            1 => Self::Waiting,
            2 => Self::Setup,
            3 => Self::Processing,
            _ => Self::Unavailable,
        }
    }
}

/// Transaction handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// No transaction in flight.
    None,
    /// Master requested a transaction.
    Start,
    /// Worker completed the transaction.
    End,
}

impl TransactionStatus {
    const fn wire(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Start => 1,
            Self::End => 2,
        }
    }

    const fn from_wire(raw: u32) -> Self {
        match raw {
            1 => Self::Start,
            2 => Self::End,
            _ => Self::None,
        }
    }
}

/// Payload hashing option; declared by the master, never exercised here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashMode {
    /// Hashing disabled.
    Off,
    /// Hashing enabled.
    On,
}

impl HashMode {
    const fn wire(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::On => 1,
        }
    }

    const fn from_wire(raw: u32) -> Self {
        if raw == 1 {
            Self::On
        } else {
            Self::Off
        }
    }
}

// Master-owned field group: status, transaction request, operation word,
// meta size, meta owner, hash option. Six little-endian words.
#[derive(Debug, Clone, Copy, Default)]
struct MasterFields {
    status: u32,
    transaction_req: u32,
    operation: u32,
    meta_size: u32,
    meta_owner: u32,
    option_hash: u32,
}

impl MasterFields {
    fn decode(raw: &[u8]) -> Self {
        Self {
            status: u32::from_le_bytes(raw[0..4].try_into().unwrap()),
            transaction_req: u32::from_le_bytes(raw[4..8].try_into().unwrap()),
            operation: u32::from_le_bytes(raw[8..12].try_into().unwrap()),
            meta_size: u32::from_le_bytes(raw[12..16].try_into().unwrap()),
            meta_owner: u32::from_le_bytes(raw[16..20].try_into().unwrap()),
            option_hash: u32::from_le_bytes(raw[20..24].try_into().unwrap()),
        }
    }

    fn encode(&self) -> [u8; MASTER_FIELDS_SIZE as usize] {
        let mut raw = [0u8; MASTER_FIELDS_SIZE as usize];
        raw[0..4].copy_from_slice(&self.status.to_le_bytes());
        raw[4..8].copy_from_slice(&self.transaction_req.to_le_bytes());
        raw[8..12].copy_from_slice(&self.operation.to_le_bytes());
        raw[12..16].copy_from_slice(&self.meta_size.to_le_bytes());
        raw[16..20].copy_from_slice(&self.meta_owner.to_le_bytes());
        raw[20..24].copy_from_slice(&self.option_hash.to_le_bytes());
        raw
    }
}

// Worker-owned field group: status and transaction ack.
#[derive(Debug, Clone, Copy, Default)]
struct WorkerFields {
    status: u32,
    transaction_ack: u32,
}

impl WorkerFields {
    fn decode(raw: &[u8]) -> Self {
        Self {
            status: u32::from_le_bytes(raw[0..4].try_into().unwrap()),
            transaction_ack: u32::from_le_bytes(raw[4..8].try_into().unwrap()),
        }
    }

    fn encode(&self) -> [u8; WORKER_FIELDS_SIZE as usize] {
        let mut raw = [0u8; WORKER_FIELDS_SIZE as usize];
        raw[0..4].copy_from_slice(&self.status.to_le_bytes());
        raw[4..8].copy_from_slice(&self.transaction_ack.to_le_bytes());
        raw
    }
}

/// One endpoint of the mailbox.
///
/// Holds host-side mirrors of both field groups, the shared meta block, and
/// the data buffer; `control_read`/`control_write` move the mirrors across
/// the window in the protocol's mandated order. Accessors are gated by role:
/// a setter called from the wrong role is a successful no-op, so callers
/// must not lean on it for protocol discipline.
pub struct Pipe<'a, A> {
    device: &'a DeviceContext<A>,
    role: Endpoint,
    control: CppRegion,
    buffer: CppRegion,
    master: MasterFields,
    worker: WorkerFields,
    meta: Vec<u8>,
    data: Vec<u8>,
}

impl<'a, A: Aperture> Pipe<'a, A> {
    /// Builds an endpoint over the given control and buffer regions.
    ///
    /// The control region must fit both field groups plus the negotiated
    /// meta size (rounded up to 8); the buffer region must meet the
    /// [`MIN_BUFFER_SIZE`] floor. Nothing is allocated on failure.
    pub fn new(
        device: &'a DeviceContext<A>,
        role: Endpoint,
        buffer: CppRegion,
        control: CppRegion,
        meta_size: u32,
    ) -> Result<Self, PipeError> {
        let meta_len = round_up8(meta_size as u64);
        if MASTER_FIELDS_SIZE + WORKER_FIELDS_SIZE + meta_len > control.size {
            debug!("control region too small ({:#x} bytes)", control.size);
            return Err(PipeError::InvalidArgument(
                "control region too small for the negotiated meta size",
            ));
        }
        if buffer.size < MIN_BUFFER_SIZE {
            debug!("buffer region too small ({:#x} bytes)", buffer.size);
            return Err(PipeError::InvalidArgument("buffer region below the minimum size"));
        }

        let data_len = round_down(round_up8(buffer.size), MIN_BUFFER_SIZE);
        let master =
            MasterFields { meta_size: meta_len as u32, meta_owner: 0, ..Default::default() };

        Ok(Self {
            device,
            role,
            control,
            buffer,
            master,
            worker: WorkerFields::default(),
            meta: vec![0u8; meta_len as usize],
            data: vec![0u8; data_len as usize],
        })
    }

    /// Role this endpoint was built with.
    pub fn role(&self) -> Endpoint {
        self.role
    }

    /// Pulls the control block: the peer's field group first, shared meta
    /// last and only when its ownership belongs to the peer or is unset.
    pub fn control_read(&mut self) -> Result<(), PipeError> {
        let id = self.control.id;
        let base = self.control.addr;

        if self.role == Endpoint::Worker {
            let mut raw = [0u8; MASTER_FIELDS_SIZE as usize];
            self.device.read(id, base, &mut raw)?;
            self.master = MasterFields::decode(&raw);
        }
        if self.role == Endpoint::Master {
            let mut raw = [0u8; WORKER_FIELDS_SIZE as usize];
            self.device.read(id, base + MASTER_FIELDS_SIZE, &mut raw)?;
            self.worker = WorkerFields::decode(&raw);
        }

        if self.master.meta_owner != self.role.wire() {
            let len = self.meta_read_len();
            let meta_base = base + MASTER_FIELDS_SIZE + WORKER_FIELDS_SIZE;
            self.device.read(id, meta_base, &mut self.meta[..len])?;
        }
        Ok(())
    }

    /// Pushes the control block: shared meta first when this endpoint owns
    /// it, then this endpoint's own field group.
    pub fn control_write(&mut self) -> Result<(), PipeError> {
        let id = self.control.id;
        let base = self.control.addr;
        trace!(
            "control write: meta size {}, owner {}, role {:?}",
            self.master.meta_size,
            self.master.meta_owner,
            self.role
        );

        if self.master.meta_owner == self.role.wire() {
            let len = self.meta_read_len();
            let meta_base = base + MASTER_FIELDS_SIZE + WORKER_FIELDS_SIZE;
            self.device.write(id, meta_base, &self.meta[..len])?;
        }

        if self.role == Endpoint::Worker {
            let raw = self.worker.encode();
            self.device.write(id, base + MASTER_FIELDS_SIZE, &raw)?;
        }
        if self.role == Endpoint::Master {
            let raw = self.master.encode();
            self.device.write(id, base, &raw)?;
        }
        Ok(())
    }

    // The negotiated size travels in the master field group; clamp to the
    // local mirror so a disagreeing peer cannot push past it.
    fn meta_read_len(&self) -> usize {
        (round_up8(self.master.meta_size as u64) as usize).min(self.meta.len())
    }

    /// Pulls `round_up8(bytes)` of payload from the buffer region.
    pub fn buffer_read(&mut self, bytes: usize) -> Result<(), PipeError> {
        let len = round_up8(bytes as u64) as usize;
        if len > self.data.len() {
            return Err(PipeError::InvalidArgument("transfer exceeds the buffer mirror"));
        }
        let (id, addr) = (self.buffer.id, self.buffer.addr);
        self.device.read(id, addr, &mut self.data[..len])?;
        Ok(())
    }

    /// Pushes `round_up8(bytes)` of payload into the buffer region.
    pub fn buffer_write(&mut self, bytes: usize) -> Result<(), PipeError> {
        let len = round_up8(bytes as u64) as usize;
        if len > self.data.len() {
            return Err(PipeError::InvalidArgument("transfer exceeds the buffer mirror"));
        }
        self.device.write(self.buffer.id, self.buffer.addr, &self.data[..len])?;
        Ok(())
    }

    /// Worker status as observed by the master; `Unavailable` off-role.
    pub fn worker_status(&self) -> PipeStatus {
        if self.role == Endpoint::Master {
            PipeStatus::from_wire(self.worker.status)
        } else {
            PipeStatus::Unavailable
        }
    }

    /// Sets the worker status; a no-op unless this endpoint is the worker.
    pub fn set_worker_status(&mut self, status: PipeStatus) -> Result<(), PipeError> {
        if self.role == Endpoint::Worker {
            self.worker.status = status.wire();
        }
        Ok(())
    }

    /// Master status as observed by the worker; `Unavailable` off-role.
    pub fn master_status(&self) -> PipeStatus {
        if self.role == Endpoint::Worker {
            PipeStatus::from_wire(self.master.status)
        } else {
            PipeStatus::Unavailable
        }
    }

    /// Sets the master status; a no-op unless this endpoint is the master.
    pub fn set_master_status(&mut self, status: PipeStatus) -> Result<(), PipeError> {
        if self.role == Endpoint::Master {
            self.master.status = status.wire();
        }
        Ok(())
    }

    /// Worker transaction ack as observed by the master; `None` off-role.
    pub fn worker_transaction(&self) -> TransactionStatus {
        if self.role == Endpoint::Master {
            TransactionStatus::from_wire(self.worker.transaction_ack)
        } else {
            TransactionStatus::None
        }
    }

    /// Sets the worker transaction ack; a no-op unless this is the worker.
    pub fn set_worker_transaction(&mut self, status: TransactionStatus) -> Result<(), PipeError> {
        if self.role == Endpoint::Worker {
            self.worker.transaction_ack = status.wire();
        }
        Ok(())
    }

    /// Master transaction request as observed by the worker; `None` off-role.
    pub fn master_transaction(&self) -> TransactionStatus {
        if self.role == Endpoint::Worker {
            TransactionStatus::from_wire(self.master.transaction_req)
        } else {
            TransactionStatus::None
        }
    }

    /// Sets the master transaction request; a no-op unless this is the
    /// master.
    pub fn set_master_transaction(&mut self, status: TransactionStatus) -> Result<(), PipeError> {
        if self.role == Endpoint::Master {
            self.master.transaction_req = status.wire();
        }
        Ok(())
    }

    /// Operation word as observed by the worker; zero off-role.
    pub fn operation(&self) -> u32 {
        if self.role == Endpoint::Worker {
            self.master.operation
        } else {
            0
        }
    }

    /// Sets the operation word and hands the meta block to `meta_owner`; a
    /// no-op unless this is the master, or when `operation` is the reserved
    /// zero.
    pub fn set_operation(
        &mut self,
        operation: u32,
        meta_owner: Option<Endpoint>,
    ) -> Result<(), PipeError> {
        if operation != 0 && self.role == Endpoint::Master {
            self.master.operation = operation;
            self.master.meta_owner = meta_owner.map_or(0, Endpoint::wire);
        }
        Ok(())
    }

    /// Hash option as observed by the worker; `Off` off-role.
    pub fn hash_mode(&self) -> HashMode {
        if self.role == Endpoint::Worker {
            HashMode::from_wire(self.master.option_hash)
        } else {
            HashMode::Off
        }
    }

    /// Sets the hash option; a no-op unless this is the master.
    pub fn set_hash_mode(&mut self, mode: HashMode) -> Result<(), PipeError> {
        if self.role == Endpoint::Master {
            self.master.option_hash = mode.wire();
        }
        Ok(())
    }

    /// Shared-meta mirror.
    pub fn meta(&self) -> &[u8] {
        &self.meta
    }

    /// Mutable shared-meta mirror.
    pub fn meta_mut(&mut self) -> &mut [u8] {
        &mut self.meta
    }

    /// Data-buffer mirror.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable data-buffer mirror.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
