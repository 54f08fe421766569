// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: CPP address-space access through BAR slice windows
//! OWNERS: @host-tools
//! STATUS: Stable for the file-transfer path
//!
//! PUBLIC API:
//!   - CppId: packed target/action/token/island identifier
//!   - DeviceContext: slice table + mapped aperture, read/write/configure
//!   - CppRegion: descriptor for a card memory block
//!   - CppLock/LockProvider: injectable cross-endpoint lock capability
//!
//! DEPENDENCIES:
//!   - nfp-hal::Aperture: raw access to the mapped BAR
//!
//! The card exposes a flat 40-bit address space partitioned by target ids.
//! The host reaches it through a fixed-capacity table of slice windows, each
//! re-routable by programming a 32-bit expansion register inside the base
//! mapping. All bulk data moves in 8-byte units.

mod lock;

pub use lock::{CppLock, LockProvider, NullLock, NullLockProvider};

use log::debug;
use thiserror::Error;

use nfp_hal::{is_aligned8, Aperture};

/// Number of slice windows in the table.
pub const SLICE_MAX: usize = 8;

/// Offset of the expansion registers inside the base mapping; slot `n` lives
/// at `SLICE_EXPANSION_OFFSET + (n << 2)`.
pub const SLICE_EXPANSION_OFFSET: u64 = 0x30000;

/// Memory-unit target id.
pub const TARGET_MU: u8 = 7;

/// Island-local XPB target id.
pub const TARGET_ISLAND_XPB: u8 = 0xe;

/// External memory island 0.
pub const ISLAND_EMEM0: u8 = 24;

/// Read-or-write wildcard action.
pub const ACTION_RW: u8 = 32;

/// Atomic-read action used when scanning shared tables.
pub const ACTION_ATOMIC_READ: u8 = 3;

const TARGET_ID_MASK: u32 = 0x1f;

/// Errors surfaced by window translation and access.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CppError {
    /// No configured slice covers the requested range.
    #[error("no window covers target {target} address {address:#x} len {len:#x}")]
    NoMatchingWindow {
        /// Target id of the rejected access.
        target: u8,
        /// Global address of the rejected access.
        address: u64,
        /// Length of the rejected access in bytes.
        len: u64,
    },
    /// Address or length is not a multiple of 8; no bytes were moved.
    #[error("access at {address:#x} of {len:#x} bytes is not 8-byte aligned")]
    MisalignedAccess {
        /// Global address of the rejected access.
        address: u64,
        /// Length of the rejected access in bytes.
        len: u64,
    },
    /// The mapping could not supply the full transfer.
    #[error("window transfer at {address:#x} moved fewer than {len:#x} bytes")]
    ShortTransfer {
        /// Global address of the failed transfer.
        address: u64,
        /// Requested length in bytes.
        len: u64,
    },
    /// Malformed call.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A cross-endpoint lock operation failed.
    #[error("device lock: {0}")]
    Lock(&'static str),
}

/// Packed CPP identifier: `target<<24 | token<<16 | action<<8 | island`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CppId(u32);

impl CppId {
    /// Packs target, action, and token with no island.
    pub const fn new(target: u8, action: u8, token: u8) -> Self {
        Self::with_island(target, action, token, 0)
    }

    /// Packs target, action, token, and island.
    pub const fn with_island(target: u8, action: u8, token: u8, island: u8) -> Self {
        Self(
            ((target as u32 & 0x7f) << 24)
                | ((token as u32) << 16)
                | ((action as u32) << 8)
                | island as u32,
        )
    }

    /// Rebuilds an identifier from its wire encoding.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Wire encoding of the identifier.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Target id field.
    pub const fn target(self) -> u8 {
        ((self.0 >> 24) & TARGET_ID_MASK) as u8
    }

    /// Token field.
    pub const fn token(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Action field.
    pub const fn action(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Island field.
    pub const fn island(self) -> u8 {
        self.0 as u8
    }
}

/// Descriptor for a card memory block reachable over CPP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CppRegion {
    /// Symbolic name of the block.
    pub name: &'static str,
    /// Access identifier.
    pub id: CppId,
    /// Global address of the block.
    pub addr: u64,
    /// Size of the block in bytes.
    pub size: u64,
}

/// One configured slice window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarSlice {
    /// Target id this slice serves.
    pub target: u8,
    /// Global base address the slice exposes.
    pub base: u64,
    /// Size of the exposed range in bytes.
    pub size: u64,
    /// Expansion register value that routes the slice.
    pub expansion: u32,
}

/// Slice table plus the mapped aperture backing it.
///
/// Created once at device bring-up and passed by reference into every call;
/// there is no process-wide state. The single-consumer assumption of the
/// protocol means no interior locking: configuration takes `&mut self`,
/// steady-state access takes `&self`.
pub struct DeviceContext<A> {
    aperture: A,
    slices: [Option<BarSlice>; SLICE_MAX],
    locks: Box<dyn LockProvider>,
}

impl<A> std::fmt::Debug for DeviceContext<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext").finish_non_exhaustive()
    }
}

impl<A: Aperture> DeviceContext<A> {
    /// Wraps a mapped aperture. The mapping length must be a power of two of
    /// at least 64 bytes so that each of the 8 slice segments masks cleanly.
    pub fn new(aperture: A) -> Result<Self, CppError> {
        Self::with_lock_provider(aperture, Box::new(NullLockProvider))
    }

    /// Like [`DeviceContext::new`] with an explicit lock capability.
    pub fn with_lock_provider(
        aperture: A,
        locks: Box<dyn LockProvider>,
    ) -> Result<Self, CppError> {
        let len = aperture.len();
        if !len.is_power_of_two() || len < 64 {
            return Err(CppError::InvalidArgument(
                "aperture length must be a power of two of at least 64 bytes",
            ));
        }
        Ok(Self { aperture, slices: [None; SLICE_MAX], locks })
    }

    /// Bytes each slice segment spans inside the mapping.
    pub fn window_span(&self) -> u64 {
        self.aperture.len() / 8
    }

    /// Allocates a lock handle for a card-memory location.
    pub fn alloc_lock(&self, target: u8, address: u64, key: u32) -> Box<dyn CppLock> {
        self.locks.alloc(target, address, key)
    }

    /// Programs slice `slot` to expose `[base, base+size)` of `target`.
    ///
    /// The expansion register is only rewritten when its programmed value
    /// differs, so re-attaching to an already-routed card is quiet.
    pub fn configure_slice(
        &mut self,
        slot: usize,
        target: u8,
        base: u64,
        size: u64,
        expansion: u32,
    ) -> Result<(), CppError> {
        if slot >= SLICE_MAX {
            return Err(CppError::InvalidArgument("slice slot out of range"));
        }
        let reg = SLICE_EXPANSION_OFFSET + ((slot as u64) << 2);
        let current = self
            .aperture
            .read_reg(reg)
            .map_err(|_| CppError::InvalidArgument("expansion registers outside the mapping"))?;
        if current != expansion {
            self.aperture
                .write_reg(reg, expansion)
                .map_err(|_| CppError::InvalidArgument("expansion registers outside the mapping"))?;
            debug!("configured expansion register {slot} (value {expansion:#010x})");
        } else {
            debug!("expansion register {slot} already configured (value {expansion:#010x})");
        }
        self.slices[slot] = Some(BarSlice { target, base, size, expansion });
        Ok(())
    }

    /// Finds the first slice whose range fully contains the request.
    ///
    /// Overlapping slices for one target are a configuration error that is
    /// not detected here; the first match wins.
    pub fn lookup(&self, target: u8, address: u64, len: u64) -> Result<usize, CppError> {
        for (index, slice) in self.slices.iter().enumerate() {
            if let Some(slice) = slice {
                if slice.target == target
                    && address >= slice.base
                    && address + len < slice.base + slice.size
                {
                    return Ok(index);
                }
            }
        }
        debug!("no slice for target {target} address {address:#x} len {len:#x}");
        Err(CppError::NoMatchingWindow { target, address, len })
    }

    /// Reads `dst.len()` bytes from `address` in the space named by `id`.
    pub fn read(&self, id: CppId, address: u64, dst: &mut [u8]) -> Result<(), CppError> {
        let len = dst.len() as u64;
        let address = rewrite_ddr(id, address);
        if !is_aligned8(address) || !is_aligned8(len) {
            return Err(CppError::MisalignedAccess { address, len });
        }
        let offset = self.translate(id.target(), address, len)?;
        self.aperture
            .read(offset, dst)
            .map_err(|_| CppError::ShortTransfer { address, len })
    }

    /// Writes `src` to `address` in the space named by `id`.
    pub fn write(&self, id: CppId, address: u64, src: &[u8]) -> Result<(), CppError> {
        let len = src.len() as u64;
        let address = rewrite_ddr(id, address);
        if !is_aligned8(address) || !is_aligned8(len) {
            return Err(CppError::MisalignedAccess { address, len });
        }
        let offset = self.translate(id.target(), address, len)?;
        self.aperture
            .write(offset, src)
            .map_err(|_| CppError::ShortTransfer { address, len })
    }

    fn translate(&self, target: u8, address: u64, len: u64) -> Result<u64, CppError> {
        let slice = self.lookup(target, address, len)?;
        let span = self.window_span();
        Ok(span * slice as u64 + (address & (span - 1)))
    }
}

/// Off-chip memory-controller accesses gain a high bit selecting the
/// extended 40-bit range.
fn rewrite_ddr(id: CppId, address: u64) -> u64 {
    if id.island() == ISLAND_EMEM0 && id.target() == TARGET_MU {
        address | 1 << 37
    } else {
        address
    }
}
