// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Discovery of named card memory and firmware-exported symbols
//! OWNERS: @host-tools
//! STATUS: Stable for the file-transfer path
//!
//! PUBLIC API:
//!   - resource: fixed on-card directory mapping short names to regions
//!   - nffw: firmware map locating the loaded image's descriptor block
//!   - mip: validated firmware descriptor with symbol/string table bounds
//!   - rtsym: decoded runtime symbol table with lookup by name
//!
//! DEPENDENCIES:
//!   - nfp-cpp::DeviceContext: window access to card memory
//!
//! The three lookups chain: the `nfp.nffw` resource names the first loaded
//! image's descriptor block, the descriptor block names the symbol and
//! string tables, and the symbol table names the regions the transfer
//! protocol rides on. A failure anywhere invalidates the whole chain.

pub mod mip;
pub mod nffw;
pub mod resource;
pub mod rtsym;

pub use mip::Mip;
pub use nffw::NffwInfo;
pub use resource::{Resource, ResourceLocation};
pub use rtsym::{Symbol, SymbolTable, SymbolType};

use thiserror::Error;

use nfp_cpp::CppError;

/// Errors surfaced by the discovery chain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FwError {
    /// The directory holds no entry with the requested name.
    #[error("resource `{0}` not found")]
    ResourceNotFound(String),
    /// Looking up the directory's own self-descriptor is unsupported.
    #[error("looking up the resource table through itself is not supported")]
    SelfLookup,
    /// A shared table failed structural validation.
    #[error("table corrupt: {0}")]
    TableCorrupt(&'static str),
    /// The firmware descriptor signature did not match.
    #[error("bad firmware descriptor signature {0:#010x}")]
    BadSignature(u32),
    /// The firmware descriptor or map version is not one we can read.
    #[error("unsupported firmware structure version {0}")]
    UnsupportedVersion(u32),
    /// The firmware map has not been initialized by a loader.
    #[error("firmware map not initialized")]
    NotInitialized,
    /// The map lists no loaded firmware image.
    #[error("no loaded firmware image")]
    NoFirmwareLoaded,
    /// Window translation or access failure underneath the lookup.
    #[error(transparent)]
    Cpp(#[from] CppError),
}
