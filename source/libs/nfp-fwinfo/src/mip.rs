// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

//! Firmware descriptor block.
//!
//! Loaded firmware publishes a 96-byte little-endian header whose signature
//! and version must match before anything else in it is trusted. It names
//! the runtime symbol table and its string table.

use log::debug;

use nfp_cpp::DeviceContext;
use nfp_hal::Aperture;

use crate::nffw::NffwInfo;
use crate::FwError;

/// Expected header signature, "MIP\0" as a little-endian word.
pub const SIGNATURE: u32 = 0x0050_494d;

/// The only header version this implementation reads.
pub const VERSION: u32 = 1;

/// Size of the on-wire header.
pub const HEADER_SIZE: usize = 96;

const NAME_LEN: usize = 16;
const TOOLCHAIN_LEN: usize = 32;

/// Validated firmware descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mip {
    /// Declared descriptor size in bytes.
    pub size: u32,
    /// Offset of the first auxiliary entry.
    pub first_entry: u32,
    /// Firmware version word.
    pub fw_version: u32,
    /// Build number.
    pub build_num: u32,
    /// Build timestamp.
    pub build_time: u32,
    /// Load timestamp.
    pub load_time: u32,
    symtab_addr: u32,
    symtab_size: u32,
    strtab_addr: u32,
    strtab_size: u32,
    name: String,
    toolchain: String,
}

impl Mip {
    /// Reads and validates the descriptor of the first loaded image.
    pub fn open<A: Aperture>(device: &DeviceContext<A>) -> Result<Self, FwError> {
        let nffw = NffwInfo::open(device)?;
        let (id, addr) = nffw.mip_location()?;
        let mut raw = [0u8; HEADER_SIZE];
        device.read(id, addr, &mut raw)?;
        Self::decode(&raw)
    }

    /// Decodes and validates a raw header.
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Result<Self, FwError> {
        let word = |index: usize| {
            u32::from_le_bytes(raw[index * 4..index * 4 + 4].try_into().unwrap())
        };

        let signature = word(0);
        if signature != SIGNATURE {
            debug!("incorrect descriptor signature ({signature:#010x})");
            return Err(FwError::BadSignature(signature));
        }
        let version = word(1);
        if version != VERSION {
            debug!("unsupported descriptor version ({version})");
            return Err(FwError::UnsupportedVersion(version));
        }

        Ok(Self {
            size: word(2),
            first_entry: word(3),
            fw_version: word(4),
            build_num: word(5),
            build_time: word(6),
            load_time: word(7),
            symtab_addr: word(8),
            symtab_size: word(9),
            strtab_addr: word(10),
            strtab_size: word(11),
            name: truncated_str(&raw[48..48 + NAME_LEN]),
            toolchain: truncated_str(&raw[64..64 + TOOLCHAIN_LEN]),
        })
    }

    /// Firmware name, nul-truncated.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Toolchain string, nul-truncated.
    pub fn toolchain(&self) -> &str {
        &self.toolchain
    }

    /// Address and size of the runtime symbol table.
    pub fn symtab(&self) -> (u32, u32) {
        (self.symtab_addr, self.symtab_size)
    }

    /// Address and size of the symbol name table.
    pub fn strtab(&self) -> (u32, u32) {
        (self.strtab_addr, self.strtab_size)
    }
}

/// Interprets a fixed-size field as a nul-terminated string. The final byte
/// is ignored so an unterminated field cannot run past its bounds.
fn truncated_str(raw: &[u8]) -> String {
    let bounded = &raw[..raw.len() - 1];
    let end = bounded.iter().position(|&b| b == 0).unwrap_or(bounded.len());
    String::from_utf8_lossy(&bounded[..end]).into_owned()
}
