// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

//! Firmware map.
//!
//! The `nfp.nffw` resource holds two flag words followed by fixed-capacity
//! per-engine and per-image arrays. A 12-bit version counter in the first
//! flag word selects the array capacity (120 entries for versions 0 and 1,
//! 200 for version 2); an init bit in the same word gates validity. The map
//! names where the first loaded image published its descriptor block.

use nfp_cpp::{CppId, DeviceContext};
use nfp_hal::Aperture;

use crate::resource::Resource;
use crate::FwError;

/// Directory name of the firmware map resource.
pub const FW_MAP_RESOURCE: &str = "nfp.nffw";

const INFO_VERSION_CURRENT: u32 = 2;

const MEINFO_CNT_V1: usize = 120;
const FWINFO_CNT_V1: usize = 120;
const MEINFO_CNT_V2: usize = 200;
const FWINFO_CNT_V2: usize = 200;

const FLAGS_SIZE: usize = 8;
const MEINFO_ENTRY_SIZE: usize = 4;
const FWINFO_ENTRY_SIZE: usize = 12;

// Largest supported layout; smaller versions still fit inside it.
const WIRE_SIZE: usize =
    FLAGS_SIZE + MEINFO_CNT_V2 * MEINFO_ENTRY_SIZE + FWINFO_CNT_V2 * FWINFO_ENTRY_SIZE;

const MU_LOCALITY_LSB: u32 = 38;
const MU_ADDR_ACCESS_TYPE_MASK: u64 = 3;
const MU_ADDR_ACCESS_TYPE_DIRECT: u64 = 2;

/// One per-image entry of the firmware map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwImageEntry {
    // loaded bit 31, memory-unit direct-access bit 8, offset bits 39:32 in
    // bits 7:0; the low 32 offset bits live in their own word.
    packed: u32,
    mip_cppid: u32,
    mip_offset_lo: u32,
}

impl FwImageEntry {
    fn decode(raw: &[u8]) -> Self {
        Self {
            packed: u32::from_le_bytes(raw[0..4].try_into().unwrap()),
            mip_cppid: u32::from_le_bytes(raw[4..8].try_into().unwrap()),
            mip_offset_lo: u32::from_le_bytes(raw[8..12].try_into().unwrap()),
        }
    }

    /// Whether this image slot holds a loaded image.
    pub fn loaded(&self) -> bool {
        (self.packed >> 31) & 1 == 1
    }

    /// Whether descriptor accesses must force direct memory-unit semantics.
    pub fn mip_mu_da(&self) -> bool {
        (self.packed >> 8) & 1 == 1
    }

    /// Access identifier of the descriptor block; zero means none.
    pub fn mip_cppid(&self) -> u32 {
        self.mip_cppid
    }

    /// Full descriptor offset rebuilt from the split high/low fields.
    pub fn mip_offset(&self) -> u64 {
        ((self.packed as u64 & 0xff) << 32) | self.mip_offset_lo as u64
    }
}

/// Open firmware map holding the acquired `nfp.nffw` resource.
pub struct NffwInfo {
    _resource: Resource,
    version: u32,
    images: Vec<FwImageEntry>,
}

impl NffwInfo {
    /// Acquires and validates the firmware map.
    ///
    /// The resource must be large enough for the on-wire layout, the init
    /// flag must be set, and the version counter must be one we can read;
    /// any failure releases the resource.
    pub fn open<A: Aperture>(device: &DeviceContext<A>) -> Result<Self, FwError> {
        let resource = Resource::acquire(device, FW_MAP_RESOURCE)?;
        if (WIRE_SIZE as u64) > resource.size() {
            return Err(FwError::TableCorrupt("firmware map smaller than its layout"));
        }

        let mut raw = vec![0u8; WIRE_SIZE];
        device.read(resource.id(), resource.addr(), &mut raw)?;

        let flags0 = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        if flags0 & 1 == 0 {
            return Err(FwError::NotInitialized);
        }
        let version = (flags0 >> 16) & 0xfff;
        if version > INFO_VERSION_CURRENT {
            return Err(FwError::UnsupportedVersion(version));
        }

        // Version 0 predates the counter and used the version-1 layout.
        let (meinfo_cnt, fwinfo_cnt) = if version == INFO_VERSION_CURRENT {
            (MEINFO_CNT_V2, FWINFO_CNT_V2)
        } else {
            (MEINFO_CNT_V1, FWINFO_CNT_V1)
        };
        let fwinfo_off = FLAGS_SIZE + meinfo_cnt * MEINFO_ENTRY_SIZE;
        let images = raw[fwinfo_off..fwinfo_off + fwinfo_cnt * FWINFO_ENTRY_SIZE]
            .chunks_exact(FWINFO_ENTRY_SIZE)
            .map(FwImageEntry::decode)
            .collect();

        Ok(Self { _resource: resource, version, images })
    }

    /// Version counter read from the flags word.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// First per-image entry flagged loaded.
    pub fn first_loaded_image(&self) -> Option<&FwImageEntry> {
        self.images.iter().find(|image| image.loaded())
    }

    /// Location of the first loaded image's descriptor block.
    ///
    /// When the entry requests direct memory-unit access, the offset's
    /// locality field is rewritten to force uncached semantics.
    pub fn mip_location(&self) -> Result<(CppId, u64), FwError> {
        let image = self.first_loaded_image().ok_or(FwError::NoFirmwareLoaded)?;
        let id = CppId::from_raw(image.mip_cppid());
        let mut offset = image.mip_offset();
        if image.mip_mu_da() {
            offset &= !(MU_ADDR_ACCESS_TYPE_MASK << MU_LOCALITY_LSB);
            offset |= MU_ADDR_ACCESS_TYPE_DIRECT << MU_LOCALITY_LSB;
        }
        Ok((id, offset))
    }
}
