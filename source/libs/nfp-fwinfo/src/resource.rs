// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

//! On-card resource directory.
//!
//! A 4096-byte table at a fixed global address maps 8-byte zero-padded names
//! to (target, address, size) regions. Entries are scanned in address order
//! with atomic-read semantics; the first exact name match wins.

use log::debug;

use nfp_cpp::{CppId, CppLock, DeviceContext, ACTION_ATOMIC_READ, TARGET_MU};
use nfp_hal::Aperture;

use crate::FwError;

/// Target holding the directory.
pub const TABLE_TARGET: u8 = TARGET_MU;

/// Fixed global address of the directory.
pub const TABLE_BASE: u64 = 0x81_0000_0000;

/// Total size of the directory in bytes.
pub const TABLE_SIZE: usize = 4096;

/// Size of one packed directory entry.
pub const ENTRY_SIZE: usize = 32;

/// Length of the zero-padded entry name.
pub const NAME_LEN: usize = 8;

/// The directory's own self-descriptor name; lookups of it are rejected.
pub const TABLE_NAME: &str = "nfp.res";

const TABLE_KEY: u32 = 0;
const ENTRY_COUNT: usize = TABLE_SIZE / ENTRY_SIZE;

/// Resolved location of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLocation {
    /// Access identifier built from the entry's target/action/token.
    pub id: CppId,
    /// Byte address of the region (entries store 256-byte pages).
    pub addr: u64,
    /// Byte size of the region.
    pub size: u64,
}

// Wire entry: owner u32, key u32, name[8], reserved[5], action u8,
// token u8, target u8, page_offset u32, page_size u32; little-endian.
struct Entry {
    name: [u8; NAME_LEN],
    action: u8,
    token: u8,
    target: u8,
    page_offset: u32,
    page_size: u32,
    key: u32,
}

impl Entry {
    fn decode(raw: &[u8; ENTRY_SIZE]) -> Self {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&raw[8..16]);
        Self {
            name,
            action: raw[21],
            token: raw[22],
            target: raw[23],
            page_offset: u32::from_le_bytes(raw[24..28].try_into().unwrap()),
            page_size: u32::from_le_bytes(raw[28..32].try_into().unwrap()),
            key: u32::from_le_bytes(raw[4..8].try_into().unwrap()),
        }
    }

    fn location(&self) -> ResourceLocation {
        ResourceLocation {
            id: CppId::new(self.target, self.action, self.token),
            addr: (self.page_offset as u64) << 8,
            size: (self.page_size as u64) << 8,
        }
    }
}

/// Pads a name to the 8-byte wire form, truncating longer names.
fn pad_name(name: &str) -> [u8; NAME_LEN] {
    let mut padded = [0u8; NAME_LEN];
    let take = name.len().min(NAME_LEN);
    padded[..take].copy_from_slice(&name.as_bytes()[..take]);
    padded
}

/// Scans the directory for `name`.
///
/// Every entry is read individually through the atomic-read action so a
/// concurrent owner update is observed whole. A read failure mid-scan aborts
/// the lookup; exhausting the table yields [`FwError::ResourceNotFound`].
pub fn find<A: Aperture>(
    device: &DeviceContext<A>,
    name: &str,
) -> Result<ResourceLocation, FwError> {
    let (location, _key) = find_entry(device, name)?;
    Ok(location)
}

fn find_entry<A: Aperture>(
    device: &DeviceContext<A>,
    name: &str,
) -> Result<(ResourceLocation, u32), FwError> {
    let padded = pad_name(name);
    if padded == pad_name(TABLE_NAME) {
        debug!("grabbing the device lock through the directory is not supported");
        return Err(FwError::SelfLookup);
    }

    let id = CppId::new(TABLE_TARGET, ACTION_ATOMIC_READ, 0);
    let mut raw = [0u8; ENTRY_SIZE];
    for index in 0..ENTRY_COUNT {
        let addr = TABLE_BASE + (ENTRY_SIZE * index) as u64;
        device.read(id, addr, &mut raw)?;
        let entry = Entry::decode(&raw);
        if entry.name == padded {
            return Ok((entry.location(), entry.key));
        }
    }
    Err(FwError::ResourceNotFound(name.to_string()))
}

/// An acquired directory entry holding its per-resource lock.
///
/// The lock comes from the device's injected [`nfp_cpp::LockProvider`];
/// dropping the handle releases it.
pub struct Resource {
    name: String,
    location: ResourceLocation,
    lock: Box<dyn CppLock>,
}

impl Resource {
    /// Looks up `name` under the directory-wide lock and locks the found
    /// entry. The directory lock is released before returning, whatever the
    /// outcome.
    pub fn acquire<A: Aperture>(
        device: &DeviceContext<A>,
        name: &str,
    ) -> Result<Self, FwError> {
        let table_lock = device.alloc_lock(TABLE_TARGET, TABLE_BASE, TABLE_KEY);
        table_lock.lock()?;
        let result = find_entry(device, name);
        let acquired = result.and_then(|(location, key)| {
            let lock = device.alloc_lock(location.id.target(), location.addr, key);
            lock.try_lock()?;
            Ok(Self { name: name.to_string(), location, lock })
        });
        table_lock.unlock()?;
        acquired
    }

    /// Name the resource was acquired under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Access identifier of the region.
    pub fn id(&self) -> CppId {
        self.location.id
    }

    /// Byte address of the region.
    pub fn addr(&self) -> u64 {
        self.location.addr
    }

    /// Byte size of the region.
    pub fn size(&self) -> u64 {
        self.location.size
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        let _ = self.lock.unlock();
    }
}
