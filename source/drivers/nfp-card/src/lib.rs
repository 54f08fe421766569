// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Card bring-up for the file-transfer path
//! OWNERS: @host-tools
//! STATUS: Stable
//!
//! PUBLIC API:
//!   - NfpCard: device context plus resolved transfer regions
//!   - expansion_register(): slice routing value for a window base
//!
//! DEPENDENCIES:
//!   - nfp-cpp::DeviceContext: slice programming and window access
//!   - nfp-fwinfo::SymbolTable: firmware-published region discovery
//!
//! Bring-up programs the two fixed slices (island configuration space and
//! the fixed-table region), asks the loaded firmware where its transfer
//! regions live, and routes two more slices at them. Firmware that does not
//! publish the symbols gets the hard-coded fallback addresses; this is the
//! only place a discovery failure falls back instead of failing.

use log::debug;

use nfp_cpp::{
    CppError, CppId, CppRegion, DeviceContext, ACTION_RW, ISLAND_EMEM0, TARGET_ISLAND_XPB,
    TARGET_MU,
};
use nfp_fwinfo::SymbolTable;
use nfp_hal::Aperture;

/// Runtime symbol naming the mailbox control block.
pub const SYMBOL_CONTROL: &str = "os_file_control";

/// Runtime symbol naming the mailbox data buffer.
pub const SYMBOL_BUFFER: &str = "os_file_buffer";

/// Fallback control-block address when firmware publishes no symbols.
pub const DEFAULT_CONTROL_ADDR: u64 = 0x200_0000;

/// Fallback control-block size.
pub const DEFAULT_CONTROL_SIZE: u64 = 0x400;

/// Fallback data-buffer address.
pub const DEFAULT_BUFFER_ADDR: u64 = 0x300_0000;

/// Fallback data-buffer size.
pub const DEFAULT_BUFFER_SIZE: u64 = 0x40_0000;

/// Fallback island for both regions.
pub const DEFAULT_DOMAIN: u8 = ISLAND_EMEM0;

/// Fallback target for both regions.
pub const DEFAULT_TARGET: u8 = TARGET_MU;

// Direct-access memory-unit accesses land in this window of the global
// address space; the transfer slices are routed inside it.
const DIRECT_WINDOW_BASE: u64 = 1 << 37;
const TRANSFER_WINDOW_SIZE: u64 = 0x100_0000;

/// Routing value for a slice window starting at `base`.
pub const fn expansion_register(base: u64) -> u32 {
    let steering = (1 << 29) | (1 << 27) | (7 << 23);
    steering | ((base >> 19) & 0x1f_ffe0) as u32
}

/// A brought-up card: the window table plus the two resolved regions the
/// mailbox protocol rides on.
pub struct NfpCard<A> {
    device: DeviceContext<A>,
    control: CppRegion,
    buffer: CppRegion,
}

impl<A: Aperture> NfpCard<A> {
    /// Brings the card up over an already-mapped aperture.
    ///
    /// Bus enumeration and BAR mapping happen elsewhere; this programs the
    /// slice table and resolves the transfer regions.
    pub fn attach(aperture: A) -> Result<Self, CppError> {
        let mut device = DeviceContext::new(aperture)?;
        device.configure_slice(1, TARGET_ISLAND_XPB, 0x0, 0x10_0000, 0x2700_0000)?;
        device.configure_slice(2, TARGET_MU, 0x81_0000_0000, 0x100_0000, 0x0383_8100)?;

        // The symbol tables live behind the direct-access window; route a
        // slice over it for the duration of the lookup. The slot is
        // reprogrammed with the control region right after.
        device.configure_slice(
            3,
            TARGET_MU,
            DIRECT_WINDOW_BASE,
            TRANSFER_WINDOW_SIZE,
            expansion_register(DIRECT_WINDOW_BASE),
        )?;

        let (control, buffer) = resolve_transfer_regions(&device);
        debug!("control region: address {:#x}, size {:#x}", control.addr, control.size);
        debug!("buffer region: address {:#x}, size {:#x}", buffer.addr, buffer.size);

        let control_base = DIRECT_WINDOW_BASE + control.addr;
        device.configure_slice(
            3,
            TARGET_MU,
            control_base,
            TRANSFER_WINDOW_SIZE,
            expansion_register(control_base),
        )?;
        let buffer_base = DIRECT_WINDOW_BASE + buffer.addr;
        device.configure_slice(
            4,
            TARGET_MU,
            buffer_base,
            TRANSFER_WINDOW_SIZE,
            expansion_register(buffer_base),
        )?;

        Ok(Self { device, control, buffer })
    }

    /// Window table of the card.
    pub fn device(&self) -> &DeviceContext<A> {
        &self.device
    }

    /// Resolved mailbox control region.
    pub fn control(&self) -> CppRegion {
        self.control
    }

    /// Resolved mailbox data-buffer region.
    pub fn buffer(&self) -> CppRegion {
        self.buffer
    }
}

fn resolve_transfer_regions<A: Aperture>(device: &DeviceContext<A>) -> (CppRegion, CppRegion) {
    match SymbolTable::read(device) {
        Ok(table) => {
            let control = table
                .lookup(SYMBOL_CONTROL)
                .and_then(|symbol| region_from_symbol(SYMBOL_CONTROL, symbol));
            let buffer = table
                .lookup(SYMBOL_BUFFER)
                .and_then(|symbol| region_from_symbol(SYMBOL_BUFFER, symbol));
            if let (Some(control), Some(buffer)) = (control, buffer) {
                debug!("transfer regions published by firmware `{}`", SYMBOL_CONTROL);
                return (control, buffer);
            }
        }
        Err(err) => debug!("runtime symbol chain unavailable: {err}"),
    }

    debug!("firmware not detected, using fallback addresses");
    let id = CppId::with_island(DEFAULT_TARGET, ACTION_RW, 0, DEFAULT_DOMAIN);
    (
        CppRegion {
            name: SYMBOL_CONTROL,
            id,
            addr: DEFAULT_CONTROL_ADDR,
            size: DEFAULT_CONTROL_SIZE,
        },
        CppRegion { name: SYMBOL_BUFFER, id, addr: DEFAULT_BUFFER_ADDR, size: DEFAULT_BUFFER_SIZE },
    )
}

// Symbols with a remapped (negative) target or an unusable domain cannot be
// reached through a window and fall back with everything else.
fn region_from_symbol(name: &'static str, symbol: &nfp_fwinfo::Symbol) -> Option<CppRegion> {
    let target = u8::try_from(symbol.target).ok()?;
    let island = u8::try_from(symbol.domain).ok()?;
    Some(CppRegion {
        name,
        id: CppId::with_island(target, ACTION_RW, 0, island),
        addr: symbol.addr,
        size: symbol.size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_register_folds_the_window_base() {
        assert_eq!(expansion_register(0x20_0200_0000), 0x2b84_0040);
        assert_eq!(expansion_register(DIRECT_WINDOW_BASE), 0x2b84_0000);
    }
}
