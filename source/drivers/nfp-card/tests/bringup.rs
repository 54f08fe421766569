// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bring-up tests: symbol-published transfer regions and the fallback path.

use nfp_card::{NfpCard, DEFAULT_BUFFER_ADDR, DEFAULT_CONTROL_ADDR, DEFAULT_CONTROL_SIZE};
use nfp_cpp::{CppId, DeviceContext, ACTION_RW, ISLAND_EMEM0, TARGET_MU};
use nfp_hal::MemAperture;

const APERTURE_LEN: usize = 512 * 1024;

const TABLE_BASE: u64 = 0x81_0000_0000;
const FW_MAP_ADDR: u64 = 0x81_0000_1000;
const MIP_ADDR: u64 = 0x81_0000_4000;
const SYMTAB_ADDR: u32 = 0x1000;
const STRTAB_ADDR: u32 = 0x1800;

const CONTROL_ADDR: u64 = 0x4000;
const CONTROL_SIZE: u64 = 0x400;
const BUFFER_ADDR: u64 = 0x8000;
const BUFFER_SIZE: u64 = 0x2000;

fn rw() -> CppId {
    CppId::new(TARGET_MU, ACTION_RW, 0)
}

fn dram() -> CppId {
    CppId::with_island(TARGET_MU, ACTION_RW, 0, ISLAND_EMEM0)
}

/// Stages a complete firmware image (directory, map, descriptor, symbols)
/// into the shared aperture before bring-up runs.
fn stage_firmware(mem: &MemAperture) {
    let mut ctx = DeviceContext::new(mem.clone()).unwrap();
    ctx.configure_slice(2, TARGET_MU, TABLE_BASE, 0x1_0000, 0x0383_8100).unwrap();
    ctx.configure_slice(3, TARGET_MU, 1 << 37, 0x1_0000, 0x2700_0000).unwrap();

    // Directory entry 0: nfp.nffw, 13 pages at FW_MAP_ADDR.
    let mut entry = [0u8; 32];
    entry[8..16].copy_from_slice(b"nfp.nffw");
    entry[21] = ACTION_RW;
    entry[23] = TARGET_MU;
    entry[24..28].copy_from_slice(&((FW_MAP_ADDR >> 8) as u32).to_le_bytes());
    entry[28..32].copy_from_slice(&13u32.to_le_bytes());
    ctx.write(rw(), TABLE_BASE, &entry).unwrap();

    // Firmware map: version 2, initialized, image 0 loaded with its
    // descriptor at MIP_ADDR.
    let mut map = vec![0u8; 3208];
    map[0..4].copy_from_slice(&((2u32 << 16) | 1).to_le_bytes());
    let fwinfo_off = 8 + 200 * 4;
    let packed = (1u32 << 31) | ((MIP_ADDR >> 32) as u32 & 0xff);
    map[fwinfo_off..fwinfo_off + 4].copy_from_slice(&packed.to_le_bytes());
    map[fwinfo_off + 4..fwinfo_off + 8].copy_from_slice(&rw().raw().to_le_bytes());
    map[fwinfo_off + 8..fwinfo_off + 12].copy_from_slice(&(MIP_ADDR as u32).to_le_bytes());
    ctx.write(rw(), FW_MAP_ADDR, &map).unwrap();

    // String and symbol tables.
    let mut blob = Vec::new();
    blob.extend_from_slice(b"os_file_control\0os_file_buffer\0");
    let strtab_size = blob.len() as u32;
    blob.resize(nfp_hal::round_up8(strtab_size as u64) as usize, 0);
    ctx.write(dram(), STRTAB_ADDR as u64, &blob).unwrap();

    let mut symtab = Vec::new();
    symtab.extend_from_slice(&symbol_entry(CONTROL_ADDR, 0, CONTROL_SIZE));
    symtab.extend_from_slice(&symbol_entry(BUFFER_ADDR, 16, BUFFER_SIZE));
    ctx.write(dram(), SYMTAB_ADDR as u64, &symtab).unwrap();

    // Descriptor header naming both tables.
    let mut mip = [0u8; 96];
    mip[0..4].copy_from_slice(&nfp_fwinfo::mip::SIGNATURE.to_le_bytes());
    mip[4..8].copy_from_slice(&nfp_fwinfo::mip::VERSION.to_le_bytes());
    mip[32..36].copy_from_slice(&SYMTAB_ADDR.to_le_bytes());
    mip[36..40].copy_from_slice(&32u32.to_le_bytes());
    mip[40..44].copy_from_slice(&STRTAB_ADDR.to_le_bytes());
    mip[44..48].copy_from_slice(&strtab_size.to_le_bytes());
    ctx.write(rw(), MIP_ADDR, &mip).unwrap();
}

fn symbol_entry(addr: u64, name_off: u16, size: u64) -> [u8; 16] {
    let mut raw = [0u8; 16];
    raw[0] = 1;
    raw[1] = TARGET_MU;
    raw[2] = ISLAND_EMEM0;
    raw[3] = (addr >> 32) as u8;
    raw[4..8].copy_from_slice(&(addr as u32).to_le_bytes());
    raw[8..10].copy_from_slice(&name_off.to_le_bytes());
    raw[10] = 0xff;
    raw[11] = (size >> 32) as u8;
    raw[12..16].copy_from_slice(&(size as u32).to_le_bytes());
    raw
}

#[test]
fn attach_uses_firmware_published_regions() {
    let mem = MemAperture::new(APERTURE_LEN);
    stage_firmware(&mem);

    let card = NfpCard::attach(mem).unwrap();
    let control = card.control();
    assert_eq!(control.addr, CONTROL_ADDR);
    assert_eq!(control.size, CONTROL_SIZE);
    assert_eq!(control.id.target(), TARGET_MU);
    assert_eq!(control.id.island(), ISLAND_EMEM0);

    let buffer = card.buffer();
    assert_eq!(buffer.addr, BUFFER_ADDR);
    assert_eq!(buffer.size, BUFFER_SIZE);
}

#[test]
fn attach_falls_back_without_firmware() {
    let card = NfpCard::attach(MemAperture::new(APERTURE_LEN)).unwrap();
    let control = card.control();
    assert_eq!(control.addr, DEFAULT_CONTROL_ADDR);
    assert_eq!(control.size, DEFAULT_CONTROL_SIZE);
    assert_eq!(control.id.island(), ISLAND_EMEM0);
    assert_eq!(card.buffer().addr, DEFAULT_BUFFER_ADDR);
}

#[test]
fn transfer_regions_are_reachable_after_attach() {
    let mem = MemAperture::new(APERTURE_LEN);
    stage_firmware(&mem);
    let card = NfpCard::attach(mem).unwrap();

    // A round trip through the routed slices using the resolved descriptors.
    let control = card.control();
    let payload = [0xa5u8; 16];
    card.device().write(control.id, control.addr, &payload).unwrap();
    let mut readback = [0u8; 16];
    card.device().read(control.id, control.addr, &mut readback).unwrap();
    assert_eq!(payload, readback);
}
