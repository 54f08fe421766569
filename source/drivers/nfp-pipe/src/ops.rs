// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

//! Operation codes and their shared-meta payload layouts.
//!
//! The low 8 bits of the 32-bit operation word carry the opcode; the upper
//! bits are free for callers to pass extra information to the worker. Each
//! operation interprets the shared meta block (or the data buffer) with its
//! own fixed little-endian layout.

use crate::PipeError;

/// Set the remote path for subsequent file operations.
pub const OP_FILE_NAME: u32 = 0x1;

/// Stream a file write to the worker.
pub const OP_FILE_WRITE: u32 = 0x2;

/// Stream a file read from the worker.
pub const OP_FILE_READ: u32 = 0x3;

/// Query file existence and size.
pub const OP_FILE_INFO: u32 = 0x4;

/// Erase the remote file.
pub const OP_FILE_ERASE: u32 = 0x5;

/// Longest remote path, including the terminating nul.
pub const PATH_MAX_LEN: usize = 256;

/// Largest shared-meta payload any operation uses.
pub const MAX_META_SIZE: u32 = PATH_MAX_LEN as u32;

/// Combines an opcode with caller-defined upper bits.
pub const fn operation_build(opcode: u32, custom: u32) -> u32 {
    (opcode & 0xff) | (custom & 0xffff_ff00)
}

/// Opcode part of an operation word.
pub const fn operation_opcode(word: u32) -> u32 {
    word & 0xff
}

/// Writes a nul-padded path into a shared-meta block.
///
/// The path must leave room for its terminator.
pub fn encode_path(path: &str, meta: &mut [u8]) -> Result<(), PipeError> {
    let bytes = path.as_bytes();
    if bytes.len() >= PATH_MAX_LEN || bytes.len() >= meta.len() {
        return Err(PipeError::InvalidArgument("remote path too long"));
    }
    meta[..bytes.len()].copy_from_slice(bytes);
    for byte in meta[bytes.len()..].iter_mut() {
        *byte = 0;
    }
    Ok(())
}

/// Reads a nul-padded path back out of a shared-meta block.
pub fn decode_path(meta: &[u8]) -> String {
    let end = meta.iter().position(|&b| b == 0).unwrap_or(meta.len());
    String::from_utf8_lossy(&meta[..end]).into_owned()
}

/// Chunked-transfer bookkeeping shared by the read and write operations.
///
/// Wire layout: total size u64, chunk size u32, chunk index u32, chunk
/// count u32.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferMeta {
    /// Total operation size in bytes.
    pub size: u64,
    /// Bytes carried by a full chunk.
    pub transaction_size: u32,
    /// 1-based index of the chunk in flight.
    pub transaction_count: u32,
    /// Number of chunks in the whole operation.
    pub transaction_total: u32,
}

impl TransferMeta {
    /// Bytes of shared meta this layout occupies.
    pub const WIRE_SIZE: usize = 20;

    /// Decodes the layout from the head of a shared-meta block.
    pub fn decode(meta: &[u8]) -> Self {
        Self {
            size: u64::from_le_bytes(meta[0..8].try_into().unwrap()),
            transaction_size: u32::from_le_bytes(meta[8..12].try_into().unwrap()),
            transaction_count: u32::from_le_bytes(meta[12..16].try_into().unwrap()),
            transaction_total: u32::from_le_bytes(meta[16..20].try_into().unwrap()),
        }
    }

    /// Encodes the layout into the head of a shared-meta block.
    pub fn encode(&self, meta: &mut [u8]) {
        meta[0..8].copy_from_slice(&self.size.to_le_bytes());
        meta[8..12].copy_from_slice(&self.transaction_size.to_le_bytes());
        meta[12..16].copy_from_slice(&self.transaction_count.to_le_bytes());
        meta[16..20].copy_from_slice(&self.transaction_total.to_le_bytes());
    }
}

/// Reply payload of the info operation, carried in the data buffer.
///
/// Wire layout: valid u32 at offset 0, file size u64 at offset 8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileInfoData {
    /// Nonzero when the remote file exists.
    pub valid: u32,
    /// Size of the remote file in bytes.
    pub size: u64,
}

impl FileInfoData {
    /// Bytes of buffer this layout occupies.
    pub const WIRE_SIZE: usize = 16;

    /// Decodes the layout from the head of the data buffer.
    pub fn decode(raw: &[u8]) -> Self {
        Self {
            valid: u32::from_le_bytes(raw[0..4].try_into().unwrap()),
            size: u64::from_le_bytes(raw[8..16].try_into().unwrap()),
        }
    }

    /// Encodes the layout into the head of the data buffer.
    pub fn encode(&self, raw: &mut [u8]) {
        raw[0..4].copy_from_slice(&self.valid.to_le_bytes());
        raw[4..8].copy_from_slice(&[0u8; 4]);
        raw[8..16].copy_from_slice(&self.size.to_le_bytes());
    }
}

/// Reply payload of the erase operation, carried in the data buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileEraseData {
    /// Nonzero when the remote file existed and was erased.
    pub valid: u32,
}

impl FileEraseData {
    /// Bytes of buffer this layout occupies.
    pub const WIRE_SIZE: usize = 4;

    /// Decodes the layout from the head of the data buffer.
    pub fn decode(raw: &[u8]) -> Self {
        Self { valid: u32::from_le_bytes(raw[0..4].try_into().unwrap()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_word_splits_opcode_and_custom_bits() {
        let word = operation_build(OP_FILE_READ, 0xabcd_1200);
        assert_eq!(operation_opcode(word), OP_FILE_READ);
        assert_eq!(word & 0xffff_ff00, 0xabcd_1200);
    }

    #[test]
    fn transfer_meta_round_trips() {
        let meta = TransferMeta {
            size: 0x1_0000_0010,
            transaction_size: 4096,
            transaction_count: 2,
            transaction_total: 3,
        };
        let mut raw = [0u8; 24];
        meta.encode(&mut raw);
        assert_eq!(TransferMeta::decode(&raw), meta);
    }

    #[test]
    fn info_and_erase_payloads_decode_from_the_buffer() {
        let mut raw = [0u8; 16];
        FileInfoData { valid: 1, size: 0x1234_5678 }.encode(&mut raw);
        assert_eq!(FileInfoData::decode(&raw), FileInfoData { valid: 1, size: 0x1234_5678 });
        assert_eq!(FileEraseData::decode(&raw), FileEraseData { valid: 1 });
    }

    #[test]
    fn path_encoding_is_nul_padded_and_bounded() {
        let mut meta = [0xffu8; PATH_MAX_LEN];
        encode_path("flash0:/fw.bin", &mut meta).unwrap();
        assert_eq!(decode_path(&meta), "flash0:/fw.bin");
        assert!(meta[14..].iter().all(|&b| b == 0));

        let long = "x".repeat(PATH_MAX_LEN);
        assert!(encode_path(&long, &mut meta).is_err());
    }
}
