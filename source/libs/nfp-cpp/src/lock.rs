// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cross-endpoint lock capability.
//!
//! The card's resource table carries per-entry lock words so that multiple
//! hosts can serialize access. This deployment assumes a single owner, so
//! the shipped implementation never contends; real multi-host locks slot in
//! through [`LockProvider`] without touching callers.

use crate::CppError;

/// One lock bound to a (target, address, key) location in card memory.
pub trait CppLock {
    /// Blocks until the lock is held.
    fn lock(&self) -> Result<(), CppError>;

    /// Acquires the lock without blocking.
    fn try_lock(&self) -> Result<(), CppError>;

    /// Releases the lock.
    fn unlock(&self) -> Result<(), CppError>;
}

/// Factory for [`CppLock`] handles, injected into the device context.
pub trait LockProvider {
    /// Allocates a lock for the given card-memory location.
    fn alloc(&self, target: u8, address: u64, key: u32) -> Box<dyn CppLock>;
}

/// Lock that always succeeds. Single-owner deployments only.
pub struct NullLock;

impl CppLock for NullLock {
    fn lock(&self) -> Result<(), CppError> {
        Ok(())
    }

    fn try_lock(&self) -> Result<(), CppError> {
        Ok(())
    }

    fn unlock(&self) -> Result<(), CppError> {
        Ok(())
    }
}

/// Provider handing out [`NullLock`] for every location.
pub struct NullLockProvider;

impl LockProvider for NullLockProvider {
    fn alloc(&self, _target: u8, _address: u64, _key: u32) -> Box<dyn CppLock> {
        Box::new(NullLock)
    }
}
