// Copyright 2025 NFP Host Tools Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mailbox tests with a master and a worker endpoint sharing one in-memory
//! aperture, the way the two sides of a real mapping would.

use nfp_cpp::{CppId, CppRegion, DeviceContext, ACTION_RW, TARGET_MU};
use nfp_hal::MemAperture;
use nfp_pipe::{Endpoint, Pipe, PipeError, PipeStatus, TransactionStatus};

const APERTURE_LEN: usize = 512 * 1024;
const META_SIZE: u32 = 256;

fn device(mem: MemAperture) -> DeviceContext<MemAperture> {
    let mut ctx = DeviceContext::new(mem).unwrap();
    ctx.configure_slice(4, TARGET_MU, 0x200_0000, 0x1_0000, 0x1234_0000).unwrap();
    ctx
}

fn control_region() -> CppRegion {
    CppRegion {
        name: "os_file_control",
        id: CppId::new(TARGET_MU, ACTION_RW, 0),
        addr: 0x200_0000,
        size: 0x400,
    }
}

fn buffer_region() -> CppRegion {
    CppRegion {
        name: "os_file_buffer",
        id: CppId::new(TARGET_MU, ACTION_RW, 0),
        addr: 0x200_8000,
        size: 0x2000,
    }
}

#[test]
fn init_validates_region_sizes() {
    let ctx = device(MemAperture::new(APERTURE_LEN));

    let mut small_control = control_region();
    small_control.size = 16;
    let err = Pipe::new(&ctx, Endpoint::Master, buffer_region(), small_control, META_SIZE);
    assert!(matches!(err, Err(PipeError::InvalidArgument(_))));

    let mut small_buffer = buffer_region();
    small_buffer.size = 1024;
    let err = Pipe::new(&ctx, Endpoint::Master, small_buffer, control_region(), META_SIZE);
    assert!(matches!(err, Err(PipeError::InvalidArgument(_))));
}

#[test]
fn wrong_role_accessors_are_inert() {
    let ctx = device(MemAperture::new(APERTURE_LEN));
    let mut master =
        Pipe::new(&ctx, Endpoint::Master, buffer_region(), control_region(), META_SIZE).unwrap();
    let mut worker =
        Pipe::new(&ctx, Endpoint::Worker, buffer_region(), control_region(), META_SIZE).unwrap();

    // Setters from the wrong role succeed without effect.
    master.set_worker_status(PipeStatus::Waiting).unwrap();
    assert_eq!(master.worker_status(), PipeStatus::Unavailable);

    worker.set_master_status(PipeStatus::Processing).unwrap();
    assert_eq!(worker.master_status(), PipeStatus::Unavailable);

    // Getters only observe the peer's group.
    worker.set_worker_status(PipeStatus::Waiting).unwrap();
    assert_eq!(worker.worker_status(), PipeStatus::Unavailable);
}

#[test]
fn status_crosses_the_wire() {
    let mem = MemAperture::new(APERTURE_LEN);
    let master_ctx = device(mem.clone());
    let worker_ctx = device(mem);
    let mut master =
        Pipe::new(&master_ctx, Endpoint::Master, buffer_region(), control_region(), META_SIZE)
            .unwrap();
    let mut worker =
        Pipe::new(&worker_ctx, Endpoint::Worker, buffer_region(), control_region(), META_SIZE)
            .unwrap();

    worker.set_worker_status(PipeStatus::Waiting).unwrap();
    worker.set_worker_transaction(TransactionStatus::End).unwrap();
    worker.control_write().unwrap();

    master.control_read().unwrap();
    assert_eq!(master.worker_status(), PipeStatus::Waiting);
    assert_eq!(master.worker_transaction(), TransactionStatus::End);

    master.set_master_status(PipeStatus::Setup).unwrap();
    master.control_write().unwrap();

    worker.control_read().unwrap();
    assert_eq!(worker.master_status(), PipeStatus::Setup);
}

#[test]
fn meta_moves_only_under_its_owner() {
    let mem = MemAperture::new(APERTURE_LEN);
    let master_ctx = device(mem.clone());
    let worker_ctx = device(mem);
    let mut master =
        Pipe::new(&master_ctx, Endpoint::Master, buffer_region(), control_region(), META_SIZE)
            .unwrap();
    let mut worker =
        Pipe::new(&worker_ctx, Endpoint::Worker, buffer_region(), control_region(), META_SIZE)
            .unwrap();

    // Master owns the meta block: its bytes reach the worker.
    master.set_operation(0x1, Some(Endpoint::Master)).unwrap();
    master.meta_mut()[..4].copy_from_slice(b"ping");
    master.control_write().unwrap();

    worker.control_read().unwrap();
    assert_eq!(worker.operation(), 0x1);
    assert_eq!(&worker.meta()[..4], b"ping");

    // Ownership handed to the worker: the worker's bytes reach the master,
    // and the master's own meta writes stop hitting the wire.
    master.set_operation(0x3, Some(Endpoint::Worker)).unwrap();
    master.control_write().unwrap();
    worker.control_read().unwrap();

    worker.meta_mut()[..4].copy_from_slice(b"pong");
    worker.control_write().unwrap();

    master.meta_mut()[..4].copy_from_slice(b"lost");
    master.control_write().unwrap();

    master.control_read().unwrap();
    assert_eq!(&master.meta()[..4], b"pong");

    // The worker owns the block, so it never reads it back.
    worker.control_read().unwrap();
    assert_eq!(&worker.meta()[..4], b"pong");
}

#[test]
fn buffer_transfers_round_up_to_words() {
    let mem = MemAperture::new(APERTURE_LEN);
    let master_ctx = device(mem.clone());
    let worker_ctx = device(mem);
    let mut master =
        Pipe::new(&master_ctx, Endpoint::Master, buffer_region(), control_region(), META_SIZE)
            .unwrap();
    let mut worker =
        Pipe::new(&worker_ctx, Endpoint::Worker, buffer_region(), control_region(), META_SIZE)
            .unwrap();

    let payload = b"twenty-byte payload!";
    worker.data_mut()[..payload.len()].copy_from_slice(payload);
    worker.buffer_write(payload.len()).unwrap();

    master.buffer_read(payload.len()).unwrap();
    assert_eq!(&master.data()[..payload.len()], payload);

    // A transfer bigger than the mirror is refused before touching the wire.
    let oversized = master.data().len() + 8;
    assert!(matches!(master.buffer_read(oversized), Err(PipeError::InvalidArgument(_))));
}
