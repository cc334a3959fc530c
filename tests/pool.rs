//! Black-box tests of the public allocator interface.
use core::mem::MaybeUninit;

use tlsf_pool::{Tlsf, TlsfError, ALIGN_SIZE, BLOCK_SIZE_MAX, CONTROL_OVERHEAD, POOL_OVERHEAD};

#[repr(align(64))]
struct Arena<const N: usize>([MaybeUninit<u8>; N]);

impl<const N: usize> Arena<N> {
    fn new() -> Self {
        Self([MaybeUninit::uninit(); N])
    }
}

#[test]
fn create_rejects_undersized_regions() {
    let mut tiny = Arena::<64>::new();
    assert_eq!(
        Tlsf::create_with_pool(&mut tiny.0).unwrap_err(),
        TlsfError::InvalidPool
    );

    // Room for the directory but not for a single block.
    let mut no_block = Arena::<8192>::new();
    let cut = CONTROL_OVERHEAD + POOL_OVERHEAD / 2;
    assert_eq!(
        Tlsf::create_with_pool(&mut no_block.0[..cut]).unwrap_err(),
        TlsfError::InvalidPool
    );
}

#[test]
fn invalid_requests_are_reported_not_ub() {
    let mut arena = Arena::<16384>::new();
    let mut tlsf = Tlsf::create_with_pool(&mut arena.0).unwrap();

    assert_eq!(tlsf.allocate(0).unwrap_err(), TlsfError::InvalidSize);
    assert_eq!(tlsf.allocate(usize::MAX).unwrap_err(), TlsfError::InvalidSize);
    assert_eq!(
        tlsf.allocate(BLOCK_SIZE_MAX + 1).unwrap_err(),
        TlsfError::InvalidSize
    );

    // Non-power-of-two alignment is a caller error with its own kind.
    assert_eq!(
        tlsf.allocate_aligned(3, 10).unwrap_err(),
        TlsfError::InvalidAlignment
    );
    assert_eq!(
        tlsf.allocate_aligned(0, 10).unwrap_err(),
        TlsfError::InvalidAlignment
    );
    assert_eq!(
        tlsf.allocate_aligned(64, 0).unwrap_err(),
        TlsfError::InvalidSize
    );

    // Reporting errors must not have disturbed the pool.
    let ptr = tlsf.allocate(100).unwrap();
    unsafe { tlsf.release(ptr.as_ptr()) };
}

#[test]
fn small_pool_exhaustion_scenario() {
    // An 8 KiB region: the directory consumes most of it, so a modest
    // allocation fits but a large one must fail cleanly.
    let mut arena = Arena::<8192>::new();
    let mut tlsf = Tlsf::create_with_pool(&mut arena.0).unwrap();

    let first = tlsf.allocate(100).unwrap();
    assert_eq!(
        tlsf.allocate(7000).unwrap_err(),
        TlsfError::OutOfMemory,
        "7000 bytes cannot fit after the directory and bookkeeping"
    );

    unsafe { tlsf.release(first.as_ptr()) };

    // The freed block goes back onto its bucket's head, so an equal request
    // is served from the same address.
    assert_eq!(tlsf.allocate(100).unwrap(), first);
}

#[test]
fn aligned_payloads_for_every_power_of_two() {
    let mut arena = Arena::<65536>::new();
    let mut tlsf = Tlsf::create_with_pool(&mut arena.0).unwrap();

    let mut held = Vec::new();
    let mut align = ALIGN_SIZE;
    while align <= 4096 {
        let ptr = tlsf.allocate_aligned(align, 100).unwrap();
        assert_eq!(
            ptr.as_ptr() as usize % align,
            0,
            "payload {:p} is not {}-byte aligned",
            ptr,
            align
        );
        held.push(ptr);
        align *= 2;
    }
    for ptr in held {
        unsafe { tlsf.release(ptr.as_ptr()) };
    }
}

#[test]
fn exhaustion_recovers_after_release() {
    let mut arena = Arena::<16384>::new();
    let mut tlsf = Tlsf::create_with_pool(&mut arena.0).unwrap();

    let mut held = Vec::new();
    loop {
        match tlsf.allocate(512) {
            Ok(ptr) => held.push(ptr),
            Err(TlsfError::OutOfMemory) => break,
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
    assert!(!held.is_empty());

    // Releasing any block of the failed request's size unblocks it.
    let ptr = held.pop().unwrap();
    unsafe { tlsf.release(ptr.as_ptr()) };
    held.push(tlsf.allocate(512).unwrap());

    for ptr in held {
        unsafe { tlsf.release(ptr.as_ptr()) };
    }
}

#[test]
fn released_neighbors_coalesce() {
    let mut arena = Arena::<32768>::new();
    let mut tlsf = Tlsf::create_with_pool(&mut arena.0).unwrap();

    let a = tlsf.allocate(1000).unwrap();
    let b = tlsf.allocate(1000).unwrap();
    let c = tlsf.allocate(1000).unwrap();

    unsafe {
        tlsf.release(b.as_ptr());
        tlsf.release(a.as_ptr());
    }

    // A and B merged: a request too big for either payload alone is served
    // in place, at A's address, from the block spanning both plus the header
    // between them.
    let merged = tlsf.allocate(1800).unwrap();
    assert_eq!(merged, a);

    unsafe {
        tlsf.release(merged.as_ptr());
        tlsf.release(c.as_ptr());
    }

    // With everything released the region is one block again: a request far
    // bigger than any unmerged fragment succeeds, at the pool's start.
    let big = tlsf.allocate(20000).unwrap();
    assert_eq!(big, a);
    unsafe { tlsf.release(big.as_ptr()) };
}

#[test]
fn chained_pools_serve_what_the_first_cannot() {
    let mut arena1 = Arena::<16384>::new();
    let mut arena2 = Arena::<65536>::new();
    let second_base = arena2.0.as_ptr() as usize;

    let mut tlsf = Tlsf::create_with_pool(&mut arena1.0).unwrap();
    assert_eq!(
        tlsf.allocate(30000).unwrap_err(),
        TlsfError::OutOfMemory,
        "the first pool alone cannot hold this"
    );

    tlsf.add_pool(&mut arena2.0).unwrap();
    let ptr = tlsf.allocate(30000).unwrap();
    let addr = ptr.as_ptr() as usize;
    assert!(
        addr >= second_base && addr < second_base + 65536,
        "a request beyond the first pool's capacity must come from the second"
    );

    // Small requests still work, and a bad extra region is rejected without
    // disturbing anything.
    let small = tlsf.allocate(64).unwrap();
    let mut tiny = [MaybeUninit::<u8>::uninit(); 8];
    assert_eq!(tlsf.add_pool(&mut tiny).unwrap_err(), TlsfError::InvalidPool);

    unsafe {
        tlsf.release(small.as_ptr());
        tlsf.release(ptr.as_ptr());
    }
}

#[test]
fn release_null_is_a_noop() {
    let mut arena = Arena::<16384>::new();
    let mut tlsf = Tlsf::create_with_pool(&mut arena.0).unwrap();
    unsafe { tlsf.release(core::ptr::null_mut()) };
    // Still fully functional afterwards.
    let ptr = tlsf.allocate(100).unwrap();
    unsafe { tlsf.release(ptr.as_ptr()) };
}

#[test]
fn version_is_wired_up() {
    assert_eq!(tlsf_pool::VERSION, env!("CARGO_PKG_VERSION"));
}
