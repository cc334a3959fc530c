//! The TLSF allocator core: block headers, the free-list directory, pool
//! registration, and the allocation engine.
use core::{marker::PhantomData, mem, mem::MaybeUninit, ptr::NonNull};

use crate::{
    error::TlsfError,
    utils::{align_down, align_up},
};

mod map;

cfg_if::cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        const ALIGN_SIZE_LOG2: u32 = 3;
        const FL_INDEX_MAX: u32 = 32;
    } else {
        const ALIGN_SIZE_LOG2: u32 = 2;
        const FL_INDEX_MAX: u32 = 30;
    }
}

/// The allocation granule. Payload addresses and payload sizes are always
/// multiples of this.
pub const ALIGN_SIZE: usize = 1 << ALIGN_SIZE_LOG2;

const SL_INDEX_COUNT_LOG2: u32 = 5;
const SL_INDEX_COUNT: usize = 1 << SL_INDEX_COUNT_LOG2;
const FL_INDEX_SHIFT: u32 = SL_INDEX_COUNT_LOG2 + ALIGN_SIZE_LOG2;
const FL_INDEX_COUNT: usize = (FL_INDEX_MAX - FL_INDEX_SHIFT + 1) as usize;

/// Sizes below this map to row 0 of the directory with linear (rather than
/// logarithmic) bucket spacing, so tiny requests don't collapse into a
/// handful of degenerate buckets.
const SMALL_BLOCK_SIZE: usize = 1 << FL_INDEX_SHIFT;

/// Header bytes preceding every payload.
pub const ALLOC_OVERHEAD: usize = mem::size_of::<BlockHdr>();

/// Bookkeeping consumed by each registered region: the leading block header
/// plus the trailing sentinel.
pub const POOL_OVERHEAD: usize = 2 * mem::size_of::<BlockHdr>();

/// Additional bookkeeping carved out of the region passed to
/// [`Tlsf::create_with_pool`]: the free-list directory itself.
pub const CONTROL_OVERHEAD: usize = mem::size_of::<Control>();

/// The smallest payload a block can carry. The free-list links are stored in
/// the payload while a block is free, so a payload can never be smaller than
/// two of them.
pub const BLOCK_SIZE_MIN: usize = mem::size_of::<FreeBlockHdr>() - mem::size_of::<BlockHdr>();

/// The largest payload a single block can carry.
pub const BLOCK_SIZE_MAX: usize = (1usize << FL_INDEX_MAX) - ALIGN_SIZE;

/// The bit of [`BlockHdr::size`] indicating the block itself is free.
const SIZE_FREE: usize = 0b01;
/// The bit of [`BlockHdr::size`] indicating the physically previous block is
/// free. While it is clear, the header's back-reference must not be read.
const SIZE_PREV_FREE: usize = 0b10;
const SIZE_MASK: usize = !(SIZE_FREE | SIZE_PREV_FREE);

/// The header of a memory block.
///
/// `size` holds the payload size in bytes. Payload sizes are multiples of
/// [`ALIGN_SIZE`], which leaves the two low bits free for the [`SIZE_FREE`]
/// and [`SIZE_PREV_FREE`] flags.
#[repr(C)]
#[derive(Debug)]
struct BlockHdr {
    size: usize,
    /// Back-reference to the block immediately preceding this one in
    /// physical address order. Only meaningful while [`SIZE_PREV_FREE`] is
    /// set; it is rewritten every time the predecessor becomes free.
    prev_phys_block: Option<NonNull<BlockHdr>>,
}

impl BlockHdr {
    #[inline]
    fn size(&self) -> usize {
        self.size & SIZE_MASK
    }

    #[inline]
    fn is_free(&self) -> bool {
        (self.size & SIZE_FREE) != 0
    }

    #[inline]
    fn is_prev_free(&self) -> bool {
        (self.size & SIZE_PREV_FREE) != 0
    }

    /// The trailing sentinel is the only zero-size block in a pool.
    #[inline]
    fn is_sentinel(&self) -> bool {
        self.size() == 0
    }

    #[inline]
    fn set_size(&mut self, size: usize) {
        debug_assert!(size % ALIGN_SIZE == 0);
        self.size = size | (self.size & !SIZE_MASK);
    }

    #[inline]
    fn set_free(&mut self) {
        self.size |= SIZE_FREE;
    }

    #[inline]
    fn set_used(&mut self) {
        self.size &= !SIZE_FREE;
    }

    #[inline]
    fn set_prev_free(&mut self, prev_free: bool) {
        if prev_free {
            self.size |= SIZE_PREV_FREE;
        } else {
            self.size &= !SIZE_PREV_FREE;
        }
    }

    /// The payload this header precedes.
    #[inline]
    fn payload(&self) -> NonNull<u8> {
        // Safety: `self` is not null, so neither is the address just past it
        unsafe {
            NonNull::new_unchecked((self as *const _ as *mut u8).add(mem::size_of::<BlockHdr>()))
        }
    }

    /// Recover a block header from the payload pointer handed to the caller.
    ///
    /// # Safety
    ///
    /// `ptr` must be a payload pointer previously produced by
    /// [`Self::payload`].
    #[inline]
    unsafe fn from_payload(ptr: NonNull<u8>) -> NonNull<BlockHdr> {
        NonNull::new_unchecked(ptr.as_ptr().sub(mem::size_of::<BlockHdr>())).cast()
    }

    /// Get the next physical block.
    ///
    /// # Safety
    ///
    /// `self` must not be the trailing sentinel of its pool.
    #[inline]
    unsafe fn next_phys_block(&self) -> NonNull<BlockHdr> {
        debug_assert!(!self.is_sentinel());
        NonNull::new_unchecked(
            (self as *const _ as *mut u8).add(mem::size_of::<BlockHdr>() + self.size()),
        )
        .cast()
    }
}

/// The header of a free memory block.
///
/// The two list links overlay the first payload words; the memory carries no
/// live data while the block is free, so the storage is reused.
#[repr(C)]
#[derive(Debug)]
struct FreeBlockHdr {
    common: BlockHdr,
    next_free: Option<NonNull<FreeBlockHdr>>,
    prev_free: Option<NonNull<FreeBlockHdr>>,
}

/// The free-list directory. It lives at the start of the first registered
/// pool; all-zero bytes are a valid empty directory (every list head is
/// `None` thanks to the null niche), so initialization is a single
/// `write_bytes`.
#[repr(C)]
struct Control {
    fl_bitmap: u32,
    sl_bitmap: [u32; FL_INDEX_COUNT],
    blocks: [[Option<NonNull<FreeBlockHdr>>; SL_INDEX_COUNT]; FL_INDEX_COUNT],
}

impl Control {
    /// Push a free block onto the head of its exact size-class list and mark
    /// the bucket non-empty.
    ///
    /// # Safety
    ///
    ///  - `block` must be owned by this directory's allocator, marked free,
    ///    and not currently in any free list.
    ///  - `size` must be `block`'s current payload size.
    unsafe fn link_free_block(&mut self, mut block: NonNull<FreeBlockHdr>, size: usize) {
        debug_assert!(block.as_ref().common.is_free());
        debug_assert_eq!(block.as_ref().common.size(), size);
        let (fl, sl) = map::map_floor(size).unwrap_unchecked();

        let first = &mut self.blocks[fl][sl];
        let next_free = mem::replace(first, Some(block));
        block.as_mut().next_free = next_free;
        block.as_mut().prev_free = None;
        if let Some(mut next_free) = next_free {
            next_free.as_mut().prev_free = Some(block);
        }

        self.fl_bitmap |= 1 << fl;
        self.sl_bitmap[fl] |= 1 << sl;
    }

    /// Unlink a free block from its size-class list, clearing the bucket bit
    /// if the bucket empties and the row bit if the whole row empties.
    ///
    /// # Safety
    ///
    ///  - `block` must currently be in the free list for `size`.
    ///  - `size` must be `block`'s current payload size.
    unsafe fn unlink_free_block(&mut self, mut block: NonNull<FreeBlockHdr>, size: usize) {
        let next_free = block.as_mut().next_free;
        let prev_free = block.as_mut().prev_free;

        if let Some(mut next_free) = next_free {
            next_free.as_mut().prev_free = prev_free;
        }

        if let Some(mut prev_free) = prev_free {
            prev_free.as_mut().next_free = next_free;
        } else {
            let (fl, sl) = map::map_floor(size).unwrap_unchecked();
            debug_assert_eq!(self.blocks[fl][sl], Some(block));
            self.blocks[fl][sl] = next_free;

            if next_free.is_none() {
                self.sl_bitmap[fl] &= !(1 << sl);
                if self.sl_bitmap[fl] == 0 {
                    self.fl_bitmap &= !(1 << fl);
                }
            }
        }
    }

    /// Find the smallest non-empty bucket at or above `(fl, sl)`.
    ///
    /// Within the target row only buckets at positions `>= sl` qualify. If
    /// the row has none, any higher row does, and its *lowest* non-empty
    /// bucket is taken (every bucket of a higher row outranks the request).
    /// Both scans are fixed-width bitmap operations.
    fn search_suitable_block(&self, fl: usize, sl: usize) -> Option<(usize, usize)> {
        debug_assert!(fl < FL_INDEX_COUNT && sl < SL_INDEX_COUNT);

        let sl_map = self.sl_bitmap[fl] & (u32::MAX << sl);
        if sl_map != 0 {
            return Some((fl, sl_map.trailing_zeros() as usize));
        }

        let fl_map = self.fl_bitmap & u32::MAX.checked_shl(fl as u32 + 1).unwrap_or(0);
        if fl_map == 0 {
            return None;
        }
        let fl = fl_map.trailing_zeros() as usize;
        let sl = self.sl_bitmap[fl].trailing_zeros() as usize;
        debug_assert!(sl < SL_INDEX_COUNT);
        Some((fl, sl))
    }
}

#[cfg_attr(doc, svgbobdoc::transform)]
/// A TLSF allocator handle tied to one or more caller-supplied memory pools.
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///   First level
///                            ,-----+-----+-----+-----+-----+-----,
///        fl_bitmap: u32    = |  0  |  1  |  0  | ... |  0  |  0  |
///                            +-----+-----+-----+-----+-----+-----+
///             row min size   | 2¹⁰ |  2⁹ |  2⁸ | ... |  2⁵ |  0  |
///                            '-----+--+--+-----+-----+-----+-----'
///                                     |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Second level                      |
///                                     v
///                            ,-----+-----+-----+-----+-----+-----,
///        "sl_bitmap[row]"  = |  0  |  0  |  1  | ... |  0  |  0  |
///                            +-----+-----+-----+-----+-----+-----+
///        "blocks[row][..]"   |     |     |  O  | ... |     |     |
///                            '-----+-----+--|--+-----+-----+-----'
///                                            |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Free blocks                              |
///                                            v
///                            ,---+---+---,   ,---+---+---,
///                            | O | O-+---+-->| O |   |   |
///                            '---+---+---'   '---+---+---'
///                               LIFO list of equal-class blocks
/// ```
/// </center>
///
/// The directory (bitmaps and list heads) is carved out of the start of the
/// first pool by [`create_with_pool`]; the handle is a pointer to it plus
/// the `'pool` borrow that keeps every registered region alive and
/// exclusively ours. Dropping the handle ends the borrow; the allocator
/// never owns the backing storage, so nothing is freed on drop.
///
/// Every operation takes `&mut self`: the core is single-threaded by
/// contract, and callers sharing a handle across execution contexts must
/// wrap each call in their own mutual exclusion (one lock per handle; block
/// splitting and coalescing touch physically adjacent blocks, so there is no
/// sound finer granularity).
///
/// [`create_with_pool`]: Self::create_with_pool
#[derive(Debug)]
pub struct Tlsf<'pool> {
    control: NonNull<Control>,
    _phantom: PhantomData<&'pool mut ()>,
}

// Safety: All block headers reachable from a `Tlsf` are logically owned by
//         it, carry no interior mutability, and every operation demands
//         `&mut self`.
unsafe impl Send for Tlsf<'_> {}
unsafe impl Sync for Tlsf<'_> {}

/// Round a request up to the granule and the minimum block size. `None` for
/// zero and for sizes no block can represent.
#[inline]
fn adjust_request_size(size: usize) -> Option<usize> {
    if size == 0 {
        return None;
    }
    let size = align_up(size, ALIGN_SIZE)?.max(BLOCK_SIZE_MIN);
    if size > BLOCK_SIZE_MAX {
        return None;
    }
    Some(size)
}

impl<'pool> Tlsf<'pool> {
    /// Create an allocator whose directory and first pool are carved out of
    /// `pool`.
    ///
    /// The region must hold the directory ([`CONTROL_OVERHEAD`] bytes after
    /// alignment), the pool bookkeeping ([`POOL_OVERHEAD`]) and at least one
    /// minimum-size block, or `Err(InvalidPool)` is returned. The carved
    /// free block may not exceed [`BLOCK_SIZE_MAX`].
    ///
    /// The allocator never owns `pool`'s storage: dropping the returned
    /// handle merely ends the borrow, and nothing is written back.
    pub fn create_with_pool(pool: &'pool mut [MaybeUninit<u8>]) -> Result<Self, TlsfError> {
        // Safety: the exclusive borrow lasts for `'pool`, which outlives the
        //         returned handle, and a reference is never null
        unsafe { Self::create_with_pool_ptr(NonNull::new(pool as *mut [_] as *mut [u8]).unwrap()) }
    }

    /// [`create_with_pool`] for a raw region pointer.
    ///
    /// # Safety
    ///
    /// The region must be valid for reads and writes, must not be accessed
    /// by anything else while the returned handle exists, and must outlive
    /// it.
    ///
    /// [`create_with_pool`]: Self::create_with_pool
    pub unsafe fn create_with_pool_ptr(pool: NonNull<[u8]>) -> Result<Self, TlsfError> {
        let base = pool.as_ptr() as *mut u8 as usize;
        let end = base.checked_add(pool.len()).ok_or(TlsfError::InvalidPool)?;

        let control_addr =
            align_up(base, mem::align_of::<Control>()).ok_or(TlsfError::InvalidPool)?;
        let control_end = control_addr
            .checked_add(mem::size_of::<Control>())
            .ok_or(TlsfError::InvalidPool)?;
        if control_end > end {
            return Err(TlsfError::InvalidPool);
        }

        let control = control_addr as *mut Control;
        // All-zero bytes are a valid empty directory: cleared bitmaps and
        // `None` in every list head.
        control.write_bytes(0, 1);

        let mut this = Tlsf {
            control: NonNull::new_unchecked(control),
            _phantom: PhantomData,
        };
        this.carve(control_end, end - control_end)?;

        #[cfg(feature = "log")]
        log::trace!("created allocator, directory at {:#x}", control_addr);

        Ok(this)
    }

    /// Register an additional caller-supplied region with this handle.
    ///
    /// The region gets its own sentinels; it does not need to be contiguous
    /// with any other pool, and blocks never coalesce across pools. Fails
    /// with `Err(InvalidPool)` under the same sizing rules as
    /// [`create_with_pool`], minus the directory overhead.
    ///
    /// [`create_with_pool`]: Self::create_with_pool
    pub fn add_pool(&mut self, pool: &'pool mut [MaybeUninit<u8>]) -> Result<(), TlsfError> {
        // Safety: same as `create_with_pool`
        unsafe { self.add_pool_ptr(NonNull::new(pool as *mut [_] as *mut [u8]).unwrap()) }
    }

    /// [`add_pool`] for a raw region pointer.
    ///
    /// # Safety
    ///
    /// The region must be valid for reads and writes, must not overlap any
    /// other registered region, must not be accessed by anything else while
    /// `self` exists, and must outlive `self`.
    ///
    /// [`add_pool`]: Self::add_pool
    pub unsafe fn add_pool_ptr(&mut self, pool: NonNull<[u8]>) -> Result<(), TlsfError> {
        let base = pool.as_ptr() as *mut u8 as usize;
        let end = base.checked_add(pool.len()).ok_or(TlsfError::InvalidPool)?;
        self.carve(base, end - base)
    }

    /// Carve `len` bytes at `base` into one free block bounded by a leading
    /// header and a trailing zero-size used sentinel, and link the block.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be exclusively ours, writable, and disjoint
    /// from every block this allocator already tracks.
    unsafe fn carve(&mut self, base: usize, len: usize) -> Result<(), TlsfError> {
        let start = align_up(base, ALIGN_SIZE).ok_or(TlsfError::InvalidPool)?;
        let avail = (base + len)
            .checked_sub(start.checked_add(POOL_OVERHEAD).ok_or(TlsfError::InvalidPool)?)
            .ok_or(TlsfError::InvalidPool)?;
        let size = align_down(avail, ALIGN_SIZE);
        if size < BLOCK_SIZE_MIN || size > BLOCK_SIZE_MAX {
            return Err(TlsfError::InvalidPool);
        }

        // The pool's single initial free block. The clear `SIZE_PREV_FREE`
        // bit is what marks "no valid physical predecessor".
        let block = NonNull::new_unchecked(start as *mut FreeBlockHdr);
        block.as_ptr().cast::<BlockHdr>().write(BlockHdr {
            size: size | SIZE_FREE,
            prev_phys_block: None,
        });

        // Trailing sentinel: zero payload, permanently used, so boundary
        // scans and coalescing stop here instead of running off the pool.
        let sentinel = block.as_ref().common.next_phys_block();
        sentinel.as_ptr().write(BlockHdr {
            size: SIZE_PREV_FREE,
            prev_phys_block: Some(block.cast()),
        });

        self.control.as_mut().link_free_block(block, size);

        #[cfg(feature = "log")]
        log::trace!("registered pool at {:#x}, {} usable bytes", start, size);

        Ok(())
    }

    /// Attempt to allocate `size` bytes.
    ///
    /// Returns the payload address on success. The payload is aligned to
    /// [`ALIGN_SIZE`]; use [`allocate_aligned`] for stricter alignment.
    ///
    /// Errors: `InvalidSize` when `size` is zero or rounding it up to a size
    /// class exceeds [`BLOCK_SIZE_MAX`]; `OutOfMemory` when no registered
    /// pool has a suitable free block.
    ///
    /// # Time Complexity
    ///
    /// Constant: one bounded bitmap scan, one list splice, at most one
    /// split.
    ///
    /// [`allocate_aligned`]: Self::allocate_aligned
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, TlsfError> {
        let size = adjust_request_size(size).ok_or(TlsfError::InvalidSize)?;
        // Safety: `size` is adjusted
        unsafe { self.allocate_adjusted(size) }
    }

    /// Attempt to allocate `size` bytes whose payload address is a multiple
    /// of `align`.
    ///
    /// `align` must be a power of two (`InvalidAlignment` otherwise).
    /// Alignments up to [`ALIGN_SIZE`] cost nothing extra; larger ones
    /// over-allocate and return the leading remainder to the free lists, so
    /// the returned block's header still encodes its true size and
    /// [`release`] needs no alignment parameter.
    ///
    /// # Time Complexity
    ///
    /// Constant.
    ///
    /// [`release`]: Self::release
    pub fn allocate_aligned(
        &mut self,
        align: usize,
        size: usize,
    ) -> Result<NonNull<u8>, TlsfError> {
        if !align.is_power_of_two() {
            return Err(TlsfError::InvalidAlignment);
        }
        let size = adjust_request_size(size).ok_or(TlsfError::InvalidSize)?;
        if align <= ALIGN_SIZE {
            // Every payload already carries this much alignment.
            // Safety: `size` is adjusted
            return unsafe { self.allocate_adjusted(size) };
        }

        // A leading remainder must be able to stand alone as a free block.
        let gap_minimum = mem::size_of::<BlockHdr>() + BLOCK_SIZE_MIN;
        let search_size = size
            .checked_add(align)
            .and_then(|s| s.checked_add(gap_minimum))
            .filter(|&s| s <= BLOCK_SIZE_MAX)
            .ok_or(TlsfError::InvalidSize)?;

        unsafe {
            let (fl, sl) = map::map_ceil(search_size).ok_or(TlsfError::InvalidSize)?;
            let block = self
                .pop_suitable_block(fl, sl)
                .ok_or(TlsfError::OutOfMemory)?;

            let addr = block.as_ref().common.payload().as_ptr() as usize;
            let mut aligned = (addr + align - 1) & !(align - 1);
            let mut gap = aligned - addr;
            if gap > 0 && gap < gap_minimum {
                // Too close to split off a self-standing block; move to the
                // next aligned boundary far enough out.
                let shift = (gap_minimum - gap).max(align);
                aligned = (aligned + shift + align - 1) & !(align - 1);
                gap = aligned - addr;
            }

            let block = if gap > 0 {
                debug_assert!(gap >= gap_minimum);
                self.split_leading(block, gap)
            } else {
                block
            };
            Ok(self.prepare_used(block, size))
        }
    }

    /// Release a payload previously returned by [`allocate`] or
    /// [`allocate_aligned`] on this handle. A null `ptr` is a no-op, not an
    /// error.
    ///
    /// The block is merged with a free physical predecessor (detected via
    /// its own previous-is-free flag, never by dereferencing a possibly
    /// stale back-reference) and with a free physical successor before being
    /// reinserted into the directory.
    ///
    /// # Safety
    ///
    /// Unless null, `ptr` must have been returned by this handle and must
    /// not have been released before. Neither condition is detectable from
    /// block metadata alone (the allocator keeps no per-allocation
    /// bookkeeping), so violating either is undefined behavior.
    ///
    /// # Time Complexity
    ///
    /// Constant.
    ///
    /// [`allocate`]: Self::allocate
    /// [`allocate_aligned`]: Self::allocate_aligned
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        let mut block = BlockHdr::from_payload(ptr);
        debug_assert!(!block.as_ref().is_free(), "double release");
        debug_assert!(!block.as_ref().is_sentinel());

        // Merge with a free physical predecessor. The flag is authoritative;
        // the back-reference is read only once the flag says it is valid.
        if block.as_ref().is_prev_free() {
            let mut prev = block.as_ref().prev_phys_block.unwrap_unchecked();
            debug_assert!(prev.as_ref().is_free());
            debug_assert!(!prev.as_ref().is_prev_free());

            let prev_size = prev.as_ref().size();
            self.control
                .as_mut()
                .unlink_free_block(prev.cast(), prev_size);

            let merged = prev_size + mem::size_of::<BlockHdr>() + block.as_ref().size();
            prev.as_mut().set_size(merged);
            block = prev;
        }

        // Merge with a free physical successor. The sentinel is permanently
        // used, so this can never run past the end of the pool.
        let next = block.as_ref().next_phys_block();
        if next.as_ref().is_free() {
            let next_size = next.as_ref().size();
            self.control
                .as_mut()
                .unlink_free_block(next.cast(), next_size);

            let merged = block.as_ref().size() + mem::size_of::<BlockHdr>() + next_size;
            block.as_mut().set_size(merged);
        }

        block.as_mut().set_free();

        let mut next = block.as_ref().next_phys_block();
        next.as_mut().prev_phys_block = Some(block);
        next.as_mut().set_prev_free(true);

        self.control
            .as_mut()
            .link_free_block(block.cast(), block.as_ref().size());
    }

    /// Allocate an already-adjusted request.
    ///
    /// # Safety
    ///
    /// `size` must come from [`adjust_request_size`].
    unsafe fn allocate_adjusted(&mut self, size: usize) -> Result<NonNull<u8>, TlsfError> {
        let (fl, sl) = map::map_ceil(size).ok_or(TlsfError::InvalidSize)?;
        let block = self
            .pop_suitable_block(fl, sl)
            .ok_or(TlsfError::OutOfMemory)?;
        Ok(self.prepare_used(block, size))
    }

    /// Find a bucket at or above `(fl, sl)` and take its head block.
    ///
    /// The unlink is the head fast path: the head's `prev_free` is known to
    /// be `None` and the bucket is already known, so no `map_floor`
    /// recomputation is needed.
    ///
    /// # Safety
    ///
    /// `(fl, sl)` must be in range.
    unsafe fn pop_suitable_block(&mut self, fl: usize, sl: usize) -> Option<NonNull<FreeBlockHdr>> {
        let control = self.control.as_mut();
        let (fl, sl) = control.search_suitable_block(fl, sl)?;

        let first = &mut control.blocks[fl][sl];
        // Safety: the bitmap bit for `(fl, sl)` is set
        let block = first.unwrap_unchecked();
        debug_assert!(block.as_ref().common.is_free());
        debug_assert!(block.as_ref().prev_free.is_none());

        if let Some(mut next_free) = block.as_ref().next_free {
            next_free.as_mut().prev_free = None;
            *first = Some(next_free);
        } else {
            *first = None;
            control.sl_bitmap[fl] &= !(1 << sl);
            if control.sl_bitmap[fl] == 0 {
                control.fl_bitmap &= !(1 << fl);
            }
        }

        Some(block)
    }

    /// Turn a free, unlinked block into a used block of exactly `size`
    /// payload bytes, splitting the surplus into a new free block when it is
    /// big enough to stand alone.
    ///
    /// # Safety
    ///
    ///  - `block` must be free, not in any free list, and at least `size`
    ///    payload bytes large.
    ///  - `size` must be adjusted (granule-aligned, within bounds).
    unsafe fn prepare_used(
        &mut self,
        mut block: NonNull<FreeBlockHdr>,
        size: usize,
    ) -> NonNull<u8> {
        debug_assert!(block.as_ref().common.is_free());
        debug_assert!(block.as_ref().common.size() >= size);

        // Both taken while the old size is still in place.
        let mut next = block.as_ref().common.next_phys_block();
        let surplus = block.as_ref().common.size() - size;

        block.as_mut().common.set_used();

        if surplus >= mem::size_of::<BlockHdr>() + BLOCK_SIZE_MIN {
            // Split: the tail becomes a new free block. Its predecessor (the
            // block being returned) is used, so `SIZE_PREV_FREE` stays clear.
            let rest_size = surplus - mem::size_of::<BlockHdr>();
            let rest: NonNull<FreeBlockHdr> = NonNull::new_unchecked(
                block
                    .as_ptr()
                    .cast::<u8>()
                    .add(mem::size_of::<BlockHdr>() + size),
            )
            .cast();
            rest.as_ptr().cast::<BlockHdr>().write(BlockHdr {
                size: rest_size | SIZE_FREE,
                prev_phys_block: Some(block.cast()),
            });
            block.as_mut().common.set_size(size);

            // The old successor's previous-is-free flag was already set
            // (this block used to be free); only the back-reference moves.
            debug_assert!(next.as_ref().is_prev_free());
            next.as_mut().prev_phys_block = Some(rest.cast());

            self.control.as_mut().link_free_block(rest, rest_size);
        } else {
            // The whole block is consumed; the successor's predecessor is no
            // longer free.
            next.as_mut().set_prev_free(false);
        }

        let payload = block.as_ref().common.payload();
        debug_assert_eq!(payload.as_ptr() as usize % ALIGN_SIZE, 0);
        payload
    }

    /// Split `gap` leading bytes off a free, unlinked block and return the
    /// leading remainder to the free lists. The rest of the block, whose
    /// payload starts exactly `gap` bytes after the original payload, is
    /// handed back still free and unlinked.
    ///
    /// # Safety
    ///
    ///  - `lead` must be free, not in any free list, and more than
    ///    `gap + BLOCK_SIZE_MIN` payload bytes large.
    ///  - `gap` must be a granule multiple of at least one header plus
    ///    [`BLOCK_SIZE_MIN`].
    unsafe fn split_leading(
        &mut self,
        mut lead: NonNull<FreeBlockHdr>,
        gap: usize,
    ) -> NonNull<FreeBlockHdr> {
        debug_assert!(gap % ALIGN_SIZE == 0);
        debug_assert!(gap >= mem::size_of::<BlockHdr>() + BLOCK_SIZE_MIN);

        let old_size = lead.as_ref().common.size();
        let lead_size = gap - mem::size_of::<BlockHdr>();
        let rest_size = old_size - gap;
        debug_assert!(rest_size >= BLOCK_SIZE_MIN);

        let rest: NonNull<FreeBlockHdr> =
            NonNull::new_unchecked(lead.as_ptr().cast::<u8>().add(gap)).cast();
        rest.as_ptr().cast::<BlockHdr>().write(BlockHdr {
            size: rest_size | SIZE_FREE | SIZE_PREV_FREE,
            prev_phys_block: Some(lead.cast()),
        });

        // `lead` came off a free list, so its own predecessor is used and
        // its flags stay as they are; only the size shrinks.
        lead.as_mut().common.set_size(lead_size);

        // The block after `rest` keeps its previous-is-free flag; only the
        // back-reference moves.
        let mut next = rest.as_ref().common.next_phys_block();
        debug_assert!(next.as_ref().is_prev_free());
        next.as_mut().prev_phys_block = Some(rest.cast());

        self.control.as_mut().link_free_block(lead, lead_size);

        rest
    }
}

#[cfg(test)]
mod tests;
