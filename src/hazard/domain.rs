use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::sync::atomic::{self, AtomicPtr, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::{array, fmt, ptr};

use super::cfg::trace;
use super::marked::AtomicMarkedPtr;
use super::registry::Registry;

/// The hazard-pointer reclamation domain.
///
/// The domain owns the registry of participating threads. Each registered
/// thread gets `P` hazard slots that it alone writes, and a retire list that
/// it alone touches; scans read the slots of every registered thread.
///
/// `P` is the number of hazard slots per thread. The retire-list capacity is
/// `2 * P * N`, where `N` is the maximum number of registrations; keeping it
/// proportional to the total slot count bounds unreclaimed garbage while
/// amortizing the cost of a scan.
pub(crate) struct Domain<const P: usize> {
    threads: Registry<ThreadRecord<P>>,
    next_index: AtomicUsize,
    capacity: usize,
    limit: usize,
}

/// Per-thread hazard state, owned by the domain's registry.
pub(crate) struct ThreadRecord<const P: usize> {
    thread: ThreadId,
    index: usize,
    slots: [AtomicPtr<u8>; P],
    retired: UnsafeCell<Vec<Retired>>,
}

// Safety: the slots are atomics. `retired` is only touched by the thread
// the record was issued to (handles are neither `Send` nor `Sync`) and by
// the domain's destructor, which has exclusive access.
unsafe impl<const P: usize> Send for ThreadRecord<P> {}
unsafe impl<const P: usize> Sync for ThreadRecord<P> {}

// An unlinked node awaiting reclamation, with its drop glue.
struct Retired {
    ptr: *mut u8,
    drop_fn: unsafe fn(*mut u8),
}

// Reclaims a retired node by reconstructing the box it was allocated from.
//
// # Safety
//
// `ptr` must have come from `Box::into_raw` of a `Box<T>`.
unsafe fn boxed<T>(ptr: *mut u8) {
    unsafe { drop(Box::from_raw(ptr.cast::<T>())) }
}

impl<const P: usize> ThreadRecord<P> {
    fn new(index: usize, capacity: usize) -> ThreadRecord<P> {
        ThreadRecord {
            thread: thread::current().id(),
            index,
            slots: array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            retired: UnsafeCell::new(Vec::with_capacity(capacity)),
        }
    }

    /// The registration order of this record; shards the size counter.
    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub(crate) fn thread(&self) -> ThreadId {
        self.thread
    }

    // The first unoccupied hazard slot of this thread.
    fn free_slot(&self) -> &AtomicPtr<u8> {
        self.slots
            .iter()
            // relaxed: slots are only written by the owning thread
            .find(|slot| slot.load(Ordering::Relaxed).is_null())
            .unwrap_or_else(|| panic!("all {} hazard slots of this thread are occupied", P))
    }
}

impl<const P: usize> Domain<P> {
    pub(crate) fn new(limit: usize) -> Domain<P> {
        Domain {
            threads: Registry::new(),
            next_index: AtomicUsize::new(0),
            capacity: 2 * P * limit,
            limit,
        }
    }

    /// Registers the calling thread, returning its record.
    ///
    /// The record is only valid on the thread that registered it; the public
    /// handle types enforce this by being `!Send`.
    pub(crate) fn register(&self) -> &ThreadRecord<P> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        assert!(
            index < self.limit,
            "thread limit exceeded: the set supports at most {} registrations",
            self.limit,
        );

        trace!("registered thread record {}", index);
        self.threads.insert(ThreadRecord::new(index, self.capacity))
    }

    /// Publishes a hazard for the address stored in `src`, re-reading until
    /// two successive reads agree.
    pub(crate) fn protect<T>(&self, src: &AtomicMarkedPtr<T>, record: &ThreadRecord<P>) -> *mut T {
        let slot = record.free_slot();

        let mut ptr = src.load(Ordering::SeqCst).ptr();
        loop {
            // seqcst: the publication must be ordered before the re-read so
            // that it participates in a total order with the fence in `scan`.
            // either the scan sees this slot, or the re-read below sees the
            // unlinked value and abandons the address.
            slot.store(ptr.cast(), Ordering::SeqCst);

            let current = src.load(Ordering::SeqCst).ptr();
            if current == ptr {
                return ptr;
            }

            ptr = current;
        }
    }

    /// Publishes a caller-supplied address without re-reading a source.
    ///
    /// The caller must keep `ptr` reachable through another hazard (or a
    /// sentinel) for the duration of the call, otherwise the published value
    /// proves nothing.
    pub(crate) fn protect_known<T>(&self, ptr: *mut T, record: &ThreadRecord<P>) -> *mut T {
        let slot = record.free_slot();

        // seqcst: as in `protect`
        slot.store(ptr.cast(), Ordering::SeqCst);
        ptr
    }

    /// Clears the slot holding `ptr`.
    pub(crate) fn release<T>(&self, ptr: *mut T, record: &ThreadRecord<P>) {
        let slot = record
            .slots
            .iter()
            // relaxed: slots are only written by the owning thread
            .find(|slot| slot.load(Ordering::Relaxed) == ptr.cast())
            .expect("released a pointer that holds no hazard");

        // release: once this store is visible a scan may free the node
        slot.store(ptr::null_mut(), Ordering::Release);
    }

    /// Releases `ptr` and hands it to the reclaimer.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `Box::into_raw`, must be unlinked (no live
    /// node's link points at it), and must be retired exactly once.
    pub(crate) unsafe fn retire<T>(&self, ptr: *mut T, record: &ThreadRecord<P>) {
        self.release(ptr, record);

        // safety: the retire list is owner-only, see `ThreadRecord`
        let retired = unsafe { &mut *record.retired.get() };
        retired.push(Retired {
            ptr: ptr.cast(),
            drop_fn: boxed::<T>,
        });

        trace!("retired {:p}, {} pending", ptr, retired.len());
        if retired.len() >= self.capacity {
            unsafe { self.scan(record) }
        }
    }

    /// Frees every node in this thread's retire list that no hazard slot
    /// references, keeping the rest.
    ///
    /// # Safety
    ///
    /// `record` must belong to the calling thread.
    pub(crate) unsafe fn scan(&self, record: &ThreadRecord<P>) {
        // seqcst: order the unlink CASes that preceded these retirements
        // against hazard publications. a thread that published a slot after
        // this fence will re-read the source and see the unlinked value.
        atomic::fence(Ordering::SeqCst);

        let hazards: HashSet<*mut u8> = self
            .threads
            .iter()
            .flat_map(|thread| thread.slots.iter())
            // acquire: pairs with the release in `Domain::release`
            .map(|slot| slot.load(Ordering::Acquire))
            .filter(|ptr| !ptr.is_null())
            .collect();

        // safety: the retire list is owner-only, see `ThreadRecord`
        let retired = unsafe { &mut *record.retired.get() };
        trace!("scanning {} retired against {} hazards", retired.len(), hazards.len());

        retired.retain(|node| {
            if hazards.contains(&node.ptr) {
                return true;
            }

            // safety: the node is unlinked and, as of the fence above, no
            // thread holds a hazard on it
            unsafe { (node.drop_fn)(node.ptr) }
            false
        });
    }
}

impl<const P: usize> Drop for Domain<P> {
    fn drop(&mut self) {
        // We have `&mut self`: every handle has been dropped, so no slot is
        // live and the remaining retirees can be freed unconditionally.
        for record in self.threads.iter() {
            let retired = unsafe { &mut *record.retired.get() };
            for node in retired.drain(..) {
                unsafe { (node.drop_fn)(node.ptr) }
            }
        }
    }
}

impl<const P: usize> fmt::Debug for Domain<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("threads", &self.threads.len())
            .field("slots_per_thread", &P)
            .field("retire_capacity", &self.capacity)
            .finish()
    }
}

impl<const P: usize> fmt::Debug for ThreadRecord<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadRecord")
            .field("thread", &self.thread)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::marked::MarkedPtr;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    // A payload that counts its drops, to observe reclamation.
    struct Counted(Arc<AtomicUsize>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn counted(drops: &Arc<AtomicUsize>) -> *mut Counted {
        Box::into_raw(Box::new(Counted(drops.clone())))
    }

    #[test]
    fn protect_publishes_and_release_clears() {
        let domain: Domain<4> = Domain::new(8);
        let record = domain.register();

        let node = Box::into_raw(Box::new(7_usize));
        let src = AtomicMarkedPtr::new(MarkedPtr::new(node, false));

        let ptr = domain.protect(&src, record);
        assert_eq!(ptr, node);
        assert!(record
            .slots
            .iter()
            .any(|slot| slot.load(Ordering::Relaxed) == node.cast()));

        domain.release(ptr, record);
        assert!(record
            .slots
            .iter()
            .all(|slot| slot.load(Ordering::Relaxed).is_null()));

        let _ = unsafe { Box::from_raw(node) };
    }

    #[test]
    fn protect_known_occupies_a_slot() {
        let domain: Domain<2> = Domain::new(4);
        let record = domain.register();

        let node = Box::into_raw(Box::new(1_usize));
        let ptr = domain.protect_known(node, record);
        assert_eq!(ptr, node);

        domain.release(ptr, record);
        let _ = unsafe { Box::from_raw(node) };
    }

    #[test]
    #[should_panic(expected = "hazard slots")]
    fn slot_exhaustion_is_fatal() {
        let domain: Domain<2> = Domain::new(4);
        let record = domain.register();

        let node = Box::into_raw(Box::new(0_usize));

        domain.protect_known(node, record);
        domain.protect_known(node, record);
        domain.protect_known(node, record);
    }

    #[test]
    #[should_panic(expected = "no hazard")]
    fn unknown_release_is_fatal() {
        let domain: Domain<2> = Domain::new(4);
        let record = domain.register();

        domain.release(0x10 as *mut usize, record);
    }

    #[test]
    #[should_panic(expected = "thread limit")]
    fn registration_limit_is_fatal() {
        let domain: Domain<1> = Domain::new(1);
        let _first = domain.register();
        let _second = domain.register();
    }

    #[test]
    fn scan_frees_unprotected_retirees() {
        let drops = Arc::new(AtomicUsize::new(0));
        let domain: Domain<2> = Domain::new(2);
        let record = domain.register();

        let node = counted(&drops);
        domain.protect_known(node, record);

        // safety: never linked anywhere
        unsafe { domain.retire(node, record) }
        unsafe { domain.scan(record) }
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn scan_keeps_retirees_protected_by_other_threads() {
        let drops = Arc::new(AtomicUsize::new(0));
        let domain: Domain<2> = Domain::new(4);
        let record = domain.register();

        let node = counted(&drops);
        let src = AtomicMarkedPtr::new(MarkedPtr::new(node, false));

        // another thread publishes a hazard on the node and holds it
        let protected = thread::scope(|s| {
            s.spawn(|| {
                let other = domain.register();
                domain.protect(&src, other) as usize
            })
            .join()
            .unwrap()
        });
        assert_eq!(protected, node as usize);

        domain.protect_known(node, record);
        unsafe { domain.retire(node, record) }
        unsafe { domain.scan(record) }

        // still referenced by the other record's slot
        assert_eq!(drops.load(Ordering::Relaxed), 0);

        // the domain frees survivors when it drops
        drop(domain);
        assert_eq!(drops.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn retire_scans_at_capacity() {
        const P: usize = 2;
        const N: usize = 2;
        let capacity = 2 * P * N;

        let drops = Arc::new(AtomicUsize::new(0));
        let domain: Domain<P> = Domain::new(N);
        let record = domain.register();

        for _ in 0..capacity {
            let node = counted(&drops);
            domain.protect_known(node, record);
            unsafe { domain.retire(node, record) }
        }

        // the final retire hit capacity and nothing was protected
        assert_eq!(drops.load(Ordering::Relaxed), capacity);
    }

    #[test]
    fn protect_rereads_until_stable() {
        let domain: Domain<4> = Domain::new(4);

        let a = Box::into_raw(Box::new(1_usize));
        let b = Box::into_raw(Box::new(2_usize));
        let src = AtomicMarkedPtr::new(MarkedPtr::new(a, false));

        // raw pointers are not `Send`; the threads pass addresses instead
        let (a_addr, b_addr) = (a as usize, b as usize);

        // flip the source while another thread protects it; the returned
        // address must always match a value the source actually held
        thread::scope(|s| {
            let (src, domain) = (&src, &domain);

            let flipper = s.spawn(move || {
                for _ in 0..1000 {
                    src.store(MarkedPtr::new(b_addr as *mut usize, false), Ordering::SeqCst);
                    src.store(MarkedPtr::new(a_addr as *mut usize, false), Ordering::SeqCst);
                }
            });

            let reader = s.spawn(move || {
                let reader = domain.register();
                for _ in 0..1000 {
                    let ptr = domain.protect(src, reader);
                    assert!(ptr as usize == a_addr || ptr as usize == b_addr);
                    domain.release(ptr, reader);
                }
            });

            flipper.join().unwrap();
            reader.join().unwrap();
        });

        let _ = unsafe { Box::from_raw(a) };
        let _ = unsafe { Box::from_raw(b) };
    }
}
