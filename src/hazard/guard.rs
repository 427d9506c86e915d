use std::ops::Deref;

use super::domain::{Domain, ThreadRecord};
use super::marked::AtomicMarkedPtr;

/// A scoped hazard over a single node address.
///
/// While the guard lives, the address it wraps is either published in one of
/// the owning thread's hazard slots or is an immortal sentinel; in both
/// cases no scan can free it. Dropping the guard clears the slot on every
/// exit path; [`retire`](HazardPtr::retire) hands the node to the reclaimer
/// instead.
///
/// The guard is move-only and is the only dereference path for nodes.
pub(crate) struct HazardPtr<'a, T, const P: usize> {
    domain: &'a Domain<P>,
    record: &'a ThreadRecord<P>,
    ptr: *mut T,
    // whether `ptr` occupies a hazard slot; sentinels and empty guards don't
    slot: bool,
}

impl<'a, T, const P: usize> HazardPtr<'a, T, P> {
    /// A guard holding nothing.
    pub(crate) fn empty(domain: &'a Domain<P>, record: &'a ThreadRecord<P>) -> HazardPtr<'a, T, P> {
        HazardPtr {
            domain,
            record,
            ptr: std::ptr::null_mut(),
            slot: false,
        }
    }

    /// Wraps an immortal node without consuming a slot.
    ///
    /// Only the set's sentinels qualify: they are freed by the set's
    /// destructor alone, so dereferencing them needs no protection.
    pub(crate) fn sentinel(
        domain: &'a Domain<P>,
        record: &'a ThreadRecord<P>,
        ptr: *mut T,
    ) -> HazardPtr<'a, T, P> {
        HazardPtr {
            domain,
            record,
            ptr,
            slot: false,
        }
    }

    /// Protects the address currently stored in `src`.
    pub(crate) fn protect(
        domain: &'a Domain<P>,
        record: &'a ThreadRecord<P>,
        src: &AtomicMarkedPtr<T>,
    ) -> HazardPtr<'a, T, P> {
        let ptr = domain.protect(src, record);
        HazardPtr {
            domain,
            record,
            ptr,
            slot: true,
        }
    }

    /// Publishes a caller-supplied address directly.
    ///
    /// The caller must keep `ptr` reachable through another hazard until
    /// this returns; see [`Domain::protect_known`].
    pub(crate) fn protect_known(
        domain: &'a Domain<P>,
        record: &'a ThreadRecord<P>,
        ptr: *mut T,
    ) -> HazardPtr<'a, T, P> {
        let ptr = domain.protect_known(ptr, record);
        HazardPtr {
            domain,
            record,
            ptr,
            slot: true,
        }
    }

    #[inline]
    pub(crate) fn ptr(&self) -> *mut T {
        self.ptr
    }

    #[inline]
    pub(crate) fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// Hands the node to the reclaimer, consuming the guard.
    ///
    /// Called by the thread whose CAS physically unlinked the node.
    ///
    /// # Safety
    ///
    /// The node must be unlinked and retired exactly once; see
    /// [`Domain::retire`].
    pub(crate) unsafe fn retire(mut self) {
        debug_assert!(self.slot && !self.ptr.is_null(), "retired an empty hazard");

        // safety: forwarded from the caller
        unsafe { self.domain.retire(self.ptr, self.record) }

        // the slot was released by `retire`; disarm the destructor
        self.slot = false;
        self.ptr = std::ptr::null_mut();
    }
}

impl<T, const P: usize> Deref for HazardPtr<'_, T, P> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        debug_assert!(!self.ptr.is_null(), "dereferenced an empty hazard");

        // safety: the published slot (or sentinel immortality) keeps the
        // node alive for the guard's lifetime
        unsafe { &*self.ptr }
    }
}

impl<T, const P: usize> Drop for HazardPtr<'_, T, P> {
    fn drop(&mut self) {
        if self.slot && !self.ptr.is_null() {
            self.domain.release(self.ptr, self.record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::marked::MarkedPtr;
    use std::sync::atomic::Ordering;

    #[test]
    fn drop_releases_the_slot() {
        let domain: Domain<2> = Domain::new(2);
        let record = domain.register();

        let node = Box::into_raw(Box::new(5_usize));
        let src = AtomicMarkedPtr::new(MarkedPtr::new(node, false));

        {
            let guard = HazardPtr::protect(&domain, record, &src);
            assert_eq!(*guard, 5);
        }

        // the slot is free again: protecting twice in a row would otherwise
        // exhaust a two-slot record on the third acquisition
        for _ in 0..8 {
            let guard = HazardPtr::protect(&domain, record, &src);
            assert_eq!(guard.ptr(), node);
        }

        let _ = unsafe { Box::from_raw(node) };
    }

    #[test]
    fn sentinel_consumes_no_slot() {
        let domain: Domain<1> = Domain::new(2);
        let record = domain.register();

        let node = Box::into_raw(Box::new(1_usize));
        let src = AtomicMarkedPtr::new(MarkedPtr::new(node, false));

        // one slot total: the sentinel must not occupy it
        let head = HazardPtr::sentinel(&domain, record, node);
        let guard = HazardPtr::protect(&domain, record, &src);

        assert_eq!(head.ptr(), guard.ptr());
        drop(guard);
        drop(head);

        let _ = unsafe { Box::from_raw(node) };
    }

    #[test]
    fn retire_consumes_the_guard() {
        let domain: Domain<2> = Domain::new(2);
        let record = domain.register();

        let node = Box::into_raw(Box::new(3_usize));
        let guard = HazardPtr::protect_known(&domain, record, node);

        // safety: never linked anywhere
        unsafe { guard.retire() }

        // both slots are free again: the retire released one, so two fresh
        // acquisitions must succeed on a two-slot record
        let other = Box::into_raw(Box::new(4_usize));
        let src = AtomicMarkedPtr::new(MarkedPtr::new(other, false));
        let first = HazardPtr::protect(&domain, record, &src);
        let second = HazardPtr::protect(&domain, record, &src);
        assert_eq!(*first, 4);
        drop(second);
        drop(first);

        let _ = unsafe { Box::from_raw(other) };
    }
}
