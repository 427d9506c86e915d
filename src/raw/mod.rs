// A sentinel-bounded, sorted, lock-free linked list.
//
// Removal is two-phase: a try-mark on the victim's `next` link deletes it
// logically, and any later traversal that observes the mark swings the
// predecessor's link past the victim. The thread whose CAS performs that
// physical unlink owns the node's retirement. Traversal holds a pair of
// hazards (pred, curr) hand-over-hand, so a node can be inspected even while
// another thread unlinks it.
//
// Keys strictly between `Element::MIN` and `Element::MAX` keep the sentinels
// out of every operation's way: the tail bounds traversal, and the head is
// never a candidate node.
mod utils;

use std::sync::atomic::Ordering;

use crate::element::Element;
use crate::hazard::{AtomicMarkedPtr, Domain, HazardPtr, MarkedPtr, ThreadRecord};

use self::utils::Counter;

pub(crate) struct Node<T> {
    key: T,
    next: AtomicMarkedPtr<Node<T>>,
}

impl<T> Node<T> {
    fn alloc(key: T, next: MarkedPtr<Node<T>>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            key,
            next: AtomicMarkedPtr::new(next),
        }))
    }

    #[inline]
    pub(crate) fn key(&self) -> &T {
        &self.key
    }

    /// Whether the node is logically deleted.
    #[inline]
    pub(crate) fn is_marked(&self) -> bool {
        self.next.load(Ordering::SeqCst).is_marked()
    }
}

// An edge of the list: two hazards with pred.key < key <= curr.key.
type Edge<'g, T, const P: usize> = (HazardPtr<'g, Node<T>, P>, HazardPtr<'g, Node<T>, P>);

pub(crate) struct OrderedSet<T, const P: usize> {
    head: *mut Node<T>,
    domain: Domain<P>,
    count: Counter,
}

// Safety: nodes are owned by the set and only handed out as `&T`; freeing a
// node can happen on any thread that runs a scan.
unsafe impl<T: Send, const P: usize> Send for OrderedSet<T, P> {}
unsafe impl<T: Send + Sync, const P: usize> Sync for OrderedSet<T, P> {}

impl<T, const P: usize> OrderedSet<T, P>
where
    T: Element,
{
    pub(crate) fn new(threads: usize) -> OrderedSet<T, P> {
        let tail = Node::alloc(T::MAX, MarkedPtr::null());
        let head = Node::alloc(T::MIN, MarkedPtr::new(tail, false));

        OrderedSet {
            head,
            domain: Domain::new(threads),
            count: Counter::new(threads),
        }
    }

    pub(crate) fn register(&self) -> &ThreadRecord<P> {
        self.domain.register()
    }

    /// Finds the edge around `key`: `pred.key < key <= curr.key`.
    fn locate<'g>(&'g self, key: &T, record: &'g ThreadRecord<P>) -> Edge<'g, T, P> {
        self.locate_where(record, |candidate| candidate < key)
    }

    // Walks from the head while `advance(curr.key)` holds and returns the
    // first edge where it does not. Logically deleted nodes met on the way
    // are unlinked and retired; if the unlink CAS fails another thread
    // interfered with the edge, so the walk restarts from the head.
    fn locate_where<'g>(
        &'g self,
        record: &'g ThreadRecord<P>,
        advance: impl Fn(&T) -> bool,
    ) -> Edge<'g, T, P> {
        'restart: loop {
            let mut first = HazardPtr::empty(&self.domain, record);
            let mut second = HazardPtr::sentinel(&self.domain, record, self.head);

            loop {
                first = second;

                second = loop {
                    let candidate = HazardPtr::protect(&self.domain, record, &first.next);

                    // The edge must still read (candidate, unmarked). Once
                    // first is deleted its link is frozen, so a hazard
                    // published through it proves nothing about candidate.
                    if first.next.load(Ordering::SeqCst)
                        != MarkedPtr::new(candidate.ptr(), false)
                    {
                        continue 'restart;
                    }

                    let next = candidate.next.load(Ordering::SeqCst);
                    if !next.is_marked() {
                        break candidate;
                    }

                    // candidate is logically deleted: unlink it, or restart
                    // if another thread got to the edge first
                    if first
                        .next
                        .compare_exchange(
                            MarkedPtr::new(candidate.ptr(), false),
                            MarkedPtr::new(next.ptr(), false),
                        )
                        .is_err()
                    {
                        continue 'restart;
                    }

                    // safety: our CAS unlinked the node, so this thread owns
                    // its retirement
                    unsafe { candidate.retire() }
                };

                if !advance(&second.key) {
                    return (first, second);
                }
            }
        }
    }

    /// Inserts `key`, returning a guard over the already-present node if the
    /// set contained it. `None` means the key was inserted fresh.
    pub(crate) fn insert<'g>(
        &'g self,
        key: T,
        record: &'g ThreadRecord<P>,
    ) -> Option<HazardPtr<'g, Node<T>, P>> {
        let node = Node::alloc(key, MarkedPtr::null());

        // safety: unpublished until the CAS below succeeds
        let key = unsafe { &(*node).key };

        loop {
            let (first, second) = self.locate(key, record);

            if second.key == *key && !second.is_marked() {
                // safety: the node was never published
                unsafe { drop(Box::from_raw(node)) }
                return Some(second);
            }

            // published by the insertion CAS below
            unsafe { (*node).next.store(MarkedPtr::new(second.ptr(), false), Ordering::Relaxed) }

            if first
                .next
                .compare_exchange(
                    MarkedPtr::new(second.ptr(), false),
                    MarkedPtr::new(node, false),
                )
                .is_ok()
            {
                self.count.get(record.index()).fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }
    }

    /// Logically deletes the node holding `key`, if it is live.
    ///
    /// Physical unlinking is left to whichever traversal next observes the
    /// mark.
    pub(crate) fn remove(&self, key: &T, record: &ThreadRecord<P>) -> bool {
        loop {
            let (_first, second) = self.locate(key, record);

            let next = second.next.load(Ordering::SeqCst);
            if second.key != *key || next.is_marked() {
                return false;
            }

            if second.next.try_mark(next.ptr()) {
                self.count.get(record.index()).fetch_sub(1, Ordering::Relaxed);
                return true;
            }
            // lost the race: a new successor was linked in or another thread
            // marked the node first
        }
    }

    /// Returns a guard over the live node holding `key`, if any.
    pub(crate) fn find<'g>(
        &'g self,
        key: &T,
        record: &'g ThreadRecord<P>,
    ) -> Option<HazardPtr<'g, Node<T>, P>> {
        let (_first, second) = self.locate(key, record);

        if second.key == *key && !second.is_marked() {
            Some(second)
        } else {
            None
        }
    }

    /// The first live node with a key strictly greater than `after`, or
    /// `None` once only the tail remains. Drives iteration.
    pub(crate) fn successor<'g>(
        &'g self,
        after: &T,
        record: &'g ThreadRecord<P>,
    ) -> Option<HazardPtr<'g, Node<T>, P>> {
        loop {
            let (_first, second) = self.locate_where(record, |candidate| candidate <= after);

            if second.key == T::MAX {
                return None;
            }

            if !second.is_marked() {
                return Some(second);
            }
            // the node was deleted under us; the next walk unlinks it
        }
    }
}

impl<T, const P: usize> OrderedSet<T, P> {
    /// The approximate number of keys in the set.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count.sum()
    }
}

impl<T, const P: usize> Drop for OrderedSet<T, P> {
    fn drop(&mut self) {
        // We have `&mut self`, so no operation is in flight. Retired nodes
        // are unreachable from the head (the domain frees those); everything
        // still linked, marked or not, is freed here along with the
        // sentinels.
        let mut node = self.head;

        while !node.is_null() {
            // safety: linked nodes are owned by the set until this point
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next.load(Ordering::Relaxed).ptr();
        }
    }
}
