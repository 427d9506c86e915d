use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr;

use crate::element::Element;
use crate::hazard::{HazardPtr, ThreadRecord};
use crate::raw::{self, Node};

/// A lock-free ordered set.
///
/// The set is a sorted singly-linked list bounded by two immortal sentinel
/// nodes, with hazard-pointer memory reclamation. Every operation requires a
/// [`ThreadHandle`], which can be acquired through [`OrderedSet::register`].
///
/// `P` is the number of hazard slots available to each registered thread and
/// bounds how many [`NodeRef`]s a thread can hold at once (traversal itself
/// uses two slots). `N` is the maximum number of registrations; together they
/// size the retire lists (`2 * P * N`) that amortize reclamation scans.
///
/// Keys must compare strictly between [`Element::MIN`] and [`Element::MAX`];
/// the sentinel values themselves cannot be stored, and debug builds reject
/// them.
///
/// # Examples
///
/// ```rust
/// use harrier::OrderedSet;
///
/// let set = OrderedSet::<i64>::new();
/// let handle = set.register();
///
/// assert!(set.insert(3, &handle).is_none());
/// assert!(set.insert(3, &handle).is_some());
/// assert!(set.contains(&3, &handle));
///
/// assert!(set.remove(&3, &handle));
/// assert!(!set.contains(&3, &handle));
/// ```
pub struct OrderedSet<T, const P: usize = 16, const N: usize = 128> {
    raw: raw::OrderedSet<T, P>,
}

impl<T, const P: usize, const N: usize> OrderedSet<T, P, N>
where
    T: Element,
{
    /// Creates an empty set.
    pub fn new() -> OrderedSet<T, P, N> {
        OrderedSet {
            raw: raw::OrderedSet::new(N),
        }
    }

    /// Registers the calling thread, returning the handle that every
    /// operation takes.
    ///
    /// A handle is tied to the thread that registered it and cannot be sent
    /// elsewhere. Registrations are never reclaimed before the set drops, and
    /// at most `N` of them can be issued over the set's lifetime; exceeding
    /// the limit panics.
    pub fn register(&self) -> ThreadHandle<'_, T, P> {
        ThreadHandle {
            record: self.raw.register(),
            owner: &self.raw,
            _unsend: PhantomData,
        }
    }

    /// Inserts a key into the set.
    ///
    /// Returns `None` if the key was newly inserted, or a [`NodeRef`] to the
    /// node that already held it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use harrier::OrderedSet;
    ///
    /// let set = OrderedSet::<i64>::new();
    /// let handle = set.register();
    ///
    /// assert!(set.insert(8, &handle).is_none());
    /// let existing = set.insert(8, &handle).unwrap();
    /// assert_eq!(*existing.key(), 8);
    /// ```
    pub fn insert<'g>(
        &'g self,
        key: T,
        handle: &'g ThreadHandle<'_, T, P>,
    ) -> Option<NodeRef<'g, T, P>> {
        self.check(handle);
        Self::check_key(&key);

        self.raw
            .insert(key, handle.record)
            .map(|guard| NodeRef { guard })
    }

    /// Removes a key from the set. Returns whether the key was present.
    pub fn remove(&self, key: &T, handle: &ThreadHandle<'_, T, P>) -> bool {
        self.check(handle);
        Self::check_key(key);
        self.raw.remove(key, handle.record)
    }

    /// Returns a [`NodeRef`] to the node holding `key`, if the set contains
    /// it.
    pub fn find<'g>(
        &'g self,
        key: &T,
        handle: &'g ThreadHandle<'_, T, P>,
    ) -> Option<NodeRef<'g, T, P>> {
        self.check(handle);
        Self::check_key(key);
        self.raw
            .find(key, handle.record)
            .map(|guard| NodeRef { guard })
    }

    /// Returns whether the set contains `key`.
    pub fn contains(&self, key: &T, handle: &ThreadHandle<'_, T, P>) -> bool {
        self.check(handle);
        Self::check_key(key);
        self.raw.find(key, handle.record).is_some()
    }

    /// The approximate number of keys in the set.
    ///
    /// The count may transiently stray while operations are in flight on
    /// other threads; it is exact once they quiesce.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether [`len`](OrderedSet::len) is zero, with the same caveat.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An iterator over the keys of the set, in ascending order.
    ///
    /// Keys are cloned out from under their hazards one at a time, so the
    /// iterator holds no more than the traversal's own slots. Concurrent
    /// inserts and removes may or may not be reflected; a quiescent
    /// traversal sees exactly the set's contents.
    pub fn iter<'g>(&'g self, handle: &'g ThreadHandle<'_, T, P>) -> Iter<'g, T, P>
    where
        T: Clone,
    {
        self.check(handle);
        Iter {
            raw: &self.raw,
            record: handle.record,
            last: T::MIN,
            done: false,
        }
    }

    // A handle is only as good as the registry entry behind it: one from
    // another set would publish hazards that set's scans never read.
    #[inline]
    fn check(&self, handle: &ThreadHandle<'_, T, P>) {
        assert!(
            ptr::eq(handle.owner, &self.raw),
            "thread handle used with a set that did not issue it",
        );
    }

    // The sentinel values bound the key domain and are not themselves keys;
    // an operation on one would touch the immortal boundary nodes.
    #[inline]
    fn check_key(key: &T) {
        debug_assert!(
            *key != T::MIN && *key != T::MAX,
            "sentinel values cannot be used as keys",
        );
    }
}

impl<T, const P: usize, const N: usize> Default for OrderedSet<T, P, N>
where
    T: Element,
{
    fn default() -> OrderedSet<T, P, N> {
        OrderedSet::new()
    }
}

impl<T, const P: usize, const N: usize> FromIterator<T> for OrderedSet<T, P, N>
where
    T: Element,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> OrderedSet<T, P, N> {
        let set = OrderedSet::new();
        {
            let handle = set.register();
            for key in iter {
                set.insert(key, &handle);
            }
        }
        set
    }
}

impl<T, const P: usize, const N: usize> fmt::Debug for OrderedSet<T, P, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedSet")
            .field("len", &self.raw.len())
            .finish_non_exhaustive()
    }
}

/// Compares the sets element-wise.
///
/// Each comparison registers a temporary handle on both sets, which counts
/// toward their registration limits.
impl<T, const P: usize, const N: usize> PartialEq for OrderedSet<T, P, N>
where
    T: Element + Clone,
{
    fn eq(&self, other: &OrderedSet<T, P, N>) -> bool {
        let ours = self.register();
        let theirs = other.register();
        self.iter(&ours).eq(other.iter(&theirs))
    }
}

impl<T, const P: usize, const N: usize> Eq for OrderedSet<T, P, N> where T: Element + Clone {}

/// A registered thread's capability to operate on an [`OrderedSet`].
///
/// Handles are issued by [`OrderedSet::register`], borrow the set, and are
/// neither `Send` nor `Sync`: an operation can only ever be invoked with a
/// handle belonging to the calling thread.
pub struct ThreadHandle<'a, T, const P: usize> {
    record: &'a ThreadRecord<P>,
    owner: *const raw::OrderedSet<T, P>,
    _unsend: PhantomData<*mut ()>,
}

impl<T, const P: usize> fmt::Debug for ThreadHandle<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("thread", &self.record.thread())
            .field("index", &self.record.index())
            .finish()
    }
}

/// A hazard-protected view of a node in the set.
///
/// While the reference lives, the node it points at cannot be reclaimed; the
/// hazard slot backing it is released on drop. The node's key is reachable
/// through [`key`](NodeRef::key) or `Deref`, and
/// [`is_marked`](NodeRef::is_marked) reports whether the node has been
/// logically deleted since the reference was taken.
pub struct NodeRef<'g, T, const P: usize> {
    guard: HazardPtr<'g, Node<T>, P>,
}

impl<T, const P: usize> NodeRef<'_, T, P> {
    /// The key stored in the node.
    #[inline]
    pub fn key(&self) -> &T {
        self.guard.key()
    }

    /// Whether the node has been logically deleted.
    ///
    /// The node may be deleted concurrently at any point after the
    /// reference was returned; its key stays readable regardless.
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.guard.is_marked()
    }
}

impl<T, const P: usize> Deref for NodeRef<'_, T, P> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.key()
    }
}

impl<T: fmt::Debug, const P: usize> fmt::Debug for NodeRef<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("key", self.key())
            .field("marked", &self.is_marked())
            .finish()
    }
}

/// An iterator over the keys of an [`OrderedSet`], in ascending order.
///
/// See [`OrderedSet::iter`].
pub struct Iter<'g, T, const P: usize> {
    raw: &'g raw::OrderedSet<T, P>,
    record: &'g ThreadRecord<P>,
    last: T,
    done: bool,
}

impl<T, const P: usize> Iterator for Iter<'_, T, P>
where
    T: Element + Clone,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.done {
            return None;
        }

        match self.raw.successor(&self.last, self.record) {
            Some(node) => {
                let key = node.key().clone();
                self.last = key.clone();
                Some(key)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl<T: fmt::Debug, const P: usize> fmt::Debug for Iter<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter").field("after", &self.last).finish()
    }
}
