//! A lock-free ordered set with hazard-pointer memory reclamation.
//!
//! [`OrderedSet`] keeps unique keys in a sorted, sentinel-bounded
//! singly-linked list. Removal marks a node's link before any thread swings
//! the predecessor past it, and unlinked nodes are retired to a
//! hazard-pointer domain that frees them only once no thread can still be
//! dereferencing them. All operations are lock-free: a thread that loses a
//! race retries, and some thread always makes progress.
//!
//! Threads participate explicitly: each one registers with the set and
//! passes its [`ThreadHandle`] to every operation, so the set stays usable
//! from runtimes that multiplex logical threads onto physical ones.
//!
//! # Usage
//!
//! ```rust
//! use harrier::OrderedSet;
//!
//! let set = OrderedSet::<i32>::new();
//!
//! std::thread::scope(|s| {
//!     s.spawn(|| {
//!         let handle = set.register();
//!         for key in 0..100 {
//!             set.insert(key * 2, &handle);
//!         }
//!     });
//!     s.spawn(|| {
//!         let handle = set.register();
//!         for key in 0..100 {
//!             set.insert(key * 2 + 1, &handle);
//!         }
//!     });
//! });
//!
//! let handle = set.register();
//! assert_eq!(set.len(), 200);
//! assert!(set.contains(&7, &handle));
//! ```
//!
//! Keys implement [`Element`], which supplies the sentinel bounds of the
//! key domain; implementations for the primitive integers are built in.

mod element;
mod hazard;
mod raw;
mod set;

#[cfg(feature = "serde")]
mod serde_impls;

pub use element::Element;
pub use set::{Iter, NodeRef, OrderedSet, ThreadHandle};
