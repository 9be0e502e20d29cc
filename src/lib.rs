// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Convergent: State-Based CRDTs for Replicated Key-Value Stores
//!
//! This crate provides a small family of **state-based, convergent replicated
//! data types** (CvRDTs) designed to live inside an eventually-consistent,
//! leaderless key-value store. Replicas accept local updates without
//! coordination, ship whole state values to each other, and apply a
//! commutative, associative, idempotent *merge* to converge.
//!
//! ## Core Types
//!
//! Three CRDTs share one behavioural contract (the [`Crdt`] trait) and one
//! causal substrate (the [`causal`] module):
//!
//! - [`Orswot`]: an **Observed-Remove Set Without Tombstones**. Adds win over
//!   concurrent removes; removal leaves no markers behind.
//! - [`OdFlag`]: an **observed-disable flag**, a boolean that can be enabled
//!   and disabled repeatedly, with enable-wins semantics under concurrency.
//! - [`OrMap`]: a map whose keys are `(name, type)` [`Field`]s and whose
//!   values are nested CRDTs sharing the map's causal context.
//!
//! ## Dots and Version Vectors
//!
//! Every update event is named by a [`Dot`](causal::Dot): a pair of the
//! authoring [`Actor`](causal::Actor) and a per-actor counter. Each CRDT
//! state carries a [`VersionVector`](causal::VersionVector) clock summarising
//! every dot the replica has observed, and tags live elements with the exact
//! dots that birthed their presence.
//!
//! Removal is the *absence* of a dot's element combined with the *presence*
//! of the dot in the clock. When two states merge, an element held by only
//! one side is either an add the other has not yet seen (its dots are not in
//! the peer's clock, so it is kept) or a remove the other side already
//! performed (its dots are dominated, so it is dropped). No tombstones are
//! ever written, so metadata stays proportional to live data.
//!
//! ## Example
//!
//! ```rust
//! use convergent::{Crdt, Orswot, SetOp, causal::Actor};
//!
//! let mut a: Orswot<String> = Orswot::new();
//! let mut b = a.clone();
//!
//! // Replica A adds "x"; replica B concurrently adds then removes "y".
//! a.update(SetOp::Add("x".into()), Actor::from("a").into()).unwrap();
//! b.update(SetOp::Add("y".into()), Actor::from("b").into()).unwrap();
//! b.update(SetOp::Remove("y".into()), Actor::from("b").into()).unwrap();
//!
//! // Merge is pure and order-insensitive.
//! let merged = a.merge(&b);
//! assert_eq!(merged, b.merge(&a));
//! assert!(merged.contains(&"x".to_string()));
//! assert!(!merged.contains(&"y".to_string()));
//! ```
//!
//! ## Updates, Errors, Atomicity
//!
//! Updates take a [`Stamp`]: either an [`Actor`](causal::Actor) (the CRDT
//! allocates a fresh dot) or a pre-stamped [`Dot`](causal::Dot) (the CRDT
//! adopts it; this is how [`OrMap`] makes nested updates share causality
//! with the enclosing batch).
//!
//! Removing an element or field that is not present is a **precondition
//! error**, not a no-op. Batched updates are all-or-nothing: the first
//! failing sub-op abandons the whole batch and leaves the state untouched.
//! Merges and value queries never fail.
//!
//! ## Scope of this Crate
//!
//! This crate provides the data types and their merge algebra only. It does
//! **not** include networking, anti-entropy scheduling, persistence, or
//! delivery guarantees; the host database owns those. States are plain
//! values: no threads, no locks, no interior mutability. The host is
//! expected to serialize operations on a single replica and replicate whole
//! states out-of-band, for example via [`binary::to_binary`].
//!
//! ## License
//!
//! This project is licensed under either of
//!
//! - Apache License, Version 2.0, ([LICENSE-APACHE](LICENSE-APACHE) or http://www.apache.org/licenses/LICENSE-2.0)
//! - MIT license ([LICENSE-MIT](LICENSE-MIT) or http://opensource.org/licenses/MIT)
//!
//! at your option.
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

use std::sync::atomic::{AtomicU8, Ordering};

pub mod causal;
pub mod crdts;
pub use crdts::{
    Crdt, CrdtOp, CrdtValue, Field, FlagOp, MapError, MapOp, Scalar, SetError, SetOp, Stamp,
    StatName, TypeTag, Value, ValueError, flag::OdFlag, map::OrMap, orswot::Orswot,
};
pub mod binary;
/// Macros usable for tests and initialization
pub mod macros;

/// How [`binary::to_binary`] compresses state bodies.
///
/// This is a process-wide setting; see [`set_binary_compression`].
/// [`binary::from_binary`] always decodes transparently, regardless of the
/// setting in force when the blob was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryCompression {
    /// Compress with the library default level. This is the initial setting.
    Enabled,
    /// Do not compress.
    Disabled,
    /// Compress with an explicit deflate level, `0` (store) to `9` (best).
    Level(u8),
}

const COMPRESSION_ENABLED: u8 = 0xff;
const COMPRESSION_DISABLED: u8 = 0xfe;

static BINARY_COMPRESSION: AtomicU8 = AtomicU8::new(COMPRESSION_ENABLED);

/// Sets the process-wide compression mode used by [`binary::to_binary`].
///
/// Levels above 9 are clamped to 9.
pub fn set_binary_compression(mode: BinaryCompression) {
    let raw = match mode {
        BinaryCompression::Enabled => COMPRESSION_ENABLED,
        BinaryCompression::Disabled => COMPRESSION_DISABLED,
        BinaryCompression::Level(level) => level.min(9),
    };
    BINARY_COMPRESSION.store(raw, Ordering::Release);
}

/// Returns the process-wide compression mode used by [`binary::to_binary`].
pub fn binary_compression() -> BinaryCompression {
    match BINARY_COMPRESSION.load(Ordering::Acquire) {
        COMPRESSION_ENABLED => BinaryCompression::Enabled,
        COMPRESSION_DISABLED => BinaryCompression::Disabled,
        level => BinaryCompression::Level(level),
    }
}
