// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Causal Substrate
//!
//! This module provides the data structures that track causality for every
//! CRDT in this crate:
//!
//! - **[`Actor`]**: the opaque identity of a replica authoring an update.
//!   Actors are equality-comparable byte tokens; no semantic ordering between
//!   actors is assumed anywhere in the merge algebra.
//!
//! - **[`Dot`]**: a globally unique name for a single update event, composed
//!   of the authoring [`Actor`] and a per-actor counter that starts at 1 and
//!   only ever grows.
//!
//! - **[`VersionVector`]**: a mapping from actor to the maximum counter
//!   observed from that actor. Semantically this is a set of dots closed
//!   downward per actor: holding `(a, 3)` implies `(a, 1)` and `(a, 2)`.
//!
//! - **[`DotSet`]**: a *minimal clock*: a set of dots that is **not** closed
//!   downward, used to tag an element with the exact adds that birthed its
//!   current presence.
//!
//! The happens-before relation is expressed through dominance: a dot
//! `(a, c)` is dominated by a version vector `v` iff `v[a] >= c`. Everything
//! the CRDTs do at merge time reduces to asking which dots a peer's clock
//! dominates.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::{collections::BTreeMap, fmt, num::NonZeroU64};

/// The opaque identity of a replica authoring updates.
///
/// Actors are byte strings in practice (a node name, a vnode id, a uuid).
/// The merge algebra only ever compares them for equality; the `Ord` impl
/// exists so actors can key ordered maps, and carries no semantic weight.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Actor(#[serde(with = "serde_bytes")] Vec<u8>);

impl Actor {
    /// Constructs an actor from an arbitrary byte token.
    pub fn new(token: impl Into<Vec<u8>>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Actor {
    fn from(token: &str) -> Self {
        Self(token.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Actor {
    fn from(token: &[u8]) -> Self {
        Self(token.to_vec())
    }
}

impl From<Vec<u8>> for Actor {
    fn from(token: Vec<u8>) -> Self {
        Self(token)
    }
}

/// Renders printable tokens as text and everything else as hex.
impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "@{s}"),
            _ => write!(f, "@{:02x?}", self.0),
        }
    }
}

/// A unique identifier for a single update event.
///
/// Every update an actor performs is assigned a `Dot`: the actor paired with
/// an ever-increasing counter. The first dot an actor produces has counter 1.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dot {
    actor: Actor,
    counter: NonZeroU64,
}

impl fmt::Debug for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}, {})", self.actor, self.counter)
    }
}

impl Dot {
    /// Creates a new [`Dot`] out of thin air.
    ///
    /// Real dots are made by [`VersionVector::increment`]. This constructor
    /// is mainly useful for tests and documentation examples.
    ///
    /// # Panics
    ///
    /// If `counter == 0`.
    pub fn mint(actor: impl Into<Actor>, counter: u64) -> Self {
        Self {
            actor: actor.into(),
            counter: NonZeroU64::new(counter)
                .expect("attempted to construct Dot for 0th counter"),
        }
    }

    /// Returns the [`Actor`] that produced this dot.
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Returns the per-actor update index of this dot.
    pub fn counter(&self) -> u64 {
        self.counter.get()
    }
}

/// A mapping from actor to its maximum observed counter.
///
/// Holds at most one entry per actor and never an entry with counter 0. The
/// vector is downward closed: dominating `(a, 3)` implies having observed
/// `(a, 1)` and `(a, 2)`.
///
/// # Examples
///
/// ```rust
/// use convergent::causal::{Actor, VersionVector};
///
/// let mut vv = VersionVector::new();
/// let dot1 = vv.increment(Actor::from("a"));
/// let dot2 = vv.increment(Actor::from("a"));
///
/// assert_eq!(dot1.counter(), 1);
/// assert_eq!(dot2.counter(), 2);
/// assert!(vv.dominates(&dot1));
/// assert!(vv.dominates(&dot2));
/// assert_eq!(vv.get_counter(&Actor::from("b")), 0);
/// ```
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector {
    counters: BTreeMap<Actor, NonZeroU64>,
}

impl fmt::Debug for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl VersionVector {
    /// Constructs the empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumps this actor's counter and returns the freshly allocated [`Dot`].
    pub fn increment(&mut self, actor: Actor) -> Dot {
        let next = self.get_counter(&actor) + 1;
        let next = NonZeroU64::new(next).expect("counter + 1 is nonzero");
        self.counters.insert(actor.clone(), next);
        Dot {
            actor,
            counter: next,
        }
    }

    /// Returns the maximum counter observed from `actor`, or 0 if absent.
    pub fn get_counter(&self, actor: &Actor) -> u64 {
        self.counters.get(actor).map_or(0, |c| c.get())
    }

    /// Records the given dot as observed.
    pub fn observe(&mut self, dot: &Dot) {
        let seen = self
            .counters
            .entry(dot.actor.clone())
            .or_insert(dot.counter);
        if dot.counter > *seen {
            *seen = dot.counter;
        }
    }

    /// True iff this vector has observed the given dot.
    pub fn dominates(&self, dot: &Dot) -> bool {
        self.get_counter(&dot.actor) >= dot.counter()
    }

    /// True iff every dot implied by `other` is dominated by `self`.
    pub fn descends(&self, other: &VersionVector) -> bool {
        other
            .counters
            .iter()
            .all(|(actor, counter)| self.get_counter(actor) >= counter.get())
    }

    /// True iff every dot in the given dot set is dominated by `self`.
    pub fn descends_dots(&self, dots: &DotSet) -> bool {
        dots.iter().all(|dot| self.dominates(dot))
    }

    /// Incorporates the observations of `other` into `self` (pointwise max).
    pub fn union(&mut self, other: &VersionVector) {
        for (actor, counter) in &other.counters {
            let seen = self.counters.entry(actor.clone()).or_insert(*counter);
            if *counter > *seen {
                *seen = *counter;
            }
        }
    }

    /// Returns the pointwise maximum of the two vectors.
    ///
    /// This operation is commutative, associative, and idempotent.
    pub fn merge(&self, other: &VersionVector) -> VersionVector {
        let mut out = self.clone();
        out.union(other);
        out
    }

    /// Number of actors with at least one observed update.
    pub fn actor_count(&self) -> usize {
        self.counters.len()
    }

    /// True if no updates have been observed.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Iterates over `(actor, max counter)` pairs.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&Actor, u64)> {
        self.counters.iter().map(|(actor, c)| (actor, c.get()))
    }
}

/// A minimal clock: a set of [`Dot`]s that is *not* closed downward.
///
/// Used to record the exact adds (or enables) that birthed an element's
/// current presence. Kept sorted and deduplicated; a single dot is by far
/// the common case, so one inlines into the set itself.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DotSet {
    dots: SmallVec<[Dot; 1]>,
}

impl fmt::Debug for DotSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl DotSet {
    /// Constructs the empty dot set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a dot set holding exactly one dot.
    pub fn singleton(dot: Dot) -> Self {
        Self {
            dots: SmallVec::from_buf([dot]),
        }
    }

    /// Inserts a dot, keeping the set sorted and free of duplicates.
    pub fn insert(&mut self, dot: Dot) {
        if let Err(at) = self.dots.binary_search(&dot) {
            self.dots.insert(at, dot);
        }
    }

    /// True iff the given dot is in the set.
    pub fn contains(&self, dot: &Dot) -> bool {
        self.dots.binary_search(dot).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.dots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dots.len()
    }

    /// Iterates over the dots in ascending order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Dot> {
        self.dots.iter()
    }

    /// Returns the dots present in both sets.
    pub fn intersection(&self, other: &DotSet) -> DotSet {
        DotSet {
            dots: self
                .dots
                .iter()
                .filter(|&dot| other.contains(dot))
                .cloned()
                .collect(),
        }
    }

    /// Returns the dots of `self` that are not in `other`.
    pub fn difference(&self, other: &DotSet) -> DotSet {
        DotSet {
            dots: self
                .dots
                .iter()
                .filter(|&dot| !other.contains(dot))
                .cloned()
                .collect(),
        }
    }

    /// Returns the dots of either set.
    pub fn union(&self, other: &DotSet) -> DotSet {
        let mut out = self.clone();
        for dot in other.iter() {
            out.insert(dot.clone());
        }
        out
    }

    /// Returns exactly those dots **not** dominated by `clock`.
    ///
    /// This is the pruning step of every observed-remove merge: a dot that
    /// the peer's clock dominates, but whose element the peer no longer
    /// holds, has been removed at the peer.
    pub fn subtract(&self, clock: &VersionVector) -> DotSet {
        DotSet {
            dots: self
                .dots
                .iter()
                .filter(|&dot| !clock.dominates(dot))
                .cloned()
                .collect(),
        }
    }

    /// Records every dot in this set as observed by `clock`.
    pub fn add_to(&self, clock: &mut VersionVector) {
        for dot in self.iter() {
            clock.observe(dot);
        }
    }
}

impl FromIterator<Dot> for DotSet {
    fn from_iter<T: IntoIterator<Item = Dot>>(iter: T) -> Self {
        let mut out = DotSet::new();
        for dot in iter {
            out.insert(dot);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot;

    fn vv(entries: &[(&str, u64)]) -> VersionVector {
        let mut out = VersionVector::new();
        for &(actor, counter) in entries {
            out.observe(&Dot::mint(actor, counter));
        }
        out
    }

    #[test]
    fn increment_allocates_sequential_dots() {
        let mut clock = VersionVector::new();
        let d1 = clock.increment(Actor::from("a"));
        let d2 = clock.increment(Actor::from("a"));
        let d3 = clock.increment(Actor::from("b"));
        assert_eq!(d1, dot!("a", 1));
        assert_eq!(d2, dot!("a", 2));
        assert_eq!(d3, dot!("b", 1));
        assert_eq!(clock.get_counter(&Actor::from("a")), 2);
        assert_eq!(clock.get_counter(&Actor::from("c")), 0);
    }

    #[test]
    fn observe_is_monotonic() {
        let mut clock = VersionVector::new();
        clock.observe(&dot!("a", 5));
        clock.observe(&dot!("a", 3));
        assert_eq!(clock.get_counter(&Actor::from("a")), 5);
        assert!(clock.dominates(&dot!("a", 4)));
        assert!(!clock.dominates(&dot!("a", 6)));
    }

    #[test]
    fn descends_is_reflexive_and_respects_gaps() {
        let a = vv(&[("a", 3), ("b", 1)]);
        let b = vv(&[("a", 2)]);
        assert!(a.descends(&a));
        assert!(a.descends(&b));
        assert!(!b.descends(&a));
        assert!(a.descends(&VersionVector::new()));
    }

    #[test]
    fn subtract_keeps_only_unseen_dots() {
        let clock = vv(&[("a", 2)]);
        let dots: DotSet = [dot!("a", 1), dot!("a", 3), dot!("b", 1)]
            .into_iter()
            .collect();
        let kept = dots.subtract(&clock);
        assert!(!kept.contains(&dot!("a", 1)));
        assert!(kept.contains(&dot!("a", 3)));
        assert!(kept.contains(&dot!("b", 1)));
    }

    #[test]
    fn dot_set_dedups_and_sorts() {
        let mut dots = DotSet::new();
        dots.insert(dot!("b", 1));
        dots.insert(dot!("a", 2));
        dots.insert(dot!("a", 2));
        dots.insert(dot!("a", 1));
        assert_eq!(dots.len(), 3);
        let order: Vec<_> = dots.iter().cloned().collect();
        assert_eq!(order, vec![dot!("a", 1), dot!("a", 2), dot!("b", 1)]);
    }

    #[quickcheck]
    fn merge_is_commutative(a: Vec<(u8, u8)>, b: Vec<(u8, u8)>) -> bool {
        let a = vv_from_raw(&a);
        let b = vv_from_raw(&b);
        a.merge(&b) == b.merge(&a)
    }

    #[quickcheck]
    fn merge_is_associative(a: Vec<(u8, u8)>, b: Vec<(u8, u8)>, c: Vec<(u8, u8)>) -> bool {
        let a = vv_from_raw(&a);
        let b = vv_from_raw(&b);
        let c = vv_from_raw(&c);
        a.merge(&b.merge(&c)) == a.merge(&b).merge(&c)
    }

    #[quickcheck]
    fn merge_is_idempotent(a: Vec<(u8, u8)>) -> bool {
        let a = vv_from_raw(&a);
        a.merge(&a) == a
    }

    #[quickcheck]
    fn merge_descends_both_inputs(a: Vec<(u8, u8)>, b: Vec<(u8, u8)>) -> bool {
        let a = vv_from_raw(&a);
        let b = vv_from_raw(&b);
        let merged = a.merge(&b);
        merged.descends(&a) && merged.descends(&b)
    }

    fn vv_from_raw(raw: &[(u8, u8)]) -> VersionVector {
        let mut out = VersionVector::new();
        for &(actor, counter) in raw {
            out.observe(&Dot::mint(vec![actor], u64::from(counter) + 1));
        }
        out
    }
}
