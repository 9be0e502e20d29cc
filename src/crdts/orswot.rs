// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{Crdt, Stamp, StatName, TypeTag};
use crate::causal::{DotSet, VersionVector};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    error::Error,
    fmt,
};

/// An **Observed-Remove Set Without Tombstones**, the reference case of this
/// crate's merge discipline.
///
/// The state is a clock plus, for each live element, the *minimal clock* of
/// adds that birthed its current presence. A removal simply deletes the
/// entry; the clock keeps the removed dots in its history, which is what
/// lets a later merge tell a remove apart from a not-yet-seen add without
/// any tombstones.
///
/// ## Conflict Handling
///
/// Adds win. If one replica removes an element while another concurrently
/// re-adds it, the re-add's dot is unknown to the remover's clock and
/// survives the merge.
///
/// Removing an element that is not currently present is a precondition
/// error, not a no-op: a replica can only remove what it has observed. Use
/// [`Crdt::precondition_context`] to ship observed state to a client that
/// wants to issue removes remotely.
///
/// ## Usage
///
/// ```rust
/// # use convergent::{Crdt, Orswot, SetOp, causal::Actor};
/// let mut set: Orswot<String> = Orswot::new();
/// set.update(SetOp::Add("apple".into()), Actor::from("a").into()).unwrap();
/// set.update(
///     SetOp::AddAll(vec!["pear".into(), "plum".into()]),
///     Actor::from("a").into(),
/// )
/// .unwrap();
/// set.update(SetOp::Remove("pear".into()), Actor::from("a").into()).unwrap();
///
/// assert_eq!(set.len(), 2);
/// assert!(set.contains(&"plum".to_string()));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orswot<V: Ord> {
    clock: VersionVector,
    entries: BTreeMap<V, DotSet>,
}

impl<V: Ord> Default for Orswot<V> {
    fn default() -> Self {
        Self {
            clock: VersionVector::new(),
            entries: BTreeMap::new(),
        }
    }
}

impl<V: Ord + fmt::Debug> fmt::Debug for Orswot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

/// An operation on an [`Orswot`].
#[derive(Debug, Clone, PartialEq)]
pub enum SetOp<V> {
    /// Adds an element. Never fails; re-adding a present element extends its
    /// dot history.
    Add(V),
    /// Adds every listed element. Never fails, so no atomicity is needed.
    AddAll(Vec<V>),
    /// Removes an element. Fails with [`SetError::NotPresent`] if it is not
    /// currently in the set.
    Remove(V),
    /// Removes every listed element, all-or-nothing: if any is missing the
    /// whole operation fails and the set is unchanged.
    RemoveAll(Vec<V>),
    /// Applies the listed sub-ops in order, all-or-nothing.
    Batch(Vec<SetOp<V>>),
}

/// A precondition error reported by [`Orswot`] updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetError<V> {
    /// The operation requires an element that is not in the current value.
    NotPresent(V),
}

impl<V: fmt::Debug> fmt::Display for SetError<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetError::NotPresent(element) => {
                write!(f, "element {element:?} is not in the set")
            }
        }
    }
}

impl<V: fmt::Debug> Error for SetError<V> {}

impl<V: Ord + Clone> Orswot<V> {
    /// True iff the element is currently in the set.
    pub fn contains(&self, element: &V) -> bool {
        self.entries.contains_key(element)
    }

    /// Number of elements currently in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True iff no element is currently in the set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the elements in ascending order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &V> {
        self.entries.keys()
    }

    /// The clock summarising every update this replica has observed.
    pub fn clock(&self) -> &VersionVector {
        &self.clock
    }

    fn add(&mut self, element: V, stamp: &Stamp) {
        let dot = match stamp {
            Stamp::Actor(actor) => self.clock.increment(actor.clone()),
            Stamp::Dot(dot) => {
                self.clock.observe(dot);
                dot.clone()
            }
        };
        self.entries.entry(element).or_default().insert(dot);
    }

    // Removal deletes the entry outright and leaves the clock alone: the
    // removed dots stay dominated by the clock, which is all a future merge
    // needs to know.
    fn remove(&mut self, element: V) -> Result<(), SetError<V>> {
        match self.entries.remove(&element) {
            Some(_) => Ok(()),
            None => Err(SetError::NotPresent(element)),
        }
    }

    fn apply(&mut self, op: SetOp<V>, stamp: &Stamp) -> Result<(), SetError<V>> {
        match op {
            SetOp::Add(element) => {
                self.add(element, stamp);
                Ok(())
            }
            SetOp::AddAll(elements) => {
                for element in elements {
                    self.add(element, stamp);
                }
                Ok(())
            }
            SetOp::Remove(element) => self.remove(element),
            SetOp::RemoveAll(elements) => {
                for element in elements {
                    self.remove(element)?;
                }
                Ok(())
            }
            SetOp::Batch(ops) => {
                for op in ops {
                    self.apply(op, stamp)?;
                }
                Ok(())
            }
        }
    }
}

impl<V: Ord + Clone + fmt::Debug> Crdt for Orswot<V> {
    const TAG: TypeTag = TypeTag::Set;

    type Value = BTreeSet<V>;
    type Op = SetOp<V>;
    type Error = SetError<V>;

    fn value(&self) -> BTreeSet<V> {
        self.entries.keys().cloned().collect()
    }

    fn update(&mut self, op: SetOp<V>, stamp: Stamp) -> Result<(), SetError<V>> {
        // all-or-nothing: apply to a scratch copy, commit only on success
        let mut next = self.clone();
        next.apply(op, &stamp)?;
        *self = next;
        Ok(())
    }

    /// The observed-remove merge.
    ///
    /// Clocks union pointwise. For an element both sides hold, the dots both
    /// agree on are kept unconditionally, and each side's private dots
    /// survive only if the *other* side's clock has not seen them (a seen
    /// but absent dot is a removal). An element only one side holds survives
    /// with its unseen dots, or disappears if the peer has seen them all.
    fn merge(&self, other: &Self) -> Self {
        let clock = self.clock.merge(&other.clock);
        let mut entries = BTreeMap::new();

        for (element, left) in &self.entries {
            let kept = match other.entries.get(element) {
                Some(right) => {
                    let common = left.intersection(right);
                    let left_keep = left.difference(&common).subtract(&other.clock);
                    let right_keep = right.difference(&common).subtract(&self.clock);
                    common.union(&left_keep).union(&right_keep)
                }
                None => left.subtract(&other.clock),
            };
            if !kept.is_empty() {
                entries.insert(element.clone(), kept);
            }
        }

        for (element, right) in &other.entries {
            if self.entries.contains_key(element) {
                continue;
            }
            let kept = right.subtract(&self.clock);
            if !kept.is_empty() {
                entries.insert(element.clone(), kept);
            }
        }

        Orswot { clock, entries }
    }

    fn precondition_context(&self) -> Self {
        self.clone()
    }

    fn stats(&self) -> Vec<(StatName, u64)> {
        vec![
            (StatName::ActorCount, self.clock.actor_count() as u64),
            (StatName::ElementCount, self.entries.len() as u64),
            (
                StatName::MaxDotLength,
                self.entries
                    .values()
                    .map(|dots| dots.len() as u64)
                    .max()
                    .unwrap_or(0),
            ),
        ]
    }
}
