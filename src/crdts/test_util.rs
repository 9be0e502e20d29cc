// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Shared helpers for the CRDT test suites: a tiny actor pool (few actors
//! make causal interleavings likely), a deterministic state generator, and
//! the add/remove-pair reference model the ORSWOT is checked against.

use super::orswot::{Orswot, SetOp};
use super::{Crdt, Stamp};
use crate::causal::Actor;
use std::collections::BTreeSet;

/// Maps an arbitrary byte to one of four well-known actors.
///
/// Tests bias toward few actors on purpose: concurrent dots from the same
/// small pool are what exercise the interesting merge branches.
pub(crate) fn small_actor(raw: u8) -> Actor {
    Actor::from(["a", "b", "c", "d"][raw as usize % 4])
}

/// Like [`small_actor`], but namespaced per scripted state.
///
/// Independently scripted states must not share actors: a dot names one
/// unique update event, and two scripts drawing from one pool could mint
/// the same dot for different contents, a state no real execution
/// produces.
pub(crate) fn pool_actor(pool: &str, raw: u8) -> Actor {
    Actor::new(format!("{pool}{}", raw % 4))
}

/// Builds an ORSWOT from a deterministic op walk over `seed`.
pub(crate) fn arbitrary_set(seed: u64) -> Orswot<u64> {
    let mut set = Orswot::new();
    let mut state = seed;
    for _ in 0..16 {
        state = splitmix(state);
        let element = state % 8;
        let stamp = Stamp::Actor(small_actor((state >> 8) as u8));
        if state & (1 << 16) != 0 || !set.contains(&element) {
            set.update(SetOp::Add(element), stamp).unwrap();
        } else {
            set.update(SetOp::Remove(element), stamp).unwrap();
        }
    }
    set
}

fn splitmix(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9e3779b97f4a7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}

/// The add/remove-pair reference model for observed-remove sets.
///
/// `added` holds every `(element, id)` pair ever added, `removed` the pairs
/// whose removal has been observed. Merging is plain set union on both, and
/// the value is every element with a pair in `added \ removed`. That is
/// trivially convergent, which is what makes it a useful oracle.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SetModel<V: Ord + Clone> {
    added: BTreeSet<(V, u64)>,
    removed: BTreeSet<(V, u64)>,
    next_id: u64,
}

impl<V: Ord + Clone> Default for SetModel<V> {
    fn default() -> Self {
        Self {
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
            next_id: 0,
        }
    }
}

impl<V: Ord + Clone> SetModel<V> {
    /// A model whose fresh ids cannot collide with other replicas' models.
    pub(crate) fn for_replica(replica: u64) -> Self {
        Self {
            next_id: replica << 32,
            ..Self::default()
        }
    }

    pub(crate) fn add(&mut self, element: V) {
        self.added.insert((element, self.next_id));
        self.next_id += 1;
    }

    /// Moves every currently-in pair for `element` to the removed side.
    pub(crate) fn remove(&mut self, element: V) {
        let pairs: Vec<_> = self
            .added
            .iter()
            .filter(|(e, id)| *e == element && !self.removed.contains(&(e.clone(), *id)))
            .cloned()
            .collect();
        self.removed.extend(pairs);
    }

    pub(crate) fn merge(&mut self, other: &Self) {
        self.added.extend(other.added.iter().cloned());
        self.removed.extend(other.removed.iter().cloned());
        self.next_id = self.next_id.max(other.next_id);
    }

    pub(crate) fn contains(&self, element: &V) -> bool {
        self.added
            .iter()
            .any(|pair| pair.0 == *element && !self.removed.contains(pair))
    }

    pub(crate) fn value(&self) -> BTreeSet<V> {
        self.added
            .iter()
            .filter(|pair| !self.removed.contains(*pair))
            .map(|(element, _)| element.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_add_remove_readd() {
        let mut model = SetModel::default();
        model.add("x");
        assert!(model.contains(&"x"));
        model.remove("x");
        assert!(!model.contains(&"x"));
        model.add("x");
        assert!(model.contains(&"x"));
        assert_eq!(model.value(), BTreeSet::from(["x"]));
    }

    #[test]
    fn model_merge_is_union() {
        let mut a = SetModel::for_replica(0);
        let mut b = SetModel::for_replica(1);
        a.add("x");
        b.add("x");
        a.remove("x"); // removes only a's pair
        a.merge(&b);
        assert!(a.contains(&"x"));
    }
}
