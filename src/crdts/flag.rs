// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{Crdt, Stamp, StatName, TypeTag};
use crate::causal::{DotSet, VersionVector};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, fmt};

/// An **observed-disable flag**: a boolean that can be enabled and disabled
/// repeatedly, with enable-wins semantics when the two race.
///
/// Structurally this is a degenerate [`Orswot`](super::orswot::Orswot) with
/// a single implicit element whose dot set is the flag's enable history. The
/// flag reads `true` while that history is nonempty.
///
/// Enabling allocates (or adopts) a dot. Disabling clears the dot set
/// *without* touching the clock or allocating a dot: a disable is purely
/// local evidence that this actor has seen the current enables, and
/// convergence comes from the peer's clock subsuming those dots on the next
/// merge. That asymmetry is what makes enables win: a concurrent enable's
/// dot is unknown to the disabler's clock and survives.
///
/// ```rust
/// # use convergent::{Crdt, OdFlag, FlagOp, causal::Actor};
/// let mut a = OdFlag::new();
/// a.update(FlagOp::Enable, Actor::from("a").into()).unwrap();
/// let mut b = a.clone();
///
/// a.update(FlagOp::Disable, Actor::from("a").into()).unwrap();
/// b.update(FlagOp::Enable, Actor::from("b").into()).unwrap();
///
/// // b's concurrent enable wins over a's disable
/// assert!(a.merge(&b).value());
/// ```
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdFlag {
    clock: VersionVector,
    enabled: DotSet,
}

impl fmt::Debug for OdFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.value(), self.enabled)
    }
}

/// An operation on an [`OdFlag`]. Neither can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    Enable,
    Disable,
}

impl OdFlag {
    /// The clock summarising every update this replica has observed.
    pub fn clock(&self) -> &VersionVector {
        &self.clock
    }
}

impl Crdt for OdFlag {
    const TAG: TypeTag = TypeTag::Flag;

    type Value = bool;
    type Op = FlagOp;
    type Error = Infallible;

    fn value(&self) -> bool {
        !self.enabled.is_empty()
    }

    fn update(&mut self, op: FlagOp, stamp: Stamp) -> Result<(), Infallible> {
        match op {
            FlagOp::Enable => {
                let dot = match stamp {
                    Stamp::Actor(actor) => self.clock.increment(actor),
                    Stamp::Dot(dot) => {
                        self.clock.observe(&dot);
                        dot
                    }
                };
                self.enabled.insert(dot);
            }
            FlagOp::Disable => {
                // no clock bump, no dot: the cleared dots stay dominated by
                // our clock, which is all a later merge needs
                self.enabled = DotSet::new();
            }
        }
        Ok(())
    }

    fn merge(&self, other: &Self) -> Self {
        let clock = self.clock.merge(&other.clock);
        let common = self.enabled.intersection(&other.enabled);
        let left_keep = self.enabled.difference(&common).subtract(&other.clock);
        let right_keep = other.enabled.difference(&common).subtract(&self.clock);
        OdFlag {
            clock,
            enabled: common.union(&left_keep).union(&right_keep),
        }
    }

    fn precondition_context(&self) -> Self {
        self.clone()
    }

    fn stats(&self) -> Vec<(StatName, u64)> {
        vec![
            (StatName::ActorCount, self.clock.actor_count() as u64),
            (StatName::DotLength, self.enabled.len() as u64),
        ]
    }
}
