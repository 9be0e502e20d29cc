// (c) Copyright 2025 Helsing GmbH. All rights reserved.
use super::{Crdt, CrdtOp, CrdtValue, Field, Stamp, StatName, TypeTag, Value, ValueError};
use crate::causal::{Dot, VersionVector};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, error::Error, fmt};

/// An **observed-remove map** whose schema is a set of `(name, kind)`
/// [`Field`]s and whose values are nested CRDTs sharing the map's causal
/// context.
///
/// ## Entries Are Dot-Stamped Versions
///
/// The map does not hold one value per field; it holds one value per
/// `(field, dot)` pair, where the dot is the single causal event under which
/// that value replaced all prior values for the field. A field edited
/// concurrently on two replicas therefore has two *versions* after a merge,
/// each independently subject to the drop-if-dominated rule. The field's
/// observable value is the inner CRDT-merge of all surviving versions, which
/// is what preserves nested updates across concurrent map operations.
///
/// ## Batched Updates
///
/// All mutation happens through [`OrMap::update`] with a list of [`MapOp`]s.
/// The batch allocates (or adopts) **one** dot and shares it across every
/// sub-op, so nested updates carry the same causality as the enclosing
/// operation. Batches are all-or-nothing.
///
/// ```rust
/// # use convergent::{Crdt, OrMap, MapOp, CrdtOp, SetOp, Field, Value, causal::Actor};
/// # use std::collections::BTreeSet;
/// let mut map = OrMap::new();
/// map.update(
///     vec![MapOp::update("tags", CrdtOp::Set(SetOp::Add("blue".into())))],
///     Actor::from("a").into(),
/// )
/// .unwrap();
///
/// let value = map.value();
/// assert_eq!(value[0].0, Field::set("tags"));
/// assert_eq!(value[0].1, Value::Set(BTreeSet::from(["blue".into()])));
/// ```
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrMap {
    clock: VersionVector,
    entries: BTreeMap<Field, BTreeMap<Dot, CrdtValue>>,
}

impl fmt::Debug for OrMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

/// A sub-operation of an [`OrMap::update`] batch.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOp {
    /// Stamps a fresh, empty value for the field under the batch dot,
    /// replacing any prior versions.
    ///
    /// An `Add` does not read existing entries, and it is **not**
    /// "add-if-absent": adding a field that already has content resets that
    /// content to the empty value of its kind. Use [`MapOp::update`] when
    /// the existing value should be preserved.
    Add(Field),
    /// Drops **all** versions of the field. Fails with
    /// [`MapError::FieldNotPresent`] if the field has none.
    Remove(Field),
    /// Applies an inner operation to the field named by `0`, whose kind is
    /// the op's kind.
    ///
    /// All existing versions of the field are merged into one working value
    /// (an empty one if the field is absent), the inner CRDT's update runs
    /// under the batch's shared dot, and the result replaces every prior
    /// version as a single new entry. The inner CRDT's precondition error,
    /// if any, aborts the whole batch.
    Update(String, CrdtOp),
}

impl MapOp {
    /// Convenience constructor for [`MapOp::Update`].
    ///
    /// The targeted field is `(name, op.tag())`: an op's kind names the
    /// field's kind, so an update can never reach a value of the wrong type.
    pub fn update(name: impl Into<String>, op: CrdtOp) -> Self {
        Self::Update(name.into(), op)
    }
}

/// A precondition error reported by [`OrMap`] updates.
#[derive(Debug, Clone, PartialEq)]
pub enum MapError {
    /// The operation requires a field that is not in the current value.
    FieldNotPresent(Field),
    /// A nested CRDT reported a precondition error, propagated verbatim.
    Value(ValueError),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::FieldNotPresent(field) => {
                write!(f, "field {field:?} is not in the map")
            }
            MapError::Value(err) => err.fmt(f),
        }
    }
}

impl Error for MapError {}

impl OrMap {
    /// Number of fields with at least one live version.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True iff the map has no live field.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True iff the field has at least one live version.
    pub fn contains(&self, field: &Field) -> bool {
        self.entries.contains_key(field)
    }

    /// Returns the field's observable CRDT, merged across its live versions.
    pub fn get(&self, field: &Field) -> Option<CrdtValue> {
        self.entries
            .get(field)
            .map(|versions| Self::fold_versions(field.tag, versions))
    }

    /// The clock summarising every update this replica has observed.
    pub fn clock(&self) -> &VersionVector {
        &self.clock
    }

    fn fold_versions(tag: TypeTag, versions: &BTreeMap<Dot, CrdtValue>) -> CrdtValue {
        versions
            .values()
            .fold(CrdtValue::empty(tag), |acc, version| acc.merge(version))
    }

    fn apply(&mut self, op: MapOp, dot: &Dot) -> Result<(), MapError> {
        match op {
            MapOp::Add(field) => {
                let empty = CrdtValue::empty(field.tag);
                let versions = self.entries.entry(field).or_default();
                versions.clear();
                versions.insert(dot.clone(), empty);
                Ok(())
            }
            MapOp::Remove(field) => match self.entries.remove(&field) {
                Some(_) => Ok(()),
                None => Err(MapError::FieldNotPresent(field)),
            },
            MapOp::Update(name, op) => {
                let field = Field {
                    name,
                    tag: op.tag(),
                };
                let mut working = match self.entries.get(&field) {
                    Some(versions) => Self::fold_versions(field.tag, versions),
                    None => CrdtValue::empty(field.tag),
                };
                working
                    .update(op, Stamp::Dot(dot.clone()))
                    .map_err(MapError::Value)?;
                let versions = self.entries.entry(field).or_default();
                versions.clear();
                versions.insert(dot.clone(), working);
                Ok(())
            }
        }
    }
}

impl Crdt for OrMap {
    const TAG: TypeTag = TypeTag::Map;

    type Value = Vec<(Field, Value)>;
    type Op = Vec<MapOp>;
    type Error = MapError;

    fn value(&self) -> Vec<(Field, Value)> {
        self.entries
            .iter()
            .map(|(field, versions)| {
                (
                    field.clone(),
                    Self::fold_versions(field.tag, versions).value(),
                )
            })
            .collect()
    }

    /// Applies a batch of sub-ops under a single shared dot.
    ///
    /// The batch dot is computed first (an increment of the actor's clock
    /// entry, or the pre-stamped dot merged in), so even a pure-remove batch
    /// advances the clock. On any error the map is left exactly as it was.
    fn update(&mut self, ops: Vec<MapOp>, stamp: Stamp) -> Result<(), MapError> {
        let mut next = self.clone();
        let dot = match stamp {
            Stamp::Actor(actor) => next.clock.increment(actor),
            Stamp::Dot(dot) => {
                next.clock.observe(&dot);
                dot
            }
        };
        for op in ops {
            next.apply(op, &dot)?;
        }
        *self = next;
        Ok(())
    }

    /// The observed-remove merge over dot-stamped versions.
    ///
    /// An entry survives iff the peer holds the exact same `(field, dot)`
    /// version, or the peer's clock has not seen its birth dot. A version
    /// the peer has seen but no longer holds was removed (or replaced)
    /// there, and is shed here.
    fn merge(&self, other: &Self) -> Self {
        let clock = self.clock.merge(&other.clock);
        let mut entries: BTreeMap<Field, BTreeMap<Dot, CrdtValue>> = BTreeMap::new();

        for (field, versions) in &self.entries {
            let peer = other.entries.get(field);
            for (dot, value) in versions {
                let keep = match peer.and_then(|versions| versions.get(dot)) {
                    Some(_) => true, // same birth dot: the same version on both sides
                    None => !other.clock.dominates(dot),
                };
                if keep {
                    entries
                        .entry(field.clone())
                        .or_default()
                        .insert(dot.clone(), value.clone());
                }
            }
        }

        for (field, versions) in &other.entries {
            let ours = self.entries.get(field);
            for (dot, value) in versions {
                if ours.is_some_and(|versions| versions.contains_key(dot)) {
                    continue; // already kept above
                }
                if !self.clock.dominates(dot) {
                    entries
                        .entry(field.clone())
                        .or_default()
                        .insert(dot.clone(), value.clone());
                }
            }
        }

        OrMap { clock, entries }
    }

    fn precondition_context(&self) -> Self {
        self.clone()
    }

    /// A fresh map reports no statistics at all; the pairs appear only once
    /// the map has observed an update.
    fn stats(&self) -> Vec<(StatName, u64)> {
        if self.clock.is_empty() && self.entries.is_empty() {
            return Vec::new();
        }
        vec![
            (StatName::ActorCount, self.clock.actor_count() as u64),
            (StatName::FieldCount, self.entries.len() as u64),
            (
                StatName::MaxDotLength,
                self.entries
                    .values()
                    .map(|versions| versions.len() as u64)
                    .max()
                    .unwrap_or(0),
            ),
        ]
    }
}
