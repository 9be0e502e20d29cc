// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! # Composable State-Based CRDTs
//!
//! This module defines the behavioural contract every CRDT in this crate
//! satisfies, and the closed dispatch layer that lets an [`OrMap`] nest any
//! of them as field values.
//!
//! ## The Contract
//!
//! The [`Crdt`] trait is the common surface: construct empty, read a
//! domain [`Crdt::Value`], apply an [`Crdt::Op`] under a [`Stamp`], merge
//! two states, expose a precondition context, and report statistics. Merge
//! is commutative, associative, and idempotent for every implementor, so
//! replicas that have seen the same updates converge regardless of delivery
//! order.
//!
//! ## Closed Dispatch
//!
//! A map field names its value's kind through a [`TypeTag`]. The set of
//! kinds is closed at build time: [`CrdtValue`] is a sum of the three
//! supported CRDTs and every merge/update site dispatches over it
//! explicitly. There is no open plugin registration, deliberately: a
//! closed sum keeps the merge total and the wire format self-describing.
//!
//! [`OrMap`]: map::OrMap

use crate::causal::{Actor, Dot};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, error::Error, fmt};

pub mod flag;
pub mod map;
pub mod orswot;

pub use flag::FlagOp;
pub use map::{MapError, MapOp};
pub use orswot::{SetError, SetOp};

use flag::OdFlag;
use map::OrMap;
use orswot::Orswot;

#[cfg(test)]
pub(crate) mod test_util;

/// The update witness: who (or which event) an update is attributed to.
///
/// Updates carry either an [`Actor`] (the CRDT allocates a fresh dot by
/// bumping that actor's counter) or a pre-stamped [`Dot`], which the CRDT
/// adopts verbatim. Pre-stamping is how [`map::OrMap`] makes every nested
/// update in a batch share a single causal event with the enclosing
/// operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stamp {
    /// Allocate a fresh dot for this actor.
    Actor(Actor),
    /// Adopt this pre-allocated dot.
    Dot(Dot),
}

impl From<Actor> for Stamp {
    fn from(actor: Actor) -> Self {
        Self::Actor(actor)
    }
}

impl From<Dot> for Stamp {
    fn from(dot: Dot) -> Self {
        Self::Dot(dot)
    }
}

/// The kind of a CRDT, as named by map fields and binary blobs.
///
/// The discriminants double as the one-byte type tags of
/// [`to_binary`](crate::binary::to_binary) blobs, so a map schema and the
/// wire format can never disagree about what a kind is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeTag {
    /// An observed-disable flag ([`flag::OdFlag`]).
    Flag = 73,
    /// An observed-remove set ([`orswot::Orswot`]).
    Set = 75,
    /// A nested map ([`map::OrMap`]).
    Map = 101,
}

impl TypeTag {
    /// The wire byte for this kind.
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// The kind for a wire byte, if it names one.
    pub fn from_byte(byte: u8) -> Option<TypeTag> {
        match byte {
            73 => Some(TypeTag::Flag),
            75 => Some(TypeTag::Set),
            101 => Some(TypeTag::Map),
            _ => None,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            TypeTag::Flag => "flag",
            TypeTag::Set => "set",
            TypeTag::Map => "map",
        }
    }
}

/// A map key: a field name qualified by the kind of value it holds.
///
/// Two fields with the same name but different tags are distinct fields.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub tag: TypeTag,
}

impl Field {
    /// A field holding an [`orswot::Orswot`] of [`Scalar`]s.
    pub fn set(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: TypeTag::Set,
        }
    }

    /// A field holding an [`flag::OdFlag`].
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: TypeTag::Flag,
        }
    }

    /// A field holding a nested [`map::OrMap`].
    pub fn map(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: TypeTag::Map,
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag.type_name())
    }
}

/// The member type for sets nested inside a map.
///
/// Top-level [`orswot::Orswot`]s are generic over their member type; a set
/// living inside an [`map::OrMap`] holds members of this closed enum so the
/// map's value model stays self-contained and serializable.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scalar {
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    Text(String),
    U64(u64),
    I64(i64),
    Bool(bool),
}

impl Scalar {
    /// When ordering Scalar instances of different kinds, we order them
    /// according to this order.
    const fn comparison_order(&self) -> usize {
        // Desired order: Bytes > Text > U64 > I64 > Bool
        match self {
            Scalar::Bytes(_) => 4,
            Scalar::Text(_) => 3,
            Scalar::U64(_) => 2,
            Scalar::I64(_) => 1,
            Scalar::Bool(_) => 0,
        }
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        use Scalar::*;
        // For order of cross-kind comparisons, see:
        // [`Scalar::comparison_order`]
        match (self, other) {
            (Bytes(b1), Bytes(b2)) => b1.cmp(b2),
            (Text(s1), Text(s2)) => s1.cmp(s2),
            (U64(u1), U64(u2)) => u1.cmp(u2),
            (I64(i1), I64(i2)) => i1.cmp(i2),
            (Bool(b1), Bool(b2)) => b1.cmp(b2),
            (a, b) => {
                let a_order = a.comparison_order();
                let b_order = b.comparison_order();
                debug_assert_ne!(
                    a_order, b_order,
                    "match must handle all comparisons between similar kinds"
                );
                a_order.cmp(&b_order)
            }
        }
    }
}

macro_rules! impl_scalar_from {
    ($($source:ty => $target:ident $(with $conv:ident)?,)*) => {
        $(
            impl From<$source> for Scalar {
                fn from(value: $source) -> Self {
                    Self::$target(impl_scalar_from!(@value value $(, $conv)?))
                }
            }
        )*
    };
    (@value $value:ident, $conv:ident) => { $value.$conv() };
    (@value $value:ident) => { $value };
}

impl_scalar_from!(
    Vec<u8>  => Bytes,
    &[u8]    => Bytes with into,
    String   => Text,
    &str     => Text with to_string,
    u64      => U64,
    u32      => U64 with into,
    i64      => I64,
    i32      => I64 with into,
    bool     => Bool,
);

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(inner) => write!(f, "{inner:02x?}"),
            Self::Text(inner) => inner.fmt(f),
            Self::U64(inner) => write!(f, "{inner}u"),
            Self::I64(inner) => write!(f, "{inner}"),
            Self::Bool(inner) => inner.fmt(f),
        }
    }
}

/// Names of the per-type statistics reported by [`Crdt::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatName {
    /// Number of actors appearing in the state's clock.
    ActorCount,
    /// Number of live elements (sets).
    ElementCount,
    /// Number of live fields (maps).
    FieldCount,
    /// Number of dots currently carried (flags).
    DotLength,
    /// Largest per-element dot set (sets) or per-field version count (maps).
    MaxDotLength,
}

/// The behavioural contract shared by every CRDT in this crate.
///
/// Implementors are plain values: `update` mutates the local state (and is
/// all-or-nothing for batched ops), `merge` is pure and never fails, and
/// equality is structural. The host serializes operations on a single
/// replica; nothing here locks or blocks.
pub trait Crdt: Clone + Default + PartialEq {
    /// The wire tag identifying this kind in binary blobs and map fields.
    const TAG: TypeTag;

    /// The observable domain value of a state.
    type Value;

    /// The update operations this kind accepts.
    type Op;

    /// The precondition error this kind's updates can report.
    type Error: Error;

    /// Constructs an empty state: fresh clock, no entries.
    fn new() -> Self {
        Self::default()
    }

    /// Returns the observable value of this state.
    fn value(&self) -> Self::Value;

    /// Applies an operation, attributed per `stamp`.
    ///
    /// On error the state is left exactly as it was, including for batched
    /// operations: the first failing sub-op abandons the whole batch.
    fn update(&mut self, op: Self::Op, stamp: Stamp) -> Result<(), Self::Error>;

    /// Returns the merge of two states.
    ///
    /// Commutative, associative, idempotent; never fails.
    fn merge(&self, other: &Self) -> Self;

    /// Returns a state fragment sufficient for a remote client to construct
    /// a valid remove operation against this replica.
    fn precondition_context(&self) -> Self;

    /// Reports this state's statistics as `(name, value)` pairs.
    fn stats(&self) -> Vec<(StatName, u64)>;

    /// Reports a single statistic, or `None` if this kind does not track it.
    fn stat(&self, name: StatName) -> Option<u64> {
        self.stats()
            .into_iter()
            .find_map(|(key, value)| (key == name).then_some(value))
    }
}

/// A CRDT stored as a map field's value.
///
/// The closed sum of every kind an [`map::OrMap`] can nest. Dispatch is
/// explicit at each merge/update site; the set of kinds is fixed at build
/// time.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub enum CrdtValue {
    Set(Orswot<Scalar>),
    Flag(OdFlag),
    Map(OrMap),
}

impl fmt::Debug for CrdtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set(set) => set.fmt(f),
            Self::Flag(flag) => flag.fmt(f),
            Self::Map(map) => map.fmt(f),
        }
    }
}

impl CrdtValue {
    /// The empty value of the given kind.
    pub fn empty(tag: TypeTag) -> CrdtValue {
        match tag {
            TypeTag::Set => CrdtValue::Set(Orswot::new()),
            TypeTag::Flag => CrdtValue::Flag(OdFlag::new()),
            TypeTag::Map => CrdtValue::Map(OrMap::new()),
        }
    }

    /// The kind of this value.
    pub fn tag(&self) -> TypeTag {
        match self {
            CrdtValue::Set(_) => TypeTag::Set,
            CrdtValue::Flag(_) => TypeTag::Flag,
            CrdtValue::Map(_) => TypeTag::Map,
        }
    }

    /// Returns the merge of two values of the same kind.
    pub fn merge(&self, other: &CrdtValue) -> CrdtValue {
        match (self, other) {
            (CrdtValue::Set(left), CrdtValue::Set(right)) => CrdtValue::Set(left.merge(right)),
            (CrdtValue::Flag(left), CrdtValue::Flag(right)) => CrdtValue::Flag(left.merge(right)),
            (CrdtValue::Map(left), CrdtValue::Map(right)) => CrdtValue::Map(left.merge(right)),
            // a field's tag fixes the kind of every version of its value
            _ => unreachable!("merged map entries of one field always share a kind"),
        }
    }

    /// The observable value of this CRDT.
    pub fn value(&self) -> Value {
        match self {
            CrdtValue::Set(set) => Value::Set(set.value()),
            CrdtValue::Flag(flag) => Value::Flag(flag.value()),
            CrdtValue::Map(map) => Value::Map(map.value()),
        }
    }

    /// True if this value is indistinguishable from a fresh one.
    pub fn is_empty(&self) -> bool {
        match self {
            CrdtValue::Set(set) => set.is_empty(),
            CrdtValue::Flag(flag) => !flag.value(),
            CrdtValue::Map(map) => map.is_empty(),
        }
    }

    // Only `OrMap::update` routes ops here, and it derives the field's tag
    // from the op's kind, so op and value always match.
    pub(crate) fn update(&mut self, op: CrdtOp, stamp: Stamp) -> Result<(), ValueError> {
        match (self, op) {
            (CrdtValue::Set(set), CrdtOp::Set(op)) => {
                set.update(op, stamp).map_err(ValueError::Set)
            }
            (CrdtValue::Flag(flag), CrdtOp::Flag(op)) => {
                flag.update(op, stamp).map_err(|e| match e {})
            }
            (CrdtValue::Map(map), CrdtOp::Map(ops)) => map
                .update(ops, stamp)
                .map_err(|e| ValueError::Map(Box::new(e))),
            _ => unreachable!("map update ops are routed by the kind they name"),
        }
    }
}

/// An operation on a CRDT nested inside a map.
///
/// The op's kind names the kind of the field it targets; see
/// [`MapOp::update`](map::MapOp::update).
#[derive(Debug, Clone, PartialEq)]
pub enum CrdtOp {
    Set(SetOp<Scalar>),
    Flag(FlagOp),
    Map(Vec<MapOp>),
}

impl CrdtOp {
    /// The kind of CRDT this op applies to.
    pub fn tag(&self) -> TypeTag {
        match self {
            CrdtOp::Set(_) => TypeTag::Set,
            CrdtOp::Flag(_) => TypeTag::Flag,
            CrdtOp::Map(_) => TypeTag::Map,
        }
    }
}

/// The observable value of a CRDT of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Set(std::collections::BTreeSet<Scalar>),
    Flag(bool),
    Map(Vec<(Field, Value)>),
}

/// A precondition error reported by a CRDT nested inside a map.
///
/// Propagated verbatim through [`MapError::Value`](map::MapError::Value);
/// flags never fail, so they have no variant here.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueError {
    Set(SetError<Scalar>),
    Map(Box<MapError>),
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::Set(err) => err.fmt(f),
            ValueError::Map(err) => err.fmt(f),
        }
    }
}

impl Error for ValueError {}
