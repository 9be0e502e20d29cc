// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! Randomized multi-replica convergence runs over the public API.
//!
//! Each script drives a small fleet of replicas through local updates and
//! peer merges, then checks that (a) every merge order yields the same
//! state and (b) the ORSWOT agrees with the add/remove-pair reference
//! model, which is convergent by construction.

use convergent::{
    Crdt, CrdtOp, Field, FlagOp, MapOp, OdFlag, OrMap, Orswot, Scalar, SetOp, Stamp,
    causal::Actor,
};
use quickcheck_macros::quickcheck;
use std::collections::BTreeSet;

const REPLICAS: usize = 3;

fn replica_actor(replica: usize) -> Stamp {
    Stamp::Actor(Actor::from(["r0", "r1", "r2"][replica]))
}

/// The reference model: a grow-only set of `(element, unique id)` add
/// events and the subset of them whose removal has been observed. Merge is
/// set union on both sides, so convergence is trivial; the value is every
/// element with an add pair that is not in the removed side.
#[derive(Debug, Clone, Default, PartialEq)]
struct Model {
    added: BTreeSet<(u64, (usize, u32))>,
    removed: BTreeSet<(u64, (usize, u32))>,
}

impl Model {
    fn add(&mut self, element: u64, id: (usize, u32)) {
        self.added.insert((element, id));
    }

    fn remove(&mut self, element: u64) {
        let live: Vec<_> = self
            .added
            .iter()
            .filter(|pair| pair.0 == element && !self.removed.contains(*pair))
            .cloned()
            .collect();
        self.removed.extend(live);
    }

    fn contains(&self, element: u64) -> bool {
        self.added
            .iter()
            .any(|pair| pair.0 == element && !self.removed.contains(pair))
    }

    fn merge(&mut self, other: &Model) {
        self.added.extend(other.added.iter().cloned());
        self.removed.extend(other.removed.iter().cloned());
    }

    fn value(&self) -> BTreeSet<u64> {
        self.added
            .iter()
            .filter(|pair| !self.removed.contains(*pair))
            .map(|pair| pair.0)
            .collect()
    }
}

#[quickcheck]
fn orswot_matches_the_reference_model(script: Vec<(u8, u8, u8)>) {
    let mut sets: Vec<Orswot<u64>> = vec![Orswot::new(); REPLICAS];
    let mut models: Vec<Model> = vec![Model::default(); REPLICAS];
    let mut next_seq = [0u32; REPLICAS];

    for &(raw_replica, raw_element, action) in &script {
        let replica = raw_replica as usize % REPLICAS;
        let element = u64::from(raw_element % 8);
        match action % 3 {
            0 => {
                sets[replica]
                    .update(SetOp::Add(element), replica_actor(replica))
                    .unwrap();
                let id = (replica, next_seq[replica]);
                next_seq[replica] += 1;
                models[replica].add(element, id);
            }
            1 => {
                // a replica can only remove what it currently observes
                if models[replica].contains(element) {
                    assert!(sets[replica].contains(&element));
                    sets[replica]
                        .update(SetOp::Remove(element), replica_actor(replica))
                        .unwrap();
                    models[replica].remove(element);
                }
            }
            _ => {
                let peer = (replica + 1) % REPLICAS;
                let merged = sets[replica].merge(&sets[peer]);
                sets[replica] = merged;
                let peer_model = models[peer].clone();
                models[replica].merge(&peer_model);
            }
        }
        assert_eq!(sets[replica].value(), models[replica].value());
    }

    // full anti-entropy: every merge order lands on the same state
    let forward = sets
        .iter()
        .fold(Orswot::new(), |acc, set| acc.merge(set));
    let backward = sets
        .iter()
        .rev()
        .fold(Orswot::new(), |acc, set| acc.merge(set));
    assert_eq!(forward, backward);

    let mut full_model = Model::default();
    for model in &models {
        full_model.merge(model);
    }
    assert_eq!(forward.value(), full_model.value());
}

#[quickcheck]
fn flags_converge_in_any_merge_order(script: Vec<(u8, u8)>) {
    let mut flags: Vec<OdFlag> = vec![OdFlag::new(); REPLICAS];

    for &(raw_replica, action) in &script {
        let replica = raw_replica as usize % REPLICAS;
        match action % 3 {
            0 => flags[replica]
                .update(FlagOp::Enable, replica_actor(replica))
                .unwrap(),
            1 => flags[replica]
                .update(FlagOp::Disable, replica_actor(replica))
                .unwrap(),
            _ => {
                let peer = (replica + 1) % REPLICAS;
                let merged = flags[replica].merge(&flags[peer]);
                flags[replica] = merged;
            }
        }
    }

    let forward = flags.iter().fold(OdFlag::new(), |acc, flag| acc.merge(flag));
    let backward = flags
        .iter()
        .rev()
        .fold(OdFlag::new(), |acc, flag| acc.merge(flag));
    assert_eq!(forward, backward);
    for flag in &flags {
        assert_eq!(forward.merge(flag), forward);
    }
}

#[quickcheck]
fn maps_converge_in_any_merge_order(script: Vec<(u8, u8, u8)>) {
    let names = ["X", "Y", "Z"];
    let mut maps: Vec<OrMap> = vec![OrMap::new(); REPLICAS];

    for &(raw_replica, raw_field, action) in &script {
        let replica = raw_replica as usize % REPLICAS;
        let name = names[raw_field as usize % names.len()];
        match action % 4 {
            0 => maps[replica]
                .update(
                    vec![MapOp::update(
                        name,
                        CrdtOp::Set(SetOp::Add(Scalar::from(u64::from(raw_field)))),
                    )],
                    replica_actor(replica),
                )
                .unwrap(),
            1 => maps[replica]
                .update(
                    vec![MapOp::update(name, CrdtOp::Flag(FlagOp::Enable))],
                    replica_actor(replica),
                )
                .unwrap(),
            2 => {
                let field = Field::set(name);
                if maps[replica].contains(&field) {
                    maps[replica]
                        .update(vec![MapOp::Remove(field)], replica_actor(replica))
                        .unwrap();
                }
            }
            _ => {
                let peer = (replica + 1) % REPLICAS;
                let merged = maps[replica].merge(&maps[peer]);
                maps[replica] = merged;
            }
        }
    }

    let forward = maps.iter().fold(OrMap::new(), |acc, map| acc.merge(map));
    let backward = maps
        .iter()
        .rev()
        .fold(OrMap::new(), |acc, map| acc.merge(map));
    assert_eq!(forward, backward);
    // idempotent absorption: re-merging any replica changes nothing
    for map in &maps {
        assert_eq!(forward.merge(map), forward);
    }
}
