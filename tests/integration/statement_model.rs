#![allow(missing_docs)]

use std::collections::BTreeSet;

use proptest::prelude::*;
use quadstore::storage::{StatementStore, StoreIo, StoreOptions};
use quadstore::{NodeId, PhaseResource, Quad};

#[derive(Debug, Clone)]
enum Op {
    Add([u64; 4]),
    Remove([u64; 4]),
    Find([u64; 4]),
    Commit,
    Rollback,
}

fn arb_quad() -> impl Strategy<Value = [u64; 4]> {
    [1u64..=6, 1u64..=4, 1u64..=6, 1u64..=3]
}

fn arb_pattern() -> impl Strategy<Value = [u64; 4]> {
    [0u64..=6, 0u64..=4, 0u64..=6, 0u64..=3]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => arb_quad().prop_map(Op::Add),
        3 => arb_quad().prop_map(Op::Remove),
        2 => arb_pattern().prop_map(Op::Find),
        1 => Just(Op::Commit),
        1 => Just(Op::Rollback),
    ]
}

fn matches(pattern: &[u64; 4], quad: &[u64; 4]) -> bool {
    pattern.iter().zip(quad).all(|(p, q)| *p == 0 || p == q)
}

fn open(io: &StoreIo) -> StatementStore {
    let options = StoreOptions::new().block_size(256).sync(false);
    let mut store = StatementStore::with_io("model", io.clone(), options).unwrap();
    store.select_latest().unwrap();
    store
}

fn contents(store: &mut StatementStore) -> BTreeSet<[u64; 4]> {
    store
        .find_tuples(0, 0, 0, 0)
        .unwrap()
        .quads()
        .map(|q| q.unwrap().to_array().map(|n| n.0))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn store_behaves_like_a_set(ops in prop::collection::vec(arb_op(), 1..200)) {
        let io = StoreIo::memory();
        let mut store = open(&io);
        let mut working: BTreeSet<[u64; 4]> = BTreeSet::new();
        let mut committed: BTreeSet<[u64; 4]> = BTreeSet::new();

        for op in ops {
            match op {
                Op::Add(q) => {
                    let changed = store.add_triple(q[0], q[1], q[2], q[3]).unwrap();
                    prop_assert_eq!(changed, working.insert(q));
                }
                Op::Remove(q) => {
                    let changed = store.remove_triples(q[0], q[1], q[2], q[3]).unwrap();
                    prop_assert_eq!(changed, working.remove(&q));
                }
                Op::Find(p) => {
                    let found: Vec<Quad> = store
                        .find_tuples(p[0], p[1], p[2], p[3])
                        .unwrap()
                        .quads()
                        .collect::<Result<_, _>>()
                        .unwrap();
                    let expected: Vec<[u64; 4]> =
                        working.iter().filter(|q| matches(&p, q)).copied().collect();
                    let mut got: Vec<[u64; 4]> =
                        found.iter().map(|q| q.to_array().map(|n| n.0)).collect();
                    got.sort_unstable();
                    prop_assert_eq!(got, expected.clone());
                    let exists = store.exists_triples(p[0], p[1], p[2], p[3]).unwrap();
                    prop_assert_eq!(exists, !expected.is_empty());
                }
                Op::Commit => {
                    store.prepare().unwrap();
                    store.commit().unwrap();
                    committed = working.clone();
                }
                Op::Rollback => {
                    store.rollback().unwrap();
                    working = committed.clone();
                }
            }
            prop_assert_eq!(store.nr_triples(), working.len() as u64);
            prop_assert_eq!(store.is_empty(), working.is_empty());
        }

        prop_assert_eq!(contents(&mut store), working);
        drop(store);
        let mut reopened = open(&io);
        prop_assert_eq!(contents(&mut reopened), committed);
    }

    #[test]
    fn wildcard_scan_visits_each_quad_once(quads in prop::collection::btree_set(arb_quad(), 0..120)) {
        let io = StoreIo::memory();
        let mut store = open(&io);
        for q in &quads {
            store.add_triple(q[0], q[1], q[2], q[3]).unwrap();
        }
        let mut cursor = store.find_tuples(NodeId::NONE, NodeId::NONE, NodeId::NONE, NodeId::NONE).unwrap();
        let mut seen = BTreeSet::new();
        while let Some(q) = cursor.next_quad().unwrap() {
            prop_assert!(seen.insert(q.to_array().map(|n| n.0)), "quad {:?} returned twice", q);
        }
        prop_assert_eq!(seen, quads);
    }
}
