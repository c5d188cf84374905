//! Property tests for the pure layers: digests, paths, operation replay.

use proptest::prelude::*;
use serde_json::{Map, Value, json};

use statecast::core::{MutationRecorder, ValuePath, apply_batch, canon_digest};

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z0-9 ]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..6).prop_map(|m| {
                Value::Object(m.into_iter().collect())
            }),
        ]
    })
}

/// Rebuild the value with every object's keys inserted in reverse order.
fn reorder_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map.iter().rev() {
                out.insert(key.clone(), reorder_keys(child));
            }
            Value::Object(out)
        }
        Value::Array(values) => Value::Array(values.iter().map(reorder_keys).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Clone)]
enum Step {
    Set(String, i64),
    Remove(String),
    Push(i64),
    Assign(i64),
}

fn steps() -> impl Strategy<Value = Vec<Step>> {
    let step = prop_oneof![
        ("[a-d]", any::<i64>()).prop_map(|(k, v)| Step::Set(k, v)),
        "[a-d]".prop_map(Step::Remove),
        any::<i64>().prop_map(Step::Push),
        any::<i64>().prop_map(Step::Assign),
    ];
    prop::collection::vec(step, 1..16)
}

proptest! {
    #[test]
    fn digest_ignores_object_key_order(value in json_value()) {
        let reordered = reorder_keys(&value);
        prop_assert_eq!(canon_digest(&value), canon_digest(&reordered));
    }

    #[test]
    fn digest_is_deterministic(value in json_value()) {
        prop_assert_eq!(canon_digest(&value), canon_digest(&value.clone()));
    }

    #[test]
    fn path_segments_round_trip(segments in prop::collection::vec("[ -~]{1,12}", 0..5)) {
        let path = ValuePath::new(segments.clone());
        let encoded = path.to_string();
        let parsed = ValuePath::parse(&encoded).unwrap();
        prop_assert_eq!(parsed.segments(), segments.as_slice());
    }

    /// Applying a recorded batch to a peer at the prior revision yields
    /// the origin's value.
    #[test]
    fn recorded_batches_replay_identically(script in steps()) {
        let mut origin = Some(json!({"list": []}));
        let peer_start = origin.clone();
        let mut recorded = Vec::new();
        let mut recorder = MutationRecorder::new(&mut origin, &mut recorded);
        let root = ValuePath::root();
        let list = ValuePath::parse("/list").unwrap();

        for step in script {
            match step {
                Step::Set(key, v) => {
                    let _ = recorder.set(&root, &key, json!(v));
                }
                Step::Remove(key) => {
                    let _ = recorder.remove(&root, &key);
                }
                Step::Push(v) => {
                    let _ = recorder.push(&list, vec![json!(v)]);
                }
                Step::Assign(v) => {
                    let _ = recorder.assign(Some(json!({"list": [], "n": v})));
                }
            }
        }

        drop(recorder);
        let mut peer = peer_start;
        apply_batch(&mut peer, &recorded).unwrap();
        prop_assert_eq!(peer, origin);
    }
}
