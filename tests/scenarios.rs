//! End-to-end scenarios over a real daemon and sockets.

mod fixtures;

use std::time::Duration;

use serde_json::json;
use statecast::api::events;
use statecast::{ClientError, ValuePath};

use fixtures::raw::RawClient;
use fixtures::{DaemonFixture, name, ns, opts_with_default, wait_until};

#[test]
fn nested_add_replicates_with_the_expected_operation() {
    let fixture = DaemonFixture::start();
    let a = fixture.client();
    let b = fixture.client();

    let rep_a = a
        .replicant(ns("x"), name("r"), opts_with_default(json!({"a": {"b": 1}})))
        .unwrap();
    let rep_b = b
        .replicant(ns("x"), name("r"), opts_with_default(json!({"a": {"b": 1}})))
        .unwrap();
    let changes_b = rep_b.subscribe();
    let snapshot = changes_b.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(snapshot.value, Some(json!({"a": {"b": 1}})));

    rep_a
        .set(&ValuePath::parse("/a").unwrap(), "c", json!(2))
        .unwrap();

    let change = changes_b.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(change.revision, 1);
    assert_eq!(change.operations.len(), 1);
    let wire = serde_json::to_value(&change.operations[0]).unwrap();
    assert_eq!(
        wire,
        json!({
            "path": "/a",
            "method": "add",
            "args": {"prop": "c", "newValue": 2}
        })
    );
    assert_eq!(change.value, Some(json!({"a": {"b": 1, "c": 2}})));

    let server_value = a.read(ns("x"), name("r")).unwrap();
    assert_eq!(server_value, json!({"a": {"b": 1, "c": 2}}));
}

#[test]
fn array_splice_replicates_with_the_expected_operation() {
    let fixture = DaemonFixture::start();
    let a = fixture.client();
    let b = fixture.client();

    let rep_a = a
        .replicant(ns("x"), name("list"), opts_with_default(json!([10, 20, 30])))
        .unwrap();
    let rep_b = b
        .replicant(ns("x"), name("list"), opts_with_default(json!([10, 20, 30])))
        .unwrap();
    let changes_b = rep_b.subscribe();
    let _ = changes_b.recv_timeout(Duration::from_secs(2)).unwrap();

    rep_a
        .splice(&ValuePath::root(), 1, 1, vec![json!(40), json!(50)])
        .unwrap();

    let change = changes_b.recv_timeout(Duration::from_secs(2)).unwrap();
    let wire = serde_json::to_value(&change.operations[0]).unwrap();
    assert_eq!(
        wire,
        json!({
            "path": "/",
            "method": "array:splice",
            "args": {"start": 1, "deleteCount": 1, "items": [40, 50]}
        })
    );
    assert_eq!(change.value, Some(json!([10, 40, 50, 30])));
    assert_eq!(rep_a.value(), Some(json!([10, 40, 50, 30])));
}

#[test]
fn schema_rejection_keeps_prior_value_and_revision() {
    let fixture = DaemonFixture::start();
    fixture.write_schema("x", "n", &json!({"type": "number"}));

    let a = fixture.client();
    let b = fixture.client();
    let rep_a = a
        .replicant(ns("x"), name("n"), opts_with_default(json!(5)))
        .unwrap();
    let rep_b = b
        .replicant(ns("x"), name("n"), opts_with_default(json!(5)))
        .unwrap();
    let changes_b = rep_b.subscribe();
    let _ = changes_b.recv_timeout(Duration::from_secs(2)).unwrap();

    let err = rep_a.assign(Some(json!("hello"))).unwrap_err();
    assert!(matches!(err, ClientError::ValueInvalid { .. }));

    // No state change, no broadcast, no revision bump.
    assert_eq!(rep_a.value(), Some(json!(5)));
    assert_eq!(rep_a.revision(), 0);
    assert!(changes_b.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(a.read(ns("x"), name("n")).unwrap(), json!(5));
}

#[test]
fn stale_proposal_is_rejected_with_the_authoritative_snapshot() {
    let fixture = DaemonFixture::start();

    // Client B speaks the raw protocol so it can hold a stale revision.
    let mut b = RawClient::connect(fixture.socket());
    let declared = b.rpc(
        events::DECLARE,
        json!({"name": "r", "namespace": "x", "opts": {"defaultValue": {}}}),
    );
    assert_eq!(declared["revision"], json!(0));

    let a = fixture.client();
    let rep_a = a
        .replicant(ns("x"), name("r"), opts_with_default(json!({})))
        .unwrap();
    rep_a.set(&ValuePath::root(), "from_a", json!(1)).unwrap();
    assert_eq!(rep_a.revision(), 1);

    let reply = b.rpc(
        events::PROPOSE_OPERATIONS,
        json!({
            "name": "r",
            "namespace": "x",
            "operations": [
                {"path": "/", "method": "add", "args": {"prop": "from_b", "newValue": 2}}
            ],
            "revision": 0
        }),
    );
    assert_eq!(reply["rejectReason"], json!("revision-mismatch"));
    assert_eq!(reply["revision"], json!(1));
    assert_eq!(reply["value"], json!({"from_a": 1}));

    // The rejected proposal mutated nothing.
    assert_eq!(a.read(ns("x"), name("r")).unwrap(), json!({"from_a": 1}));
}

#[test]
fn schema_upgrade_discards_persisted_value_for_defaults() {
    let mut fixture = DaemonFixture::start();

    {
        let client = fixture.client();
        let rep = client
            .replicant(ns("b"), name("r"), opts_with_default(json!({"x": 1})))
            .unwrap();
        rep.assign(Some(json!({"x": 1}))).ok();
    }

    fixture.stop_daemon();
    fixture.write_schema(
        "b",
        "r",
        &json!({
            "type": "object",
            "required": ["x", "y"],
            "properties": {
                "x": {"type": "number"},
                "y": {"type": "string"}
            },
            "additionalProperties": false
        }),
    );
    fixture.start_daemon();

    let client = fixture.client();
    let rep = client
        .replicant(ns("b"), name("r"), statecast::ReplicantOpts::default())
        .unwrap();
    assert_eq!(rep.revision(), 0);
    assert_eq!(rep.value(), Some(json!({"x": 0, "y": ""})));
}

#[test]
fn coalescence_one_broadcast_per_task() {
    let fixture = DaemonFixture::start();
    let a = fixture.client();
    let b = fixture.client();

    let rep_a = a
        .replicant(ns("x"), name("r"), opts_with_default(json!({})))
        .unwrap();
    let rep_b = b
        .replicant(ns("x"), name("r"), opts_with_default(json!({})))
        .unwrap();
    let changes_b = rep_b.subscribe();
    let _ = changes_b.recv_timeout(Duration::from_secs(2)).unwrap();

    rep_a
        .transaction(|m| {
            let root = ValuePath::root();
            m.set(&root, "a", json!(1))?;
            m.set(&root, "b", json!(2))?;
            m.remove(&root, "a")?;
            m.set(&root, "c", json!(3))
        })
        .unwrap();

    let change = changes_b.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(change.revision, 1);
    let methods: Vec<&str> = change.operations.iter().map(|op| op.method()).collect();
    assert_eq!(methods, ["add", "add", "delete", "add"]);
    assert_eq!(change.value, Some(json!({"b": 2, "c": 3})));

    // Exactly one change: nothing else arrives.
    assert!(changes_b.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(rep_b.value(), Some(json!({"b": 2, "c": 3})));

    // The proposer converged too.
    assert!(wait_until(Duration::from_secs(1), || {
        rep_a.value() == Some(json!({"b": 2, "c": 3}))
    }));
}
