//! Protocol-level and multi-writer behavior.

mod fixtures;

use std::time::Duration;

use serde_json::json;
use statecast::api::events;
use statecast::ValuePath;

use fixtures::raw::RawClient;
use fixtures::{DaemonFixture, name, ns, opts_with_default, wait_until};

#[test]
fn revisions_step_by_one_per_flush() {
    let fixture = DaemonFixture::start();
    let client = fixture.client();
    let rep = client
        .replicant(ns("x"), name("r"), opts_with_default(json!({})))
        .unwrap();
    let changes = rep.subscribe();
    let _ = changes.recv_timeout(Duration::from_secs(2)).unwrap();

    for i in 0..5u64 {
        rep.set(&ValuePath::root(), "n", json!(i)).unwrap();
    }

    let mut revisions = Vec::new();
    while revisions.len() < 5 {
        let change = changes.recv_timeout(Duration::from_secs(2)).unwrap();
        revisions.push(change.revision);
    }
    // The handle saw its own optimistic changes; the server acks carry
    // the authoritative sequence.
    assert_eq!(rep.revision(), 5);
    assert!(revisions.windows(2).all(|w| w[1] >= w[0]));
}

#[test]
fn unknown_operation_rejects_the_whole_batch() {
    let fixture = DaemonFixture::start();
    let mut raw = RawClient::connect(fixture.socket());
    raw.rpc(
        events::DECLARE,
        json!({"name": "r", "namespace": "x", "opts": {"defaultValue": {"a": 1}}}),
    );

    let reply = raw.rpc(
        events::PROPOSE_OPERATIONS,
        json!({
            "name": "r",
            "namespace": "x",
            "operations": [
                {"path": "/", "method": "update", "args": {"prop": "a", "newValue": 2}},
                {"path": "/", "method": "array:flatten", "args": {}}
            ],
            "revision": 0
        }),
    );
    assert_eq!(reply["rejectReason"], json!("unknown-operation"));

    // Nothing applied, not even the valid first operation.
    let value = raw.rpc(events::READ, json!({"name": "r", "namespace": "x"}));
    assert_eq!(value, json!({"a": 1}));
}

#[test]
fn proposing_for_an_undeclared_replicant_disconnects_the_socket() {
    let fixture = DaemonFixture::start();
    let mut raw = RawClient::connect(fixture.socket());

    raw.send_frame(json!({
        "event": events::PROPOSE_OPERATIONS,
        "msgid": 1,
        "payload": {"name": "ghost", "namespace": "x", "operations": [], "revision": 0}
    }));

    assert!(raw.wait_for_disconnect());

    // The daemon itself is unaffected.
    let client = fixture.client();
    assert!(client.ping().is_ok());
}

#[test]
fn broadcasts_do_not_echo_to_the_proposer() {
    let fixture = DaemonFixture::start();
    let mut raw = RawClient::connect(fixture.socket());
    raw.rpc(
        events::DECLARE,
        json!({"name": "r", "namespace": "x", "opts": {"defaultValue": {}}}),
    );

    let reply = raw.rpc(
        events::PROPOSE_OPERATIONS,
        json!({
            "name": "r",
            "namespace": "x",
            "operations": [
                {"path": "/", "method": "add", "args": {"prop": "mine", "newValue": 1}}
            ],
            "revision": 0
        }),
    );
    assert!(reply.get("rejectReason").is_none());
    assert_eq!(reply["revision"], json!(1));

    // A ping ack arrives without any operations broadcast in front of it.
    raw.rpc(events::PING, serde_json::Value::Null);
    assert!(raw.broadcasts.is_empty());
}

#[test]
fn concurrent_writers_converge_on_the_server_order() {
    let fixture = DaemonFixture::start();
    let a = fixture.client();
    let b = fixture.client();

    let rep_a = a
        .replicant(ns("x"), name("board"), opts_with_default(json!({})))
        .unwrap();
    let rep_b = b
        .replicant(ns("x"), name("board"), opts_with_default(json!({})))
        .unwrap();

    // Interleaved writes; some proposals lose the revision race and
    // revert to the authoritative snapshot.
    for i in 0..10 {
        let _ = rep_a.set(&ValuePath::root(), &format!("a{i}"), json!(i));
        let _ = rep_b.set(&ValuePath::root(), &format!("b{i}"), json!(i));
    }

    assert!(wait_until(Duration::from_secs(5), || {
        let server = a.read(ns("x"), name("board")).unwrap_or(json!(null));
        rep_a.value() == Some(server.clone()) && rep_b.value() == Some(server)
    }));
}

#[test]
fn read_of_an_undeclared_replicant_returns_null() {
    let fixture = DaemonFixture::start();
    let client = fixture.client();
    assert_eq!(client.read(ns("x"), name("nothing")).unwrap(), json!(null));
}

#[test]
fn late_change_handlers_receive_the_current_value() {
    let fixture = DaemonFixture::start();
    let client = fixture.client();
    let rep = client
        .replicant(ns("x"), name("r"), opts_with_default(json!({"v": 1})))
        .unwrap();
    rep.set(&ValuePath::root(), "v2", json!(2)).unwrap();

    let sub = rep.subscribe();
    let event = sub.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(event.value, rep.value());
    assert!(event.operations.is_empty());
}

#[test]
fn declaring_twice_shares_one_mirror() {
    let fixture = DaemonFixture::start();
    let client = fixture.client();
    let first = client
        .replicant(ns("x"), name("r"), opts_with_default(json!({"v": 1})))
        .unwrap();
    first.set(&ValuePath::root(), "w", json!(2)).unwrap();

    let second = client
        .replicant(ns("x"), name("r"), opts_with_default(json!({"other": true})))
        .unwrap();
    assert_eq!(second.value(), first.value());
    assert_eq!(second.revision(), first.revision());
}
