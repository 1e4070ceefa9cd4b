//! End-to-end behavior of the public API with a capturing transport

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use chrono::DateTime;
use parking_lot::Mutex;
use serde_json::json;
use valued_core::{
    normalize, normalize_map, register, Category, Client, Context, Error, Event, Object, Scope,
    Strategy, Value, Violation,
};

fn capturing(strategy: Strategy) -> (Client, Arc<Mutex<Vec<Event>>>) {
    valued_core::logging::init_test();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let client = Client::builder()
        .callback(move |event: &Event| sink.lock().push(event.clone()))
        .strategy(strategy)
        .build()
        .expect("callback client should build");
    (client, events)
}

fn payload_without_timestamp(event: &Event) -> serde_json::Value {
    let mut body = serde_json::to_value(event).unwrap();
    let stamp = body
        .as_object_mut()
        .unwrap()
        .remove("occured_at")
        .expect("occured_at should be set");
    assert!(DateTime::parse_from_rfc3339(stamp.as_str().unwrap()).is_ok());
    body
}

#[test]
fn pageview_end_to_end() {
    let (client, events) = capturing(Strategy::Synchronous);
    client
        .pageview("https://example.com", &json!({"user.id": 42}))
        .unwrap();

    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(
        payload_without_timestamp(&events[0]),
        json!({
            "category": "pageview",
            "user": {"id": 42},
            "attributes": {"source": {"url": "https://example.com"}}
        })
    );
}

#[test]
fn action_end_to_end() {
    let (client, events) = capturing(Strategy::Synchronous);
    client.action("product.view", &json!({"user.id": 42})).unwrap();

    let events = events.lock();
    assert_eq!(
        payload_without_timestamp(&events[0]),
        json!({"category": "action", "key": "product.view", "user": {"id": 42}})
    );
}

#[test]
fn unsigned_ids_keep_every_digit() {
    let (client, events) = capturing(Strategy::Synchronous);
    client
        .action("signup", &json!({"user.id": 18446744073709551557u64}))
        .unwrap();
    client.sync_customer(&BTreeMap::from([("id", u64::MAX)])).unwrap();

    let events = events.lock();
    let body = events[0].to_json().unwrap();
    assert!(body.contains(r#""user":{"id":18446744073709551557}"#), "{body}");
    assert!(events[1]
        .to_json()
        .unwrap()
        .contains(r#""customer":{"id":18446744073709551615}"#));
}

/// Accepts one connection, answers 202 and returns the raw request head.
fn accept_one() -> (String, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/events", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 8192];
        let n = stream.read(&mut buf).unwrap();
        stream
            .write_all(b"HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    });
    (url, handle)
}

#[tokio::test]
async fn synchronous_client_delivers_from_async_code() {
    valued_core::logging::init_test();
    let (url, server) = accept_one();
    let client = Client::builder()
        .token("tok")
        .endpoint(url)
        .strategy(Strategy::Synchronous)
        .build()
        .unwrap();

    client.action("signup", &json!({"user.id": 1})).unwrap();

    let request = server.join().unwrap();
    assert!(request.starts_with("POST /events HTTP/1.1"));
}

#[test]
fn validation_failures_are_reported_and_nothing_is_sent() {
    let (client, events) = capturing(Strategy::Synchronous);

    let err = client.pageview("", &json!({})).unwrap_err();
    let Error::Validation(err) = err else {
        panic!("expected a validation error");
    };
    assert!(err.contains(&Violation::MissingUserId));
    assert_eq!(
        err.to_string(),
        "invalid event: missing user.id, missing attributes.source.url"
    );

    assert!(client
        .sync(&json!({"user": {"id": 1}, "customer": {"id": 2}}))
        .is_err());
    assert!(events.lock().is_empty());
}

#[test]
fn scoped_region_restores_state() {
    let (client, events) = capturing(Strategy::Synchronous);
    let mut scope = Scope::with_defaults(client, &json!({"user.id": 1}));

    scope.with(&json!({"customer.id": 12}), |scope| {
        scope
            .pageview("https://big.company.com/reports/12", &())
            .unwrap();
        scope.apply(&json!({"attributes.plan": "pro"}));
        scope.action("report.generated", &()).unwrap();
    });
    scope.action("profile.updated", &()).unwrap();

    let events = events.lock();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].get("customer.id"), Some(&Value::Integer(12)));
    assert_eq!(
        events[1].get("attributes.plan").and_then(Value::as_str),
        Some("pro")
    );
    assert!(events[2].get("customer").is_none());
    assert!(events[2].get("attributes").is_none());
    assert_eq!(scope.to_map(), normalize_map(&json!({"user": {"id": 1}})));
}

#[test]
fn scopes_on_different_threads_do_not_leak() {
    let (client, events) = capturing(Strategy::Synchronous);
    let mut scope = Scope::new(client);
    scope.set_user_id(&1);

    let handles: Vec<_> = (2..6)
        .map(|id| {
            let mut forked = scope.fork();
            std::thread::spawn(move || {
                forked.set_user_id(&id);
                forked.action("worker.ran", &()).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(scope.user_id(), Some(Value::Integer(1)));
    let mut ids: Vec<i64> = events
        .lock()
        .iter()
        .filter_map(|e| e.get("user.id").and_then(Value::as_i64))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 3, 4, 5]);
}

#[test]
fn single_worker_delivers_in_order() {
    let (client, events) = capturing(Strategy::SingleWorker);
    for i in 0..20 {
        client.action(&format!("step.{i}"), &json!({"user.id": 1})).unwrap();
    }
    client.dispatcher().shutdown();

    let keys: Vec<String> = events
        .lock()
        .iter()
        .filter_map(|e| e.get("key").and_then(Value::as_str).map(String::from))
        .collect();
    let expected: Vec<String> = (0..20).map(|i| format!("step.{i}")).collect();
    assert_eq!(keys, expected);
}

#[test]
fn pool_delivers_every_event() {
    let (client, events) = capturing(Strategy::BoundedPool { min: 1, max: 3 });
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let client = client.clone();
            std::thread::spawn(move || {
                for i in 0..10 {
                    client
                        .sync(&json!({"customer": {"id": t, "seq": i}}))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    client.dispatcher().shutdown();

    let events = events.lock();
    assert_eq!(events.len(), 40);
    assert!(events.iter().all(|e| e.category() == Category::Sync));
}

#[test]
fn failing_transport_does_not_reach_caller() {
    let client = Client::builder()
        .callback(|_: &Event| panic!("transport exploded"))
        .strategy(Strategy::Synchronous)
        .build()
        .unwrap();
    assert!(client.action("signup", &json!({"user.id": 1})).is_ok());
}

struct Account {
    id: u32,
    plan: &'static str,
}

#[test]
fn registered_conversion_applies_inside_payloads() {
    register(|account: &Account| {
        let mut fields = BTreeMap::new();
        fields.insert("id", normalize(&account.id));
        fields.insert("plan", normalize(account.plan));
        fields
    });

    let (client, events) = capturing(Strategy::Synchronous);
    let mut data = BTreeMap::new();
    data.insert(
        "customer",
        Object::new(Account {
            id: 9,
            plan: "enterprise",
        }),
    );
    client.sync(&data).unwrap();

    let event = &events.lock()[0];
    assert_eq!(event.get("customer.id"), Some(&Value::Integer(9)));
    assert_eq!(
        event.get("customer.plan").and_then(Value::as_str),
        Some("enterprise")
    );
}
