//! Service Bus REST contract tests.
//!
//! Each test spins up an Axum stand-in for the broker on a random port and
//! drives `ServiceBusQueue` against it over real HTTP.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use nextmove_bridge::error::QueueError;
use nextmove_bridge::queue::{MessageQueue, ServiceBusQueue};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Broker state: pending messages, held locks and what clients asked for.
#[derive(Default)]
struct FakeBroker {
    pending: Mutex<VecDeque<(String, Bytes)>>,
    locked: Mutex<HashMap<String, String>>,
    published: Mutex<Vec<(Value, Bytes)>>,
    receive_timeouts: Mutex<Vec<String>>,
    authorizations: Mutex<Vec<String>>,
}

type Broker = Arc<FakeBroker>;

async fn publish(
    State(broker): State<Broker>,
    Path(queue): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if queue != "testqueue" {
        return StatusCode::NOT_FOUND;
    }
    let Some(properties) = headers
        .get("brokerproperties")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| serde_json::from_str::<Value>(v).ok())
    else {
        return StatusCode::BAD_REQUEST;
    };
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        broker.authorizations.lock().unwrap().push(auth.to_string());
    }

    let id = properties["MessageId"].as_str().unwrap_or_default().to_string();
    broker
        .published
        .lock()
        .unwrap()
        .push((properties, body.clone()));
    broker.pending.lock().unwrap().push_back((id, body));
    StatusCode::CREATED
}

async fn receive(
    State(broker): State<Broker>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    broker
        .receive_timeouts
        .lock()
        .unwrap()
        .push(query.get("timeout").cloned().unwrap_or_default());

    let next = broker.pending.lock().unwrap().pop_front();
    let Some((id, body)) = next else {
        return StatusCode::NO_CONTENT.into_response();
    };

    let token = format!("lock-{id}");
    broker.locked.lock().unwrap().insert(token.clone(), id.clone());
    let properties = json!({
        "DeliveryCount": 1,
        "LockToken": token,
        "MessageId": id,
        "SequenceNumber": 1
    })
    .to_string();
    (StatusCode::CREATED, [("BrokerProperties", properties)], body).into_response()
}

async fn complete(
    State(broker): State<Broker>,
    Path((_queue, id, token)): Path<(String, String, String)>,
) -> StatusCode {
    let removed = broker.locked.lock().unwrap().remove(&token);
    match removed {
        Some(locked_id) if locked_id == id => StatusCode::OK,
        _ => StatusCode::GONE,
    }
}

/// Start the broker on a random port, return (broker, connection string).
async fn start_broker() -> (Broker, String) {
    let broker = Broker::default();
    let app = Router::new()
        .route("/{queue}/messages", post(publish))
        .route("/{queue}/messages/head", post(receive))
        .route("/{queue}/messages/{id}/{token}", delete(complete))
        .with_state(Arc::clone(&broker));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let connection = format!(
        "Endpoint=http://127.0.0.1:{port}/;SharedAccessKeyName=Root;SharedAccessKey=secret"
    );
    (broker, connection)
}

fn queue(connection: &str, name: &str) -> ServiceBusQueue {
    ServiceBusQueue::from_connection_string(reqwest::Client::new(), connection, name).unwrap()
}

#[tokio::test]
async fn sub_second_wait_still_reaches_the_broker() {
    let (broker, connection) = start_broker().await;
    let queue = queue(&connection, "testqueue");

    let batch = timeout(TEST_TIMEOUT, queue.receive_batch(50, Duration::from_millis(900)))
        .await
        .unwrap()
        .unwrap();

    assert!(batch.is_empty());
    assert_eq!(*broker.receive_timeouts.lock().unwrap(), vec!["1".to_string()]);
}

#[tokio::test]
async fn publish_receive_complete_over_http() {
    let (broker, connection) = start_broker().await;
    let queue = queue(&connection, "testqueue");

    queue
        .publish("m1", Bytes::from_static(br#"{"messageId":"m1"}"#))
        .await
        .unwrap();
    {
        let published = broker.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, json!({"MessageId": "m1"}));
        assert_eq!(&published[0].1[..], br#"{"messageId":"m1"}"#);
    }
    let auth = broker.authorizations.lock().unwrap()[0].clone();
    assert!(auth.starts_with("SharedAccessSignature sr="));
    assert!(auth.ends_with("&skn=Root"));

    let batch = timeout(TEST_TIMEOUT, queue.receive_batch(50, Duration::from_secs(10)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].message_id, "m1");
    assert_eq!(&batch[0].body[..], br#"{"messageId":"m1"}"#);
    assert_eq!(batch[0].lock.token, "lock-m1");
    assert_eq!(batch[0].delivery_count, 1);

    // Full wait for the first receive, a short one for the follow-up that hit 204.
    assert_eq!(
        *broker.receive_timeouts.lock().unwrap(),
        vec!["10".to_string(), "1".to_string()]
    );

    queue.complete(&batch[0].lock).await.unwrap();
    assert!(matches!(
        queue.complete(&batch[0].lock).await,
        Err(QueueError::LockLost { .. })
    ));
}

#[tokio::test]
async fn broker_errors_surface_as_status() {
    let (broker, connection) = start_broker().await;
    let missing = queue(&connection, "otherqueue");

    let result = missing.publish("m2", Bytes::from_static(b"{}")).await;

    assert!(matches!(result, Err(QueueError::Status { status: 404, .. })));
    assert!(broker.pending.lock().unwrap().is_empty());
}
