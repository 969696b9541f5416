//! End-to-end tests for the WebSocket session over a scripted transport

mod common;

use common::{mock_connector, MockConnection, MockHub};
use hass_client::{
    ClientConfig, HassClient, HassError, HassRequest, Phase, ReconnectConfig, StaticTokenProvider,
};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn test_config(url: &str) -> ClientConfig {
    ClientConfig::new(url).with_reconnect(ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter_factor: 0.0,
        ..ReconnectConfig::default()
    })
}

fn test_client(url: &str) -> (HassClient, MockHub) {
    let (connector, hub) = mock_connector();
    let client = HassClient::with_connector(
        test_config(url),
        Arc::new(StaticTokenProvider::new("secret")),
        connector,
    )
    .expect("client creation should succeed");
    (client, hub)
}

async fn wait_for_phase<F: Fn(&Phase) -> bool>(client: &HassClient, pred: F) -> Phase {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let phase = client.phase();
        if pred(&phase) {
            return phase;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for phase, currently {phase:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Connect and complete the auth handshake
async fn ready_client(url: &str) -> (HassClient, MockHub, MockConnection) {
    let (client, mut hub) = test_client(url);
    client.connect();
    let mut conn = hub.next_connection().await;
    conn.handshake("secret", "2024.1.0").await;
    wait_for_phase(&client, Phase::is_command).await;
    (client, hub, conn)
}

#[tokio::test]
async fn test_connects_to_derived_websocket_url() {
    let (client, mut hub) = test_client("https://hass.example:8123/api");
    client.connect();
    let conn = hub.next_connection().await;
    assert_eq!(
        conn.url.as_str(),
        "wss://hass.example:8123/api/websocket",
        "base URL must be normalized before deriving the WebSocket URL"
    );
}

#[tokio::test]
async fn test_happy_path_command_round_trip() {
    let (client, _hub, mut conn) = ready_client("https://hass.example:8123/api").await;

    match client.phase() {
        Phase::Command { server_version } => assert_eq!(server_version, "2024.1.0"),
        other => panic!("expected command phase, got {other:?}"),
    }

    let handle = client.submit(HassRequest::new("get_states"));
    let frame = conn.expect_frame().await;
    assert_eq!(frame["id"], 1);
    assert_eq!(frame["type"], "get_states");

    conn.send_json(json!({"id": 1, "type": "result", "success": true, "result": []}));
    assert_eq!(handle.result().await.unwrap(), json!([]));
}

#[tokio::test]
async fn test_phase_stream_follows_state_machine() {
    let (client, mut hub) = test_client("https://hass.example:8123");
    let mut phases = client.state_stream();
    client.connect();

    let mut conn = hub.next_connection().await;
    conn.handshake("secret", "2024.1.0").await;

    let first = timeout(WAIT, phases.recv()).await.unwrap().unwrap();
    assert!(matches!(first, Phase::Authenticating));
    let second = timeout(WAIT, phases.recv()).await.unwrap().unwrap();
    assert!(second.is_command());
}

#[tokio::test]
async fn test_commands_queued_while_authenticating_flush_in_order() {
    let (client, mut hub) = test_client("https://hass.example:8123");
    client.connect();
    let mut conn = hub.next_connection().await;

    conn.send_json(json!({"type": "auth_required"}));
    wait_for_phase(&client, |p| matches!(p, Phase::Authenticating)).await;

    // Submitted before the command phase; must be parked, not rejected.
    let states = client.submit(HassRequest::new("get_states"));
    let config = client.submit(HassRequest::new("get_config"));

    let auth = conn.expect_frame().await;
    assert_eq!(auth["type"], "auth");
    conn.send_json(json!({"type": "auth_ok", "ha_version": "2024.1.0"}));

    let first = conn.expect_frame().await;
    assert_eq!(first["type"], "get_states");
    assert_eq!(first["id"], 1);
    let second = conn.expect_frame().await;
    assert_eq!(second["type"], "get_config");
    assert_eq!(second["id"], 2);

    conn.send_json(json!({"id": 1, "type": "result", "success": true, "result": []}));
    conn.send_json(json!({"id": 2, "type": "result", "success": true, "result": {}}));
    assert_eq!(states.result().await.unwrap(), json!([]));
    assert_eq!(config.result().await.unwrap(), json!({}));
}

#[tokio::test]
async fn test_reconnect_resubscribes_under_fresh_id() {
    let (client, mut hub, mut conn) = ready_client("https://hass.example:8123").await;

    // Burn id 1 on a single so the subscription lands on id 2.
    let states = client.submit(HassRequest::new("get_states"));
    let frame = conn.expect_frame().await;
    assert_eq!(frame["id"], 1);
    conn.send_json(json!({"id": 1, "type": "result", "success": true, "result": []}));
    states.result().await.unwrap();

    let mut subscription = client.subscribe_events(Some("state_changed"));
    let frame = conn.expect_frame().await;
    assert_eq!(frame["id"], 2);
    assert_eq!(frame["type"], "subscribe_events");
    assert_eq!(frame["event_type"], "state_changed");
    conn.send_json(json!({"id": 2, "type": "result", "success": true, "result": null}));

    conn.send_json(json!({"id": 2, "type": "event", "event": {"seq": 1}}));
    let event = timeout(WAIT, subscription.next_event()).await.unwrap().unwrap();
    assert_eq!(event["seq"], 1);

    // Drop the transport; the client must reconnect and resubscribe.
    conn.fail("io error");
    let mut conn = hub.next_connection().await;
    conn.handshake("secret", "2024.1.0").await;

    let frame = conn.expect_frame().await;
    assert_eq!(frame["type"], "subscribe_events");
    assert_eq!(frame["id"], 3, "re-submission must continue the id sequence");
    assert_eq!(frame["event_type"], "state_changed");
    conn.send_json(json!({"id": 3, "type": "result", "success": true, "result": null}));

    // An event for the dead id must not reach the sink; the new id must.
    conn.send_json(json!({"id": 2, "type": "event", "event": {"seq": "stale"}}));
    conn.send_json(json!({"id": 3, "type": "event", "event": {"seq": 2}}));
    let event = timeout(WAIT, subscription.next_event()).await.unwrap().unwrap();
    assert_eq!(event["seq"], 2, "only the fresh id may deliver events");
}

#[tokio::test]
async fn test_auth_failure_suppresses_reconnect_until_explicit_connect() {
    let (client, mut hub) = test_client("https://hass.example:8123");
    client.connect();
    let mut conn = hub.next_connection().await;

    conn.send_json(json!({"type": "auth_required"}));
    let auth = conn.expect_frame().await;
    assert_eq!(auth["type"], "auth");
    conn.send_json(json!({"type": "auth_invalid", "message": "bad"}));

    let phase = wait_for_phase(&client, |p| {
        matches!(p, Phase::Disconnected { error: Some(_), .. })
    })
    .await;
    match phase {
        Phase::Disconnected { error: Some(error), for_reset } => {
            assert!(!for_reset);
            assert!(matches!(&*error, HassError::AuthFailed(message) if message == "bad"));
        }
        other => panic!("expected auth-failed disconnect, got {other:?}"),
    }

    // No automatic retry with the same token.
    hub.expect_no_connection(Duration::from_millis(150)).await;

    client.connect();
    let _conn = hub.next_connection().await;
}

#[tokio::test]
async fn test_permanent_disconnect_cancels_everything() {
    let (client, mut hub, mut conn) = ready_client("https://hass.example:8123").await;

    let pending = client.submit(HassRequest::new("get_states"));
    conn.expect_frame().await;
    let subscription = client.subscribe_events(None);
    conn.expect_frame().await;

    client.disconnect(true);

    assert!(matches!(pending.result().await, Err(HassError::Cancelled)));
    assert!(matches!(
        subscription.completion().await,
        Err(HassError::Cancelled)
    ));
    wait_for_phase(&client, |p| {
        matches!(p, Phase::Disconnected { error: None, for_reset: true })
    })
    .await;
    hub.expect_no_connection(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_cancel_subscription_stops_delivery_and_unsubscribes() {
    let (client, _hub, mut conn) = ready_client("https://hass.example:8123").await;

    let mut subscription = client.subscribe_events(None);
    let frame = conn.expect_frame().await;
    assert_eq!(frame["id"], 1);
    conn.send_json(json!({"id": 1, "type": "result", "success": true, "result": null}));

    conn.send_json(json!({"id": 1, "type": "event", "event": {"seq": 1}}));
    timeout(WAIT, subscription.next_event()).await.unwrap().unwrap();

    subscription.cancel();
    let frame = conn.expect_frame().await;
    assert_eq!(frame["type"], "unsubscribe_events");
    assert_eq!(frame["subscription"], 1);
    assert_eq!(frame["id"], 2);

    conn.send_json(json!({"id": 1, "type": "event", "event": {"seq": "late"}}));
    assert_eq!(
        timeout(WAIT, subscription.next_event()).await.unwrap(),
        None,
        "no events may be delivered after cancellation"
    );
    assert!(matches!(
        subscription.completion().await,
        Err(HassError::Cancelled)
    ));
}

#[tokio::test]
async fn test_submit_without_session_in_prospect_is_cancelled() {
    let (client, _hub) = test_client("https://hass.example:8123");
    // Never connected; there is no session to queue for.
    let result = client.send_command(HassRequest::new("get_states")).await;
    assert!(matches!(result, Err(HassError::Cancelled)));
}

#[tokio::test]
async fn test_binary_frames_are_ignored() {
    let (client, _hub, mut conn) = ready_client("https://hass.example:8123").await;

    conn.send_binary(vec![0x01, 0x02, 0x03]);

    // The session keeps working after the binary frame.
    let handle = client.submit(HassRequest::new("ping"));
    let frame = conn.expect_frame().await;
    conn.send_json(json!({"id": frame["id"], "type": "result", "success": true, "result": null}));
    handle.result().await.unwrap();
}

#[tokio::test]
async fn test_reconfigure_replaces_connection_only_on_real_change() {
    let (client, mut hub, mut conn) = ready_client("https://hass.example:8123").await;

    // Same base behind a different suffix: nothing should happen.
    client
        .reconfigure(&test_config("https://hass.example:8123/api/websocket/"))
        .unwrap();
    hub.expect_no_connection(Duration::from_millis(100)).await;

    // A genuinely different endpoint takes over the session.
    client
        .reconfigure(&test_config("https://other.example:8123"))
        .unwrap();
    let conn2 = hub.next_connection().await;
    assert_eq!(conn2.url.as_str(), "wss://other.example:8123/api/websocket");

    // The old transport is dead: its frames no longer reach the client.
    conn.send_json(json!({"type": "auth_required"}));
    drop(conn);
}

#[tokio::test]
async fn test_rest_error_status_maps_to_external() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(401).set_body_string("nope"))
        .mount(&server)
        .await;

    let (client, _hub) = test_client(&server.uri());
    let error = client
        .rest_call(Method::GET, "api/states", &[], None)
        .await
        .unwrap_err();
    match error {
        HassError::External { code, message } => {
            assert_eq!(code, "401");
            assert_eq!(message, "nope");
        }
        other => panic!("expected External, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rest_success_sends_bearer_and_host() {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    let uri = url::Url::parse(&server.uri()).unwrap();
    let expected_host = format!("{}:{}", uri.host_str().unwrap(), uri.port().unwrap());

    Mock::given(method("GET"))
        .and(path("/api/states"))
        .and(query_param("filter", "light"))
        .and(header("authorization", "Bearer secret"))
        .and(header("host", expected_host.as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"entity_id": "light.kitchen"}])),
        )
        .mount(&server)
        .await;

    let (client, _hub) = test_client(&server.uri());
    let states = client
        .rest_call(
            Method::GET,
            "api/states",
            &[("filter".to_string(), "light".to_string())],
            None,
        )
        .await
        .unwrap();
    assert_eq!(states[0]["entity_id"], "light.kitchen");
}

#[tokio::test]
async fn test_rest_in_flight_cancelled_by_permanent_disconnect() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/config"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let (client, _hub) = test_client(&server.uri());
    let slow = client.clone();
    let call =
        tokio::spawn(async move { slow.rest_call(Method::GET, "api/config", &[], None).await });

    // Give the REST task a moment to register, then cancel everything.
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.disconnect(true);

    let result = timeout(WAIT, call).await.unwrap().unwrap();
    assert!(matches!(result, Err(HassError::Cancelled)));
}
