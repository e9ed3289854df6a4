mod support;

use std::time::Duration;

use idle_sync::{ConnectionEvent, ConnectionStatus, SyncClient, SyncConfig, SyncError};
use serde_json::json;
use tokio::sync::{broadcast, watch};

use support::mock_server::{HandshakeMode, MockGameServer, correlation_id};

fn reconnect_test_config(url: String) -> SyncConfig {
    let mut config = SyncConfig::new(url).with_token("test-token");
    config.timeouts.call_timeout_ms = 1_000;
    config.timeouts.connect_timeout_ms = 1_000;
    config.reconnect.enabled = true;
    config.reconnect.base_delay_ms = 10;
    config.reconnect.max_delay_ms = 40;
    config.reconnect.max_consecutive_failures = 5;
    config.polling.enabled = false;
    config.keepalive.enabled = false;
    config.save.enabled = false;
    config
}

async fn start_server_or_skip(test_name: &str) -> Option<MockGameServer> {
    match MockGameServer::start().await {
        Ok(server) => Some(server),
        Err(err) => {
            eprintln!("Skipping {test_name}: unable to start mock server: {err}");
            None
        }
    }
}

async fn next_event(events: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("timed out waiting for connection event")
        .expect("event channel closed")
}

async fn wait_for_status<F>(status: &mut watch::Receiver<ConnectionStatus>, predicate: F)
where
    F: FnMut(&ConnectionStatus) -> bool,
{
    tokio::time::timeout(Duration::from_secs(3), status.wait_for(predicate))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed");
}

#[tokio::test]
async fn dropped_session_reconnects_and_emits_events() {
    let Some(mut server) = start_server_or_skip("dropped_session_reconnects_and_emits_events").await
    else {
        return;
    };
    let client = SyncClient::connect(reconnect_test_config(server.ws_url()))
        .await
        .unwrap();
    let mut events = client.event_receiver();

    let first = server.accept_connection().await;
    first.force_close().await;

    let mut second = server.accept_connection().await;
    assert_ne!(first.index(), second.index());

    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected { code: None, .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Reconnecting {
            attempt: 1,
            delay_ms: 10
        }
    );
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Reconnected);

    let mut status = client.status();
    wait_for_status(&mut status, ConnectionStatus::is_connected).await;

    let responder = tokio::spawn(async move {
        let frame = second.recv_frame_type("getState").await;
        second
            .send_result(correlation_id(&frame), json!({"resources": {"gold": 9}}))
            .await;
        second
    });
    client.fetch_state().await.unwrap();
    let _second = responder.await.unwrap();
    assert_eq!(client.store().resource("gold"), Some(9.0));

    client.disconnect().await;
}

#[tokio::test]
async fn auth_close_code_is_terminal_without_retry() {
    let Some(mut server) = start_server_or_skip("auth_close_code_is_terminal_without_retry").await
    else {
        return;
    };
    let client = SyncClient::connect(reconnect_test_config(server.ws_url()))
        .await
        .unwrap();
    let mut events = client.event_receiver();
    let mut status = client.status();

    let connection = server.accept_connection().await;
    connection.close_with(4001, "token expired").await;

    wait_for_status(&mut status, ConnectionStatus::is_terminal).await;

    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected {
            reason: "token expired".into(),
            code: Some(4001)
        }
    );
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Unrecoverable { .. }
    ));

    assert!(
        server
            .try_accept_connection(Duration::from_millis(200))
            .await
            .is_none()
    );
    assert_eq!(server.attempts(), 1);

    let err = client.call("getState", json!(null)).await.unwrap_err();
    assert!(matches!(err, SyncError::Unrecoverable { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn unauthorized_handshake_during_reconnect_is_terminal() {
    let Some(mut server) =
        start_server_or_skip("unauthorized_handshake_during_reconnect_is_terminal").await
    else {
        return;
    };
    let client = SyncClient::connect(reconnect_test_config(server.ws_url()))
        .await
        .unwrap();
    let mut status = client.status();

    let connection = server.accept_connection().await;
    server.set_mode(HandshakeMode::Unauthorized);
    connection.force_close().await;

    wait_for_status(&mut status, ConnectionStatus::is_terminal).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(server.attempts(), 2);
}

#[tokio::test]
async fn failure_budget_ends_in_unrecoverable_then_silence() {
    let Some(mut server) =
        start_server_or_skip("failure_budget_ends_in_unrecoverable_then_silence").await
    else {
        return;
    };
    let client = SyncClient::connect(reconnect_test_config(server.ws_url()))
        .await
        .unwrap();
    let mut events = client.event_receiver();
    let mut status = client.status();

    let connection = server.accept_connection().await;
    server.set_mode(HandshakeMode::Drop);
    connection.force_close().await;

    wait_for_status(&mut status, ConnectionStatus::is_terminal).await;

    let mut delays = Vec::new();
    let terminal = loop {
        match next_event(&mut events).await {
            ConnectionEvent::Reconnecting { attempt, delay_ms } => {
                assert_eq!(usize::try_from(attempt).unwrap(), delays.len() + 1);
                delays.push(delay_ms);
            }
            ConnectionEvent::Unrecoverable {
                consecutive_failures,
                ..
            } => break consecutive_failures,
            _ => {}
        }
    };

    // One initial connection, then four refused reconnects.
    assert_eq!(terminal, 5);
    assert_eq!(delays, vec![10, 20, 40, 40]);
    assert_eq!(server.attempts(), 5);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.attempts(), 5);
}

#[tokio::test]
async fn successful_reconnect_resets_the_budget() {
    let Some(mut server) = start_server_or_skip("successful_reconnect_resets_the_budget").await
    else {
        return;
    };
    let mut config = reconnect_test_config(server.ws_url());
    config.reconnect.max_consecutive_failures = 2;
    let client = SyncClient::connect(config).await.unwrap();
    let mut events = client.event_receiver();

    // Three drops, each followed by a successful reconnect, never exhaust a
    // budget of two.
    for _ in 0..3 {
        let connection = server.accept_connection().await;
        connection.force_close().await;
    }
    let _last = server.accept_connection().await;

    let mut attempts = Vec::new();
    while attempts.len() < 3 {
        if let ConnectionEvent::Reconnecting { attempt, delay_ms } = next_event(&mut events).await {
            attempts.push((attempt, delay_ms));
        }
    }
    assert_eq!(attempts, vec![(1, 10), (1, 10), (1, 10)]);

    let mut status = client.status();
    wait_for_status(&mut status, ConnectionStatus::is_connected).await;

    client.disconnect().await;
}

#[tokio::test]
async fn deliberate_disconnect_never_reconnects() {
    let Some(mut server) = start_server_or_skip("deliberate_disconnect_never_reconnects").await
    else {
        return;
    };
    let client = SyncClient::connect(reconnect_test_config(server.ws_url()))
        .await
        .unwrap();
    let mut events = client.event_receiver();
    let mut connection = server.accept_connection().await;

    client.disconnect().await;
    connection.wait_closed().await;

    assert_eq!(client.current_status(), ConnectionStatus::Disconnected);
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected { .. }
    ));
    assert!(
        server
            .try_accept_connection(Duration::from_millis(200))
            .await
            .is_none()
    );
    assert_eq!(server.attempts(), 1);
}

#[tokio::test]
async fn disconnect_during_backoff_cancels_the_reconnect() {
    let Some(mut server) =
        start_server_or_skip("disconnect_during_backoff_cancels_the_reconnect").await
    else {
        return;
    };
    let mut config = reconnect_test_config(server.ws_url());
    config.reconnect.base_delay_ms = 5_000;
    config.reconnect.max_delay_ms = 5_000;
    let client = SyncClient::connect(config).await.unwrap();
    let mut events = client.event_receiver();

    let connection = server.accept_connection().await;
    connection.force_close().await;

    loop {
        if matches!(
            next_event(&mut events).await,
            ConnectionEvent::Reconnecting { .. }
        ) {
            break;
        }
    }

    tokio::time::timeout(Duration::from_secs(1), client.disconnect())
        .await
        .expect("disconnect waited out the backoff");
    assert!(
        server
            .try_accept_connection(Duration::from_millis(200))
            .await
            .is_none()
    );
    assert_eq!(server.attempts(), 1);
}

#[tokio::test]
async fn first_connect_failures_are_returned() {
    let Some(server) = start_server_or_skip("first_connect_failures_are_returned").await else {
        return;
    };

    server.set_mode(HandshakeMode::Unauthorized);
    let err = SyncClient::connect(reconnect_test_config(server.ws_url()))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AuthenticationRejected { .. }), "got {err:?}");

    server.set_mode(HandshakeMode::Drop);
    let err = SyncClient::connect(reconnect_test_config(server.ws_url()))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ConnectionFailed { .. }), "got {err:?}");
    assert!(err.is_connection_error());
}

#[tokio::test]
async fn missing_token_never_touches_the_network() {
    let Some(server) = start_server_or_skip("missing_token_never_touches_the_network").await else {
        return;
    };
    let mut config = reconnect_test_config(server.ws_url());
    config.token = None;

    let err = SyncClient::connect(config).await.unwrap_err();
    assert!(matches!(err, SyncError::MissingCredential));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.attempts(), 0);
}
