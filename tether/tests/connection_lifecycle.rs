//! Connection supervisor behaviour seen through the client facade.

mod common;

use std::time::Duration;

use common::{harness, recv_kind, test_config, ADDRESS};
use serde_json::json;
use tether::{
    ClientEvent, ConnectionState, Delivery, DrainSummary, OutboundMessage, RequestError,
};
use tokio::task::LocalSet;

#[tokio::test(start_paused = true)]
async fn test_connect_drains_queue_in_priority_order() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            assert_eq!(h.client.state(), ConnectionState::Idle);

            for (kind, id) in [("chat_message", 1), ("alert", 2), ("state_update", 3)] {
                let delivery = h
                    .client
                    .send(OutboundMessage::new(kind, json!({ "id": id })))
                    .await
                    .expect("send");
                assert_eq!(delivery, Delivery::Queued);
            }
            assert_eq!(h.client.queue_len(), 3);

            let mut link = h.connect().await;
            assert_eq!(link.address(), ADDRESS);
            assert!(h.client.is_connected());

            let drained = h
                .wait_for(|e| matches!(e, ClientEvent::QueueDrained(_)))
                .await;
            assert_eq!(
                drained,
                ClientEvent::QueueDrained(DrainSummary {
                    sent: 3,
                    failed: 0,
                    remaining: 0,
                })
            );

            let kinds: Vec<String> = [
                link.recv_json().await.expect("frame"),
                link.recv_json().await.expect("frame"),
                link.recv_json().await.expect("frame"),
            ]
            .iter()
            .map(|f| f["type"].as_str().unwrap_or_default().to_string())
            .collect();
            assert_eq!(kinds, vec!["alert", "state_update", "chat_message"]);

            // Once connected, sends go straight out.
            let delivery = h
                .client
                .send(OutboundMessage::new("chat_message", json!({"id": 4})))
                .await
                .expect("send");
            assert_eq!(delivery, Delivery::Sent);
            assert_eq!(recv_kind(&mut link, "chat_message").await["data"]["id"], 4);
            assert_eq!(h.client.queue_len(), 0);
            assert_eq!(h.client.metrics().messages_sent, 4);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_then_fixed_interval_then_recovery() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            h.server.set_refusing(true);
            h.client.connect(ADDRESS);

            let mut schedule = Vec::new();
            while schedule.len() < 5 {
                if let ClientEvent::Reconnecting {
                    attempt,
                    delay,
                    fixed_interval,
                } = h.next_event().await
                {
                    schedule.push((attempt, delay.as_millis() as u64, fixed_interval));
                }
            }
            assert_eq!(
                schedule,
                vec![
                    (1, 100, false),
                    (2, 200, false),
                    (3, 400, false),
                    (0, 2000, true),
                    (0, 2000, true),
                ]
            );
            assert_eq!(h.client.state(), ConnectionState::Reconnecting);

            h.server.set_refusing(false);
            let mut link = h.server.accept().await.expect("accept");
            h.wait_for(|e| *e == ClientEvent::Connected).await;

            let metrics = h.client.metrics();
            assert_eq!(metrics.connection_failures, 5);
            assert_eq!(metrics.connections_established, 1);
            assert_eq!(metrics.consecutive_failures, 0);

            // A later drop starts exponential backoff from the beginning.
            link.close();
            let event = h
                .wait_for(|e| matches!(e, ClientEvent::Reconnecting { .. }))
                .await;
            assert_eq!(
                event,
                ClientEvent::Reconnecting {
                    attempt: 1,
                    delay: Duration::from_millis(100),
                    fixed_interval: false,
                }
            );
            let _relinked = h.server.accept().await.expect("reconnect");
            h.wait_for(|e| *e == ClientEvent::Connected).await;
            assert_eq!(h.server.connect_count(), 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_connected_is_noop() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            let _link = h.connect().await;

            h.client.connect(ADDRESS);
            h.client.connect("mem://elsewhere");
            tokio::time::sleep(Duration::from_secs(1)).await;

            assert_eq!(h.server.connect_count(), 1);
            assert_eq!(h.server.dialled(), vec![ADDRESS.to_string()]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_fails_pending_requests() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            let mut link = h.connect().await;

            let client = h.client.clone();
            let pending = tokio::task::spawn_local(async move {
                client.request("get_mood", json!({})).await
            });

            recv_kind(&mut link, "get_mood").await;
            assert_eq!(h.client.pending_requests(), 1);
            link.close();

            let result = pending.await.expect("join");
            assert_eq!(result, Err(RequestError::ConnectionClosed));
            let event = h
                .wait_for(|e| matches!(e, ClientEvent::Disconnected { .. }))
                .await;
            assert_eq!(
                event,
                ClientEvent::Disconnected {
                    reason: "closed by peer".into()
                }
            );
            assert_eq!(h.client.pending_requests(), 0);
            assert_eq!(h.client.metrics().requests_failed, 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_send_failure_while_connected_queues_offline() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            let _link = h.connect().await;
            h.wait_for(|e| matches!(e, ClientEvent::QueueDrained(_))).await;

            h.server.set_failing_sends(true);
            let delivery = h
                .client
                .send(OutboundMessage::new("tactile_feedback", json!({"id": 1})))
                .await
                .expect("send");
            assert_eq!(delivery, Delivery::Queued);
            assert_eq!(h.client.queue_len(), 1);
            assert_eq!(h.client.state(), ConnectionState::Connected);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_sent_and_silence_drops_link() {
    LocalSet::new()
        .run_until(async {
            let config = test_config()
                .with_heartbeat(Duration::from_secs(1), Duration::from_millis(2500));
            let mut h = harness(config).await;
            let mut link = h.connect().await;

            let beat = recv_kind(&mut link, "heartbeat").await;
            assert!(beat["data"]["timestamp"].is_u64());

            // No inbound traffic at all: the third tick finds the link silent.
            let event = h
                .wait_for(|e| matches!(e, ClientEvent::Disconnected { .. }))
                .await;
            match event {
                ClientEvent::Disconnected { reason } => {
                    assert!(reason.starts_with("no inbound traffic"), "{}", reason)
                }
                other => panic!("unexpected {:?}", other),
            }
            assert!(h.client.metrics().heartbeats_sent >= 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_ack_keeps_link_alive() {
    LocalSet::new()
        .run_until(async {
            let config = test_config()
                .with_heartbeat(Duration::from_secs(1), Duration::from_millis(2500));
            let mut h = harness(config).await;
            let mut link = h.connect().await;

            for _ in 0..5 {
                let beat = recv_kind(&mut link, "heartbeat").await;
                link.send_json(&json!({"type": "heartbeat_ack", "data": beat["data"]}));
            }
            assert_eq!(h.client.state(), ConnectionState::Connected);
            assert!(h.client.metrics().heartbeat_acks >= 4);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_then_reconnect() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            let mut link = h.connect().await;

            h.client.disconnect().await.expect("disconnect");
            assert_eq!(h.client.state(), ConnectionState::Idle);
            assert!(link.recv().await.is_none());
            h.wait_for(|e| matches!(e, ClientEvent::Disconnected { .. }))
                .await;

            // Offline again: messages queue up.
            let delivery = h
                .client
                .send(OutboundMessage::new("chat_message", json!({"id": 1})))
                .await
                .expect("send");
            assert_eq!(delivery, Delivery::Queued);

            // No automatic reconnect after a deliberate disconnect.
            tokio::time::sleep(Duration::from_secs(60)).await;
            assert_eq!(h.server.connect_count(), 1);

            let mut link = h.connect().await;
            assert_eq!(recv_kind(&mut link, "chat_message").await["data"]["id"], 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_terminal() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            let mut link = h.connect().await;
            h.server.set_failing_sends(true);
            h.client
                .send(OutboundMessage::new("alert", json!({"id": 1})))
                .await
                .expect("send");
            assert_eq!(h.client.queue_len(), 1);
            assert!(h.store.contains("offline_queue"));

            h.client.shutdown().await.expect("shutdown");
            assert_eq!(h.client.state(), ConnectionState::Terminated);
            assert_eq!(h.client.queue_len(), 0);
            assert!(!h.store.contains("offline_queue"));
            assert!(link.recv().await.is_none());
            h.wait_for(|e| *e == ClientEvent::Terminated).await;

            // Absorbing: nothing works any more, nothing reconnects.
            assert!(h
                .client
                .send(OutboundMessage::new("chat_message", json!({})))
                .await
                .is_err());
            assert_eq!(
                h.client.request("ping", json!({})).await,
                Err(RequestError::Shutdown)
            );
            assert!(h.client.disconnect().await.is_err());
            h.client.connect(ADDRESS);
            tokio::time::sleep(Duration::from_secs(60)).await;
            assert_eq!(h.server.connect_count(), 1);
            h.client.shutdown().await.expect("second shutdown is a no-op");
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_reconnecting_cancels_retry() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            h.server.set_refusing(true);
            h.client.connect(ADDRESS);
            h.wait_for(|e| matches!(e, ClientEvent::Reconnecting { .. }))
                .await;

            h.client.shutdown().await.expect("shutdown");
            h.server.set_refusing(false);
            tokio::time::sleep(Duration::from_secs(60)).await;

            assert_eq!(h.client.state(), ConnectionState::Terminated);
            assert_eq!(h.server.dialled().len(), 1);
            assert_eq!(h.server.connect_count(), 0);
        })
        .await;
}
