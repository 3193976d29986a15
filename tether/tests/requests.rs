//! Correlated request/response through a live link.

mod common;

use std::time::Duration;

use common::{harness, recv_kind, test_config};
use serde_json::json;
use tether::{ClientEvent, RequestError};
use tokio::task::{spawn_local, LocalSet};

#[tokio::test(start_paused = true)]
async fn test_request_roundtrip() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            let mut link = h.connect().await;

            let client = h.client.clone();
            let pending = spawn_local(async move {
                client.request("get_mood", json!({"detail": true})).await
            });

            let frame = recv_kind(&mut link, "get_mood").await;
            let request_id = frame["request_id"].as_str().expect("request id").to_string();
            assert!(request_id.starts_with("req-"));
            assert_eq!(frame["data"]["detail"], true);

            link.send_json(&json!({
                "type": "response",
                "request_id": request_id,
                "data": {"mood": "curious"}
            }));

            let response = pending.await.expect("join").expect("response");
            assert_eq!(response, json!({"mood": "curious"}));
            assert_eq!(h.client.pending_requests(), 0);
            assert_eq!(h.client.metrics().requests_completed, 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_request_id_inside_data_is_accepted() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            let mut link = h.connect().await;

            let client = h.client.clone();
            let pending = spawn_local(async move { client.request("ping", json!({})).await });

            let frame = recv_kind(&mut link, "ping").await;
            link.send_json(&json!({
                "type": "response",
                "data": {"request_id": frame["request_id"], "ok": true}
            }));

            let response = pending.await.expect("join").expect("response");
            assert_eq!(response["ok"], true);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_request_times_out() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            let mut link = h.connect().await;

            let client = h.client.clone();
            let pending = spawn_local(async move {
                client
                    .request_with_timeout("ping", json!({}), Duration::from_secs(5))
                    .await
            });
            let frame = recv_kind(&mut link, "ping").await;

            let result = pending.await.expect("join");
            assert!(matches!(result, Err(RequestError::Timeout(_))), "{:?}", result);
            assert_eq!(h.client.pending_requests(), 0);
            assert_eq!(h.client.metrics().requests_timed_out, 1);

            // A late answer finds nothing to complete and changes nothing.
            link.send_json(&json!({
                "type": "response",
                "request_id": frame["request_id"],
                "data": {}
            }));
            link.send_json(&json!({"type": "notification", "data": {"n": 1}}));
            h.wait_for(|e| matches!(e, ClientEvent::Application { .. }))
                .await;
            assert_eq!(h.client.metrics().requests_completed, 0);
            assert_eq!(h.client.state(), tether::ConnectionState::Connected);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_request_while_offline_goes_out_on_connect() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;

            let client = h.client.clone();
            let pending = spawn_local(async move { client.request("get_state", json!({})).await });
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(h.client.queue_len(), 1);
            assert_eq!(h.client.pending_requests(), 1);

            let mut link = h.connect().await;
            let frame = recv_kind(&mut link, "get_state").await;
            link.send_json(&json!({
                "type": "response",
                "request_id": frame["request_id"],
                "data": {"energy": 7}
            }));

            let response = pending.await.expect("join").expect("response");
            assert_eq!(response["energy"], 7);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_fails_pending_requests() {
    LocalSet::new()
        .run_until(async {
            let mut h = harness(test_config()).await;
            let mut link = h.connect().await;

            let client = h.client.clone();
            let first = spawn_local({
                let client = client.clone();
                async move { client.request("a", json!({"id": 1})).await }
            });
            let second = spawn_local(async move { client.request("b", json!({"id": 2})).await });
            recv_kind(&mut link, "a").await;
            recv_kind(&mut link, "b").await;
            assert_eq!(h.client.pending_requests(), 2);

            h.client.disconnect().await.expect("disconnect");

            assert_eq!(first.await.expect("join"), Err(RequestError::ConnectionClosed));
            assert_eq!(second.await.expect("join"), Err(RequestError::ConnectionClosed));
            assert_eq!(h.client.metrics().requests_failed, 2);
        })
        .await;
}
