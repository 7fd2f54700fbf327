//! Batch window behaviour against a scripted `/batch` endpoint.

use marketplace_gateway::batch::wire::BATCH_HEADER;
use marketplace_gateway::transport::{HttpRequest, ScriptedReply, ScriptedTransport};
use marketplace_gateway::{BatchConfig, Error, GatewayClient, GatewayConfig, RequestDescriptor};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Answers `/batch` in reverse order. `/missing` members get no entry and
/// `/gone` members a per-item 404; every other path echoes its URL.
fn backend(req: &HttpRequest) -> ScriptedReply {
    if req.path() != "/api/v1/batch" {
        return ScriptedReply::json(200, json!({"single": req.path()}));
    }
    let requests = req
        .body
        .as_ref()
        .and_then(|b| b.get("requests"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let responses: Vec<Value> = requests
        .iter()
        .rev()
        .filter_map(|r| {
            let id = r["id"].clone();
            match r["url"].as_str() {
                Some("/missing") => None,
                Some("/gone") => Some(json!({
                    "id": id,
                    "status": 404,
                    "error": {"message": "job not found", "code": "NOT_FOUND"}
                })),
                url => Some(json!({"id": id, "status": 200, "data": {"url": url}})),
            }
        })
        .collect();
    ScriptedReply::json(200, json!({"responses": responses}))
}

fn client(transport: &Arc<ScriptedTransport>, retries: u32) -> GatewayClient {
    let mut cfg = GatewayConfig::default();
    cfg.base_url = "http://backend/api/v1".to_string();
    cfg.throttle.requests_per_second = 0.0;
    cfg.retry.max_retries = retries;
    GatewayClient::builder()
        .config(cfg)
        .transport(transport.clone())
        .build()
        .unwrap()
}

/// GET, POST, PUT and DELETE in rotation; writes carry a body.
fn mixed(i: usize) -> RequestDescriptor {
    let url = format!("/jobs/{i}");
    let d = match i % 4 {
        0 => RequestDescriptor::get(url),
        1 => RequestDescriptor::post(url, json!({"title": format!("job {i}")})),
        2 => RequestDescriptor::put(url, json!({"budget": i * 100})),
        _ => RequestDescriptor::delete(url).with_body(json!({"reason": "filled"})),
    };
    d.with_id(format!("r{i}"))
}

#[tokio::test(start_paused = true)]
async fn full_window_is_one_call_with_matched_outcomes() {
    let transport = Arc::new(ScriptedTransport::new().with_handler(backend));
    let client = client(&transport, 3);
    let batcher = client.batcher();

    let descriptors: Vec<_> = (0..20).map(mixed).collect();
    let result = batcher.submit_all(descriptors.clone()).await;

    assert!(result.all_succeeded());
    assert_eq!(result.total_processed, 20);
    assert_eq!(transport.call_count(), 1);
    for i in 0..20 {
        let resp = result.outcome(i).unwrap().unwrap();
        assert_eq!(resp.data, json!({"url": format!("/jobs/{i}")}));
    }

    let sent = &transport.requests()[0].request;
    assert_eq!(sent.header(BATCH_HEADER), Some("true"));
    let entries = sent.body.as_ref().unwrap()["requests"].as_array().unwrap().clone();
    assert_eq!(entries.len(), 20);
    for (entry, d) in entries.iter().zip(&descriptors) {
        assert_eq!(entry["id"], json!(d.id));
        assert_eq!(entry["method"], json!(d.method.as_str()));
        assert_eq!(entry["url"], json!(d.url));
        match &d.body {
            Some(body) => assert_eq!(&entry["data"], body),
            None => assert!(entry.get("data").is_none()),
        }
    }
    assert_eq!(entries[1]["data"], json!({"title": "job 1"}));
    assert_eq!(entries[3]["method"], "DELETE");
    assert_eq!(batcher.stats().batches_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn partial_window_flushes_after_idle_delay() {
    let transport = Arc::new(ScriptedTransport::new().with_handler(backend));
    let client = client(&transport, 3);
    let batcher = client.batcher_with(BatchConfig::new().with_batch_delay(Duration::from_millis(50)));

    let start = tokio::time::Instant::now();
    let (a, b) = tokio::join!(
        batcher.submit(RequestDescriptor::get("/jobs/1")),
        batcher.submit(RequestDescriptor::get("/jobs/2")),
    );
    assert_eq!(a.unwrap().data, json!({"url": "/jobs/1"}));
    assert_eq!(b.unwrap().data, json!({"url": "/jobs/2"}));
    assert_eq!(transport.call_count(), 1);
    assert!(transport.requests()[0].at - start >= Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn unmatched_and_failed_members_fail_individually() {
    let transport = Arc::new(ScriptedTransport::new().with_handler(backend));
    let client = client(&transport, 3);
    let batcher = client.batcher();

    let result = batcher
        .submit_all(vec![
            RequestDescriptor::get("/jobs/1"),
            RequestDescriptor::get("/missing"),
            RequestDescriptor::get("/gone"),
        ])
        .await;

    assert_eq!(result.success_count(), 1);
    assert_eq!(result.failure_count(), 2);
    match result.outcome(1).unwrap().unwrap_err() {
        Error::BatchItem { status, message, .. } => {
            assert_eq!(*status, 500);
            assert_eq!(message, "No response received");
        }
        other => panic!("unexpected {other:?}"),
    }
    match result.outcome(2).unwrap().unwrap_err() {
        Error::BatchItem { status, message, code, .. } => {
            assert_eq!(*status, 404);
            assert_eq!(message, "job not found");
            assert_eq!(code.as_deref(), Some("NOT_FOUND"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_batch_call_falls_back_to_single_requests() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .push(ScriptedReply::json(503, json!({"message": "batch endpoint down"})))
            .with_handler(backend),
    );
    let client = client(&transport, 0);
    let batcher = client.batcher();

    let result = batcher
        .submit_all(vec![
            RequestDescriptor::get("/jobs/1"),
            RequestDescriptor::get("/jobs/2"),
            RequestDescriptor::get("/jobs/3"),
        ])
        .await;

    assert!(result.all_succeeded());
    assert_eq!(transport.call_count(), 4);
    assert_eq!(
        result.outcome(2).unwrap().unwrap().data,
        json!({"single": "/api/v1/jobs/3"})
    );
    assert_eq!(batcher.stats().fallbacks, 1);
}
