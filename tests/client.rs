//! Typed client against an in-process app.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::{Method, StatusCode};
use chrono::{TimeZone, Utc};
use strand::config::RetryConfig;
use strand::{App, Client, ClientError, Context, Decoded, Error, RichValue};

use common::{body_json, get};

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig { max_retries, base_delay_ms: 1, max_delay_ms: 2 }
}

#[tokio::test]
async fn round_trips_rich_values_through_the_envelope() {
    let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let app = App::new().get("/now", move |_cx: Context| async move {
        RichValue::Object(vec![
            ("at".to_string(), RichValue::Date(when)),
            ("tags".to_string(), RichValue::Set(vec![RichValue::from("a")])),
        ])
    });
    let client = Client::local(app);
    let decoded = client.get("/now").send().await.unwrap();
    let value = decoded.into_value().unwrap();
    assert_eq!(value.get("at"), Some(&RichValue::Date(when)));
    assert_eq!(
        value.get("tags"),
        Some(&RichValue::Set(vec![RichValue::from("a")]))
    );
}

#[tokio::test]
async fn request_body_arrives_as_a_rich_value() {
    let app = App::new().post("/echo", |cx: Context| async move {
        let body = cx.body_value().await?;
        Ok::<RichValue, Error>(body)
    });
    let client = Client::local(app);
    let sent = RichValue::Map(vec![(RichValue::from("k"), RichValue::from(1i64))]);
    let decoded = client.post("/echo").body(sent.clone()).send().await.unwrap();
    assert_eq!(decoded.into_value(), Some(sent));
}

#[tokio::test]
async fn server_errors_retry_up_to_the_bound() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counted = attempts.clone();
    let app = App::new().get("/flaky", move |_cx: Context| {
        let attempts = counted.clone();
        async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<RichValue, Error>(Error::status(500, "still broken"))
        }
    });
    let client = Client::local(app).retry(fast_retry(2));
    let result = client.get("/flaky").send().await;
    match result {
        Err(ClientError::Status { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected status error, got {other:?}"),
    }
    // Initial attempt plus two retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_errors_never_retry() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counted = attempts.clone();
    let app = App::new().get("/reject", move |_cx: Context| {
        let attempts = counted.clone();
        async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<RichValue, Error>(Error::status(400, "bad input"))
        }
    });
    let client = Client::local(app).retry(fast_retry(5));
    match client.get("/reject").send().await {
        Err(ClientError::Status { status, payload }) => {
            assert_eq!(status, 400);
            assert_eq!(payload, RichValue::Error { message: "bad input".to_string() });
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn recovery_mid_retry_returns_the_success() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counted = attempts.clone();
    let app = App::new().get("/warming", move |_cx: Context| {
        let attempts = counted.clone();
        async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::status(503, "warming up"))
            } else {
                Ok(RichValue::from("ready"))
            }
        }
    });
    let client = Client::local(app).retry(fast_retry(3));
    let decoded = client.get("/warming").send().await.unwrap();
    assert_eq!(decoded.into_value(), Some(RichValue::from("ready")));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn plain_json_mode_drops_metadata_for_non_rpc_callers() {
    let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let build = move || {
        App::new()
            .plain_json_unless_rpc(true)
            .get("/when", move |_cx: Context| async move {
                RichValue::Object(vec![("at".to_string(), RichValue::Date(when))])
            })
    };

    // A plain caller (no marker header) gets unannotated JSON.
    let json = body_json(build().handle(get("/when")).await).await;
    assert_eq!(json["at"], serde_json::json!("2024-05-01T12:00:00.000Z"));
    assert!(json.get("__richValueMeta").is_none());

    // The client carries the marker and still gets the typed value back.
    let decoded = Client::local(build()).get("/when").send().await.unwrap();
    let value = decoded.into_value().unwrap();
    assert_eq!(value.get("at"), Some(&RichValue::Date(when)));
}

#[tokio::test]
async fn query_parameters_flatten_onto_the_wire() {
    let app = App::new().get("/search", |cx: Context| async move {
        let tags = cx.query().get("tag").cloned().unwrap_or_default();
        RichValue::Array(tags.into_iter().map(RichValue::from).collect())
    });
    let client = Client::local(app);
    let decoded = client
        .get("/search")
        .query("tag", serde_json::json!(["rust", "http"]))
        .send()
        .await
        .unwrap();
    assert_eq!(
        decoded.into_value(),
        Some(RichValue::Array(vec![
            RichValue::from("rust"),
            RichValue::from("http")
        ]))
    );
}

#[tokio::test]
async fn file_parts_switch_the_request_to_multipart() {
    let app = App::new().post("/upload", |cx: Context| async move {
        let content_type = cx.header("content-type").unwrap_or_default().to_string();
        let bytes = cx.body_bytes().await?;
        let parts = strand::multipart::decode(&content_type, &bytes)?;
        let names: Vec<RichValue> = parts
            .iter()
            .map(|p| RichValue::from(p.name.as_str()))
            .collect();
        Ok::<RichValue, Error>(RichValue::Array(names))
    });
    let client = Client::local(app);
    let decoded = client
        .post("/upload")
        .field("kind", "avatar")
        .file("image", "me.png", "image/png", vec![1u8, 2, 3])
        .send()
        .await
        .unwrap();
    assert_eq!(
        decoded.into_value(),
        Some(RichValue::Array(vec![
            RichValue::from("kind"),
            RichValue::from("image")
        ]))
    );
}

#[tokio::test]
async fn request_hooks_run_before_send() {
    let app = App::new().get("/whoami", |cx: Context| async move {
        RichValue::from(cx.header("x-tenant").unwrap_or("anonymous"))
    });
    let client = Client::local(app).on_request(|parts| {
        parts
            .headers
            .insert("x-tenant", axum::http::HeaderValue::from_static("acme"));
    });
    let decoded = client.get("/whoami").send().await.unwrap();
    assert_eq!(decoded.into_value(), Some(RichValue::from("acme")));
}

#[tokio::test]
async fn response_hooks_observe_every_attempt() {
    let statuses: Arc<std::sync::Mutex<Vec<u16>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = statuses.clone();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counted = attempts.clone();
    let app = App::new().get("/once-broken", move |_cx: Context| {
        let attempts = counted.clone();
        async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::status(500, "first attempt fails"))
            } else {
                Ok(RichValue::Null)
            }
        }
    });
    let client = Client::local(app)
        .retry(fast_retry(2))
        .on_response(move |status, _headers| {
            seen.lock().unwrap().push(status.as_u16());
        });
    client.get("/once-broken").send().await.unwrap();
    assert_eq!(*statuses.lock().unwrap(), vec![500, 200]);
}

#[tokio::test]
async fn non_json_text_reparses_when_it_is_a_literal() {
    use axum::body::Body;
    use axum::response::Response;
    let app = App::new()
        .get("/number", |_cx: Context| async {
            Response::builder()
                .header("content-type", "text/plain")
                .body(Body::from("17"))
                .unwrap()
        })
        .get("/prose", |_cx: Context| async {
            Response::builder()
                .header("content-type", "text/plain")
                .body(Body::from("not json at all"))
                .unwrap()
        });
    let client = Client::local(app);
    match client.get("/number").send().await.unwrap() {
        Decoded::Value(v) => assert_eq!(v, RichValue::from(17i64)),
        other => panic!("expected value, got {other:?}"),
    }
    match client.get("/prose").send().await.unwrap() {
        Decoded::Text(t) => assert_eq!(t, "not json at all"),
        other => panic!("expected text, got {other:?}"),
    }
}

#[tokio::test]
async fn not_found_surfaces_as_a_404_status_error() {
    let client = Client::local(App::new());
    match client.request(Method::DELETE, "/nothing").send().await {
        Err(ClientError::Status { status, payload }) => {
            assert_eq!(status, StatusCode::NOT_FOUND.as_u16());
            assert_eq!(payload, RichValue::from("Not Found"));
        }
        other => panic!("expected 404, got {other:?}"),
    }
}
