//! ActivityResult construction rules.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use activities_core::{ActivityError, ActivityMode, ActivityResult, ActivityResultCode, RedirectResponse};
use serde_json::json;

fn result(code: ActivityResultCode, data: serde_json::Value) -> ActivityResult {
    ActivityResult::new(code, Some(data), ActivityMode::Iframe, "https://host.example", true, true)
}

#[test]
fn data_survives_only_for_ok() {
    let payloads = [json!({ "x": 1 }), json!("secret"), json!([1, 2, 3]), json!(null)];
    for p in payloads {
        assert!(result(ActivityResultCode::Canceled, p.clone()).data().is_none());
        assert!(result(ActivityResultCode::Failed, p.clone()).data().is_none());
    }
    let ok = result(ActivityResultCode::Ok, json!({ "x": 1 }));
    assert!(ok.ok());
    assert_eq!(ok.data(), Some(&json!({ "x": 1 })));
    assert!(ok.error().is_none());
}

#[test]
fn failure_reason_becomes_error() {
    let failed = result(ActivityResultCode::Failed, json!("card declined"));
    assert!(!failed.ok());
    assert_eq!(failed.error().unwrap().message, "card declined");

    let failed = ActivityResult::new(
        ActivityResultCode::Failed,
        None,
        ActivityMode::Redirect,
        "https://host.example",
        false,
        false,
    );
    assert_eq!(failed.error().unwrap().message, "");
    assert!(!failed.secure_channel());

    assert!(result(ActivityResultCode::Canceled, json!("x")).error().is_none());
}

#[test]
fn outcome_resolution() {
    assert!(result(ActivityResultCode::Ok, json!(1)).into_outcome().is_ok());
    match result(ActivityResultCode::Canceled, json!(null)).into_outcome() {
        Err(ActivityError::Aborted) => {}
        other => panic!("expected abort, got {other:?}"),
    }
    match result(ActivityResultCode::Failed, json!("nope")).into_outcome() {
        Err(ActivityError::Failed(m)) => assert_eq!(m, "nope"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn redirect_response_wire_shape() {
    let resp = RedirectResponse {
        request_id: "r1".into(),
        origin: "https://host.example".into(),
        code: ActivityResultCode::Canceled,
        data: serde_json::Value::Null,
    };
    assert_eq!(
        serde_json::to_value(&resp).unwrap(),
        json!({ "requestId": "r1", "origin": "https://host.example", "code": "canceled", "data": null })
    );
}
