//! Integration tests: gateway model operations against a mock Ollama server.

mod common;

use parley::gateway::ModelStatusChanged;
use parley::ServiceError;
use serde_json::json;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn list_models_normalizes_entries() {
    let mock = common::spawn_mock().await;
    mock.state
        .set_tags(json!({ "models": [{ "name": "codellama", "size": 100, "modified_at": "t" }] }));
    let gateway = mock.gateway();

    let models = gateway.list_models().await.expect("list models");
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].name, "codellama");
    assert_eq!(models[0].size, 100);
    assert_eq!(models[0].modified.as_deref(), Some("t"));
}

#[tokio::test]
async fn list_models_without_models_array_is_invalid_and_not_retried() {
    let mock = common::spawn_mock().await;
    mock.state.set_tags(json!({ "unexpected": true }));
    let gateway = mock.gateway();

    let err = gateway.list_models().await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidResponseFormat(_)), "{:?}", err);
    assert_eq!(mock.state.tags_hits(), 1);
}

#[tokio::test]
async fn check_status_reports_models_when_connected() {
    let mock = common::spawn_mock().await;
    mock.state.add_model("llama3.2:latest", 2_000);
    let gateway = mock.gateway();

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);
    let _sub = gateway
        .connection_status_events()
        .subscribe(move |r| sink.lock().unwrap().push(r.connected));

    let report = gateway.check_status().await;
    assert!(report.connected);
    assert!(report.error.is_none());
    assert_eq!(report.models[0].name, "llama3.2:latest");
    assert_eq!(*reports.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn check_status_never_fails_on_refused_connection() {
    let gateway = common::unreachable_gateway();
    let report = gateway.check_status().await;
    assert!(!report.connected);
    assert!(report.models.is_empty());
    let error = report.error.expect("error message");
    assert!(!error.is_empty());
}

#[tokio::test]
async fn unreachable_list_models_exhausts_retries() {
    let gateway = common::unreachable_gateway();
    let err = gateway.list_models().await.unwrap_err();
    match err {
        ServiceError::MaxRetriesExceeded { attempts, last } => {
            assert_eq!(attempts, 2);
            assert!(last.is_connection_refused(), "{:?}", last);
        }
        other => panic!("expected MaxRetriesExceeded, got {:?}", other),
    }
}

#[tokio::test]
async fn pull_and_delete_do_not_refresh_on_their_own() {
    let mock = common::spawn_mock().await;
    let gateway = mock.gateway();

    let pulled = gateway.pull_model("mistral").await.expect("pull");
    assert_eq!(pulled.status, "success");
    assert_eq!(*mock.state.pulled.lock().unwrap(), vec!["mistral".to_string()]);
    assert_eq!(mock.state.tags_hits(), 0);

    gateway.delete_model("mistral").await.expect("delete");
    assert_eq!(*mock.state.deleted.lock().unwrap(), vec!["mistral".to_string()]);
    assert_eq!(mock.state.tags_hits(), 0);
    assert!(gateway.list_models().await.unwrap().is_empty());
}

#[tokio::test]
async fn get_model_info_maps_404_to_model_not_found() {
    let mock = common::spawn_mock().await;
    let gateway = mock.gateway();
    let err = gateway.get_model_info("ghost").await.unwrap_err();
    assert_eq!(err, ServiceError::ModelNotFound("model 'ghost' not found".into()));
}

#[tokio::test]
async fn check_model_health_records_and_always_emits() {
    let mock = common::spawn_mock().await;
    mock.state.add_model("codellama", 100);
    let gateway = mock.gateway();

    let events: Arc<Mutex<Vec<ModelStatusChanged>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _sub = gateway
        .model_status_events()
        .subscribe(move |e| sink.lock().unwrap().push(e.clone()));

    let ok = gateway.check_model_health("codellama").await;
    assert!(ok.available);
    assert_eq!(ok.size, Some(100));
    assert_eq!(ok.digest.as_deref(), Some("sha256:codellama"));

    let missing = gateway.check_model_health("ghost").await;
    assert!(!missing.available);
    assert!(missing.error.as_deref().unwrap_or_default().contains("not found"));

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].name, "codellama");
    assert_eq!(events[1].name, "ghost");
    assert_eq!(gateway.model_status("codellama"), Some(ok));
    assert_eq!(gateway.model_status("ghost"), Some(missing));
    assert_eq!(gateway.model_statuses().len(), 2);
}

#[tokio::test]
async fn set_base_url_applies_to_later_calls() {
    let mock = common::spawn_mock().await;
    let gateway = common::unreachable_gateway();
    assert!(!gateway.check_status().await.connected);

    gateway.set_base_url(mock.base_url.clone());
    assert_eq!(gateway.base_url(), mock.base_url);
    assert!(gateway.check_status().await.connected);
}

#[tokio::test]
async fn pull_and_delete_update_model_status() {
    let mock = common::spawn_mock().await;
    mock.state.add_model("codellama", 100);
    let gateway = mock.gateway();

    let events: Arc<Mutex<Vec<ModelStatusChanged>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let _sub = gateway
        .model_status_events()
        .subscribe(move |e| sink.lock().unwrap().push(e.clone()));

    assert!(gateway.check_model_health("codellama").await.available);
    gateway.delete_model("codellama").await.expect("delete");
    let deleted = gateway.model_status("codellama").expect("status recorded");
    assert!(!deleted.available);
    assert_eq!(deleted.error.as_deref(), Some("deleted"));
    assert!(deleted.size.is_none());

    gateway.pull_model("mistral").await.expect("pull");
    let pulled = gateway.model_status("mistral").expect("status recorded");
    assert!(pulled.available);
    assert_eq!(pulled.size, Some(42));

    let names: Vec<String> = events.lock().unwrap().iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, vec!["codellama", "codellama", "mistral"]);
}
