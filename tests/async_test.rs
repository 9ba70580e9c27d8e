//! Async validation and derivation: supersession, settling, transport

use dynaform::form::{AsyncTask, Completion};
use dynaform::validation::HttpRequest;
use dynaform::{DiagnosticCode, Dependencies, Form, FormConfig, ValidationError};
use futures::FutureExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const USERNAME: &str = r#"
fields:
  - key: username
    type: input
    minLength: 3
    validators:
      - type: customAsync
        functionName: usernameFree
"#;

fn username_deps(calls: Arc<AtomicUsize>) -> Dependencies {
    Dependencies::new().async_validator_fn("usernameFree", move |input| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if input.value == json!("taken") {
                Ok(Some(ValidationError::new("usernameTaken")))
            } else {
                Ok(None)
            }
        }
        .boxed()
    })
}

fn username_form(calls: Arc<AtomicUsize>) -> Form {
    let config = FormConfig::from_yaml(USERNAME).unwrap();
    Form::new(config, username_deps(calls), json!({}))
}

#[tokio::test]
async fn test_later_request_wins() {
    let mut form = username_form(Arc::new(AtomicUsize::new(0)));

    let first = form.set_value("username", json!("taken")).unwrap().tasks;
    let second = form.set_value("username", json!("fresh")).unwrap().tasks;
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert!(form.field_state("username").unwrap().pending);

    let later = second.into_iter().next().unwrap().run().await;
    assert!(form.apply(later).is_empty());
    let earlier = first.into_iter().next().unwrap().run().await;
    assert!(form.apply(earlier).is_empty());

    let state = form.field_state("username").unwrap();
    assert!(!state.pending);
    assert!(state.errors.is_empty());
}

#[tokio::test]
async fn test_async_error_applies() {
    let mut form = username_form(Arc::new(AtomicUsize::new(0)));
    let tasks = form.set_value("username", json!("taken")).unwrap().tasks;
    form.settle(tasks).await;

    let state = form.field_state("username").unwrap();
    assert_eq!(state.errors, vec![ValidationError::new("usernameTaken")]);
    assert!(!form.is_valid());
}

#[test]
fn test_async_skipped_while_sync_invalid() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut form = username_form(calls.clone());
    let outcome = form.set_value("username", json!("ab")).unwrap();
    assert!(outcome.tasks.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!form.field_state("username").unwrap().pending);
}

#[tokio::test]
async fn test_http_validator_with_transport() {
    let requests: Arc<Mutex<Vec<HttpRequest>>> = Arc::default();
    let seen = requests.clone();
    let deps = Dependencies::new().transport_fn(move |request| {
        seen.lock().unwrap().push(request.clone());
        async move {
            let free = request.query.get("name").map(String::as_str) != Some("admin");
            Ok(json!({"available": free}))
        }
        .boxed()
    });
    let config = FormConfig::from_yaml(
        r#"
fields:
  - key: handle
    type: input
    validators:
      - type: customHttp
        debounceMs: 5
        http:
          url: /api/handles
          queryParams:
            name: fieldValue
        responseMapping:
          validWhen: response.available
          errorKind: handleTaken
"#,
    )
    .unwrap();
    let mut form = Form::new(config, deps, json!({}));

    let tasks = form.set_value("handle", json!("admin")).unwrap().tasks;
    form.settle(tasks).await;
    assert_eq!(form.field_state("handle").unwrap().errors[0].kind, "handleTaken");

    let tasks = form.set_value("handle", json!("ada")).unwrap().tasks;
    form.settle(tasks).await;
    assert!(form.field_state("handle").unwrap().errors.is_empty());

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, "/api/handles");
}

#[tokio::test]
async fn test_missing_transport_is_diagnosed() {
    let config = FormConfig::from_yaml(
        r#"
fields:
  - key: handle
    type: input
    validators:
      - type: customHttp
        http:
          url: /api/handles
        responseMapping:
          validWhen: response.ok
"#,
    )
    .unwrap();
    let mut form = Form::new(config, Dependencies::new(), json!({}));
    let outcome = form.set_value("handle", json!("x")).unwrap();
    assert!(outcome.tasks.is_empty());
    assert!(form
        .diagnostics()
        .iter()
        .any(|d| d.code == DiagnosticCode::AsyncFailed));
}

const CITY: &str = r#"
fields:
  - key: zip
    type: input
    value: "10001"
  - key: city
    type: input
    derivations:
      - asyncFunctionName: lookupCity
        dependsOn: [zip]
        stopOnUserOverride: true
        debounceMs: 5
"#;

fn city_deps() -> Dependencies {
    Dependencies::new().async_derivation_fn("lookupCity", |input| {
        async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            match input.form_value["zip"].as_str() {
                Some("10001") => Ok(json!("New York")),
                Some("94103") => Ok(json!("San Francisco")),
                Some(other) => Err(format!("unknown zip {}", other)),
                None => Ok(Value::Null),
            }
        }
        .boxed()
    })
}

#[tokio::test]
async fn test_async_derivation_settles() {
    let config = FormConfig::from_yaml(CITY).unwrap();
    let mut form = Form::new(config, city_deps(), json!({}));

    let startup = form.take_tasks();
    assert_eq!(startup.len(), 1);
    assert!(matches!(startup[0], AsyncTask::Derivation(_)));
    form.settle(startup).await;
    assert_eq!(form.get("city"), Some(&json!("New York")));

    let tasks = form.set_value("zip", json!("94103")).unwrap().tasks;
    form.settle(tasks).await;
    assert_eq!(form.get("city"), Some(&json!("San Francisco")));

    let tasks = form.set_value("zip", json!("00000")).unwrap().tasks;
    form.settle(tasks).await;
    assert_eq!(form.get("city"), Some(&json!("San Francisco")));
    assert!(form
        .diagnostics()
        .iter()
        .any(|d| d.code == DiagnosticCode::AsyncFailed));
}

#[tokio::test]
async fn test_async_derivation_respects_override() {
    let config = FormConfig::from_yaml(CITY).unwrap();
    let mut form = Form::new(config, city_deps(), json!({}));
    let startup = form.take_tasks();

    form.set_value("city", json!("Gotham")).unwrap();
    let completion = startup.into_iter().next().unwrap().run().await;
    assert!(matches!(completion, Completion::Derivation(_)));
    assert!(form.apply(completion).is_empty());
    assert_eq!(form.get("city"), Some(&json!("Gotham")));

    let outcome = form.set_value("zip", json!("94103")).unwrap();
    assert!(outcome.tasks.is_empty());
}

const GATED: &str = r#"
fields:
  - key: check
    type: input
    value: true
  - key: username
    type: input
    validators:
      - type: customAsync
        functionName: usernameFree
        when:
          type: fieldValue
          fieldPath: check
          operator: equals
          value: true
"#;

#[tokio::test]
async fn test_async_error_follows_its_gate() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = FormConfig::from_yaml(GATED).unwrap();
    let mut form = Form::new(config, username_deps(calls.clone()), json!({}));

    let tasks = form.set_value("username", json!("taken")).unwrap().tasks;
    form.settle(tasks).await;
    assert_eq!(
        form.field_state("username").unwrap().errors,
        vec![ValidationError::new("usernameTaken")]
    );

    let outcome = form.set_value("check", json!(false)).unwrap();
    assert!(outcome.tasks.is_empty());
    assert!(form.field_state("username").unwrap().errors.is_empty());
    assert!(form.is_valid());

    let tasks = form.set_value("check", json!(true)).unwrap().tasks;
    assert_eq!(tasks.len(), 1);
    form.settle(tasks).await;
    assert_eq!(form.field_state("username").unwrap().errors.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_superseded_derivation_is_discarded() {
    let config = FormConfig::from_yaml(CITY).unwrap();
    let mut form = Form::new(config, city_deps(), json!({}));
    form.take_tasks();

    let first = form.set_value("zip", json!("94103")).unwrap().tasks;
    let second = form.set_value("zip", json!("10001")).unwrap().tasks;
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);

    let later = second.into_iter().next().unwrap().run().await;
    assert!(form.apply(later).is_empty());
    assert_eq!(form.get("city"), Some(&json!("New York")));

    let earlier = first.into_iter().next().unwrap().run().await;
    assert!(matches!(&earlier, Completion::Derivation(done) if done.result.is_ok()));
    assert!(form.apply(earlier).is_empty());
    assert_eq!(form.get("city"), Some(&json!("New York")));
}

#[tokio::test]
async fn test_failed_derivation_flags_the_field() {
    let config = FormConfig::from_yaml(
        r#"
fields:
  - key: zip
    type: input
    value: "10001"
  - key: city
    type: input
    derivations:
      - asyncFunctionName: lookupCity
        dependsOn: [zip]
        onError:
          action: error
          kind: cityUnknown
"#,
    )
    .unwrap();
    let mut form = Form::new(config, city_deps(), json!({}));
    let startup = form.take_tasks();
    form.settle(startup).await;

    let tasks = form.set_value("zip", json!("00000")).unwrap().tasks;
    form.settle(tasks).await;
    let state = form.field_state("city").unwrap();
    assert_eq!(form.get("city"), Some(&json!("New York")));
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].kind, "cityUnknown");
    assert_eq!(state.errors[0].params["message"], json!("unknown zip 00000"));

    let tasks = form.set_value("zip", json!("94103")).unwrap().tasks;
    form.settle(tasks).await;
    assert_eq!(form.get("city"), Some(&json!("San Francisco")));
    assert!(form.field_state("city").unwrap().errors.is_empty());
}
