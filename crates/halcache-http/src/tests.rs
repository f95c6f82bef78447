use std::time::Duration;

use axum::{
  Json, Router,
  http::{HeaderMap, StatusCode, header},
  routing::get,
};
use halcache_core::{Error as CoreError, request::RestRequest, service::Transport};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::HttpTransport;

async fn item() -> Json<Value> {
  Json(json!({ "type": "item", "uuid": "1", "_links": { "self": { "href": "/items/1" } } }))
}

async fn create(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
  let content_type = headers
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .unwrap_or_default()
    .to_owned();
  (StatusCode::CREATED, Json(json!({ "echo": body, "contentType": content_type })))
}

async fn remove() -> StatusCode { StatusCode::NO_CONTENT }

async fn broken() -> (StatusCode, &'static str) {
  (StatusCode::INTERNAL_SERVER_ERROR, "<html>oops</html>")
}

async fn garbled() -> &'static str { "not json" }

async fn serve() -> String {
  let app = Router::new()
    .route("/items/1", get(item).delete(remove))
    .route("/items", axum::routing::post(create))
    .route("/broken", get(broken))
    .route("/garbled", get(garbled));
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();
  tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
  format!("http://{address}")
}

fn transport() -> HttpTransport { HttpTransport::new(Duration::from_secs(5)).unwrap() }

#[tokio::test]
async fn get_parses_json_bodies() {
  let base = serve().await;
  let response = transport()
    .execute(&RestRequest::get("r1", format!("{base}/items/1")))
    .await
    .unwrap();
  assert_eq!(response.status, 200);
  assert_eq!(response.body.unwrap()["uuid"], "1");
}

#[tokio::test]
async fn post_sends_the_body_as_json() {
  let base = serve().await;
  let request = RestRequest::post("r1", format!("{base}/items"), json!({ "name": "Draft" }));
  let response = transport().execute(&request).await.unwrap();
  assert_eq!(response.status, 201);
  let body = response.body.unwrap();
  assert_eq!(body["echo"]["name"], "Draft");
  assert_eq!(body["contentType"], "application/json");
}

#[tokio::test]
async fn empty_bodies_are_none() {
  let base = serve().await;
  let response = transport()
    .execute(&RestRequest::delete("r1", format!("{base}/items/1")))
    .await
    .unwrap();
  assert_eq!(response, halcache_core::service::RawResponse { status: 204, body: None });
}

#[tokio::test]
async fn error_statuses_are_responses() {
  let base = serve().await;
  let missing = transport()
    .execute(&RestRequest::get("r1", format!("{base}/nothing")))
    .await
    .unwrap();
  assert_eq!(missing.status, 404);

  let broken = transport()
    .execute(&RestRequest::get("r2", format!("{base}/broken")))
    .await
    .unwrap();
  assert_eq!(broken.status, 500);
  assert_eq!(broken.body, None);
}

#[tokio::test]
async fn unreadable_success_bodies_are_errors() {
  let base = serve().await;
  let result = transport()
    .execute(&RestRequest::get("r1", format!("{base}/garbled")))
    .await;
  assert!(matches!(result, Err(CoreError::Serialization(_))));
}

#[tokio::test]
async fn unreachable_hosts_are_transport_errors() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();
  drop(listener);

  let result = transport()
    .execute(&RestRequest::get("r1", format!("http://{address}/items")))
    .await;
  assert!(matches!(result, Err(CoreError::Transport(_))));
}
