//! HTTP implementation of the RPC boundary
//!
//! Maps the narrow `call(method, params, timeout)` interface onto the REST
//! surfaces the services expose. Error bodies are rehydrated into their
//! original taxonomy kinds so callers never need to inspect status codes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{RpcTransport, TransportFactory};
use crate::protocol::ErrorBody;
use crate::{Error, Result};

/// HTTP verb + path for one RPC method
#[derive(Debug)]
enum Route {
    Get(String),
    Post(String),
    Put(String),
    Delete(String),
}

fn param_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::BadRequest(format!("missing '{}' parameter", key)))
}

/// Translate an RPC method into a concrete route on the peer
fn route_for(method: &str, params: &Value) -> Result<Route> {
    let route = match method {
        "healthCheck" => Route::Get("/health".to_string()),
        "status" => Route::Get("/api/status".to_string()),
        "runInference" => Route::Post(format!("/api/inference/{}", param_str(params, "modelId")?)),
        "checkCapacity" => match params.get("modelId").and_then(Value::as_str) {
            Some(model_id) => Route::Get(format!("/api/capacity?modelId={}", model_id)),
            None => Route::Get("/api/capacity".to_string()),
        },
        "loadModel" => Route::Post(format!("/api/models/{}/load", param_str(params, "modelId")?)),
        "unloadModel" => {
            Route::Post(format!("/api/models/{}/unload", param_str(params, "modelId")?))
        }
        "getModel" => Route::Get(format!("/api/models/{}", param_str(params, "modelId")?)),
        "storeModel" => Route::Post("/api/models".to_string()),
        "updateModel" => Route::Put(format!("/api/models/{}", param_str(params, "modelId")?)),
        "searchModels" => Route::Post("/api/models/search".to_string()),
        "deleteModel" => Route::Delete(format!("/api/models/{}", param_str(params, "modelId")?)),
        "listModels" => {
            let mut query = Vec::new();
            if let Some(model_type) = params.get("type").and_then(Value::as_str) {
                query.push(format!("type={}", model_type));
            }
            if let Some(limit) = params.get("limit").and_then(Value::as_u64) {
                query.push(format!("limit={}", limit));
            }
            if query.is_empty() {
                Route::Get("/api/models".to_string())
            } else {
                Route::Get(format!("/api/models?{}", query.join("&")))
            }
        }
        "registerWorker" => Route::Post("/api/workers/register".to_string()),
        "unregisterWorker" => Route::Post(format!(
            "/api/workers/{}/unregister",
            param_str(params, "workerId")?
        )),
        "findWorkers" => Route::Post("/api/workers/find".to_string()),
        "routeInference" => Route::Post("/api/inference/route".to_string()),
        other => {
            return Err(Error::TransportError(format!(
                "unknown RPC method: {}",
                other
            )))
        }
    };
    Ok(route)
}

/// Rehydrate a typed error from a failed response body
fn error_from_response(status: u16, body: &[u8]) -> Error {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        let error_value = value.get("error").cloned().unwrap_or(value);
        if let Ok(body) = serde_json::from_value::<ErrorBody>(error_value) {
            return Error::from_wire(&body.kind, body.message);
        }
    }
    Error::TransportError(format!("peer returned HTTP {}", status))
}

/// RPC client for one peer service
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for the peer at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Create a transport sharing an existing connection pool
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, client }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let url_for = |path: &str| format!("{}{}", self.base_url, path);

        let request = match route_for(method, &params)? {
            Route::Get(path) => self.client.get(url_for(&path)),
            Route::Post(path) => self.client.post(url_for(&path)).json(&params),
            Route::Put(path) => self.client.put(url_for(&path)).json(&params),
            Route::Delete(path) => self.client.delete(url_for(&path)),
        };

        let response = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::TransportError(format!(
                    "{} to {} timed out after {}ms",
                    method,
                    self.base_url,
                    timeout.as_millis()
                ))
            } else {
                Error::TransportError(format!("{} to {} failed: {}", method, self.base_url, e))
            }
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::TransportError(format!("reading response body: {}", e)))?;

        if !status.is_success() {
            return Err(error_from_response(status.as_u16(), &body));
        }

        serde_json::from_slice(&body)
            .map_err(|e| Error::TransportError(format!("decoding response body: {}", e)))
    }

    fn address(&self) -> &str {
        &self.base_url
    }
}

/// Factory handing out `HttpTransport`s that share one connection pool
#[derive(Default)]
pub struct HttpTransportFactory {
    client: reqwest::Client,
}

impl HttpTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransportFactory for HttpTransportFactory {
    fn connect(&self, address: &str) -> Arc<dyn RpcTransport> {
        Arc::new(HttpTransport::with_client(address, self.client.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_route_interpolates_model_id() {
        let route = route_for("runInference", &json!({"modelId": "m1"})).unwrap();
        match route {
            Route::Post(path) => assert_eq!(path, "/api/inference/m1"),
            _ => panic!("expected POST route"),
        }
    }

    #[test]
    fn test_unknown_method_rejected() {
        let err = route_for("teleport", &json!({})).unwrap_err();
        assert!(matches!(err, Error::TransportError(_)));
    }

    #[test]
    fn test_error_body_rehydrates_kind() {
        let body = br#"{"success":false,"error":{"kind":"capacity_exceeded","message":"at 4/4"}}"#;
        let err = error_from_response(503, body);
        assert!(matches!(err, Error::CapacityExceeded(_)));
    }

    #[test]
    fn test_opaque_error_body_becomes_transport_error() {
        let err = error_from_response(502, b"<html>bad gateway</html>");
        assert!(matches!(err, Error::TransportError(_)));
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let transport = HttpTransport::new("http://localhost:9000/");
        assert_eq!(transport.address(), "http://localhost:9000");
    }
}
