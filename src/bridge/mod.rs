/// Bridge transport: signed/authenticated JSON requests against the
/// central directory service.
///
/// One primitive, `request`, carries the whole REST surface. Parameters
/// become the query string for GET/DELETE and the JSON body for every
/// other method; a unique textual nonce is injected into every request
/// before encoding so that signed requests can never be replayed.
pub mod auth;
pub mod models;

use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use auth::Auth;
use models::{
    Bucket, Contact, FileEntry, Frame, Pointer, PublicKeyEntry, ShardDescriptor, TokenGrant,
    UserAccount,
};

/// Parameter key for the per-request replay nonce.
const NONCE_PARAM: &str = "__nonce";

/// Authenticated JSON client for the bridge REST API.
#[derive(Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    base_uri: String,
    auth: Arc<Auth>,
}

impl BridgeClient {
    pub fn new(base_uri: String, auth: Auth) -> Result<Self> {
        let base_uri = base_uri.trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_uri)
            .map_err(|e| EngineError::Config(format!("Invalid bridge URI: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_uri,
            auth: Arc::new(auth),
        })
    }

    /// Issue a request against the bridge and decode the JSON response.
    ///
    /// On HTTP >= 400 this fails with [`EngineError::Bridge`] carrying the
    /// body's `error` field (or the raw body when it is not JSON); network
    /// failures surface as [`EngineError::Transport`].
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Value,
    ) -> Result<T> {
        self.request_with_headers(method, path, params, &[]).await
    }

    /// `request` plus extra headers (the pointer window fetch carries its
    /// PULL token as `x-token`).
    pub async fn request_with_headers<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Value,
        headers: &[(&str, &str)],
    ) -> Result<T> {
        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(EngineError::Transport(format!(
                    "request params must be a JSON object, got {other}"
                )))
            }
        };
        params.insert(
            NONCE_PARAM.to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );

        let uses_query = method == Method::GET || method == Method::DELETE;
        let payload = if uses_query {
            encode_query(&params)
        } else {
            serde_json::to_string(&Value::Object(params.clone()))?
        };

        let url = if uses_query && !payload.is_empty() {
            format!("{}{}?{}", self.base_uri, path, payload)
        } else {
            format!("{}{}", self.base_uri, path)
        };

        let mut builder = self.http.request(method.clone(), &url);
        if !uses_query {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(payload.clone());
        }
        builder = self.auth.decorate(builder, &method, path, &payload);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        debug!(method = %method, path, "bridge request");
        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.as_u16() >= 400 {
            let message = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_owned))
                .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned());
            return Err(EngineError::Bridge {
                status: status.as_u16(),
                message,
            });
        }

        // Some endpoints (DELETE in particular) answer with an empty body.
        let body = if body.is_empty() {
            bytes::Bytes::from_static(b"null")
        } else {
            body
        };
        serde_json::from_slice(&body).map_err(EngineError::from)
    }

    // -- directory ---------------------------------------------------------

    /// GET `/` — bridge API information.
    pub async fn get_info(&self) -> Result<Value> {
        self.request(Method::GET, "/", json!({})).await
    }

    /// GET `/contacts` — page through the contact directory.
    pub async fn get_contact_list(&self, params: Value) -> Result<Vec<Contact>> {
        self.request(Method::GET, "/contacts", params).await
    }

    /// GET `/contacts/{nodeId}`.
    pub async fn get_contact(&self, node_id: &str) -> Result<Contact> {
        self.request(Method::GET, &format!("/contacts/{node_id}"), json!({}))
            .await
    }

    // -- account -----------------------------------------------------------

    /// POST `/users` — register an account. The password is hashed
    /// client-side; the bridge never sees it in plaintext.
    pub async fn create_user(&self, email: &str, password: &str) -> Result<UserAccount> {
        let params = json!({
            "email": email,
            "password": crate::crypto::hash::sha256_hex(password.as_bytes()),
        });
        self.request(Method::POST, "/users", params).await
    }

    /// DELETE `/users/{email}`.
    pub async fn destroy_user(&self, email: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/users/{email}"), json!({}))
            .await
    }

    /// PATCH `/users/{email}` — begin a password reset.
    pub async fn reset_password(&self, email: &str, new_password: &str) -> Result<()> {
        let params = json!({
            "password": crate::crypto::hash::sha256_hex(new_password.as_bytes()),
        });
        self.request(Method::PATCH, &format!("/users/{email}"), params)
            .await
    }

    // -- public keys -------------------------------------------------------

    /// GET `/keys`.
    pub async fn get_public_keys(&self) -> Result<Vec<PublicKeyEntry>> {
        self.request(Method::GET, "/keys", json!({})).await
    }

    /// POST `/keys`.
    pub async fn add_public_key(&self, key: &str) -> Result<PublicKeyEntry> {
        self.request(Method::POST, "/keys", json!({ "key": key }))
            .await
    }

    /// DELETE `/keys/{key}`.
    pub async fn destroy_public_key(&self, key: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/keys/{key}"), json!({}))
            .await
    }

    // -- buckets -----------------------------------------------------------

    /// GET `/buckets`.
    pub async fn get_buckets(&self) -> Result<Vec<Bucket>> {
        self.request(Method::GET, "/buckets", json!({})).await
    }

    /// GET `/buckets/{id}`.
    pub async fn get_bucket(&self, bucket_id: &str) -> Result<Bucket> {
        self.request(Method::GET, &format!("/buckets/{bucket_id}"), json!({}))
            .await
    }

    /// POST `/buckets`.
    pub async fn create_bucket(&self, name: &str) -> Result<Bucket> {
        self.request(Method::POST, "/buckets", json!({ "name": name }))
            .await
    }

    /// PATCH `/buckets/{id}`.
    pub async fn update_bucket(&self, bucket_id: &str, updates: Value) -> Result<Bucket> {
        self.request(Method::PATCH, &format!("/buckets/{bucket_id}"), updates)
            .await
    }

    /// DELETE `/buckets/{id}`.
    pub async fn destroy_bucket(&self, bucket_id: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/buckets/{bucket_id}"), json!({}))
            .await
    }

    /// GET `/buckets/{id}/files`.
    pub async fn list_files_in_bucket(&self, bucket_id: &str) -> Result<Vec<FileEntry>> {
        self.request(
            Method::GET,
            &format!("/buckets/{bucket_id}/files"),
            json!({}),
        )
        .await
    }

    /// DELETE `/buckets/{id}/files/{file}`.
    pub async fn remove_file_from_bucket(&self, bucket_id: &str, file_id: &str) -> Result<()> {
        self.request(
            Method::DELETE,
            &format!("/buckets/{bucket_id}/files/{file_id}"),
            json!({}),
        )
        .await
    }

    /// POST `/buckets/{id}/mirrors` — ask the bridge to establish mirrors
    /// for a file.
    pub async fn replicate_file_from_bucket(
        &self,
        bucket_id: &str,
        file_id: &str,
        redundancy: Option<usize>,
    ) -> Result<Value> {
        let mut params = json!({ "file": file_id });
        if let Some(redundancy) = redundancy {
            params["redundancy"] = json!(redundancy);
        }
        self.request(
            Method::POST,
            &format!("/buckets/{bucket_id}/mirrors"),
            params,
        )
        .await
    }

    /// POST `/buckets/{id}/tokens` — a short-lived PUSH or PULL token.
    pub async fn create_token(&self, bucket_id: &str, operation: &str) -> Result<TokenGrant> {
        self.request(
            Method::POST,
            &format!("/buckets/{bucket_id}/tokens"),
            json!({ "operation": operation }),
        )
        .await
    }

    // -- frames ------------------------------------------------------------

    /// POST `/frames` — open a staging frame.
    pub async fn create_frame(&self) -> Result<Frame> {
        self.request(Method::POST, "/frames", json!({})).await
    }

    /// GET `/frames`.
    pub async fn get_frames(&self) -> Result<Vec<Frame>> {
        self.request(Method::GET, "/frames", json!({})).await
    }

    /// GET `/frames/{id}`.
    pub async fn get_frame(&self, frame_id: &str) -> Result<Frame> {
        self.request(Method::GET, &format!("/frames/{frame_id}"), json!({}))
            .await
    }

    /// DELETE `/frames/{id}`.
    pub async fn destroy_frame(&self, frame_id: &str) -> Result<()> {
        self.request(Method::DELETE, &format!("/frames/{frame_id}"), json!({}))
            .await
    }

    /// PUT `/frames/{id}` — add a shard descriptor and receive a contract
    /// pointer. Retries up to `retries` times with no backoff; each attempt
    /// is a fresh request with a fresh nonce. Cancelling the token zeroes
    /// the remaining budget and discards the in-flight response.
    pub async fn add_shard_to_frame(
        &self,
        frame_id: &str,
        shard: &ShardDescriptor,
        retries: usize,
        cancel: &CancellationToken,
    ) -> Result<Pointer> {
        let params = serde_json::to_value(shard)?;
        let path = format!("/frames/{frame_id}");
        let mut last_err = EngineError::Transport("no contract attempts made".to_string());

        for attempt in 1..=retries.max(1) {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                res = self.request::<Pointer>(Method::PUT, &path, params.clone()) => res,
            };
            match outcome {
                Ok(pointer) => return Ok(pointer),
                Err(e) => {
                    debug!(
                        shard = shard.index,
                        attempt,
                        error = %e,
                        "contract negotiation attempt failed"
                    );
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    /// GET `/buckets/{id}/files/{file}` with an `x-token` header — resolve
    /// a window of shard pointers.
    pub async fn get_file_pointers(
        &self,
        bucket_id: &str,
        token: &str,
        file_id: &str,
        skip: usize,
        limit: usize,
        exclude: &[String],
    ) -> Result<Vec<Pointer>> {
        let mut params = json!({ "skip": skip, "limit": limit });
        if !exclude.is_empty() {
            params["exclude"] = json!(exclude.join(","));
        }
        self.request_with_headers(
            Method::GET,
            &format!("/buckets/{bucket_id}/files/{file_id}"),
            params,
            &[("x-token", token)],
        )
        .await
    }

    /// POST `/buckets/{id}/files` — finalize a staged frame into a bucket
    /// entry.
    pub async fn create_entry_from_frame(
        &self,
        bucket_id: &str,
        frame_id: &str,
        filename: &str,
        mimetype: &str,
    ) -> Result<FileEntry> {
        let params = json!({
            "frame": frame_id,
            "mimetype": mimetype,
            "filename": filename,
        });
        self.request(Method::POST, &format!("/buckets/{bucket_id}/files"), params)
            .await
    }
}

/// URL-encode a parameter map into a query string. `serde_json`'s map is
/// ordered by key, so the encoding (and therefore the request signature)
/// is deterministic.
fn encode_query(params: &Map<String, Value>) -> String {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Null => continue,
            other => other.to_string(),
        };
        pairs.push(format!(
            "{}={}",
            urlencoding::encode(key),
            urlencoding::encode(&rendered)
        ));
    }
    pairs.join("&")
}
