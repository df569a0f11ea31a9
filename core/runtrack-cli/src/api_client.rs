//! HTTP implementation of the engine's remote store.
//!
//! Calls are blocking `ureq` requests moved onto tokio's blocking pool. The
//! engine bounds each call with its own timeout; the agent timeout here only
//! keeps abandoned blocking threads from hanging forever.

use async_trait::async_trait;
use rand::RngCore;
use runtrack_engine::config::RemoteConfig;
use runtrack_engine::{ApiError, RemoteStore, ServerErrorKind};
use runtrack_protocol::{
    CompletionReceipt, CompletionRequest, CreateSessionResponse, SegmentAck, SegmentUpload,
    SessionId,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const SESSIONS_PATH: &str = "running/sessions";
const AGENT_TIMEOUT_GRACE_SECS: u64 = 5;

pub struct HttpRemoteStore {
    agent: ureq::Agent,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemoteStore {
    pub fn new(config: &RemoteConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(
                config.request_timeout_secs + AGENT_TIMEOUT_GRACE_SECS,
            ))
            .build();
        Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn post(&self, url: &str) -> ureq::Request {
        let request = self.agent.post(url);
        match self.auth_token.as_deref() {
            Some(token) => request.set("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn send<T, F>(&self, call: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce() -> Result<ureq::Response, ureq::Error> + Send + 'static,
    {
        let joined = tokio::task::spawn_blocking(move || {
            let response = call().map_err(map_ureq_error)?;
            response
                .into_json::<T>()
                .map_err(|err| ApiError::Decode(err.to_string()))
        })
        .await;
        match joined {
            Ok(result) => result,
            Err(err) => Err(ApiError::Unknown(format!("request task failed: {}", err))),
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create_session(&self) -> Result<SessionId, ApiError> {
        let request = self.post(&self.url(SESSIONS_PATH));
        debug!(url = %request.url(), "Creating remote session");
        let response: CreateSessionResponse = self
            .send(move || request.send_json(serde_json::json!({})))
            .await?;
        Ok(response.session_id)
    }

    async fn append_segment(&self, upload: &SegmentUpload) -> Result<SegmentAck, ApiError> {
        let request = self.post(&self.url(&session_path(&upload.session_id, "segments")));
        let body = serde_json::to_value(upload).map_err(|err| ApiError::Unknown(err.to_string()))?;
        debug!(
            url = %request.url(),
            points = upload.points.len(),
            is_stopped = upload.is_stopped,
            "Appending segment"
        );
        self.send(move || request.send_json(body)).await
    }

    async fn complete_session(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionReceipt, ApiError> {
        let summary = serde_json::to_vec(&request.summary)
            .map_err(|err| ApiError::Unknown(err.to_string()))?;
        let boundary = make_boundary();
        let body = multipart_body(&boundary, &summary, request.artifact.as_deref());
        let http = self.post(&self.url(&session_path(&request.session_id, "complete"))).set(
            "Content-Type",
            &format!("multipart/form-data; boundary={}", boundary),
        );
        debug!(
            url = %http.url(),
            bytes = body.len(),
            has_artifact = request.artifact.is_some(),
            "Completing session"
        );
        self.send(move || http.send_bytes(&body)).await
    }
}

/// `SessionId` only admits URL-safe characters, so the id is a single path segment.
fn session_path(session_id: &SessionId, action: &str) -> String {
    format!("{}/{}/{}", SESSIONS_PATH, session_id.as_str(), action)
}

fn map_ureq_error(err: ureq::Error) -> ApiError {
    match err {
        ureq::Error::Status(code, _) => ApiError::Server(ServerErrorKind::from_status(code)),
        ureq::Error::Transport(transport) => ApiError::Network(transport.to_string()),
    }
}

fn make_boundary() -> String {
    let mut random = rand::thread_rng();
    format!("runtrack-{:016x}", random.next_u64())
}

/// `multipart/form-data` body with a JSON `summary` part and an optional
/// PNG `image` part.
pub fn multipart_body(boundary: &str, summary_json: &[u8], image: Option<&[u8]>) -> Vec<u8> {
    let mut body = Vec::with_capacity(summary_json.len() + image.map_or(0, <[u8]>::len) + 256);

    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"summary\"\r\n");
    body.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
    body.extend_from_slice(summary_json);
    body.extend_from_slice(b"\r\n");

    if let Some(image) = image {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"image\"; filename=\"route.png\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        body.extend_from_slice(image);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(base_url: &str) -> RemoteConfig {
        RemoteConfig {
            base_url: base_url.to_string(),
            ..RemoteConfig::default()
        }
    }

    #[test]
    fn joins_paths_without_double_slash() {
        let store = HttpRemoteStore::new(&remote("https://api.example.test/v1/"));
        assert_eq!(
            store.url("running/sessions"),
            "https://api.example.test/v1/running/sessions"
        );
    }

    #[test]
    fn multipart_contains_summary_and_image_parts() {
        let body = multipart_body("b0undary", br#"{"distance_meters":10.0}"#, Some(&[0x89, b'P']));
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--b0undary\r\n"));
        assert!(text.contains("name=\"summary\""));
        assert!(text.contains("{\"distance_meters\":10.0}\r\n"));
        assert!(text.contains("name=\"image\"; filename=\"route.png\""));
        assert!(text.ends_with("--b0undary--\r\n"));
    }

    #[test]
    fn multipart_without_image_has_single_part() {
        let body = multipart_body("b", b"{}", None);
        let text = String::from_utf8_lossy(&body);
        assert_eq!(text.matches("Content-Disposition").count(), 1);
        assert!(!text.contains("route.png"));
    }

    #[test]
    fn boundaries_are_unique() {
        assert_ne!(make_boundary(), make_boundary());
    }

    #[test]
    fn session_paths_stay_under_sessions_endpoint() {
        let store = HttpRemoteStore::new(&remote("https://api.example.test/v1"));
        assert!(SessionId::parse("../../admin").is_err());
        let session_id = SessionId::parse("run-42").unwrap();
        assert_eq!(
            store.url(&session_path(&session_id, "segments")),
            "https://api.example.test/v1/running/sessions/run-42/segments"
        );
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let store = HttpRemoteStore::new(&remote("http://127.0.0.1:9"));
        let err = store.create_session().await.err();
        assert!(matches!(err, Some(ApiError::Network(_))));
    }
}
