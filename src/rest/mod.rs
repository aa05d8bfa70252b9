//! Batch REST API adapter
//!
//! Implements [`BatchClient`] over the Batch service's REST interface with
//! Shared Key authentication.

pub mod auth;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode, Url};
use serde::Deserialize;

use crate::client::{BatchClient, CreateOutcome};
use crate::config::BatchAccount;
use crate::error::RemoteError;
use crate::models::{PoolSpec, PoolState};
use crate::{Error, Result};

pub use auth::SharedKeyCredentials;

pub const API_VERSION: &str = "2024-07-01.20.0";

const JSON_CONTENT_TYPE: &str = "application/json; odata=minimalmetadata";

const CLIENT_REQUEST_ID: &str = "client-request-id";

/// Pool fields the readiness check needs
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolResource {
    pub id: String,
    pub state: String,
    pub allocation_state: String,
    pub current_dedicated_nodes: u32,
    pub current_low_priority_nodes: u32,
}

#[derive(Debug, Deserialize)]
struct NodeResource {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default)]
    value: Vec<NodeResource>,
    #[serde(rename = "odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<ErrorMessage>,
    #[serde(default)]
    values: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    key: Option<String>,
    value: Option<String>,
}

/// Map the service's view of a pool (plus its node states, when allocation
/// has settled) onto [`PoolState`].
pub fn classify(pool: &PoolResource, node_states: &[&str]) -> PoolState {
    if pool.state.eq_ignore_ascii_case("deleting") {
        return PoolState::Absent;
    }

    match pool.allocation_state.to_ascii_lowercase().as_str() {
        "resizing" if pool.current_dedicated_nodes + pool.current_low_priority_nodes == 0 => PoolState::Creating,
        "resizing" | "stopping" => PoolState::Resizing,
        _ if node_states.iter().any(|s| is_schedulable(s)) => PoolState::ActiveReady,
        _ => PoolState::ActivePending,
    }
}

fn is_schedulable(node_state: &str) -> bool {
    node_state.eq_ignore_ascii_case("idle") || node_state.eq_ignore_ascii_case("running")
}

/// Build a [`RemoteError`] from a failed response body
pub fn parse_error(status: StatusCode, body: &[u8]) -> RemoteError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => RemoteError {
            status: Some(status.as_u16()),
            code: parsed.code,
            message: parsed.message.and_then(|m| m.value),
            values: parsed
                .values
                .into_iter()
                .map(|d| (d.key.unwrap_or_default(), d.value.unwrap_or_default()))
                .collect(),
        },
        Err(_) => {
            let text = String::from_utf8_lossy(body).trim().to_string();
            let message = if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text
            };
            RemoteError::transport(message).with_status(status.as_u16())
        }
    }
}

/// Batch service client authenticated with the account's shared key
#[derive(Debug, Clone)]
pub struct RestBatchClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: SharedKeyCredentials,
}

impl RestBatchClient {
    pub fn new(account: &BatchAccount) -> Result<Self> {
        Self::with_timeout(account, Duration::from_secs(30))
    }

    /// `request_timeout` bounds each HTTP exchange at the transport level
    pub fn with_timeout(account: &BatchAccount, request_timeout: Duration) -> Result<Self> {
        account.validate()?;
        let base_url = Url::parse(account.url.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("invalid batch_account_url '{}': {}", account.url, e)))?;
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            http,
            base_url,
            credentials: SharedKeyCredentials::new(account.name.clone(), &account.key)?,
        })
    }

    fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> std::result::Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::transport(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("api-version", API_VERSION);
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<Vec<u8>>) -> std::result::Result<Response, RemoteError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut request = reqwest::Request::new(method.clone(), url);
        request
            .headers_mut()
            .insert(CLIENT_REQUEST_ID, HeaderValue::from_str(&request_id).map_err(transport)?);
        if let Some(body) = body {
            request.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            *request.body_mut() = Some(body.into());
        }
        self.credentials
            .authorize(&mut request, chrono::Utc::now())
            .map_err(transport)?;

        tracing::trace!(%method, url = %request.url(), request_id = %request_id, "Batch request");
        self.http.execute(request).await.map_err(|e| {
            tracing::debug!(request_id = %request_id, error = %e, "Batch request failed");
            RemoteError::transport(e.to_string()).with_value(CLIENT_REQUEST_ID, request_id)
        })
    }

    async fn failure(response: Response) -> RemoteError {
        let status = response.status();
        let request_id = response
            .headers()
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.bytes().await.unwrap_or_default();

        let error = parse_error(status, &body);
        match request_id {
            Some(id) => error.with_value("request-id", id),
            None => error,
        }
    }

    async fn fetch_pool(&self, pool_id: &str) -> std::result::Result<Option<PoolResource>, RemoteError> {
        let url = self.url(
            &["pools", pool_id],
            &[("$select", "id,state,allocationState,currentDedicatedNodes,currentLowPriorityNodes")],
        )?;
        let response = self.send(Method::GET, url, None).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await.map_err(transport)?)),
            _ => Err(Self::failure(response).await),
        }
    }

    async fn node_states(&self, pool_id: &str) -> std::result::Result<Vec<String>, RemoteError> {
        let mut states = Vec::new();
        let mut next = Some(self.url(&["pools", pool_id, "nodes"], &[("$select", "id,state")])?);

        while let Some(url) = next.take() {
            let response = self.send(Method::GET, url, None).await?;
            if !response.status().is_success() {
                return Err(Self::failure(response).await);
            }

            let page: NodeList = response.json().await.map_err(transport)?;
            states.extend(page.value.into_iter().map(|n| n.state));
            if states.iter().any(|s| is_schedulable(s)) {
                break;
            }
            next = match page.next_link {
                Some(link) => Some(Url::parse(&link).map_err(transport)?),
                None => None,
            };
        }

        Ok(states)
    }
}

#[async_trait]
impl BatchClient for RestBatchClient {
    async fn exists(&self, pool_id: &str) -> std::result::Result<bool, RemoteError> {
        let url = self.url(&["pools", pool_id], &[])?;
        let response = self.send(Method::HEAD, url, None).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::failure(response).await),
        }
    }

    async fn create(&self, spec: &PoolSpec) -> std::result::Result<CreateOutcome, RemoteError> {
        let url = self.url(&["pools"], &[])?;
        let body = serde_json::to_vec(spec).map_err(transport)?;
        let response = self.send(Method::POST, url, Some(body)).await?;

        if response.status().is_success() {
            return Ok(CreateOutcome::Created);
        }

        let error = Self::failure(response).await;
        if error.status == Some(StatusCode::CONFLICT.as_u16()) && error.is_pool_exists() {
            tracing::debug!(pool = %spec.pool_id, "Service reported PoolExists");
            return Ok(CreateOutcome::AlreadyExists);
        }
        Err(error)
    }

    async fn get_state(&self, pool_id: &str) -> std::result::Result<PoolState, RemoteError> {
        let Some(pool) = self.fetch_pool(pool_id).await? else {
            return Ok(PoolState::Absent);
        };

        let settled = pool.allocation_state.eq_ignore_ascii_case("steady")
            && !pool.state.eq_ignore_ascii_case("deleting");
        let nodes = if settled { self.node_states(pool_id).await? } else { Vec::new() };
        let nodes: Vec<&str> = nodes.iter().map(String::as_str).collect();

        let state = classify(&pool, &nodes);
        tracing::debug!(
            pool = %pool_id,
            allocation = %pool.allocation_state,
            nodes = pool.current_dedicated_nodes,
            %state,
            "Observed pool state"
        );
        Ok(state)
    }
}

fn transport(e: impl std::fmt::Display) -> RemoteError {
    RemoteError::transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_pool_spec;
    use crate::config::Settings;
    use crate::models::OsType;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn pool(state: &str, allocation: &str, nodes: u32) -> PoolResource {
        PoolResource {
            id: "testpool".into(),
            state: state.into(),
            allocation_state: allocation.into(),
            current_dedicated_nodes: nodes,
            current_low_priority_nodes: 0,
        }
    }

    fn client() -> RestBatchClient {
        RestBatchClient::new(&BatchAccount {
            name: "mybatch".into(),
            key: "YmF0Y2gtdGVzdC1rZXk=".into(),
            url: "https://mybatch.westeurope.batch.azure.com/".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&pool("deleting", "steady", 2), &["idle"]), PoolState::Absent);
        assert_eq!(classify(&pool("active", "resizing", 0), &[]), PoolState::Creating);
        assert_eq!(classify(&pool("active", "resizing", 1), &[]), PoolState::Resizing);
        assert_eq!(classify(&pool("active", "stopping", 1), &[]), PoolState::Resizing);
        assert_eq!(
            classify(&pool("active", "steady", 2), &["starting", "waitingforstarttask"]),
            PoolState::ActivePending
        );
        assert_eq!(
            classify(&pool("active", "steady", 2), &["starttaskfailed", "idle"]),
            PoolState::ActiveReady
        );
        assert_eq!(classify(&pool("active", "steady", 0), &[]), PoolState::ActivePending);
    }

    #[test]
    fn test_parse_pool_resource() {
        let body = r#"{
            "odata.metadata": "https://mybatch.westeurope.batch.azure.com/$metadata#pools/@Element",
            "id": "testpool",
            "state": "active",
            "allocationState": "steady",
            "currentDedicatedNodes": 2
        }"#;
        let pool: PoolResource = serde_json::from_str(body).unwrap();
        assert_eq!(pool.allocation_state, "steady");
        assert_eq!(pool.current_dedicated_nodes, 2);
        assert_eq!(pool.current_low_priority_nodes, 0);
    }

    #[test]
    fn test_parse_error_body() {
        let body = br#"{
            "odata.metadata": "https://mybatch.westeurope.batch.azure.com/$metadata#Microsoft.Azure.Batch.Protocol.Entities.Container.errors/@Element",
            "code": "PoolExists",
            "message": {"lang": "en-US", "value": "The specified pool already exists."},
            "values": [{"key": "RequestId", "value": "8e1c0c5c"}]
        }"#;
        let err = parse_error(StatusCode::CONFLICT, body);

        assert_eq!(err.status, Some(409));
        assert!(err.is_pool_exists());
        assert_eq!(err.message(), "The specified pool already exists.");
        assert_eq!(err.values, vec![("RequestId".to_string(), "8e1c0c5c".to_string())]);
    }

    #[test]
    fn test_parse_error_without_json() {
        let err = parse_error(StatusCode::BAD_GATEWAY, b"");
        assert_eq!(err.status, Some(502));
        assert_eq!(err.code, None);
        assert_eq!(err.message(), "Bad Gateway");

        let err = parse_error(StatusCode::FORBIDDEN, b"denied");
        assert_eq!(err.message(), "denied");
    }

    #[test]
    fn test_request_urls() {
        let client = client();
        assert_eq!(
            client.url(&["pools", "testpool"], &[]).unwrap().as_str(),
            "https://mybatch.westeurope.batch.azure.com/pools/testpool?api-version=2024-07-01.20.0"
        );
        assert_eq!(
            client.url(&["pools", "testpool", "nodes"], &[("$select", "id,state")]).unwrap().as_str(),
            "https://mybatch.westeurope.batch.azure.com/pools/testpool/nodes?api-version=2024-07-01.20.0&%24select=id%2Cstate"
        );
    }

    #[test]
    fn test_rejects_bad_account() {
        let account = BatchAccount {
            name: "mybatch".into(),
            key: "***".into(),
            url: "https://mybatch.westeurope.batch.azure.com".into(),
        };
        assert!(matches!(RestBatchClient::new(&account), Err(Error::Config(_))));
    }

    const POOL_EXISTS: &str = r#"{"code":"PoolExists","message":{"lang":"en-US","value":"The specified pool already exists."}}"#;
    const POOL_BEING_DELETED: &str =
        r#"{"code":"PoolBeingDeleted","message":{"lang":"en-US","value":"The specified pool has been marked for deletion."}}"#;

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    /// Answers one connection per canned `(status, body)` and returns the raw
    /// requests it saw, in order.
    fn serve(listener: TcpListener, url: &str, responses: Vec<(u16, String)>) -> (RestBatchClient, JoinHandle<Vec<String>>) {
        let server = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);
                let response = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            requests
        });

        let client = RestBatchClient::new(&BatchAccount {
            name: "mybatch".into(),
            key: "YmF0Y2gtdGVzdC1rZXk=".into(),
            url: url.to_string(),
        })
        .unwrap();
        (client, server)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the request head");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .map(|value| value.trim().parse::<usize>().unwrap())
            .unwrap_or(0);
        while buf.len() < head_end + length {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the request body");
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn spec() -> PoolSpec {
        let config = Settings::new()
            .with("linux", "publisher", "canonical")
            .with("linux", "offer", "0001-com-ubuntu-server-focal")
            .with("linux", "sku", "20_04-lts")
            .with("linux", "version", "latest")
            .with("linux", "node_agent_sku_id", "batch.node.ubuntu 20.04")
            .with("linux", "target_dedicated_nodes", "1")
            .with_list("linux", "start_task_commands", ["echo ready"]);
        build_pool_spec(&config, "testpool", OsType::Linux, "standard_a1_v2").unwrap()
    }

    #[tokio::test]
    async fn test_exists_status_mapping() {
        let (listener, url) = listen().await;
        let (client, server) = serve(listener, &url, vec![(404, String::new()), (200, String::new())]);

        assert!(!client.exists("testpool").await.unwrap());
        assert!(client.exists("testpool").await.unwrap());

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("HEAD /pools/testpool?api-version=2024-07-01.20.0 HTTP/1.1"));
        assert!(requests[0].to_ascii_lowercase().contains("authorization: sharedkey mybatch:"));
        assert!(requests[0].to_ascii_lowercase().contains("ocp-date:"));
    }

    #[tokio::test]
    async fn test_create_conflict_mapping() {
        let (listener, url) = listen().await;
        let (client, server) = serve(
            listener,
            &url,
            vec![
                (409, POOL_EXISTS.to_string()),
                (409, POOL_BEING_DELETED.to_string()),
                (201, String::new()),
            ],
        );
        let spec = spec();

        assert_eq!(client.create(&spec).await.unwrap(), CreateOutcome::AlreadyExists);

        let err = client.create(&spec).await.unwrap_err();
        assert_eq!(err.status, Some(409));
        assert_eq!(err.code(), "PoolBeingDeleted");
        assert!(!err.is_pool_exists());

        assert_eq!(client.create(&spec).await.unwrap(), CreateOutcome::Created);

        let requests = server.await.unwrap();
        assert!(requests[2].starts_with("POST /pools?api-version=2024-07-01.20.0 HTTP/1.1"));
        assert!(requests[2]
            .to_ascii_lowercase()
            .contains("content-type: application/json; odata=minimalmetadata"));
        assert!(requests[2].contains(r#""id":"testpool""#));
        assert!(requests[2].contains(r#""vmSize":"standard_a1_v2""#));
    }

    #[tokio::test]
    async fn test_create_other_failure_is_error() {
        let body = r#"{"code":"AuthenticationFailed","message":{"value":"Server failed to authenticate the request."},"values":[{"key":"AuthenticationErrorDetail","value":"signature mismatch"}]}"#;
        let (listener, url) = listen().await;
        let (client, server) = serve(listener, &url, vec![(403, body.to_string())]);

        let err = client.create(&spec()).await.unwrap_err();
        assert_eq!(err.status, Some(403));
        assert_eq!(err.code(), "AuthenticationFailed");
        assert_eq!(
            err.values,
            vec![("AuthenticationErrorDetail".to_string(), "signature mismatch".to_string())]
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_get_state_follows_node_pages() {
        let (listener, url) = listen().await;
        let creating = r#"{"id":"testpool","state":"active","allocationState":"resizing","currentDedicatedNodes":0}"#;
        let steady = r#"{"id":"testpool","state":"active","allocationState":"steady","currentDedicatedNodes":2}"#;
        let first_page = format!(
            r#"{{"value":[{{"id":"node-1","state":"starting"}}],"odata.nextLink":"{}/pools/testpool/nodes?api-version={}&$skiptoken=page2"}}"#,
            url, API_VERSION
        );
        let second_page = r#"{"value":[{"id":"node-2","state":"idle"}]}"#;

        let (client, server) = serve(
            listener,
            &url,
            vec![
                (404, String::new()),
                (200, creating.to_string()),
                (200, steady.to_string()),
                (200, first_page),
                (200, second_page.to_string()),
            ],
        );

        assert_eq!(client.get_state("testpool").await.unwrap(), PoolState::Absent);
        assert_eq!(client.get_state("testpool").await.unwrap(), PoolState::Creating);
        assert_eq!(client.get_state("testpool").await.unwrap(), PoolState::ActiveReady);

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 5);
        assert!(requests[2].starts_with("GET /pools/testpool?api-version=2024-07-01.20.0&%24select="));
        assert!(requests[3].starts_with("GET /pools/testpool/nodes?"));
        assert!(requests[4].contains("skiptoken=page2"));
    }

    #[tokio::test]
    async fn test_get_state_service_error() {
        let (listener, url) = listen().await;
        let body = r#"{"code":"ServerBusy","message":{"value":"The server is currently unable to receive requests."}}"#;
        let (client, server) = serve(listener, &url, vec![(503, body.to_string())]);

        let err = client.get_state("testpool").await.unwrap_err();
        assert_eq!(err.status, Some(503));
        assert_eq!(err.code(), "ServerBusy");
        server.await.unwrap();
    }
}
