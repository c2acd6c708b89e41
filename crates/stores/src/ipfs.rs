//! IPFS HTTP RPC client.
//!
//! Talks to a Kubo-compatible node on its RPC port (`/api/v0/...`). Every RPC
//! command is a POST, including the read-only ones.
//!
//! | operation            | command                  |
//! |----------------------|--------------------------|
//! | `add`                | `add?pin=true` multipart |
//! | `stat`               | `block/stat?arg=<cid>`   |
//! | `fetch`              | `cat?arg=<cid>`          |
//! | `unpin`              | `pin/rm?arg=<cid>`       |
//! | `reclaim_unpinned`   | `repo/gc`                |

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use twinconf::ContentStoreConfig;

use crate::content::{ContentStore, ContentStoreError};
use crate::identifier::{ContentIdentifier, ContentRecord};

/// One line of `add` output. `Size` is a decimal string.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddEntry {
    name: String,
    hash: String,
    size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockStat {
    key: String,
    size: u64,
}

/// One line of `repo/gc` output.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GcEntry {
    #[serde(default)]
    error: Option<String>,
}

/// Client for a Kubo-compatible IPFS node.
#[derive(Debug, Clone)]
pub struct IpfsClient {
    client: Client,
    api_url: String,
    stat_timeout: Duration,
}

impl IpfsClient {
    pub fn new(config: &ContentStoreConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            stat_timeout: config.stat_timeout(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn command(&self, name: &str) -> RequestBuilder {
        let builder = self.client.post(format!("{}/api/v0/{}", self.api_url, name));
        inject_trace_context(builder)
    }
}

// Propagate the current span so node-side traces line up with ours.
fn inject_trace_context(builder: RequestBuilder) -> RequestBuilder {
    use opentelemetry::trace::TraceContextExt;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    let span = tracing::Span::current();
    let context = span.context();
    let ctx_span = context.span();
    let span_context = ctx_span.span_context();

    if span_context.is_valid() {
        let flags = if span_context.is_sampled() { "01" } else { "00" };
        let traceparent = format!(
            "00-{}-{}-{}",
            span_context.trace_id(),
            span_context.span_id(),
            flags
        );
        builder.header("traceparent", traceparent)
    } else {
        builder
    }
}

fn unreachable(e: reqwest::Error) -> ContentStoreError {
    ContentStoreError::Unreachable(e.to_string())
}

async fn error_body(response: Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) if !body.trim().is_empty() => format!("{}: {}", status, body.trim()),
        _ => status.to_string(),
    }
}

/// `add` may stream progress lines before the final entry; the last parseable
/// line describes what was stored.
fn parse_add_output(body: &str) -> Result<ContentRecord, ContentStoreError> {
    let entry = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<AddEntry>(line).ok())
        .last()
        .ok_or_else(|| ContentStoreError::BadResponse(format!("no add entry in: {body}")))?;

    let identifier = ContentIdentifier::parse(&entry.hash)
        .map_err(|e| ContentStoreError::BadResponse(format!("bad hash {:?}: {e}", entry.hash)))?;
    let size = entry
        .size
        .parse::<u64>()
        .map_err(|_| ContentStoreError::BadResponse(format!("bad size {:?}", entry.size)))?;

    Ok(ContentRecord::new(identifier, size).with_name(entry.name))
}

#[async_trait]
impl ContentStore for IpfsClient {
    #[tracing::instrument(name = "ipfs.add", skip(self, data), fields(size = data.len()))]
    async fn add(&self, name: &str, data: Bytes) -> Result<ContentRecord, ContentStoreError> {
        let len = data.len() as u64;
        let part = Part::stream_with_length(reqwest::Body::from(data), len).file_name(name.to_string());
        let form = Form::new().part("file", part);

        let response = self
            .command("add")
            .query(&[("pin", "true")])
            .multipart(form)
            .send()
            .await
            .map_err(unreachable)?;

        if !response.status().is_success() {
            return Err(ContentStoreError::BadResponse(error_body(response).await));
        }

        let body = response.text().await.map_err(unreachable)?;
        let record = parse_add_output(&body)?;
        tracing::debug!(cid = %record.identifier, size = record.size, "added to IPFS");
        Ok(record)
    }

    #[tracing::instrument(name = "ipfs.block_stat", skip(self), fields(cid = %id))]
    async fn stat(&self, id: &ContentIdentifier) -> Result<ContentRecord, ContentStoreError> {
        let sent = self
            .command("block/stat")
            .query(&[("arg", id.as_str())])
            .timeout(self.stat_timeout)
            .send()
            .await;

        // A node that can't find a block keeps searching the network; running
        // out the clock means it isn't there.
        let response = match sent {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(ContentStoreError::NotFound(id.clone())),
            Err(e) => return Err(unreachable(e)),
        };

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "block/stat refused");
            return Err(ContentStoreError::NotFound(id.clone()));
        }

        let stat: BlockStat = match response.json().await {
            Ok(s) => s,
            Err(e) if e.is_timeout() => return Err(ContentStoreError::NotFound(id.clone())),
            Err(e) => return Err(ContentStoreError::BadResponse(e.to_string())),
        };

        let identifier = ContentIdentifier::parse(&stat.key).unwrap_or_else(|_| id.clone());
        Ok(ContentRecord::new(identifier, stat.size))
    }

    #[tracing::instrument(name = "ipfs.cat", skip(self), fields(cid = %id))]
    async fn fetch(&self, id: &ContentIdentifier) -> Result<Bytes, ContentStoreError> {
        let response = self
            .command("cat")
            .query(&[("arg", id.as_str())])
            .send()
            .await
            .map_err(unreachable)?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "cat refused");
            return Err(ContentStoreError::NotFound(id.clone()));
        }

        response.bytes().await.map_err(unreachable)
    }

    #[tracing::instrument(name = "ipfs.pin_rm", skip(self), fields(cid = %id))]
    async fn unpin(&self, id: &ContentIdentifier) -> Result<(), ContentStoreError> {
        let response = self
            .command("pin/rm")
            .query(&[("arg", id.as_str())])
            .send()
            .await
            .map_err(unreachable)?;

        if !response.status().is_success() {
            let reason = error_body(response).await;
            tracing::debug!(%reason, "pin/rm refused");
            return Err(ContentStoreError::NotPinned(id.clone()));
        }

        Ok(())
    }

    #[tracing::instrument(name = "ipfs.repo_gc", skip(self))]
    async fn reclaim_unpinned(&self) -> Result<(), ContentStoreError> {
        let response = self.command("repo/gc").send().await.map_err(unreachable)?;

        if !response.status().is_success() {
            return Err(ContentStoreError::BadResponse(error_body(response).await));
        }

        // The body is one JSON line per removed block; drain it so the gc runs
        // to completion and catch per-block errors.
        let body = response.text().await.map_err(unreachable)?;
        let errors: Vec<String> = body
            .lines()
            .filter_map(|line| serde_json::from_str::<GcEntry>(line).ok())
            .filter_map(|entry| entry.error)
            .filter(|e| !e.is_empty())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ContentStoreError::BadResponse(errors.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CID: &str = "QmWATWQ7fVPP2EFGu71UkfnqhYXDYH566qy47CnJDgvs8u";

    fn client_for(server: &MockServer) -> IpfsClient {
        let config = ContentStoreConfig {
            api_url: server.uri(),
            stat_timeout_ms: 200,
            request_timeout_ms: 2000,
        };
        IpfsClient::new(&config).unwrap()
    }

    fn cid() -> ContentIdentifier {
        ContentIdentifier::parse(CID).unwrap()
    }

    #[test]
    fn test_parse_add_output_takes_last_entry() {
        let body = concat!(
            r#"{"Name":"a.txt","Bytes":10}"#,
            "\n",
            r#"{"Name":"a.txt","Hash":"QmWATWQ7fVPP2EFGu71UkfnqhYXDYH566qy47CnJDgvs8u","Size":"18"}"#,
            "\n"
        );
        let record = parse_add_output(body).unwrap();
        assert_eq!(record.identifier.as_str(), CID);
        assert_eq!(record.name.as_deref(), Some("a.txt"));
        assert_eq!(record.size, 18);
    }

    #[test]
    fn test_parse_add_output_rejects_garbage() {
        assert!(matches!(
            parse_add_output("<html>proxy error</html>"),
            Err(ContentStoreError::BadResponse(_))
        ));
        assert!(matches!(
            parse_add_output(r#"{"Name":"a","Hash":"Qm1","Size":"lots"}"#),
            Err(ContentStoreError::BadResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_add_pins_and_parses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .and(query_param("pin", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Name": "a.txt", "Hash": CID, "Size": "18"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let record = client.add("a.txt", Bytes::from_static(b"0123456789")).await.unwrap();
        assert_eq!(record.identifier, cid());
        assert_eq!(record.name.as_deref(), Some("a.txt"));
        assert_eq!(record.size, 18);
    }

    #[tokio::test]
    async fn test_add_server_error_is_bad_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .respond_with(ResponseTemplate::new(500).set_body_string("repo locked"))
            .mount(&server)
            .await;

        let err = client_for(&server).add("a", Bytes::from_static(b"x")).await.unwrap_err();
        match err {
            ContentStoreError::BadResponse(msg) => assert!(msg.contains("repo locked")),
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn test_add_unreachable() {
        let config = ContentStoreConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let client = IpfsClient::new(&config).unwrap();
        let err = client.add("a", Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, ContentStoreError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_stat_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/block/stat"))
            .and(query_param("arg", CID))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Key": CID, "Size": 18})))
            .mount(&server)
            .await;

        let record = client_for(&server).stat(&cid()).await.unwrap();
        assert_eq!(record.identifier, cid());
        assert_eq!(record.size, 18);
        assert!(record.name.is_none());
    }

    #[tokio::test]
    async fn test_stat_any_error_status_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/block/stat"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "Message": "invalid path", "Code": 0, "Type": "error"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).stat(&cid()).await.unwrap_err();
        assert!(matches!(err, ContentStoreError::NotFound(id) if id == cid()));
    }

    #[tokio::test]
    async fn test_stat_timeout_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/block/stat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"Key": CID, "Size": 18}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).stat(&cid()).await.unwrap_err();
        assert!(matches!(err, ContentStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetch_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/cat"))
            .and(query_param("arg", CID))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
            .mount(&server)
            .await;

        let data = client_for(&server).fetch(&cid()).await.unwrap();
        assert_eq!(&data[..], b"0123456789");
    }

    #[tokio::test]
    async fn test_unpin_refused_is_not_pinned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/pin/rm"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "Message": "not pinned or pinned indirectly", "Code": 0, "Type": "error"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).unpin(&cid()).await.unwrap_err();
        assert!(matches!(err, ContentStoreError::NotPinned(_)));
    }

    #[tokio::test]
    async fn test_unpin_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/pin/rm"))
            .and(query_param("arg", CID))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Pins": [CID]})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).unpin(&cid()).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_timeout_bounds_unpin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/pin/rm"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"Pins": [CID]}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let config = ContentStoreConfig {
            api_url: server.uri(),
            stat_timeout_ms: 200,
            request_timeout_ms: 200,
        };
        let err = IpfsClient::new(&config).unwrap().unpin(&cid()).await.unwrap_err();
        assert!(matches!(err, ContentStoreError::Unreachable(_)), "got {err}");
    }

    #[tokio::test]
    async fn test_request_timeout_bounds_add() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/add"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"Name": "a", "Hash": CID, "Size": "9"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let config = ContentStoreConfig {
            api_url: server.uri(),
            stat_timeout_ms: 200,
            request_timeout_ms: 200,
        };
        let err = IpfsClient::new(&config)
            .unwrap()
            .add("a", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContentStoreError::Unreachable(_)), "got {err}");
    }

    #[tokio::test]
    async fn test_repo_gc_drains_stream() {
        let server = MockServer::start().await;
        let body = format!("{{\"Key\":{{\"/\":\"{CID}\"}}}}\n{{\"Key\":{{\"/\":\"bafkqaaa\"}}}}\n");
        Mock::given(method("POST"))
            .and(path("/api/v0/repo/gc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        client_for(&server).reclaim_unpinned().await.unwrap();
    }

    #[tokio::test]
    async fn test_repo_gc_reports_line_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v0/repo/gc"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("{\"Error\":\"could not remove block\"}\n"),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).reclaim_unpinned().await.unwrap_err();
        assert!(matches!(err, ContentStoreError::BadResponse(msg) if msg.contains("could not remove")));
    }

    #[test]
    fn test_api_url_trailing_slash_trimmed() {
        let config = ContentStoreConfig {
            api_url: "http://node:5001/".to_string(),
            ..Default::default()
        };
        assert_eq!(IpfsClient::new(&config).unwrap().api_url(), "http://node:5001");
    }
}
