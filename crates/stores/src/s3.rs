//! S3-compatible object store.
//!
//! Built straight from [`ObjectStoreConfig`] rather than the ambient AWS
//! environment, so credentials only ever come from injected configuration.

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use twinconf::ObjectStoreConfig;

use crate::identifier::ObjectKey;
use crate::object::{ObjectStore, ObjectStoreError};

/// Service error codes that mean the credentials are wrong, not the network.
const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
    "AuthorizationHeaderMalformed",
];

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "twinconf",
        );

        let timeouts = TimeoutConfig::builder()
            .operation_timeout(config.timeout())
            .build();

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .timeout_config(timeouts)
            .force_path_style(config.force_path_style);

        if let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn classify<E>(err: SdkError<E, HttpResponse>) -> ObjectStoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let auth_code = err.code().is_some_and(|code| AUTH_CODES.contains(&code));
    let message = DisplayErrorContext(&err).to_string();

    if auth_code || matches!(status, Some(401) | Some(403)) {
        ObjectStoreError::AuthFailure(message)
    } else {
        ObjectStoreError::Unreachable(message)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[tracing::instrument(name = "s3.put_object", skip(self, data), fields(bucket = %self.bucket, key = %key, size = data.len()))]
    async fn put(&self, key: &ObjectKey, data: Bytes) -> Result<(), ObjectStoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    #[tracing::instrument(name = "s3.delete_object", skip(self), fields(bucket = %self.bucket, key = %key))]
    async fn delete(&self, key: &ObjectKey) -> Result<(), ObjectStoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    #[tracing::instrument(name = "s3.list_objects_v2", skip(self), fields(bucket = %self.bucket))]
    async fn list_keys(&self, prefix: &str) -> Result<Vec<ObjectKey>, ObjectStoreError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(classify)?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(ObjectKey::new),
            );
        }

        tracing::debug!(count = keys.len(), "listed keys");
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::ContentIdentifier;
    use wiremock::matchers::{method, path, path_regex, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> S3ObjectStore {
        let config = ObjectStoreConfig {
            bucket: "twinstore".to_string(),
            endpoint: Some(server.uri()),
            force_path_style: true,
            access_key_id: "test-access".to_string(),
            secret_access_key: "test-secret".to_string(),
            timeout_ms: 5000,
            ..Default::default()
        };
        S3ObjectStore::new(&config)
    }

    fn listing(keys: &[&str], next: Option<&str>) -> String {
        let contents: String = keys
            .iter()
            .map(|k| format!("<Contents><Key>{k}</Key><Size>10</Size></Contents>"))
            .collect();
        let truncation = match next {
            Some(token) => format!(
                "<IsTruncated>true</IsTruncated><NextContinuationToken>{token}</NextContinuationToken>"
            ),
            None => "<IsTruncated>false</IsTruncated>".to_string(),
        };
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Name>twinstore</Name><KeyCount>{}</KeyCount><MaxKeys>1000</MaxKeys>{truncation}{contents}</ListBucketResult>"#,
            keys.len()
        )
    }

    const CID1: &str = "bafkreiee3cmhp4guaqppw27zdilpajepf7kxhzvpaxaz7fv63opyql3yqi";

    const ACCESS_DENIED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AccessDenied</Code><Message>Access Denied</Message><RequestId>1</RequestId></Error>"#;

    #[tokio::test]
    async fn test_put_writes_key_under_bucket() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("/twinstore/{CID1}.txt")))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let key = ObjectKey::new(format!("{CID1}.txt"));
        store_for(&server).put(&key, Bytes::from_static(b"0123456789")).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_access_denied_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("content-type", "application/xml")
                    .set_body_string(ACCESS_DENIED),
            )
            .mount(&server)
            .await;

        let err = store_for(&server)
            .put(&ObjectKey::new(format!("{CID1}.txt")), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::AuthFailure(_)), "got {err}");
    }

    #[tokio::test]
    async fn test_put_unreachable() {
        let config = ObjectStoreConfig {
            endpoint: Some("http://127.0.0.1:1".to_string()),
            force_path_style: true,
            access_key_id: "a".to_string(),
            secret_access_key: "b".to_string(),
            timeout_ms: 5000,
            ..Default::default()
        };
        let err = S3ObjectStore::new(&config)
            .put(&ObjectKey::new("k"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::Unreachable(_)), "got {err}");
    }

    #[tokio::test]
    async fn test_list_keys_follows_continuation() {
        let server = MockServer::start().await;
        let txt = format!("{CID1}.txt");
        let pdf = format!("{CID1}.pdf");
        Mock::given(method("GET"))
            .and(path_regex(r"^/twinstore/?$"))
            .and(query_param("list-type", "2"))
            .and(query_param("prefix", CID1))
            .and(query_param_is_missing("continuation-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[txt.as_str()], Some("page2"))))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/twinstore/?$"))
            .and(query_param("continuation-token", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[pdf.as_str()], None)))
            .expect(1)
            .mount(&server)
            .await;

        let keys = store_for(&server).list_keys(CID1).await.unwrap();
        let keys: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec![txt.as_str(), pdf.as_str()]);
    }

    #[tokio::test]
    async fn test_delete_by_identifier_removes_each_listed_key() {
        let server = MockServer::start().await;
        let txt = format!("{CID1}.txt");
        let png = format!("{CID1}image/png");
        Mock::given(method("GET"))
            .and(path_regex(r"^/twinstore/?$"))
            .and(query_param("prefix", CID1))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[txt.as_str(), png.as_str()], None)))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path_regex(format!("^/twinstore/{CID1}")))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;

        let id = ContentIdentifier::parse(CID1).unwrap();
        let removed = store_for(&server).delete_by_identifier(&id).await.unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn test_delete_missing_key_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/twinstore/nothing-here"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        store_for(&server).delete(&ObjectKey::new("nothing-here")).await.unwrap();
    }
}
