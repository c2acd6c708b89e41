//! Request extraction and input errors.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, FromRequest, Multipart, Request},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use stores::{ContentIdentifier, IdentifierError};
use thiserror::Error;

/// Problems with what the caller sent. Back-end failures are rendered by the
/// handlers themselves, since each endpoint has its own envelope.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing required field: {0}")]
    InputMissing(&'static str),

    #[error("invalid cid: {0}")]
    BadIdentifier(#[from] IdentifierError),

    #[error("{message}")]
    Form { status: StatusCode, message: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InputMissing(_) | ApiError::BadIdentifier(_) => StatusCode::BAD_REQUEST,
            ApiError::Form { status, .. } => *status,
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Form {
            status: e.status(),
            message: e.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::debug!(%status, error = %self, "rejected request");
        (status, Json(serde_json::json!({ "Message": self.to_string() }))).into_response()
    }
}

/// Text fields gathered from the query string and, when present, a
/// urlencoded or multipart body. The first occurrence of a name wins, and the
/// query string is read first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormFields(HashMap<String, String>);

impl FormFields {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Non-empty value of `name`, or `InputMissing`.
    pub fn require(&self, name: &'static str) -> Result<&str, ApiError> {
        self.get(name)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::InputMissing(name))
    }

    /// The `cid` field, validated.
    pub fn identifier(&self) -> Result<ContentIdentifier, ApiError> {
        Ok(ContentIdentifier::parse(self.require("cid")?.trim())?)
    }

    fn absorb(&mut self, pairs: impl IntoIterator<Item = (String, String)>) {
        for (name, value) in pairs {
            self.0.entry(name).or_insert(value);
        }
    }
}

fn parse_urlencoded(input: &str) -> Result<Vec<(String, String)>, ApiError> {
    serde_urlencoded::from_str(input).map_err(|e| ApiError::Form {
        status: StatusCode::BAD_REQUEST,
        message: format!("malformed form data: {e}"),
    })
}

impl<S> FromRequest<S> for FormFields
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut fields = FormFields::default();

        if let Some(query) = req.uri().query() {
            fields.absorb(parse_urlencoded(query)?);
        }

        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::Form {
                    status: e.status(),
                    message: e.body_text(),
                })?;

            while let Some(field) = multipart.next_field().await? {
                if field.file_name().is_some() {
                    continue;
                }
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                let value = field.text().await?;
                fields.absorb([(name, value)]);
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            // Form<T> reads the query string for GET, so the body is parsed by hand.
            let body = Bytes::from_request(req, state)
                .await
                .map_err(|e| ApiError::Form {
                    status: e.status(),
                    message: e.body_text(),
                })?;
            let body = std::str::from_utf8(&body).map_err(|_| ApiError::Form {
                status: StatusCode::BAD_REQUEST,
                message: "form body is not UTF-8".to_string(),
            })?;
            fields.absorb(parse_urlencoded(body)?);
        }

        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    async fn extract(req: Request) -> Result<FormFields, ApiError> {
        FormFields::from_request(req, &()).await
    }

    #[tokio::test]
    async fn test_query_string() {
        let req = Request::builder()
            .uri("/getFile?cid=QmWATWQ7fVPP2EFGu71UkfnqhYXDYH566qy47CnJDgvs8u&mime=.txt")
            .body(Body::empty())
            .unwrap();
        let fields = extract(req).await.unwrap();
        assert_eq!(
            fields.identifier().unwrap().as_str(),
            "QmWATWQ7fVPP2EFGu71UkfnqhYXDYH566qy47CnJDgvs8u"
        );
        assert_eq!(fields.get("mime"), Some(".txt"));
    }

    #[tokio::test]
    async fn test_urlencoded_body_on_get() {
        let req = Request::builder()
            .method("GET")
            .uri("/getFile")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("cid=CID2"))
            .unwrap();
        let fields = extract(req).await.unwrap();
        assert_eq!(fields.get("cid"), Some("CID2"));
    }

    #[tokio::test]
    async fn test_multipart_body() {
        let body = "--XyZ\r\nContent-Disposition: form-data; name=\"cid\"\r\n\r\nCID3\r\n--XyZ--\r\n";
        let req = Request::builder()
            .method("DELETE")
            .uri("/deleteFile")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XyZ")
            .body(Body::from(body))
            .unwrap();
        let fields = extract(req).await.unwrap();
        assert_eq!(fields.get("cid"), Some("CID3"));
    }

    #[tokio::test]
    async fn test_query_wins_over_body() {
        let req = Request::builder()
            .uri("/getFile?cid=FROMQUERY")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("cid=FROMBODY"))
            .unwrap();
        let fields = extract(req).await.unwrap();
        assert_eq!(fields.get("cid"), Some("FROMQUERY"));
    }

    #[tokio::test]
    async fn test_missing_and_invalid_cid() {
        let req = Request::builder().uri("/getFile").body(Body::empty()).unwrap();
        let fields = extract(req).await.unwrap();
        assert!(matches!(fields.identifier(), Err(ApiError::InputMissing("cid"))));

        let req = Request::builder()
            .uri("/getFile?cid=a%2Fb")
            .body(Body::empty())
            .unwrap();
        let fields = extract(req).await.unwrap();
        let err = fields.identifier().unwrap_err();
        assert!(matches!(err, ApiError::BadIdentifier(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let req = Request::builder().uri("/getFile?cid=Qm").body(Body::empty()).unwrap();
        let fields = extract(req).await.unwrap();
        assert!(matches!(
            fields.identifier(),
            Err(ApiError::BadIdentifier(IdentifierError::Malformed(_)))
        ));
    }
}
