//! `DynamoDB` over HTTP: JSON 1.0 protocol bodies signed with AWS Signature V4.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Url;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::DynamoApi;
use crate::error::PolyDbError;

type HmacSha256 = Hmac<Sha256>;

const CONTENT_TYPE: &str = "application/x-amz-json-1.0";
const SERVICE: &str = "dynamodb";
const TARGET_PREFIX: &str = "DynamoDB_20120810";

#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl AwsCredentials {
    /// `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional `AWS_SESSION_TOKEN`.
    ///
    /// # Errors
    /// `ConfigError` when the key pair is not set.
    pub fn from_env() -> Result<Self, PolyDbError> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        match (var("AWS_ACCESS_KEY_ID"), var("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) => Ok(Self {
                access_key_id,
                secret_access_key,
                session_token: var("AWS_SESSION_TOKEN"),
            }),
            _ => Err(PolyDbError::ConfigError(
                "dynamodb: AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY are required".into(),
            )),
        }
    }
}

/// [`DynamoApi`] over `reqwest`, for AWS endpoints and local emulators alike.
#[derive(Debug, Clone)]
pub struct HttpDynamo {
    client: reqwest::Client,
    endpoint: Url,
    region: String,
    credentials: AwsCredentials,
}

impl HttpDynamo {
    /// # Errors
    /// `ConfigError` for an endpoint that is not an absolute http(s) url.
    pub fn new(endpoint: &str, region: impl Into<String>, credentials: AwsCredentials) -> Result<Self, PolyDbError> {
        let endpoint = Url::parse(endpoint)
            .ok()
            .filter(|url| url.has_host() && matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| PolyDbError::ConfigError(format!("dynamodb: bad endpoint {endpoint}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            region: region.into(),
            credentials,
        })
    }

    /// Credentials and region (`AWS_REGION`, then `AWS_DEFAULT_REGION`, then `us-east-1`)
    /// from the environment. Without an endpoint the regional AWS endpoint is used.
    ///
    /// # Errors
    /// See [`AwsCredentials::from_env`] and [`HttpDynamo::new`].
    pub fn from_env(endpoint: Option<&str>) -> Result<Self, PolyDbError> {
        let region = ["AWS_REGION", "AWS_DEFAULT_REGION"]
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "us-east-1".to_string());
        let endpoint = endpoint.map_or_else(|| format!("https://dynamodb.{region}.amazonaws.com"), str::to_string);
        Self::new(&endpoint, region, AwsCredentials::from_env()?)
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    fn authorization(&self, amz_date: &str, target: &str, payload: &[u8]) -> Result<String, PolyDbError> {
        let request = SignedRequest {
            host: &self.host(),
            path: self.endpoint.path(),
            amz_date,
            target,
            session_token: self.credentials.session_token.as_deref(),
            payload,
        };
        request.authorization(&self.credentials, &self.region)
    }
}

/// The parts of a `POST` that Signature V4 covers.
struct SignedRequest<'a> {
    host: &'a str,
    path: &'a str,
    amz_date: &'a str,
    target: &'a str,
    session_token: Option<&'a str>,
    payload: &'a [u8],
}

impl SignedRequest<'_> {
    fn headers(&self) -> Vec<(&'static str, &str)> {
        let mut headers = vec![
            ("content-type", CONTENT_TYPE),
            ("host", self.host),
            ("x-amz-date", self.amz_date),
        ];
        if let Some(token) = self.session_token {
            headers.push(("x-amz-security-token", token));
        }
        headers.push(("x-amz-target", self.target));
        headers
    }

    fn canonical(&self) -> (String, String) {
        let headers = self.headers();
        let signed = headers.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(";");
        let lines: String = headers.iter().map(|(name, value)| format!("{name}:{}\n", value.trim())).collect();
        let path = if self.path.is_empty() { "/" } else { self.path };
        let canonical = format!(
            "POST\n{path}\n\n{lines}\n{signed}\n{}",
            hex::encode(Sha256::digest(self.payload))
        );
        (canonical, signed)
    }

    fn authorization(&self, credentials: &AwsCredentials, region: &str) -> Result<String, PolyDbError> {
        let date = self.amz_date.get(..8).unwrap_or(self.amz_date);
        let scope = format!("{date}/{region}/{SERVICE}/aws4_request");
        let (canonical, signed) = self.canonical();
        let to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{scope}\n{}",
            self.amz_date,
            hex::encode(Sha256::digest(canonical.as_bytes()))
        );
        let key = signing_key(&credentials.secret_access_key, date, region, SERVICE)?;
        let signature = hex::encode(hmac_sha256(&key, to_sign.as_bytes())?);
        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed}, Signature={signature}",
            credentials.access_key_id
        ))
    }
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<Vec<u8>, PolyDbError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| PolyDbError::ParameterError(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>, PolyDbError> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// `{"__type": "com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException", ...}`
/// becomes `dynamodb: ConditionalCheckFailedException: <message>`.
fn api_error(status: reqwest::StatusCode, body: &JsonValue) -> PolyDbError {
    let code = body
        .get("__type")
        .and_then(JsonValue::as_str)
        .and_then(|t| t.rsplit('#').next())
        .unwrap_or("HttpError");
    let message = ["message", "Message"]
        .iter()
        .find_map(|field| body.get(field).and_then(JsonValue::as_str))
        .map_or_else(|| status.to_string(), str::to_string);
    PolyDbError::Backend {
        pool: SERVICE.to_string(),
        message: format!("{code}: {message}"),
    }
}

#[async_trait]
impl DynamoApi for HttpDynamo {
    async fn call(&self, action: &str, body: JsonValue) -> Result<JsonValue, PolyDbError> {
        let payload = serde_json::to_vec(&body)?;
        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let target = format!("{TARGET_PREFIX}.{action}");
        let authorization = self.authorization(&amz_date, &target, &payload)?;

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-date", &amz_date)
            .header("x-amz-target", &target)
            .header("authorization", authorization);
        if let Some(token) = &self.credentials.session_token {
            request = request.header("x-amz-security-token", token);
        }
        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|e| PolyDbError::ConnectionError(format!("dynamodb {}: {e}", self.endpoint)))?;
        let status = response.status();
        let out: JsonValue = response
            .json()
            .await
            .map_err(|e| PolyDbError::ExecutionError(format!("dynamodb {action}: {e}")))?;
        debug!("dynamodb: {action} {status}");
        if status.is_success() {
            Ok(out)
        } else {
            Err(api_error(status, &out))
        }
    }
}
