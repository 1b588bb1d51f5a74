//! Client for the `POST /identify` endpoint.
//!
//! The endpoint takes a multipart form with one `bottle_image` field and
//! answers `{ "success": bool, "data"?: object, "error"?: string }`. Anything
//! that is not JSON is treated as an unexpected server failure.

use std::path::Path;

use mime::Mime;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{LoaderConfig, NetError};

/// Form field the server reads the image from.
pub const IMAGE_FIELD: &str = "bottle_image";

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

const UNKNOWN_ERROR: &str = "An unknown error occurred while processing the image.";

/// Errors from an identification attempt.
#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("Invalid file type. Please upload a valid image file ({0}).")]
    InvalidImage(String),

    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to connect to the identification server: {0}")]
    Connection(String),

    /// The server answered with JSON but did not report a match.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Server returned an unexpected response (Status: {status}).")]
    UnexpectedResponse { status: u16 },
}

impl From<IdentifyError> for goggles_common::GogglesError {
    fn from(err: IdentifyError) -> Self {
        goggles_common::GogglesError::identify_with_source("identification failed", err)
    }
}

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    #[serde(default)]
    success: bool,
    data: Option<Map<String, Value>>,
    error: Option<String>,
}

/// Details of a matched bottle, as returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BottleDetails(Map<String, Value>);

impl BottleDetails {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn name(&self) -> Option<&str> {
        self.0
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn avg_msrp(&self) -> Option<&Value> {
        self.0.get("avg_msrp").filter(|v| !is_blank(v))
    }

    /// Number of keypoints the matcher accepted.
    pub fn good_matches(&self) -> Option<u64> {
        self.0.get("_match_good_matches").and_then(Value::as_u64)
    }

    pub fn confidence_score(&self) -> Option<f64> {
        self.0.get("_match_confidence_score").and_then(Value::as_f64)
    }

    /// Human-facing fields, sorted by key.
    ///
    /// Skips `_match_*` bookkeeping and the name (shown as a heading).
    /// Blank values render as `N/A`.
    pub fn display_fields(&self) -> Vec<(String, String)> {
        let has_name = self.name().is_some();
        self.0
            .iter()
            .filter(|(key, _)| !key.starts_with("_match_"))
            .filter(|(key, _)| !(has_name && key.as_str() == "name"))
            .map(|(key, value)| (title_case(key), display_value(value)))
            .collect()
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn display_value(value: &Value) -> String {
    match value {
        v if is_blank(v) => "N/A".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `avg_msrp` → `Avg Msrp`.
fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check the file name the way the server does before uploading.
pub fn validate_image_name(file_name: &str) -> Result<Mime, IdentifyError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| IdentifyError::InvalidImage(format!("{file_name} has no extension")))?;

    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(IdentifyError::InvalidImage(format!(
            ".{extension} is not one of {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    mime_guess::from_path(file_name)
        .first()
        .filter(|m| m.type_() == mime::IMAGE)
        .ok_or_else(|| IdentifyError::InvalidImage(format!("{file_name} is not an image")))
}

/// Submits images to the identification endpoint.
pub struct IdentifyClient {
    client: Client,
    endpoint: Url,
}

impl IdentifyClient {
    pub fn new(base: &Url, config: &LoaderConfig) -> Result<Self, NetError> {
        let endpoint = base
            .join("/identify")
            .map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            client: config.build_client()?,
            endpoint,
        })
    }

    /// Read `path` and submit it.
    pub async fn identify_file(&self, path: &Path) -> Result<BottleDetails, IdentifyError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| IdentifyError::InvalidImage(path.display().to_string()))?;
        validate_image_name(file_name)?;
        let bytes = tokio::fs::read(path).await?;
        self.identify_bytes(file_name, bytes).await
    }

    /// Submit an in-memory image under `file_name`.
    pub async fn identify_bytes(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<BottleDetails, IdentifyError> {
        let mime = validate_image_name(file_name)?;
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime.as_ref())
            .map_err(|e| IdentifyError::InvalidImage(e.to_string()))?;
        let form = Form::new().part(IMAGE_FIELD, part);

        debug!(endpoint = %self.endpoint, file = file_name, "Submitting image");
        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| IdentifyError::Connection(e.to_string()))?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let body = response
            .bytes()
            .await
            .map_err(|e| IdentifyError::Connection(e.to_string()))?;

        if !is_json {
            warn!(
                status = status.as_u16(),
                body = %String::from_utf8_lossy(&body),
                "Received non-JSON response"
            );
            return Err(IdentifyError::UnexpectedResponse {
                status: status.as_u16(),
            });
        }

        let parsed: IdentifyResponse = serde_json::from_slice(&body).map_err(|e| {
            warn!(status = status.as_u16(), error = %e, "Malformed JSON response");
            IdentifyError::UnexpectedResponse {
                status: status.as_u16(),
            }
        })?;

        match parsed {
            IdentifyResponse {
                success: true,
                data: Some(data),
                ..
            } if status.is_success() => Ok(BottleDetails::new(data)),
            IdentifyResponse { error, .. } => Err(IdentifyError::Rejected {
                status: status.as_u16(),
                message: error.unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn details(value: Value) -> BottleDetails {
        serde_json::from_value(value).unwrap()
    }

    async fn client_for(server: &MockServer) -> IdentifyClient {
        let base = Url::parse(&server.uri()).unwrap();
        IdentifyClient::new(&base, &LoaderConfig::default()).unwrap()
    }

    #[test]
    fn test_validate_image_name() {
        assert_eq!(validate_image_name("bottle.JPG").unwrap(), mime::IMAGE_JPEG);
        assert_eq!(validate_image_name("camera-photo.png").unwrap(), mime::IMAGE_PNG);
        assert!(validate_image_name("scan.bmp").is_ok());
        assert!(matches!(
            validate_image_name("notes.txt"),
            Err(IdentifyError::InvalidImage(_))
        ));
        assert!(validate_image_name("bottle").is_err());
        assert!(validate_image_name("bottle.webp").is_err());
    }

    #[test]
    fn test_display_fields() {
        let bottle = details(json!({
            "name": "Lagavulin 16",
            "avg_msrp": 89.99,
            "proof": "",
            "brand_id": null,
            "spirit_type": "Scotch",
            "_match_good_matches": 42,
            "_match_confidence_score": 0.81
        }));

        assert_eq!(bottle.name(), Some("Lagavulin 16"));
        assert_eq!(bottle.good_matches(), Some(42));
        assert_eq!(bottle.confidence_score(), Some(0.81));

        let fields = bottle.display_fields();
        assert!(fields.contains(&("Avg Msrp".to_string(), "89.99".to_string())));
        assert!(fields.contains(&("Proof".to_string(), "N/A".to_string())));
        assert!(fields.contains(&("Brand Id".to_string(), "N/A".to_string())));
        assert!(fields.contains(&("Spirit Type".to_string(), "Scotch".to_string())));
        assert!(fields.iter().all(|(k, _)| k != "Name" && !k.starts_with("Match")));
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn test_nameless_details_show_name_field() {
        let bottle = details(json!({ "name": "", "size": "750ml" }));
        assert_eq!(bottle.name(), None);
        let fields = bottle.display_fields();
        assert!(fields.contains(&("Name".to_string(), "N/A".to_string())));
    }

    #[tokio::test]
    async fn test_successful_identification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identify"))
            .respond_with(|request: &Request| {
                let body = String::from_utf8_lossy(&request.body);
                if body.contains("name=\"bottle_image\"") && body.contains("filename=\"bottle.jpg\"")
                {
                    ResponseTemplate::new(200).set_body_json(json!({
                        "success": true,
                        "data": { "name": "Blanton's", "avg_msrp": 65, "_match_good_matches": 57 }
                    }))
                } else {
                    ResponseTemplate::new(400).set_body_json(json!({
                        "success": false,
                        "error": "No image file part in the request."
                    }))
                }
            })
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let bottle = client
            .identify_bytes("bottle.jpg", vec![0xFF, 0xD8, 0xFF])
            .await
            .unwrap();

        assert_eq!(bottle.name(), Some("Blanton's"));
        assert_eq!(bottle.good_matches(), Some(57));
    }

    #[tokio::test]
    async fn test_server_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identify"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "success": false,
                "error": "No matching bottle found."
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .identify_bytes("bottle.png", vec![1, 2, 3])
            .await
            .unwrap_err();

        match err {
            IdentifyError::Rejected { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "No matching bottle found.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_error_falls_back_to_generic_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .identify_bytes("bottle.png", vec![1])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), UNKNOWN_ERROR);
    }

    #[tokio::test]
    async fn test_non_json_response_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<h1>Internal Server Error</h1>"),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .identify_bytes("bottle.gif", vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, IdentifyError::UnexpectedResponse { status: 500 }));
        assert_eq!(
            err.to_string(),
            "Server returned an unexpected response (Status: 500)."
        );
    }

    #[tokio::test]
    async fn test_invalid_extension_never_reaches_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .identify_bytes("bottle.tiff", vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, IdentifyError::InvalidImage(_)));
    }

    #[tokio::test]
    async fn test_identify_file_reads_from_disk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/identify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "name": "Ardbeg 10" }
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("shelf.jpeg");
        std::fs::write(&image, [0xFF, 0xD8]).unwrap();

        let bottle = client_for(&server).await.identify_file(&image).await.unwrap();
        assert_eq!(bottle.name(), Some("Ardbeg 10"));

        let missing = dir.path().join("gone.jpg");
        let err = client_for(&server).await.identify_file(&missing).await.unwrap_err();
        assert!(matches!(err, IdentifyError::Io(_)));
    }
}
