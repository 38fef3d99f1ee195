//! Background removal, consumed as a black box.
//!
//! The segmentation model is an external collaborator: PNG bytes in,
//! PNG bytes with an alpha-matted foreground out. The [`Matting`] trait is
//! the seam — production talks to a rembg-compatible HTTP endpoint
//! (`POST /api/remove?model=...`), tests inject a fake.
//!
//! The model profile is selected once per run. The default,
//! `isnet-general-use`, is the smaller profile: the larger ones exhaust
//! memory on full-resolution product shots, which is also why inputs are
//! pre-normalized before they get here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MattingError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("matting service returned {status}: {message}")]
    Service { status: u16, message: String },
}

/// Remove the background from an encoded image, returning an encoded image
/// with the foreground alpha-matted.
pub trait Matting {
    fn remove_background(&self, image: &[u8]) -> Result<Vec<u8>, MattingError>;
}

/// Default model profile; chosen for memory stability over edge quality.
pub const DEFAULT_MODEL: &str = "isnet-general-use";

/// Blocking client for a rembg-compatible HTTP service.
pub struct RembgClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    model: String,
}

impl RembgClient {
    /// `endpoint` is the service base URL (e.g. `http://127.0.0.1:7000`),
    /// `model` the profile name passed on every request.
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }
}

impl Matting for RembgClient {
    fn remove_background(&self, image: &[u8]) -> Result<Vec<u8>, MattingError> {
        let url = format!("{}/api/remove", self.endpoint);
        let response = self
            .http
            .post(url)
            .query(&[("model", self.model.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()?;
        if !response.status().is_success() {
            return Err(MattingError::Service {
                status: response.status().as_u16(),
                message: response.text().unwrap_or_default(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_strips_trailing_slash_from_endpoint() {
        let client = RembgClient::new("http://localhost:7000/", DEFAULT_MODEL);
        assert_eq!(client.endpoint, "http://localhost:7000");
    }

    #[test]
    fn default_model_is_the_small_profile() {
        assert_eq!(DEFAULT_MODEL, "isnet-general-use");
    }
}
