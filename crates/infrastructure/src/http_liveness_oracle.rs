use async_trait::async_trait;
use chainlock_application::LivenessOracle;
use chainlock_core::{AppError, AppResult};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RequestStatusResponse {
    finished: bool,
}

/// Liveness oracle backed by a hosting runtime's request status endpoint.
///
/// Issues `GET {base_url}/requests/{request_id}` and expects
/// `{"finished": bool}`. A 404 means the runtime has no record of the request.
pub struct HttpLivenessOracle {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpLivenessOracle {
    /// Creates a new oracle.
    pub fn new(http_client: reqwest::Client, base_url: &str) -> AppResult<Self> {
        let base_url = Url::parse(base_url).map_err(|error| {
            AppError::Validation(format!("invalid liveness base url '{base_url}': {error}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Validation(format!(
                "liveness base url '{base_url}' cannot carry a path"
            )));
        }

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Request ids are pushed as one path segment, so reserved characters
    /// are percent-encoded.
    fn endpoint_for(&self, request_id: &str) -> AppResult<Url> {
        let mut endpoint = self.base_url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|()| {
                AppError::Validation(format!(
                    "liveness base url '{}' cannot carry a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .push("requests")
            .push(request_id);

        Ok(endpoint)
    }
}

#[async_trait]
impl LivenessOracle for HttpLivenessOracle {
    async fn has_finished(&self, request_id: &str) -> AppResult<Option<bool>> {
        if request_id.trim().is_empty() {
            return Ok(None);
        }

        let response = self
            .http_client
            .get(self.endpoint_for(request_id)?)
            .send()
            .await
            .map_err(|error| {
                AppError::Unavailable(format!(
                    "failed to query request status for '{request_id}': {error}"
                ))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_owned());
            return Err(AppError::Unavailable(format!(
                "request status endpoint returned status {}: {body}",
                status.as_u16()
            )));
        }

        let body = response
            .json::<RequestStatusResponse>()
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to parse request status for '{request_id}': {error}"
                ))
            })?;

        Ok(Some(body.finished))
    }
}
