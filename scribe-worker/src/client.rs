//! Typed HTTP client for the scribe-ds API

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use scribe_common::api::{
    ErrorResponse, SuccessResponse, UploadResponse, WorkAssignment, WorkResponse,
};

const USER_AGENT: &str = concat!("scribe-worker/", env!("CARGO_PKG_VERSION"));

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}

impl ClientError {
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => Some(code),
            ClientError::Http(_) => None,
        }
    }

    /// Nothing to do right now, or another worker was faster
    pub fn is_no_work(&self) -> bool {
        matches!(self.code(), Some("NO_WORK_AVAILABLE") | Some("CONFLICT"))
    }
}

/// scribe-ds API client
#[derive(Clone)]
pub struct ScribeClient {
    http_client: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl ScribeClient {
    /// `server_url` is the server root, e.g. `http://host:6000`
    pub fn new(server_url: &str, api_key: &str) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            http_client,
            api_base: format!("{}/apiv1", server_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}/{}", self.api_base, route, self.api_key)
    }

    pub async fn get_work(&self, language: &str) -> Result<WorkAssignment, ClientError> {
        let response = self
            .http_client
            .get(self.url(&format!("get_work/{}", language)))
            .send()
            .await?;
        let body: WorkResponse = parse(response).await?;
        Ok(body.work)
    }

    pub async fn register_wip(&self, wid: i64) -> Result<(), ClientError> {
        let response = self
            .http_client
            .get(self.url(&format!("register_wip/{}", wid)))
            .send()
            .await?;
        parse::<SuccessResponse>(response).await.map(|_| ())
    }

    pub async fn cancel_work(&self, wid: i64) -> Result<(), ClientError> {
        let response = self
            .http_client
            .get(self.url(&format!("cancel_work/{}", wid)))
            .send()
            .await?;
        parse::<SuccessResponse>(response).await.map(|_| ())
    }

    /// Returns the path the server stored the transcript at
    pub async fn upload_result(
        &self,
        wid: i64,
        transcript: Vec<u8>,
        model: &str,
    ) -> Result<String, ClientError> {
        let file = Part::bytes(transcript)
            .file_name(format!("{}.vtt", wid))
            .mime_str("text/vtt")?;
        let form = Form::new()
            .part("file", file)
            .text("model", model.to_string());

        let response = self
            .http_client
            .post(self.url(&format!("upload_result/{}", wid)))
            .multipart(form)
            .send()
            .await?;
        let body: UploadResponse = parse(response).await?;
        Ok(body.transcript_file)
    }
}

/// Decode a success body, or turn the error body into [`ClientError::Api`]
async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let text = response.text().await?;
    Err(match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(body) => ClientError::Api {
            status: status.as_u16(),
            code: body.error.code,
            message: body.error.message,
        },
        Err(_) => ClientError::Api {
            status: status.as_u16(),
            code: "HTTP_ERROR".to_string(),
            message: text,
        },
    })
}
