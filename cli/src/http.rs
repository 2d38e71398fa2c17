use std::time::Duration;

use async_trait::async_trait;
use ember_core::{Transport, TransportError};
use ember_shared::{
    ConsumedSecret, CreateSecretRequest, ErrorBody, SECRETS_PATH, SecretId, consume_path,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};

/// [`Transport`] over the server's JSON API.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn create_secret(&self, payload: &str) -> Result<String, TransportError> {
        let request = CreateSecretRequest {
            payload: payload.to_string(),
        };

        let secret_id: SecretId =
            reqwest_json(self.client.post(self.url(SECRETS_PATH)).json(&request)).await?;

        Ok(secret_id.id)
    }

    async fn consume_secret(&self, id: &str) -> Result<String, TransportError> {
        let consumed: ConsumedSecret =
            reqwest_json(self.client.post(self.url(&consume_path(id)))).await?;

        Ok(consumed.payload)
    }
}

async fn reqwest_json<T: serde::de::DeserializeOwned>(
    req: RequestBuilder,
) -> Result<T, TransportError> {
    let response = req.send().await.map_err(unavailable)?;
    let response = check_status(response).await?;
    response.json().await.map_err(unavailable)
}

async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(TransportError::NotFound);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status.to_string(),
    };

    if status.is_server_error() {
        Err(TransportError::Unavailable(message))
    } else {
        Err(TransportError::Rejected(message))
    }
}

fn unavailable(e: reqwest::Error) -> TransportError {
    TransportError::Unavailable(e.to_string())
}
