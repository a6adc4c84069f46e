//! HTTP client for the request/response transport.

use reqwest::{Client, Url};

use crate::client::ClientError;
use crate::document::{ChangeUnit, Content};
use crate::http::{ErrorResponse, LoadResponse, SaveRequest, SaveResponse};
use crate::protocol::SessionId;

/// Loads and saves one document over `/api/documents/{id}`.
#[derive(Clone)]
pub struct DocumentClient {
    client: Client,
    base_url: String,
    doc_id: String,
    sender: Option<SessionId>,
}

impl DocumentClient {
    pub fn new(base_url: &str, doc_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            doc_id: doc_id.into(),
            sender: None,
        }
    }

    /// Exclude a push-transport session from relays triggered by this client.
    pub fn with_sender(mut self, sender: SessionId) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// `{base}/api/documents/{id}`, with the id encoded as one path segment.
    fn url(&self) -> Result<Url, ClientError> {
        let invalid = |reason: String| ClientError::Connect {
            url: self.base_url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "documents", self.doc_id.as_str()]);
        Ok(url)
    }

    /// GET the document, creating it server-side on first access.
    pub async fn load(&self) -> Result<Content, ClientError> {
        let resp = self.client.get(self.url()?).send().await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        let body: LoadResponse = resp.json().await?;
        Ok(body.data)
    }

    /// PUT full content; a `delta` is relayed to the document's room.
    pub async fn save(&self, content: &Content, delta: Option<&ChangeUnit>) -> Result<(), ClientError> {
        let request = SaveRequest {
            data: content.clone(),
            delta: delta.cloned(),
            sender: self.sender,
        };
        let resp = self.client.put(self.url()?).json(&request).send().await?;
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }

        let body: SaveResponse = resp.json().await?;
        if !body.success {
            return Err(ClientError::Server("save was not acknowledged".to_string()));
        }
        Ok(())
    }

    async fn api_error(resp: reqwest::Response) -> ClientError {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error)
            .unwrap_or(text);
        ClientError::Api { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = DocumentClient::new("http://127.0.0.1:3000/", "doc42");
        assert_eq!(client.url().unwrap().as_str(), "http://127.0.0.1:3000/api/documents/doc42");
        assert_eq!(client.doc_id(), "doc42");
    }

    #[test]
    fn test_doc_id_is_one_path_segment() {
        let client = DocumentClient::new("http://127.0.0.1:3000", "notes/2024 q1?draft#2");
        assert_eq!(
            client.url().unwrap().as_str(),
            "http://127.0.0.1:3000/api/documents/notes%2F2024%20q1%3Fdraft%232"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let client = DocumentClient::new("not a url", "doc");
        assert!(matches!(client.url(), Err(ClientError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_load_unreachable_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = DocumentClient::new(&format!("http://127.0.0.1:{port}"), "doc");
        assert!(matches!(client.load().await, Err(ClientError::Http(_))));
    }
}
