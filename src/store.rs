//! HTTP document store client.
//!
//! Reads the latest persisted binary snapshot of a description and writes
//! the persisted envelope back. Paths follow the product API:
//!
//! | Document kind       | Description endpoint                                                   |
//! |---------------------|------------------------------------------------------------------------|
//! | `Page`              | `/api/workspaces/{slug}/projects/{project}/pages/{id}/description/`    |
//! | `IssueDescription`  | `/api/workspaces/{slug}/projects/{project}/issues/{id}/description/`   |
//!
//! `GET` returns raw bytes (an empty body means nothing is saved yet);
//! `PATCH` accepts a JSON [`PersistedEnvelope`]. `POST` accepts a
//! [`ConflictResolutionRequest`], merges it into the stored state server-side
//! and answers with the conflict-free binary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::codec;
use crate::errors::SyncError;

/// Kind of entity whose description is being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Page,
    IssueDescription,
}

impl DocumentKind {
    fn collection(self) -> &'static str {
        match self {
            DocumentKind::Page => "pages",
            DocumentKind::IssueDescription => "issues",
        }
    }
}

/// Identifies one editable document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    pub workspace_slug: String,
    pub project_id: String,
    pub kind: DocumentKind,
    pub id: String,
}

impl DocumentId {
    pub fn page(workspace_slug: &str, project_id: &str, id: &str) -> Self {
        Self {
            workspace_slug: workspace_slug.to_string(),
            project_id: project_id.to_string(),
            kind: DocumentKind::Page,
            id: id.to_string(),
        }
    }

    pub fn issue(workspace_slug: &str, project_id: &str, id: &str) -> Self {
        Self {
            kind: DocumentKind::IssueDescription,
            ..Self::page(workspace_slug, project_id, id)
        }
    }

    /// Path of the description endpoint, relative to the API base URL.
    pub fn description_path(&self) -> String {
        format!(
            "/api/workspaces/{}/projects/{}/{}/{}/description/",
            self.workspace_slug,
            self.project_id,
            self.kind.collection(),
            self.id
        )
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            DocumentKind::Page => "page",
            DocumentKind::IssueDescription => "issue",
        };
        write!(f, "{}/{}/{}:{}", self.workspace_slug, self.project_id, kind, self.id)
    }
}

/// Wire and storage form of a document.
///
/// After a successful persist all three fields describe the same content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEnvelope {
    /// Base64-encoded binary state
    pub description_binary: String,
    pub description_html: String,
    /// Structured JSON rendering
    pub description: Value,
}

impl PersistedEnvelope {
    pub fn new(binary: &[u8], html: String, json: Value) -> Self {
        Self {
            description_binary: codec::encode_persisted(binary),
            description_html: html,
            description: json,
        }
    }

    /// Decoded binary state.
    pub fn binary(&self) -> Result<Vec<u8>, SyncError> {
        codec::decode_persisted(Some(&self.description_binary))
    }
}

/// Body of a server-side conflict resolution request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolutionRequest {
    /// Base64-encoded local binary state
    pub description_binary: String,
}

/// Abstraction over the document store for testability.
/// Real implementation: `HttpDocumentStore`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Latest persisted binary snapshot, `None` when nothing is saved.
    async fn fetch_binary(&self, document: &DocumentId) -> Result<Option<Vec<u8>>, SyncError>;

    async fn persist(
        &self,
        document: &DocumentId,
        envelope: &PersistedEnvelope,
    ) -> Result<(), SyncError>;

    /// Submit base64 local state and receive the merged, conflict-free state
    /// the store now holds. An empty result means the store has nothing.
    async fn resolve_conflicts(
        &self,
        document: &DocumentId,
        encoded: &str,
    ) -> Result<Vec<u8>, SyncError>;
}

/// Document store client over HTTP.
pub struct HttpDocumentStore {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("docsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SyncError::Http)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// Full URL of a document's description endpoint.
    pub fn description_url(&self, document: &DocumentId) -> String {
        format!("{}{}", self.base_url, document.description_path())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.header("X-API-Key", token),
            None => request,
        }
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn fetch_binary(&self, document: &DocumentId) -> Result<Option<Vec<u8>>, SyncError> {
        let fetch_err = |reason: String| SyncError::Fetch {
            document: document.to_string(),
            reason,
        };

        let resp = self
            .authorize(self.client.get(self.description_url(document)))
            .header("Accept", "application/octet-stream")
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(fetch_err(format!("store returned {}", status)));
        }

        let body = resp.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
        tracing::debug!(document = %document, bytes = body.len(), "fetched description binary");
        if body.is_empty() {
            Ok(None)
        } else {
            Ok(Some(body.to_vec()))
        }
    }

    async fn persist(
        &self,
        document: &DocumentId,
        envelope: &PersistedEnvelope,
    ) -> Result<(), SyncError> {
        let persist_err = |reason: String| SyncError::Persist {
            document: document.to_string(),
            reason,
        };

        let resp = self
            .authorize(self.client.patch(self.description_url(document)))
            .json(envelope)
            .send()
            .await
            .map_err(|e| persist_err(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            // The store answers failures with an error payload; keep it for the log
            let payload = resp.text().await.unwrap_or_default();
            return Err(persist_err(format!("store returned {}: {}", status, payload)));
        }
        tracing::debug!(document = %document, "persisted description envelope");
        Ok(())
    }

    async fn resolve_conflicts(
        &self,
        document: &DocumentId,
        encoded: &str,
    ) -> Result<Vec<u8>, SyncError> {
        let persist_err = |reason: String| SyncError::Persist {
            document: document.to_string(),
            reason,
        };

        let resp = self
            .authorize(self.client.post(self.description_url(document)))
            .header("Accept", "application/octet-stream")
            .json(&ConflictResolutionRequest {
                description_binary: encoded.to_string(),
            })
            .send()
            .await
            .map_err(|e| persist_err(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let payload = resp.text().await.unwrap_or_default();
            return Err(persist_err(format!("store returned {}: {}", status, payload)));
        }
        let body = resp.bytes().await.map_err(|e| persist_err(e.to_string()))?;
        tracing::debug!(document = %document, bytes = body.len(), "received conflict-free description");
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_description_path() {
        let doc = DocumentId::page("acme", "proj-1", "page-9");
        assert_eq!(
            doc.description_path(),
            "/api/workspaces/acme/projects/proj-1/pages/page-9/description/"
        );
    }

    #[test]
    fn test_issue_description_path() {
        let doc = DocumentId::issue("acme", "proj-1", "issue-3");
        assert_eq!(doc.kind, DocumentKind::IssueDescription);
        assert_eq!(
            doc.description_path(),
            "/api/workspaces/acme/projects/proj-1/issues/issue-3/description/"
        );
    }

    #[test]
    fn test_document_id_display() {
        let doc = DocumentId::issue("acme", "p", "42");
        assert_eq!(doc.to_string(), "acme/p/issue:42");
    }

    #[test]
    fn test_description_url_trims_trailing_slash() {
        let store =
            HttpDocumentStore::new("http://localhost:8000/", None, Duration::from_secs(1)).unwrap();
        let doc = DocumentId::page("w", "p", "1");
        assert_eq!(
            store.description_url(&doc),
            "http://localhost:8000/api/workspaces/w/projects/p/pages/1/description/"
        );
    }

    #[test]
    fn test_envelope_serialization_shape() {
        let envelope = PersistedEnvelope::new(&[1, 2, 3], "<p>x</p>".to_string(), json!({"type": "doc"}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["description_binary"], "AQID");
        assert_eq!(value["description_html"], "<p>x</p>");
        assert_eq!(value["description"]["type"], "doc");
        assert_eq!(envelope.binary().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_envelope_deserialization() {
        let raw = r#"{"description_binary":"","description_html":"","description":{}}"#;
        let envelope: PersistedEnvelope = serde_json::from_str(raw).unwrap();
        assert!(envelope.binary().unwrap().is_empty());
    }

    #[test]
    fn test_conflict_resolution_request_shape() {
        let request = ConflictResolutionRequest {
            description_binary: codec::encode_persisted(&[7]),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"description_binary": "Bw=="})
        );
    }

    #[test]
    fn test_document_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&DocumentKind::IssueDescription).unwrap(),
            r#""issue_description""#
        );
    }
}
