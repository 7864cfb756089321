//! HTTP ledger client
//!
//! Talks to a ledger gateway over its public HTTP API. Plain-text endpoints
//! return winston amounts and ids; transaction data is streamed to disk so
//! archives never have to fit in memory.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::client::{LedgerClient, LedgerError};
use super::types::{
    ChunkPayload, SearchQuery, TransactionHeader, TransactionStatus, SEARCH_LIMIT,
};

const SEARCH_QUERY: &str = "query($owners: [String!], $tags: [TagFilter!], $first: Int) { \
    transactions(owners: $owners, tags: $tags, first: $first) { edges { node { id } } } }";

/// Ledger client backed by a gateway's HTTP API
#[derive(Clone)]
pub struct HttpLedgerClient {
    client: Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_text(&self, path: &str) -> Result<String, LedgerError> {
        let response = self.client.get(self.url(path)).send().await?;
        let response = check(response, path).await?;
        Ok(response.text().await?.trim().to_string())
    }

    async fn post_json<T: serde::Serialize + Sync>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<(), LedgerError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        check(response, path).await?;
        Ok(())
    }
}

/// Map non-success responses to errors.
async fn check(response: Response, what: &str) -> Result<Response, LedgerError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(LedgerError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LedgerError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[derive(Deserialize)]
struct StatusBody {
    block_height: u64,
    block_indep_hash: String,
    number_of_confirmations: u64,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct GraphQlData {
    transactions: GraphQlConnection,
}

#[derive(Deserialize)]
struct GraphQlConnection {
    edges: Vec<GraphQlEdge>,
}

#[derive(Deserialize)]
struct GraphQlEdge {
    node: GraphQlNode,
}

#[derive(Deserialize)]
struct GraphQlNode {
    id: String,
}

fn search_variables(query: &SearchQuery) -> serde_json::Value {
    match query {
        SearchQuery::Owner(address) => serde_json::json!({
            "owners": [address],
            "first": SEARCH_LIMIT,
        }),
        SearchQuery::Tag { name, value } => serde_json::json!({
            "tags": [{ "name": name, "values": [value] }],
            "first": SEARCH_LIMIT,
        }),
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn price(&self, size: u64) -> Result<String, LedgerError> {
        self.get_text(&format!("price/{}", size)).await
    }

    async fn balance(&self, address: &str) -> Result<String, LedgerError> {
        self.get_text(&format!("wallet/{}/balance", address)).await
    }

    async fn last_transaction(&self, address: &str) -> Result<String, LedgerError> {
        self.get_text(&format!("wallet/{}/last_tx", address)).await
    }

    async fn transaction_anchor(&self) -> Result<String, LedgerError> {
        self.get_text("tx_anchor").await
    }

    async fn transaction_status(&self, id: &str) -> Result<TransactionStatus, LedgerError> {
        let path = format!("tx/{}/status", id);
        let response = self.client.get(self.url(&path)).send().await?;

        match response.status() {
            StatusCode::ACCEPTED => Ok(TransactionStatus::Pending),
            StatusCode::NOT_FOUND => Ok(TransactionStatus::NotFound),
            _ => {
                let body: StatusBody = check(response, &path).await?.json().await?;
                Ok(TransactionStatus::Confirmed {
                    block_height: body.block_height,
                    block_indep_hash: body.block_indep_hash,
                    number_of_confirmations: body.number_of_confirmations,
                })
            }
        }
    }

    async fn transaction(&self, id: &str) -> Result<TransactionHeader, LedgerError> {
        let path = format!("tx/{}", id);
        let response = self.client.get(self.url(&path)).send().await?;

        // Pending transactions answer 202 with a plain-text body
        if response.status() == StatusCode::ACCEPTED {
            return Err(LedgerError::NotFound(format!("{} (pending)", id)));
        }

        let response = check(response, &path).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| LedgerError::InvalidResponse(e.to_string()))
    }

    async fn download(
        &self,
        id: &str,
        out: &mut tokio::fs::File,
        limit: u64,
    ) -> Result<u64, LedgerError> {
        let response = self.client.get(self.url(id)).send().await?;
        let response = check(response, id).await?;
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(LedgerError::TooLarge { limit });
        }

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            if written > limit {
                return Err(LedgerError::TooLarge { limit });
            }
            out.write_all(&chunk).await?;
        }
        out.flush().await?;

        tracing::debug!(id = %id, bytes = written, "Downloaded transaction data");
        Ok(written)
    }

    async fn post_transaction(&self, header: &TransactionHeader) -> Result<(), LedgerError> {
        self.post_json("tx", header).await
    }

    async fn post_chunk(&self, chunk: &ChunkPayload) -> Result<(), LedgerError> {
        self.post_json("chunk", chunk).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<String>, LedgerError> {
        let body = serde_json::json!({
            "query": SEARCH_QUERY,
            "variables": search_variables(query),
        });

        let response = self.client.post(self.url("graphql")).json(&body).send().await?;
        let result: GraphQlResponse = check(response, "graphql").await?.json().await?;

        if !result.errors.is_empty() {
            return Err(LedgerError::InvalidResponse(format!(
                "search failed: {}",
                serde_json::Value::Array(result.errors)
            )));
        }

        let data = result
            .data
            .ok_or_else(|| LedgerError::InvalidResponse("search returned no data".to_string()))?;

        Ok(data
            .transactions
            .edges
            .into_iter()
            .map(|edge| edge.node.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tokio::io::AsyncReadExt;

    /// Serve a stand-in gateway on an ephemeral port.
    async fn gateway() -> HttpLedgerClient {
        let app = Router::new()
            .route("/price/:size", get(|Path(size): Path<u64>| async move { (size * 10).to_string() }))
            .route("/wallet/:address/balance", get(|| async { "5000\n" }))
            .route("/tx_anchor", get(|| async { "anchor" }))
            .route(
                "/tx/:id/status",
                get(|Path(id): Path<String>| async move {
                    match id.as_str() {
                        "mined" => (
                            StatusCode::OK,
                            r#"{"block_height":7,"block_indep_hash":"h","number_of_confirmations":2}"#,
                        ),
                        "pending" => (StatusCode::ACCEPTED, "Pending"),
                        _ => (StatusCode::NOT_FOUND, "Not Found"),
                    }
                }),
            )
            .route("/tx", post(|| async { StatusCode::BAD_REQUEST }))
            .route(
                "/graphql",
                post(|Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(body["variables"]["tags"][0]["values"][0], "v");
                    Json(serde_json::json!({
                        "data": { "transactions": { "edges": [
                            { "node": { "id": "a" } },
                            { "node": { "id": "b" } }
                        ] } }
                    }))
                }),
            )
            .route("/:id", get(|| async { vec![42u8; 100_000] }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        HttpLedgerClient::new(&format!("http://{}/", addr), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_text_endpoints() {
        let client = gateway().await;
        assert_eq!(client.price(3).await.unwrap(), "30");
        assert_eq!(client.balance("addr").await.unwrap(), "5000");
        assert_eq!(client.transaction_anchor().await.unwrap(), "anchor");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let client = gateway().await;
        assert_eq!(
            client.transaction_status("pending").await.unwrap(),
            TransactionStatus::Pending
        );
        assert_eq!(
            client.transaction_status("gone").await.unwrap(),
            TransactionStatus::NotFound
        );
        assert!(matches!(
            client.transaction_status("mined").await.unwrap(),
            TransactionStatus::Confirmed { block_height: 7, .. }
        ));
    }

    #[tokio::test]
    async fn test_rejected_post() {
        let client = gateway().await;
        let chunk = ChunkPayload {
            data_root: String::new(),
            data_size: "0".into(),
            data_path: String::new(),
            offset: "0".into(),
            chunk: String::new(),
        };
        // no /chunk route on the stand-in
        assert!(client.post_chunk(&chunk).await.is_err());
    }

    #[tokio::test]
    async fn test_search_by_tag() {
        let client = gateway().await;
        let ids = client
            .search(&SearchQuery::Tag {
                name: "n".into(),
                value: "v".into(),
            })
            .await
            .unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_download_streams_to_file() {
        let client = gateway().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");

        let mut file = tokio::fs::File::create(&path).await.unwrap();
        let written = client.download("sometx", &mut file, 100_000).await.unwrap();
        assert_eq!(written, 100_000);

        let mut contents = Vec::new();
        tokio::fs::File::open(&path)
            .await
            .unwrap()
            .read_to_end(&mut contents)
            .await
            .unwrap();
        assert!(contents.iter().all(|b| *b == 42));
    }

    #[tokio::test]
    async fn test_download_over_limit() {
        let client = gateway().await;
        let dir = tempfile::tempdir().unwrap();

        let mut file = tokio::fs::File::create(dir.path().join("data")).await.unwrap();
        let err = client.download("sometx", &mut file, 99_999).await.unwrap_err();
        assert!(matches!(err, LedgerError::TooLarge { limit: 99_999 }));
    }

    #[tokio::test]
    async fn test_unreachable_gateway() {
        let client = HttpLedgerClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = client.balance("addr").await.unwrap_err();
        assert!(err.is_unreachable());
    }
}
