//! REST client bound to one index.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::bulk::{self, BulkOperation, BulkSummary};
use crate::error::IndexError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Basic facts reported by `GET /`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub cluster_name: String,
    pub version: String,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: Option<f64>,
    pub source: Value,
}

#[derive(Deserialize)]
struct RootResponse {
    #[serde(default)]
    cluster_name: String,
    version: VersionInfo,
}

#[derive(Deserialize)]
struct VersionInfo {
    number: String,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source", default)]
    source: Option<Value>,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    total: Total,
    #[serde(default)]
    hits: Vec<RawHit>,
}

/// ES 7+ reports `{"value": n}`, older versions a bare number.
#[derive(Deserialize)]
#[serde(untagged)]
enum Total {
    Count(u64),
    Object { value: u64 },
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: Value,
}

/// Client for a single index on an Elasticsearch-compatible store.
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct IndexClient {
    http: reqwest::Client,
    base_url: Url,
    index: String,
}

impl IndexClient {
    /// Create a client for `index` on the store at `base_url`.
    ///
    /// No request is made here.
    pub fn new(base_url: &str, index: impl Into<String>) -> Result<Self, IndexError> {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Self::with_http_client(http, base_url, index)
    }

    /// Create a client that reuses an existing `reqwest::Client`.
    pub fn with_http_client(
        http: reqwest::Client,
        base_url: &str,
        index: impl Into<String>,
    ) -> Result<Self, IndexError> {
        let mut base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(IndexError::InvalidUrl(format!("{base_url} cannot be a base URL")));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let index = index.into();
        if index.is_empty() {
            return Err(IndexError::InvalidUrl("index name is empty".to_string()));
        }

        Ok(Self {
            http,
            base_url,
            index,
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `base/<segment>/<segment>...`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Check that the store answers and report its version.
    pub async fn ping(&self) -> Result<ClusterInfo, IndexError> {
        let response = self.http.get(self.base_url.clone()).send().await?;
        let body = checked_body(response).await?;
        let root: RootResponse = serde_json::from_str(&body)
            .map_err(|e| IndexError::Response(format!("cluster info: {e}")))?;
        Ok(ClusterInfo {
            cluster_name: root.cluster_name,
            version: root.version.number,
        })
    }

    pub async fn index_exists(&self) -> Result<bool, IndexError> {
        let url = self.endpoint(&[self.index.as_str()])?;
        let response = self.http.head(url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(IndexError::Status {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    /// Create the index with `schema` (settings and mappings).
    ///
    /// Losing a creation race to another writer is not an error.
    pub async fn create_index(&self, schema: &Value) -> Result<(), IndexError> {
        let url = self.endpoint(&[self.index.as_str()])?;
        let response = self.http.put(url).json(schema).send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::info!("Created index {}", self.index);
            return Ok(());
        }

        let body = response.text().await?;
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            tracing::debug!("Index {} already exists", self.index);
            return Ok(());
        }
        Err(IndexError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Send every operation in one `_bulk` request.
    ///
    /// An `Err` means nothing can be assumed about which operations were
    /// applied. Per-document rejections are reported in the summary instead.
    pub async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkSummary, IndexError> {
        if operations.is_empty() {
            return Ok(BulkSummary::default());
        }

        let body = bulk::encode(&self.index, operations)?;
        let url = self.endpoint(&["_bulk"])?;
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let body = checked_body(response).await?;
        let summary = bulk::summarize(&body)?;

        tracing::debug!(
            "Bulk request applied {} of {} operations in {}ms",
            summary.succeeded,
            operations.len(),
            summary.took_ms
        );
        Ok(summary)
    }

    /// Fetch the source of the document stored under `id`.
    pub async fn get(&self, id: &str) -> Result<Option<Value>, IndexError> {
        let url = self.endpoint(&[self.index.as_str(), "_doc", id])?;
        let response = self.http.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = checked_body(response).await?;
        let document: GetResponse = serde_json::from_str(&body)
            .map_err(|e| IndexError::Response(format!("get response: {e}")))?;
        Ok(document.found.then_some(document.source).flatten())
    }

    /// Full-text search with `simple_query_string`, paged by `from`/`size`.
    pub async fn search(
        &self,
        query: &str,
        from: usize,
        size: usize,
    ) -> Result<SearchPage, IndexError> {
        let url = self.endpoint(&[self.index.as_str(), "_search"])?;
        let request = json!({
            "query": { "simple_query_string": { "query": query } },
            "from": from,
            "size": size,
        });
        let response = self.http.post(url).json(&request).send().await?;
        let body = checked_body(response).await?;
        let result: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| IndexError::Response(format!("search response: {e}")))?;

        let total = match result.hits.total {
            Total::Count(value) | Total::Object { value } => value,
        };
        Ok(SearchPage {
            total,
            hits: result
                .hits
                .hits
                .into_iter()
                .map(|hit| SearchHit {
                    id: hit.id,
                    score: hit.score,
                    source: hit.source,
                })
                .collect(),
        })
    }
}

/// Read the body, turning a non-2xx status into [`IndexError::Status`].
async fn checked_body(response: reqwest::Response) -> Result<String, IndexError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(IndexError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use rstest::rstest;

    #[rstest]
    #[case("http://localhost:9200", "http://localhost:9200/songs/_doc/a%2Fb%20c.flac")]
    #[case("http://localhost:9200/", "http://localhost:9200/songs/_doc/a%2Fb%20c.flac")]
    #[case("http://proxy/es", "http://proxy/es/songs/_doc/a%2Fb%20c.flac")]
    fn test_endpoint_encodes_ids(#[case] base: &str, #[case] expected: &str) {
        let client = IndexClient::new(base, "songs").unwrap();
        let url = client.endpoint(&["songs", "_doc", "a/b c.flac"]).unwrap();
        assert_eq!(url.as_str(), expected);
    }

    #[test]
    fn test_rejects_bad_configuration() {
        assert!(matches!(
            IndexClient::new("not a url", "songs"),
            Err(IndexError::InvalidUrl(_))
        ));
        assert!(matches!(
            IndexClient::new("http://localhost:9200", ""),
            Err(IndexError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_ping() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .with_status(200)
            .with_body(r#"{"cluster_name":"music","version":{"number":"7.17.9"}}"#)
            .create_async()
            .await;

        let client = IndexClient::new(&server.url(), "songs").unwrap();
        let info = client.ping().await.unwrap();
        assert_eq!(info.cluster_name, "music");
        assert_eq!(info.version, "7.17.9");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ping_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .with_status(503)
            .with_body("starting")
            .create_async()
            .await;

        let client = IndexClient::new(&server.url(), "songs").unwrap();
        assert!(matches!(
            client.ping().await,
            Err(IndexError::Status { status: 503, .. })
        ));
    }

    #[rstest]
    #[case(200, Some(true))]
    #[case(404, Some(false))]
    #[case(500, None)]
    #[tokio::test]
    async fn test_index_exists(#[case] status: usize, #[case] expected: Option<bool>) {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("HEAD", "/songs")
            .with_status(status)
            .create_async()
            .await;

        let client = IndexClient::new(&server.url(), "songs").unwrap();
        assert_eq!(client.index_exists().await.ok(), expected);
    }

    #[tokio::test]
    async fn test_create_index_sends_schema() {
        let mut server = mockito::Server::new_async().await;
        let schema = json!({ "settings": { "number_of_shards": 1 } });
        let mock = server
            .mock("PUT", "/songs")
            .match_body(Matcher::Json(schema.clone()))
            .with_status(200)
            .with_body(r#"{"acknowledged":true}"#)
            .create_async()
            .await;

        let client = IndexClient::new(&server.url(), "songs").unwrap();
        client.create_index(&schema).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_index_race_is_ok() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/songs")
            .with_status(400)
            .with_body(r#"{"error":{"type":"resource_already_exists_exception"},"status":400}"#)
            .create_async()
            .await;

        let client = IndexClient::new(&server.url(), "songs").unwrap();
        assert!(client.create_index(&json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_bulk_posts_ndjson() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/_bulk")
            .match_header("content-type", "application/x-ndjson")
            .match_body(Matcher::Regex(r#""delete":\{"_id":"old.mp3","_index":"songs"\}"#.to_string()))
            .with_status(200)
            .with_body(
                r#"{"took":3,"errors":false,"items":[
                    {"index":{"_id":"new.mp3","status":201}},
                    {"delete":{"_id":"old.mp3","status":200}}]}"#,
            )
            .create_async()
            .await;

        let client = IndexClient::new(&server.url(), "songs").unwrap();
        let summary = client
            .bulk(&[
                BulkOperation::upsert("new.mp3", json!({ "file": "new.mp3" })),
                BulkOperation::delete("old.mp3"),
            ])
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert!(summary.is_complete());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_bulk_makes_no_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/_bulk").expect(0).create_async().await;

        let client = IndexClient::new(&server.url(), "songs").unwrap();
        assert_eq!(client.bulk(&[]).await.unwrap(), BulkSummary::default());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bulk_failure_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/_bulk")
            .with_status(429)
            .with_body("too many requests")
            .create_async()
            .await;

        let client = IndexClient::new(&server.url(), "songs").unwrap();
        let err = client
            .bulk(&[BulkOperation::delete("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_get() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/songs/_doc/a%2Fb.flac")
            .with_status(200)
            .with_body(r#"{"_id":"a/b.flac","found":true,"_source":{"file":"a/b.flac"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/songs/_doc/missing")
            .with_status(404)
            .with_body(r#"{"_id":"missing","found":false}"#)
            .create_async()
            .await;

        let client = IndexClient::new(&server.url(), "songs").unwrap();
        assert_eq!(
            client.get("a/b.flac").await.unwrap(),
            Some(json!({ "file": "a/b.flac" }))
        );
        assert_eq!(client.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_search() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/songs/_search")
            .match_body(Matcher::Json(json!({
                "query": { "simple_query_string": { "query": "miles davis" } },
                "from": 20,
                "size": 10,
            })))
            .with_status(200)
            .with_body(
                r#"{"hits":{"total":{"value":21,"relation":"eq"},"hits":[
                    {"_id":"kind_of_blue.flac","_score":3.2,"_source":{"artist":"Miles Davis"}}]}}"#,
            )
            .create_async()
            .await;

        let client = IndexClient::new(&server.url(), "songs").unwrap();
        let page = client.search("miles davis", 20, 10).await.unwrap();
        assert_eq!(page.total, 21);
        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.hits[0].id, "kind_of_blue.flac");
        assert_eq!(page.hits[0].source["artist"], "Miles Davis");
        mock.assert_async().await;
    }
}
