//! JSON-over-HTTP implementations of the server seams.
//!
//! The HTTP library is abstracted by [`HttpClient`]; implementations map
//! non-2xx answers to [`ApiError::Status`] with the `errorCode` of the
//! response body, and connection problems to [`ApiError::Transport`].

use crate::api::{KnownVersion, OwnedApi, SimpleApi, UpdatesResponse};
use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;

/// Minimal async HTTP client exchanging JSON documents.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// `GET url`.
    async fn get(&self, url: &str) -> ApiResult<Value>;

    /// `POST url` with a JSON body.
    async fn post(&self, url: &str, body: Value) -> ApiResult<Value>;

    /// `PUT url` with a JSON body.
    async fn put(&self, url: &str, body: Value) -> ApiResult<Value>;
}

/// Builds an [`ApiError::Status`] from an error answer body.
#[cfg(test)]
fn status_error(code: u16, body: &Value) -> ApiError {
    ApiError::status(code, body.get("errorCode").and_then(Value::as_str))
}

fn endpoint(base_url: &str, entity: &str, path: &str) -> String {
    format!("{}/{entity}/v1{path}", base_url.trim_end_matches('/'))
}

fn decode<T: DeserializeOwned>(value: Value) -> ApiResult<T> {
    Ok(serde_json::from_value(value)?)
}

fn encode<T: Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(|e| ApiError::Decode(format!("cannot encode request: {e}")))
}

/// [`OwnedApi`] over the bulk endpoints of `/<entity>/v1`.
pub struct HttpOwnedApi<C, D> {
    base_url: String,
    entity: String,
    client: C,
    _dto: PhantomData<fn() -> D>,
}

impl<C: HttpClient, D> HttpOwnedApi<C, D> {
    /// Creates the API of `entity` (e.g. `tag`) under `base_url`.
    pub fn new(base_url: impl Into<String>, entity: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            entity: entity.into(),
            client,
            _dto: PhantomData,
        }
    }

    fn url(&self, path: &str) -> String {
        endpoint(&self.base_url, &self.entity, path)
    }
}

#[async_trait]
impl<C, D> OwnedApi<D> for HttpOwnedApi<C, D>
where
    C: HttpClient,
    D: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn create_on_server(&self, dtos: Vec<D>) -> ApiResult<Vec<D>> {
        let body = encode(&dtos)?;
        decode(self.client.post(&self.url("/_bulkCreate"), body).await?)
    }

    async fn get_updates_from_server(&self, known: Vec<KnownVersion>) -> ApiResult<UpdatesResponse<D>> {
        let body = encode(&known)?;
        decode(self.client.post(&self.url("/_bulkGetUpdates"), body).await?)
    }

    async fn send_updates_to_server(&self, dtos: Vec<D>) -> ApiResult<Vec<D>> {
        let body = encode(&dtos)?;
        decode(self.client.put(&self.url("/_bulkUpdate"), body).await?)
    }

    async fn delete_from_server(&self, uuids: Vec<String>) -> ApiResult<()> {
        let body = encode(&uuids)?;
        self.client.post(&self.url("/_bulkDelete"), body).await?;
        Ok(())
    }
}

/// [`SimpleApi`] over `/<entity>/v1`.
pub struct HttpSimpleApi<C, D> {
    base_url: String,
    entity: String,
    client: C,
    _dto: PhantomData<fn() -> D>,
}

impl<C: HttpClient, D> HttpSimpleApi<C, D> {
    /// Creates the API of `entity` (e.g. `trail-tag`) under `base_url`.
    pub fn new(base_url: impl Into<String>, entity: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            entity: entity.into(),
            client,
            _dto: PhantomData,
        }
    }

    fn url(&self, path: &str) -> String {
        endpoint(&self.base_url, &self.entity, path)
    }
}

#[async_trait]
impl<C, D> SimpleApi<D> for HttpSimpleApi<C, D>
where
    C: HttpClient,
    D: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get_all(&self) -> ApiResult<Vec<D>> {
        decode(self.client.get(&self.url("")).await?)
    }

    async fn create_on_server(&self, dtos: Vec<D>) -> ApiResult<Vec<D>> {
        let body = encode(&dtos)?;
        decode(self.client.post(&self.url("/_bulkCreate"), body).await?)
    }

    async fn delete_from_server(&self, dtos: Vec<D>) -> ApiResult<()> {
        let body = encode(&dtos)?;
        self.client.post(&self.url("/delete"), body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<(String, String, Option<Value>)>>,
        answer: Mutex<Option<ApiResult<Value>>>,
    }

    impl RecordingClient {
        fn answering(answer: ApiResult<Value>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                answer: Mutex::new(Some(answer)),
            }
        }

        fn record(&self, method: &str, url: &str, body: Option<Value>) -> ApiResult<Value> {
            self.calls.lock().push((method.into(), url.into(), body));
            let fallback = if url.ends_with("/_bulkGetUpdates") {
                json!({"deleted": [], "updated": [], "created": []})
            } else {
                json!([])
            };
            self.answer.lock().clone().unwrap_or(Ok(fallback))
        }
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn get(&self, url: &str) -> ApiResult<Value> {
            self.record("GET", url, None)
        }

        async fn post(&self, url: &str, body: Value) -> ApiResult<Value> {
            self.record("POST", url, Some(body))
        }

        async fn put(&self, url: &str, body: Value) -> ApiResult<Value> {
            self.record("PUT", url, Some(body))
        }
    }

    #[tokio::test]
    async fn owned_endpoints() {
        let api: HttpOwnedApi<_, Value> =
            HttpOwnedApi::new("https://api.example.com/", "tag", RecordingClient::default());

        api.create_on_server(vec![json!({"uuid": "a"})]).await.unwrap();
        api.get_updates_from_server(vec![KnownVersion {
            uuid: "a".into(),
            owner: "o".into(),
            version: 2,
        }])
        .await
        .unwrap();
        api.send_updates_to_server(vec![]).await.unwrap();
        api.delete_from_server(vec!["a".into()]).await.unwrap();

        let calls = api.client.calls.lock().clone();
        let summary: Vec<_> = calls.iter().map(|(m, u, _)| format!("{m} {u}")).collect();
        assert_eq!(
            summary,
            vec![
                "POST https://api.example.com/tag/v1/_bulkCreate",
                "POST https://api.example.com/tag/v1/_bulkGetUpdates",
                "PUT https://api.example.com/tag/v1/_bulkUpdate",
                "POST https://api.example.com/tag/v1/_bulkDelete",
            ]
        );
        assert_eq!(calls[1].2, Some(json!([{"uuid": "a", "owner": "o", "version": 2}])));
        assert_eq!(calls[3].2, Some(json!(["a"])));
    }

    #[tokio::test]
    async fn simple_endpoints() {
        let client = RecordingClient::answering(Ok(json!([{"tagUuid": "g", "trailUuid": "t"}])));
        let api: HttpSimpleApi<_, Value> = HttpSimpleApi::new("https://api.example.com", "trail-tag", client);

        assert_eq!(api.get_all().await.unwrap().len(), 1);
        api.delete_from_server(vec![json!({"tagUuid": "g"})]).await.unwrap();

        let calls = api.client.calls.lock().clone();
        assert_eq!(calls[0].1, "https://api.example.com/trail-tag/v1");
        assert_eq!(calls[1].1, "https://api.example.com/trail-tag/v1/delete");
    }

    #[tokio::test]
    async fn status_errors_pass_through() {
        let body = json!({"errorCode": "quota-exceeded-tags"});
        let client = RecordingClient::answering(Err(status_error(403, &body)));
        let api: HttpOwnedApi<_, Value> = HttpOwnedApi::new("http://h", "tag", client);
        let err = api.create_on_server(vec![json!({})]).await.unwrap_err();
        assert!(err.is_quota());
    }
}
