use crate::application::ports::{ApiAck, RemoteApi};
use crate::domain::entities::{Entity, MultipartForm, Page, RequestBody};
use crate::domain::value_objects::{AccessToken, CollectionName, PageRequest};
use crate::shared::config::ApiConfig;
use crate::shared::error::{AppError, MutationError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPayload {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    total_count: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AckPayload {
    is_success: Option<bool>,
    id: Option<Value>,
    message: Option<String>,
}

impl AckPayload {
    fn id(&self) -> Option<i64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// `RemoteApi` over the admin REST API with bearer authentication.
#[derive(Clone)]
pub struct RestApiClient {
    client: Client,
    base_url: String,
    token: AccessToken,
}

impl RestApiClient {
    pub fn new(config: &ApiConfig, token: AccessToken) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, collection: &CollectionName, suffix: Option<&str>) -> String {
        match suffix {
            Some(suffix) => format!("{}/{}/{}", self.base_url, collection, suffix),
            None => format!("{}/{}", self.base_url, collection),
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(self.token.as_str())
    }

    async fn read_json(
        &self,
        builder: RequestBuilder,
        url: &str,
    ) -> Result<Value, MutationError> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        let text = response.text().await?;
        tracing::debug!(target: "sync::http", url, status = status.as_u16(), "response received");

        if !status.is_success() {
            return Err(rejection_from(status, &text));
        }
        serde_json::from_str(&text).map_err(|err| {
            MutationError::rejection(
                Some(status.as_u16()),
                Some(format!("Malformed response from {url}: {err}")),
            )
        })
    }

    async fn send_ack(
        &self,
        builder: RequestBuilder,
        url: &str,
    ) -> Result<ApiAck, MutationError> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        let text = response.text().await?;
        tracing::debug!(target: "sync::http", url, status = status.as_u16(), "response received");

        if !status.is_success() {
            return Err(rejection_from(status, &text));
        }

        // some endpoints answer a successful write with an empty body
        let payload = if text.trim().is_empty() {
            AckPayload::default()
        } else {
            serde_json::from_str::<AckPayload>(&text).map_err(|err| {
                tracing::warn!(target: "sync::http", url, error = %err, "unparseable write response");
                MutationError::rejection(
                    Some(status.as_u16()),
                    Some(format!("Malformed response from {url}: {err}")),
                )
            })?
        };
        if payload.is_success == Some(false) {
            return Err(MutationError::rejection(
                Some(status.as_u16()),
                payload.message,
            ));
        }
        Ok(ApiAck {
            id: payload.id(),
            message: payload.message,
        })
    }
}

fn rejection_from(status: StatusCode, text: &str) -> MutationError {
    let message = serde_json::from_str::<AckPayload>(text)
        .ok()
        .and_then(|payload| payload.message);
    MutationError::rejection(Some(status.as_u16()), message)
}

fn multipart_form(form: MultipartForm) -> Result<Form, MutationError> {
    let mut multipart = Form::new();
    for (name, value) in form.fields {
        multipart = multipart.text(name, value);
    }
    for file in form.files {
        let part = Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.content_type)
            .map_err(|err| {
                MutationError::rejection(None, Some(format!("Invalid content type: {err}")))
            })?;
        multipart = multipart.part(file.field, part);
    }
    Ok(multipart)
}

fn with_body(builder: RequestBuilder, body: RequestBody) -> Result<RequestBuilder, MutationError> {
    match body {
        RequestBody::Json(value) => Ok(builder.json(&value)),
        RequestBody::Multipart(form) => Ok(builder.multipart(multipart_form(form)?)),
    }
}

#[async_trait]
impl RemoteApi for RestApiClient {
    async fn list(
        &self,
        collection: &CollectionName,
        page: PageRequest,
    ) -> Result<Page<Entity>, MutationError> {
        let url = self.url(collection, None);
        let value = self
            .read_json(self.client.get(&url).query(&page.query_pairs()), &url)
            .await?;
        let payload: ListPayload = serde_json::from_value(value).map_err(|err| {
            MutationError::rejection(None, Some(format!("Malformed listing from {url}: {err}")))
        })?;

        let mut items = Vec::with_capacity(payload.items.len());
        for raw in payload.items {
            match Entity::from_json(raw) {
                Ok(entity) => items.push(entity),
                Err(reason) => {
                    tracing::warn!(
                        target: "sync::http",
                        collection = %collection,
                        reason = %reason,
                        "skipping malformed list item"
                    );
                }
            }
        }
        Ok(Page::new(items, payload.total_count))
    }

    async fn fetch(&self, collection: &CollectionName, id: i64) -> Result<Entity, MutationError> {
        let url = self.url(collection, Some(&id.to_string()));
        let value = self.read_json(self.client.get(&url), &url).await?;
        Entity::from_json(value).map_err(|reason| {
            MutationError::rejection(None, Some(format!("Malformed entity from {url}: {reason}")))
        })
    }

    async fn create(
        &self,
        collection: &CollectionName,
        body: RequestBody,
    ) -> Result<ApiAck, MutationError> {
        let url = self.url(collection, None);
        let builder = with_body(self.client.post(&url), body)?;
        self.send_ack(builder, &url).await
    }

    async fn update(
        &self,
        collection: &CollectionName,
        id: Option<i64>,
        body: RequestBody,
    ) -> Result<ApiAck, MutationError> {
        let url = match id {
            Some(id) => self.url(collection, Some(&id.to_string())),
            None => self.url(collection, None),
        };
        let builder = with_body(self.client.put(&url), body)?;
        self.send_ack(builder, &url).await
    }

    async fn delete(
        &self,
        collection: &CollectionName,
        id: i64,
        body: Option<Value>,
    ) -> Result<ApiAck, MutationError> {
        let url = self.url(collection, Some(&id.to_string()));
        let mut builder = self.client.delete(&url);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        self.send_ack(builder, &url).await
    }

    async fn reorder(
        &self,
        collection: &CollectionName,
        body: Value,
    ) -> Result<ApiAck, MutationError> {
        let url = self.url(collection, Some("reorder"));
        self.send_ack(self.client.put(&url).json(&body), &url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::FilePart;
    use crate::domain::value_objects::EntityKey;
    use axum::Json;
    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::{Path, Query};
    use axum::http::HeaderMap;
    use axum::routing::{get, post, put};
    use serde_json::{Map, json};
    use std::collections::HashMap;

    async fn spawn_stub_api() -> (String, tokio::task::JoinHandle<()>) {
        let app = Router::new()
            .route(
                "/course",
                get(
                    |headers: HeaderMap, Query(query): Query<HashMap<String, String>>| async move {
                        let authorized = headers
                            .get("authorization")
                            .and_then(|value| value.to_str().ok())
                            == Some("Bearer test-token");
                        if !authorized {
                            return (
                                axum::http::StatusCode::UNAUTHORIZED,
                                Json(json!({"message": "Token missing"})),
                            );
                        }
                        let page = query.get("Page").cloned().unwrap_or_default();
                        let take = query.get("Take").cloned().unwrap_or_default();
                        (
                            axum::http::StatusCode::OK,
                            Json(json!({
                                "items": [
                                    {"id": 1, "name": format!("page {page} take {take}")},
                                    {"name": "missing id"},
                                    {"id": "2", "name": "string id"}
                                ],
                                "totalCount": 21
                            })),
                        )
                    },
                )
                .post(|| async { Json(json!({"isSuccess": true, "id": 55})) }),
            )
            .route(
                "/course/{id}",
                get(|Path(id): Path<i64>| async move {
                    Json(json!({"id": id, "name": "Fetched", "version": 4}))
                })
                .put(|| async {
                    Json(json!({"isSuccess": false, "message": "Name already taken"}))
                })
                .delete(|body: Bytes| async move {
                    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
                    if body == json!({"id": 9, "language": "az"}) {
                        (axum::http::StatusCode::OK, String::new())
                    } else {
                        (axum::http::StatusCode::INTERNAL_SERVER_ERROR, String::new())
                    }
                }),
            )
            .route(
                "/badge",
                post(|headers: HeaderMap, body: Bytes| async move {
                    let content_type = headers
                        .get("content-type")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let body = String::from_utf8_lossy(&body).to_string();
                    let ok = content_type.starts_with("multipart/form-data")
                        && body.contains("name=\"title\"")
                        && body.contains("filename=\"badge.png\"");
                    Json(json!({"isSuccess": ok, "id": 7}))
                }),
            )
            .route(
                "/lesson/{id}",
                put(|| async { "<html>gateway error page</html>" }),
            )
            .route(
                "/course/section/reorder",
                put(|Json(body): Json<Value>| async move {
                    let count = body["items"].as_array().map_or(0, Vec::len);
                    Json(json!({"isSuccess": count == 2}))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub api");
        let addr = listener.local_addr().expect("resolve stub api address");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (format!("http://{addr}"), handle)
    }

    fn client(base_url: &str, token: &str) -> RestApiClient {
        let config = ApiConfig {
            base_url: base_url.to_string(),
            request_timeout_secs: 5,
            language: "az".to_string(),
        };
        RestApiClient::new(&config, AccessToken::new(token).unwrap()).unwrap()
    }

    fn courses() -> CollectionName {
        CollectionName::new("course").unwrap()
    }

    #[tokio::test]
    async fn list_sends_paging_and_skips_malformed_items() {
        let (base_url, server) = spawn_stub_api().await;
        let api = client(&base_url, "test-token");

        let page = api
            .list(&courses(), PageRequest::new(3, 10).unwrap())
            .await
            .unwrap();

        assert_eq!(page.total_count, 21);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].str_field("name"), Some("page 3 take 10"));
        assert_eq!(page.items[1].key, EntityKey::Server(2));
        server.abort();
    }

    #[tokio::test]
    async fn unauthorized_listing_passes_server_message_through() {
        let (base_url, server) = spawn_stub_api().await;
        let api = client(&base_url, "wrong-token");

        let err = api
            .list(&courses(), PageRequest::first(10).unwrap())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            MutationError::ServerRejection {
                status: Some(401),
                message: "Token missing".to_string(),
            }
        );
        server.abort();
    }

    #[tokio::test]
    async fn fetch_parses_entity() {
        let (base_url, server) = spawn_stub_api().await;
        let entity = client(&base_url, "test-token")
            .fetch(&courses(), 12)
            .await
            .unwrap();

        assert_eq!(entity.key, EntityKey::Server(12));
        assert_eq!(entity.version, 4);
        server.abort();
    }

    #[tokio::test]
    async fn writes_map_is_success_to_results() {
        let (base_url, server) = spawn_stub_api().await;
        let api = client(&base_url, "test-token");

        let mut fields = Map::new();
        fields.insert("name".to_string(), json!("New course"));
        let ack = api
            .create(&courses(), RequestBody::from_fields(&fields, Vec::new()))
            .await
            .unwrap();
        assert_eq!(ack.id, Some(55));

        let err = api
            .update(&courses(), Some(5), RequestBody::Json(json!({"id": 5})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Name already taken");
        server.abort();
    }

    #[tokio::test]
    async fn unparseable_success_body_is_rejected() {
        let (base_url, server) = spawn_stub_api().await;
        let api = client(&base_url, "test-token");

        let err = api
            .update(
                &CollectionName::new("lesson").unwrap(),
                Some(5),
                RequestBody::Json(json!({"id": 5})),
            )
            .await
            .unwrap_err();

        match err {
            MutationError::ServerRejection { status, message } => {
                assert_eq!(status, Some(200));
                assert!(message.starts_with("Malformed response from"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn delete_carries_optional_body_and_falls_back_to_generic_message() {
        let (base_url, server) = spawn_stub_api().await;
        let api = client(&base_url, "test-token");

        let ack = api
            .delete(&courses(), 9, Some(json!({"id": 9, "language": "az"})))
            .await
            .unwrap();
        assert_eq!(ack, ApiAck::default());

        let err = api.delete(&courses(), 9, None).await.unwrap_err();
        assert_eq!(err.to_string(), "The server rejected the request");
        assert!(!err.is_retryable());
        server.abort();
    }

    #[tokio::test]
    async fn files_switch_create_to_multipart() {
        let (base_url, server) = spawn_stub_api().await;
        let api = client(&base_url, "test-token");

        let mut fields = Map::new();
        fields.insert("title".to_string(), json!("Early bird"));
        let body = RequestBody::from_fields(
            &fields,
            vec![FilePart {
                field: "image".to_string(),
                file_name: "badge.png".to_string(),
                content_type: "image/png".to_string(),
                bytes: vec![0x89, 0x50, 0x4e, 0x47],
            }],
        );

        let ack = api
            .create(&CollectionName::new("badge").unwrap(), body)
            .await
            .unwrap();
        assert_eq!(ack.id, Some(7));
        server.abort();
    }

    #[tokio::test]
    async fn reorder_puts_the_whole_order() {
        let (base_url, server) = spawn_stub_api().await;
        let api = client(&base_url, "test-token");

        api.reorder(
            &CollectionName::new("course/section").unwrap(),
            json!({"items": [{"id": 2, "orderNumber": 0}, {"id": 1, "orderNumber": 1}]}),
        )
        .await
        .unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_server_is_a_retryable_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"), "test-token")
            .fetch(&courses(), 1)
            .await
            .unwrap_err();

        assert!(matches!(err, MutationError::Network(_)));
        assert!(err.is_retryable());
    }
}
