use crate::{error::ApiError, store::ServerStore};
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use segid::{BufferSnapshot, SegmentIdGenerator, SegmentIdGeneratorTokioExt, TagRecord};

pub type Generator = SegmentIdGenerator<ServerStore>;

#[derive(Clone)]
pub struct AppState {
    generator: Generator,
}

impl AppState {
    pub const fn new(generator: Generator) -> Self {
        Self { generator }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/segment/get/{tag}", get(next_id))
        .route("/api/segment/cache", get(cache))
        .route("/api/segment/tags", get(tags))
        .route("/health", get(health))
        .with_state(state)
}

async fn next_id(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<String, ApiError> {
    let id = state.generator.next_id_async(&tag).await?;
    Ok(id.to_string())
}

async fn cache(State(state): State<AppState>) -> Result<Json<Vec<BufferSnapshot>>, ApiError> {
    Ok(Json(state.generator.snapshots()?))
}

async fn tags(State(state): State<AppState>) -> Json<Vec<TagRecord>> {
    Json(state.generator.store().records())
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
        response::Response,
    };
    use segid::{GeneratorConfig, MemoryIdStore};
    use tower::ServiceExt;

    fn app(store: MemoryIdStore) -> (Router, Generator) {
        let generator =
            SegmentIdGenerator::new(ServerStore::Memory(store), GeneratorConfig::default())
                .unwrap();
        generator.init().unwrap();
        (router(AppState::new(generator.clone())), generator)
    }

    async fn get_uri(app: &Router, uri: &str) -> Response {
        app.clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_returns_sequential_ids_as_text() {
        let (app, _) = app(MemoryIdStore::new().with_tag("bookmark", 5));
        for expected in 0..12 {
            let response = get_uri(&app, "/api/segment/get/bookmark").await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_text(response).await, expected.to_string());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_tag_is_not_found() {
        let (app, generator) = app(MemoryIdStore::new());
        let response = get_uri(&app, "/api/segment/get/missing").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("missing"));
        assert!(generator.buffer("missing").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cache_lists_buffer_snapshots() {
        let (app, _) = app(
            MemoryIdStore::new()
                .with_tag("bookmark", 10)
                .with_tag("order", 10),
        );
        get_uri(&app, "/api/segment/get/bookmark").await;

        let response = get_uri(&app, "/api/segment/cache").await;
        assert_eq!(response.status(), StatusCode::OK);
        let snapshots: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();
        let snapshots = snapshots.as_array().unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0]["tag"], "bookmark");
        assert_eq!(snapshots[0]["initialized"], true);
        assert_eq!(snapshots[1]["tag"], "order");
        assert_eq!(snapshots[1]["initialized"], false);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tags_lists_store_records() {
        let (app, _) = app(MemoryIdStore::new().with_tag("bookmark", 10));
        get_uri(&app, "/api/segment/get/bookmark").await;

        let response = get_uri(&app, "/api/segment/tags").await;
        assert_eq!(response.status(), StatusCode::OK);
        let records: serde_json::Value =
            serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(records[0]["tag"], "bookmark");
        assert_eq!(records[0]["step"], 10);
        assert!(records[0]["max_id"].as_u64().unwrap() >= 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn health_is_ok() {
        let (app, _) = app(MemoryIdStore::new());
        let response = get_uri(&app, "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }
}
