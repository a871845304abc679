use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, Path, State},
    handler::Handler,
    http::{header, Method, Request, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use data_model::valid_identifier;
use futures::StreamExt;
use state_store::MetadataStore;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    assets::AssetManager,
    auth::bearer_auth,
    http_objects::{ApiError, AssetListEntry},
    pipeline::ByteStream,
};

const LIST_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct RouteState {
    pub state: Arc<MetadataStore>,
    pub asset_manager: Arc<AssetManager>,
    pub api_tokens: Arc<Option<Vec<String>>>,
}

pub fn create_routes(route_state: RouteState) -> Router {
    let auth = middleware::from_fn_with_state(route_state.clone(), bearer_auth);

    let management_routes = Router::new()
        .route("/buckets", get(list_buckets))
        .route("/buckets/{bucket}", get(get_bucket).post(create_bucket))
        .route("/buckets/{bucket}/token", get(list_bucket_tokens))
        .route(
            "/buckets/{bucket}/token/{token}",
            post(create_bucket_token).delete(delete_bucket_token),
        )
        .route("/buckets/{bucket}/assets", get(list_bucket_assets))
        .route(
            "/buckets/{bucket}/assets/{name}/size",
            get(get_asset_size),
        )
        .route("/buckets/{bucket}/assets/{name}", delete(delete_asset))
        .route("/assets", get(list_assets))
        .route_layer(auth.clone());

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(Any);

    Router::new()
        .route("/", get(index))
        // Downloads need a request token; uploads authenticate with the
        // bucket-scoped upload token in the path instead, so only the GET
        // side carries the middleware.
        .route(
            "/asset/{bucket}/{name}",
            get(serve_asset.layer(auth)).post(receive_asset),
        )
        .merge(management_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let method = request.method();
                    let uri = request.uri();
                    let matched_path = request
                        .extensions()
                        .get::<MatchedPath>()
                        .map(MatchedPath::as_str);
                    tracing::debug_span!("request", %method, %uri, matched_path)
                })
                .on_failure(()),
        )
        .layer(cors)
        .layer(DefaultBodyLimit::max(usize::MAX))
        .with_state(route_state)
}

async fn index() -> &'static str {
    "Asset receiver"
}

/// Streams every bucket as one JSON object keyed by bucket name, paging
/// through the store so the response never buffers the whole listing.
async fn list_buckets(State(state): State<RouteState>) -> Result<impl IntoResponse, ApiError> {
    let reader = state.state.reader();
    let stream: ByteStream = Box::pin(async_stream::try_stream! {
        yield Bytes::from_static(b"{\n");
        let mut restart_key: Option<Vec<u8>> = None;
        let mut first = true;
        loop {
            let (buckets, cursor) =
                reader.list_buckets(restart_key.as_deref(), Some(LIST_PAGE_SIZE))?;
            for (name, doc) in buckets {
                let separator = if first { "  " } else { ",\n  " };
                first = false;
                let name_json = serde_json::to_string(&name)?;
                let doc_json = serde_json::to_string(&doc)?;
                let row = format!("{}{}: {}", separator, name_json, doc_json);
                yield Bytes::from(row);
            }
            match cursor {
                Some(next) => restart_key = Some(next),
                None => break,
            }
        }
        yield Bytes::from_static(b"\n}");
    });
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(stream),
    ))
}

async fn get_bucket(
    State(state): State<RouteState>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.state.reader().get_bucket(&bucket)? {
        Some(doc) => Ok(Json(doc)),
        None => Err(ApiError::not_found("Bucket not found")),
    }
}

async fn create_bucket(
    State(state): State<RouteState>,
    Path(bucket): Path<String>,
    Json(doc): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_identifier(&bucket) {
        return Err(ApiError::bad_request("invalid bucket name"));
    }
    state.state.create_bucket(&bucket, &doc)?;
    info!("created bucket {}", bucket);
    Ok((StatusCode::CREATED, "Bucket created"))
}

async fn create_bucket_token(
    State(state): State<RouteState>,
    Path((bucket, token)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_identifier(&token) {
        return Err(ApiError::bad_request("invalid token"));
    }
    if state.state.reader().get_bucket(&bucket)?.is_none() {
        warn!(
            "bucket {} not found when attempting to create token {}",
            bucket, token
        );
        return Err(ApiError::forbidden("Bucket not found"));
    }
    state.state.create_token(&bucket, &token)?;
    info!("token {} created in bucket {}", token, bucket);
    Ok((StatusCode::CREATED, "Token created"))
}

async fn delete_bucket_token(
    State(state): State<RouteState>,
    Path((bucket, token)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.state.delete_token(&bucket, &token)?;
    info!("token {} deleted from bucket {}", token, bucket);
    Ok((StatusCode::ACCEPTED, "Token deleted"))
}

/// Streams the bucket's upload tokens as a JSON array of strings.
async fn list_bucket_tokens(
    State(state): State<RouteState>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let reader = state.state.reader();
    let stream: ByteStream = Box::pin(async_stream::try_stream! {
        yield Bytes::from_static(b"[\n");
        let mut restart_key: Option<Vec<u8>> = None;
        let mut first = true;
        loop {
            let (tokens, cursor) =
                reader.list_tokens(&bucket, restart_key.as_deref(), Some(LIST_PAGE_SIZE))?;
            for token in tokens {
                let separator = if first { "  " } else { ",\n  " };
                first = false;
                let token_json = serde_json::to_string(&token)?;
                let row = format!("{}{}", separator, token_json);
                yield Bytes::from(row);
            }
            match cursor {
                Some(next) => restart_key = Some(next),
                None => break,
            }
        }
        yield Bytes::from_static(b"\n]");
    });
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(stream),
    ))
}

async fn list_bucket_assets(
    State(state): State<RouteState>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let reader = state.state.reader();
    let mut assets = Vec::new();
    let mut restart_key: Option<Vec<u8>> = None;
    loop {
        let (page, cursor) =
            reader.list_assets_by_bucket(&bucket, restart_key.as_deref(), Some(LIST_PAGE_SIZE))?;
        assets.extend(page);
        match cursor {
            Some(next) => restart_key = Some(next),
            None => break,
        }
    }
    Ok(Json(assets))
}

async fn get_asset_size(
    State(state): State<RouteState>,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let reader = state.state.reader();
    let metadata = match reader.get_asset_id(&bucket, &name)? {
        Some(id) => reader.get_asset_metadata(&id)?,
        None => None,
    };
    match metadata {
        Some(metadata) => Ok(Json(metadata)),
        None => Err(ApiError::not_found("Asset Not Found")),
    }
}

async fn delete_asset(
    State(state): State<RouteState>,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.asset_manager.delete(&bucket, &name).await?;
    Ok((StatusCode::ACCEPTED, "Asset deleted"))
}

/// Inventory of every stored version across all buckets.
async fn list_assets(State(state): State<RouteState>) -> Result<impl IntoResponse, ApiError> {
    let reader = state.state.reader();
    let mut entries = Vec::new();
    let mut restart_key: Option<Vec<u8>> = None;
    loop {
        let (page, cursor) = reader.list_assets(restart_key.as_deref(), Some(LIST_PAGE_SIZE))?;
        entries.extend(
            page.into_iter()
                .map(|(asset_id, metadata)| AssetListEntry { asset_id, metadata }),
        );
        match cursor {
            Some(next) => restart_key = Some(next),
            None => break,
        }
    }
    Ok(Json(entries))
}

async fn serve_asset(
    State(state): State<RouteState>,
    Path((bucket, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    match state.asset_manager.download(&bucket, &name).await? {
        Some(stream) => {
            info!("serving asset {} from bucket {}", name, bucket);
            Ok(Body::from_stream(stream))
        }
        None => {
            warn!("asset {} not found in bucket {} during download", name, bucket);
            Err(ApiError::not_found("Not Found"))
        }
    }
}

async fn receive_asset(
    State(state): State<RouteState>,
    Path((token, name)): Path<(String, String)>,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_identifier(&name) {
        return Err(ApiError::bad_request("invalid asset name"));
    }
    let Some(bucket) = state.state.reader().resolve_token(&token)? else {
        warn!("no bucket found for upload token {}", token);
        return Err(ApiError::forbidden("Invalid token"));
    };
    let stream: ByteStream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(anyhow::Error::from))
        .boxed();
    let id = state
        .asset_manager
        .upload(&bucket, &token, &name, stream)
        .await?;
    Ok((StatusCode::CREATED, id.to_string()))
}
