// Gateway dispatch: synthesized lists and proxied gets
//
// Lists never touch the backing store's list API for data files; they are
// answered from the transaction log. Gets are rewritten onto the physical
// layout and streamed straight through.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use icegate_config::StorageConfig;
use icegate_resolver::{Resolved, ResolveError};
use tracing::{debug, info};

use crate::context::{self, Operation, RequestContext, RequestId};
use crate::s3_types::{Content, ListBucketResult, ListObjectRequest, STORAGE_CLASS_STANDARD};
use crate::sigv4::Credential;
use crate::{AppError, AppState};

/// Catch-all entry point; every authenticated request lands here.
pub(crate) async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let Some(credential) = req.extensions().get::<Credential>().cloned() else {
        return (StatusCode::FORBIDDEN, "invalid signature").into_response();
    };

    let host = context::request_host(&req);
    let routing = match context::classify(
        &host,
        req.uri().path(),
        req.uri().query().unwrap_or(""),
        state.config.server.routing_style,
        &state.config.server.host,
    ) {
        Ok(routing) => routing,
        Err(_) => return (StatusCode::NOT_FOUND, "not found").into_response(),
    };

    debug!(
        request_id = %request_id,
        bucket = %routing.bucket,
        path_style = routing.path_style,
        operation = ?routing.operation,
        "classified request"
    );

    let ctx = RequestContext {
        request_id,
        credential,
        bucket: routing.bucket.clone(),
        path_style: routing.path_style,
    };

    let result = match routing.operation {
        Operation::List => synthesize_list(&state, &ctx, req.uri(), req.headers()).await,
        Operation::Get => proxy_get(&state, &ctx, &routing.tail, req).await,
    };
    result.unwrap_or_else(|e| e.into_response())
}

async fn resolve(state: &AppState, ctx: &RequestContext) -> Result<Resolved, AppError> {
    state
        .resolver
        .resolve(&ctx.bucket, &ctx.credential.key_id)
        .await
        .map_err(|e| match e {
            ResolveError::NoPathPrefix(bucket) => {
                AppError::not_found(format!("no such bucket: {bucket}"))
            }
            other => AppError::internal(&ctx.request_id, other.into()),
        })
}

async fn synthesize_list(
    state: &AppState,
    ctx: &RequestContext,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<Response, AppError> {
    let list_req = ListObjectRequest::from_parts(uri, headers)
        .map_err(|e| AppError::internal(&ctx.request_id, e))?;
    let resolved = resolve(state, ctx).await?;

    let alive_files = match state
        .snapshots
        .read_state(
            &resolved.prefix,
            list_req.offset(),
            resolved.time_ms,
            list_req.max_keys(),
        )
        .await
    {
        Ok(snapshot) => snapshot.alive_files,
        Err(e) if e.is_empty_snapshot() => {
            debug!(request_id = %ctx.request_id, bucket = %ctx.bucket, "empty listing: {e}");
            Vec::new()
        }
        Err(e) => return Err(AppError::internal(&ctx.request_id, e.into())),
    };

    let data_prefix = format!("{}/_data/", resolved.prefix);
    let contents: Vec<Content> = alive_files
        .into_iter()
        .map(|marker| Content {
            key: object_key(&data_prefix, &marker.path),
            size: marker.byte_length,
            storage_class: STORAGE_CLASS_STANDARD.to_string(),
            ..Default::default()
        })
        .collect();

    info!(
        request_id = %ctx.request_id,
        bucket = %ctx.bucket,
        keys = contents.len(),
        "synthesized listing"
    );

    let result = ListBucketResult {
        is_truncated: false,
        name: ctx.bucket.clone(),
        max_keys: list_req.max_keys(),
        encoding_type: Some("url".to_string()),
        key_count: contents.len(),
        contents,
        prefix: list_req.query.prefix.clone(),
        delimiter: list_req.query.delimiter.clone(),
        continuation_token: list_req.query.continuation_token.clone(),
        start_after: list_req.query.start_after.clone(),
        ..Default::default()
    };

    let xml = result
        .to_xml()
        .map_err(|e| AppError::internal(&ctx.request_id, e))?;
    Ok((
        [(header::CONTENT_TYPE, "application/xml")],
        xml,
    )
        .into_response())
}

/// The virtual key is the physical path with `<prefix>/_data/` removed.
fn object_key(data_prefix: &str, path: &str) -> String {
    path.strip_prefix(data_prefix).unwrap_or(path).to_string()
}

async fn proxy_get(
    state: &AppState,
    ctx: &RequestContext,
    tail: &str,
    req: Request,
) -> Result<Response, AppError> {
    let resolved = resolve(state, ctx).await?;
    let physical_key = format!("{}/_data/{tail}", resolved.prefix);
    let url = upstream_url(&state.config.storage, &physical_key);

    // The inbound signature is bound to the virtual host and path; it can
    // never be replayed against the backing layout.
    let mut headers = req.headers().clone();
    headers.remove(header::AUTHORIZATION);
    headers.remove(header::HOST);

    debug!(
        request_id = %ctx.request_id,
        %url,
        path_style = ctx.path_style,
        "proxying to backing store"
    );

    let upstream = state
        .upstream
        .request(req.method().clone(), &url)
        .headers(headers)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                AppError::canceled(&ctx.request_id, e.into())
            } else {
                AppError::internal(&ctx.request_id, e.into())
            }
        })?;

    let mut builder = Response::builder().status(upstream.status());
    if let Some(response_headers) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            response_headers.append(name.clone(), value.clone());
        }
    }
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| AppError::internal(&ctx.request_id, e.into()))
}

/// Physical URL on the backing store for `key`, honoring the configured
/// endpoint and addressing style.
fn upstream_url(storage: &StorageConfig, key: &str) -> String {
    match &storage.endpoint {
        Some(endpoint) => {
            let endpoint = endpoint.trim_end_matches('/');
            if storage.use_path_style {
                format!("{endpoint}/{}/{key}", storage.bucket)
            } else {
                let (scheme, authority) =
                    endpoint.split_once("://").unwrap_or(("https", endpoint));
                format!("{scheme}://{}.{authority}/{key}", storage.bucket)
            }
        }
        None => {
            if storage.use_path_style {
                format!(
                    "https://s3.{}.amazonaws.com/{}/{key}",
                    storage.region, storage.bucket
                )
            } else {
                format!(
                    "https://{}.s3.{}.amazonaws.com/{key}",
                    storage.bucket, storage.region
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(endpoint: Option<&str>, use_path_style: bool) -> StorageConfig {
        StorageConfig {
            bucket: "real-bucket".to_string(),
            region: "us-east-1".to_string(),
            endpoint: endpoint.map(str::to_string),
            use_path_style,
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }

    #[test]
    fn strips_data_prefix_from_keys() {
        assert_eq!(
            object_key("t1/_data/", "t1/_data/x/y.parquet"),
            "x/y.parquet"
        );
        // Paths outside the data prefix pass through untouched.
        assert_eq!(object_key("t1/_data/", "elsewhere/z.parquet"), "elsewhere/z.parquet");
    }

    #[test]
    fn path_style_upstream_prepends_bucket() {
        let url = upstream_url(&storage(Some("http://minio:9000"), true), "t1/_data/x.parquet");
        assert_eq!(url, "http://minio:9000/real-bucket/t1/_data/x.parquet");
    }

    #[test]
    fn vhost_upstream_uses_bucket_subdomain() {
        let url = upstream_url(
            &storage(Some("https://storage.example.com"), false),
            "t1/_data/x.parquet",
        );
        assert_eq!(url, "https://real-bucket.storage.example.com/t1/_data/x.parquet");
    }

    #[test]
    fn default_endpoint_targets_aws() {
        let url = upstream_url(&storage(None, false), "t1/_data/x.parquet");
        assert_eq!(
            url,
            "https://real-bucket.s3.us-east-1.amazonaws.com/t1/_data/x.parquet"
        );

        let url = upstream_url(&storage(None, true), "t1/_data/x.parquet");
        assert_eq!(
            url,
            "https://s3.us-east-1.amazonaws.com/real-bucket/t1/_data/x.parquet"
        );
    }
}
