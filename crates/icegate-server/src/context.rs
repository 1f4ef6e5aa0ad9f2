// Per-request context and routing classification
//
// Requests arrive either virtual-host style (`bucket.gateway.example.com/...`)
// or path style (`gateway.example.com/bucket/...`). Classification picks the
// bucket name, the operation, and the object tail in one pass; the rest of
// the pipeline never re-parses the URL.

use axum::extract::Request;
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use icegate_config::RoutingStyle;
use uuid::Uuid;

use crate::sigv4::Credential;

/// Request id assigned before anything else runs; carried in error bodies
/// so a client report can be matched to server logs.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub async fn assign_request_id(mut req: Request, next: Next) -> Response {
    req.extensions_mut()
        .insert(RequestId(Uuid::new_v4().to_string()));
    next.run(req).await
}

/// Everything downstream handlers need about the caller.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub credential: Credential,
    pub bucket: String,
    pub path_style: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Get,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub bucket: String,
    pub path_style: bool,
    pub operation: Operation,
    /// Object key below the bucket, without a leading slash. Empty for
    /// lists.
    pub tail: String,
}

#[derive(Debug, thiserror::Error)]
#[error("request does not address a bucket")]
pub struct ClassifyError;

/// The request's Host. Prefer the URI authority (absolute-form requests);
/// fall back to the Host header.
pub fn request_host(req: &Request) -> String {
    if let Some(authority) = req.uri().authority() {
        return authority.to_string();
    }
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn classify(
    host: &str,
    path: &str,
    raw_query: &str,
    style: RoutingStyle,
    own_host: &str,
) -> Result<Routing, ClassifyError> {
    let host_labels = host.split(':').next().unwrap_or(host);
    let vhost = match style {
        RoutingStyle::Vhost => true,
        RoutingStyle::Path => false,
        RoutingStyle::Auto => {
            host_labels.split('.').count() > own_host.split('.').count()
        }
    };

    let wants_list = has_list_type_v2(raw_query);

    if vhost {
        let bucket = host_labels
            .split('.')
            .next()
            .filter(|b| !b.is_empty())
            .ok_or(ClassifyError)?
            .to_string();
        let tail = path.trim_start_matches('/').to_string();
        let operation = if wants_list || tail.is_empty() {
            Operation::List
        } else {
            Operation::Get
        };
        return Ok(Routing {
            bucket,
            path_style: false,
            operation,
            tail: if operation == Operation::List {
                String::new()
            } else {
                tail
            },
        });
    }

    let mut segments = path.splitn(3, '/');
    segments.next(); // leading empty segment
    let bucket = segments
        .next()
        .filter(|b| !b.is_empty())
        .ok_or(ClassifyError)?
        .to_string();
    let tail = segments.next().unwrap_or("").to_string();

    // `/bucket/` with nothing after the slash is a list; `/bucket/x` is a
    // get, as is `/bucket` itself.
    let operation = if wants_list || (tail.is_empty() && path.ends_with('/')) {
        Operation::List
    } else {
        Operation::Get
    };

    Ok(Routing {
        bucket,
        path_style: true,
        operation,
        tail: if operation == Operation::List {
            String::new()
        } else {
            tail
        },
    })
}

fn has_list_type_v2(raw_query: &str) -> bool {
    raw_query
        .split('&')
        .any(|pair| pair == "list-type=2")
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWN_HOST: &str = "s3.example.com";

    #[test]
    fn vhost_bare_request_is_list() {
        let routing = classify(
            "analytics.s3.example.com",
            "/",
            "",
            RoutingStyle::Auto,
            OWN_HOST,
        )
        .unwrap();
        assert_eq!(routing.bucket, "analytics");
        assert!(!routing.path_style);
        assert_eq!(routing.operation, Operation::List);
    }

    #[test]
    fn vhost_pathed_request_is_get() {
        let routing = classify(
            "analytics.s3.example.com:8080",
            "/x/y.parquet",
            "",
            RoutingStyle::Auto,
            OWN_HOST,
        )
        .unwrap();
        assert_eq!(routing.bucket, "analytics");
        assert_eq!(routing.operation, Operation::Get);
        assert_eq!(routing.tail, "x/y.parquet");
    }

    #[test]
    fn path_style_trailing_slash_is_list() {
        let routing = classify("s3.example.com", "/analytics/", "", RoutingStyle::Auto, OWN_HOST)
            .unwrap();
        assert_eq!(routing.bucket, "analytics");
        assert!(routing.path_style);
        assert_eq!(routing.operation, Operation::List);
    }

    #[test]
    fn path_style_object_is_get() {
        let routing = classify(
            "s3.example.com",
            "/analytics/x/y.parquet",
            "",
            RoutingStyle::Auto,
            OWN_HOST,
        )
        .unwrap();
        assert_eq!(routing.operation, Operation::Get);
        assert_eq!(routing.tail, "x/y.parquet");
    }

    #[test]
    fn list_type_query_forces_list() {
        let routing = classify(
            "s3.example.com",
            "/analytics",
            "list-type=2&max-keys=100",
            RoutingStyle::Auto,
            OWN_HOST,
        )
        .unwrap();
        assert_eq!(routing.operation, Operation::List);
    }

    #[test]
    fn explicit_style_overrides_label_count() {
        // Behind a Host-rewriting proxy the label heuristic would misfire;
        // the explicit override pins it.
        let routing = classify(
            "analytics.internal.lb.example.com",
            "/x.parquet",
            "",
            RoutingStyle::Vhost,
            OWN_HOST,
        )
        .unwrap();
        assert_eq!(routing.bucket, "analytics");
        assert!(!routing.path_style);

        let routing = classify(
            "a.b.c.d.e",
            "/analytics/x.parquet",
            "",
            RoutingStyle::Path,
            OWN_HOST,
        )
        .unwrap();
        assert_eq!(routing.bucket, "analytics");
        assert!(routing.path_style);
    }

    #[test]
    fn empty_path_is_rejected_for_path_style() {
        assert!(classify("s3.example.com", "/", "", RoutingStyle::Auto, OWN_HOST).is_err());
    }
}
