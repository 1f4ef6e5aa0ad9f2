// S3 REST wire types
//
// Only the subset the gateway speaks: ListObjectsV2 request parameters and
// the ListBucketResult response document.

use axum::extract::Query;
use axum::http::{HeaderMap, Uri};
use serde::{Deserialize, Serialize};

pub const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
pub const DEFAULT_MAX_KEYS: usize = 1000;
pub const STORAGE_CLASS_STANDARD: &str = "STANDARD";

/// ListObjectsV2 query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListObjectQuery {
    #[serde(rename = "list-type")]
    pub list_type: Option<i32>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
    pub delimiter: Option<String>,
    #[serde(rename = "encoding-type")]
    pub encoding_type: Option<String>,
    #[serde(rename = "fetch-owner")]
    pub fetch_owner: Option<bool>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    pub prefix: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
}

/// ListObjectsV2 request: query parameters plus the recognized headers.
#[derive(Debug, Clone, Default)]
pub struct ListObjectRequest {
    pub query: ListObjectQuery,
    pub expected_bucket_owner: Option<String>,
    pub optional_object_attributes: Option<String>,
    pub request_payer: Option<String>,
}

impl ListObjectRequest {
    pub fn from_parts(uri: &Uri, headers: &HeaderMap) -> anyhow::Result<Self> {
        let Query(query) = Query::<ListObjectQuery>::try_from_uri(uri)
            .map_err(|e| anyhow::anyhow!("failed to bind list parameters: {e}"))?;

        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Ok(Self {
            query,
            expected_bucket_owner: header("x-amz-expected-bucket-owner"),
            optional_object_attributes: header("x-amz-optional-object-attributes"),
            request_payer: header("x-amz-request-payer"),
        })
    }

    /// The exclusive start key: `continuation-token` wins over
    /// `start-after`.
    pub fn offset(&self) -> &str {
        self.query
            .continuation_token
            .as_deref()
            .or(self.query.start_after.as_deref())
            .unwrap_or("")
    }

    pub fn max_keys(&self) -> usize {
        self.query.max_keys.unwrap_or(DEFAULT_MAX_KEYS)
    }
}

/// S3 `ListBucketResult` response document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "ListBucketResult", rename_all = "PascalCase")]
pub struct ListBucketResult {
    pub is_truncated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<Content>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    pub max_keys: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub common_prefixes: Vec<CommonPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_type: Option<String>,
    pub key_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_continuation_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Content {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(rename = "ETag", default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    pub storage_class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Owner {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommonPrefix {
    pub prefix: String,
}

impl ListBucketResult {
    pub fn to_xml(&self) -> anyhow::Result<String> {
        let body = quick_xml::se::to_string(self)?;
        Ok(format!("{XML_DECLARATION}{body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_result() -> ListBucketResult {
        ListBucketResult {
            is_truncated: false,
            contents: vec![
                Content {
                    key: "some/sample.parquet".to_string(),
                    size: 1024,
                    storage_class: STORAGE_CLASS_STANDARD.to_string(),
                    ..Default::default()
                },
                Content {
                    key: "another/path/totally/sample.parquet".to_string(),
                    size: 2048,
                    storage_class: STORAGE_CLASS_STANDARD.to_string(),
                    ..Default::default()
                },
            ],
            name: "bucket-name".to_string(),
            max_keys: 1000,
            encoding_type: Some("url".to_string()),
            key_count: 2,
            continuation_token: Some("blah".to_string()),
            next_continuation_token: Some("moreblah".to_string()),
            ..Default::default()
        }
    }

    // Populated fields must survive a serialize/deserialize round trip.
    #[test]
    fn list_bucket_result_round_trips() {
        let original = populated_result();
        let xml = quick_xml::se::to_string(&original).unwrap();
        let parsed: ListBucketResult = quick_xml::de::from_str(&xml).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn xml_uses_s3_element_names() {
        let xml = populated_result().to_xml().unwrap();
        assert!(xml.starts_with(XML_DECLARATION));
        assert!(xml.contains("<ListBucketResult>"));
        assert!(xml.contains("<IsTruncated>false</IsTruncated>"));
        assert!(xml.contains("<Key>some/sample.parquet</Key>"));
        assert!(xml.contains("<Size>1024</Size>"));
        assert!(xml.contains("<StorageClass>STANDARD</StorageClass>"));
        assert!(xml.contains("<KeyCount>2</KeyCount>"));
    }

    #[test]
    fn query_parameters_bind_from_uri() {
        let uri: Uri =
            "/?list-type=2&max-keys=250&continuation-token=tok&start-after=sa&prefix=p"
                .parse()
                .unwrap();
        let req = ListObjectRequest::from_parts(&uri, &HeaderMap::new()).unwrap();
        assert_eq!(req.query.list_type, Some(2));
        assert_eq!(req.max_keys(), 250);
        assert_eq!(req.offset(), "tok");
        assert_eq!(req.query.prefix.as_deref(), Some("p"));
    }

    #[test]
    fn continuation_token_wins_over_start_after() {
        let mut req = ListObjectRequest::default();
        req.query.start_after = Some("sa".to_string());
        assert_eq!(req.offset(), "sa");

        req.query.continuation_token = Some("tok".to_string());
        assert_eq!(req.offset(), "tok");

        req.query.continuation_token = None;
        req.query.start_after = None;
        assert_eq!(req.offset(), "");
    }

    #[test]
    fn max_keys_defaults_to_1000() {
        let req = ListObjectRequest::default();
        assert_eq!(req.max_keys(), DEFAULT_MAX_KEYS);
    }
}
