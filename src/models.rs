use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::filtering::pagination::Page;

/// Reserved query parameters of a list endpoint.
///
/// Every other query parameter is read as a filter on the listed entity.
///
/// # Searching
/// `q` is split on whitespace; every word must match at least one searchable
/// field, for example:
/// ```text
/// ?q=alice smith
/// ```
///
/// # Sorting
/// `o` is a comma separated field list, optionally wrapped in brackets. A
/// leading `-` sorts descending:
/// ```text
/// ?o=-created,name
/// ```
///
/// # Pagination
/// `p` is the 1-based page number and `l` the page size, clamped to the
/// controller's maximum. An out-of-range page serves page 1.
///
/// # Filtering
/// Any `field[__lookup]=value`; a leading `-` excludes instead:
/// ```text
/// ?name__istartswith=al&-active=true&id=[1,2,3]&bio=null
/// ```
#[derive(Deserialize, IntoParams, ToSchema, Default)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Free-text search over the searchable fields.
    #[param(example = "alice")]
    pub q: Option<String>,
    /// Ordering, e.g. `-created,name`.
    #[param(example = json!("-created,name"))]
    pub o: Option<String>,
    /// Page number, starting at 1.
    #[param(example = 1)]
    pub p: Option<i64>,
    /// Page size.
    #[param(example = 100)]
    pub l: Option<i64>,
}

/// One page of serialized records.
///
/// `count` and `pages` are left out in quick pagination mode, where only
/// `has_next` is known.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct PageResponse {
    /// Serialized records of this page.
    #[schema(value_type = Vec<Object>)]
    pub objects: Vec<serde_json::Value>,
    /// Page number actually served.
    pub number: u64,
    /// Effective page size.
    pub limit: u64,
    /// Total number of matching records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Total number of pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<u64>,
    pub has_next: bool,
}

impl From<Page<serde_json::Value>> for PageResponse {
    fn from(page: Page<serde_json::Value>) -> Self {
        Self {
            objects: page.objects,
            number: page.number,
            limit: page.limit,
            count: page.count,
            pages: page.pages,
            has_next: page.has_next,
        }
    }
}

impl IntoResponse for PageResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_page_omits_totals() {
        let response = PageResponse {
            objects: vec![json!({"id": 1})],
            number: 2,
            limit: 1,
            count: None,
            pages: None,
            has_next: true,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"objects": [{"id": 1}], "number": 2, "limit": 1, "has_next": true})
        );
    }

    #[test]
    fn test_list_params_document_reserved_keys() {
        let names: Vec<String> = ListParams::into_params(|| None)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["q", "o", "p", "l"]);
    }

    #[test]
    fn test_page_response_schema_marks_totals_optional() {
        use utoipa::OpenApi;

        #[derive(OpenApi)]
        #[openapi(components(schemas(PageResponse)))]
        struct ApiDoc;

        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let schema = &doc["components"]["schemas"]["PageResponse"];
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("objects")));
        assert!(!required.contains(&json!("count")));
    }

    #[test]
    fn test_classic_page_carries_totals() {
        let page = Page {
            objects: vec![json!(1), json!(2)],
            number: 1,
            limit: 2,
            count: Some(3),
            pages: Some(2),
            has_next: true,
        };
        let value = serde_json::to_value(PageResponse::from(page)).unwrap();
        assert_eq!(value["count"], 3);
        assert_eq!(value["pages"], 2);
    }
}
