//! Analysis endpoints
//!
//! - `POST /analyze` runs (or serves from cache) one analysis
//! - `GET /analyses/:id` fetches a persisted record

use crate::error::{ApiError, ApiResult};
use crate::types::{AnalysisFocus, AnalysisRecord, AnalysisRequest, AnalysisTier};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Request body for `POST /analyze`
///
/// Exactly one of `image_base64` or `image_uri` must be set. A URI request
/// carries the content hash computed by the ingress layer.
#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub image_uri: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
    pub tier: AnalysisTier,
    #[serde(default)]
    pub focus: Option<AnalysisFocus>,
    #[serde(default)]
    pub locale: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeQuery {
    /// Bypass any cached result
    #[serde(default)]
    pub fresh: bool,
}

impl AnalyzeBody {
    fn into_request(self) -> ApiResult<AnalysisRequest> {
        let request = match (self.image_base64, self.image_uri) {
            (Some(encoded), None) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| ApiError::BadRequest(format!("image_base64 is not valid base64: {}", e)))?;
                AnalysisRequest::from_bytes(bytes, self.tier)
            }
            (None, Some(uri)) => {
                let hash = self.content_hash.ok_or_else(|| {
                    ApiError::BadRequest("content_hash is required with image_uri".to_string())
                })?;
                AnalysisRequest::from_uri(uri, hash, self.tier)
            }
            (Some(_), Some(_)) => {
                return Err(ApiError::BadRequest(
                    "provide either image_base64 or image_uri, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(ApiError::BadRequest(
                    "image_base64 or image_uri is required".to_string(),
                ))
            }
        };

        let request = request.with_focus(self.focus.unwrap_or_default());
        Ok(match self.locale {
            Some(locale) => request.with_locale(locale),
            None => request,
        })
    }
}

/// POST /analyze
pub async fn analyze(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
    Json(body): Json<AnalyzeBody>,
) -> ApiResult<Json<AnalysisRecord>> {
    let request = body.into_request()?;
    info!(tier = %request.tier(), fresh = query.fresh, "Analysis requested");

    let result = if query.fresh {
        state.orchestrator.analyze_fresh(request).await
    } else {
        state.orchestrator.analyze(request).await
    };

    match result {
        Ok(record) => Ok(Json(record.as_ref().clone())),
        Err(e) => {
            warn!("Analysis request rejected: {}", e);
            *state.last_error.write().await = Some(e.to_string());
            Err(e.into())
        }
    }
}

/// GET /analyses/:id
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AnalysisRecord>> {
    let store = state
        .store
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("record persistence is disabled".to_string()))?;

    match store.fetch(id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(ApiError::NotFound(format!("analysis {}", id))),
        Err(e) => {
            *state.last_error.write().await = Some(e.to_string());
            Err(ApiError::Internal(e.to_string()))
        }
    }
}

pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/analyses/:id", get(get_analysis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: &str) -> AnalyzeBody {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_base64_body() {
        let request = body(r#"{"image_base64": "aGVsbG8=", "tier": "basic", "focus": "pores"}"#)
            .into_request()
            .unwrap();
        assert_eq!(request.tier(), AnalysisTier::Basic);
        assert_eq!(request.focus(), AnalysisFocus::Pores);
        assert_eq!(request.content_hash(), crate::types::content_hash(b"hello"));
    }

    #[test]
    fn test_uri_requires_hash() {
        let result = body(r#"{"image_uri": "https://images.example/a.jpg", "tier": "enhanced"}"#)
            .into_request();
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_exactly_one_image_source() {
        assert!(body(r#"{"tier": "basic"}"#).into_request().is_err());
        assert!(body(
            r#"{"image_base64": "aGVsbG8=", "image_uri": "https://x/a.jpg", "tier": "basic"}"#
        )
        .into_request()
        .is_err());
    }

    #[test]
    fn test_invalid_base64() {
        let result = body(r#"{"image_base64": "not base64!!", "tier": "basic"}"#).into_request();
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
