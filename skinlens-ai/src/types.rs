//! Core data model for skin analysis orchestration
//!
//! - [`AnalysisRequest`]: immutable description of one analysis request
//! - [`ProviderResult`]: one successful provider attempt, discarded after merge
//! - [`EnrichmentResult`]: optional lighting / depth output attached to a record
//! - [`AnalysisRecord`]: the canonical, immutable output returned, cached and persisted
//!
//! Metric maps are `BTreeMap`s keyed by [`SkinMetric`] so iteration order, and
//! therefore merging and serialization, is deterministic.

use crate::error::AnalysisError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Metrics
// ============================================================================

/// Canonical skin metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkinMetric {
    Spots,
    Wrinkles,
    Texture,
    Pores,
    Redness,
    Pigmentation,
    Acne,
    Dullness,
    FineLines,
    Blackheads,
}

impl SkinMetric {
    pub const ALL: [SkinMetric; 10] = [
        SkinMetric::Spots,
        SkinMetric::Wrinkles,
        SkinMetric::Texture,
        SkinMetric::Pores,
        SkinMetric::Redness,
        SkinMetric::Pigmentation,
        SkinMetric::Acne,
        SkinMetric::Dullness,
        SkinMetric::FineLines,
        SkinMetric::Blackheads,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SkinMetric::Spots => "spots",
            SkinMetric::Wrinkles => "wrinkles",
            SkinMetric::Texture => "texture",
            SkinMetric::Pores => "pores",
            SkinMetric::Redness => "redness",
            SkinMetric::Pigmentation => "pigmentation",
            SkinMetric::Acne => "acne",
            SkinMetric::Dullness => "dullness",
            SkinMetric::FineLines => "fine_lines",
            SkinMetric::Blackheads => "blackheads",
        }
    }

    /// Resolve a provider's free-form concern label to a canonical metric
    ///
    /// The label is lower-cased and every run of non-letters collapsed to a
    /// single `_` before synonym lookup, so `"Large Pores"`, `"large-pores"`
    /// and `"LARGE_PORES"` all resolve to [`SkinMetric::Pores`].
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = normalize_label(label);
        let metric = match normalized.as_str() {
            "spots" | "spot" | "dark_spots" | "dark_spot" | "brown_spots" => SkinMetric::Spots,
            "wrinkles" | "wrinkle" => SkinMetric::Wrinkles,
            "texture" | "roughness" => SkinMetric::Texture,
            "pores" | "pore" | "large_pores" | "large_pore" => SkinMetric::Pores,
            "redness" | "red_areas" | "red_area" => SkinMetric::Redness,
            "pigmentation" | "hyperpigmentation" | "hyper_pigmentation" => {
                SkinMetric::Pigmentation
            }
            "acne" => SkinMetric::Acne,
            "dullness" | "dull" => SkinMetric::Dullness,
            "fine_lines" | "fine_line" | "fineline" | "finelines" => SkinMetric::FineLines,
            "blackheads" | "blackhead" | "black_head" | "black_heads" => SkinMetric::Blackheads,
            _ => return None,
        };
        Some(metric)
    }
}

impl fmt::Display for SkinMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_separator = false;
    for ch in label.trim().chars() {
        if ch.is_ascii_alphabetic() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    out
}

/// Metric → severity (0-10)
pub type SeverityMap = BTreeMap<SkinMetric, f64>;

/// Metric → confidence (0-1)
pub type ConfidenceMap = BTreeMap<SkinMetric, f64>;

/// Metric → percentile (0-100)
pub type PercentileMap = BTreeMap<SkinMetric, f64>;

// ============================================================================
// Request
// ============================================================================

/// Requested analysis fidelity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisTier {
    Basic,
    Enhanced,
    Clinical,
}

impl AnalysisTier {
    pub const ALL: [AnalysisTier; 3] =
        [AnalysisTier::Basic, AnalysisTier::Enhanced, AnalysisTier::Clinical];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisTier::Basic => "basic",
            AnalysisTier::Enhanced => "enhanced",
            AnalysisTier::Clinical => "clinical",
        }
    }

    /// Clinical requests fan out to several providers; lower tiers fall back sequentially
    pub fn is_ensemble(&self) -> bool {
        matches!(self, AnalysisTier::Clinical)
    }
}

impl fmt::Display for AnalysisTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisTier {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(AnalysisTier::Basic),
            "enhanced" => Ok(AnalysisTier::Enhanced),
            "clinical" => Ok(AnalysisTier::Clinical),
            other => Err(AnalysisError::InvalidRequest(format!(
                "unknown analysis tier '{}'",
                other
            ))),
        }
    }
}

/// Requested analysis type; part of the cache key and forwarded to providers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisFocus {
    #[default]
    Full,
    Wrinkles,
    Texture,
    Spots,
    Pores,
}

impl AnalysisFocus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisFocus::Full => "full",
            AnalysisFocus::Wrinkles => "wrinkles",
            AnalysisFocus::Texture => "texture",
            AnalysisFocus::Spots => "spots",
            AnalysisFocus::Pores => "pores",
        }
    }
}

impl FromStr for AnalysisFocus {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(AnalysisFocus::Full),
            "wrinkles" => Ok(AnalysisFocus::Wrinkles),
            "texture" => Ok(AnalysisFocus::Texture),
            "spots" => Ok(AnalysisFocus::Spots),
            "pores" => Ok(AnalysisFocus::Pores),
            other => Err(AnalysisError::InvalidRequest(format!(
                "unknown analysis focus '{}'",
                other
            ))),
        }
    }
}

/// Opaque image reference handed in by the ingress collaborator
#[derive(Clone)]
pub enum ImageHandle {
    /// Raw encoded image content
    Bytes(Arc<[u8]>),
    /// Location the provider fetches itself
    Uri(String),
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageHandle::Bytes(bytes) => write!(f, "ImageHandle::Bytes({} bytes)", bytes.len()),
            ImageHandle::Uri(uri) => write!(f, "ImageHandle::Uri({})", uri),
        }
    }
}

/// Hex-encoded SHA-256 of image content
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

const DEFAULT_LOCALE: &str = "en";

/// One analysis request. Immutable once created.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    image: ImageHandle,
    content_hash: String,
    tier: AnalysisTier,
    focus: AnalysisFocus,
    locale: String,
    requested_at: DateTime<Utc>,
}

impl AnalysisRequest {
    /// Request over raw image content; the content hash is computed here
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, tier: AnalysisTier) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let hash = content_hash(&bytes);
        Self {
            image: ImageHandle::Bytes(Arc::from(bytes)),
            content_hash: hash,
            tier,
            focus: AnalysisFocus::Full,
            locale: DEFAULT_LOCALE.to_string(),
            requested_at: Utc::now(),
        }
    }

    /// Request over a stored image; the ingress collaborator supplies the content hash
    pub fn from_uri(
        uri: impl Into<String>,
        content_hash: impl Into<String>,
        tier: AnalysisTier,
    ) -> Self {
        Self {
            image: ImageHandle::Uri(uri.into()),
            content_hash: content_hash.into().to_ascii_lowercase(),
            tier,
            focus: AnalysisFocus::Full,
            locale: DEFAULT_LOCALE.to_string(),
            requested_at: Utc::now(),
        }
    }

    pub fn with_focus(mut self, focus: AnalysisFocus) -> Self {
        self.focus = focus;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn image(&self) -> &ImageHandle {
        &self.image
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn tier(&self) -> AnalysisTier {
        self.tier
    }

    pub fn focus(&self) -> AnalysisFocus {
        self.focus
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    /// Structural validation; a failure here is the only request-level error callers see
    pub fn validate(&self) -> Result<(), AnalysisError> {
        match &self.image {
            ImageHandle::Bytes(bytes) if bytes.is_empty() => {
                return Err(AnalysisError::InvalidRequest(
                    "image content is empty".to_string(),
                ));
            }
            ImageHandle::Uri(uri) if !uri.contains("://") => {
                return Err(AnalysisError::InvalidRequest(format!(
                    "image URI '{}' is not absolute",
                    uri
                )));
            }
            _ => {}
        }

        if self.content_hash.len() != 64
            || !self.content_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(AnalysisError::InvalidRequest(
                "content hash must be a 64-character hex SHA-256 digest".to_string(),
            ));
        }

        let locale_ok = !self.locale.is_empty()
            && self.locale.len() <= 35
            && self
                .locale
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !locale_ok {
            return Err(AnalysisError::InvalidRequest(format!(
                "invalid locale '{}'",
                self.locale
            )));
        }

        Ok(())
    }

    /// Stable cache key over (content hash, tier, focus)
    pub fn cache_key(&self) -> CacheKey {
        let material = format!(
            "{}|{}|{}",
            self.content_hash,
            self.tier.as_str(),
            self.focus.as_str()
        );
        CacheKey(content_hash(material.as_bytes()))
    }
}

/// Content-addressed cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a key previously obtained from [`AnalysisRequest::cache_key`]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Provider output
// ============================================================================

/// One successful provider attempt, already translated to canonical metrics
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    pub provider_name: String,
    /// Metric → severity (0-10)
    pub severity: SeverityMap,
    /// Metric → confidence (0-1)
    pub confidence: ConfidenceMap,
    pub processing_time_ms: u64,
}

impl ProviderResult {
    /// Result where every metric carries the same confidence
    pub fn uniform(
        provider_name: impl Into<String>,
        severity: SeverityMap,
        confidence: f64,
        processing_time_ms: u64,
    ) -> Self {
        let confidence = confidence.clamp(0.0, 1.0);
        let confidence_map = severity.keys().map(|m| (*m, confidence)).collect();
        Self {
            provider_name: provider_name.into(),
            severity,
            confidence: confidence_map,
            processing_time_ms,
        }
    }

    /// Confidence reported for `metric`, 0 if absent
    pub fn confidence_for(&self, metric: SkinMetric) -> f64 {
        self.confidence.get(&metric).copied().unwrap_or(0.0)
    }

    /// Mean of this result's per-metric confidences
    pub fn mean_confidence(&self) -> f64 {
        if self.severity.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.severity.keys().map(|m| self.confidence_for(*m)).sum();
        sum / self.severity.len() as f64
    }
}

// ============================================================================
// Enrichment
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentKind {
    Lighting,
    Depth,
}

impl EnrichmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentKind::Lighting => "lighting",
            EnrichmentKind::Depth => "depth",
        }
    }
}

impl fmt::Display for EnrichmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simulated lighting environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingCondition {
    Daylight,
    Office,
    Evening,
    Flash,
}

/// How visible each concern is under one lighting condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingScenario {
    pub condition: LightingCondition,
    /// Metric → visibility factor (0-1)
    pub visibility: BTreeMap<SkinMetric, f64>,
    /// Overall rendering quality (0-100)
    pub quality_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingSimulation {
    pub scenarios: Vec<LightingScenario>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthEstimate {
    /// Mean relief depth across the face (mm)
    pub mean_depth_mm: f64,
    /// Metric → estimated depth of the feature (mm), e.g. wrinkle depth
    pub metric_depth_mm: BTreeMap<SkinMetric, f64>,
    pub mesh_vertices: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EnrichmentPayload {
    Lighting(LightingSimulation),
    Depth(DepthEstimate),
}

/// Output of one enrichment phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub payload: EnrichmentPayload,
    /// Confidence of the enrichment itself (0-1)
    pub confidence: f64,
}

impl EnrichmentResult {
    pub fn kind(&self) -> EnrichmentKind {
        match self.payload {
            EnrichmentPayload::Lighting(_) => EnrichmentKind::Lighting,
            EnrichmentPayload::Depth(_) => EnrichmentKind::Depth,
        }
    }
}

/// Enrichment attached to a record; each phase independently absent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting: Option<EnrichmentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<EnrichmentResult>,
}

impl EnrichmentSet {
    pub fn is_empty(&self) -> bool {
        self.lighting.is_none() && self.depth.is_none()
    }

    pub fn insert(&mut self, result: EnrichmentResult) {
        match result.kind() {
            EnrichmentKind::Lighting => self.lighting = Some(result),
            EnrichmentKind::Depth => self.depth = Some(result),
        }
    }
}

// ============================================================================
// Canonical record
// ============================================================================

/// Canonical analysis output. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub tier: AnalysisTier,
    pub focus: AnalysisFocus,
    /// Metric → severity (0-10)
    pub overall_score: SeverityMap,
    /// Metric → percentile against the reference population (0-100)
    pub percentiles: PercentileMap,
    /// Metric → confidence (0-1)
    pub metric_confidence: ConfidenceMap,
    /// Aggregate confidence (0-1)
    pub confidence: f64,
    /// Contributing providers, highest priority first
    pub provider_provenance: Vec<String>,
    /// Estimated accuracy of this record (0-1)
    pub accuracy_estimate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentSet>,
    /// True when produced by the built-in default producer
    pub is_fallback: bool,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Check the record's range and consistency invariants
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.provider_provenance.is_empty() {
            return Err("provider provenance is empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0,1]", self.confidence));
        }
        if !(0.0..=1.0).contains(&self.accuracy_estimate) {
            return Err(format!(
                "accuracy estimate {} outside [0,1]",
                self.accuracy_estimate
            ));
        }
        for (metric, severity) in &self.overall_score {
            if !(0.0..=10.0).contains(severity) {
                return Err(format!("{} severity {} outside [0,10]", metric, severity));
            }
            match self.percentiles.get(metric) {
                Some(p) if (0.0..=100.0).contains(p) => {}
                Some(p) => return Err(format!("{} percentile {} outside [0,100]", metric, p)),
                None => return Err(format!("{} has no percentile", metric)),
            }
            match self.metric_confidence.get(metric) {
                Some(c) if (0.0..=1.0).contains(c) => {}
                Some(c) => return Err(format!("{} confidence {} outside [0,1]", metric, c)),
                None => return Err(format!("{} has no confidence", metric)),
            }
        }
        Ok(())
    }
}
