//! Edge/cloud verification policy for SAIT detections
//!
//! Edge devices classify locally and report a detection; the cloud decides
//! whether to trust it outright, verify it against its own analysis, or flag
//! it for human review. The decision function is pure and total so the same
//! inputs always produce the same action on any node.

use crate::error::ModelError;
use crate::manager::ModelManager;
use crate::service::{ModelInput, ModelKind, audio};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Edge confidence above which a detection is trusted without cloud
/// re-analysis. Strictly greater-than: a detection at exactly the threshold
/// goes through verification.
pub const EDGE_TRUST_THRESHOLD: f32 = 0.85;

/// A detection reported by an edge device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDetection {
    pub device_id: String,
    pub edge_class_id: u32,
    pub edge_class_name: String,
    pub edge_confidence: f32,
    /// Base64-encoded 16-bit PCM clip accompanying the detection, when the
    /// device had bandwidth to attach one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
}

/// Cloud-side re-analysis of the same signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudAnalysis {
    pub class_id: u32,
    pub confidence: f32,
    pub category: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub recommendations: Vec<String>,
}

/// Action the policy takes on an edge detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationAction {
    /// High-confidence edge detection accepted as-is
    EdgeDetectionTrusted,
    /// Cloud re-analysis agreed with the edge class
    CloudVerified,
    /// Cloud re-analysis produced a different class; cloud result wins
    CloudDisagrees,
    /// No cloud signal available; queued for human review
    FlaggedForReview,
}

impl std::fmt::Display for VerificationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::EdgeDetectionTrusted => "edge_detection_trusted",
            Self::CloudVerified => "cloud_verified",
            Self::CloudDisagrees => "cloud_disagrees",
            Self::FlaggedForReview => "flagged_for_review",
        };
        f.write_str(s)
    }
}

/// Outcome of running the policy on one detection.
///
/// Carries both sides of the comparison so downstream consumers can audit
/// the decision: the edge's claimed class and confidence, the cloud's when
/// re-analysis ran, and the class the system acts on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationDecision {
    pub action: VerificationAction,
    /// True when the detection is confirmed (trusted or cloud-verified)
    pub verified: bool,
    pub device_id: String,

    pub edge_class_id: u32,
    pub edge_confidence: f32,

    /// Cloud's class; on the trusted path the edge's own class, since the
    /// cloud endorses it without re-analysis
    pub cloud_class_id: Option<u32>,
    pub cloud_confidence: Option<f32>,

    /// Class id the system acts on: the cloud's when it disagrees, the
    /// edge's otherwise
    pub final_class_id: u32,
    pub final_confidence: f32,
    /// Threat category of the acted-on class, when one is known
    pub final_category: Option<String>,

    pub recommendations: Vec<String>,
    pub message: String,
}

/// Decide what to do with an edge detection.
///
/// Pure and total: every (detection, analysis) pair maps to exactly one
/// decision, with no dependence on ambient state.
///
/// - edge confidence strictly above [`EDGE_TRUST_THRESHOLD`] trusts the edge,
///   with the cloud fields echoing the edge's claim;
/// - otherwise a present cloud analysis either verifies (same class, cloud's
///   confidence becomes final) or overrides (different class) the edge;
/// - otherwise the detection is flagged for review at the edge's confidence.
pub fn decide(detection: &EdgeDetection, cloud: Option<&CloudAnalysis>) -> VerificationDecision {
    if detection.edge_confidence > EDGE_TRUST_THRESHOLD {
        return VerificationDecision {
            action: VerificationAction::EdgeDetectionTrusted,
            verified: true,
            device_id: detection.device_id.clone(),
            edge_class_id: detection.edge_class_id,
            edge_confidence: detection.edge_confidence,
            cloud_class_id: Some(detection.edge_class_id),
            cloud_confidence: Some(detection.edge_confidence),
            final_class_id: detection.edge_class_id,
            final_confidence: detection.edge_confidence,
            final_category: Some(detection.edge_class_name.clone()),
            recommendations: vec![
                "High edge confidence - no cloud verification needed".to_string(),
            ],
            message: "High edge confidence - no cloud verification needed".to_string(),
        };
    }

    match cloud {
        Some(analysis) if analysis.class_id == detection.edge_class_id => VerificationDecision {
            action: VerificationAction::CloudVerified,
            verified: true,
            device_id: detection.device_id.clone(),
            edge_class_id: detection.edge_class_id,
            edge_confidence: detection.edge_confidence,
            cloud_class_id: Some(analysis.class_id),
            cloud_confidence: Some(analysis.confidence),
            final_class_id: detection.edge_class_id,
            // Agreement: the cloud's confidence is the one acted on
            final_confidence: analysis.confidence,
            final_category: Some(analysis.category.clone()),
            recommendations: analysis.recommendations.clone(),
            message: "Cloud analysis agrees with edge detection".to_string(),
        },
        Some(analysis) => VerificationDecision {
            action: VerificationAction::CloudDisagrees,
            verified: false,
            device_id: detection.device_id.clone(),
            edge_class_id: detection.edge_class_id,
            edge_confidence: detection.edge_confidence,
            cloud_class_id: Some(analysis.class_id),
            cloud_confidence: Some(analysis.confidence),
            final_class_id: analysis.class_id,
            final_confidence: analysis.confidence,
            final_category: Some(analysis.category.clone()),
            recommendations: analysis.recommendations.clone(),
            message: "Cloud analysis disagrees - cloud result is final".to_string(),
        },
        None => VerificationDecision {
            action: VerificationAction::FlaggedForReview,
            verified: false,
            device_id: detection.device_id.clone(),
            edge_class_id: detection.edge_class_id,
            edge_confidence: detection.edge_confidence,
            cloud_class_id: None,
            cloud_confidence: None,
            final_class_id: detection.edge_class_id,
            final_confidence: detection.edge_confidence,
            final_category: None,
            recommendations: vec![
                "Low confidence, no cloud verification available".to_string(),
            ],
            message: "Flagged for human review".to_string(),
        },
    }
}

/// Run the full verification flow for one edge detection.
///
/// Cloud re-analysis happens only when the detection is below the trust
/// threshold, carries a usable audio signal, and the audio classifier is
/// loaded. Pre-extracted features take precedence; otherwise the attached
/// base64 PCM clip is decoded and pooled into the classifier's feature
/// space. Every other combination degrades to [`decide`] with no cloud
/// input.
pub async fn verify_edge_detection(
    manager: &ModelManager,
    detection: &EdgeDetection,
    features: Option<Vec<f32>>,
) -> Result<VerificationDecision, ModelError> {
    if detection.edge_confidence > EDGE_TRUST_THRESHOLD {
        let decision = decide(detection, None);
        tracing::info!(
            device = %detection.device_id,
            class = %detection.edge_class_name,
            confidence = detection.edge_confidence,
            action = %decision.action,
            "Edge detection trusted"
        );
        return Ok(decision);
    }

    let features = features.or_else(|| clip_features(detection));

    let cloud = match features {
        Some(features) => match manager.model(ModelKind::Audio) {
            Ok(audio) if audio.loaded() => {
                let result = audio.infer(ModelInput::AudioFeatures(features)).await;
                if result.success {
                    result.class_id.map(|class_id| CloudAnalysis {
                        class_id,
                        confidence: result.confidence,
                        category: result.category,
                        recommendations: result.recommendations,
                    })
                } else {
                    tracing::warn!(
                        device = %detection.device_id,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Cloud re-analysis failed, flagging for review"
                    );
                    None
                }
            }
            _ => {
                tracing::debug!(
                    device = %detection.device_id,
                    "Audio classifier unavailable, flagging for review"
                );
                None
            }
        },
        None => None,
    };

    let decision = decide(detection, cloud.as_ref());
    tracing::info!(
        device = %detection.device_id,
        edge_class = detection.edge_class_id,
        action = %decision.action,
        final_class = decision.final_class_id,
        "Verification decided"
    );
    Ok(decision)
}

/// Decode the detection's attached clip into classifier features.
///
/// A malformed clip is logged and ignored rather than failing the flow; the
/// detection then falls through to review.
fn clip_features(detection: &EdgeDetection) -> Option<Vec<f32>> {
    let clip = detection.audio_base64.as_deref()?;
    match base64::engine::general_purpose::STANDARD.decode(clip) {
        Ok(bytes) => {
            let features = audio::features_from_pcm(&bytes);
            if features.is_none() {
                tracing::warn!(
                    device = %detection.device_id,
                    bytes = bytes.len(),
                    "Attached clip too short for re-analysis"
                );
            }
            features
        }
        Err(e) => {
            tracing::warn!(
                device = %detection.device_id,
                error = %e,
                "Attached clip is not valid base64, ignoring"
            );
            None
        }
    }
}
