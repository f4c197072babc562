use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ClassificationError;

pub const FALLBACK_REASON: &str = "classification failed";

/// Fixed task given to the classifier with every screenshot.
pub const INSTRUCTION: &str = "Analyze this screenshot and decide whether the person is being productive. \
Productive activity includes work applications, coding, document editing and educational content. \
Unproductive activity includes social media, entertainment and games. \
The screenshot may show the productivity monitor itself; ignore it and judge only the rest of the screen. \
Respond with isProductive, a confidence between 0 and 1, and a one-sentence reason.";

/// Sent to the device when the user is productive.
pub const COMMAND_PRODUCTIVE: &str = "OFF";
/// Sent to the device when the user is not productive.
pub const COMMAND_UNPRODUCTIVE: &str = "ON";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationVerdict {
    pub is_productive: bool,
    pub confidence: f64,
    pub reason: String,
    /// True when this is the placeholder produced for a failed attempt.
    pub fallback: bool,
    pub classified_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerdict {
    is_productive: bool,
    confidence: f64,
    reason: String,
}

impl ClassificationVerdict {
    pub fn fallback() -> Self {
        Self {
            is_productive: false,
            confidence: 0.0,
            reason: FALLBACK_REASON.into(),
            fallback: true,
            classified_at: Utc::now(),
        }
    }

    /// Checks a backend reply against `{isProductive: bool, confidence: number in [0,1], reason: string}`.
    pub fn from_response(value: Value) -> Result<Self, ClassificationError> {
        let raw: RawVerdict = serde_json::from_value(value)?;
        if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
            return Err(ClassificationError::InvalidResponse(format!(
                "confidence {} outside [0, 1]",
                raw.confidence
            )));
        }

        Ok(Self {
            is_productive: raw.is_productive,
            confidence: raw.confidence,
            reason: raw.reason,
            fallback: false,
            classified_at: Utc::now(),
        })
    }

    pub fn actuation_command(&self) -> &'static str {
        if self.is_productive {
            COMMAND_PRODUCTIVE
        } else {
            COMMAND_UNPRODUCTIVE
        }
    }
}

/// Structured-output schema in the dialect the Gemini API accepts.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "isProductive": {
                "type": "BOOLEAN",
                "description": "Whether the user is being productive based on screen contents"
            },
            "confidence": {
                "type": "NUMBER",
                "description": "Confidence score between 0 and 1"
            },
            "reason": {
                "type": "STRING",
                "description": "Brief explanation of the productivity assessment"
            }
        },
        "required": ["isProductive", "confidence", "reason"]
    })
}
