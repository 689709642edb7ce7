use thiserror::Error;

/// Failures at the remote segmentation boundary.
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("no fal.ai API key configured")]
    MissingApiKey,

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("segmentation request {request_id} failed: {message}")]
    RequestFailed { request_id: String, message: String },

    #[error("segmentation timed out after {attempts} status checks")]
    Timeout { attempts: u32 },

    #[error("a segmentation request is already in progress")]
    Busy,
}

impl SegmentationError {
    pub fn is_busy(&self) -> bool {
        matches!(self, SegmentationError::Busy)
    }

    /// HTTP failures and failures reported by the queue itself.
    pub fn is_api_error(&self) -> bool {
        matches!(
            self,
            SegmentationError::Api { .. } | SegmentationError::RequestFailed { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SegmentationError::Timeout { .. })
    }
}

impl From<reqwest::Error> for SegmentationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SegmentationError::Network(format!("request timed out: {err}"))
        } else if err.is_decode() {
            SegmentationError::Decode(err.to_string())
        } else {
            SegmentationError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SegmentationError {
    fn from(err: serde_json::Error) -> Self {
        SegmentationError::Decode(err.to_string())
    }
}

impl From<image::ImageError> for SegmentationError {
    fn from(err: image::ImageError) -> Self {
        SegmentationError::Decode(format!("mask image: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SegmentationError::Busy.is_busy());
        assert!(!SegmentationError::Timeout { attempts: 30 }.is_busy());
        assert!(SegmentationError::Timeout { attempts: 30 }.is_timeout());
        assert!(SegmentationError::Api {
            status: 500,
            message: "boom".into()
        }
        .is_api_error());
        assert!(SegmentationError::RequestFailed {
            request_id: "r1".into(),
            message: "FAILED".into()
        }
        .is_api_error());
    }

    #[test]
    fn api_error_message_carries_status_and_body() {
        let err = SegmentationError::Api {
            status: 422,
            message: "{\"detail\":\"bad prompt\"}".into(),
        };
        let text = err.to_string();
        assert!(text.contains("422"));
        assert!(text.contains("bad prompt"));
    }
}
