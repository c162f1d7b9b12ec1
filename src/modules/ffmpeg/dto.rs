use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, ToSchema)]
pub struct StartResponse {
    /// Pass back as `jobID` when calling `/process`.
    #[serde(rename = "jobID")]
    pub job_id: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProcessQuery {
    #[serde(rename = "jobID")]
    pub job_id: String,
}

/// Shape of the multipart form accepted by `/process`. Documentation only.
#[allow(dead_code)]
#[derive(ToSchema)]
#[schema(rename_all = "camelCase")]
pub struct ProcessForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    pub trim_start: Option<f64>,
    pub trim_end: Option<f64>,
    /// Desired output size in megabytes. 0 keeps the source bitrate.
    pub target_size: Option<f64>,
    pub lossless_export: Option<bool>,
    /// ultrafast, superfast, veryfast, faster, fast or medium
    pub processing_speed: Option<String>,
    /// Store the result instead of streaming it back.
    pub save_to_cloud: Option<bool>,
}
