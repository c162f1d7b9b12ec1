use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use super::error::TranscodeError;

pub const PROCESSING_SPEEDS: &[&str] = &["ultrafast", "superfast", "veryfast", "faster", "fast", "medium"];
pub const DEFAULT_PROCESSING_SPEED: &str = "fast";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// User-controlled transcode parameters. Trim bounds use `0`/`-1` as "no trim".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", default)]
#[validate(schema(function = "validate_trim_window", skip_on_field_errors = false))]
pub struct ProcessingOptions {
    #[validate(range(min = -1.0, message = "trimStart can't be below -1"))]
    pub trim_start: f64,
    #[validate(range(min = -1.0, message = "trimEnd can't be below -1"))]
    pub trim_end: f64,
    #[serde(alias = "targetSize")]
    #[validate(range(min = 0.0, message = "targetSize can't be negative"))]
    pub target_size_mb: f64,
    pub lossless_export: bool,
    #[validate(custom(function = "validate_processing_speed"))]
    pub processing_speed: String,
    pub save_to_cloud: bool,
}

impl ProcessingOptions {
    /// A window is complete when it has a usable start, an end, and start < end.
    pub fn trim_window(&self) -> Option<(f64, f64)> {
        if self.trim_start >= 0.0 && self.trim_end > 0.0 && self.trim_start < self.trim_end {
            Some((self.trim_start, self.trim_end))
        } else {
            None
        }
    }

    pub fn speed(&self) -> &str {
        if self.processing_speed.is_empty() {
            DEFAULT_PROCESSING_SPEED
        } else {
            &self.processing_speed
        }
    }

    /// Full admission check, including the target size against the input's own size.
    pub fn validate_against(&self, input_size_bytes: u64) -> Result<(), TranscodeError> {
        self.validate()
            .map_err(|e| TranscodeError::InvalidOptions(describe(&e)))?;

        if self.target_size_mb > 0.0 && self.target_size_mb * BYTES_PER_MB >= input_size_bytes as f64 {
            return Err(TranscodeError::InvalidOptions(
                "target size must be smaller than the original video".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_trim_window(opts: &ProcessingOptions) -> Result<(), ValidationError> {
    if opts.trim_end <= 0.0 {
        return Ok(());
    }

    if opts.trim_start == opts.trim_end {
        return Err(ValidationError::new("trim_window")
            .with_message(Cow::Borrowed("trim start and trim end can't be the same")));
    }

    if opts.trim_start > opts.trim_end {
        return Err(ValidationError::new("trim_window")
            .with_message(Cow::Borrowed("trim start can't be bigger than trim end")));
    }

    Ok(())
}

fn validate_processing_speed(speed: &str) -> Result<(), ValidationError> {
    if speed.is_empty() || PROCESSING_SPEEDS.contains(&speed) {
        Ok(())
    } else {
        Err(ValidationError::new("processing_speed")
            .with_message(Cow::Borrowed("invalid processing speed option")))
    }
}

fn describe(errors: &validator::ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(msg) => msg.to_string(),
                None => format!("invalid value for {field}"),
            })
        })
        .collect();
    messages.sort();
    messages.join(", ")
}
