use anyhow::{anyhow, Context};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::settings::FfmpegConfig;

pub const SOFTWARE_ENCODER: &str = "libx264";

const SYS_DRM: &str = "/sys/class/drm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwAccel {
    /// Value passed to `-hwaccel`.
    pub hwaccel: String,
    /// Value passed to `-c:v` in GPU mode.
    pub encoder: String,
}

/// Preset vocabulary an encoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderFamily {
    Software,
    Nvenc,
    Qsv,
    Vaapi,
}

impl EncoderFamily {
    pub fn of(encoder: &str) -> Self {
        let encoder = encoder.to_ascii_lowercase();
        if encoder.contains("nvenc") {
            Self::Nvenc
        } else if encoder.contains("qsv") {
            Self::Qsv
        } else if encoder.contains("vaapi") {
            Self::Vaapi
        } else {
            Self::Software
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub software_encoder: String,
    pub hw: Option<HwAccel>,
    pub threads_per_job: usize,
}

impl EncoderSettings {
    pub fn from_config(config: &FfmpegConfig) -> Self {
        let hw = if config.use_gpu {
            resolve_hw(config.encoder.as_deref(), config.hwaccel.as_deref(), detect_gpu)
        } else {
            None
        };

        match &hw {
            Some(hw) => info!(hwaccel = %hw.hwaccel, encoder = %hw.encoder, "GPU encoding enabled"),
            None if config.use_gpu => warn!("GPU encoding requested but no supported GPU was found, using software encoder"),
            None => {}
        }

        Self {
            ffmpeg_path: PathBuf::from(&config.ffmpeg_path),
            ffprobe_path: PathBuf::from(&config.ffprobe_path),
            software_encoder: SOFTWARE_ENCODER.to_string(),
            hw,
            threads_per_job: threads_per_job(num_cpus::get(), config.workers),
        }
    }

    /// Encoder used for a job, honouring the job's GPU flag only when a GPU is configured.
    pub fn encoder_for(&self, use_hw_accel: bool) -> &str {
        match (&self.hw, use_hw_accel) {
            (Some(hw), true) => &hw.encoder,
            _ => &self.software_encoder,
        }
    }

    pub fn hwaccel_for(&self, use_hw_accel: bool) -> Option<&str> {
        match (&self.hw, use_hw_accel) {
            (Some(hw), true) => Some(hw.hwaccel.as_str()),
            _ => None,
        }
    }

    /// Fails start-up when the encoder or the prober does not answer `-version`.
    pub async fn ensure_available(&self) -> anyhow::Result<()> {
        for binary in [&self.ffmpeg_path, &self.ffprobe_path] {
            let status = Command::new(binary)
                .arg("-version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await
                .with_context(|| format!("failed to run {}", binary.display()))?;

            if !status.success() {
                return Err(anyhow!("{} -version exited with {status}", binary.display()));
            }
        }
        Ok(())
    }
}

pub fn threads_per_job(cpus: usize, workers: usize) -> usize {
    (cpus / workers.max(1)).max(1)
}

fn resolve_hw(
    encoder: Option<&str>,
    hwaccel: Option<&str>,
    detect: impl FnOnce() -> Option<HwAccel>,
) -> Option<HwAccel> {
    match (encoder, hwaccel) {
        (Some(encoder), Some(hwaccel)) => Some(HwAccel {
            hwaccel: hwaccel.to_string(),
            encoder: encoder.to_string(),
        }),
        (encoder, hwaccel) => {
            let detected = detect()?;
            Some(HwAccel {
                hwaccel: hwaccel.map(str::to_string).unwrap_or(detected.hwaccel),
                encoder: encoder.map(str::to_string).unwrap_or(detected.encoder),
            })
        }
    }
}

pub fn detect_gpu() -> Option<HwAccel> {
    detect_gpu_in(Path::new(SYS_DRM))
}

/// Looks at `card*/device/vendor` under a DRM class directory.
pub fn detect_gpu_in(drm_root: &Path) -> Option<HwAccel> {
    let mut cards: Vec<PathBuf> = fs::read_dir(drm_root)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("card") && !n.contains('-'))
        })
        .collect();
    cards.sort();

    cards.iter().find_map(|card| {
        let vendor = fs::read_to_string(card.join("device/vendor")).ok()?;
        hw_for_vendor(vendor.trim())
    })
}

fn hw_for_vendor(vendor: &str) -> Option<HwAccel> {
    let (hwaccel, encoder) = match vendor.to_ascii_lowercase().as_str() {
        "0x10de" => ("cuda", "h264_nvenc"),
        "0x8086" | "0x1002" => ("vaapi", "h264_vaapi"),
        _ => return None,
    };
    Some(HwAccel {
        hwaccel: hwaccel.to_string(),
        encoder: encoder.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_card(root: &Path, name: &str, vendor: &str) {
        let device = root.join(name).join("device");
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join("vendor"), format!("{vendor}\n")).unwrap();
    }

    #[test]
    fn detects_nvidia_and_intel_cards() {
        let dir = tempfile::tempdir().unwrap();
        fake_card(dir.path(), "card0", "0x10de");
        let hw = detect_gpu_in(dir.path()).unwrap();
        assert_eq!(hw.hwaccel, "cuda");
        assert_eq!(hw.encoder, "h264_nvenc");

        let dir = tempfile::tempdir().unwrap();
        fake_card(dir.path(), "card1", "0x8086");
        assert_eq!(detect_gpu_in(dir.path()).unwrap().encoder, "h264_vaapi");
    }

    #[test]
    fn unknown_vendor_or_missing_dir_means_no_gpu() {
        let dir = tempfile::tempdir().unwrap();
        fake_card(dir.path(), "card0", "0x1234");
        assert!(detect_gpu_in(dir.path()).is_none());
        assert!(detect_gpu_in(&dir.path().join("missing")).is_none());
    }

    #[test]
    fn connector_entries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fake_card(dir.path(), "card0-HDMI-A-1", "0x10de");
        assert!(detect_gpu_in(dir.path()).is_none());
    }

    #[test]
    fn explicit_overrides_win_over_detection() {
        let detected = || {
            Some(HwAccel {
                hwaccel: "cuda".into(),
                encoder: "h264_nvenc".into(),
            })
        };

        let hw = resolve_hw(Some("hevc_nvenc"), None, detected).unwrap();
        assert_eq!(hw.encoder, "hevc_nvenc");
        assert_eq!(hw.hwaccel, "cuda");

        let hw = resolve_hw(Some("h264_qsv"), Some("qsv"), || None).unwrap();
        assert_eq!(hw.hwaccel, "qsv");

        assert!(resolve_hw(None, None, || None).is_none());
    }

    #[test]
    fn families_follow_encoder_names() {
        assert_eq!(EncoderFamily::of("libx264"), EncoderFamily::Software);
        assert_eq!(EncoderFamily::of("h264_nvenc"), EncoderFamily::Nvenc);
        assert_eq!(EncoderFamily::of("h264_QSV"), EncoderFamily::Qsv);
        assert_eq!(EncoderFamily::of("h264_vaapi"), EncoderFamily::Vaapi);
    }

    #[test]
    fn threads_are_split_between_workers() {
        assert_eq!(threads_per_job(8, 2), 4);
        assert_eq!(threads_per_job(2, 4), 1);
        assert_eq!(threads_per_job(4, 0), 4);
    }

    #[test]
    fn gpu_encoder_only_when_job_asks_for_it() {
        let settings = EncoderSettings {
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            software_encoder: SOFTWARE_ENCODER.into(),
            hw: Some(HwAccel {
                hwaccel: "cuda".into(),
                encoder: "h264_nvenc".into(),
            }),
            threads_per_job: 1,
        };

        assert_eq!(settings.encoder_for(false), "libx264");
        assert_eq!(settings.encoder_for(true), "h264_nvenc");
        assert_eq!(settings.hwaccel_for(true), Some("cuda"));
        assert_eq!(settings.hwaccel_for(false), None);
    }
}
