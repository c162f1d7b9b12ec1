use std::path::Path;
use tracing::debug;

use super::encoder::{EncoderFamily, EncoderSettings};
use super::error::TranscodeError;
use super::options::{ProcessingOptions, PROCESSING_SPEEDS};
use super::probe::DurationProbe;

/// MB to kilobits.
pub const KILOBITS_PER_MB: f64 = 8388.608;
/// Reserved for the passed-through audio track.
pub const AUDIO_RESERVE_KBPS: f64 = 128.0;
pub const MIN_VIDEO_BITRATE_KBPS: f64 = 5.0;

const MOVFLAGS: &str = "+frag_keyframe+empty_moov+faststart";

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltArgs {
    pub args: Vec<String>,
    /// Seconds of output, used as the progress denominator.
    pub duration: f64,
}

/// Turns processing options into an `ffmpeg` argument vector.
pub struct ArgumentBuilder<'a> {
    settings: &'a EncoderSettings,
}

impl<'a> ArgumentBuilder<'a> {
    pub fn new(settings: &'a EncoderSettings) -> Self {
        Self { settings }
    }

    pub async fn build<P: DurationProbe>(
        &self,
        opts: &ProcessingOptions,
        input: &Path,
        use_hw_accel: bool,
        probe: &P,
    ) -> Result<BuiltArgs, TranscodeError> {
        let mut args: Vec<String> = vec!["-i".into(), input.to_string_lossy().into_owned()];

        let duration = match opts.trim_window() {
            Some((start, end)) => {
                if start > 0.0 {
                    args.extend(["-ss".into(), format_timestamp(start)]);
                }
                args.extend(["-to".into(), format_timestamp(end)]);
                end - start
            }
            None if opts.trim_end > 0.0 && opts.trim_start >= opts.trim_end => {
                return Err(TranscodeError::InvalidOptions(
                    "trim start must be before trim end".to_string(),
                ));
            }
            None => {
                if opts.trim_start > 0.0 {
                    args.extend(["-ss".into(), format_timestamp(opts.trim_start)]);
                }
                let probed = probe.probe(input).await?;
                (probed - opts.trim_start.max(0.0)).max(0.0)
            }
        };

        let encoder = self.settings.encoder_for(use_hw_accel);
        let family = EncoderFamily::of(encoder);
        args.extend([
            "-c:v".into(),
            encoder.to_string(),
            "-threads".into(),
            self.settings.threads_per_job.to_string(),
        ]);

        if opts.lossless_export {
            args.extend(lossless_flags(family).iter().map(|s| s.to_string()));
        } else if opts.target_size_mb > 0.0 {
            args.extend(bitrate_flags(video_bitrate_kbps(opts.target_size_mb, duration)));
        }
        if let Some(preset) = preset_for(family, opts.speed())? {
            args.extend(["-preset".into(), preset.to_string()]);
        }

        args.extend(
            [
                "-c:a", "copy", "-movflags", MOVFLAGS, "-loglevel", "error", "-progress", "pipe:2", "-nostats",
                "-f", "mp4", "pipe:1",
            ]
            .map(String::from),
        );

        if let Some(hwaccel) = self.settings.hwaccel_for(use_hw_accel) {
            apply_hwaccel(&mut args, hwaccel);
        }

        debug!(duration, ?args, "built encoder arguments");
        Ok(BuiltArgs { args, duration })
    }
}

/// `HH:MM:SS.mmm`, rounded to the millisecond.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };

    let hours = total_ms / 3_600_000;
    let minutes = total_ms / 60_000 % 60;
    let secs = total_ms / 1000 % 60;
    let millis = total_ms % 1000;

    format!("{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
}

/// Video bitrate that lands the output near `target_mb`, never below the floor.
pub fn video_bitrate_kbps(target_mb: f64, duration: f64) -> f64 {
    if !(duration.is_finite() && duration > 0.0) {
        return MIN_VIDEO_BITRATE_KBPS;
    }

    let video = target_mb * KILOBITS_PER_MB / duration - AUDIO_RESERVE_KBPS;
    if video.is_finite() {
        video.max(MIN_VIDEO_BITRATE_KBPS)
    } else {
        MIN_VIDEO_BITRATE_KBPS
    }
}

/// Buffer is always exactly twice the emitted rate.
fn bitrate_flags(kbps: f64) -> [String; 6] {
    let rate = kbps.round() as i64;
    [
        "-b:v".into(),
        format!("{rate}K"),
        "-maxrate".into(),
        format!("{rate}K"),
        "-bufsize".into(),
        format!("{}k", rate * 2),
    ]
}

fn lossless_flags(family: EncoderFamily) -> &'static [&'static str] {
    match family {
        EncoderFamily::Software => &["-crf", "18", "-pix_fmt", "yuv420p"],
        EncoderFamily::Nvenc => &["-rc", "vbr", "-cq", "19", "-b:v", "0"],
        EncoderFamily::Qsv => &["-global_quality", "18"],
        EncoderFamily::Vaapi => &["-qp", "18"],
    }
}

/// Maps a requested speed onto the encoder's own preset names.
///
/// Software presets must be known. Hardware encoders fall back to a safe preset,
/// and VAAPI takes none at all.
pub fn preset_for(family: EncoderFamily, speed: &str) -> Result<Option<&'static str>, TranscodeError> {
    let preset = match family {
        EncoderFamily::Software => match PROCESSING_SPEEDS.iter().find(|p| **p == speed) {
            Some(preset) => *preset,
            None => {
                return Err(TranscodeError::InvalidOptions(format!("unsupported preset {speed:?}")));
            }
        },
        EncoderFamily::Nvenc => match speed {
            "ultrafast" | "superfast" => "fast",
            "veryfast" => "medium",
            "faster" => "hp",
            _ => "fast",
        },
        EncoderFamily::Qsv => match speed {
            "ultrafast" | "superfast" | "veryfast" => "veryfast",
            "faster" => "faster",
            "fast" => "fast",
            _ => "medium",
        },
        EncoderFamily::Vaapi => return Ok(None),
    };
    Ok(Some(preset))
}

/// Inserts `-hwaccel <name>` right before the first `-i`. No-op if already present.
pub fn apply_hwaccel(args: &mut Vec<String>, hwaccel: &str) {
    if args.iter().any(|a| a == "-hwaccel") {
        return;
    }
    if let Some(pos) = args.iter().position(|a| a == "-i") {
        args.splice(pos..pos, ["-hwaccel".to_string(), hwaccel.to_string()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::encoder::HwAccel;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProbe {
        duration: Option<f64>,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn returning(duration: f64) -> Self {
            Self { duration: Some(duration), calls: AtomicUsize::new(0) }
        }

        fn failing() -> Self {
            Self { duration: None, calls: AtomicUsize::new(0) }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DurationProbe for FakeProbe {
        async fn probe(&self, _path: &Path) -> Result<f64, TranscodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.duration.ok_or_else(|| TranscodeError::Probe("exit status: 1".into()))
        }
    }

    fn settings(hw: Option<(&str, &str)>) -> EncoderSettings {
        EncoderSettings {
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            software_encoder: "libx264".into(),
            hw: hw.map(|(hwaccel, encoder)| HwAccel { hwaccel: hwaccel.into(), encoder: encoder.into() }),
            threads_per_job: 2,
        }
    }

    fn opts() -> ProcessingOptions {
        ProcessingOptions { processing_speed: "fast".into(), ..Default::default() }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        let pos = args.iter().position(|a| a == flag)?;
        args.get(pos + 1).map(String::as_str)
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
    }

    #[test]
    fn timestamps_are_millisecond_rounded() {
        assert_eq!(format_timestamp(10.0), "00:00:10.000");
        assert_eq!(format_timestamp(25.5), "00:00:25.500");
        assert_eq!(format_timestamp(3725.0004), "01:02:05.000");
        assert_eq!(format_timestamp(59.9996), "00:01:00.000");
        assert_eq!(format_timestamp(-1.0), "00:00:00.000");
    }

    #[test]
    fn ten_megabytes_over_a_minute() {
        let kbps = video_bitrate_kbps(10.0, 60.0);
        assert!((kbps - 1270.1013).abs() < 0.001, "{kbps}");

        let flags = bitrate_flags(kbps);
        assert_eq!(flags[1], "1270K");
        assert_eq!(flags[3], "1270K");
        assert_eq!(flags[5], "2540k");
    }

    #[test]
    fn bufsize_doubles_the_rounded_rate() {
        let flags = bitrate_flags(1270.6);
        assert_eq!(flags[1], "1271K");
        assert_eq!(flags[3], "1271K");
        assert_eq!(flags[5], "2542k");
    }

    #[test]
    fn zero_or_bogus_duration_uses_the_floor() {
        assert_eq!(video_bitrate_kbps(10.0, 0.0), MIN_VIDEO_BITRATE_KBPS);
        assert_eq!(video_bitrate_kbps(10.0, f64::NAN), MIN_VIDEO_BITRATE_KBPS);
        assert_eq!(video_bitrate_kbps(0.01, 600.0), MIN_VIDEO_BITRATE_KBPS);
    }

    #[tokio::test]
    async fn complete_trim_window_skips_the_probe() {
        let probe = FakeProbe::returning(999.0);
        let mut o = opts();
        o.trim_start = 10.0;
        o.trim_end = 25.5;

        let built = ArgumentBuilder::new(&settings(None))
            .build(&o, Path::new("in.mp4"), false, &probe)
            .await
            .unwrap();

        assert_eq!(built.duration, 15.5);
        assert_eq!(probe.calls(), 0);
        assert_eq!(value_after(&built.args, "-ss"), Some("00:00:10.000"));
        assert_eq!(value_after(&built.args, "-to"), Some("00:00:25.500"));
    }

    #[tokio::test]
    async fn without_trim_the_probe_supplies_duration() {
        let probe = FakeProbe::returning(42.0);

        let built = ArgumentBuilder::new(&settings(None))
            .build(&opts(), Path::new("in.mp4"), false, &probe)
            .await
            .unwrap();

        assert_eq!(built.duration, 42.0);
        assert_eq!(probe.calls(), 1);
        assert!(!built.args.contains(&"-ss".to_string()));
        assert!(!built.args.contains(&"-to".to_string()));
    }

    #[tokio::test]
    async fn start_only_trim_subtracts_from_probed_duration() {
        let probe = FakeProbe::returning(30.0);
        let mut o = opts();
        o.trim_start = 12.0;

        let built = ArgumentBuilder::new(&settings(None))
            .build(&o, Path::new("in.mp4"), false, &probe)
            .await
            .unwrap();

        assert_eq!(built.duration, 18.0);
        assert_eq!(value_after(&built.args, "-ss"), Some("00:00:12.000"));
    }

    #[tokio::test]
    async fn probe_failure_is_fatal() {
        let err = ArgumentBuilder::new(&settings(None))
            .build(&opts(), Path::new("in.mp4"), false, &FakeProbe::failing())
            .await
            .unwrap_err();

        assert!(matches!(err, TranscodeError::Probe(_)));
    }

    #[tokio::test]
    async fn inverted_window_is_rejected() {
        let mut o = opts();
        o.trim_start = 8.0;
        o.trim_end = 8.0;

        let err = ArgumentBuilder::new(&settings(None))
            .build(&o, Path::new("in.mp4"), false, &FakeProbe::returning(10.0))
            .await
            .unwrap_err();

        assert!(matches!(err, TranscodeError::InvalidOptions(_)));
    }

    #[tokio::test]
    async fn canonical_output_shaping_and_order() {
        let mut o = opts();
        o.target_size_mb = 10.0;

        let built = ArgumentBuilder::new(&settings(None))
            .build(&o, Path::new("clip.mov"), false, &FakeProbe::returning(60.0))
            .await
            .unwrap();

        let expected: Vec<String> = [
            "-i", "clip.mov", "-c:v", "libx264", "-threads", "2", "-b:v", "1270K", "-maxrate", "1270K", "-bufsize",
            "2540k", "-preset", "fast", "-c:a", "copy", "-movflags", MOVFLAGS, "-loglevel", "error", "-progress",
            "pipe:2", "-nostats", "-f", "mp4", "pipe:1",
        ]
        .map(String::from)
        .to_vec();
        assert_eq!(built.args, expected);
    }

    #[tokio::test]
    async fn lossless_wins_over_target_size() {
        let mut o = opts();
        o.lossless_export = true;
        o.target_size_mb = 10.0;

        let built = ArgumentBuilder::new(&settings(None))
            .build(&o, Path::new("in.mp4"), false, &FakeProbe::returning(60.0))
            .await
            .unwrap();

        assert_eq!(value_after(&built.args, "-crf"), Some("18"));
        assert_eq!(value_after(&built.args, "-preset"), Some("fast"));
        assert!(!built.args.contains(&"-b:v".to_string()));
    }

    #[tokio::test]
    async fn lossless_export_keeps_the_requested_speed() {
        let mut o = opts();
        o.lossless_export = true;
        o.processing_speed = "ultrafast".into();

        let built = ArgumentBuilder::new(&settings(None))
            .build(&o, Path::new("in.mp4"), false, &FakeProbe::returning(60.0))
            .await
            .unwrap();

        assert_eq!(value_after(&built.args, "-preset"), Some("ultrafast"));
        assert_eq!(value_after(&built.args, "-crf"), Some("18"));
        assert_eq!(built.args.iter().filter(|a| *a == "-preset").count(), 1);
    }

    #[tokio::test]
    async fn gpu_jobs_get_hw_encoder_and_hwaccel_before_input() {
        let s = settings(Some(("cuda", "h264_nvenc")));
        let mut o = opts();
        o.processing_speed = "faster".into();

        let built = ArgumentBuilder::new(&s)
            .build(&o, Path::new("in.mp4"), true, &FakeProbe::returning(60.0))
            .await
            .unwrap();

        assert_eq!(&built.args[..4], &["-hwaccel", "cuda", "-i", "in.mp4"]);
        assert_eq!(value_after(&built.args, "-c:v"), Some("h264_nvenc"));
        assert_eq!(value_after(&built.args, "-preset"), Some("hp"));

        let cpu = ArgumentBuilder::new(&s)
            .build(&o, Path::new("in.mp4"), false, &FakeProbe::returning(60.0))
            .await
            .unwrap();
        assert!(!cpu.args.contains(&"-hwaccel".to_string()));
        assert_eq!(value_after(&cpu.args, "-c:v"), Some("libx264"));
    }

    #[test]
    fn presets_are_remapped_per_family() {
        assert_eq!(preset_for(EncoderFamily::Nvenc, "ultrafast").unwrap(), Some("fast"));
        assert_eq!(preset_for(EncoderFamily::Nvenc, "veryfast").unwrap(), Some("medium"));
        assert_eq!(preset_for(EncoderFamily::Nvenc, "unheard-of").unwrap(), Some("fast"));
        assert_eq!(preset_for(EncoderFamily::Qsv, "superfast").unwrap(), Some("veryfast"));
        assert_eq!(preset_for(EncoderFamily::Vaapi, "fast").unwrap(), None);
        assert_eq!(preset_for(EncoderFamily::Software, "medium").unwrap(), Some("medium"));
        assert!(matches!(
            preset_for(EncoderFamily::Software, "placebo"),
            Err(TranscodeError::InvalidOptions(_))
        ));
    }

    #[test]
    fn hwaccel_goes_before_the_first_input_only_once() {
        let mut args: Vec<String> = ["-y", "-ss", "0", "-i", "a.mp4", "-i", "b.mp4"].map(String::from).to_vec();
        apply_hwaccel(&mut args, "vaapi");
        apply_hwaccel(&mut args, "vaapi");

        assert_eq!(&args[..5], &["-y", "-ss", "0", "-hwaccel", "vaapi"]);
        assert_eq!(args.iter().filter(|a| *a == "-hwaccel").count(), 1);

        let mut leading: Vec<String> = ["-i", "a.mp4"].map(String::from).to_vec();
        apply_hwaccel(&mut leading, "cuda");
        assert_eq!(leading, ["-hwaccel", "cuda", "-i", "a.mp4"]);
    }

    proptest! {
        #[test]
        fn trim_window_fixes_duration_without_probing(start in 0.0f64..10_000.0, len in 0.001f64..10_000.0) {
            let probe = FakeProbe::returning(1.0);
            let mut o = opts();
            o.trim_start = start;
            o.trim_end = start + len;

            let built = block_on(ArgumentBuilder::new(&settings(None)).build(&o, Path::new("in.mp4"), false, &probe)).unwrap();

            prop_assert_eq!(built.duration, o.trim_end - o.trim_start);
            prop_assert_eq!(probe.calls(), 0);
        }

        #[test]
        fn untrimmed_duration_is_the_probed_one(probed in 0.0f64..100_000.0) {
            let probe = FakeProbe::returning(probed);

            let built = block_on(ArgumentBuilder::new(&settings(None)).build(&opts(), Path::new("in.mp4"), false, &probe)).unwrap();

            prop_assert_eq!(built.duration, probed);
            prop_assert_eq!(probe.calls(), 1);
        }

        #[test]
        fn bitrate_matches_formula(target in 0.001f64..10_000.0, duration in 0.001f64..100_000.0) {
            let kbps = video_bitrate_kbps(target, duration);
            prop_assert_eq!(kbps, (target * 8388.608 / duration - 128.0).max(5.0));
            prop_assert!(kbps >= MIN_VIDEO_BITRATE_KBPS);

            let flags = bitrate_flags(kbps);
            prop_assert_eq!(flags[5].clone(), format!("{}k", (kbps * 2.0) as i64));
        }
    }
}
