use image::RgbImage;
use serde::Deserialize;
use std::ffi::OsString;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use super::DetectionError;
use crate::config::VideoConfig;

const STDERR_LIMIT: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMetadata {
    /// Frame count reported by the container, or estimated from duration.
    pub total_frames: Option<u64>,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Stream duration in seconds as reported by the container.
    pub stream_duration: Option<f64>,
}

impl VideoMetadata {
    pub fn duration(&self) -> f64 {
        match self.total_frames {
            Some(total) if self.fps > 0.0 => total as f64 / self.fps,
            _ => self.stream_duration.unwrap_or(0.0),
        }
    }
}

/// Sequential reader of decoded frames.
pub trait FrameSource {
    fn metadata(&self) -> &VideoMetadata;

    /// Returns `Ok(None)` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, DetectionError>;
}

pub trait VideoBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, DetectionError>;
}

/// Decodes videos with the `ffprobe` and `ffmpeg` executables.
pub struct FfmpegBackend {
    ffmpeg: String,
    ffprobe: String,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl FfmpegBackend {
    pub fn new(config: &VideoConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
        }
    }

    fn probe(&self, path: &Path) -> Result<VideoMetadata, DetectionError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,nb_frames,avg_frame_rate,r_frame_rate,duration:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| DetectionError::VideoOpen(format!("failed to run {}: {}", self.ffprobe, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetectionError::VideoOpen(stderr.trim().to_string()));
        }

        parse_probe(&output.stdout)
    }
}

fn parse_probe(raw: &[u8]) -> Result<VideoMetadata, DetectionError> {
    let probe: ProbeOutput = serde_json::from_slice(raw)
        .map_err(|e| DetectionError::VideoOpen(format!("unreadable probe output: {}", e)))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| DetectionError::VideoOpen("no video stream found".to_string()))?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(DetectionError::VideoOpen(
            "video stream has no dimensions".to_string(),
        ));
    }

    let fps = [stream.avg_frame_rate.as_deref(), stream.r_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .map(parse_rate)
        .find(|rate| *rate > 0.0)
        .unwrap_or(0.0);

    let stream_duration = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    let total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .or_else(|| match stream_duration {
            Some(duration) if fps > 0.0 => Some((duration * fps).round() as u64),
            _ => None,
        });

    Ok(VideoMetadata {
        total_frames,
        fps,
        width,
        height,
        stream_duration,
    })
}

/// Parses ffprobe rationals such as `30000/1001`.
fn parse_rate(rate: &str) -> f64 {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().unwrap_or(0.0);
            let den: f64 = den.trim().parse().unwrap_or(0.0);
            if den > 0.0 { num / den } else { 0.0 }
        }
        None => rate.trim().parse().unwrap_or(0.0),
    }
}

/// Decoder arguments. Pins the probed stream and passes frames through
/// unchanged so frame numbers index the container's frames.
fn decode_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-v", "error", "-noautorotate", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_os_string());
    args.extend(
        [
            "-map",
            "0:v:0",
            "-fps_mode",
            "passthrough",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgb24",
            "pipe:1",
        ]
        .into_iter()
        .map(OsString::from),
    );
    args
}

/// Collects the head of the decoder's stderr and discards the rest, so the
/// child never blocks on a full pipe.
fn drain_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut head = Vec::new();
        let _ = (&mut stderr).take(STDERR_LIMIT).read_to_end(&mut head);
        let _ = std::io::copy(&mut stderr, &mut std::io::sink());
        String::from_utf8_lossy(&head).trim().to_string()
    })
}

impl VideoBackend for FfmpegBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, DetectionError> {
        let metadata = self.probe(path)?;
        log::debug!("Probed {}: {:?}", path.display(), metadata);

        let mut child = Command::new(&self.ffmpeg)
            .args(decode_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DetectionError::VideoOpen(format!("failed to run {}: {}", self.ffmpeg, e)))?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DetectionError::VideoOpen(
                "decoder pipes are unavailable".to_string(),
            ));
        };

        Ok(Box::new(FfmpegFrames {
            frame_len: metadata.width as usize * metadata.height as usize * 3,
            metadata,
            child,
            reader: BufReader::new(stdout),
            stderr: Some(drain_stderr(stderr)),
            exhausted: false,
        }))
    }
}

struct FfmpegFrames {
    metadata: VideoMetadata,
    frame_len: usize,
    child: Child,
    reader: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    exhausted: bool,
}

impl FfmpegFrames {
    /// Reaps the decoder after its output ended. A non-zero exit is a
    /// decode failure rather than the end of the stream.
    fn finish(&mut self) -> Result<(), DetectionError> {
        let status = self
            .child
            .wait()
            .map_err(|e| DetectionError::FrameRead(format!("decoder did not exit: {}", e)))?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            return Ok(());
        }
        let detail = if stderr.is_empty() {
            format!("decoder exited with {}", status)
        } else {
            format!("decoder exited with {}: {}", status, stderr)
        };
        Err(DetectionError::FrameRead(detail))
    }
}

impl FrameSource for FfmpegFrames {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, DetectionError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_len];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.exhausted = true;
                self.finish()?;
                return Ok(None);
            }
            Err(e) => {
                self.exhausted = true;
                return Err(DetectionError::FrameRead(e.to_string()));
            }
        }

        RgbImage::from_raw(self.metadata.width, self.metadata.height, buf)
            .map(Some)
            .ok_or_else(|| DetectionError::FrameRead("frame buffer size mismatch".to_string()))
    }
}

impl Drop for FfmpegFrames {
    fn drop(&mut self) {
        // The decoder may still be writing frames nobody will read.
        if let Err(e) = self.child.kill() {
            if e.kind() != ErrorKind::InvalidInput {
                log::debug!("Failed to stop decoder: {}", e);
            }
        }
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reads_frame_count_and_rate() {
        let raw = br#"{
            "streams": [{
                "width": 640, "height": 360,
                "r_frame_rate": "25/1", "avg_frame_rate": "25/1",
                "nb_frames": "250", "duration": "10.000000"
            }],
            "format": {"duration": "10.020000"}
        }"#;
        let meta = parse_probe(raw).unwrap();
        assert_eq!(meta.total_frames, Some(250));
        assert_eq!(meta.fps, 25.0);
        assert_eq!((meta.width, meta.height), (640, 360));
        assert_eq!(meta.duration(), 10.0);
    }

    #[test]
    fn missing_frame_count_is_estimated_from_duration() {
        let raw = br#"{
            "streams": [{"width": 320, "height": 240, "avg_frame_rate": "0/0", "r_frame_rate": "30000/1001"}],
            "format": {"duration": "4.004"}
        }"#;
        let meta = parse_probe(raw).unwrap();
        assert!((meta.fps - 29.97).abs() < 0.01);
        assert_eq!(meta.total_frames, Some(120));
    }

    #[test]
    fn unknown_length_has_no_frame_count() {
        let raw = br#"{"streams": [{"width": 320, "height": 240, "r_frame_rate": "0/0"}]}"#;
        let meta = parse_probe(raw).unwrap();
        assert_eq!(meta.total_frames, None);
        assert_eq!(meta.duration(), 0.0);
    }

    #[test]
    fn probe_without_video_stream_is_rejected() {
        let err = parse_probe(br#"{"streams": []}"#).unwrap_err();
        assert!(matches!(err, DetectionError::VideoOpen(_)));
    }

    #[test]
    fn rates_parse_as_rationals() {
        assert_eq!(parse_rate("30/1"), 30.0);
        assert_eq!(parse_rate("0/0"), 0.0);
        assert_eq!(parse_rate("24"), 24.0);
        assert_eq!(parse_rate("garbage"), 0.0);
    }

    #[test]
    fn decoder_reads_the_probed_stream_without_resampling() {
        let args: Vec<String> = decode_args(Path::new("clip.mp4"))
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        let position = |flag: &str| args.iter().position(|arg| arg == flag).unwrap();

        assert_eq!(args[position("-i") + 1], "clip.mp4");
        assert_eq!(args[position("-map") + 1], "0:v:0");
        assert_eq!(args[position("-fps_mode") + 1], "passthrough");
        assert!(position("-map") > position("-i"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    fn scripted_backend(dir: &Path, decoder: &str) -> FfmpegBackend {
        let probe = r#"echo '{"streams":[{"width":16,"height":16,"nb_frames":"50","avg_frame_rate":"25/1"}]}'"#;
        FfmpegBackend::new(&VideoConfig {
            ffprobe_path: script(dir, "ffprobe", probe),
            ffmpeg_path: script(dir, "ffmpeg", decoder),
            ..VideoConfig::default()
        })
    }

    #[cfg(unix)]
    #[test]
    fn decoder_exit_status_is_checked_at_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let backend = scripted_backend(
            dir.path(),
            "echo 'Invalid data found when processing input' >&2; exit 1",
        );

        let mut source = backend.open(Path::new("corrupt.mp4")).unwrap();
        assert_eq!(source.metadata().total_frames, Some(50));
        match source.next_frame() {
            Err(DetectionError::FrameRead(message)) => {
                assert!(message.contains("Invalid data found"), "{message}");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(source.next_frame().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn clean_decoder_exit_ends_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        // Two 16x16 rgb24 frames.
        let backend = scripted_backend(dir.path(), "head -c 1536 /dev/zero");

        let mut source = backend.open(Path::new("clip.mp4")).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn missing_executable_is_an_open_error() {
        let backend = FfmpegBackend::new(&VideoConfig {
            ffprobe_path: "/nonexistent/ffprobe".to_string(),
            ..VideoConfig::default()
        });
        let err = backend.open(Path::new("clip.mp4")).err().unwrap();
        assert!(matches!(err, DetectionError::VideoOpen(_)));
    }
}
