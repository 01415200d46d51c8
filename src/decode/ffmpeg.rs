//! Reference decoder backend that shells out to the `ffmpeg`/`ffprobe` CLI
//! tools.
//!
//! Sequential reads stream raw RGBA frames from a long-lived child process
//! pipe; a seek tears the child down and respawns it with `-ss`, which is
//! what makes random access materially more expensive than reading ahead.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::decode::{Decoder, DecoderInfo, PixelFormat, RawFrame};
use crate::foundation::error::{StrobeError, StrobeResult};

/// Probe source metadata through `ffprobe`.
pub fn probe(source_path: &Path) -> StrobeResult<DecoderInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        avg_frame_rate: Option<String>,
        nb_frames: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| StrobeError::resource_unavailable(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(StrobeError::resource_unavailable(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| StrobeError::resource_unavailable(format!("ffprobe json parse failed: {e}")))?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| StrobeError::resource_unavailable("no video stream found"))?;

    let width = video
        .width
        .ok_or_else(|| StrobeError::resource_unavailable("missing video width from ffprobe"))?;
    let height = video
        .height
        .ok_or_else(|| StrobeError::resource_unavailable("missing video height from ffprobe"))?;
    let fps = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .ok_or_else(|| StrobeError::resource_unavailable("missing video frame rate from ffprobe"))?;
    // nb_frames is absent for streams/devices; 0 means unknown.
    let frame_count = video
        .nb_frames
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(DecoderInfo {
        fps,
        frame_count,
        width,
        height,
    })
}

fn parse_rate(s: &str) -> Option<f64> {
    let rate = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => s.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// [`Decoder`] backed by an `ffmpeg` rawvideo pipe.
pub struct FfmpegDecoder {
    source_path: PathBuf,
    info: DecoderInfo,
    child: Option<Child>,
    /// Frame index the next `read_next` call will return.
    cursor: u64,
}

impl FfmpegDecoder {
    /// Probe `source_path` and prepare a decoder positioned at frame 0.
    ///
    /// The child process is spawned lazily on the first read.
    pub fn open(source_path: impl Into<PathBuf>) -> StrobeResult<Self> {
        let source_path = source_path.into();
        let info = probe(&source_path)?;
        Ok(Self {
            source_path,
            info,
            child: None,
            cursor: 0,
        })
    }

    fn spawn_at(&mut self, frame_index: u64) -> StrobeResult<()> {
        self.kill_child();
        let start_sec = frame_index as f64 / self.info.fps;
        let child = Command::new("ffmpeg")
            .args(["-v", "error", "-ss", &format!("{start_sec:.9}")])
            .arg("-i")
            .arg(&self.source_path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| StrobeError::decode(format!("failed to spawn ffmpeg: {e}")))?;
        self.child = Some(child);
        self.cursor = frame_index;
        Ok(())
    }

    fn kill_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Decoder for FfmpegDecoder {
    fn info(&self) -> DecoderInfo {
        self.info
    }

    fn read_next(&mut self) -> StrobeResult<Option<RawFrame>> {
        if self.child.is_none() {
            let at = self.cursor;
            self.spawn_at(at)?;
        }
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| StrobeError::decode("ffmpeg child unexpectedly missing"))?;
        let stdout = child
            .stdout
            .as_mut()
            .ok_or_else(|| StrobeError::decode("ffmpeg child has no stdout pipe"))?;

        let len = (self.info.width as usize) * (self.info.height as usize) * 4;
        let mut data = vec![0u8; len];
        match stdout.read_exact(&mut data) {
            Ok(()) => {
                self.cursor += 1;
                Ok(Some(RawFrame {
                    format: PixelFormat::Rgba8,
                    data,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(StrobeError::decode(format!("ffmpeg pipe read failed: {e}"))),
        }
    }

    fn seek(&mut self, frame_index: u64) -> StrobeResult<()> {
        self.spawn_at(frame_index)
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.kill_child();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Decode paths shell out to ffmpeg/ffprobe and are validated by
    // integration runs where the tools exist; only the pure parsing is
    // unit-tested here.

    #[test]
    fn parse_rate_accepts_fractions_and_plain_numbers() {
        assert_eq!(parse_rate("30/1"), Some(30.0));
        assert_eq!(parse_rate("30000/1001"), Some(30000.0 / 1001.0));
        assert_eq!(parse_rate("25"), Some(25.0));
    }

    #[test]
    fn parse_rate_rejects_degenerate_inputs() {
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("30/0"), None);
        assert_eq!(parse_rate("abc"), None);
        assert_eq!(parse_rate("0"), None);
    }
}
