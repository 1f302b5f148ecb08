use crate::config::redact_credentials;
use anyhow::{Context, anyhow};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use vision::Frame;

#[derive(Error, Debug)]
pub enum SourceError {
    /// The source could not be opened at all; the worker gives up.
    #[error("failed to open video source: {0:#}")]
    Open(#[source] anyhow::Error),

    /// A single read failed; the worker backs off and retries.
    #[error("failed to read frame: {0:#}")]
    Read(#[source] anyhow::Error),
}

/// A live frame source. Dropping it releases the underlying capture.
pub trait VideoSource: Send {
    fn read_frame(&mut self) -> Result<Frame, SourceError>;
}

/// Opens a fresh [`VideoSource`] each time the stream is started.
pub trait SourceOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn VideoSource>, SourceError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Socket I/O timeout handed to ffmpeg so a stalled read errors out.
    pub io_timeout: Duration,
}

impl FfmpegSettings {
    fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    fn command(&self) -> Command {
        let scale_arg = format!("scale={}:{}", self.width, self.height);
        let timeout_us = self.io_timeout.as_micros().to_string();

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");

        if self.url.starts_with("rtsp://") || self.url.starts_with("rtsps://") {
            cmd.arg("-rtsp_transport")
                .arg("tcp")
                .arg("-timeout")
                .arg(&timeout_us)
                .arg("-fflags")
                .arg("nobuffer")
                .arg("-flags")
                .arg("low_delay");
        }

        cmd.arg("-i")
            .arg(&self.url)
            .arg("-an")
            .arg("-vf")
            .arg(&scale_arg)
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegSourceOpener {
    settings: FfmpegSettings,
}

impl FfmpegSourceOpener {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self { settings }
    }
}

impl SourceOpener for FfmpegSourceOpener {
    /// Spawns ffmpeg and waits for the first frame, so an unreachable camera
    /// is reported as an open failure rather than an endless read retry.
    fn open(&self) -> Result<Box<dyn VideoSource>, SourceError> {
        tracing::info!(
            url = %redact_credentials(&self.settings.url),
            width = self.settings.width,
            height = self.settings.height,
            "Opening video source"
        );

        let mut source = FfmpegSource {
            settings: self.settings.clone(),
            process: None,
            pending: None,
        };
        let first = source.read_frame().map_err(|e| match e {
            SourceError::Read(inner) | SourceError::Open(inner) => SourceError::Open(inner),
        })?;
        source.pending = Some(first);

        tracing::info!("Video source opened");
        Ok(Box::new(source))
    }
}

/// Decodes a network stream into RGB frames through an ffmpeg child process.
///
/// After a failed read the child is reaped and the next read respawns it, so a
/// dropped RTSP session recovers through the worker's normal retry path.
pub struct FfmpegSource {
    settings: FfmpegSettings,
    process: Option<(Child, ChildStdout)>,
    pending: Option<Frame>,
}

impl FfmpegSource {
    fn spawn(&self) -> anyhow::Result<(Child, ChildStdout)> {
        let mut child = self
            .settings
            .command()
            .spawn()
            .context("failed to spawn ffmpeg")?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                reap(&mut child);
                return Err(anyhow!("failed to capture ffmpeg stdout"));
            }
        };
        Ok((child, stdout))
    }

    fn kill(&mut self) {
        if let Some((mut child, _)) = self.process.take() {
            reap(&mut child);
        }
    }
}

impl VideoSource for FfmpegSource {
    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }

        if self.process.is_none() {
            self.process = Some(self.spawn().map_err(SourceError::Read)?);
        }

        let mut buffer = vec![0u8; self.settings.frame_bytes()];
        let read = match self.process.as_mut() {
            Some((_, stdout)) => stdout.read_exact(&mut buffer),
            None => return Err(SourceError::Read(anyhow!("ffmpeg is not running"))),
        };

        if let Err(e) = read {
            self.kill();
            return Err(SourceError::Read(
                anyhow::Error::new(e).context("ffmpeg stream ended"),
            ));
        }

        Frame::from_raw(self.settings.width, self.settings.height, buffer)
            .ok_or_else(|| SourceError::Read(anyhow!("frame buffer size mismatch")))
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.kill();
        tracing::debug!("Video source released");
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> FfmpegSettings {
        FfmpegSettings {
            url: url.to_string(),
            width: 640,
            height: 360,
            io_timeout: Duration::from_secs(5),
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn rtsp_command_uses_tcp_and_timeout() {
        let args = args(&settings("rtsp://cam/stream1").command());

        let transport = args.iter().position(|a| a == "-rtsp_transport").unwrap();
        assert_eq!(args[transport + 1], "tcp");
        let timeout = args.iter().position(|a| a == "-timeout").unwrap();
        assert_eq!(args[timeout + 1], "5000000");
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
        assert!(args.windows(2).any(|w| w == ["-vf", "scale=640:360"]));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn file_input_skips_rtsp_flags() {
        let args = args(&settings("/tmp/clip.mp4").command());
        assert!(!args.iter().any(|a| a == "-rtsp_transport"));
        assert!(args.windows(2).any(|w| w == ["-i", "/tmp/clip.mp4"]));
    }

    #[test]
    fn frame_size_is_rgb24() {
        assert_eq!(settings("x").frame_bytes(), 640 * 360 * 3);
    }
}
