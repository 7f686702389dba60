//! Thin wrapper around the `ffmpeg` and `ffprobe` executables.

use crate::error::{ProcessingError, ProcessingResult};
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Lines of stderr kept for the error message of a failed run.
const STDERR_TAIL_LINES: usize = 20;

const DANGEROUS_CHARS: [char; 11] = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r'];

fn validate_executable(path: &str) -> ProcessingResult<()> {
    if path.is_empty() || path.chars().any(|c| DANGEROUS_CHARS.contains(&c)) {
        return Err(ProcessingError::InvalidExecutable(path.to_string()));
    }
    if path.contains("..") {
        return Err(ProcessingError::InvalidExecutable(format!(
            "{} (directory traversal)",
            path
        )));
    }
    Ok(())
}

/// Locations of the ffmpeg tools.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl Ffmpeg {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> ProcessingResult<Self> {
        let ffmpeg_path = ffmpeg_path.into();
        let ffprobe_path = ffprobe_path.into();
        validate_executable(&ffmpeg_path)?;
        validate_executable(&ffprobe_path)?;

        Ok(Self {
            ffmpeg_path,
            ffprobe_path,
        })
    }

    /// Run ffmpeg to completion.
    #[tracing::instrument(skip(self, args), fields(
        process.executable.name = "ffmpeg",
        process.executable.path = %self.ffmpeg_path,
    ))]
    pub async fn run(&self, args: &[String]) -> ProcessingResult<()> {
        let start = std::time::Instant::now();

        let output = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProcessingError::Ffmpeg(format!("Failed to execute ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProcessingError::Ffmpeg(stderr.trim().to_string()));
        }

        tracing::debug!(
            duration_ms = start.elapsed().as_millis(),
            "ffmpeg completed"
        );

        Ok(())
    }

    /// Run ffmpeg with `-progress pipe:1` prepended, turning `out_time_us` reports into
    /// percentages of `duration_secs`. Progress is best effort: if the receiver is
    /// slow or gone, updates are dropped rather than stalling the encoder.
    #[tracing::instrument(skip(self, args, progress), fields(
        process.executable.name = "ffmpeg",
        process.executable.path = %self.ffmpeg_path,
    ))]
    pub async fn run_with_progress(
        &self,
        args: &[String],
        duration_secs: Option<f64>,
        progress: &mpsc::Sender<u8>,
    ) -> ProcessingResult<()> {
        let start = std::time::Instant::now();

        let mut child = Command::new(&self.ffmpeg_path)
            // global options must precede the output or ffmpeg ignores them
            .args(["-progress", "pipe:1", "-nostats", "-loglevel", "error"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessingError::Ffmpeg(format!("Failed to execute ffmpeg: {}", e)))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let read_progress = async {
            let Some(stdout) = stdout else {
                return Ok(());
            };
            let mut lines = BufReader::new(stdout).lines();
            let mut last_sent = None;
            while let Some(line) = lines.next_line().await? {
                if let Some(percent) = parse_progress_line(&line, duration_secs) {
                    if last_sent != Some(percent) {
                        let _ = progress.try_send(percent);
                        last_sent = Some(percent);
                    }
                }
            }
            Ok::<_, std::io::Error>(())
        };

        // both pipes are drained together, a full stderr pipe would block ffmpeg
        let (progress_result, stderr_tail) = tokio::join!(read_progress, read_tail(stderr));
        progress_result?;
        let stderr_tail = stderr_tail?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(ProcessingError::Ffmpeg(stderr_tail.trim().to_string()));
        }

        tracing::debug!(
            duration_ms = start.elapsed().as_millis(),
            "ffmpeg completed"
        );

        Ok(())
    }

    /// Container duration in seconds, `None` when ffprobe cannot tell.
    pub async fn probe_duration(&self, path: &Path) -> ProcessingResult<Option<f64>> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProcessingError::Ffmpeg(format!("Failed to execute ffprobe: {}", e)))?;

        if !output.status.success() {
            tracing::debug!(
                stderr = %String::from_utf8_lossy(&output.stderr),
                "ffprobe failed, continuing without duration"
            );
            return Ok(None);
        }

        Ok(parse_probe_duration(&output.stdout))
    }
}

/// Read `pipe` to the end, keeping its last few lines.
async fn read_tail(pipe: Option<impl AsyncRead + Unpin>) -> std::io::Result<String> {
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };

    let mut reader = BufReader::new(pipe);
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(String::from_utf8_lossy(&line).trim_end().to_string());
    }
    Ok(Vec::from(tail).join("\n"))
}

fn parse_probe_duration(stdout: &[u8]) -> Option<f64> {
    let info: serde_json::Value = serde_json::from_slice(stdout).ok()?;
    info["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| *d > 0.0)
}

/// One line of `-progress` output to a percentage. `progress=end` is 100; time
/// reports are capped at 99 until then.
fn parse_progress_line(line: &str, duration_secs: Option<f64>) -> Option<u8> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "progress" if value == "end" => Some(100),
        "out_time_us" | "out_time_ms" => {
            let duration = duration_secs?;
            // ffmpeg reports microseconds under both keys
            let micros = value.parse::<f64>().ok()?;
            if micros < 0.0 {
                return None;
            }
            let percent = (micros / 1_000_000.0 / duration * 100.0).floor();
            Some(percent.clamp(0.0, 99.0) as u8)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_dangerous_paths() {
        assert!(Ffmpeg::new("ffmpeg", "ffprobe").is_ok());
        assert!(Ffmpeg::new("/usr/bin/ffmpeg", "/usr/bin/ffprobe").is_ok());
        assert!(Ffmpeg::new("ffmpeg; rm -rf /", "ffprobe").is_err());
        assert!(Ffmpeg::new("ffmpeg", "../ffprobe").is_err());
        assert!(Ffmpeg::new("", "ffprobe").is_err());
    }

    #[test]
    fn test_parse_progress_line() {
        assert_eq!(parse_progress_line("out_time_us=5000000", Some(10.0)), Some(50));
        assert_eq!(parse_progress_line("out_time_ms=2500000", Some(10.0)), Some(25));
        assert_eq!(parse_progress_line("out_time_us=20000000", Some(10.0)), Some(99));
        assert_eq!(parse_progress_line("progress=end", None), Some(100));
        assert_eq!(parse_progress_line("progress=continue", Some(10.0)), None);
        assert_eq!(parse_progress_line("out_time_us=N/A", Some(10.0)), None);
        assert_eq!(parse_progress_line("out_time_us=5000000", None), None);
        assert_eq!(parse_progress_line("frame=12", Some(10.0)), None);
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &tempfile::TempDir, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    // about 100 KB of stderr, more than a pipe buffer holds
    #[cfg(unix)]
    const NOISY: &str = r#"i=0
while [ $i -lt 5000 ]; do echo "corrupt frame $i" >&2; i=$((i+1)); done"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_progress_survives_noisy_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = Ffmpeg::new(
            fake_ffmpeg(&dir, &format!("{}\necho progress=end", NOISY)),
            "ffprobe",
        )
        .unwrap();
        let (tx, mut rx) = mpsc::channel(8);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            ffmpeg.run_with_progress(&[], None, &tx),
        )
        .await
        .expect("ffmpeg run stalled");

        assert!(result.is_ok());
        assert_eq!(rx.recv().await, Some(100));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_progress_reports_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = Ffmpeg::new(
            fake_ffmpeg(&dir, &format!("{}\necho 'Invalid data found' >&2\nexit 1", NOISY)),
            "ffprobe",
        )
        .unwrap();
        let (tx, _rx) = mpsc::channel(8);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            ffmpeg.run_with_progress(&[], None, &tx),
        )
        .await
        .expect("ffmpeg run stalled");

        let message = result.unwrap_err().to_string();
        assert!(message.ends_with("Invalid data found"));
        assert!(!message.contains("corrupt frame 0\n"));
    }

    #[test]
    fn test_parse_probe_duration() {
        let json = br#"{"format": {"duration": "12.480000", "format_name": "mov,mp4"}}"#;
        assert_eq!(parse_probe_duration(json), Some(12.48));
        assert_eq!(parse_probe_duration(br#"{"format": {}}"#), None);
        assert_eq!(parse_probe_duration(b"not json"), None);
    }
}
