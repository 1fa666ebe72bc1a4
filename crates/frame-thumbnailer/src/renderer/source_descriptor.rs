//! Input preparation for the ffmpeg renderer
//!
//! Local files are not handed to ffmpeg directly. A small `ffconcat`
//! descriptor naming the file by relative path is written next to it, which
//! lets the concat demuxer open it in safe mode (relative, portable names
//! only). When the source directory is read-only, or the file name is not
//! portable, the descriptor goes to the temp directory instead, references the
//! file by absolute path and has to be opened with `-safe 0`.
//!
//! Remote sources are opened by ffmpeg's own protocol stack with the request
//! headers passed through unmodified.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::errors::{RenderError, RenderResult};
use crate::models::{MediaSource, ThumbnailRequest};

static DESCRIPTOR_SEQ: AtomicU64 = AtomicU64::new(0);

/// Descriptor file that must outlive every ffmpeg/ffprobe run for the session
#[derive(Debug)]
enum Descriptor {
    /// Written alongside the source; removed on drop
    Companion(PathBuf),
    /// Written to the temp directory; `TempPath` removes it on drop
    Temporary(tempfile::TempPath),
}

impl Descriptor {
    fn path(&self) -> &Path {
        match self {
            Descriptor::Companion(path) => path,
            Descriptor::Temporary(path) => path,
        }
    }
}

impl Drop for Descriptor {
    fn drop(&mut self) {
        if let Descriptor::Companion(path) = self
            && let Err(e) = std::fs::remove_file(path.as_path())
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove descriptor {}: {}", path.display(), e);
        }
    }
}

/// How ffmpeg should open a request's source
#[derive(Debug)]
pub struct FfmpegInput {
    input_args: Vec<String>,
    target: String,
    descriptor: Option<Descriptor>,
}

impl FfmpegInput {
    /// Prepare the input for a request, materializing a descriptor for local files
    pub fn prepare(request: &ThumbnailRequest) -> RenderResult<Self> {
        match &request.source {
            MediaSource::Remote(url) => Ok(Self::remote(url, &request.headers)),
            MediaSource::Local(path) => Self::local(path),
        }
    }

    fn remote(url: &Url, headers: &[(String, String)]) -> Self {
        let mut input_args = Vec::new();
        if !headers.is_empty() {
            let header_block: String = headers
                .iter()
                .map(|(name, value)| format!("{name}: {value}\r\n"))
                .collect();
            input_args.push("-headers".to_string());
            input_args.push(header_block);
        }

        Self {
            input_args,
            target: url.to_string(),
            descriptor: None,
        }
    }

    fn local(path: &Path) -> RenderResult<Self> {
        if !path.is_file() {
            return Err(RenderError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a readable file", path.display()),
            )));
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| RenderError::invalid_output(format!("bad file name: {}", path.display())))?;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        if is_portable_name(file_name) {
            match write_companion(&directory, file_name) {
                Ok(companion) => {
                    debug!("Using companion descriptor {}", companion.display());
                    return Ok(Self::concat(Descriptor::Companion(companion), true));
                }
                Err(e) => {
                    debug!(
                        "Source directory {} not writable ({}), using temp descriptor",
                        directory.display(),
                        e
                    );
                }
            }
        } else {
            debug!(
                "File name {:?} is not portable, using temp descriptor",
                file_name
            );
        }

        let absolute = path.canonicalize()?;
        let temporary = write_temporary(&absolute)?;
        Ok(Self::concat(Descriptor::Temporary(temporary), false))
    }

    fn concat(descriptor: Descriptor, safe: bool) -> Self {
        Self {
            input_args: vec![
                "-f".to_string(),
                "concat".to_string(),
                "-safe".to_string(),
                if safe { "1" } else { "0" }.to_string(),
            ],
            target: descriptor.path().to_string_lossy().into_owned(),
            descriptor: Some(descriptor),
        }
    }

    /// Input-side arguments, ending with `-i <target>`
    pub fn args(&self, seek: Option<Duration>) -> Vec<String> {
        let mut args = Vec::with_capacity(self.input_args.len() + 4);
        if let Some(position) = seek {
            args.push("-ss".to_string());
            args.push(format!("{:.3}", position.as_secs_f64()));
        }
        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.target.clone());
        args
    }

    /// Path of the materialized descriptor, if any
    pub fn descriptor_path(&self) -> Option<&Path> {
        self.descriptor.as_ref().map(Descriptor::path)
    }

    pub fn uses_companion(&self) -> bool {
        matches!(self.descriptor, Some(Descriptor::Companion(_)))
    }
}

/// ffconcat document referencing a single entry
pub fn ffconcat_document(entry: &str) -> String {
    format!("ffconcat version 1.0\nfile '{}'\n", entry.replace('\'', r"'\''"))
}

/// Names the concat demuxer accepts in safe mode
fn is_portable_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn write_companion(directory: &Path, file_name: &str) -> std::io::Result<PathBuf> {
    let seq = DESCRIPTOR_SEQ.fetch_add(1, Ordering::Relaxed);
    let companion = directory.join(format!(
        ".{}.{}-{}.ffconcat",
        file_name,
        std::process::id(),
        seq
    ));
    std::fs::write(&companion, ffconcat_document(file_name))?;
    Ok(companion)
}

fn write_temporary(absolute: &Path) -> RenderResult<tempfile::TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("frame-thumbnailer-")
        .suffix(".ffconcat")
        .tempfile()?;
    std::io::Write::write_all(
        file.as_file_mut(),
        ffconcat_document(&absolute.to_string_lossy()).as_bytes(),
    )?;
    Ok(file.into_temp_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portable_names() {
        assert!(is_portable_name("clip_01-final.mp4"));
        assert!(!is_portable_name("holiday clip.mp4"));
        assert!(!is_portable_name(".hidden.mp4"));
        assert!(!is_portable_name("vidéo.mp4"));
    }

    #[test]
    fn test_ffconcat_escapes_quotes() {
        assert_eq!(
            ffconcat_document("it's.mp4"),
            "ffconcat version 1.0\nfile 'it'\\''s.mp4'\n"
        );
    }

    #[test]
    fn test_companion_descriptor_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"not really a video").unwrap();

        let request = ThumbnailRequest::new(MediaSource::Local(video), 200);
        let input = FfmpegInput::prepare(&request).unwrap();
        assert!(input.uses_companion());

        let descriptor = input.descriptor_path().unwrap().to_path_buf();
        assert_eq!(descriptor.parent(), Some(dir.path()));
        let contents = std::fs::read_to_string(&descriptor).unwrap();
        assert!(contents.contains("file 'clip.mp4'"));

        let args = input.args(Some(Duration::from_millis(1500)));
        assert_eq!(
            &args[..6],
            &["-ss", "1.500", "-f", "concat", "-safe", "1"]
        );
        assert_eq!(args.last().unwrap(), &descriptor.to_string_lossy());

        drop(input);
        assert!(!descriptor.exists());
    }

    #[test]
    fn test_unportable_name_falls_back_to_temp_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("holiday clip.mp4");
        std::fs::write(&video, b"x").unwrap();

        let request = ThumbnailRequest::new(MediaSource::Local(video.clone()), 200);
        let input = FfmpegInput::prepare(&request).unwrap();
        assert!(!input.uses_companion());

        let descriptor = input.descriptor_path().unwrap().to_path_buf();
        assert_ne!(descriptor.parent(), Some(dir.path()));
        let contents = std::fs::read_to_string(&descriptor).unwrap();
        let canonical = video.canonicalize().unwrap();
        assert!(contents.contains(&*canonical.to_string_lossy()));
        assert!(input.args(None).contains(&"0".to_string()));

        drop(input);
        assert!(!descriptor.exists());
    }

    #[test]
    fn test_missing_local_file_is_an_error() {
        let request = ThumbnailRequest::new(
            MediaSource::Local(PathBuf::from("/definitely/not/here.mp4")),
            200,
        );
        assert!(FfmpegInput::prepare(&request).is_err());
    }

    #[test]
    fn test_remote_headers_pass_through() {
        let request = ThumbnailRequest::parse("https://cdn.example.com/clip.mp4", 200)
            .unwrap()
            .with_header("Authorization", "Bearer abc")
            .with_header("X-Trace", "1");
        let input = FfmpegInput::prepare(&request).unwrap();

        assert_eq!(input.descriptor_path(), None);
        assert_eq!(
            input.args(None),
            vec![
                "-headers",
                "Authorization: Bearer abc\r\nX-Trace: 1\r\n",
                "-i",
                "https://cdn.example.com/clip.mp4",
            ]
        );
    }
}
