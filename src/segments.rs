//! Segment bookkeeping and final concatenation
//!
//! A session records into numbered part files. On stop the parts are listed
//! in a concat manifest and stream-copied into one output file. Parts and
//! manifest are only removed after a successful merge.
//!
//! Every manager carries a short random tag. It names the manager's manifest
//! and disambiguates file names that would otherwise land on a file kept
//! from an earlier session.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, Local};
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::{Container, ManifestPaths};
use crate::error::CaptureError;

const MANIFEST_STEM: &str = "concat_list";

const TIMESTAMP_FORMAT: &str = "%m-%d-%Y.%H.%M.%S";

/// File name of one recorded part; parts are always Matroska
pub fn segment_file_name(index: u32, now: DateTime<Local>) -> String {
    format!("Video_part{}.{}.mkv", index, now.format(TIMESTAMP_FORMAT))
}

/// File name of the merged output
pub fn output_file_name(container: Container, now: DateTime<Local>) -> String {
    format!("Video_{}.{}", now.format(TIMESTAMP_FORMAT), container.extension())
}

/// `dir/name`, or `dir/<stem>.<tag>.<ext>` when `dir/name` already exists
fn unclaimed_path(dir: &Path, name: &str, tag: &str) -> PathBuf {
    let path = dir.join(name);
    if !path.exists() {
        return path;
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) => dir.join(format!("{}.{}.{}", stem, tag, ext)),
        None => dir.join(format!("{}.{}", name, tag)),
    }
}

/// Quote a path for a concat manifest `file` directive
fn manifest_entry(path: &str) -> String {
    format!("file '{}'", path.replace('\'', r"'\''"))
}

/// Ordered list of a session's recorded parts
#[derive(Debug)]
pub struct SegmentManager {
    tag: String,
    output_dir: PathBuf,
    encoder: PathBuf,
    manifest_paths: ManifestPaths,
    segments: Vec<PathBuf>,
    next_index: u32,
}

impl SegmentManager {
    pub fn new(output_dir: PathBuf, encoder: PathBuf, manifest_paths: ManifestPaths) -> Self {
        let mut tag = Uuid::new_v4().simple().to_string();
        tag.truncate(8);
        Self {
            tag,
            output_dir,
            encoder,
            manifest_paths,
            segments: Vec::new(),
            next_index: 0,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Index the next allocated part will get
    pub fn segment_index(&self) -> u32 {
        self.next_index
    }

    /// Reserve the next part path; the index advances even if the part
    /// never gets recorded
    pub fn allocate(&mut self, now: DateTime<Local>) -> (u32, PathBuf) {
        let index = self.next_index;
        self.next_index += 1;
        let name = segment_file_name(index, now);
        (index, unclaimed_path(&self.output_dir, &name, &self.tag))
    }

    /// Append a finished part
    ///
    /// Missing or empty files are dropped: the encoder was stopped before it
    /// flushed anything. Duplicates are ignored.
    pub fn record_segment(&mut self, path: PathBuf) -> bool {
        match std::fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => {
                debug!("Dropping empty segment {:?}", path);
                return false;
            }
            Err(e) => {
                debug!("Dropping segment {:?}: {}", path, e);
                return false;
            }
        }
        if self.segments.contains(&path) {
            warn!("Segment {:?} already recorded", path);
            return false;
        }
        debug!("Recorded segment {:?}", path);
        self.segments.push(path);
        true
    }

    pub fn segments(&self) -> &[PathBuf] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}.txt", MANIFEST_STEM, self.tag))
    }

    /// Path for the merged file; never an existing file
    pub fn output_path(&self, container: Container, now: DateTime<Local>) -> PathBuf {
        unclaimed_path(
            &self.output_dir,
            &output_file_name(container, now),
            &self.tag,
        )
    }

    /// Concat manifest listing every part in recording order
    pub fn manifest_contents(&self) -> String {
        let mut contents = String::new();
        for segment in &self.segments {
            let entry = match self.manifest_paths {
                ManifestPaths::FileName => segment
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| segment.to_string_lossy().into_owned()),
                ManifestPaths::Absolute => std::path::absolute(segment)
                    .unwrap_or_else(|_| segment.clone())
                    .to_string_lossy()
                    .into_owned(),
            };
            contents.push_str(&manifest_entry(&entry));
            contents.push('\n');
        }
        contents
    }

    /// Encoder arguments for the stream-copy merge
    pub fn concat_args(&self, output: &Path) -> Vec<String> {
        vec![
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            self.manifest_path().to_string_lossy().into_owned(),
            "-c".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }

    /// Merge all parts into `output`
    ///
    /// Returns `Ok(None)` when nothing was recorded. On failure the parts,
    /// the manifest and the in-memory list are left intact for a retry.
    pub async fn finalize(&mut self, output: &Path) -> Result<Option<PathBuf>, CaptureError> {
        if self.segments.is_empty() {
            debug!("No segments to merge");
            return Ok(None);
        }

        let manifest = self.manifest_path();
        if let Err(e) = tokio::fs::write(&manifest, self.manifest_contents()).await {
            let diagnostic = format!("failed to write manifest {:?}: {}", manifest, e);
            error!("Segment merge failed: {}", diagnostic);
            return Err(CaptureError::Concatenation { diagnostic });
        }
        info!(
            "Merging {} segment(s) into {:?}",
            self.segments.len(),
            output
        );

        let mut command = Command::new(&self.encoder);
        command
            .args(self.concat_args(output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let result = match command.output().await {
            Ok(result) => result,
            Err(e) => {
                let diagnostic = format!("failed to run {:?}: {}", self.encoder, e);
                error!("Segment merge failed: {}", diagnostic);
                return Err(CaptureError::Concatenation { diagnostic });
            }
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            let diagnostic = if stderr.is_empty() {
                format!("encoder exited with {}", result.status)
            } else {
                stderr
            };
            error!("Segment merge failed: {}", diagnostic);
            return Err(CaptureError::Concatenation { diagnostic });
        }

        self.cleanup(&manifest).await;
        info!("Recording saved to {:?}", output);
        Ok(Some(output.to_path_buf()))
    }

    async fn cleanup(&mut self, manifest: &Path) {
        if let Err(e) = tokio::fs::remove_file(manifest).await {
            warn!("Failed to remove manifest {:?}: {}", manifest, e);
        }
        for segment in self.segments.drain(..) {
            match tokio::fs::remove_file(&segment).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove segment {:?}: {}", segment, e),
            }
        }
        self.next_index = 0;
    }
}
