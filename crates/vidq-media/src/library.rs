//! Filesystem video library.
//!
//! Layout: one directory per video under the library root, named by the
//! video id, holding the media file, a `metadata.json` sidecar, and any
//! transcript/analysis artifacts produced later.
//!
//! ```text
//! <root>/<video-id>/video.mp4
//! <root>/<video-id>/metadata.json
//! <root>/<video-id>/transcript.txt
//! <root>/<video-id>/subtitles.srt
//! <root>/<video-id>/analysis.json
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vidq_models::{VideoId, VideoInfo};

use crate::error::{MediaError, MediaResult};

const METADATA_FILE: &str = "metadata.json";
const TRANSCRIPT_FILE: &str = "transcript.txt";
const SUBTITLES_FILE: &str = "subtitles.srt";
const ANALYSIS_FILE: &str = "analysis.json";

/// Sidecar metadata stored next to each imported video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub video_id: VideoId,
    /// Media file name within the video directory.
    pub file: String,
    /// Name of the file the video was imported from.
    pub original_name: String,
    pub imported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<VideoInfo>,
}

/// Video library rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
}

impl Library {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn video_dir(&self, id: &VideoId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Import a media file into the library.
    ///
    /// The file is moved (rename, with copy+remove as the cross-device
    /// fallback) into a fresh per-video directory and a metadata sidecar is
    /// written. Returns the new id and the file's library path.
    pub async fn import(
        &self,
        source: impl AsRef<Path>,
        info: Option<&VideoInfo>,
    ) -> MediaResult<(VideoId, PathBuf)> {
        let source = source.as_ref();
        if !source.exists() {
            return Err(MediaError::FileNotFound(source.to_path_buf()));
        }

        let id = VideoId::new();
        let dir = self.video_dir(&id);
        tokio::fs::create_dir_all(&dir).await?;

        let extension = source
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "mp4".to_string());
        let file_name = format!("video.{extension}");
        let dest = dir.join(&file_name);

        move_file(source, &dest).await?;

        let entry = LibraryEntry {
            video_id: id.clone(),
            file: file_name,
            original_name: source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            imported_at: Utc::now(),
            info: info.cloned(),
        };
        let json = serde_json::to_vec_pretty(&entry)?;
        tokio::fs::write(dir.join(METADATA_FILE), json).await?;

        info!(
            video_id = %id,
            path = %dest.display(),
            "Imported video into library"
        );
        Ok((id, dest))
    }

    /// Resolve a video id to its media file path.
    pub async fn resolve(&self, id: &VideoId) -> MediaResult<PathBuf> {
        let entry = self.entry(id).await?;
        let path = self.video_dir(id).join(&entry.file);
        if !path.exists() {
            return Err(MediaError::FileNotFound(path));
        }
        Ok(path)
    }

    /// Read the metadata sidecar for a video.
    pub async fn entry(&self, id: &VideoId) -> MediaResult<LibraryEntry> {
        let path = self.video_dir(id).join(METADATA_FILE);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| MediaError::NotInLibrary(id.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Persist a transcript for a library video. Returns the stored path.
    pub async fn store_transcript(&self, id: &VideoId, text: &str) -> MediaResult<PathBuf> {
        let dir = self.video_dir(id);
        if !dir.exists() {
            return Err(MediaError::NotInLibrary(id.to_string()));
        }
        let path = dir.join(TRANSCRIPT_FILE);
        tokio::fs::write(&path, text).await?;
        debug!(video_id = %id, path = %path.display(), "Stored transcript");
        Ok(path)
    }

    /// Copy a subtitle file into a library video's directory. Returns the
    /// stored path.
    pub async fn store_subtitles(
        &self,
        id: &VideoId,
        source: impl AsRef<Path>,
    ) -> MediaResult<PathBuf> {
        let dir = self.video_dir(id);
        if !dir.exists() {
            return Err(MediaError::NotInLibrary(id.to_string()));
        }
        let path = dir.join(SUBTITLES_FILE);
        tokio::fs::copy(source.as_ref(), &path).await?;
        debug!(video_id = %id, path = %path.display(), "Stored subtitles");
        Ok(path)
    }

    /// Path a transcript would live at, if one has been stored.
    pub fn transcript_path(&self, id: &VideoId) -> PathBuf {
        self.video_dir(id).join(TRANSCRIPT_FILE)
    }

    /// Path a subtitle file would live at, if one has been stored.
    pub fn subtitles_path(&self, id: &VideoId) -> PathBuf {
        self.video_dir(id).join(SUBTITLES_FILE)
    }

    /// Path analysis output lives at for a library video.
    pub fn analysis_path(&self, id: &VideoId) -> PathBuf {
        self.video_dir(id).join(ANALYSIS_FILE)
    }
}

/// Rename, falling back to copy+remove when the source and destination sit
/// on different filesystems.
async fn move_file(source: &Path, dest: &Path) -> MediaResult<()> {
    match tokio::fs::rename(source, dest).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(source, dest).await?;
            tokio::fs::remove_file(source).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn library() -> (TempDir, Library) {
        let dir = TempDir::new().unwrap();
        let library = Library::new(dir.path().join("library"));
        (dir, library)
    }

    #[tokio::test]
    async fn test_import_and_resolve() {
        let (work, library) = library().await;
        let source = work.path().join("clip.mp4");
        tokio::fs::write(&source, b"fake video").await.unwrap();

        let info = VideoInfo::new("a talk");
        let (id, path) = library.import(&source, Some(&info)).await.unwrap();

        assert!(!source.exists(), "source should be moved");
        assert!(path.exists());
        assert_eq!(library.resolve(&id).await.unwrap(), path);

        let entry = library.entry(&id).await.unwrap();
        assert_eq!(entry.original_name, "clip.mp4");
        assert_eq!(entry.info.unwrap().title, "a talk");
    }

    #[tokio::test]
    async fn test_import_missing_source() {
        let (_work, library) = library().await;
        let err = library
            .import(Path::new("/nonexistent/clip.mp4"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_unknown_id() {
        let (_work, library) = library().await;
        let err = library.resolve(&VideoId::new()).await.unwrap_err();
        assert!(matches!(err, MediaError::NotInLibrary(_)));
    }

    #[tokio::test]
    async fn test_store_transcript() {
        let (work, library) = library().await;
        let source = work.path().join("clip.mp4");
        tokio::fs::write(&source, b"fake video").await.unwrap();
        let (id, _) = library.import(&source, None).await.unwrap();

        let path = library.store_transcript(&id, "hello world").await.unwrap();
        assert_eq!(path, library.transcript_path(&id));
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "hello world");

        // Unknown video is rejected.
        assert!(library
            .store_transcript(&VideoId::new(), "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_store_subtitles() {
        let (work, library) = library().await;
        let source = work.path().join("clip.mp4");
        tokio::fs::write(&source, b"fake video").await.unwrap();
        let (id, _) = library.import(&source, None).await.unwrap();

        let srt = work.path().join("clip.srt");
        tokio::fs::write(&srt, "1\n00:00:00,000 --> 00:00:01,000\nhi\n")
            .await
            .unwrap();

        let path = library.store_subtitles(&id, &srt).await.unwrap();
        assert_eq!(path, library.subtitles_path(&id));
        assert!(tokio::fs::read_to_string(&path)
            .await
            .unwrap()
            .contains("00:00:01,000"));

        assert!(library
            .store_subtitles(&VideoId::new(), &srt)
            .await
            .is_err());
    }
}
