//! Manifest loading.
//!
//! A manifest is the persisted form of a [`Queue`]: a JSON document of
//! the shape `{"jobs": [...]}`. Manifests are addressed by reference; a
//! relative reference is resolved against the configured content root,
//! and a reference without an extension also matches `<reference>.json`.

use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::queue::Queue;

/// Extension tried when a manifest reference has none.
const MANIFEST_EXTENSION: &str = "json";

/// Resolves manifest references and loads them into live queues.
#[derive(Debug, Clone, Default)]
pub struct ManifestLoader {
    content_root: Option<PathBuf>,
}

impl ManifestLoader {
    /// Loader that resolves relative references against `content_root`.
    pub fn new(content_root: Option<PathBuf>) -> Self {
        Self { content_root }
    }

    /// Turn a manifest reference into an existing file path.
    pub fn resolve_path(&self, reference: &Path) -> Result<PathBuf, CoreError> {
        let candidate = match &self.content_root {
            Some(root) if reference.is_relative() => root.join(reference),
            _ => reference.to_path_buf(),
        };

        if candidate.is_file() {
            return Ok(candidate);
        }
        if candidate.extension().is_none() {
            let with_ext = candidate.with_extension(MANIFEST_EXTENSION);
            if with_ext.is_file() {
                return Ok(with_ext);
            }
        }
        Err(CoreError::ManifestNotFound { path: candidate })
    }

    /// Load and validate the queue stored at `reference`.
    ///
    /// Shot indices are normalised to their positions. A manifest without
    /// jobs, or with a job that has no shots, is rejected as corrupt.
    pub fn load(&self, reference: &Path) -> Result<Queue, CoreError> {
        let path = self.resolve_path(reference)?;
        tracing::info!(path = %path.display(), "Loading manifest");

        let text = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::ManifestNotFound { path: path.clone() },
            _ => CoreError::ManifestCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            },
        })?;

        let mut queue = parse_manifest(&text).map_err(|reason| CoreError::ManifestCorrupt {
            path: path.clone(),
            reason,
        })?;
        queue.normalize_shot_indices();

        tracing::info!(
            path = %path.display(),
            jobs = queue.jobs.len(),
            shots = queue.total_shots(),
            "Manifest loaded",
        );
        Ok(queue)
    }
}

/// Parse and validate manifest text.
fn parse_manifest(text: &str) -> Result<Queue, String> {
    let queue: Queue = serde_json::from_str(text).map_err(|e| e.to_string())?;

    if queue.jobs.is_empty() {
        return Err("No jobs in queue to process".to_string());
    }
    if let Some((index, job)) = queue
        .jobs
        .iter()
        .enumerate()
        .find(|(_, job)| job.shots.is_empty())
    {
        return Err(format!("Job {index} ({}) has no shots", job.display_name()));
    }
    Ok(queue)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const TWO_JOBS: &str = r#"{
        "jobs": [
            {
                "name": "intro",
                "scene_path": "/Game/Maps/Intro",
                "sequence_path": "/Game/Seq/Intro",
                "shots": [{}, {"enabled": false}, {"name": "sh030"}],
                "configuration": {"output_directory": "/renders/intro", "format": "png"}
            },
            {
                "scene_path": "/Game/Maps/Outro",
                "sequence_path": "/Game/Seq/Outro",
                "shots": [{"index": 9}, {"index": 9}]
            }
        ]
    }"#;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_jobs_and_normalises_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "queue.json", TWO_JOBS);

        let queue = ManifestLoader::default().load(&path).unwrap();
        assert_eq!(queue.jobs.len(), 2);
        assert_eq!(queue.total_shots(), 5);
        assert!(!queue.jobs[0].shots[1].enabled);
        assert_eq!(queue.jobs[0].shots[2].name.as_deref(), Some("sh030"));
        assert_eq!(queue.jobs[1].shots[0].index, 0);
        assert_eq!(queue.jobs[1].shots[1].index, 1);
        assert_eq!(
            queue.jobs[0].configuration.output_directory.as_deref(),
            Some("/renders/intro")
        );
    }

    #[test]
    fn relative_reference_uses_content_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("queues")).unwrap();
        write(&dir.path().join("queues"), "nightly.json", TWO_JOBS);

        let loader = ManifestLoader::new(Some(dir.path().to_path_buf()));
        let queue = loader.load(Path::new("queues/nightly")).unwrap();
        assert_eq!(queue.jobs.len(), 2);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = ManifestLoader::default().load(&dir.path().join("absent.json"));
        assert_matches!(result, Err(CoreError::ManifestNotFound { .. }));
    }

    #[test]
    fn malformed_json_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.json", "{ not json");
        assert_matches!(
            ManifestLoader::default().load(&path),
            Err(CoreError::ManifestCorrupt { .. })
        );
    }

    #[test]
    fn empty_queue_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "empty.json", r#"{"jobs": []}"#);
        match ManifestLoader::default().load(&path) {
            Err(CoreError::ManifestCorrupt { reason, .. }) => {
                assert!(reason.contains("No jobs"), "unexpected reason: {reason}");
            }
            other => panic!("Expected ManifestCorrupt, got {other:?}"),
        }
    }

    #[test]
    fn job_without_shots_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"jobs": [{"scene_path": "a", "sequence_path": "b", "shots": []}]}"#;
        let path = write(dir.path(), "noshots.json", body);
        assert_matches!(
            ManifestLoader::default().load(&path),
            Err(CoreError::ManifestCorrupt { .. })
        );
    }
}
