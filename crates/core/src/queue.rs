//! Render queue data model.
//!
//! A [`Queue`] is an ordered list of [`Job`]s; each job references one
//! scene/sequence pair, owns an ordered list of [`Shot`]s and carries an
//! opaque render [`Configuration`]. The persisted form of a queue is the
//! manifest (see [`crate::manifest`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::JobIndex;

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Ordered collection of render jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl Queue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of shots across every job, in queue order.
    pub fn total_shots(&self) -> usize {
        self.jobs.iter().map(|job| job.shots.len()).sum()
    }

    /// Look up a job by position.
    pub fn job(&self, index: JobIndex) -> Result<&Job, CoreError> {
        self.jobs.get(index).ok_or(CoreError::JobOutOfRange {
            index,
            total: self.jobs.len(),
        })
    }

    /// Append a deep copy of `job` and return a mutable reference to the copy.
    pub fn duplicate_job(&mut self, job: &Job) -> &mut Job {
        self.jobs.push(job.clone());
        let last = self.jobs.len() - 1;
        &mut self.jobs[last]
    }

    /// Rewrite every shot's `index` so that it equals its position in the job.
    pub fn normalize_shot_indices(&mut self) {
        for job in &mut self.jobs {
            for (position, shot) in job.shots.iter_mut().enumerate() {
                shot.index = position;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Job / Shot
// ---------------------------------------------------------------------------

/// A unit of work: one scene/sequence pair plus its shots and settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Display name used in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Scene (map) reference that must be loaded before rendering.
    pub scene_path: String,
    /// Sequence / animation reference rendered by the delegate.
    pub sequence_path: String,
    pub shots: Vec<Shot>,
    #[serde(default)]
    pub configuration: Configuration,
}

impl Job {
    /// Name for log output, falling back to the sequence reference.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.sequence_path)
    }

    /// Number of shots enabled for rendering.
    pub fn enabled_shot_count(&self) -> usize {
        self.shots.iter().filter(|shot| shot.enabled).count()
    }
}

/// An enableable segment of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shot {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Position within the owning job.
    #[serde(default)]
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Shot {
    /// An enabled, unnamed shot at `index`.
    pub fn new(index: usize) -> Self {
        Self {
            enabled: true,
            index,
            name: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Render settings attached to a job.
///
/// Only the output directory and resolution are understood here; every
/// other key is kept verbatim in `settings` and handed to the delegate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl Configuration {
    /// Apply operator overrides on top of the manifest values.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(dir) = &overrides.output_directory {
            tracing::debug!(
                previous = ?self.output_directory,
                output_directory = %dir,
                "Overriding output directory",
            );
            self.output_directory = Some(dir.clone());
        }
        if let Some(resolution) = overrides.resolution {
            tracing::debug!(
                previous = ?self.resolution,
                %resolution,
                "Overriding output resolution",
            );
            self.resolution = Some(resolution);
        }
    }
}

/// Operator-supplied settings that replace manifest values for every job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub output_directory: Option<String>,
    pub resolution: Option<Resolution>,
}

impl ConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.output_directory.is_none() && self.resolution.is_none()
    }
}

/// Output resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = CoreError;

    /// Parse `WIDTHxHEIGHT`, e.g. `1920x1080`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::Validation(format!("invalid resolution '{s}'"));
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Queue with one job per entry in `shot_counts`.
    pub fn queue_with_shots(shot_counts: &[usize]) -> Queue {
        Queue {
            jobs: shot_counts
                .iter()
                .enumerate()
                .map(|(i, &count)| Job {
                    name: Some(format!("job_{i}")),
                    scene_path: format!("/Game/Maps/Scene_{i}"),
                    sequence_path: format!("/Game/Sequences/Seq_{i}"),
                    shots: (0..count).map(Shot::new).collect(),
                    configuration: Configuration::default(),
                })
                .collect(),
        }
    }

    #[test]
    fn total_shots_sums_all_jobs() {
        assert_eq!(queue_with_shots(&[3, 2]).total_shots(), 5);
        assert_eq!(queue_with_shots(&[]).total_shots(), 0);
        assert_eq!(queue_with_shots(&[0, 4, 0]).total_shots(), 4);
    }

    #[test]
    fn job_lookup_out_of_range() {
        let queue = queue_with_shots(&[1]);
        assert!(queue.job(0).is_ok());
        assert!(matches!(
            queue.job(1),
            Err(CoreError::JobOutOfRange { index: 1, total: 1 })
        ));
    }

    #[test]
    fn normalize_rewrites_indices_to_positions() {
        let mut queue = queue_with_shots(&[3]);
        queue.jobs[0].shots[0].index = 7;
        queue.jobs[0].shots[2].index = 0;
        queue.normalize_shot_indices();
        let indices: Vec<usize> = queue.jobs[0].shots.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn configuration_keeps_unknown_settings() {
        let json = r#"{"output_directory":"/out","spatial_samples":8,"format":"exr"}"#;
        let config: Configuration = serde_json::from_str(json).unwrap();
        assert_eq!(config.output_directory.as_deref(), Some("/out"));
        assert_eq!(config.settings["spatial_samples"], 8);
        assert_eq!(config.settings["format"], "exr");

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["spatial_samples"], 8);
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let mut config = Configuration {
            output_directory: Some("/manifest/out".into()),
            resolution: None,
            settings: Default::default(),
        };
        config.apply_overrides(&ConfigOverrides {
            output_directory: None,
            resolution: Some(Resolution {
                width: 1920,
                height: 1080,
            }),
        });
        assert_eq!(config.output_directory.as_deref(), Some("/manifest/out"));
        assert_eq!(config.resolution.map(|r| r.to_string()).as_deref(), Some("1920x1080"));
    }

    #[test]
    fn parse_resolution() {
        let r: Resolution = "3840x2160".parse().unwrap();
        assert_eq!((r.width, r.height), (3840, 2160));
        assert!("1920".parse::<Resolution>().is_err());
        assert!("0x1080".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn shot_enabled_defaults_to_true() {
        let shot: Shot = serde_json::from_str("{}").unwrap();
        assert!(shot.enabled);
        assert_eq!(shot.index, 0);
    }
}
