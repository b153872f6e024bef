/// Position of a job inside its queue.
pub type JobIndex = usize;

/// Flat index addressing any shot across all jobs of a queue.
pub type GlobalShotIndex = usize;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
