//! Render queue domain logic.
//!
//! Pure data model and algorithms shared by the worker: queue/job/shot
//! types, manifest loading, global shot index resolution, solo queue
//! construction and dispatcher timestamp parsing. Nothing here touches
//! the network or spawns processes.

pub mod error;
pub mod manifest;
pub mod queue;
pub mod resolver;
pub mod solo;
pub mod submit_time;
pub mod types;

pub use error::CoreError;
pub use queue::{ConfigOverrides, Configuration, Job, Queue, Resolution, Shot};
pub use resolver::{global_index, resolve, ShotAddress};
pub use solo::build_solo_queue;
