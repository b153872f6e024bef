#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use shotfarm_remote::{ChannelError, DispatcherLink, RemoteCommand};
use shotfarm_worker::delegate::{
    render_channel, DelegateError, RenderDelegate, RenderHandle, RenderOutcome, RenderReporter,
    RenderRequest,
};
use shotfarm_worker::executor::{ExecutorSettings, QueueExecutor};
use shotfarm_worker::scene::{SceneHost, SceneLoadError, SceneLoader, ScenePolicy};

/// Two jobs: three shots on Scene_0, two shots on Scene_1.
pub const TWO_JOB_MANIFEST: &str = r#"{
    "jobs": [
        {
            "name": "intro",
            "scene_path": "/Game/Maps/Scene_0",
            "sequence_path": "/Game/Seq/Intro",
            "shots": [{}, {}, {}],
            "configuration": {"output_directory": "/renders/intro", "anti_aliasing": 8}
        },
        {
            "name": "finale",
            "scene_path": "/Game/Maps/Scene_1",
            "sequence_path": "/Game/Seq/Finale",
            "shots": [{"name": "wide"}, {"name": "close"}]
        }
    ]
}"#;

pub fn write_manifest(dir: &Path) -> PathBuf {
    let path = dir.join("queue.json");
    std::fs::write(&path, TWO_JOB_MANIFEST).unwrap();
    path
}

// ---------------------------------------------------------------------------
// Dispatcher link
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct LinkObserver {
    pub inbound: Arc<Mutex<VecDeque<RemoteCommand>>>,
    pub sent: Arc<Mutex<Vec<RemoteCommand>>>,
    /// While set, sends fail as if the outbound buffer were full.
    pub refuse_sends: Arc<Mutex<bool>>,
}

impl LinkObserver {
    pub fn refuse_sends(&self, refuse: bool) {
        *self.refuse_sends.lock().unwrap() = refuse;
    }

    pub fn push(&self, command: RemoteCommand) {
        self.inbound.lock().unwrap().push_back(command);
    }

    pub fn sent(&self) -> Vec<RemoteCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn end_tasks(&self) -> Vec<(usize, bool)> {
        self.sent()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCommand::EndTask(data) => Some((data.shot_index, data.success)),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCommand::SetStatus(data) => Some(data.status),
                _ => None,
            })
            .collect()
    }

    pub fn progress_values(&self) -> Vec<f64> {
        self.sent()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCommand::SetProgress(data) => Some(data.progress),
                _ => None,
            })
            .collect()
    }

    pub fn logs_containing(&self, needle: &str) -> usize {
        self.sent()
            .into_iter()
            .filter(|c| {
                matches!(c, RemoteCommand::LogMessage(data) if data.message.contains(needle))
            })
            .count()
    }
}

/// In-memory [`DispatcherLink`] driven through a [`LinkObserver`].
pub struct FakeLink {
    observer: LinkObserver,
}

impl FakeLink {
    pub fn new() -> (Self, LinkObserver) {
        let observer = LinkObserver::default();
        (Self { observer: observer.clone() }, observer)
    }
}

impl DispatcherLink for FakeLink {
    fn send(&mut self, command: RemoteCommand) -> Result<(), ChannelError> {
        if *self.observer.refuse_sends.lock().unwrap() {
            return Err(ChannelError::Full);
        }
        self.observer.sent.lock().unwrap().push(command);
        Ok(())
    }

    fn drain(&mut self) -> Vec<RemoteCommand> {
        self.observer.inbound.lock().unwrap().drain(..).collect()
    }

    fn is_connected(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Delegate
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct DelegateObserver {
    pub requests: Arc<Mutex<Vec<RenderRequest>>>,
    pub reporters: Arc<Mutex<Vec<RenderReporter>>>,
    pub refuse: Arc<Mutex<bool>>,
}

impl DelegateObserver {
    pub fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Complete the most recent render.
    pub fn finish(&self, outcome: RenderOutcome) {
        let reporter = self.reporters.lock().unwrap().pop().expect("no render in flight");
        reporter.finish(outcome);
    }

    pub fn set_progress(&self, fraction: f32) {
        self.reporters
            .lock()
            .unwrap()
            .last()
            .expect("no render in flight")
            .set_progress(fraction);
    }

    pub fn last_aborted(&self) -> bool {
        self.reporters
            .lock()
            .unwrap()
            .last()
            .map(|r| r.is_aborted())
            .unwrap_or(false)
    }
}

/// Delegate whose renders stay in flight until the test finishes them.
pub struct ManualDelegate {
    observer: DelegateObserver,
}

impl ManualDelegate {
    pub fn new() -> (Self, DelegateObserver) {
        let observer = DelegateObserver::default();
        (Self { observer: observer.clone() }, observer)
    }
}

impl RenderDelegate for ManualDelegate {
    fn execute(&mut self, request: RenderRequest) -> Result<RenderHandle, DelegateError> {
        if *self.observer.refuse.lock().unwrap() {
            return Err(DelegateError::Spawn("render farm binary missing".into()));
        }
        self.observer.requests.lock().unwrap().push(request);
        let (handle, reporter) = render_channel();
        self.observer.reporters.lock().unwrap().push(reporter);
        Ok(handle)
    }
}

/// Delegate that succeeds immediately.
pub struct InstantDelegate {
    pub requests: Arc<Mutex<Vec<RenderRequest>>>,
}

impl RenderDelegate for InstantDelegate {
    fn execute(&mut self, request: RenderRequest) -> Result<RenderHandle, DelegateError> {
        self.requests.lock().unwrap().push(request);
        let (handle, reporter) = render_channel();
        reporter.set_progress(1.0);
        reporter.finish(RenderOutcome::success());
        Ok(handle)
    }
}

// ---------------------------------------------------------------------------
// Scene host
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct SceneObserver {
    pub loads: Arc<Mutex<Vec<String>>>,
    pub broken: Arc<Mutex<Vec<String>>>,
}

impl SceneObserver {
    pub fn loads(&self) -> Vec<String> {
        self.loads.lock().unwrap().clone()
    }
}

pub struct RecordingSceneHost {
    observer: SceneObserver,
}

impl SceneHost for RecordingSceneHost {
    fn load_scene(&mut self, scene_path: &str) -> Result<(), SceneLoadError> {
        self.observer.loads.lock().unwrap().push(scene_path.to_string());
        if self.observer.broken.lock().unwrap().iter().any(|s| s == scene_path) {
            return Err(SceneLoadError::Failed {
                scene: scene_path.to_string(),
                reason: "package not found".into(),
            });
        }
        Ok(())
    }
}

pub fn scene_loader(policy: ScenePolicy) -> (SceneLoader, SceneObserver) {
    let observer = SceneObserver::default();
    let host = RecordingSceneHost {
        observer: observer.clone(),
    };
    (SceneLoader::new(Box::new(host), policy), observer)
}

// ---------------------------------------------------------------------------
// Assembled executor
// ---------------------------------------------------------------------------

pub struct Harness {
    pub executor: QueueExecutor,
    pub link: LinkObserver,
    pub delegate: DelegateObserver,
    pub scenes: SceneObserver,
    pub _dir: tempfile::TempDir,
}

/// Executor with the two-job manifest loaded and a fake link attached.
pub fn harness(policy: ScenePolicy, settings: ExecutorSettings) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());

    let (scenes, scene_observer) = scene_loader(policy);
    let (delegate, delegate_observer) = ManualDelegate::new();
    let mut executor = QueueExecutor::new(scenes, Box::new(delegate), settings);
    executor
        .initialize(Some(manifest.as_path()), &Default::default())
        .unwrap();

    let (link, link_observer) = FakeLink::new();
    executor.attach_link(Box::new(link));

    Harness {
        executor,
        link: link_observer,
        delegate: delegate_observer,
        scenes: scene_observer,
        _dir: dir,
    }
}
