//! Test utilities for integration tests.
//!
//! This module provides instrumented pixel sources, a recording view sink
//! and a harness that wires the view pipeline to a control queue the test
//! drives by hand.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;

use viewcore::{
    ControlQueue, ImageFrame, ImageShape, JobError, JobGuard, JobManager, MemorySource,
    PixelSource, ProjectionCache, SourceError, ViewRequest, ViewService, ViewSink,
};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Image id used by every fixture.
pub const IMAGE_ID: u64 = 7;

// =============================================================================
// Instrumented Source
// =============================================================================

/// A pixel source that counts frame reads and can hold reads at a gate.
///
/// While a gate is installed every `frame()` call first reports on
/// `entered` and then blocks until the test sends on the gate.
pub struct InstrumentedSource {
    inner: MemorySource,
    reads: AtomicUsize,
    delay: Option<Duration>,
    gate: Mutex<Option<Gate>>,
}

struct Gate {
    entered: mpsc::Sender<u64>,
    release: mpsc::Receiver<()>,
}

impl InstrumentedSource {
    /// `frames` planes of `height × width`; pixel value is `t * 1000 + y * width + x`.
    pub fn ramp(height: u32, width: u32, frames: u64) -> Self {
        let inner = MemorySource::new();
        inner.insert_with(
            IMAGE_ID,
            ImageShape::new(height, width),
            frames,
            1,
            move |t, _, y, x| (t * 1000 + u64::from(y * width + x)) as f32,
        );
        Self {
            inner,
            reads: AtomicUsize::new(0),
            delay: None,
            gate: Mutex::new(None),
        }
    }

    /// Sleep this long inside every frame read.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Install a gate. Returns `(entered, release)` for the test side.
    pub fn gate(&self) -> (mpsc::Receiver<u64>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some(Gate {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }

    /// Remove the gate; later reads run straight through.
    pub fn open(&self) {
        *self.gate.lock().unwrap() = None;
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl PixelSource for InstrumentedSource {
    fn shape(&self, image_id: u64) -> Result<ImageShape, SourceError> {
        self.inner.shape(image_id)
    }

    fn frame_count(&self, image_id: u64) -> Result<u64, SourceError> {
        self.inner.frame_count(image_id)
    }

    fn frame(&self, image_id: u64, t: u64, z: u32) -> Result<ImageFrame, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        // The lock is held while waiting so gated reads pass one at a time.
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.entered.send(t).ok();
            gate.release.recv().ok();
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.inner.frame(image_id, t, z)
    }
}

// =============================================================================
// Recording Sink
// =============================================================================

/// Records every repaint and failure notification.
#[derive(Default)]
pub struct RecordingSink {
    pub ready: Mutex<Vec<(ViewRequest, ImageFrame)>>,
    pub failed: Mutex<Vec<(ViewRequest, JobError)>>,
}

impl RecordingSink {
    pub fn ready_count(&self) -> usize {
        self.ready.lock().unwrap().len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.lock().unwrap().len()
    }

    /// Timeline indices of every repainted frame, in delivery order.
    pub fn ready_ts(&self) -> Vec<u64> {
        self.ready.lock().unwrap().iter().map(|(r, _)| r.t).collect()
    }
}

impl ViewSink for RecordingSink {
    fn view_ready(&self, request: &ViewRequest, frame: &ImageFrame) {
        self.ready
            .lock()
            .unwrap()
            .push((request.clone(), frame.clone()));
    }

    fn view_failed(&self, request: &ViewRequest, error: &JobError) {
        self.failed
            .lock()
            .unwrap()
            .push((request.clone(), error.clone()));
    }
}

// =============================================================================
// Harness
// =============================================================================

/// View pipeline wired to a control queue driven by the test thread.
pub struct Harness {
    pub control: ControlQueue,
    pub service: ViewService<InstrumentedSource>,
    pub source: Arc<InstrumentedSource>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    /// Must be called from inside a multi-thread tokio runtime.
    pub fn new(source: InstrumentedSource, workers: usize, cache_bytes: usize) -> Self {
        let control = ControlQueue::new();
        let jobs = JobManager::new(
            Handle::current(),
            workers,
            Arc::new(JobGuard::new()),
            control.poster(),
        );
        let source = Arc::new(source);
        let sink = Arc::new(RecordingSink::default());
        let service = ViewService::new(
            source.clone(),
            Arc::new(ProjectionCache::new(cache_bytes)),
            jobs,
            sink.clone(),
        );
        Self {
            control,
            service,
            source,
            sink,
        }
    }

    /// Run one delivery on the control thread.
    pub async fn run_next(&mut self) {
        let ran = tokio::time::timeout(WAIT, self.control.run_next())
            .await
            .expect("timed out waiting for a control task");
        assert!(ran, "control queue closed");
    }

    /// Run deliveries until no job is in flight.
    pub async fn settle(&mut self) {
        let control = &mut self.control;
        let jobs = self.service.jobs();
        tokio::time::timeout(WAIT, async {
            while jobs.in_flight() > 0 {
                control.run_next().await;
            }
            control.drain();
        })
        .await
        .expect("jobs did not settle");
    }
}
