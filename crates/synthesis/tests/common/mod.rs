//! Scripted backends shared by the router and dispatcher tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vizcast_common::config::BackendSettings;
use vizcast_common::error::{VizcastError, VizcastResult};
use vizcast_frame::Frame;
use vizcast_synthesis::backend::{BackendFactory, BackendKind, SynthesisBackend};

pub const LIGHT: [u8; 4] = [10, 10, 10, 255];
pub const ACCELERATED: [u8; 4] = [20, 20, 20, 255];
pub const REMOTE: [u8; 4] = [30, 30, 30, 255];

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Output([u8; 4]),
    Empty,
    Fail,
}

#[derive(Debug, Clone, Copy)]
pub struct Script {
    pub init_ok: bool,
    pub behavior: Behavior,
    pub delay: Duration,
}

impl Script {
    pub fn output(color: [u8; 4]) -> Self {
        Self {
            init_ok: true,
            behavior: Behavior::Output(color),
            delay: Duration::ZERO,
        }
    }

    pub fn broken() -> Self {
        Self {
            init_ok: false,
            behavior: Behavior::Empty,
            delay: Duration::ZERO,
        }
    }

    pub fn behaving(behavior: Behavior) -> Self {
        Self {
            init_ok: true,
            behavior,
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
pub struct Counters {
    pub builds: AtomicUsize,
    pub inits: AtomicUsize,
    pub processes: AtomicUsize,
    pub closes: AtomicUsize,
}

impl Counters {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }
    pub fn processes(&self) -> usize {
        self.processes.load(Ordering::SeqCst)
    }
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Tracks how many `process` calls overlap.
#[derive(Debug, Default)]
pub struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct FakeFactory {
    scripts: Mutex<HashMap<BackendKind, Script>>,
    counters: HashMap<BackendKind, Arc<Counters>>,
    concurrency: Arc<Concurrency>,
}

impl FakeFactory {
    pub fn new() -> Self {
        let mut scripts = HashMap::new();
        scripts.insert(BackendKind::OnDeviceLight, Script::output(LIGHT));
        scripts.insert(BackendKind::OnDeviceAccelerated, Script::output(ACCELERATED));
        scripts.insert(BackendKind::Remote, Script::output(REMOTE));

        let counters = [
            BackendKind::OnDeviceLight,
            BackendKind::OnDeviceAccelerated,
            BackendKind::Remote,
        ]
        .into_iter()
        .map(|kind| (kind, Arc::new(Counters::default())))
        .collect();

        Self {
            scripts: Mutex::new(scripts),
            counters,
            concurrency: Arc::new(Concurrency::default()),
        }
    }

    pub fn with(self, kind: BackendKind, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(kind, script);
        self
    }

    pub fn counters(&self, kind: BackendKind) -> Arc<Counters> {
        self.counters[&kind].clone()
    }

    pub fn concurrency(&self) -> Arc<Concurrency> {
        self.concurrency.clone()
    }
}

impl BackendFactory for FakeFactory {
    fn build(&self, kind: BackendKind, _settings: &BackendSettings) -> Box<dyn SynthesisBackend> {
        let counters = self.counters(kind);
        counters.builds.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeBackend {
            script: self.scripts.lock().unwrap()[&kind],
            counters,
            concurrency: self.concurrency.clone(),
        })
    }
}

struct FakeBackend {
    script: Script,
    counters: Arc<Counters>,
    concurrency: Arc<Concurrency>,
}

#[async_trait]
impl SynthesisBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn init(&mut self) -> VizcastResult<()> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        if self.script.init_ok {
            Ok(())
        } else {
            Err(VizcastError::backend("scripted init failure"))
        }
    }

    async fn process(&mut self, live: &Frame, _reference: &Frame) -> VizcastResult<Option<Frame>> {
        self.counters.processes.fetch_add(1, Ordering::SeqCst);
        let now = self.concurrency.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.concurrency.peak.fetch_max(now, Ordering::SeqCst);

        if !self.script.delay.is_zero() {
            tokio::time::sleep(self.script.delay).await;
        }
        self.concurrency.current.fetch_sub(1, Ordering::SeqCst);

        match self.script.behavior {
            Behavior::Output(color) => Ok(Some(Frame::solid(live.width(), live.height(), color)?)),
            Behavior::Empty => Ok(None),
            Behavior::Fail => Err(VizcastError::backend("scripted process failure")),
        }
    }

    async fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn settings(selection: &str) -> BackendSettings {
    BackendSettings {
        selection: selection.to_string(),
        ..BackendSettings::default()
    }
}

pub fn frames() -> (Frame, Frame) {
    (
        Frame::solid(8, 8, [200, 0, 0, 255]).unwrap(),
        Frame::solid(8, 8, [0, 0, 200, 255]).unwrap(),
    )
}

pub fn color_of(frame: &Frame) -> [u8; 4] {
    frame.pixel(0, 0).unwrap()
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
