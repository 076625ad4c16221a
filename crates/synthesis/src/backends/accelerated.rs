//! Model-driven on-device backend.
//!
//! The backend owns the image <-> tensor plumbing; executing the model is
//! delegated to a [`ModelRuntime`] obtained from a [`RuntimeFactory`]. The
//! GPU delegate is tried first and the CPU path is used if it fails.
//!
//! Models take a single NHWC float input (the live frame, normalized to
//! `[-1, 1]`) and return an NHWC image in the same range. The reference
//! frame is not fed to single-input models.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use vizcast_common::error::{VizcastError, VizcastResult};
use vizcast_frame::Frame;

use crate::backend::SynthesisBackend;

/// Where a runtime executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delegate {
    Gpu,
    Cpu,
}

/// Shape of an NHWC tensor with batch size 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl TensorShape {
    pub fn len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A loaded model ready to run.
pub trait ModelRuntime: Send + Sync {
    fn input_shape(&self) -> TensorShape;

    fn output_shape(&self) -> TensorShape;

    /// Run one inference on an NHWC buffer of `input_shape().len()` floats.
    fn run(&mut self, input: &[f32]) -> VizcastResult<Vec<f32>>;

    /// Release the interpreter and any delegate handles.
    fn close(&mut self) {}
}

/// Creates runtimes from model bytes.
pub trait RuntimeFactory: Send + Sync {
    fn create(&self, model: &[u8], delegate: Delegate) -> VizcastResult<Box<dyn ModelRuntime>>;
}

/// Runtime shared with the blocking inference task.
///
/// A cancelled `process` future leaves its blocking task running; the
/// runtime stays here so the next call and `close` still find it.
type SharedRuntime = Arc<Mutex<Option<Box<dyn ModelRuntime>>>>;

struct Loaded {
    runtime: SharedRuntime,
    input_shape: TensorShape,
    output_shape: TensorShape,
}

pub struct AcceleratedBackend {
    model_path: PathBuf,
    factory: Option<Arc<dyn RuntimeFactory>>,
    loaded: Option<Loaded>,
    delegate: Option<Delegate>,
}

impl AcceleratedBackend {
    pub fn new(model_path: PathBuf, factory: Option<Arc<dyn RuntimeFactory>>) -> Self {
        Self {
            model_path,
            factory,
            loaded: None,
            delegate: None,
        }
    }

    /// Delegate chosen during `init`, if any.
    pub fn delegate(&self) -> Option<Delegate> {
        self.delegate
    }
}

/// Resize `frame` to the model input and normalize RGB to `[-1, 1]`.
pub fn frame_to_tensor(frame: &Frame, shape: TensorShape) -> VizcastResult<Vec<f32>> {
    if shape.channels != 3 {
        return Err(VizcastError::backend(format!(
            "Model expects {} input channels; only RGB models are supported",
            shape.channels
        )));
    }
    let scaled = frame.resized(shape.width, shape.height)?;
    let tensor = scaled
        .data()
        .chunks_exact(4)
        .flat_map(|px| {
            [
                px[0] as f32 / 127.5 - 1.0,
                px[1] as f32 / 127.5 - 1.0,
                px[2] as f32 / 127.5 - 1.0,
            ]
        })
        .collect();
    Ok(tensor)
}

/// Map an NHWC tensor in `[-1, 1]` back to an opaque RGBA frame.
pub fn tensor_to_frame(tensor: &[f32], shape: TensorShape) -> VizcastResult<Frame> {
    if shape.channels < 3 {
        return Err(VizcastError::backend(format!(
            "Model output has {} channels; need at least 3",
            shape.channels
        )));
    }
    if tensor.len() != shape.len() {
        return Err(VizcastError::backend(format!(
            "Model output has {} values, expected {}",
            tensor.len(),
            shape.len()
        )));
    }

    let to_byte = |v: f32| (((v + 1.0) * 0.5).clamp(0.0, 1.0) * 255.0) as u8;
    let data: Vec<u8> = tensor
        .chunks_exact(shape.channels as usize)
        .flat_map(|c| [to_byte(c[0]), to_byte(c[1]), to_byte(c[2]), 255])
        .collect();
    Frame::from_rgba(shape.width, shape.height, data)
}

#[async_trait::async_trait]
impl SynthesisBackend for AcceleratedBackend {
    fn name(&self) -> &str {
        "accelerated"
    }

    async fn init(&mut self) -> VizcastResult<()> {
        let factory = self.factory.clone().ok_or_else(|| {
            VizcastError::unsupported("No inference runtime available for the accelerated backend")
        })?;

        let model = tokio::fs::read(&self.model_path).await.map_err(|e| {
            VizcastError::backend(format!(
                "Failed to load model {}: {e}",
                self.model_path.display()
            ))
        })?;

        let (runtime, delegate) = match factory.create(&model, Delegate::Gpu) {
            Ok(runtime) => (runtime, Delegate::Gpu),
            Err(e) => {
                tracing::warn!(error = %e, "GPU delegate unavailable, using CPU");
                (factory.create(&model, Delegate::Cpu)?, Delegate::Cpu)
            }
        };

        tracing::info!(
            model = %self.model_path.display(),
            ?delegate,
            input = ?runtime.input_shape(),
            "Model loaded"
        );
        self.loaded = Some(Loaded {
            input_shape: runtime.input_shape(),
            output_shape: runtime.output_shape(),
            runtime: Arc::new(Mutex::new(Some(runtime))),
        });
        self.delegate = Some(delegate);
        Ok(())
    }

    async fn process(&mut self, live: &Frame, _reference: &Frame) -> VizcastResult<Option<Frame>> {
        let Some(loaded) = &self.loaded else {
            return Ok(None);
        };
        let input = frame_to_tensor(live, loaded.input_shape)?;
        let output_shape = loaded.output_shape;
        let runtime = loaded.runtime.clone();

        // Inference is CPU/GPU bound; keep it off the async workers.
        let output = tokio::task::spawn_blocking(move || {
            let mut runtime = runtime.lock().unwrap_or_else(PoisonError::into_inner);
            let output = runtime.as_mut().map(|runtime| runtime.run(&input));
            output.transpose()
        })
        .await
        .map_err(|e| VizcastError::backend(format!("Inference task failed: {e}")))??;

        match output {
            Some(output) => tensor_to_frame(&output, output_shape).map(Some),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.delegate = None;
        let Some(loaded) = self.loaded.take() else {
            return;
        };
        // Waits for an inference still running from a cancelled call.
        let released = tokio::task::spawn_blocking(move || {
            let mut runtime = loaded.runtime.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(mut runtime) = runtime.take() {
                runtime.close();
            }
        })
        .await;
        match released {
            Ok(()) => tracing::debug!("Accelerated runtime released"),
            Err(e) => tracing::warn!(error = %e, "Failed to release accelerated runtime"),
        }
    }
}
