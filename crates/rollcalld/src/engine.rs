use std::path::PathBuf;

use rollcall_hw::frame::FrameError;
use rollcall_hw::{CameraError, Detection, EmbeddingProvider, Frame, FrameSource, ProviderError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("embedding provider did not report loaded after init")]
    ProviderNotLoaded,
    #[error("camera not acquired")]
    CameraNotAcquired,
    #[error("frame {0} too dark to analyse")]
    DarkFrame(u32),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Opens the camera on demand. Called on the engine thread.
pub type OpenCamera = Box<dyn FnMut() -> Result<Box<dyn FrameSource>, CameraError> + Send>;

/// Descriptors extracted from a batch of enrollment images.
#[derive(Debug, Default)]
pub struct ImageExtraction {
    pub descriptors: Vec<Vec<f32>>,
    /// `(path, reason)` for every image that did not yield exactly one face.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Snapshot of engine resources.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub camera: Option<String>,
    pub provider_loaded: bool,
}

/// Messages sent from the daemon to the engine thread.
enum EngineRequest {
    Acquire {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Release {
        reply: oneshot::Sender<()>,
    },
    Sample {
        reply: oneshot::Sender<Result<Vec<Detection>, EngineError>>,
    },
    Extract {
        paths: Vec<PathBuf>,
        reply: oneshot::Sender<Result<ImageExtraction, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Make sure the provider is loaded and the camera is open.
    pub async fn acquire(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Acquire { reply }).await?
    }

    /// Close the camera. Idempotent.
    pub async fn release(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::Release { reply }).await
    }

    /// Capture one frame and extract every face descriptor in it.
    pub async fn sample(&self) -> Result<Vec<Detection>, EngineError> {
        self.request(|reply| EngineRequest::Sample { reply }).await?
    }

    /// Extract one descriptor per enrollment image.
    pub async fn extract(&self, paths: Vec<PathBuf>) -> Result<ImageExtraction, EngineError> {
        self.request(|reply| EngineRequest::Extract { paths, reply }).await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// Engine-thread state. Owns the camera while a session holds it.
struct Engine {
    open_camera: OpenCamera,
    camera: Option<Box<dyn FrameSource>>,
    provider: Box<dyn EmbeddingProvider>,
}

impl Engine {
    fn ensure_provider(&mut self) -> Result<(), EngineError> {
        self.provider.init()?;
        if !self.provider.is_loaded() {
            return Err(EngineError::ProviderNotLoaded);
        }
        Ok(())
    }

    fn acquire(&mut self) -> Result<(), EngineError> {
        self.ensure_provider()?;
        if self.camera.is_none() {
            let camera = (self.open_camera)()?;
            tracing::info!(camera = %camera.describe(), "camera acquired");
            self.camera = Some(camera);
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Some(camera) = self.camera.take() {
            tracing::info!(camera = %camera.describe(), "camera released");
        }
    }

    fn sample(&mut self) -> Result<Vec<Detection>, EngineError> {
        let camera = self.camera.as_mut().ok_or(EngineError::CameraNotAcquired)?;
        let frame = camera.capture_frame()?;
        if frame.is_dark {
            return Err(EngineError::DarkFrame(frame.sequence));
        }
        let detections = self.provider.detect(&frame)?;
        tracing::debug!(seq = frame.sequence, faces = detections.len(), "sample analysed");
        Ok(detections)
    }

    /// Images with zero or several faces are skipped, as are images that fail
    /// to decode.
    fn extract(&mut self, paths: Vec<PathBuf>) -> Result<ImageExtraction, EngineError> {
        self.ensure_provider()?;

        let mut out = ImageExtraction::default();
        for (i, path) in paths.into_iter().enumerate() {
            let detections = Frame::load(&path, i as u32)
                .map_err(EngineError::from)
                .and_then(|frame| self.provider.detect(&frame).map_err(EngineError::from));

            match detections {
                Ok(mut faces) if faces.len() == 1 => {
                    out.descriptors.push(faces.remove(0).descriptor);
                }
                Ok(faces) => {
                    tracing::debug!(path = %path.display(), faces = faces.len(), "enrollment image skipped");
                    out.skipped.push((path, format!("expected one face, found {}", faces.len())));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "enrollment image unreadable");
                    out.skipped.push((path, e.to_string()));
                }
            }
        }
        Ok(out)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The provider is initialised eagerly when possible; an extractor that is
/// not ready yet is retried on the next acquire. The camera is only opened
/// on [`EngineHandle::acquire`] and closed on release or when every handle is
/// dropped.
pub fn spawn_engine(
    open_camera: OpenCamera,
    mut provider: Box<dyn EmbeddingProvider>,
) -> Result<EngineHandle, EngineError> {
    if let Err(e) = provider.init() {
        tracing::warn!(error = %e, "embedding provider not ready yet; will retry on session start");
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let mut engine = Engine {
        open_camera,
        camera: None,
        provider,
    };

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Acquire { reply } => {
                        let _ = reply.send(engine.acquire());
                    }
                    EngineRequest::Release { reply } => {
                        engine.release();
                        let _ = reply.send(());
                    }
                    EngineRequest::Sample { reply } => {
                        let result = engine.sample();
                        // A closed reply channel means the session stopped mid-sample;
                        // the result is dropped here.
                        let _ = reply.send(result);
                    }
                    EngineRequest::Extract { paths, reply } => {
                        let _ = reply.send(engine.extract(paths));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(EngineStatus {
                            camera: engine.camera.as_ref().map(|c| c.describe()),
                            provider_loaded: engine.provider.is_loaded(),
                        });
                    }
                }
            }
            engine.release();
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
