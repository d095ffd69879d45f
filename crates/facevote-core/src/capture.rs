use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::errors::{AppError, AppResult};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// One encoded image, stamped relative to the start of the capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub captured_at: Duration,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, captured_at: Duration) -> Self {
        Self { bytes, captured_at }
    }

    pub fn still(bytes: Vec<u8>) -> Self {
        Self::new(bytes, Duration::ZERO)
    }
}

pub trait FrameSource: Send {
    fn next_frame(&mut self) -> AppResult<Option<Frame>>;

    /// Live sources are paced by the session and stamped with wall-clock time.
    fn is_live(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordedFrames {
    frames: VecDeque<Frame>,
}

impl RecordedFrames {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl FrameSource for RecordedFrames {
    fn next_frame(&mut self) -> AppResult<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

/// Image files in a directory, replayed in file-name order with a fixed
/// interval between timestamps.
#[derive(Debug, Clone)]
pub struct DirectoryFrames {
    paths: VecDeque<PathBuf>,
    interval: Duration,
    emitted: u32,
}

impl DirectoryFrames {
    pub fn open(dir: &Path, interval: Duration) -> AppResult<Self> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if path.is_file() && is_image {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(Self::from_paths(paths, interval))
    }

    pub fn from_paths(paths: Vec<PathBuf>, interval: Duration) -> Self {
        Self {
            paths: paths.into(),
            interval,
            emitted: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for DirectoryFrames {
    fn next_frame(&mut self) -> AppResult<Option<Frame>> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };
        let bytes = fs::read(&path)?;
        let captured_at = self.interval * self.emitted;
        self.emitted += 1;
        debug!(path = %path.display(), "loaded frame");
        Ok(Some(Frame::new(bytes, captured_at)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Frame(Frame),
    Expired,
    Cancelled,
    Exhausted,
}

/// Bounded-duration capture. Observation ends at the window, on
/// cancellation, or when the source runs dry.
pub struct CaptureSession {
    source: Box<dyn FrameSource>,
    window: Duration,
    frame_interval: Duration,
    started: Instant,
    deadline: Instant,
    cancel: CancelHandle,
    delivered: usize,
}

impl CaptureSession {
    pub fn new(source: Box<dyn FrameSource>, window: Duration, frame_interval: Duration) -> Self {
        let started = Instant::now();
        Self {
            source,
            window,
            frame_interval,
            started,
            deadline: started + window,
            cancel: CancelHandle::default(),
            delivered: 0,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn next_event(&mut self) -> AppResult<SessionEvent> {
        if self.cancel.is_cancelled() {
            return Ok(SessionEvent::Cancelled);
        }

        let live = self.source.is_live();
        if live && self.delivered > 0 && self.frame_interval > Duration::ZERO {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            let sleep_for = self.frame_interval.min(remaining);
            if sleep_for > Duration::ZERO {
                sleep(sleep_for);
            }
            if self.cancel.is_cancelled() {
                return Ok(SessionEvent::Cancelled);
            }
        }

        if live && Instant::now() >= self.deadline {
            return Ok(SessionEvent::Expired);
        }

        let Some(mut frame) = self.source.next_frame()? else {
            return Ok(SessionEvent::Exhausted);
        };
        if live {
            frame.captured_at = self.started.elapsed();
        }
        if frame.captured_at > self.window {
            debug!(
                captured_at_ms = frame.captured_at.as_millis() as u64,
                "capture window elapsed"
            );
            return Ok(SessionEvent::Expired);
        }

        self.delivered += 1;
        Ok(SessionEvent::Frame(frame))
    }

    /// Collects every frame inside the window.
    pub fn drain(&mut self) -> AppResult<Vec<Frame>> {
        let mut frames = Vec::new();
        loop {
            match self.next_event()? {
                SessionEvent::Frame(frame) => frames.push(frame),
                SessionEvent::Cancelled => {
                    return Err(AppError::LivenessFailed {
                        reason: "capture cancelled".into(),
                    })
                }
                SessionEvent::Expired | SessionEvent::Exhausted => return Ok(frames),
            }
        }
    }
}
