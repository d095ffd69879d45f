use std::time::Duration;

use facevote_config::{LivenessModeSetting, ResolvedLiveness};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::{CaptureSession, Frame, SessionEvent};
use crate::errors::{AppError, AppResult};
use crate::faces::extractor::{EmbeddingExtractor, FaceLandmarks, LandmarkPoint, LocatedFace};

pub const DEFAULT_EAR_THRESHOLD: f64 = 0.2;
pub const DEFAULT_MIN_INTER_EYE_RATIO: f64 = 0.03;
pub const DEFAULT_HEAD_MOVEMENT_PX: f64 = 10.0;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessMode {
    /// Requires an open-then-closed eye sequence across frames.
    #[default]
    Blink,
    /// Single-image check: a face that clears the flat-photo heuristic.
    Geometry,
    /// Requires the nose tip to shift sideways between two face frames.
    HeadMovement,
}

impl From<LivenessModeSetting> for LivenessMode {
    fn from(setting: LivenessModeSetting) -> Self {
        match setting {
            LivenessModeSetting::Blink => LivenessMode::Blink,
            LivenessModeSetting::Geometry => LivenessMode::Geometry,
            LivenessModeSetting::HeadMovement => LivenessMode::HeadMovement,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LivenessSettings {
    pub mode: LivenessMode,
    pub ear_threshold: f64,
    pub min_inter_eye_ratio: f64,
    /// Horizontal nose-tip shift, in pixels, that counts as head movement.
    pub head_movement_threshold: f64,
    pub window: Duration,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            mode: LivenessMode::Blink,
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            min_inter_eye_ratio: DEFAULT_MIN_INTER_EYE_RATIO,
            head_movement_threshold: DEFAULT_HEAD_MOVEMENT_PX,
            window: DEFAULT_WINDOW,
        }
    }
}

impl From<&ResolvedLiveness> for LivenessSettings {
    fn from(resolved: &ResolvedLiveness) -> Self {
        Self {
            mode: resolved.mode.into(),
            ear_threshold: resolved.ear_threshold,
            min_inter_eye_ratio: resolved.min_inter_eye_ratio,
            head_movement_threshold: resolved.head_movement_threshold,
            window: resolved.window,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivenessReport {
    pub mode: LivenessMode,
    pub frames_observed: usize,
    pub faces_observed: usize,
    pub blink_observed: bool,
    pub movement_observed: bool,
}

/// `(|p2-p6| + |p3-p5|) / (2 |p1-p4|)` over six eye landmarks.
pub fn eye_aspect_ratio(eye: &[LandmarkPoint]) -> Option<f64> {
    if eye.len() != 6 {
        return None;
    }
    let horizontal = eye[0].distance(&eye[3]);
    if horizontal <= f64::EPSILON {
        return None;
    }
    let vertical = eye[1].distance(&eye[5]) + eye[2].distance(&eye[4]);
    Some(vertical / (2.0 * horizontal))
}

/// Mean EAR of both eyes.
pub fn frame_eye_aspect_ratio(landmarks: &FaceLandmarks) -> Option<f64> {
    let left = eye_aspect_ratio(landmarks.left_eye()?)?;
    let right = eye_aspect_ratio(landmarks.right_eye()?)?;
    Some((left + right) / 2.0)
}

#[derive(Default)]
struct LivenessTracker {
    frames: usize,
    faces: usize,
    seen_open: bool,
    blinked: bool,
    last_nose_x: Option<f64>,
    moved: bool,
}

#[derive(Clone)]
pub struct LivenessChecker {
    extractor: EmbeddingExtractor,
    settings: LivenessSettings,
}

impl LivenessChecker {
    pub fn new(extractor: EmbeddingExtractor, settings: LivenessSettings) -> Self {
        Self {
            extractor,
            settings,
        }
    }

    pub fn settings(&self) -> &LivenessSettings {
        &self.settings
    }

    /// True when a frame stamped at `captured_at` falls inside the window.
    pub fn in_window(&self, frame: &Frame) -> bool {
        frame.captured_at <= self.settings.window
    }

    /// Checks an already captured frame sequence. Frames stamped after the
    /// observation window are ignored.
    pub fn check_frames(&self, frames: &[Frame]) -> AppResult<LivenessReport> {
        let mut tracker = LivenessTracker::default();
        for frame in frames {
            if !self.in_window(frame) {
                debug!(
                    captured_at_ms = frame.captured_at.as_millis() as u64,
                    "frame outside liveness window ignored"
                );
                continue;
            }
            if self.observe(frame, &mut tracker)? {
                return Ok(self.report(&tracker));
            }
        }
        self.conclude(tracker)
    }

    /// Drives a capture session until the evidence is sufficient or the
    /// session ends.
    pub fn check_session(&self, session: &mut CaptureSession) -> AppResult<LivenessReport> {
        let mut tracker = LivenessTracker::default();
        loop {
            match session.next_event()? {
                SessionEvent::Frame(frame) => {
                    if self.observe(&frame, &mut tracker)? {
                        return Ok(self.report(&tracker));
                    }
                }
                SessionEvent::Cancelled => {
                    return Err(AppError::LivenessFailed {
                        reason: "capture cancelled".into(),
                    });
                }
                SessionEvent::Expired | SessionEvent::Exhausted => break,
            }
        }
        self.conclude(tracker)
    }

    /// Rejects a single image whose face fails the flat-photo heuristic.
    pub fn check_still(&self, bytes: &[u8]) -> AppResult<()> {
        let image = EmbeddingExtractor::decode(bytes)?;
        let located = self.extractor.locate(&image)?;
        self.ensure_not_flat(&located, image.width())
    }

    /// Returns true once the evidence is sufficient.
    fn observe(&self, frame: &Frame, tracker: &mut LivenessTracker) -> AppResult<bool> {
        tracker.frames += 1;
        let image = EmbeddingExtractor::decode(&frame.bytes)?;
        let located = match self.extractor.locate(&image) {
            Ok(located) => located,
            Err(AppError::NoFaceDetected) => return Ok(false),
            Err(err) => return Err(err),
        };
        tracker.faces += 1;
        self.ensure_not_flat(&located, image.width())?;

        match self.settings.mode {
            LivenessMode::Geometry => {
                tracker.seen_open = true;
                Ok(true)
            }
            LivenessMode::Blink => {
                let Some(ear) = frame_eye_aspect_ratio(&located.landmarks) else {
                    return Ok(false);
                };
                debug!(ear, threshold = self.settings.ear_threshold, "eye aspect ratio");
                if ear >= self.settings.ear_threshold {
                    tracker.seen_open = true;
                } else if tracker.seen_open {
                    tracker.blinked = true;
                    return Ok(true);
                }
                Ok(false)
            }
            LivenessMode::HeadMovement => {
                let Some(nose) = located.landmarks.nose_tip() else {
                    return Ok(false);
                };
                let shift = tracker.last_nose_x.map(|last| (nose.x - last).abs());
                tracker.last_nose_x = Some(nose.x);
                debug!(
                    nose_x = nose.x,
                    shift = shift.unwrap_or(0.0),
                    threshold = self.settings.head_movement_threshold,
                    "nose position"
                );
                if shift.is_some_and(|px| px > self.settings.head_movement_threshold) {
                    tracker.moved = true;
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }

    fn ensure_not_flat(&self, located: &LocatedFace, image_width: u32) -> AppResult<()> {
        let points = &located.landmarks.points;
        let (Some(outer_left), Some(outer_right)) = (points.get(36), points.get(45)) else {
            return Ok(());
        };
        let inter_eye = outer_left.distance(outer_right);
        let minimum = self.settings.min_inter_eye_ratio * f64::from(image_width);
        if inter_eye < minimum {
            return Err(AppError::SpoofSuspected {
                reason: format!(
                    "inter-eye distance {inter_eye:.1}px below {minimum:.1}px for image width {image_width}"
                ),
            });
        }
        Ok(())
    }

    fn report(&self, tracker: &LivenessTracker) -> LivenessReport {
        LivenessReport {
            mode: self.settings.mode,
            frames_observed: tracker.frames,
            faces_observed: tracker.faces,
            blink_observed: tracker.blinked,
            movement_observed: tracker.moved,
        }
    }

    fn conclude(&self, tracker: LivenessTracker) -> AppResult<LivenessReport> {
        if tracker.faces == 0 {
            return Err(AppError::NoFaceDetected);
        }
        let missing = match self.settings.mode {
            LivenessMode::HeadMovement => "no head movement",
            LivenessMode::Blink | LivenessMode::Geometry => "no blink",
        };
        Err(AppError::LivenessFailed {
            reason: format!(
                "{missing} observed in {} frame(s) within {}s",
                tracker.frames,
                self.settings.window.as_secs()
            ),
        })
    }
}
