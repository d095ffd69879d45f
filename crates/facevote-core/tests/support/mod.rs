#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use facevote_core::capture::Frame;
use facevote_core::cohort::{Cohort, CohortSettings};
use facevote_core::db::Database;
use facevote_core::errors::AppResult;
use facevote_core::faces::enrollment::{EnrollmentReceipt, RegistrationRequest};
use facevote_core::faces::extractor::{
    BoundingBox, EmbeddingExtractor, ExtractorSettings, FaceEmbeddingBackend, FaceLandmarks,
    LandmarkPoint,
};
use facevote_core::faces::liveness::{LivenessMode, LivenessSettings};
use facevote_core::faces::store::{FilesystemIndexStore, IndexStore};
use facevote_core::ledger::SqliteVoteLedger;
use facevote_core::registry::SqliteRegistry;
use facevote_core::service::VotingService;
use facevote_core::trainer::{rebuild_channel, RebuildWorker, RetryPolicy, Trainer};
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgb, RgbImage};
use tempfile::TempDir;

pub const IMAGE_SIZE: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eyes {
    Open = 0,
    Closed = 1,
    /// Landmarks collapsed together, as a printed photo held far away.
    Flat = 2,
    /// Open eyes with the nose tip shifted sideways.
    HeadTurned = 3,
}

/// Nose-tip shift of a turned head, in pixels.
pub const HEAD_TURN_PX: f64 = 14.0;

/// Face backend driven by marker pixels: red of (0, 0) selects the face
/// (0 = none), red of (1, 0) selects the eye state.
pub struct MarkerBackend {
    embeddings: HashMap<u8, Vec<f64>>,
}

impl MarkerBackend {
    pub fn new(faces: &[(u8, Vec<f64>)]) -> Self {
        Self {
            embeddings: faces.iter().cloned().collect(),
        }
    }
}

impl FaceEmbeddingBackend for MarkerBackend {
    fn detect(&self, image: &RgbImage) -> AppResult<Vec<BoundingBox>> {
        if image.get_pixel(0, 0)[0] == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox {
            left: 4,
            top: 4,
            right: 60,
            bottom: 60,
        }])
    }

    fn landmarks(&self, image: &RgbImage, _face: &BoundingBox) -> AppResult<FaceLandmarks> {
        Ok(match image.get_pixel(1, 0)[0] {
            1 => landmarks(1.0),
            2 => flat_landmarks(),
            3 => turned_landmarks(),
            _ => landmarks(6.0),
        })
    }

    fn encode(
        &self,
        image: &RgbImage,
        _face: &BoundingBox,
        _num_jitters: u32,
    ) -> AppResult<Vec<f64>> {
        let marker = image.get_pixel(0, 0)[0];
        Ok(self
            .embeddings
            .get(&marker)
            .cloned()
            .unwrap_or_else(|| vec![f64::from(marker), 1.0, 1.0, 1.0]))
    }
}

fn eye(x_offset: f64, opening: f64) -> Vec<LandmarkPoint> {
    let half = opening / 2.0;
    vec![
        LandmarkPoint::new(16.0 + x_offset, 24.0),
        LandmarkPoint::new(19.0 + x_offset, 24.0 - half),
        LandmarkPoint::new(22.0 + x_offset, 24.0 - half),
        LandmarkPoint::new(25.0 + x_offset, 24.0),
        LandmarkPoint::new(22.0 + x_offset, 24.0 + half),
        LandmarkPoint::new(19.0 + x_offset, 24.0 + half),
    ]
}

fn landmarks(opening: f64) -> FaceLandmarks {
    let mut points = vec![LandmarkPoint::new(32.0, 40.0); FaceLandmarks::POINT_COUNT];
    points.splice(36..42, eye(0.0, opening));
    points.splice(42..48, eye(22.0, opening));
    FaceLandmarks::new(points)
}

fn turned_landmarks() -> FaceLandmarks {
    let mut turned = landmarks(6.0);
    turned.points[30].x += HEAD_TURN_PX;
    turned
}

fn flat_landmarks() -> FaceLandmarks {
    let mut points = vec![LandmarkPoint::new(32.0, 32.0); FaceLandmarks::POINT_COUNT];
    for (offset, point) in points[36..48].iter_mut().enumerate() {
        point.x += offset as f64 * 0.1;
    }
    FaceLandmarks::new(points)
}

pub fn png(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ColorType::Rgb8,
        )
        .unwrap();
    bytes
}

fn checkerboard() -> RgbImage {
    RgbImage::from_fn(IMAGE_SIZE, IMAGE_SIZE, |x, y| {
        if (x / 2 + y / 2) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// Sharp image showing face `marker` with the given eye state.
pub fn face_image(marker: u8, eyes: Eyes) -> Vec<u8> {
    let mut image = checkerboard();
    image.put_pixel(0, 0, Rgb([marker, 0, 0]));
    image.put_pixel(1, 0, Rgb([eyes as u8, 0, 0]));
    png(&image)
}

/// Detectable face on a uniform background.
pub fn blurry_image(marker: u8) -> Vec<u8> {
    let mut image = RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, Rgb([120, 120, 120]));
    image.put_pixel(0, 0, Rgb([marker, 0, 0]));
    png(&image)
}

pub fn no_face_image() -> Vec<u8> {
    face_image(0, Eyes::Open)
}

/// Open, closed, open over 400ms.
pub fn blink_frames(marker: u8) -> Vec<Frame> {
    vec![
        Frame::new(face_image(marker, Eyes::Open), Duration::from_millis(0)),
        Frame::new(face_image(marker, Eyes::Closed), Duration::from_millis(200)),
        Frame::new(face_image(marker, Eyes::Open), Duration::from_millis(400)),
    ]
}

/// Facing forward, then turned, over 600ms.
pub fn head_turn_frames(marker: u8) -> Vec<Frame> {
    vec![
        Frame::new(face_image(marker, Eyes::Open), Duration::from_millis(0)),
        Frame::new(face_image(marker, Eyes::Open), Duration::from_millis(300)),
        Frame::new(face_image(marker, Eyes::HeadTurned), Duration::from_millis(600)),
    ]
}

/// Marker 6 is a slightly different capture of the face behind marker 1.
pub fn default_faces() -> Vec<(u8, Vec<f64>)> {
    vec![
        (1, vec![0.9, 0.1, 0.0, 0.2]),
        (2, vec![0.1, 0.8, 0.3, 0.0]),
        (3, vec![0.0, 0.2, 0.9, 0.4]),
        (4, vec![0.4, 0.0, 0.1, 0.9]),
        (5, vec![0.5, 0.5, 0.5, 0.5]),
        (6, vec![0.88, 0.12, 0.01, 0.21]),
    ]
}

pub struct Harness {
    pub service: VotingService,
    pub trainer: Trainer,
    pub worker: RebuildWorker,
    pub registry: Arc<SqliteRegistry>,
    pub ledger: Arc<SqliteVoteLedger>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(mode: LivenessMode) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemIndexStore::new(dir.path().join("indexes")));
        Self::with_store(mode, dir, store)
    }

    pub fn with_store(mode: LivenessMode, dir: TempDir, store: Arc<dyn IndexStore>) -> Self {
        let db = Database::open(&dir.path().join("facevote.db")).unwrap();
        let registry = Arc::new(SqliteRegistry::new(db.clone()));
        let ledger = Arc::new(SqliteVoteLedger::new(db));
        let trainer = Trainer::new(
            registry.clone(),
            store,
            CohortSettings::for_cohort(Cohort::Voters),
            CohortSettings::for_cohort(Cohort::Candidates),
        );
        let (queue, worker) = rebuild_channel(
            trainer.clone(),
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(5),
            },
        );
        let extractor = EmbeddingExtractor::new(
            Arc::new(MarkerBackend::new(&default_faces())),
            ExtractorSettings::default(),
        );
        let liveness = LivenessSettings {
            mode,
            ..LivenessSettings::default()
        };
        let service = VotingService::new(extractor, liveness, &trainer, ledger.clone(), queue);

        Self {
            service,
            trainer,
            worker,
            registry,
            ledger,
            dir,
        }
    }

    pub fn register(&self, cohort: Cohort, id: &str, marker: u8) -> EnrollmentReceipt {
        self.service
            .register(RegistrationRequest {
                cohort,
                identity_id: id.into(),
                display_name: format!("Name of {id}"),
                image: face_image(marker, Eyes::Open),
                enrollment_image: Some(format!("{id}.png")),
            })
            .unwrap()
    }

    pub fn rebuild_all(&self) {
        for cohort in Cohort::ALL {
            self.trainer.rebuild(cohort).unwrap();
        }
    }
}
