use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use image::{imageops, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};

const LANDMARK_ENV: &str = "DLIB_LANDMARK_MODEL";
const ENCODER_ENV: &str = "DLIB_ENCODER_MODEL";

pub const DEFAULT_BLUR_THRESHOLD: f64 = 50.0;
pub const DEFAULT_JITTERS: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl BoundingBox {
    pub fn width(&self) -> i64 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i64 {
        (self.bottom - self.top).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LandmarkPoint {
    pub x: f64,
    pub y: f64,
}

impl LandmarkPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &LandmarkPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Facial landmarks in the 68-point layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceLandmarks {
    pub points: Vec<LandmarkPoint>,
}

impl FaceLandmarks {
    pub const POINT_COUNT: usize = 68;

    pub fn new(points: Vec<LandmarkPoint>) -> Self {
        Self { points }
    }

    pub fn left_eye(&self) -> Option<&[LandmarkPoint]> {
        self.points.get(36..42)
    }

    pub fn right_eye(&self) -> Option<&[LandmarkPoint]> {
        self.points.get(42..48)
    }

    pub fn nose_tip(&self) -> Option<&LandmarkPoint> {
        self.points.get(30)
    }
}

#[derive(Debug, Clone)]
pub struct FaceModelPaths {
    pub landmark: PathBuf,
    pub encoder: PathBuf,
}

pub trait ModelPathResolver {
    fn resolve(
        &self,
        landmark_model: Option<PathBuf>,
        encoder_model: Option<PathBuf>,
    ) -> AppResult<FaceModelPaths>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvModelPathResolver;

impl ModelPathResolver for EnvModelPathResolver {
    fn resolve(
        &self,
        landmark_model: Option<PathBuf>,
        encoder_model: Option<PathBuf>,
    ) -> AppResult<FaceModelPaths> {
        let landmark = landmark_model
            .or_else(|| env::var(LANDMARK_ENV).ok().map(PathBuf::from))
            .ok_or(AppError::MissingModel {
                kind: "landmark predictor",
                flag: "--landmark-model",
                env: LANDMARK_ENV,
            })?;

        let encoder = encoder_model
            .or_else(|| env::var(ENCODER_ENV).ok().map(PathBuf::from))
            .ok_or(AppError::MissingModel {
                kind: "face encoding network",
                flag: "--encoder-model",
                env: ENCODER_ENV,
            })?;

        Ok(FaceModelPaths { landmark, encoder })
    }
}

/// Detector, landmark predictor and embedder for one deployment. Mixing
/// backends with different embedding spaces across cohorts is invalid.
pub trait FaceEmbeddingBackend: Send + Sync {
    fn detect(&self, image: &RgbImage) -> AppResult<Vec<BoundingBox>>;
    fn landmarks(&self, image: &RgbImage, face: &BoundingBox) -> AppResult<FaceLandmarks>;
    fn encode(&self, image: &RgbImage, face: &BoundingBox, num_jitters: u32)
        -> AppResult<Vec<f64>>;
}

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub blur_threshold: f64,
    pub jitters: u32,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            blur_threshold: DEFAULT_BLUR_THRESHOLD,
            jitters: DEFAULT_JITTERS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocatedFace {
    pub bounding_box: BoundingBox,
    pub landmarks: FaceLandmarks,
    pub faces_detected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceEmbedding {
    pub bounding_box: BoundingBox,
    #[serde(skip)]
    pub landmarks: FaceLandmarks,
    pub vector: Vec<f64>,
    pub sharpness: f64,
    pub faces_detected: usize,
}

#[derive(Clone)]
pub struct EmbeddingExtractor {
    backend: Arc<dyn FaceEmbeddingBackend>,
    settings: ExtractorSettings,
}

impl EmbeddingExtractor {
    pub fn new(backend: Arc<dyn FaceEmbeddingBackend>, settings: ExtractorSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    pub fn decode(bytes: &[u8]) -> AppResult<RgbImage> {
        let image =
            image::load_from_memory(bytes).map_err(|source| AppError::ImageDecode { source })?;
        Ok(image.to_rgb8())
    }

    /// Detects faces and returns the primary one with its landmarks.
    pub fn locate(&self, image: &RgbImage) -> AppResult<LocatedFace> {
        let faces = self.backend.detect(image)?;
        debug!(faces = faces.len(), "face detection finished");
        let primary = select_primary_face(&faces).ok_or(AppError::NoFaceDetected)?;
        let landmarks = self.backend.landmarks(image, primary)?;
        Ok(LocatedFace {
            bounding_box: primary.clone(),
            landmarks,
            faces_detected: faces.len(),
        })
    }

    pub fn extract(&self, bytes: &[u8]) -> AppResult<FaceEmbedding> {
        let image = Self::decode(bytes)?;
        debug!(width = image.width(), height = image.height(), "decoded image");

        let faces = self.backend.detect(&image)?;
        let primary = select_primary_face(&faces).ok_or(AppError::NoFaceDetected)?;
        if faces.len() > 1 {
            debug!(
                faces = faces.len(),
                "multiple faces detected; using the largest"
            );
        }

        let crop = crop_face(&image, primary);
        let sharpness = sharpness_score(&crop);
        if sharpness < self.settings.blur_threshold {
            return Err(AppError::BlurryImage {
                score: sharpness,
                threshold: self.settings.blur_threshold,
            });
        }

        let landmarks = self.backend.landmarks(&image, primary)?;
        let vector = self
            .backend
            .encode(&image, primary, self.settings.jitters)?;
        ensure_valid_embedding(&vector)?;
        debug!(len = vector.len(), sharpness, "computed face embedding");

        Ok(FaceEmbedding {
            bounding_box: primary.clone(),
            landmarks,
            vector,
            sharpness,
            faces_detected: faces.len(),
        })
    }
}

/// Largest bounding box wins; ties keep detector order.
pub fn select_primary_face(faces: &[BoundingBox]) -> Option<&BoundingBox> {
    let mut best: Option<&BoundingBox> = None;
    for face in faces {
        match best {
            Some(current) if face.area() <= current.area() => {}
            _ => best = Some(face),
        }
    }
    best
}

pub fn crop_face(image: &RgbImage, face: &BoundingBox) -> GrayImage {
    let width = i64::from(image.width());
    let height = i64::from(image.height());
    let left = face.left.clamp(0, width);
    let top = face.top.clamp(0, height);
    let right = face.right.clamp(0, width);
    let bottom = face.bottom.clamp(0, height);

    let gray = imageops::grayscale(image);
    if right <= left || bottom <= top {
        return gray;
    }
    imageops::crop_imm(
        &gray,
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    )
    .to_image()
}

/// Variance of the 4-neighbour Laplacian.
pub fn sharpness_score(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut count = 0.0;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = f64::from(image.get_pixel(x, y)[0]);
            let laplacian = f64::from(image.get_pixel(x - 1, y)[0])
                + f64::from(image.get_pixel(x + 1, y)[0])
                + f64::from(image.get_pixel(x, y - 1)[0])
                + f64::from(image.get_pixel(x, y + 1)[0])
                - 4.0 * center;
            count += 1.0;
            sum += laplacian;
            sum_sq += laplacian * laplacian;
        }
    }

    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

pub fn ensure_valid_embedding(embedding: &[f64]) -> AppResult<usize> {
    if embedding.is_empty() {
        return Err(AppError::InvalidEmbedding("embedding vector is empty".into()));
    }
    if embedding.iter().any(|value| !value.is_finite()) {
        return Err(AppError::InvalidEmbedding(
            "embedding contains non-finite values".into(),
        ));
    }
    let magnitude = embedding
        .iter()
        .map(|value| value * value)
        .sum::<f64>()
        .sqrt();
    if magnitude <= f64::EPSILON {
        return Err(AppError::InvalidEmbedding(
            "embedding has zero magnitude".into(),
        ));
    }
    Ok(embedding.len())
}

#[cfg(feature = "dlib")]
pub use dlib_backend::DlibBackend;

#[cfg(feature = "dlib")]
mod dlib_backend {
    use std::sync::{Mutex, MutexGuard};

    use dlib_face_recognition::{
        FaceDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait, ImageMatrix,
        LandmarkPredictor, LandmarkPredictorTrait, Rectangle,
    };
    use image::RgbImage;
    use tracing::debug;

    use super::{BoundingBox, FaceEmbeddingBackend, FaceLandmarks, FaceModelPaths, LandmarkPoint};
    use crate::errors::{AppError, AppResult};

    struct DlibModels {
        detector: FaceDetector,
        predictor: LandmarkPredictor,
        encoder: FaceEncoderNetwork,
    }

    pub struct DlibBackend {
        models: Mutex<DlibModels>,
    }

    impl DlibBackend {
        pub fn new(models: &FaceModelPaths) -> AppResult<Self> {
            debug!(path = %models.landmark.display(), "loading landmark model");
            let predictor = LandmarkPredictor::open(&models.landmark).map_err(|message| {
                AppError::ModelLoad {
                    path: models.landmark.clone(),
                    message,
                }
            })?;
            debug!(path = %models.encoder.display(), "loading encoder model");
            let encoder = FaceEncoderNetwork::open(&models.encoder).map_err(|message| {
                AppError::ModelLoad {
                    path: models.encoder.clone(),
                    message,
                }
            })?;
            let detector = FaceDetector::new();

            Ok(Self {
                models: Mutex::new(DlibModels {
                    detector,
                    predictor,
                    encoder,
                }),
            })
        }

        fn lock(&self) -> AppResult<MutexGuard<'_, DlibModels>> {
            self.models
                .lock()
                .map_err(|_| AppError::BackendUnavailable("dlib model lock poisoned".into()))
        }
    }

    fn to_rectangle(face: &BoundingBox) -> Rectangle {
        Rectangle {
            left: face.left,
            top: face.top,
            right: face.right,
            bottom: face.bottom,
        }
    }

    impl FaceEmbeddingBackend for DlibBackend {
        fn detect(&self, image: &RgbImage) -> AppResult<Vec<BoundingBox>> {
            let models = self.lock()?;
            let matrix = ImageMatrix::from_image(image);
            let locations = models.detector.face_locations(&matrix);
            Ok(locations
                .iter()
                .map(|rect| BoundingBox {
                    left: rect.left,
                    top: rect.top,
                    right: rect.right,
                    bottom: rect.bottom,
                })
                .collect())
        }

        fn landmarks(&self, image: &RgbImage, face: &BoundingBox) -> AppResult<FaceLandmarks> {
            let models = self.lock()?;
            let matrix = ImageMatrix::from_image(image);
            let landmarks = models
                .predictor
                .face_landmarks(&matrix, &to_rectangle(face));
            Ok(FaceLandmarks::new(
                landmarks
                    .iter()
                    .map(|point| LandmarkPoint::new(point.x() as f64, point.y() as f64))
                    .collect(),
            ))
        }

        fn encode(
            &self,
            image: &RgbImage,
            face: &BoundingBox,
            num_jitters: u32,
        ) -> AppResult<Vec<f64>> {
            let models = self.lock()?;
            let matrix = ImageMatrix::from_image(image);
            let landmarks = models
                .predictor
                .face_landmarks(&matrix, &to_rectangle(face));
            let encodings = models
                .encoder
                .get_face_encodings(&matrix, &[landmarks], num_jitters);
            encodings
                .iter()
                .next()
                .map(|encoding| encoding.as_ref().to_vec())
                .ok_or(AppError::NoFaceDetected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::png::PngEncoder;
    use image::{ColorType, ImageEncoder, Luma, Rgb};

    struct StubBackend {
        faces: Vec<BoundingBox>,
        embedding: Vec<f64>,
    }

    impl FaceEmbeddingBackend for StubBackend {
        fn detect(&self, _image: &RgbImage) -> AppResult<Vec<BoundingBox>> {
            Ok(self.faces.clone())
        }

        fn landmarks(&self, _image: &RgbImage, _face: &BoundingBox) -> AppResult<FaceLandmarks> {
            Ok(FaceLandmarks::new(vec![
                LandmarkPoint::new(0.0, 0.0);
                FaceLandmarks::POINT_COUNT
            ]))
        }

        fn encode(
            &self,
            _image: &RgbImage,
            _face: &BoundingBox,
            _num_jitters: u32,
        ) -> AppResult<Vec<f64>> {
            Ok(self.embedding.clone())
        }
    }

    fn face(left: i64, top: i64, right: i64, bottom: i64) -> BoundingBox {
        BoundingBox {
            left,
            top,
            right,
            bottom,
        }
    }

    fn png_bytes(image: &RgbImage) -> Vec<u8> {
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

    fn checkerboard(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if (x / 2 + y / 2) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    fn extractor(faces: Vec<BoundingBox>) -> EmbeddingExtractor {
        EmbeddingExtractor::new(
            Arc::new(StubBackend {
                faces,
                embedding: vec![0.1, 0.2, 0.3],
            }),
            ExtractorSettings::default(),
        )
    }

    #[test]
    fn invalid_bytes_report_decode_error() {
        let err = extractor(vec![face(0, 0, 8, 8)])
            .extract(b"not an image")
            .unwrap_err();
        assert!(matches!(err, AppError::ImageDecode { .. }));
    }

    #[test]
    fn missing_face_is_reported_before_blur() {
        let flat = RgbImage::from_pixel(16, 16, Rgb([128, 128, 128]));
        let err = extractor(vec![]).extract(&png_bytes(&flat)).unwrap_err();
        assert!(matches!(err, AppError::NoFaceDetected));
    }

    #[test]
    fn flat_face_crop_is_rejected_as_blurry() {
        let flat = RgbImage::from_pixel(16, 16, Rgb([128, 128, 128]));
        let err = extractor(vec![face(2, 2, 14, 14)])
            .extract(&png_bytes(&flat))
            .unwrap_err();
        match err {
            AppError::BlurryImage { score, threshold } => {
                assert_eq!(score, 0.0);
                assert_eq!(threshold, DEFAULT_BLUR_THRESHOLD);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn sharp_face_produces_embedding() {
        let embedding = extractor(vec![face(2, 2, 30, 30)])
            .extract(&png_bytes(&checkerboard(32)))
            .unwrap();
        assert_eq!(embedding.vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(embedding.faces_detected, 1);
        assert!(embedding.sharpness > DEFAULT_BLUR_THRESHOLD);
    }

    #[test]
    fn largest_face_wins_and_ties_keep_detector_order() {
        let faces = vec![face(0, 0, 4, 4), face(0, 0, 10, 10), face(5, 5, 15, 15)];
        assert_eq!(select_primary_face(&faces), Some(&faces[1]));
        assert_eq!(select_primary_face(&[]), None);
    }

    #[test]
    fn sharpness_of_uniform_image_is_zero() {
        let uniform = GrayImage::from_pixel(10, 10, Luma([40]));
        assert_eq!(sharpness_score(&uniform), 0.0);
    }

    #[test]
    fn ensure_valid_embedding_rejects_zero_magnitude() {
        let err = ensure_valid_embedding(&[0.0, 0.0]).unwrap_err();
        assert!(matches!(err, AppError::InvalidEmbedding(_)));
        assert_eq!(ensure_valid_embedding(&[0.5, 0.0]).unwrap(), 2);
    }
}
