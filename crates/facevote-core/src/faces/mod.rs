pub mod enrollment;
pub mod extractor;
pub mod index;
pub mod liveness;
pub mod matcher;
pub mod store;

pub use enrollment::{
    validate_identity_id, EnrolledIdentity, EnrollmentReceipt, RegistrationRequest,
};

#[cfg(feature = "dlib")]
pub use extractor::DlibBackend;
pub use extractor::{
    ensure_valid_embedding, select_primary_face, sharpness_score, BoundingBox, EmbeddingExtractor,
    EnvModelPathResolver, ExtractorSettings, FaceEmbedding, FaceEmbeddingBackend, FaceLandmarks,
    FaceModelPaths, LandmarkPoint, LocatedFace, ModelPathResolver,
};

pub use index::{confidence, Classification, DistanceMetric, EnrollmentIndex, Normalizer};

pub use liveness::{
    eye_aspect_ratio, LivenessChecker, LivenessMode, LivenessReport, LivenessSettings,
};

pub use matcher::{IdentityMatcher, IndexHandle, MatchDecision, MatchStrategy};

pub use store::{
    index_path, read_index_key, EnvIndexDirResolver, FilesystemIndexStore, IndexDirResolver,
    IndexStore,
};
