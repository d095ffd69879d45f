use std::env;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::cohort::Cohort;
use crate::errors::{AppError, AppResult};
use crate::faces::index::EnrollmentIndex;

pub const DEFAULT_INDEX_DIR: &str = "/var/lib/facevote/indexes";
pub const INDEX_DIR_ENV: &str = "FACEVOTE_INDEX_DIR";
const ARTIFACT_VERSION: u32 = 1;
const ARTIFACT_ALGORITHM: &str = "AES-256-GCM";
const ARTIFACT_NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Persistence for trained indexes, one artifact per cohort.
pub trait IndexStore: Send + Sync {
    fn load(&self, cohort: Cohort) -> AppResult<Option<EnrollmentIndex>>;
    fn save(&self, index: &EnrollmentIndex) -> AppResult<()>;
}

#[derive(Clone)]
pub struct FilesystemIndexStore {
    dir: PathBuf,
    key: Option<[u8; KEY_LEN]>,
}

impl FilesystemIndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: [u8; KEY_LEN]) -> Self {
        self.key = Some(key);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, cohort: Cohort) -> PathBuf {
        index_path(&self.dir, cohort)
    }
}

impl IndexStore for FilesystemIndexStore {
    fn load(&self, cohort: Cohort) -> AppResult<Option<EnrollmentIndex>> {
        let path = self.path_for(cohort);
        let index = read_index_artifact(&path, self.key.as_ref().map(|key| key.as_slice()))?;
        if let Some(index) = &index {
            if index.cohort != cohort {
                return Err(AppError::InvalidIndex {
                    path,
                    message: format!("artifact belongs to cohort {}", index.cohort),
                });
            }
        }
        Ok(index)
    }

    fn save(&self, index: &EnrollmentIndex) -> AppResult<()> {
        write_index_artifact(
            &self.path_for(index.cohort),
            index,
            self.key.as_ref().map(|key| key.as_slice()),
        )
    }
}

pub trait IndexDirResolver {
    fn resolve(&self, override_dir: Option<&Path>) -> PathBuf;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvIndexDirResolver;

impl IndexDirResolver for EnvIndexDirResolver {
    fn resolve(&self, override_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = override_dir {
            dir.to_path_buf()
        } else if let Ok(env_value) = env::var(INDEX_DIR_ENV) {
            PathBuf::from(env_value)
        } else {
            PathBuf::from(DEFAULT_INDEX_DIR)
        }
    }
}

pub fn index_path(dir: &Path, cohort: Cohort) -> PathBuf {
    dir.join(format!("{cohort}.index.json"))
}

/// Reads a 32-byte AES key stored either raw or as base64 text.
pub fn read_index_key(path: &Path) -> AppResult<[u8; KEY_LEN]> {
    let data = fs::read(path).map_err(|source| AppError::IndexRead {
        path: path.to_path_buf(),
        source,
    })?;
    let bytes = if data.len() == KEY_LEN {
        data
    } else {
        let text = String::from_utf8_lossy(&data);
        general_purpose::STANDARD
            .decode(text.trim())
            .map_err(|err| AppError::Encryption(format!("invalid key encoding: {err}")))?
    };
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        AppError::Encryption(format!(
            "expected a {KEY_LEN}-byte key but found {} bytes",
            bytes.len()
        ))
    })
}

pub fn read_index_artifact(path: &Path, key: Option<&[u8]>) -> AppResult<Option<EnrollmentIndex>> {
    if !path.exists() {
        return Ok(None);
    }

    let data = fs::read(path).map_err(|source| AppError::IndexRead {
        path: path.to_path_buf(),
        source,
    })?;

    if let Ok(wrapper) = serde_json::from_slice::<EncryptedArtifact>(&data) {
        return decrypt_artifact(path, wrapper, key).map(Some);
    }

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|err| AppError::InvalidIndex {
            path: path.to_path_buf(),
            message: format!("invalid index contents: {err}"),
        })
}

pub fn write_index_artifact(
    path: &Path,
    index: &EnrollmentIndex,
    key: Option<&[u8]>,
) -> AppResult<()> {
    let write_err = |source| AppError::IndexWrite {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| AppError::IndexWrite {
        path: parent.to_path_buf(),
        source,
    })?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    {
        let file = tmp.as_file_mut();
        {
            let mut writer = BufWriter::new(&mut *file);
            let serialized = if let Some(key_bytes) = key {
                serialize_encrypted(index, key_bytes)?
            } else {
                serde_json::to_vec_pretty(index)?
            };
            writer.write_all(&serialized).map_err(write_err)?;
            writer.write_all(b"\n").map_err(write_err)?;
            writer.flush().map_err(write_err)?;
        }
        file.sync_all().map_err(write_err)?;
    }

    let file = tmp.persist(path).map_err(|err| write_err(err.error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = file.metadata().map_err(write_err)?.permissions();
        perms.set_mode(0o600);
        file.set_permissions(perms).map_err(write_err)?;
    }
    #[cfg(not(unix))]
    drop(file);

    Ok(())
}

fn serialize_encrypted(index: &EnrollmentIndex, key: &[u8]) -> AppResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(index)?;
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| AppError::Encryption("invalid AES-GCM key length".into()))?;
    let mut nonce = [0u8; ARTIFACT_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
        .map_err(|err| AppError::Encryption(format!("failed to encrypt index: {err}")))?;
    let wrapper = EncryptedArtifact {
        version: ARTIFACT_VERSION,
        algorithm: ARTIFACT_ALGORITHM.to_string(),
        nonce: general_purpose::STANDARD.encode(nonce),
        ciphertext: general_purpose::STANDARD.encode(ciphertext),
    };
    serde_json::to_vec_pretty(&wrapper).map_err(AppError::from)
}

fn decrypt_artifact(
    path: &Path,
    wrapper: EncryptedArtifact,
    key: Option<&[u8]>,
) -> AppResult<EnrollmentIndex> {
    if wrapper.algorithm != ARTIFACT_ALGORITHM {
        return Err(AppError::Encryption(format!(
            "unsupported index algorithm '{}'",
            wrapper.algorithm
        )));
    }
    if wrapper.version != ARTIFACT_VERSION {
        return Err(AppError::Encryption(format!(
            "unsupported index artifact version {}",
            wrapper.version
        )));
    }

    let key_bytes = key.ok_or_else(|| AppError::EncryptedIndexRequiresKey {
        path: path.to_path_buf(),
    })?;

    let nonce_bytes = general_purpose::STANDARD
        .decode(wrapper.nonce.trim())
        .map_err(|err| AppError::Encryption(format!("invalid nonce encoding: {err}")))?;
    if nonce_bytes.len() != ARTIFACT_NONCE_LEN {
        return Err(AppError::Encryption(format!(
            "expected nonce of {} bytes but found {}",
            ARTIFACT_NONCE_LEN,
            nonce_bytes.len()
        )));
    }

    let ciphertext = general_purpose::STANDARD
        .decode(wrapper.ciphertext.trim())
        .map_err(|err| AppError::Encryption(format!("invalid ciphertext encoding: {err}")))?;

    let cipher = Aes256Gcm::new_from_slice(key_bytes)
        .map_err(|_| AppError::Encryption("invalid AES-GCM key length".into()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|err| AppError::Encryption(format!("failed to decrypt index: {err}")))?;

    serde_json::from_slice(&plaintext).map_err(|err| AppError::InvalidIndex {
        path: path.to_path_buf(),
        message: format!("invalid decrypted index contents: {err}"),
    })
}

#[derive(Serialize, Deserialize)]
struct EncryptedArtifact {
    version: u32,
    algorithm: String,
    nonce: String,
    ciphertext: String,
}
