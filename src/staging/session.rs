//! Request-scoped staging sessions
//!
//! A session is a private directory with `input/`, `encrypted/` and
//! `decrypted/` subareas. Callers only ever see its [`SessionToken`]; the
//! directory name is separate random hex that never leaves the server.
//!
//! Disposal is idempotent. If a download holds an [`ArtifactLease`] when
//! the session is disposed, the directory is removed when the last lease
//! is dropped instead.

use crate::crypto::{random_array, random_bytes};
use crate::error::{FileCryptError, IoResultExt, Result};
use crate::staging::validate_name;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Random bytes behind a session token
pub const TOKEN_BYTES: usize = 32;

/// Opaque capability naming a session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh token
    pub fn generate() -> Result<Self> {
        let bytes: [u8; TOKEN_BYTES] = random_array()?;
        Ok(Self(URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Accept a token from a request path if it is well-formed
    pub fn parse(value: &str) -> Option<Self> {
        let decoded = URL_SAFE_NO_PAD.decode(value).ok()?;
        (decoded.len() == TOKEN_BYTES).then(|| Self(value.to_string()))
    }

    /// Token text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output subarea of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingArea {
    /// Encryption results
    Encrypted,
    /// Decryption results
    Decrypted,
}

impl StagingArea {
    /// Lookup order for downloads
    pub const LOOKUP_ORDER: [StagingArea; 2] = [StagingArea::Decrypted, StagingArea::Encrypted];

    /// Directory name of the subarea
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Encrypted => "encrypted",
            Self::Decrypted => "decrypted",
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    disposed: bool,
    removed: bool,
    readers: usize,
}

/// One request's private working directory
#[derive(Debug)]
pub struct StagingSession {
    token: SessionToken,
    root: PathBuf,
    created_at: DateTime<Utc>,
    created: Instant,
    state: Mutex<SessionState>,
}

impl StagingSession {
    /// Create the session directory tree under `staging_root`
    pub fn create(staging_root: &Path, token: SessionToken) -> Result<Self> {
        fs::create_dir_all(staging_root).with_path(staging_root)?;

        let root = staging_root.join(hex::encode(random_bytes(16)?));
        fs::create_dir(&root).with_path(&root)?;
        for sub in ["input", "encrypted", "decrypted"] {
            let dir = root.join(sub);
            fs::create_dir(&dir).with_path(&dir)?;
        }

        tracing::debug!("Created staging session at {:?}", root);
        Ok(Self {
            token,
            root,
            created_at: Utc::now(),
            created: Instant::now(),
            state: Mutex::new(SessionState::default()),
        })
    }

    /// Session token
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Session directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Wall-clock creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time since creation
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Whether the session has outlived `ttl`
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }

    /// Whether [`dispose`](Self::dispose) has been called
    pub fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    /// Directory of an output subarea
    pub fn area_dir(&self, area: StagingArea) -> PathBuf {
        self.root.join(area.dir_name())
    }

    /// Write the uploaded payload and return its path
    pub fn stage_input(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.root.join("input").join(validate_name(name)?);
        fs::write(&path, bytes).with_path(&path)?;
        Ok(path)
    }

    /// Write an engine result into a subarea
    pub fn write_output(&self, area: StagingArea, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.area_dir(area).join(validate_name(name)?);
        fs::write(&path, bytes).with_path(&path)?;
        Ok(path)
    }

    /// Path of the expected output, failing if the engine did not produce it
    pub fn resolve_output(&self, area: StagingArea, name: &str) -> Result<PathBuf> {
        let path = self.area_dir(area).join(validate_name(name)?);
        if path.is_file() {
            Ok(path)
        } else {
            Err(FileCryptError::OutputMissing(path))
        }
    }

    /// Open an artifact for reading, decrypted area first
    ///
    /// The returned lease keeps the directory alive across a concurrent
    /// [`dispose`](Self::dispose).
    pub fn open_artifact(self: &Arc<Self>, name: &str) -> Result<ArtifactLease> {
        let name = validate_name(name)?;
        let mut state = self.lock_state();
        if state.disposed {
            return Err(FileCryptError::NotFound(PathBuf::from(name)));
        }

        for area in StagingArea::LOOKUP_ORDER {
            let path = self.area_dir(area).join(&name);
            if path.is_file() {
                let file = File::open(&path).with_path(&path)?;
                let len = file.metadata().with_path(&path)?.len();
                state.readers += 1;
                return Ok(ArtifactLease {
                    file,
                    area,
                    name,
                    len,
                    reader: ReaderSlot(Arc::clone(self)),
                });
            }
        }

        Err(FileCryptError::NotFound(PathBuf::from(name)))
    }

    /// Mark the session disposed and delete its directory
    ///
    /// Returns `true` on the first call only. Deletion is deferred while
    /// artifact leases are outstanding.
    pub fn dispose(&self) -> Result<bool> {
        let mut state = self.lock_state();
        if state.disposed {
            return Ok(false);
        }
        state.disposed = true;

        if state.readers == 0 {
            self.remove_dir(&mut state)?;
        } else {
            tracing::debug!(
                "Deferring removal of {:?} until {} reader(s) finish",
                self.root,
                state.readers
            );
        }
        Ok(true)
    }

    fn remove_dir(&self, state: &mut SessionState) -> Result<()> {
        if state.removed {
            return Ok(());
        }
        state.removed = true;
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                tracing::debug!("Removed staging session at {:?}", self.root);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FileCryptError::io(&self.root, e)),
        }
    }

    fn release_reader(&self) {
        let mut state = self.lock_state();
        state.readers = state.readers.saturating_sub(1);
        if state.disposed && state.readers == 0 {
            if let Err(e) = self.remove_dir(&mut state) {
                tracing::warn!("Failed to remove staging session: {}", e);
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        // State is plain flags, so a poisoned lock is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An open artifact that pins its session directory until dropped
#[derive(Debug)]
pub struct ArtifactLease {
    // Declared before `reader` so the handle closes before removal
    file: File,
    area: StagingArea,
    name: String,
    len: u64,
    reader: ReaderSlot,
}

#[derive(Debug)]
struct ReaderSlot(Arc<StagingSession>);

impl Drop for ReaderSlot {
    fn drop(&mut self) {
        self.0.release_reader();
    }
}

impl ArtifactLease {
    /// Subarea the artifact was found in
    pub fn area(&self) -> StagingArea {
        self.area
    }

    /// Artifact file name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Artifact size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the artifact is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Readable handle to the artifact
    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    /// Read the whole artifact
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        use std::io::Read;

        let mut buf = Vec::with_capacity(self.len as usize);
        let path = self.reader.0.area_dir(self.area).join(&self.name);
        self.file.read_to_end(&mut buf).with_path(path)?;
        Ok(buf)
    }
}
