//! Session registry and lifecycle
//!
//! The registry maps opaque tokens to live sessions. A session only becomes
//! visible once the request that created it succeeds and calls
//! [`SessionGuard::keep`]; every other exit path disposes it when the guard
//! drops. Kept sessions are swept by [`SessionReaper`] after the TTL.

use crate::error::{FileCryptError, IoResultExt, Result};
use crate::staging::{ArtifactLease, SessionToken, StagingSession};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Registry of downloadable sessions
#[derive(Debug)]
pub struct SessionRegistry {
    root: PathBuf,
    ttl: Duration,
    sessions: RwLock<HashMap<SessionToken, Arc<StagingSession>>>,
}

impl SessionRegistry {
    /// Create a registry staging under `root`
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).with_path(&root)?;
        Ok(Self {
            root,
            ttl,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Staging root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Retention of kept sessions
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of kept sessions
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no session is kept
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Start a new session owned by the returned guard
    pub fn create_session(&self) -> Result<SessionGuard<'_>> {
        let session = StagingSession::create(&self.root, SessionToken::generate()?)?;
        Ok(SessionGuard {
            registry: self,
            session: Arc::new(session),
            kept: false,
        })
    }

    /// Look up a live, unexpired session
    pub fn lookup(&self, token: &SessionToken) -> Option<Arc<StagingSession>> {
        self.read()
            .get(token)
            .filter(|s| !s.is_expired(self.ttl) && !s.is_disposed())
            .cloned()
    }

    /// Open an artifact by the path segments of a download request
    pub fn open_artifact(&self, token: &str, name: &str) -> Result<ArtifactLease> {
        let session = SessionToken::parse(token)
            .and_then(|t| self.lookup(&t))
            .ok_or_else(|| FileCryptError::NotFound(PathBuf::from(name)))?;
        session.open_artifact(name)
    }

    /// Dispose sessions older than the TTL; returns how many were removed
    pub fn reap(&self) -> usize {
        let expired: Vec<Arc<StagingSession>> = {
            let mut sessions = self.write();
            let tokens: Vec<SessionToken> = sessions
                .iter()
                .filter(|(_, s)| s.is_expired(self.ttl))
                .map(|(t, _)| t.clone())
                .collect();
            tokens.iter().filter_map(|t| sessions.remove(t)).collect()
        };

        let count = expired.len();
        for session in expired {
            if let Err(e) = session.dispose() {
                tracing::warn!("Failed to dispose expired session: {}", e);
            }
        }
        if count > 0 {
            tracing::info!("Reaped {} expired staging session(s)", count);
        }
        count
    }

    /// Dispose every kept session
    pub fn dispose_all(&self) -> usize {
        let sessions: Vec<_> = self.write().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            if let Err(e) = session.dispose() {
                tracing::warn!("Failed to dispose session: {}", e);
            }
        }
        sessions.len()
    }

    /// Remove session directories left behind by a previous process
    ///
    /// Only entries named like session directories (32 hex characters) and
    /// not owned by this registry are touched.
    pub fn purge_orphans(&self) -> Result<usize> {
        let live: Vec<PathBuf> = self.read().values().map(|s| s.root().to_path_buf()).collect();
        let mut removed = 0;

        for entry in fs::read_dir(&self.root).with_path(&self.root)? {
            let entry = entry.with_path(&self.root)?;
            let path = entry.path();
            let name = entry.file_name();
            let looks_like_session = name
                .to_str()
                .is_some_and(|n| n.len() == 32 && n.bytes().all(|b| b.is_ascii_hexdigit()));

            if looks_like_session && path.is_dir() && !live.contains(&path) {
                fs::remove_dir_all(&path).with_path(&path)?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!("Removed {} orphaned staging session(s) from {:?}", removed, self.root);
        }
        Ok(removed)
    }

    fn register(&self, session: Arc<StagingSession>) {
        self.write().insert(session.token().clone(), session);
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionToken, Arc<StagingSession>>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionToken, Arc<StagingSession>>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Single disposal decision for one request's session
///
/// [`keep`](Self::keep) publishes the session until its TTL expires.
/// Dropping the guard without keeping disposes the session immediately.
#[derive(Debug)]
pub struct SessionGuard<'a> {
    registry: &'a SessionRegistry,
    session: Arc<StagingSession>,
    kept: bool,
}

impl SessionGuard<'_> {
    /// The guarded session
    pub fn session(&self) -> &StagingSession {
        &self.session
    }

    /// Publish the session for download and return its token
    pub fn keep(mut self) -> SessionToken {
        self.kept = true;
        self.registry.register(Arc::clone(&self.session));
        self.session.token().clone()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        if let Err(e) = self.session.dispose() {
            tracing::warn!("Failed to dispose staging session: {}", e);
        }
    }
}

/// Background thread sweeping expired sessions
#[derive(Debug)]
pub struct SessionReaper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SessionReaper {
    /// Start sweeping `registry` every `interval`
    pub fn spawn(registry: Arc<SessionRegistry>, interval: Duration) -> Result<Self> {
        let (stop, stopped) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("session-reaper".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        registry.reap();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| FileCryptError::ThreadPoolError(e.to_string()))?;

        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit
    pub fn shutdown(&mut self) {
        // Disconnecting the channel wakes the thread
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SessionReaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::StagingArea;
    use tempfile::TempDir;

    fn registry(dir: &TempDir, ttl: Duration) -> SessionRegistry {
        SessionRegistry::new(dir.path().join("staging"), ttl).unwrap()
    }

    #[test]
    fn test_dropped_guard_disposes() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir, Duration::from_secs(60));

        let root = {
            let guard = reg.create_session().unwrap();
            guard.session().root().to_path_buf()
        };
        assert!(!root.exists());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_kept_session_is_downloadable() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir, Duration::from_secs(60));

        let guard = reg.create_session().unwrap();
        guard
            .session()
            .write_output(StagingArea::Encrypted, "a.txt.enc", b"cipher")
            .unwrap();
        let root = guard.session().root().to_path_buf();
        let token = guard.keep();

        assert!(root.exists());
        assert_eq!(reg.len(), 1);
        let mut lease = reg.open_artifact(token.as_str(), "a.txt.enc").unwrap();
        assert_eq!(lease.read_all().unwrap(), b"cipher");
    }

    #[test]
    fn test_unknown_token_and_traversal() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir, Duration::from_secs(60));
        let guard = reg.create_session().unwrap();
        guard.session().write_output(StagingArea::Encrypted, "f", b"x").unwrap();
        let dir_name = guard.session().root().file_name().unwrap().to_string_lossy().to_string();
        let token = guard.keep();

        for (t, name) in [
            (dir_name.as_str(), "f"),
            ("not-a-token", "f"),
            (token.as_str(), "../encrypted/f"),
            (token.as_str(), "missing"),
        ] {
            assert!(reg.open_artifact(t, name).is_err(), "{} / {}", t, name);
        }
    }

    #[test]
    fn test_reap_expired() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir, Duration::from_millis(20));

        let guard = reg.create_session().unwrap();
        let root = guard.session().root().to_path_buf();
        let token = guard.keep();

        thread::sleep(Duration::from_millis(40));
        assert!(reg.lookup(&token).is_none());
        assert_eq!(reg.reap(), 1);
        assert!(!root.exists());
        assert!(reg.is_empty());
        assert_eq!(reg.reap(), 0);
    }

    #[test]
    fn test_reap_during_download() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir, Duration::from_millis(50));

        let guard = reg.create_session().unwrap();
        guard.session().write_output(StagingArea::Decrypted, "plain", b"data").unwrap();
        let root = guard.session().root().to_path_buf();
        let token = guard.keep();

        let mut lease = reg.open_artifact(token.as_str(), "plain").unwrap();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(reg.reap(), 1);
        assert!(root.exists());
        assert_eq!(lease.read_all().unwrap(), b"data");
        drop(lease);
        assert!(!root.exists());
    }

    #[test]
    fn test_reaper_thread() {
        let dir = TempDir::new().unwrap();
        let reg = Arc::new(registry(&dir, Duration::from_millis(10)));
        let root = {
            let guard = reg.create_session().unwrap();
            let root = guard.session().root().to_path_buf();
            guard.keep();
            root
        };

        let mut reaper = SessionReaper::spawn(Arc::clone(&reg), Duration::from_millis(20)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while root.exists() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        reaper.shutdown();
        assert!(!root.exists());
    }

    #[test]
    fn test_purge_orphans() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir, Duration::from_secs(60));

        let orphan = reg.root().join("0123456789abcdef0123456789abcdef");
        fs::create_dir_all(orphan.join("encrypted")).unwrap();
        let unrelated = reg.root().join("keep-me");
        fs::create_dir_all(&unrelated).unwrap();

        let guard = reg.create_session().unwrap();
        let live = guard.session().root().to_path_buf();
        guard.keep();

        assert_eq!(reg.purge_orphans().unwrap(), 1);
        assert!(!orphan.exists());
        assert!(unrelated.exists());
        assert!(live.exists());
    }

    #[test]
    fn test_dispose_all() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir, Duration::from_secs(60));
        for _ in 0..3 {
            reg.create_session().unwrap().keep();
        }
        assert_eq!(reg.dispose_all(), 3);
        assert!(reg.is_empty());
    }
}
