//! Upload Session Controller
//!
//! Drives the three-step protocol: start a session with the first chunk,
//! append chunks at the exact current offset, commit under a final name.
//!
//! All operations block on file-system I/O and are meant to run on a
//! blocking worker thread. A per-session lock makes resolve, validate and
//! append one step, so two appenders can never both pass the offset check.
//! Lock entries live only while some request holds them.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use uuid::Uuid;

use super::types::{AppendOutcome, CommitOutcome, UploadError, UploadProgress};
use crate::io::{ByteSource, StreamCopier};
use crate::staging::{validate_name, StagingStore};

// ============================================================================
// Controller
// ============================================================================

/// Coordinates upload sessions over a [`StagingStore`]
#[derive(Clone)]
pub struct UploadSessionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    store: StagingStore,
    copier: StreamCopier,

    /// Most bytes copied from a single request body
    max_chunk_size: u64,

    /// One lock per session with a request in flight
    session_locks: Mutex<HashMap<Uuid, SessionSlot>>,
}

#[derive(Default)]
struct SessionSlot {
    lock: Arc<Mutex<()>>,

    /// Live `SessionLock` handles, waiting or holding
    holders: usize,
}

impl UploadSessionController {
    pub fn new(store: StagingStore, copier: StreamCopier, max_chunk_size: u64) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                store,
                copier,
                max_chunk_size,
                session_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &StagingStore {
        &self.inner.store
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.inner.max_chunk_size
    }

    // ========================================================================
    // Protocol Operations
    // ========================================================================

    /// Open a new session and write `body` as its first chunk.
    ///
    /// A failed copy leaves the partial staging file in place.
    pub fn start_upload<S: ByteSource>(&self, body: S) -> Result<UploadProgress, UploadError> {
        let upload_id = Uuid::new_v4();
        let session = self.session_lock(upload_id);
        let _guard = session.lock();

        let path = self.inner.store.new_file(&upload_id.to_string())?;
        let offset = self
            .inner
            .copier
            .copy(&path, body, self.inner.max_chunk_size)?;

        tracing::info!(
            upload_id = %upload_id,
            offset = offset,
            "Started chunked upload"
        );

        Ok(UploadProgress { upload_id, offset })
    }

    /// Append `body` to a session, provided `claimed_offset` equals the
    /// staging file's current length exactly.
    pub fn append_chunk<S: ByteSource>(
        &self,
        upload_id: &str,
        claimed_offset: u64,
        body: S,
    ) -> Result<AppendOutcome, UploadError> {
        let Some(id) = parse_session_id(upload_id) else {
            return Ok(AppendOutcome::UnknownSession);
        };
        let name = id.to_string();

        // Unknown ids never get a lock entry
        if self.inner.store.resolve(&name)?.is_none() {
            return Ok(AppendOutcome::UnknownSession);
        }

        let session = self.session_lock(id);
        let _guard = session.lock();

        let Some(path) = self.inner.store.resolve(&name)? else {
            return Ok(AppendOutcome::UnknownSession);
        };

        let actual = fs::metadata(&path)?.len();
        if actual != claimed_offset {
            tracing::warn!(
                upload_id = %id,
                claimed_offset = claimed_offset,
                actual_offset = actual,
                "Rejected chunk at wrong offset"
            );
            return Ok(AppendOutcome::OffsetMismatch {
                claimed: claimed_offset,
                actual,
            });
        }

        let written = self
            .inner
            .copier
            .copy(&path, body, self.inner.max_chunk_size)?;

        tracing::debug!(
            upload_id = %id,
            offset = claimed_offset,
            written = written,
            "Chunk appended"
        );

        Ok(AppendOutcome::Appended(UploadProgress {
            upload_id: id,
            offset: claimed_offset + written,
        }))
    }

    /// Rename a session's staging file to `final_name`, ending the session.
    ///
    /// Fails with [`UploadError::TargetExists`] rather than replacing an
    /// existing file; the session then stays open.
    pub fn commit(&self, upload_id: &str, final_name: &str) -> Result<CommitOutcome, UploadError> {
        let Some(id) = parse_session_id(upload_id) else {
            return Ok(CommitOutcome::UnknownSession);
        };
        let name = id.to_string();

        if self.inner.store.resolve(&name)?.is_none() {
            return Ok(CommitOutcome::UnknownSession);
        }

        validate_final_name(final_name)?;

        let session = self.session_lock(id);
        let guard = session.lock();

        let Some(path) = self.inner.store.resolve(&name)? else {
            return Ok(CommitOutcome::UnknownSession);
        };

        let target = self.inner.store.finalize(&path, final_name)?;
        drop(guard);

        tracing::info!(
            upload_id = %id,
            filename = %final_name,
            "Committed chunked upload"
        );

        Ok(CommitOutcome::Committed {
            upload_id: id,
            path: target,
        })
    }

    /// Current offset of an open session, for clients resuming after a
    /// dropped connection
    pub fn session_offset(&self, upload_id: &str) -> Result<Option<UploadProgress>, UploadError> {
        let Some(id) = parse_session_id(upload_id) else {
            return Ok(None);
        };

        let Some(path) = self.inner.store.resolve(&id.to_string())? else {
            return Ok(None);
        };

        let offset = fs::metadata(&path)?.len();
        Ok(Some(UploadProgress {
            upload_id: id,
            offset,
        }))
    }

    // ========================================================================
    // Session Locks
    // ========================================================================

    fn session_lock(&self, id: Uuid) -> SessionLock<'_> {
        let mut locks = self.inner.session_locks.lock();
        let slot = locks.entry(id).or_default();
        slot.holders += 1;
        let lock = slot.lock.clone();
        drop(locks);

        SessionLock {
            locks: &self.inner.session_locks,
            id,
            lock,
        }
    }

    #[cfg(test)]
    fn tracked_sessions(&self) -> usize {
        self.inner.session_locks.lock().len()
    }
}

/// Handle on one session's lock; drops the map entry once the last
/// holder lets go
struct SessionLock<'a> {
    locks: &'a Mutex<HashMap<Uuid, SessionSlot>>,
    id: Uuid,
    lock: Arc<Mutex<()>>,
}

impl SessionLock<'_> {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        if let Entry::Occupied(mut slot) = locks.entry(self.id) {
            slot.get_mut().holders -= 1;
            if slot.get().holders == 0 {
                slot.remove();
            }
        }
    }
}

/// Session ids are UUIDs; anything else cannot name a session
fn parse_session_id(upload_id: &str) -> Option<Uuid> {
    Uuid::parse_str(upload_id).ok()
}

/// Final names are plain file names that cannot be mistaken for a session
fn validate_final_name(final_name: &str) -> Result<(), UploadError> {
    validate_name(final_name)?;
    if parse_session_id(final_name).is_some() {
        return Err(UploadError::InvalidFileName(final_name.to_string()));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use std::path::Path;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn create_controller(parent: &Path) -> UploadSessionController {
        let store = StagingStore::create(Some(parent)).unwrap();
        UploadSessionController::new(store, StreamCopier::default(), u64::MAX)
    }

    fn staging_contents(controller: &UploadSessionController, id: Uuid) -> Vec<u8> {
        let path = controller.store().resolve(&id.to_string()).unwrap().unwrap();
        fs::read(path).unwrap()
    }

    fn entry_count(controller: &UploadSessionController) -> usize {
        fs::read_dir(controller.store().root().unwrap()).unwrap().count()
    }

    #[test]
    fn test_hello_world_round() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());

        let started = controller.start_upload(&b"hello "[..]).unwrap();
        assert_eq!(started.offset, 6);
        let id = started.upload_id.to_string();

        let appended = controller.append_chunk(&id, 6, &b"world"[..]).unwrap();
        assert_eq!(
            appended,
            AppendOutcome::Appended(UploadProgress {
                upload_id: started.upload_id,
                offset: 11,
            })
        );

        match controller.commit(&id, "greeting.txt").unwrap() {
            CommitOutcome::Committed { upload_id, path } => {
                assert_eq!(upload_id, started.upload_id);
                assert_eq!(path, controller.store().root().unwrap().join("greeting.txt"));
                assert_eq!(fs::read(path).unwrap(), b"hello world");
            }
            other => panic!("expected commit, got {other:?}"),
        }
    }

    #[test]
    fn test_chunks_concatenate_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());
        let chunks: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i; (i as usize * 37) % 5000]).collect();

        let started = controller.start_upload(MemorySource::new(chunks[0].clone())).unwrap();
        let id = started.upload_id.to_string();
        let mut offset = started.offset;

        for chunk in &chunks[1..] {
            match controller.append_chunk(&id, offset, chunk.as_slice()).unwrap() {
                AppendOutcome::Appended(progress) => offset = progress.offset,
                other => panic!("append rejected: {other:?}"),
            }
        }

        assert_eq!(staging_contents(&controller, started.upload_id), chunks.concat());
        assert_eq!(offset, chunks.concat().len() as u64);
    }

    #[test]
    fn test_wrong_offset_leaves_file_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());

        let started = controller.start_upload(&b"abc"[..]).unwrap();
        let id = started.upload_id.to_string();

        for claimed in [0u64, 2, 4, 100] {
            let outcome = controller.append_chunk(&id, claimed, &b"d"[..]).unwrap();
            assert_eq!(outcome, AppendOutcome::OffsetMismatch { claimed, actual: 3 });
        }

        assert_eq!(staging_contents(&controller, started.upload_id), b"abc");
    }

    #[test]
    fn test_unknown_session_has_no_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());
        let unknown = Uuid::new_v4().to_string();

        for id in [unknown.as_str(), "not-a-uuid", "../escape", ""] {
            assert_eq!(
                controller.append_chunk(id, 0, &b"data"[..]).unwrap(),
                AppendOutcome::UnknownSession
            );
            assert_eq!(controller.commit(id, "out.bin").unwrap(), CommitOutcome::UnknownSession);
            assert!(controller.session_offset(id).unwrap().is_none());
        }

        assert_eq!(entry_count(&controller), 0);
        assert_eq!(controller.tracked_sessions(), 0);
    }

    #[test]
    fn test_committed_session_no_longer_resolves() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());

        let started = controller.start_upload(&b"payload"[..]).unwrap();
        let id = started.upload_id.to_string();
        controller.commit(&id, "final.bin").unwrap();

        assert_eq!(
            controller.append_chunk(&id, 7, &b"more"[..]).unwrap(),
            AppendOutcome::UnknownSession
        );
        assert_eq!(controller.commit(&id, "again.bin").unwrap(), CommitOutcome::UnknownSession);
        assert!(controller.store().root().unwrap().join("final.bin").is_file());
        assert_eq!(controller.tracked_sessions(), 0);
    }

    #[test]
    fn test_commit_rejects_existing_target() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());

        let first = controller.start_upload(&b"one"[..]).unwrap();
        controller.commit(&first.upload_id.to_string(), "taken.txt").unwrap();

        let second = controller.start_upload(&b"two"[..]).unwrap();
        let result = controller.commit(&second.upload_id.to_string(), "taken.txt");

        assert!(matches!(result, Err(UploadError::TargetExists(_))));
        assert_eq!(staging_contents(&controller, second.upload_id), b"two");
        let taken = controller.store().root().unwrap().join("taken.txt");
        assert_eq!(fs::read(taken).unwrap(), b"one");
    }

    #[test]
    fn test_commit_rejects_invalid_names() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());
        let started = controller.start_upload(&b"x"[..]).unwrap();
        let id = started.upload_id.to_string();
        let other_id = Uuid::new_v4().to_string();

        for name in ["", "..", "../outside.txt", "nested/name.txt", other_id.as_str()] {
            let result = controller.commit(&id, name);
            assert!(
                matches!(result, Err(UploadError::InvalidFileName(_))),
                "{name:?} accepted"
            );
        }

        assert_eq!(staging_contents(&controller, started.upload_id), b"x");
    }

    #[test]
    fn test_session_offset() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());

        let started = controller.start_upload(&b"12345"[..]).unwrap();
        let progress = controller
            .session_offset(&started.upload_id.to_string())
            .unwrap()
            .unwrap();

        assert_eq!(progress, started);
    }

    #[test]
    fn test_uppercase_id_resolves_same_session() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());

        let started = controller.start_upload(&b"ab"[..]).unwrap();
        let upper = started.upload_id.to_string().to_uppercase();

        let outcome = controller.append_chunk(&upper, 2, &b"c"[..]).unwrap();

        assert!(matches!(outcome, AppendOutcome::Appended(_)));
        assert_eq!(staging_contents(&controller, started.upload_id), b"abc");
    }

    #[test]
    fn test_chunk_limit_truncates_request() {
        let temp_dir = TempDir::new().unwrap();
        let store = StagingStore::create(Some(temp_dir.path())).unwrap();
        let controller = UploadSessionController::new(store, StreamCopier::new(3), 4);

        let started = controller.start_upload(&b"abcdefgh"[..]).unwrap();
        assert_eq!(started.offset, 4);

        let outcome = controller
            .append_chunk(&started.upload_id.to_string(), 4, &b"efgh"[..])
            .unwrap();
        assert!(matches!(outcome, AppendOutcome::Appended(UploadProgress { offset: 8, .. })));
        assert_eq!(staging_contents(&controller, started.upload_id), b"abcdefgh");
    }

    #[test]
    fn test_concurrent_appends_at_same_offset() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());
        let started = controller.start_upload(&b""[..]).unwrap();
        let id = started.upload_id.to_string();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [b'a', b'b']
            .into_iter()
            .map(|byte| {
                let controller = controller.clone();
                let id = id.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    controller
                        .append_chunk(&id, 0, MemorySource::new(vec![byte; 4096]))
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<AppendOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let appended = outcomes
            .iter()
            .filter(|o| matches!(o, AppendOutcome::Appended(_)))
            .count();
        assert_eq!(appended, 1);
        assert!(outcomes
            .iter()
            .any(|o| *o == AppendOutcome::OffsetMismatch { claimed: 0, actual: 4096 }));

        let contents = staging_contents(&controller, started.upload_id);
        assert_eq!(contents.len(), 4096);
        assert!(contents.iter().all(|b| *b == contents[0]));
    }

    #[test]
    fn test_session_locks_released_after_each_request() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());

        for _ in 0..100 {
            let started = controller.start_upload(&b"ab"[..]).unwrap();
            assert_eq!(controller.tracked_sessions(), 0);

            let id = started.upload_id.to_string();
            controller.append_chunk(&id, 2, &b"cd"[..]).unwrap();
            controller.append_chunk(&id, 0, &b"xx"[..]).unwrap();
            assert_eq!(controller.tracked_sessions(), 0);
        }

        assert_eq!(entry_count(&controller), 100);
    }

    #[test]
    fn test_failed_start_releases_session_lock() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());
        fs::remove_dir_all(controller.store().root().unwrap()).unwrap();

        assert!(controller.start_upload(&b"lost"[..]).is_err());
        assert_eq!(controller.tracked_sessions(), 0);
    }

    #[test]
    fn test_session_locks_released_after_contention() {
        let temp_dir = TempDir::new().unwrap();
        let controller = create_controller(temp_dir.path());
        let started = controller.start_upload(&b""[..]).unwrap();
        let id = started.upload_id.to_string();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let controller = controller.clone();
                let id = id.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    controller.append_chunk(&id, 0, MemorySource::new(vec![0; 1024])).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(controller.tracked_sessions(), 0);
        assert_eq!(staging_contents(&controller, started.upload_id).len(), 1024);
    }

    #[test]
    fn test_sessions_survive_restart_with_fixed_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("staging");

        let started = {
            let store = StagingStore::open(&root).unwrap();
            let controller = UploadSessionController::new(store, StreamCopier::default(), u64::MAX);
            controller.start_upload(&b"before "[..]).unwrap()
        };

        let store = StagingStore::open(&root).unwrap();
        let controller = UploadSessionController::new(store, StreamCopier::default(), u64::MAX);
        let outcome = controller
            .append_chunk(&started.upload_id.to_string(), 7, &b"after"[..])
            .unwrap();

        assert!(matches!(outcome, AppendOutcome::Appended(UploadProgress { offset: 12, .. })));
        assert_eq!(staging_contents(&controller, started.upload_id), b"before after");
    }
}
