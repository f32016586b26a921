use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use teloxide::types::{ChatId, MessageId};

/// Identifies one user request: the chat and the message that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RequestId {
    pub(crate) chat_id: ChatId,
    pub(crate) message_id: MessageId,
}

impl RequestId {
    pub(crate) fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }

    /// Prefix for files owned by this request, unique across chats.
    pub(crate) fn file_prefix(&self) -> String {
        format!("{}-{}", self.chat_id.0, self.message_id.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id.0, self.message_id.0)
    }
}

/// Per-request state: temporary artifacts and the spoiler choice.
///
/// Every registered path is removed when the session ends, which happens on an
/// explicit [`Session::end`] or when the value is dropped, whichever comes
/// first. Removal problems are logged, never returned.
#[derive(Debug)]
pub(crate) struct Session {
    request_id: RequestId,
    temporary_files: Vec<PathBuf>,
    spoiler: bool,
    ended: bool,
}

impl Session {
    pub(crate) fn begin(request_id: RequestId) -> Self {
        log::info!("Session {} started", request_id);
        Self {
            request_id,
            temporary_files: Vec::new(),
            spoiler: false,
            ended: false,
        }
    }

    pub(crate) fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub(crate) fn spoiler(&self) -> bool {
        self.spoiler
    }

    pub(crate) fn set_spoiler(&mut self, spoiler: bool) {
        self.spoiler = spoiler;
    }

    pub(crate) fn register_temporary_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.temporary_files.contains(&path) {
            self.temporary_files.push(path);
        }
    }

    /// Removes the session's files. Returns how many were actually deleted;
    /// calling it again deletes nothing.
    pub(crate) fn end(&mut self) -> usize {
        if self.ended {
            return 0;
        }
        self.ended = true;
        let request_id = self.request_id;
        let removed = self
            .temporary_files
            .drain(..)
            .filter(|path| remove_temporary_file(request_id, path))
            .count();
        self.spoiler = false;
        log::info!(
            "Session {} ended, {} temporary file(s) removed",
            self.request_id,
            removed
        );
        removed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.end();
    }
}

fn remove_temporary_file(request_id: RequestId, path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            log::error!(
                "Session {}: failed to remove {}: {}",
                request_id,
                path.display(),
                e
            );
            false
        }
    }
}

/// Paths that a running request is writing to. A path can be claimed by one
/// request at a time; the claim is released when its guard is dropped.
#[derive(Clone, Default)]
pub(crate) struct PathClaims {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl PathClaims {
    fn paths(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` when another request holds `path`.
    pub(crate) fn claim(&self, path: impl Into<PathBuf>) -> Option<PathClaim> {
        let path = path.into();
        if !self.paths().insert(path.clone()) {
            return None;
        }
        Some(PathClaim {
            path,
            claims: self.clone(),
        })
    }

    pub(crate) fn is_claimed(&self, path: &Path) -> bool {
        self.paths().contains(path)
    }
}

pub(crate) struct PathClaim {
    path: PathBuf,
    claims: PathClaims,
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        self.claims.paths().remove(&self.path);
    }
}
