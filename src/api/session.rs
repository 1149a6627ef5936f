//! Session context: tokens, tenant and authentication state.
//!
//! The store is the only place tokens live. It is handed to `ApiClient` at
//! construction and written only by login, refresh and logout.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::types::User;

/// Where the client stands with the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
  Authenticated,
  /// A 401 was seen and a refresh exchange is in progress
  Refreshing,
  /// No usable credentials; the user has to log in again
  Unauthenticated,
}

/// Persisted session contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
  pub access_token: Option<String>,
  pub refresh_token: Option<String>,
  pub tenant_id: Option<String>,
  pub user: Option<User>,
}

/// Shared, cloneable handle to the session.
#[derive(Clone)]
pub struct SessionStore {
  inner: Arc<RwLock<Session>>,
  state: Arc<watch::Sender<AuthState>>,
  path: Option<PathBuf>,
}

impl SessionStore {
  /// A session that is never written to disk.
  #[cfg(test)]
  pub fn in_memory(tenant_id: Option<String>) -> Self {
    Self::from_session(
      Session {
        tenant_id,
        ..Session::default()
      },
      None,
    )
  }

  /// Open the persisted session for the given backend.
  ///
  /// Each backend URL gets its own file so switching config files does not
  /// leak tokens between servers.
  pub fn open(base_url: &str, tenant_id: Option<String>) -> Result<Self> {
    let path = Self::default_path(base_url)?;
    Self::at_path(path, tenant_id)
  }

  /// Open (or start) a session persisted at `path`.
  pub fn at_path(path: PathBuf, tenant_id: Option<String>) -> Result<Self> {
    let mut session = if path.exists() {
      let contents = std::fs::read(&path)
        .map_err(|e| eyre!("Failed to read session file {}: {}", path.display(), e))?;
      match serde_json::from_slice::<Session>(&contents) {
        Ok(session) => session,
        Err(e) => {
          warn!(path = %path.display(), error = %e, "Discarding unreadable session file");
          Session::default()
        }
      }
    } else {
      Session::default()
    };

    // Configured tenant wins over whatever was stored
    if tenant_id.is_some() {
      session.tenant_id = tenant_id;
    }

    Ok(Self::from_session(session, Some(path)))
  }

  fn from_session(session: Session, path: Option<PathBuf>) -> Self {
    let initial = if session.access_token.is_some() {
      AuthState::Authenticated
    } else {
      AuthState::Unauthenticated
    };
    let (tx, _rx) = watch::channel(initial);

    Self {
      inner: Arc::new(RwLock::new(session)),
      state: Arc::new(tx),
      path,
    }
  }

  fn default_path(base_url: &str) -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    let mut hasher = Sha256::new();
    hasher.update(base_url.trim_end_matches('/').as_bytes());
    let digest = hex::encode(hasher.finalize());

    Ok(
      data_dir
        .join("taskeri")
        .join("sessions")
        .join(format!("{}.json", &digest[..16])),
    )
  }

  fn read(&self) -> RwLockReadGuard<'_, Session> {
    self.inner.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> RwLockWriteGuard<'_, Session> {
    self.inner.write().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn access_token(&self) -> Option<String> {
    self.read().access_token.clone()
  }

  pub fn refresh_token(&self) -> Option<String> {
    self.read().refresh_token.clone()
  }

  pub fn tenant_id(&self) -> Option<String> {
    self.read().tenant_id.clone()
  }

  pub fn user(&self) -> Option<User> {
    self.read().user.clone()
  }

  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  pub fn state(&self) -> AuthState {
    *self.state.borrow()
  }

  /// Receiver that observes every state transition.
  pub fn watch(&self) -> watch::Receiver<AuthState> {
    self.state.subscribe()
  }

  pub fn set_state(&self, state: AuthState) {
    let previous = self.state.send_replace(state);
    if previous != state {
      debug!(?previous, ?state, "Auth state changed");
    }
  }

  /// Store the result of a successful login.
  pub fn sign_in(&self, access_token: String, refresh_token: Option<String>, user: Option<User>) {
    {
      let mut session = self.write();
      session.access_token = Some(access_token);
      session.refresh_token = refresh_token;
      session.user = user;
    }
    self.persist();
    self.set_state(AuthState::Authenticated);
  }

  /// Store a refreshed access token (and a rotated refresh token, if any).
  pub fn replace_access_token(&self, access_token: String, refresh_token: Option<String>) {
    {
      let mut session = self.write();
      session.access_token = Some(access_token);
      if refresh_token.is_some() {
        session.refresh_token = refresh_token;
      }
    }
    self.persist();
    self.set_state(AuthState::Authenticated);
  }

  pub fn set_user(&self, user: User) {
    self.write().user = Some(user);
    self.persist();
  }

  /// Drop all credentials. The tenant stays, it comes from configuration.
  pub fn clear(&self) {
    {
      let mut session = self.write();
      session.access_token = None;
      session.refresh_token = None;
      session.user = None;
    }
    self.persist();
    self.set_state(AuthState::Unauthenticated);
  }

  fn persist(&self) {
    let Some(path) = &self.path else {
      return;
    };

    let session = self.read().clone();
    if let Err(e) = write_session_file(path, &session) {
      // Losing persistence only costs a re-login on next start
      warn!(path = %path.display(), error = %e, "Failed to persist session");
    }
  }
}

fn write_session_file(path: &Path, session: &Session) -> Result<()> {
  if session.access_token.is_none() && session.refresh_token.is_none() {
    if path.exists() {
      std::fs::remove_file(path).map_err(|e| eyre!("Failed to remove session file: {}", e))?;
    }
    return Ok(());
  }

  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create session directory: {}", e))?;
  }

  let data =
    serde_json::to_vec_pretty(session).map_err(|e| eyre!("Failed to encode session: {}", e))?;

  let mut options = std::fs::OpenOptions::new();
  options.write(true).create(true).truncate(true);
  #[cfg(unix)]
  {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o600);
  }
  let mut file = options
    .open(path)
    .map_err(|e| eyre!("Failed to open session file: {}", e))?;

  // A file left by an older run keeps its mode on open
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    file
      .set_permissions(std::fs::Permissions::from_mode(0o600))
      .map_err(|e| eyre!("Failed to restrict session file permissions: {}", e))?;
  }

  file
    .write_all(&data)
    .map_err(|e| eyre!("Failed to write session file: {}", e))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_in_memory_starts_unauthenticated() {
    let store = SessionStore::in_memory(Some("acme".to_string()));
    assert_eq!(store.state(), AuthState::Unauthenticated);
    assert_eq!(store.tenant_id().as_deref(), Some("acme"));
    assert!(store.access_token().is_none());
  }

  #[test]
  fn test_sign_in_and_clear_publish_state() {
    let store = SessionStore::in_memory(None);
    let rx = store.watch();

    store.sign_in("a1".to_string(), Some("r1".to_string()), None);
    assert_eq!(*rx.borrow(), AuthState::Authenticated);
    assert_eq!(store.access_token().as_deref(), Some("a1"));

    store.clear();
    assert_eq!(*rx.borrow(), AuthState::Unauthenticated);
    assert!(store.access_token().is_none());
    assert!(store.refresh_token().is_none());
  }

  #[test]
  fn test_refresh_keeps_refresh_token_unless_rotated() {
    let store = SessionStore::in_memory(None);
    store.sign_in("a1".to_string(), Some("r1".to_string()), None);

    store.replace_access_token("a2".to_string(), None);
    assert_eq!(store.refresh_token().as_deref(), Some("r1"));

    store.replace_access_token("a3".to_string(), Some("r2".to_string()));
    assert_eq!(store.access_token().as_deref(), Some("a3"));
    assert_eq!(store.refresh_token().as_deref(), Some("r2"));
  }

  #[test]
  fn test_session_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");

    let store = SessionStore::at_path(path.clone(), Some("acme".to_string())).unwrap();
    store.sign_in("a1".to_string(), Some("r1".to_string()), None);
    assert!(path.exists());

    let reopened = SessionStore::at_path(path.clone(), None).unwrap();
    assert_eq!(reopened.state(), AuthState::Authenticated);
    assert_eq!(reopened.access_token().as_deref(), Some("a1"));
    assert_eq!(reopened.tenant_id().as_deref(), Some("acme"));

    reopened.clear();
    assert!(!path.exists());
  }

  #[test]
  fn test_corrupt_session_file_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, b"not json").unwrap();

    let store = SessionStore::at_path(path, None).unwrap();
    assert_eq!(store.state(), AuthState::Unauthenticated);
  }

  #[cfg(unix)]
  #[test]
  fn test_session_file_is_readable_by_owner_only() {
    use std::os::unix::fs::PermissionsExt;
    let dir = tempfile::tempdir().unwrap();
    let mode = |path: &Path| std::fs::metadata(path).unwrap().permissions().mode() & 0o777;

    let fresh = dir.path().join("fresh.json");
    let store = SessionStore::at_path(fresh.clone(), None).unwrap();
    store.sign_in("a1".to_string(), Some("r1".to_string()), None);
    assert_eq!(mode(&fresh), 0o600);

    let old = dir.path().join("old.json");
    std::fs::write(&old, b"{}").unwrap();
    std::fs::set_permissions(&old, std::fs::Permissions::from_mode(0o644)).unwrap();
    let store = SessionStore::at_path(old.clone(), None).unwrap();
    store.sign_in("a1".to_string(), Some("r1".to_string()), None);
    assert_eq!(mode(&old), 0o600);
  }
}
