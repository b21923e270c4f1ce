//! Authenticated identity and the durable storage it is restored from.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::Result;
use crate::error::Error;
use crate::ws::WsError;

/// Fixed key the session is persisted under.
pub const SESSION_STORAGE_KEY: &str = "chat_session";

/// Identity and connection target for one authenticated period.
///
/// Sessions are produced by the app's login flow and installed with
/// [`crate::chat::Client::initialize`]. The nickname and avatar are carried
/// along for the UI and play no part in connecting.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct Session {
    pub(crate) user_id: String,
    pub(crate) token: SecretString,
    pub(crate) url: String,
    pub(crate) nickname: Option<String>,
    pub(crate) avatar_url: Option<String>,
}

impl Session {
    /// Create a session, checking that `url` is a `ws://` or `wss://` URL.
    pub fn new(user_id: String, token: String, url: String) -> Result<Self> {
        if user_id.is_empty() {
            return Err(Error::validation("user_id cannot be empty"));
        }

        let parsed = Url::parse(&url)?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(WsError::InvalidEndpoint(url).into());
        }

        Ok(Self {
            user_id,
            token: SecretString::from(token),
            url,
            nickname: None,
            avatar_url: None,
        })
    }

    #[must_use]
    pub fn with_nickname(mut self, nickname: String) -> Self {
        self.nickname = Some(nickname);
        self
    }

    #[must_use]
    pub fn with_avatar_url(mut self, avatar_url: String) -> Self {
        self.avatar_url = Some(avatar_url);
        self
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    #[must_use]
    pub fn avatar_url(&self) -> Option<&str> {
        self.avatar_url.as_deref()
    }
}

/// On-disk form of a [`Session`]. The token is written in plaintext, so the
/// storage location must be private to the app.
#[derive(Serialize, Deserialize)]
struct PersistedSession {
    user_id: String,
    token: String,
    url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    avatar_url: Option<String>,
}

impl From<&Session> for PersistedSession {
    fn from(session: &Session) -> Self {
        Self {
            user_id: session.user_id.clone(),
            token: session.token.expose_secret().to_owned(),
            url: session.url.clone(),
            nickname: session.nickname.clone(),
            avatar_url: session.avatar_url.clone(),
        }
    }
}

impl TryFrom<PersistedSession> for Session {
    type Error = Error;

    fn try_from(persisted: PersistedSession) -> Result<Self> {
        let mut session = Session::new(persisted.user_id, persisted.token, persisted.url)?;
        session.nickname = persisted.nickname;
        session.avatar_url = persisted.avatar_url;
        Ok(session)
    }
}

fn encode(session: &Session) -> Result<String> {
    Ok(serde_json::to_string(&PersistedSession::from(session))?)
}

fn decode(json: &str) -> Result<Session> {
    let persisted: PersistedSession = serde_json::from_str(json)?;
    persisted.try_into()
}

/// Durable storage used to restore a session across app restarts.
pub trait SessionStore: Send + Sync + 'static {
    /// Read the stored session, if any.
    fn load(&self) -> Result<Option<Session>>;

    /// Replace the stored session.
    fn save(&self, session: &Session) -> Result<()>;

    /// Forget the stored session, e.g. on logout.
    fn clear(&self) -> Result<()>;
}

impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    fn load(&self) -> Result<Option<Session>> {
        (**self).load()
    }

    fn save(&self, session: &Session) -> Result<()> {
        (**self).save(session)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

/// Keeps the serialized session in memory. Useful for tests and for hosts
/// that do their own persistence.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: RwLock<Option<String>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// The slot only ever holds a complete serialized value, so a poisoned lock is safe to reuse.
impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Session>> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.as_deref().map(decode).transpose()
    }

    fn save(&self, session: &Session) -> Result<()> {
        let json = encode(session)?;
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(json);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Stores the session as `<dir>/chat_session.json`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// The directory must already exist.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            path: dir.as_ref().join(format!("{SESSION_STORAGE_KEY}.json")),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Session>> {
        match fs::read_to_string(&self.path) {
            Ok(json) => decode(&json).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        let json = encode(session)?;
        // Write-then-rename so a crash never leaves a half-written session behind
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// The session currently installed in a client, shared between the public
/// handle (writer) and the connection driver (reader).
#[derive(Debug, Default)]
pub(crate) struct SessionHolder {
    current: RwLock<Option<Session>>,
}

// Option<Session> has no inconsistent intermediate state, so poisoning is recoverable.
impl SessionHolder {
    pub(crate) fn current(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_present(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn replace(&self, session: Session) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }
}
