// src/session.rs
//
// Explicit user-session context. The signed-in user and their role are
// loaded from disk when the process starts and saved when they change;
// nothing reads ambient global state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

// --- Error Type ---

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("System time error: {0}")]
    Time(String),

    #[error("No active session; log in first")]
    NotLoggedIn,

    #[error("The {role} role is not allowed to {action}")]
    RoleDenied { role: Role, action: &'static str },
}

// Helper to create context-aware IO errors
fn io_context<E: Into<std::io::Error>, S: Into<String>>(source: E, context: S) -> SessionError {
    SessionError::Io {
        source: source.into(),
        context: context.into(),
    }
}

// --- Roles ---

/// Dashboard roles. Leaders get a read-only view; business operations
/// staff create and edit allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Leader,
    BizOps,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Leader => "leader",
            Role::BizOps => "bizops",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "leader" => Ok(Role::Leader),
            "bizops" => Ok(Role::BizOps),
            other => Err(format!(
                "Unknown role '{}'; expected 'leader' or 'bizops'",
                other
            )),
        }
    }
}

// --- Session ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub user_name: String,
    pub role: Role,
    pub started_at_unix_secs: u64,
}

impl UserSession {
    pub fn new(user_name: &str, role: Role) -> Result<Self, SessionError> {
        let started_at_unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SessionError::Time(format!("Failed to get system time: {}", e)))?
            .as_secs();
        Ok(Self {
            user_name: user_name.to_string(),
            role,
            started_at_unix_secs,
        })
    }

    pub fn can_modify_allocations(&self) -> bool {
        self.role == Role::BizOps
    }

    pub fn require_modify_rights(&self) -> Result<(), SessionError> {
        if self.can_modify_allocations() {
            Ok(())
        } else {
            Err(SessionError::RoleDenied {
                role: self.role,
                action: "create or edit allocations",
            })
        }
    }
}

// --- Load / Save ---

pub fn load_session(path: &Path) -> Result<Option<UserSession>, SessionError> {
    if !path.exists() {
        debug!("No session file at {:?}", path);
        return Ok(None);
    }

    let json_string = fs::read_to_string(path)
        .map_err(|e| io_context(e, format!("Failed to read session file: {:?}", path)))?;
    let session: UserSession = serde_json::from_str(&json_string)?;

    debug!(
        "Loaded session for '{}' ({}) from {:?}",
        session.user_name, session.role, path
    );
    Ok(Some(session))
}

/// Loads the session and fails if none exists. Commands other than login
/// go through this.
pub fn require_session(path: &Path) -> Result<UserSession, SessionError> {
    load_session(path)?.ok_or(SessionError::NotLoggedIn)
}

pub fn save_session(path: &Path, session: &UserSession) -> Result<(), SessionError> {
    let json_string = serde_json::to_string_pretty(session)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                io_context(
                    e,
                    format!("Failed to create directory for session file: {:?}", parent),
                )
            })?;
        }
    }

    let mut file = File::create(path)
        .map_err(|e| io_context(e, format!("Failed to create session file: {:?}", path)))?;
    file.write_all(json_string.as_bytes())
        .map_err(|e| io_context(e, format!("Failed to write session file: {:?}", path)))?;

    info!("Saved session for '{}' to {:?}", session.user_name, path);
    Ok(())
}

/// Removes the session file. Returns whether a file existed.
pub fn clear_session(path: &Path) -> Result<bool, SessionError> {
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path)
        .map_err(|e| io_context(e, format!("Failed to remove session file: {:?}", path)))?;
    info!("Cleared session file {:?}", path);
    Ok(true)
}
