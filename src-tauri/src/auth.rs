use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::access_log::AccessEvent;
use crate::config::DEFAULT_PBKDF2_ITERATIONS;
use crate::crypto::{decode_b64, derive_key, encode_b64, random_salt};
use crate::error::AppError;
use crate::store::Store;
use crate::util::write_text_file;

pub const AUTH_FILE: &str = "auth.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthRecord {
    pub salt: String,
    pub hash: String,
    #[serde(default = "default_pbkdf2_iterations")]
    pub iterations: u32,
}

fn default_pbkdf2_iterations() -> u32 {
    DEFAULT_PBKDF2_ITERATIONS
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub configured: bool,
    pub failed_attempts: usize,
}

fn auth_file_path(store: &Store) -> PathBuf {
    store.root().join(AUTH_FILE)
}

pub fn read_auth_record(store: &Store) -> Result<Option<AuthRecord>, AppError> {
    let path = auth_file_path(store);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    let mut record: AuthRecord = match serde_json::from_str(raw.as_str()) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    if record.salt.is_empty() || record.hash.is_empty() {
        return Ok(None);
    }
    if record.iterations == 0 {
        record.iterations = DEFAULT_PBKDF2_ITERATIONS;
    }
    Ok(Some(record))
}

fn write_auth_record(store: &Store, payload: &AuthRecord) -> Result<(), AppError> {
    let content = serde_json::to_string_pretty(payload)?;
    write_text_file(auth_file_path(store), content.as_str())
}

fn new_record(password: &str, iterations: u32) -> AuthRecord {
    let salt = random_salt();
    let key = derive_key(password, &salt, iterations);
    AuthRecord {
        salt: encode_b64(&salt),
        hash: encode_b64(key.as_slice()),
        iterations,
    }
}

fn matches_record(record: &AuthRecord, password: &str) -> bool {
    if password.is_empty() {
        return false;
    }
    let Ok(salt) = decode_b64(record.salt.as_str()) else {
        return false;
    };
    let key = derive_key(password, salt.as_slice(), record.iterations.max(1));
    encode_b64(key.as_slice()) == record.hash
}

pub fn status(store: &Store) -> Result<AuthStatus, AppError> {
    Ok(AuthStatus {
        configured: read_auth_record(store)?.is_some(),
        failed_attempts: store.access_log().failure_streak()?,
    })
}

/// Creates the dashboard password. Refuses to overwrite an existing one;
/// use `change` for that.
pub fn setup(store: &Store, password: &str) -> Result<AuthRecord, AppError> {
    let log = store.access_log();
    if password.is_empty() {
        log.record(AccessEvent::Setup, false, "empty password");
        return Err(AppError::invalid("Password is required."));
    }
    if read_auth_record(store)?.is_some() {
        log.record(AccessEvent::Setup, false, "password already set");
        return Err(AppError::invalid("A password is already set."));
    }
    if store.has_data_file() && store.load(password).is_err() {
        log.record(AccessEvent::Setup, false, "database is locked by another password");
        return Err(AppError::Locked);
    }
    let record = new_record(password, store.config().security.pbkdf2_iterations);
    write_auth_record(store, &record)?;
    log.record(AccessEvent::Setup, true, "password created");
    tracing::info!("dashboard password created");
    Ok(record)
}

pub fn verify(store: &Store, password: &str) -> Result<bool, AppError> {
    let ok = match read_auth_record(store)? {
        Some(record) => matches_record(&record, password),
        None => false,
    };
    store.access_log().record(AccessEvent::Unlock, ok, "");
    if !ok {
        tracing::warn!("dashboard unlock rejected");
    }
    Ok(ok)
}

/// Checks the password without writing to the access log.
pub fn require(store: &Store, password: &str) -> Result<(), AppError> {
    match read_auth_record(store)? {
        Some(record) if matches_record(&record, password) => Ok(()),
        _ => Err(AppError::Locked),
    }
}

/// Swaps the password and re-encrypts the database under it.
pub fn change(store: &Store, current: &str, next: &str) -> Result<bool, AppError> {
    let log = store.access_log();
    let Some(current_record) = read_auth_record(store)? else {
        log.record(AccessEvent::PasswordChange, false, "no password set");
        return Ok(false);
    };
    if next.is_empty() || !matches_record(&current_record, current) {
        log.record(AccessEvent::PasswordChange, false, "current password rejected");
        return Ok(false);
    }
    store.rekey(current, next)?;
    let next_record = new_record(next, store.config().security.pbkdf2_iterations);
    write_auth_record(store, &next_record)?;
    log.record(AccessEvent::PasswordChange, true, "");
    tracing::info!("dashboard password changed");
    Ok(true)
}
