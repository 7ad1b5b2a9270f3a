use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::access_log::AccessLog;
use crate::audit::AuditTrail;
use crate::auth;
use crate::config::DashboardConfig;
use crate::crypto::{
    decode_b64, decrypt_envelope_with_key, derive_key, encrypt_text_with_key, password_digest,
    random_salt, CryptoEnvelope,
};
use crate::error::AppError;
use crate::model::{ensure_db_shape_value, ChangeSource, Database};
use crate::util::write_text_file;

pub const DATA_FILE: &str = "shopper_hub.enc";

/// Single-slot cache of the decrypted database and its derived key,
/// keyed by a digest of the password that unlocked it.
#[derive(Default)]
struct DbCacheState {
    key: Option<String>,
    value: Option<Database>,
    db_salt: Option<Vec<u8>>,
    db_key: Option<[u8; 32]>,
    iterations: u32,
}

pub struct Store {
    root: PathBuf,
    config: DashboardConfig,
    cache: Mutex<DbCacheState>,
}

impl Store {
    pub fn open(root: PathBuf, config: DashboardConfig) -> Result<Self, AppError> {
        fs::create_dir_all(root.as_path())?;
        tracing::info!(root = %root.display(), "store opened");
        Ok(Self {
            root,
            config,
            cache: Mutex::new(DbCacheState::default()),
        })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn access_log(&self) -> AccessLog<'_> {
        AccessLog::new(self.root.as_path(), self.config.access_log.max_entries)
    }

    /// Trail for changes made from the dashboard.
    pub fn audit_trail(&self) -> AuditTrail {
        AuditTrail::new(ChangeSource::Dashboard, self.config.audit.max_entries)
    }

    fn db_file_path(&self) -> PathBuf {
        self.root.join(DATA_FILE)
    }

    fn iterations(&self) -> u32 {
        self.config.security.pbkdf2_iterations
    }

    pub fn load(&self, password: &str) -> Result<Database, AppError> {
        if let Some(cached) = self.load_cached_value(password) {
            return Ok(cached);
        }
        let path = self.db_file_path();
        if !path.exists() {
            // First save encrypts under this password; it must match auth.json.
            if auth::read_auth_record(self)?.is_some() {
                auth::require(self, password)?;
            }
            let out = Database::default();
            self.store_cached_value(password, &out);
            return Ok(out);
        }
        let raw = fs::read_to_string(path)?;
        let envelope: CryptoEnvelope = serde_json::from_str(raw.as_str())?;
        let salt = match decode_b64(envelope.salt.as_str()) {
            Ok(value) if !value.is_empty() => value,
            _ => return Err(AppError::Crypto("Database salt is invalid.".to_string())),
        };
        let key = match self.load_cached_crypto(password) {
            Some((cached_salt, cached_key, iterations))
                if cached_salt == salt && iterations == envelope.iterations =>
            {
                cached_key
            }
            _ => derive_key(password, salt.as_slice(), envelope.iterations),
        };
        let Some(decrypted) = decrypt_envelope_with_key(&envelope, &key)? else {
            tracing::warn!("database unlock failed");
            return Err(AppError::Locked);
        };
        let parsed: serde_json::Value = serde_json::from_str(decrypted.as_str())?;
        let out: Database = serde_json::from_value(ensure_db_shape_value(parsed))?;
        self.store_cached_value(password, &out);
        self.store_cached_crypto(password, salt.as_slice(), key, envelope.iterations);
        Ok(out)
    }

    pub fn save(&self, password: &str, db: &Database) -> Result<(), AppError> {
        let path = self.db_file_path();
        let plaintext = serde_json::to_string(db)?;
        let (salt, key, iterations) = match self.load_cached_crypto(password) {
            Some(cached) => cached,
            None => {
                let iterations = self.iterations();
                let fresh_salt = random_salt();
                let key = derive_key(password, &fresh_salt, iterations);
                (fresh_salt.to_vec(), key, iterations)
            }
        };
        let envelope = encrypt_text_with_key(plaintext.as_str(), salt.as_slice(), &key, iterations)?;
        let content = serde_json::to_string(&envelope)?;
        write_text_file(path, content.as_str())?;
        self.store_cached_value(password, db);
        self.store_cached_crypto(password, salt.as_slice(), key, iterations);
        Ok(())
    }

    /// Loads, applies `f`, and saves. Nothing is written when `f` fails.
    pub fn update<T>(
        &self,
        password: &str,
        f: impl FnOnce(&mut Database) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut db = self.load(password)?;
        let out = f(&mut db)?;
        self.save(password, &db)?;
        Ok(out)
    }

    /// Re-encrypts the database under a new password.
    pub fn rekey(&self, current: &str, next: &str) -> Result<(), AppError> {
        let db = self.load(current)?;
        self.clear_cache();
        self.save(next, &db)
    }

    pub fn has_data_file(&self) -> bool {
        self.db_file_path().exists()
    }

    pub fn clear_cache(&self) {
        if let Ok(mut guard) = self.cache.lock() {
            *guard = DbCacheState::default();
        }
    }

    fn load_cached_value(&self, password: &str) -> Option<Database> {
        let cache_key = password_digest(password);
        let guard = self.cache.lock().ok()?;
        if guard.key.as_deref() == Some(cache_key.as_str()) {
            return guard.value.clone();
        }
        None
    }

    fn store_cached_value(&self, password: &str, value: &Database) {
        if let Ok(mut guard) = self.cache.lock() {
            let cache_key = password_digest(password);
            if guard.key.as_deref() != Some(cache_key.as_str()) {
                guard.db_salt = None;
                guard.db_key = None;
            }
            guard.key = Some(cache_key);
            guard.value = Some(value.clone());
        }
    }

    fn load_cached_crypto(&self, password: &str) -> Option<(Vec<u8>, [u8; 32], u32)> {
        let cache_key = password_digest(password);
        let guard = self.cache.lock().ok()?;
        if guard.key.as_deref() != Some(cache_key.as_str()) {
            return None;
        }
        let salt = guard.db_salt.clone()?;
        let key = guard.db_key?;
        Some((salt, key, guard.iterations))
    }

    fn store_cached_crypto(&self, password: &str, salt: &[u8], key: [u8; 32], iterations: u32) {
        if let Ok(mut guard) = self.cache.lock() {
            let cache_key = password_digest(password);
            if guard.key.as_deref() != Some(cache_key.as_str()) {
                guard.value = None;
            }
            guard.key = Some(cache_key);
            guard.db_salt = Some(salt.to_vec());
            guard.db_key = Some(key);
            guard.iterations = iterations;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tempfile::TempDir;

    pub const PASSWORD: &str = "correct horse";

    pub fn test_config() -> DashboardConfig {
        let mut config = DashboardConfig::default();
        config.security.pbkdf2_iterations = 64;
        config
    }

    pub fn test_store() -> (TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().to_path_buf(), test_config()).unwrap();
        (dir, store)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::model::fixtures;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_loads_empty_database() {
        let (_dir, store) = test_store();
        assert_eq!(store.load(PASSWORD).unwrap(), Database::default());
        assert!(!store.root().join(DATA_FILE).exists());
    }

    #[test]
    fn saved_database_survives_a_fresh_store() {
        let (dir, store) = test_store();
        let mut db = Database::default();
        db.shoppers.push(fixtures::shopper("s1", "Ana"));
        store.save(PASSWORD, &db).unwrap();

        let reopened = Store::open(dir.path().to_path_buf(), test_config()).unwrap();
        assert_eq!(reopened.load(PASSWORD).unwrap(), db);
    }

    #[test]
    fn wrong_password_is_locked_not_empty() {
        let (dir, store) = test_store();
        store.save(PASSWORD, &Database::default()).unwrap();

        let reopened = Store::open(dir.path().to_path_buf(), test_config()).unwrap();
        assert!(matches!(reopened.load("nope"), Err(AppError::Locked)));
    }

    #[test]
    fn cached_value_is_keyed_by_password() {
        let (_dir, store) = test_store();
        let mut db = Database::default();
        db.shoppers.push(fixtures::shopper("s1", "Ana"));
        store.save(PASSWORD, &db).unwrap();
        assert_eq!(store.load(PASSWORD).unwrap(), db);
        assert!(matches!(store.load("other"), Err(AppError::Locked)));
    }

    #[test]
    fn failed_update_writes_nothing() {
        let (_dir, store) = test_store();
        let result: Result<(), AppError> = store.update(PASSWORD, |db| {
            db.shoppers.push(fixtures::shopper("s1", "Ana"));
            Err(AppError::invalid("nope"))
        });
        assert!(result.is_err());
        assert!(!store.root().join(DATA_FILE).exists());
        assert!(store.load(PASSWORD).unwrap().shoppers.is_empty());
    }

    #[test]
    fn fresh_database_requires_the_dashboard_password() {
        let (dir, store) = test_store();
        auth::setup(&store, PASSWORD).unwrap();

        let typo: Result<(), AppError> = store.update("typo", |db| {
            db.shoppers.push(fixtures::shopper("s1", "Ana"));
            Ok(())
        });
        assert!(matches!(typo, Err(AppError::Locked)));
        assert!(!store.root().join(DATA_FILE).exists());

        store
            .update(PASSWORD, |db| {
                db.shoppers.push(fixtures::shopper("s1", "Ana"));
                Ok(())
            })
            .unwrap();
        let reopened = Store::open(dir.path().to_path_buf(), test_config()).unwrap();
        assert_eq!(reopened.load(PASSWORD).unwrap().shoppers.len(), 1);
        assert!(auth::change(&reopened, PASSWORD, "next").unwrap());
    }

    #[test]
    fn rekey_moves_data_to_the_new_password() {
        let (dir, store) = test_store();
        let mut db = Database::default();
        db.shoppers.push(fixtures::shopper("s1", "Ana"));
        store.save(PASSWORD, &db).unwrap();
        store.rekey(PASSWORD, "new secret").unwrap();

        let reopened = Store::open(dir.path().to_path_buf(), test_config()).unwrap();
        assert_eq!(reopened.load("new secret").unwrap(), db);
        assert!(matches!(reopened.load(PASSWORD), Err(AppError::Locked)));
    }
}
