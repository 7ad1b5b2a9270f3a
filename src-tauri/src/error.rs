use serde::Serializer;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("Unable to unlock the database with this password.")]
    Locked,
    #[error("{table} record {id} was not found.")]
    NotFound { table: &'static str, id: String },
    #[error("{0}")]
    Invalid(String),
    #[error("{table} record {id} already exists.")]
    RecordExists { table: &'static str, id: String },
    #[error("Shopper {0} no longer exists.")]
    ParentMissing(String),
    #[error("Audit entry {0} cannot be restored.")]
    NotRestorable(String),
    #[error("Audit entry {0} was already restored.")]
    AlreadyRestored(String),
    #[error("platform error: {0}")]
    Platform(String),
}

impl AppError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AppError::Invalid(message.into())
    }

    pub fn not_found(table: &'static str, id: &str) -> Self {
        AppError::NotFound {
            table,
            id: id.to_string(),
        }
    }
}

// Commands hand errors to the frontend as plain strings.
impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}
