//! Dashboard configuration loaded from `dashboard.toml` in the storage root.
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::error::AppError;

pub const CONFIG_FILE: &str = "dashboard.toml";
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 200_000;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    pub security: SecurityCfg,
    pub sheet: SheetCfg,
    pub audit: AuditCfg,
    pub access_log: AccessLogCfg,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            security: SecurityCfg::default(),
            sheet: SheetCfg::default(),
            audit: AuditCfg::default(),
            access_log: AccessLogCfg::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SecurityCfg {
    #[serde(default = "default_pbkdf2_iterations")]
    pub pbkdf2_iterations: u32,
}

impl Default for SecurityCfg {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

fn default_pbkdf2_iterations() -> u32 {
    DEFAULT_PBKDF2_ITERATIONS
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AuditCfg {
    #[serde(default = "default_audit_max_entries")]
    pub max_entries: usize,
}

impl Default for AuditCfg {
    fn default() -> Self {
        Self {
            max_entries: default_audit_max_entries(),
        }
    }
}

fn default_audit_max_entries() -> usize {
    5_000
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AccessLogCfg {
    #[serde(default = "default_access_log_max_entries")]
    pub max_entries: usize,
}

impl Default for AccessLogCfg {
    fn default() -> Self {
        Self {
            max_entries: default_access_log_max_entries(),
        }
    }
}

fn default_access_log_max_entries() -> usize {
    2_000
}

/// Optional shopper columns a sheet may carry. The name column is mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetField {
    Email,
    Phone,
    Branch,
    Stage,
    HireDate,
    Notes,
}

impl SheetField {
    pub const ALL: [SheetField; 6] = [
        SheetField::Email,
        SheetField::Phone,
        SheetField::Branch,
        SheetField::Stage,
        SheetField::HireDate,
        SheetField::Notes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SheetField::Email => "email",
            SheetField::Phone => "phone",
            SheetField::Branch => "branch",
            SheetField::Stage => "stage",
            SheetField::HireDate => "hire_date",
            SheetField::Notes => "notes",
        }
    }
}

/// Where each shopper field sits in the spreadsheet, as zero-based column
/// offsets. Fields listed in `ignore` are treated as absent from the sheet.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SheetCfg {
    pub url: Option<String>,
    pub header_rows: usize,
    pub name: usize,
    pub email: usize,
    pub phone: usize,
    pub branch: usize,
    pub stage: usize,
    pub hire_date: usize,
    pub notes: usize,
    pub ignore: Vec<String>,
}

impl Default for SheetCfg {
    fn default() -> Self {
        Self {
            url: None,
            header_rows: 1,
            name: 0,
            email: 1,
            phone: 2,
            branch: 3,
            stage: 4,
            hire_date: 5,
            notes: 6,
            ignore: Vec::new(),
        }
    }
}

impl SheetCfg {
    pub fn column(&self, field: SheetField) -> Option<usize> {
        if self.ignore.iter().any(|name| name.trim() == field.as_str()) {
            return None;
        }
        Some(match field {
            SheetField::Email => self.email,
            SheetField::Phone => self.phone,
            SheetField::Branch => self.branch,
            SheetField::Stage => self.stage,
            SheetField::HireDate => self.hire_date,
            SheetField::Notes => self.notes,
        })
    }

    fn offsets(&self) -> Vec<usize> {
        let mut out = vec![self.name];
        out.extend(SheetField::ALL.into_iter().filter_map(|field| self.column(field)));
        out
    }
}

/// Load config from the storage root. A missing file yields defaults.
pub fn load_config(root: &Path) -> Result<DashboardConfig, AppError> {
    let path = root.join(CONFIG_FILE);
    if !path.exists() {
        tracing::info!("no {CONFIG_FILE} in storage root, using defaults");
        return Ok(DashboardConfig::default());
    }
    let txt = std::fs::read_to_string(path.as_path())?;
    let cfg = parse_config(txt.as_str())?;
    tracing::info!(path = %path.display(), "config loaded");
    Ok(cfg)
}

pub fn parse_config(txt: &str) -> Result<DashboardConfig, AppError> {
    let cfg: DashboardConfig = toml::from_str(txt)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &DashboardConfig) -> Result<(), AppError> {
    if cfg.security.pbkdf2_iterations == 0 {
        return Err(AppError::Config(
            "security.pbkdf2_iterations must be greater than zero".into(),
        ));
    }
    if cfg.audit.max_entries == 0 {
        return Err(AppError::Config(
            "audit.max_entries must be greater than zero".into(),
        ));
    }
    if cfg.access_log.max_entries == 0 {
        return Err(AppError::Config(
            "access_log.max_entries must be greater than zero".into(),
        ));
    }
    for name in &cfg.sheet.ignore {
        if !SheetField::ALL.iter().any(|field| field.as_str() == name.trim()) {
            return Err(AppError::Config(format!(
                "sheet.ignore has unknown column `{name}`"
            )));
        }
    }
    let offsets = cfg.sheet.offsets();
    let unique: HashSet<usize> = offsets.iter().copied().collect();
    if unique.len() != offsets.len() {
        return Err(AppError::Config(
            "sheet column offsets must be unique".into(),
        ));
    }
    if let Some(url) = cfg.sheet.url.as_deref() {
        if !url.starts_with("https://") {
            return Err(AppError::Config("sheet.url must be an https URL".into()));
        }
    }
    Ok(())
}
