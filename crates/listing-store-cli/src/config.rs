use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use listing_store_core::ColumnType;
use serde::Deserialize;

pub const DEFAULT_DATABASE: &str = "./listings.sqlite3";
pub const DEFAULT_TABLE: &str = "listings";

/// Optional YAML configuration. Command-line flags take precedence over every field.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub database: Option<PathBuf>,
    pub table: Option<String>,
    /// Identifying columns as `field:type` pairs.
    pub unique: Vec<String>,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    pub limit: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

/// Settings after merging flags over the config file over the defaults.
#[derive(Debug)]
pub struct Settings {
    pub database: PathBuf,
    pub table: String,
    pub unique: Vec<String>,
    pub archive_limit: Option<usize>,
}

impl Settings {
    pub fn resolve(
        config: Option<&Path>,
        database: Option<PathBuf>,
        table: Option<String>,
    ) -> Result<Self> {
        let file = match config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self {
            database: database
                .or(file.database)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
            table: table.or(file.table).unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            unique: file.unique,
            archive_limit: file.archive.limit,
        })
    }
}

/// Parse a `field:type` column declaration.
pub fn parse_column_spec(raw: &str) -> Result<(String, ColumnType)> {
    let (field, column_type) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("expected `field:type`, got `{raw}`"))?;
    let column_type = ColumnType::parse(column_type)
        .ok_or_else(|| anyhow!("unknown column type `{column_type}` in `{raw}`"))?;
    Ok((field.trim().to_string(), column_type))
}
