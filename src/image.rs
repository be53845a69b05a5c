//! Machine image lookup

use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::models::{options, Provider, Software};
use crate::{Error, Result};

pub const DEFAULT_ARCH: &str = "amd64";
pub const EBS_TYPE: &str = "ebs";
pub const INSTANCE_STORE_TYPE: &str = "instance-store";

/// Column holding the image id in every table
pub const IMAGE_ID_COLUMN: &str = "image_id";

/// Instance families that only boot from network-attached volumes
const EBS_ONLY_PREFIXES: &[&str] = &["t1.", "t2.", "t3.", "t3a.", "t4g."];

const BUILTIN_TABLE: &str = include_str!("../data/ubuntu.csv");

/// Rows of `(region, version, arch, type) -> image_id`, loaded from CSV.
///
/// The first non-empty line names the columns. Blank lines and lines
/// starting with `#` are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ImageTable {
    /// Ubuntu images shipped with the crate, parsed once
    pub fn builtin() -> Result<Arc<ImageTable>> {
        static TABLE: OnceLock<Arc<ImageTable>> = OnceLock::new();
        if let Some(table) = TABLE.get() {
            return Ok(table.clone());
        }
        let table = Arc::new(Self::from_csv(BUILTIN_TABLE)?);
        Ok(TABLE.get_or_init(|| table).clone())
    }

    pub fn from_csv(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));

        let columns: Vec<String> = lines
            .next()
            .ok_or_else(|| Error::Config("image table is empty".into()))?
            .split(',')
            .map(|c| c.trim().to_string())
            .collect();
        if !columns.iter().any(|c| c == IMAGE_ID_COLUMN) {
            return Err(Error::Config(format!(
                "image table has no {} column",
                IMAGE_ID_COLUMN
            )));
        }

        let mut rows = Vec::new();
        for (index, line) in lines.enumerate() {
            let row: Vec<String> = line.split(',').map(|v| v.trim().to_string()).collect();
            if row.len() != columns.len() {
                return Err(Error::Config(format!(
                    "image table row {} has {} fields, expected {}",
                    index + 1,
                    row.len(),
                    columns.len()
                )));
            }
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    pub fn from_csv_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_csv(&text)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn query(&self) -> ImageTableQuery<'_> {
        ImageTableQuery {
            table: self,
            filters: Vec::new(),
        }
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| Error::Config(format!("image table has no column {}", name)))
    }
}

/// Fluent conjunction of column equality filters
#[derive(Debug, Clone)]
pub struct ImageTableQuery<'a> {
    table: &'a ImageTable,
    filters: Vec<(String, String)>,
}

impl<'a> ImageTableQuery<'a> {
    pub fn filter_by(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    /// Image ids of every matching row, in table order
    pub fn results(&self) -> Result<Vec<&'a str>> {
        let filters = self
            .filters
            .iter()
            .map(|(column, value)| Ok((self.table.column_index(column)?, value.as_str())))
            .collect::<Result<Vec<_>>>()?;
        let id_index = self.table.column_index(IMAGE_ID_COLUMN)?;

        Ok(self
            .table
            .rows
            .iter()
            .filter(|row| filters.iter().all(|(i, value)| row[*i] == *value))
            .map(|row| row[id_index].as_str())
            .collect())
    }

    /// The one matching image id; zero or several matches is an error
    pub fn single_result(&self) -> Result<String> {
        let results = self.results()?;
        match results.as_slice() {
            [image_id] => Ok((*image_id).to_string()),
            _ => Err(Error::AmbiguousImage {
                filters: self.describe(),
                matches: results.len(),
            }),
        }
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self
            .filters
            .iter()
            .map(|(column, value)| format!("{}={}", column, value))
            .collect();
        format!("[{}]", parts.join(", "))
    }
}

/// Device type the image must use for a given hardware type
pub fn device_type_for(hardware_type: &str) -> &'static str {
    if EBS_ONLY_PREFIXES.iter().any(|p| hardware_type.starts_with(p)) {
        EBS_TYPE
    } else {
        INSTANCE_STORE_TYPE
    }
}

/// Picks the image a pool boots from.
#[derive(Debug, Clone)]
pub struct ImageResolver {
    table: Option<Arc<ImageTable>>,
}

impl ImageResolver {
    pub fn new(table: Arc<ImageTable>) -> Self {
        Self { table: Some(table) }
    }

    /// Resolver for providers without a lookup table
    pub fn explicit_only() -> Self {
        Self { table: None }
    }

    pub fn resolve(&self, software: &Software, provider: &Provider, hardware_type: &str) -> Result<String> {
        if !software.image_id.is_empty() && !software.uses_default_image() {
            return Ok(software.image_id.clone());
        }

        let table = self.table.as_ref().ok_or_else(|| {
            Error::validation(format!(
                "provider {} has no image table, an explicit image id is required",
                provider.id
            ))
        })?;

        let image_id = table
            .query()
            .filter_by("region", provider.option_or(options::REGION, options::DEFAULT_REGION))
            .filter_by(
                "version",
                provider.option_or(
                    options::BASE_OPERATING_SYSTEM_VERSION,
                    options::DEFAULT_BASE_OPERATING_SYSTEM_VERSION,
                ),
            )
            .filter_by("arch", DEFAULT_ARCH)
            .filter_by("type", device_type_for(hardware_type))
            .single_result()?;

        tracing::debug!(provider = %provider.id, hardware_type, image_id = %image_id, "Resolved image from table");
        Ok(image_id)
    }
}
