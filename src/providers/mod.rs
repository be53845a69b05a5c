//! Backend facades

mod amazon;
mod cloudstack;

pub use amazon::*;
pub use cloudstack::*;

use std::sync::Arc;

use crate::config::ProvisionrConfig;
use crate::image::ImageTable;
use crate::Result;

/// Image table configured for `provider_id`, if any
fn configured_image_table(config: &ProvisionrConfig, provider_id: &str) -> Result<Option<Arc<ImageTable>>> {
    match config.image_tables.get(provider_id) {
        Some(path) => {
            let table = ImageTable::from_csv_file(path)?;
            tracing::info!(provider = %provider_id, path = %path.display(), rows = table.len(), "Loaded image table");
            Ok(Some(Arc::new(table)))
        }
        None => Ok(None),
    }
}
