//! Catalog persistence
//!
//! Catalogs are JSON documents under `state/memory/<scope>/catalog.json`,
//! written through the opaque key-value store with atomic renames. The
//! Engram-style remote document backend implements the same `KvStore`
//! trait without this module changing.

use crate::catalog::MemoryCatalog;
use crate::Result;
use tooling::persistence::{get_typed, put_typed, KvStore};

fn catalog_key(scope: &str) -> String {
    format!("memory/{}/catalog.json", scope)
}

/// Persist a catalog
pub async fn save_catalog(store: &dyn KvStore, catalog: &MemoryCatalog) -> Result<()> {
    put_typed(store, &catalog_key(&catalog.scope), catalog).await?;
    Ok(())
}

/// Load a catalog for a scope, if previously persisted
pub async fn load_catalog(store: &dyn KvStore, scope: &str) -> Result<Option<MemoryCatalog>> {
    Ok(get_typed(store, &catalog_key(scope)).await?)
}
