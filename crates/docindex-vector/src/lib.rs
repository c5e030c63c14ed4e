//! Vector storage for document chunks.
//!
//! [`VectorIndex`] validates and batches. It writes through any
//! [`docindex_core::traits::VectorStore`]: [`LanceStore`] persists to a LanceDB
//! directory, [`InMemoryStore`] keeps everything in process.

use std::sync::Arc;

use docindex_core::traits::VectorStore;
use docindex_core::types::IndexSpec;
use docindex_core::Result;

pub mod index;
pub mod lance;
pub mod memory;
pub mod schema;
pub mod search;
pub mod table;
pub mod writer;

pub use index::VectorIndex;
pub use lance::LanceStore;
pub use memory::InMemoryStore;

/// Opens (creating if needed) a LanceDB-backed index at `uri`.
pub async fn open_lance_index(
    uri: &str,
    spec: IndexSpec,
    batch_size: usize,
) -> Result<VectorIndex> {
    let store: Arc<dyn VectorStore> =
        Arc::new(LanceStore::open(uri, &spec.name, spec.metric).await?);
    Ok(VectorIndex::ensure(store, spec).await?.with_batch_size(batch_size))
}
