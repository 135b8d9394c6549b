// crates/apprentice-server/src/db/mod.rs
// SQLite store: schema, pool, and per-table sync operations
//
// The `*_sync` functions take `&Connection` and are designed to run inside
// `DatabasePool::interact` closures.

mod assets;
mod content_store;
mod contexts;
mod embeddings;
mod events;
pub mod pool;
mod schema;
pub mod search;
mod state;
mod versions;

pub use assets::{
    AssetRow, AssetUpsert, UpsertOutcome, get_asset_content_hash_sync, get_asset_sync,
    get_assets_by_ids_sync, upsert_asset_sync,
};
pub use content_store::{
    EvictionStats, content_exists_sync, content_get_sync, content_put_sync,
    evict_unreferenced_sync, insert_content_blob_sync, insert_version_content_ref_sync,
    release_head_sync,
};
pub use contexts::{
    ContextRow, Mount, delete_context_sync, get_context_by_path_sync, get_context_sync,
    insert_context_sync, list_contexts_sync, parse_context_row, set_context_enabled_sync,
    set_last_indexed_at_sync, update_context_sync,
};
pub use embeddings::{
    EmbeddingCorpus, UnembeddedAsset, UnembeddedEvent, bytes_to_embedding, embedding_to_bytes,
    embeddings_available_sync, select_unembedded_assets_sync, select_unembedded_events_sync,
    upsert_asset_embeddings_sync, upsert_event_embeddings_sync,
};
pub use events::{EventRow, get_event_sync, insert_event_sync, parse_event_row};
pub use pool::{CheckpointMode, DatabasePool};
pub use state::{get_state_sync, set_state_sync};
pub use versions::{
    ProviderRow, RefType, VersionRefRow, VersionStatus, get_provider_row_sync,
    get_version_ref_sync, insert_asset_version_sync, insert_version_ref_sync,
    resolve_ref_prefix_sync, set_provider_row_sync, update_provider_sync, version_ref_exists_sync,
};
