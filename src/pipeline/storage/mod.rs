// Reference storage: adapters behind the platform, identity and review ports

pub mod in_memory;
pub mod seed;
pub mod sqlite;

pub use in_memory::InMemoryReferenceStore;
pub use seed::ReferenceSeed;
pub use sqlite::SqliteReferenceStore;

/// Case-folded form that decides when two platform variants or review names
/// are the same entry, in every store
pub(crate) fn fold_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}
