//! File naming schemes.
//!
//! The current scheme names a resource's file after its kind and a slug of
//! its id, e.g. image `123` lives at `img-123.png`. The legacy scheme used the
//! bare id with no extension at all.

use rslug::slugify;
use stash_catalog::{ResourceKind, ResourceRecord};
use stash_storage::{CACHE_DIR, validate_path};
use std::path::{Path, PathBuf};

/// Extensions a recorded path may carry and still be trusted as-is.
const TRUSTED_EXTENSIONS: [&str; 1] = ["json"];
/// Hex digits of the id digest kept in file names.
const DIGEST_LEN: usize = 16;

/// Deterministic file stem for a resource under the current scheme.
///
/// An id that is already its own slug is used verbatim (`img-123`). Any other
/// id gets `_` and a digest of the exact id appended (`img-some-page_<hex>`),
/// since distinct ids can share a slug. Slugs never contain `_`, so the two
/// forms cannot collide with each other.
pub fn normalized_file_name(id: &str, kind: ResourceKind) -> String {
    let slug = slugify!(id);
    match slug == id {
        true => format!("{}-{slug}", kind.file_prefix()),
        false => {
            let digest = blake3::hash(id.as_bytes()).to_hex();
            format!("{}-{slug}_{}", kind.file_prefix(), &digest.as_str()[..DIGEST_LEN])
        },
    }
}

/// Path of a resource's file under the current scheme, relative to the base.
pub fn current_path(record: &ResourceRecord) -> PathBuf {
    PathBuf::from(format!("{}.{}", normalized_file_name(&record.id, record.kind), record.kind.extension()))
}

/// Path of a resource's file under the legacy scheme, relative to the base.
pub fn legacy_path(id: &str) -> PathBuf {
    PathBuf::from(id)
}

/// Whether `path` falls inside the transcode cache, which holds derived
/// outputs and never resources. Unparseable paths count as not reserved and
/// are left for the backend to reject.
pub fn is_reserved(path: &Path) -> bool {
    validate_path(path).is_ok_and(|path| path.starts_with(CACHE_DIR))
}

/// Whether a recorded path carries the extension expected for `kind`.
pub fn has_expected_extension(path: &Path, kind: ResourceKind) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(kind.extension()) || TRUSTED_EXTENSIONS.contains(&ext))
}
