/*!
This module contains the database versioning abstractions.

The durable source of truth for the file layout of the database is the manifest file: an
append-only log of [`VersionEdit`] records. The [`VersionSet`] replays the manifest at open to
reconstruct the column-family set, the per-level file layout, and the sequence-number and
file-number high-water marks, and then appends further edits as the file layout changes.

# Concurrency

[`VersionSet`] requires external synchronization e.g. a mutex.

[`VersionSet`]: version_set::VersionSet
[`VersionEdit`]: version_edit::VersionEdit
*/

pub(crate) mod file_metadata;
pub(crate) mod version_edit;
pub(crate) mod version_set;
