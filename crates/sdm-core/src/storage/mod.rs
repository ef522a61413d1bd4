//! Part-file lifecycle.
//!
//! Downloads land in `<output>.part`: preallocated when the size is known
//! (`posix_fallocate` on Unix, else `set_len`), written concurrently at exact
//! offsets (pwrite), synced, and atomically renamed into place on success.

mod alloc;
mod part;

pub use part::PartFile;

/// Suffix of the scratch file renamed into place on success.
pub const PART_SUFFIX: &str = ".part";

/// Appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn part_path(final_path: &std::path::Path) -> std::path::PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(PART_SUFFIX);
    std::path::PathBuf::from(o)
}
