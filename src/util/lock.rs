//! In-process locks keyed by path.
//!
//! Used to serialize writers of one cache entry, and installs into one
//! runtime, while unrelated keys proceed in parallel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

type LockMap = HashMap<(&'static str, PathBuf), Arc<Mutex<()>>>;

static LOCKS: LazyLock<Mutex<LockMap>> = LazyLock::new(|| Mutex::new(HashMap::new()));

fn lock_for(namespace: &'static str, key: &Path) -> Arc<Mutex<()>> {
    let mut locks = LOCKS.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(
        locks
            .entry((namespace, key.to_path_buf()))
            .or_insert_with(|| Arc::new(Mutex::new(()))),
    )
}

/// Run `f` while holding the lock for `key` in `namespace`.
///
/// A panic in a previous holder does not poison the key.
pub fn with_path_lock<T>(namespace: &'static str, key: &Path, f: impl FnOnce() -> T) -> T {
    let lock = lock_for(namespace, key);
    let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
    f()
}
