//! Process-wide serialization of NetCDF/HDF5 library calls.
//!
//! The HDF5 C library keeps global state and is not reliable under
//! concurrent handle creation, even on distinct files. One mutex
//! covers every open/parse/materialize call in this process; cache
//! hits on already-loaded in-memory data never touch it.

use std::sync::{Mutex, MutexGuard, Once, PoisonError};

static HDF5_LOCK: Mutex<()> = Mutex::new(());

/// Run `f` while holding the process-wide HDF5 lock.
///
/// Hold the lock for the whole open-to-materialize span, never just
/// the open: the first value read of a variable also touches HDF5
/// global state.
pub fn with_hdf5_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard: MutexGuard<'_, ()> = HDF5_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    f()
}

/// Silence HDF5's automatic error printing to stderr.
///
/// The HDF5 C library prints verbose diagnostics to stderr even when
/// errors are handled gracefully on the Rust side (e.g. probing a file
/// that turns out to be truncated). This disables that output via
/// `H5Eset_auto2` with null handlers. Safe to call repeatedly; only
/// the first call does anything.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: H5Eset_auto2 is thread-safe and passing null handlers
        // to disable error output is a documented valid use.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(
                hdf5_metno_sys::h5e::H5E_DEFAULT,
                None,
                std::ptr::null_mut(),
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_reentrant_across_calls() {
        let a = with_hdf5_lock(|| 1);
        let b = with_hdf5_lock(|| 2);
        assert_eq!(a + b, 3);
    }

    #[test]
    fn test_lock_serializes_threads() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let active = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let active = active.clone();
                std::thread::spawn(move || {
                    with_hdf5_lock(|| {
                        let now = active.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(now, 0, "two threads inside the guarded section");
                        std::thread::sleep(std::time::Duration::from_millis(2));
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }
}
