#![allow(unused_macros)]

/// Helper macro for locking items
///
/// A poisoned lock is recovered, the data behind it is still structurally valid because every
/// critical section in this crate only inserts into or removes from ordered sets.
///
/// ```rust, ignore
///  let mut edges = lock!(slot.edges);
///  edges.callers.insert(caller);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let info = read_lock!(method.optimization_info);
///  println!("{}", info.force_inline());
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut info = write_lock!(method.optimization_info);
///  info.mark_force_inline();
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let force_inline = with_read!(method.optimization_info, |info| info.force_inline());
/// ```
macro_rules! with_read {
    ($rwlock:expr, $closure:expr) => {{
        let guard = read_lock!($rwlock);
        $closure(&*guard)
    }};
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  with_write!(method.optimization_info, |info| info.mark_force_inline());
/// ```
macro_rules! with_write {
    ($rwlock:expr, $closure:expr) => {{
        let mut guard = write_lock!($rwlock);
        $closure(&mut *guard)
    }};
}
