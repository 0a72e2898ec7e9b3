//! Global V8 platform initialization.
//!
//! V8 can only be initialized once per process. Every engine goes through
//! [`get_platform`] before creating its isolate.

use std::sync::OnceLock;

static PLATFORM: OnceLock<v8::SharedRef<v8::Platform>> = OnceLock::new();

/// Get the global V8 platform, initializing it if necessary.
///
/// Safe to call from multiple threads; the platform is created once and the
/// same reference is returned to all callers.
pub fn get_platform() -> &'static v8::SharedRef<v8::Platform> {
    PLATFORM.get_or_init(|| {
        // Flags must be set before initialization.
        // Non-incremental marking keeps weak-reference collection deterministic.
        v8::V8::set_flags_from_string("--noincremental-marking");

        // Needed by Engine::collect_garbage.
        v8::V8::set_flags_from_string("--expose-gc");

        #[cfg(target_os = "macos")]
        v8::V8::set_flags_from_string("--single-threaded-gc");

        let platform = v8::new_default_platform(0, false).make_shared();
        v8::V8::initialize_platform(platform.clone());
        v8::V8::initialize();

        log::debug!("V8 platform initialized");
        platform
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_is_initialized_once() {
        let a = get_platform() as *const _;
        let b = std::thread::spawn(|| get_platform() as *const _ as usize)
            .join()
            .unwrap();
        assert_eq!(a as usize, b);
    }
}
