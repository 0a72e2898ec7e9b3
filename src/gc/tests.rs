//! Tests for native references, call-scopes and deferred destruction.

use super::*;
use crate::error::Status;
use crate::{Engine, EngineConfig, Env};

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).unwrap()
}

#[test]
fn test_call_scope_registers_env() {
    let mut engine = engine();
    let env = engine.env().clone();

    assert!(CallScope::current_env().is_none());

    engine.with_scope(|_scope| {
        assert_eq!(CallScope::current_env(), Some(env.clone()));
        assert!(CallScope::is_active_for(&env));
        assert_eq!(Env::current(), Some(env.clone()));
    });

    assert!(CallScope::current_env().is_none());
    assert!(!CallScope::is_active_for(&env));
}

#[test]
fn test_nested_call_scopes_restore_outer_env() {
    let mut first = engine();
    let second = engine();
    let first_env = first.env().clone();
    let second_env = second.env().clone();

    first.with_scope(|_scope| {
        {
            let _inner = CallScope::enter(&second_env);
            assert!(CallScope::is_active_for(&second_env));
            assert!(!CallScope::is_active_for(&first_env));
        }

        assert!(CallScope::is_active_for(&first_env));
    });
}

#[test]
fn test_native_ref_counts() {
    let mut engine = engine();

    engine.with_scope(|scope| {
        let object = v8::Object::new(scope);
        let mut native = NativeRef::new(scope, object.into(), 1).unwrap();
        assert_eq!(native.ref_count(), 1);

        assert_eq!(native.refer(scope), Ok(2));
        assert_eq!(native.unref(scope), Ok(1));
        assert_eq!(native.unref(scope), Ok(0));
        assert_eq!(native.unref(scope), Err(Status::GenericFailure));

        // Still reachable through the local handle
        let value = native.get(scope).unwrap().unwrap();
        assert!(value.strict_equals(object.into()));
    });
}

#[test]
fn test_weak_native_ref_is_collected() {
    let mut engine = engine();

    let native = engine.with_scope(|scope| {
        let object = v8::Object::new(scope);
        NativeRef::new(scope, object.into(), 0).unwrap()
    });

    engine.collect_garbage();

    engine.with_scope(|scope| {
        assert!(native.get(scope).unwrap().is_none());
    });
}

#[test]
fn test_strong_native_ref_survives_gc() {
    let mut engine = engine();

    let native = engine.with_scope(|scope| {
        let object = v8::Object::new(scope);
        NativeRef::new(scope, object.into(), 1).unwrap()
    });

    engine.collect_garbage();

    engine.with_scope(|scope| {
        let value = native.get(scope).unwrap().unwrap();
        assert!(value.is_object());
    });
}

#[test]
fn test_refer_upgrades_live_weak_ref() {
    let mut engine = engine();

    let mut native = engine.with_scope(|scope| {
        let object = v8::Object::new(scope);
        let mut native = NativeRef::new(scope, object.into(), 0).unwrap();
        // Upgrade while the local still keeps the object alive
        native.refer(scope).unwrap();
        native
    });

    engine.collect_garbage();

    engine.with_scope(|scope| {
        assert!(native.get(scope).unwrap().is_some());
        native.unref(scope).unwrap();
    });

    engine.collect_garbage();

    engine.with_scope(|scope| {
        assert!(native.get(scope).unwrap().is_none());
    });
}

#[test]
fn test_native_ref_dropped_in_call_scope_is_released_immediately() {
    let mut engine = engine();
    let env = engine.env().clone();

    engine.with_scope(|scope| {
        let object = v8::Object::new(scope);
        let native = NativeRef::new(scope, object.into(), 1).unwrap();
        drop(native);
    });

    assert_eq!(env.pending_releases(), 0);
}

#[test]
fn test_native_ref_dropped_off_thread_is_deferred() {
    let mut engine = engine();
    let env = engine.env().clone();

    let native = engine.with_scope(|scope| {
        let object = v8::Object::new(scope);
        NativeRef::new(scope, object.into(), 1).unwrap()
    });

    // Dropped on another thread: queued, not reset there
    std::thread::spawn(move || drop(native)).join().unwrap();
    assert_eq!(env.pending_releases(), 1);

    engine.with_scope(|_scope| {});
    assert!(env.deferred().is_empty());
}

#[test]
fn test_native_ref_dropped_outside_call_scope_is_deferred() {
    let mut engine = engine();
    let env = engine.env().clone();

    let native = engine.with_scope(|scope| {
        let object = v8::Object::new(scope);
        NativeRef::new(scope, object.into(), 0).unwrap()
    });

    drop(native);
    assert_eq!(env.pending_releases(), 1);

    engine.with_scope(|_scope| {});
    assert_eq!(env.pending_releases(), 0);
}

#[test]
fn test_release_reports_closing_engine() {
    let mut engine = engine();
    let env = engine.env().clone();

    let native = engine.with_scope(|scope| {
        let object = v8::Object::new(scope);
        NativeRef::new(scope, object.into(), 1).unwrap()
    });

    env.close();
    assert_eq!(native.release(), Err(Status::Closing));

    // Still queued, and released with the engine
    assert_eq!(env.pending_releases(), 1);
    drop(engine);
    assert!(env.deferred().is_empty());
}

#[test]
fn test_engine_drop_processes_deferred_queue() {
    let mut engine = engine();
    let env = engine.env().clone();

    let native = engine.with_scope(|scope| {
        let object = v8::Object::new(scope);
        NativeRef::new(scope, object.into(), 1).unwrap()
    });

    drop(native);
    drop(engine);

    assert!(env.is_closing());
    assert!(env.deferred().is_empty());
}
