//! Benchmarks for JsReference
//!
//! Measures:
//! - Create + dispose inside a call-scope (immediate release)
//! - get_value on a strong reference
//! - Weak/strong toggling
//! - Deferred release from a host thread

use criterion::{Criterion, criterion_group, criterion_main};
use jsbridge_v8::{Engine, EngineConfig, JsReference};
use std::hint::black_box;

fn bench_create_dispose(c: &mut Criterion) {
    let mut engine = Engine::new(EngineConfig::default()).unwrap();

    c.bench_function("reference_create_dispose", |b| {
        b.iter(|| {
            engine.with_scope(|scope| {
                let object = v8::Object::new(scope);
                let reference = JsReference::new(scope, object.into(), false).unwrap();
                reference.dispose().unwrap();
            });
        });
    });
}

fn bench_get_value(c: &mut Criterion) {
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    let reference = engine.with_scope(|scope| {
        let object = v8::Object::new(scope);
        JsReference::new(scope, object.into(), false).unwrap()
    });

    c.bench_function("reference_get_value", |b| {
        b.iter(|| {
            engine.with_scope(|scope| {
                let value = reference.get_value(scope).unwrap();
                black_box(value.is_some());
            });
        });
    });

    drop(reference);
}

fn bench_toggle_strength(c: &mut Criterion) {
    let mut engine = Engine::new(EngineConfig::default()).unwrap();
    let reference = engine.with_scope(|scope| {
        let object = v8::Object::new(scope);
        JsReference::new(scope, object.into(), false).unwrap()
    });

    c.bench_function("reference_toggle_strength", |b| {
        b.iter(|| {
            engine.with_scope(|scope| {
                // Keep the value alive across the weak window
                let _value = reference.get_value(scope).unwrap();
                reference.make_weak(scope).unwrap();
                reference.make_strong(scope).unwrap();
            });
        });
    });

    drop(reference);
}

/// Benchmark: drop on a host thread, drain on the next call-scope
fn bench_deferred_release(c: &mut Criterion) {
    let mut engine = Engine::new(EngineConfig::default()).unwrap();

    c.bench_function("reference_deferred_release", |b| {
        b.iter(|| {
            let references: Vec<JsReference> = engine.with_scope(|scope| {
                (0..64)
                    .map(|_| {
                        let object = v8::Object::new(scope);
                        JsReference::new(scope, object.into(), false).unwrap()
                    })
                    .collect()
            });

            std::thread::spawn(move || drop(references)).join().unwrap();
            engine.with_scope(|_scope| {});
        });
    });
}

criterion_group!(
    benches,
    bench_create_dispose,
    bench_get_value,
    bench_toggle_strength,
    bench_deferred_release
);
criterion_main!(benches);
