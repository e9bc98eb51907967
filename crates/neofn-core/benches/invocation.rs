use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use neofn_core::parser::parse_module;
use neofn_core::{BufferedSink, Context, ExecutionEngine};
use serde_json::json;

const TRIVIAL: &str = "def handler(p):\n    return p['x'] + 1\n";

const LOOP: &str = "\
def handler(p):
    total = 0
    for i in range(p['n']):
        if i % 3 == 0:
            total += i
    return total
";

const STORAGE: &str = "\
def handler(p):
    store = neo_service.storage
    for i in range(p['n']):
        key = 'k' + str(i)
        store.set(key, i)
        store.get(key)
    return len(params)
";

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse/loop", |b| b.iter(|| parse_module(black_box(LOOP))));
}

fn bench_invoke(c: &mut Criterion) {
    let engine = ExecutionEngine::new();
    let sink = BufferedSink::new();

    c.bench_function("invoke/trivial", |b| {
        b.iter(|| {
            let mut context = Context::new();
            engine.execute(black_box(TRIVIAL), "handler", &json!({"x": 41}), &mut context, &sink)
        })
    });

    let mut group = c.benchmark_group("invoke");
    for n in [10u64, 100, 1_000] {
        group.bench_with_input(BenchmarkId::new("loop", n), &n, |b, &n| {
            b.iter(|| {
                let mut context = Context::new();
                engine.execute(LOOP, "handler", &json!({ "n": n }), &mut context, &sink)
            })
        });
        group.bench_with_input(BenchmarkId::new("storage", n), &n, |b, &n| {
            b.iter(|| {
                let mut context = Context::new();
                engine.execute(STORAGE, "handler", &json!({ "n": n }), &mut context, &sink)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_invoke);
criterion_main!(benches);
