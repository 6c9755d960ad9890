//! Benchmarks for call-site dispatch and compiled code.
//!
//! Run with: `cargo bench --bench call_site`

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use dynex_core::expr::BinaryOp;
use dynex_core::{
    CacheOptions, CallSite, CompileOptions, DefaultBinder, Expr, LabelTarget, Parameter, Signature, Type, Value,
    compile,
};

fn add_site(options: CacheOptions) -> CallSite {
    CallSite::new(
        Arc::new(DefaultBinder::binary(BinaryOp::Add)),
        Signature::new([Type::Object, Type::Object], Type::Object),
        options,
        None,
    )
}

fn shapes() -> Vec<[Value; 2]> {
    vec![
        [Value::Int(1), Value::Int(2)],
        [Value::Float(1.0), Value::Float(2.0)],
        [Value::str("a"), Value::str("b")],
        [Value::Int(1), Value::Float(2.0)],
        [Value::Float(1.0), Value::Int(2)],
    ]
}

fn bench_site_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("site_hit");

    // Number of distinct shapes cycled through a warm site.
    for count in [1, 2, 5] {
        let site = add_site(CacheOptions::default());
        let inputs: Vec<_> = shapes().into_iter().take(count).collect();
        for args in &inputs {
            site.invoke(args).unwrap();
        }
        group.bench_with_input(BenchmarkId::new("shapes", count), &inputs, |b, inputs| {
            b.iter(|| {
                for args in inputs {
                    black_box(site.invoke(black_box(args)).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn bench_megamorphic(c: &mut Criterion) {
    let site = add_site(CacheOptions::default().with_capacity(2));
    let inputs = shapes();
    c.bench_function("site_megamorphic", |b| {
        b.iter(|| {
            for args in &inputs {
                black_box(site.invoke(black_box(args)).unwrap());
            }
        });
    });
}

/// `sum(n) = 0 + 1 + ... + (n - 1)` as a compiled loop.
fn bench_compiled_loop(c: &mut Criterion) {
    let n = Parameter::new(Type::Int, "n").unwrap();
    let i = Parameter::new(Type::Int, "i").unwrap();
    let sum = Parameter::new(Type::Int, "sum").unwrap();
    let brk = LabelTarget::new(Type::Int, Some("brk"));

    let body = Expr::block(vec![
        Expr::if_then(
            Expr::make_binary(BinaryOp::GreaterThanOrEqual, i.to_expr(), n.to_expr()).unwrap(),
            Expr::break_(&brk, Some(sum.to_expr())).unwrap(),
        )
        .unwrap(),
        Expr::assign(sum.to_expr(), Expr::add(sum.to_expr(), i.to_expr()).unwrap()).unwrap(),
        Expr::assign(i.to_expr(), Expr::add(i.to_expr(), Expr::constant(Value::Int(1))).unwrap()).unwrap(),
    ])
    .unwrap();
    let looped = Expr::make_loop(body, Some(brk), None).unwrap();
    let lambda = Expr::lambda(
        Some("sum"),
        vec![n],
        Expr::block_with(vec![i, sum], vec![looped]).unwrap(),
    )
    .unwrap();
    let f = compile(&lambda, &CompileOptions::default()).unwrap();

    c.bench_function("compiled_loop_1000", |b| {
        b.iter(|| black_box(f.invoke(&[black_box(Value::Int(1000))]).unwrap()));
    });
}

criterion_group!(benches, bench_site_hits, bench_megamorphic, bench_compiled_loop);
criterion_main!(benches);
