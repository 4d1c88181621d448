//! Benchmarks for name mangling and virtual table construction

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use translator::config::TranslatorConfig;
use translator::layout::vtable::virtual_table;
use translator::mangler::Mangler;
use translator::metadata::builder::ProgramBuilder;
use translator::metadata::{ModuleKind, PrimitiveType, TypeId};
use translator::{Program, TranslationSession};

/// A chain of classes, each overriding every virtual method of its base
/// and adding one of its own
fn deep_hierarchy(depth: usize) -> (Program, Vec<TypeId>) {
    let mut b = ProgramBuilder::new();
    let module = b.module("Bench", ModuleKind::Library);
    let object = b.object();
    let void = b.prim(PrimitiveType::Void);
    let int32 = b.prim(PrimitiveType::Int32);
    let mut types = Vec::with_capacity(depth);
    let mut base = object;
    for level in 0..depth {
        let ty = b.class(module, "Bench.Deep", &format!("Level{}", level), Some(base));
        for i in 0..=level {
            let m = b.virtual_method(ty, &format!("Method{}", i), void);
            b.param(m, "x", int32);
        }
        types.push(ty);
        base = ty;
    }
    (b.build().unwrap(), types)
}

fn benchmark_type_mangling(c: &mut Criterion) {
    let mut group = c.benchmark_group("type_mangling");
    for depth in [8, 32, 128] {
        let (program, types) = deep_hierarchy(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &types, |bench, types| {
            bench.iter(|| {
                for &ty in types {
                    let mut mangler = Mangler::new(&program);
                    black_box(mangler.mangle_type(ty));
                }
            })
        });
    }
    group.finish();
}

fn benchmark_method_mangling(c: &mut Criterion) {
    let mut group = c.benchmark_group("method_mangling");
    for depth in [8, 32] {
        let (program, types) = deep_hierarchy(depth);
        let methods: Vec<_> = types.iter().flat_map(|&t| program.ty(t).methods.clone()).collect();
        group.bench_with_input(BenchmarkId::from_parameter(methods.len()), &methods, |bench, methods| {
            bench.iter(|| {
                for &method in methods {
                    let mut mangler = Mangler::new(&program);
                    black_box(mangler.mangle_method(method));
                }
            })
        });
    }
    group.finish();
}

fn benchmark_virtual_tables(c: &mut Criterion) {
    let mut group = c.benchmark_group("virtual_tables");
    for depth in [8, 32] {
        let (program, types) = deep_hierarchy(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &types, |bench, types| {
            bench.iter(|| {
                let mut session = TranslationSession::new(&program, TranslatorConfig::default());
                for &ty in types {
                    black_box(virtual_table(&mut session, ty).unwrap().len());
                }
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_type_mangling,
    benchmark_method_mangling,
    benchmark_virtual_tables
);
criterion_main!(benches);
