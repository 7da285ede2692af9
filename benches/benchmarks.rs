use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn compile_bench(c: &mut Criterion) {
    let grammar = include_str!("json.grammar");
    let options = lrgen::BuildOptions::default();
    c.bench_function("compile", |b| {
        b.iter(|| lrgen::build_parser(black_box(grammar), &options).unwrap())
    });
    c.bench_function("compile_and_render", |b| {
        b.iter(|| lrgen::build_parser_file(black_box(grammar), &options).unwrap())
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = compile_bench
}
criterion_main!(benches);
