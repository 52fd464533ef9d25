use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quant_stream_pipeline::engine::SymbolWindow;

fn benchmark_window_push(c: &mut Criterion) {
    let mut window = SymbolWindow::new(100);
    let mut ts = 0i64;

    c.bench_function("symbol_window_push", |b| {
        b.iter(|| {
            ts += 1;
            window.push(black_box(100.0 + (ts % 17) as f64), black_box(0.5), black_box(ts));
            black_box(window.vwap());
        })
    });
}

criterion_group!(benches, benchmark_window_push);
criterion_main!(benches);
