use criterion::{criterion_group, criterion_main, Criterion, black_box};
use common_money::{apply_bps, Money, Rounding};

fn bench_service_charge(c: &mut Criterion) {
    let samples: Vec<i64> = (0..1_000).map(|i| i * 137 + 5).collect();
    c.bench_function("service_charge_half_up", |b| {
        b.iter(|| {
            for v in &samples { black_box(apply_bps(*v, 1500, Rounding::HalfUp)); }
        });
    });
    c.bench_function("percentage_discount_floor", |b| {
        b.iter(|| {
            for v in &samples { black_box(apply_bps(*v, 1250, Rounding::Floor)); }
        });
    });
}

fn bench_major_conversion(c: &mut Criterion) {
    let samples: Vec<Money> = (0..500).map(|i| Money::from_cents(i * 1_001)).collect();
    c.bench_function("to_major_and_back", |b| {
        b.iter(|| {
            for m in &samples { black_box(Money::from_major(&m.to_major()).ok()); }
        });
    });
}

criterion_group!(rounding, bench_service_charge, bench_major_conversion);
criterion_main!(rounding);
