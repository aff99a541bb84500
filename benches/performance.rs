//! Benchmarks for performance-critical paths
//!
//! Run with: cargo bench

use alloy::primitives::U256;
use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rust_decimal_macros::dec;

use dca_engine::execution::{crossed_milestones, price_from_sqrt_price_x96};
use dca_engine::ledger::{PaymentCommit, PaymentLedger, User};
use dca_engine::scheduling::CronSchedule;
use dca_engine::utils::{Cadence, PaymentSource};

/// Benchmark exact sqrtPriceX96 price derivation
fn bench_price_from_sqrt(c: &mut Criterion) {
    // Roughly a 60k USDC/cbBTC pool
    let sqrt = U256::from(4_090_000_000_000_000_000_000_000u128);

    c.bench_function("price_from_sqrt_price_x96", |b| {
        b.iter(|| black_box(price_from_sqrt_price_x96(black_box(sqrt), 6, 8)))
    });
}

/// Benchmark milestone detection
fn bench_milestones(c: &mut Criterion) {
    let thresholds = [25, 50, 75, 100];
    c.bench_function("crossed_milestones", |b| {
        b.iter(|| {
            black_box(crossed_milestones(
                black_box(dec!(400)),
                black_box(dec!(760)),
                dec!(1000),
                &thresholds,
            ))
        })
    });
}

/// Benchmark cron fire-time search
fn bench_cron_next(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2024, 5, 15, 12, 34, 0).unwrap();
    let mut group = c.benchmark_group("cron_next_after");

    for expr in ["*/5 * * * *", "0 0 * * 1", "30 9 1 1 *"] {
        let schedule = CronSchedule::parse(expr).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(expr), &schedule, |b, schedule| {
            b.iter(|| black_box(schedule.next_after(black_box(now))))
        });
    }

    group.finish();
}

/// Benchmark ledger commits against ledgers of increasing size
fn bench_ledger_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let mut group = c.benchmark_group("ledger_commit");

    for existing in [10usize, 1_000] {
        let ledger = PaymentLedger::in_memory();
        let user = User::new("0x00000000000000000000000000000000000000a1", Cadence::Daily, dec!(10), dec!(1000));
        rt.block_on(async {
            ledger.enroll_user(user.clone()).await.unwrap();
            for i in 0..existing {
                let commit = PaymentCommit::new(&user, &format!("0x{:064x}", i), PaymentSource::Executor)
                    .with_amounts(10_000_000, 1_000, dec!(100));
                ledger.commit_payment(commit).await.unwrap();
            }
        });

        let mut next = existing;
        group.bench_with_input(BenchmarkId::from_parameter(existing), &existing, |b, _| {
            b.iter(|| {
                next += 1;
                let commit = PaymentCommit::new(&user, &format!("0x{:064x}", next), PaymentSource::Executor)
                    .with_amounts(10_000_000, 1_000, dec!(100));
                rt.block_on(ledger.commit_payment(commit)).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_price_from_sqrt,
    bench_milestones,
    bench_cron_next,
    bench_ledger_commit,
);

criterion_main!(benches);
