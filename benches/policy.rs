use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gridsync_lib::core::{DecisionSummary, DiffEntry, ReconciliationPolicy, SideInfo, Watermarks};

/// 生成一棵混合的差异树：单边、未变化、更新、冲突各占一部分
fn generate_entries(count: usize) -> Vec<DiffEntry> {
    (0..count)
        .map(|i| {
            let path = format!("dir{}/file{}.dat", i % 64, i);
            let time = 1_000_000 + (i as i64 % 5000);
            match i % 5 {
                0 => DiffEntry::local_only(path, SideInfo::data_object(Some(time), 4096)),
                1 => DiffEntry::remote_only(path, SideInfo::data_object(Some(time), 4096)),
                2 => DiffEntry::both(
                    path,
                    SideInfo::data_object(Some(time), 4096),
                    SideInfo::data_object(Some(time), 4096),
                ),
                3 => DiffEntry::both(
                    path,
                    SideInfo::data_object(Some(time + 60), 8192),
                    SideInfo::data_object(Some(time), 4096),
                ),
                _ => DiffEntry::both(
                    path,
                    SideInfo::data_object(Some(time), 100),
                    SideInfo::data_object(Some(time), 200),
                ),
            }
        })
        .collect()
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let policy = ReconciliationPolicy::new(Watermarks::new(1_000_500, 1_000_500), true);

    for size in [1_000, 10_000, 100_000] {
        let entries = generate_entries(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &entries, |b, entries| {
            b.iter(|| {
                let mut summary = DecisionSummary::default();
                for entry in entries {
                    summary.record(&policy.classify(black_box(entry)));
                }
                black_box(summary)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_classify);
criterion_main!(benches);
