use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use strata_join::{
    GenericKeyHandler, HashTableBuilder, HashTableGeometry, HashTableLayout, JoinColumn,
    JoinColumnTypeInfo,
};

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_table_build");
    for &num_rows in &[10_000usize, 100_000] {
        let values: Vec<i64> = (0..num_rows as i64).map(|i| i * 3 + 1).collect();
        let columns = [JoinColumn::from_i64_values(&values)];
        let types = [JoinColumnTypeInfo {
            elem_size: 8,
            null_val: i64::MIN,
            uses_bw_eq: false,
        }];

        group.bench_with_input(
            BenchmarkId::new("one_to_one", num_rows),
            &num_rows,
            |b, &n| {
                b.iter(|| {
                    let handler = GenericKeyHandler::new(&columns, &types, &[], &[]);
                    let geometry =
                        HashTableGeometry::new(HashTableLayout::OneToOne, 8, 1, 2 * n, 0);
                    HashTableBuilder::build_on_cpu(&handler, geometry, n, 0).unwrap()
                })
            },
        );

        group.bench_with_input(
            BenchmarkId::new("one_to_many", num_rows),
            &num_rows,
            |b, &n| {
                b.iter(|| {
                    let handler = GenericKeyHandler::new(&columns, &types, &[], &[]);
                    let geometry =
                        HashTableGeometry::new(HashTableLayout::OneToMany, 8, 1, 2 * n, n);
                    HashTableBuilder::build_on_cpu(&handler, geometry, n, 0).unwrap()
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_build);
criterion_main!(benches);
