// oxal-core: Hot path lookup benchmarks
// get_by_id in None mode is the fast path every primitive call takes.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use oxal_core::{ObjectClass, ObjectId, ObjectTables};

fn setup() -> (ObjectTables, Vec<ObjectId>) {
    let tables = ObjectTables::new();
    let mut ids = Vec::new();
    for i in 0..ObjectClass::Queue.capacity() {
        let res = tables
            .allocate_new(ObjectClass::Queue, &format!("queue{i}"), ObjectId::UNDEFINED)
            .unwrap();
        ids.push(res.finalize(Ok(())).unwrap());
    }
    (tables, ids)
}

fn bench_check_id(c: &mut Criterion) {
    let (tables, ids) = setup();
    c.bench_function("check_id_hot_path", |b| {
        let mut cursor = 0usize;
        b.iter(|| {
            let id = ids[cursor % ids.len()];
            cursor = cursor.wrapping_add(1);
            black_box(tables.check_id(ObjectClass::Queue, black_box(id)).unwrap());
        })
    });
}

fn bench_stale_id_rejection(c: &mut Criterion) {
    let (tables, _) = setup();
    let stale = ObjectId::compose(ObjectClass::Queue, 12345);
    c.bench_function("check_id_stale_rejection", |b| {
        b.iter(|| {
            let _ = black_box(tables.check_id(ObjectClass::Queue, black_box(stale)));
        })
    });
}

fn bench_name_lookup(c: &mut Criterion) {
    let (tables, _) = setup();
    c.bench_function("get_by_name_scan", |b| {
        b.iter(|| {
            black_box(
                tables
                    .get_by_name(
                        oxal_core::LockMode::None,
                        ObjectClass::Queue,
                        black_box("queue31"),
                    )
                    .unwrap()
                    .token(),
            );
        })
    });
}

criterion_group!(
    benches,
    bench_check_id,
    bench_stale_id_rejection,
    bench_name_lookup
);
criterion_main!(benches);
