//! Datum 갱신 경로 벤치마크

use chrono::Utc;
use criterion::{Criterion, criterion_group, criterion_main};

use logmet_metrics::{Datum, Kind, Metric};

fn bench_inc_scalar(c: &mut Criterion) {
    let d = Datum::new_int();
    let ts = Utc::now();
    c.bench_function("datum_inc_by", |b| {
        b.iter(|| {
            d.inc_by(1, ts).unwrap();
        })
    });
}

fn bench_observe_histogram(c: &mut Criterion) {
    let d = Datum::new_buckets(vec![0.001, 0.01, 0.1, 1.0, 10.0]);
    let ts = Utc::now();
    c.bench_function("datum_observe", |b| {
        let mut x = 0.0f64;
        b.iter(|| {
            x = (x + 0.37) % 20.0;
            d.observe(x, ts).unwrap();
        })
    });
}

fn bench_get_datum_dimensioned(c: &mut Criterion) {
    let m = Metric::new(
        "bench",
        "hits",
        Kind::Counter,
        vec!["host".to_owned(), "code".to_owned()],
    );
    // 미리 몇 개의 레이블 집합을 생성해 조회 경로를 측정
    for host in ["a", "b", "c", "d"] {
        for code in ["200", "404", "500"] {
            m.get_datum(&[host, code]).unwrap();
        }
    }
    c.bench_function("metric_get_datum_existing", |b| {
        b.iter(|| m.get_datum(&["c", "404"]).unwrap())
    });
}

criterion_group!(
    benches,
    bench_inc_scalar,
    bench_observe_histogram,
    bench_get_datum_dimensioned
);
criterion_main!(benches);
