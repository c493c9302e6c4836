//! History log benchmark: durable single-line appends and full reads.

use codesentinel_agent::storage::read_history;
use codesentinel_agent::{HistoryEntry, HistoryLog};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::tempdir;

fn bench_append(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let log = HistoryLog::for_domain(dir.path(), "process");

    c.bench_function("history_append", |b| {
        b.iter(|| {
            let entry = HistoryEntry::new("process", "status_check").with("pid", black_box(4242u32));
            black_box(log.append(&entry)).unwrap()
        })
    });
}

fn bench_read(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let log = HistoryLog::for_domain(dir.path(), "process");
    for i in 0..500u32 {
        log.append(&HistoryEntry::new("process", "anomaly_scan").with("hits", i)).unwrap();
    }

    c.bench_function("history_read_500", |b| {
        b.iter(|| black_box(read_history(log.path())).unwrap())
    });
}

criterion_group!(benches, bench_append, bench_read);
criterion_main!(benches);
