use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nornicdb::wal::{OperationKind, Wal};
use nornicdb::SyncMode;
use tempfile::TempDir;

const APPENDS_PER_BATCH: usize = 64;

fn micro_wal(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/wal");
    group.sample_size(25);
    for mode in [SyncMode::Immediate, SyncMode::Os] {
        let mut harness = WalHarness::new(mode);
        group.throughput(Throughput::Elements(APPENDS_PER_BATCH as u64));
        group.bench_with_input(
            BenchmarkId::new("append", format!("{mode:?}")),
            &mode,
            |b, _| {
                b.iter(|| harness.append_batch(APPENDS_PER_BATCH));
            },
        );
    }
    group.finish();
}

struct WalHarness {
    _tmpdir: TempDir,
    wal: Wal,
    payload: Vec<u8>,
    counter: u8,
}

impl WalHarness {
    fn new(mode: SyncMode) -> Self {
        let tmpdir = tempfile::tempdir().expect("tmpdir");
        let (wal, _) = Wal::reopen(tmpdir.path(), mode, 64 * 1024 * 1024).expect("wal");
        Self {
            _tmpdir: tmpdir,
            wal,
            payload: vec![0xCD; 128],
            counter: 0,
        }
    }

    fn append_batch(&mut self, count: usize) {
        for _ in 0..count {
            self.payload[0] = self.counter;
            self.counter = self.counter.wrapping_add(1);
            self.wal
                .append(OperationKind::CreateNode, self.payload.clone())
                .expect("append");
        }
    }
}

criterion_group!(benches, micro_wal);
criterion_main!(benches);
