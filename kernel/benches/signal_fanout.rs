//! Signal fan-out benchmarks
//!
//! Measures `update_state` with many attached observers and the `wait_one`
//! fast path on an already-satisfied object.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use kaal_kobject::objects::{HandleId, Notification, ObserverFlags};
use kaal_kobject::syscall;
use kaal_kobject::{Deadline, Dispatcher, HandleTable, Signals, StateObserver};

struct Counter(AtomicU32);

impl StateObserver for Counter {
    fn on_initialize(&self, _initial: Signals) -> ObserverFlags {
        ObserverFlags::empty()
    }

    fn on_state_change(&self, _new_state: Signals) -> ObserverFlags {
        self.0.fetch_add(1, Ordering::Relaxed);
        ObserverFlags::empty()
    }

    fn on_cancel(&self, _handle: HandleId) -> ObserverFlags {
        ObserverFlags::empty()
    }
}

fn bench_update_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_state");
    for observers in [1usize, 16, 128] {
        let notification = Notification::new();
        for _ in 0..observers {
            notification
                .base()
                .add_observer(Arc::new(Counter(AtomicU32::new(0))));
        }
        group.bench_with_input(BenchmarkId::from_parameter(observers), &notification, |b, n| {
            b.iter(|| {
                n.signal(Signals::empty(), Signals::USER_0).unwrap();
                n.signal(Signals::USER_0, Signals::empty()).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_wait_one_satisfied(c: &mut Criterion) {
    let table = HandleTable::new();
    let value = syscall::notification_create(&table).unwrap();
    syscall::object_signal(&table, value, Signals::empty(), Signals::USER_0).unwrap();

    c.bench_function("wait_one_satisfied", |b| {
        b.iter(|| syscall::wait_one(&table, value, Signals::USER_0, Deadline::Infinite))
    });
}

criterion_group!(benches, bench_update_state, bench_wait_one_satisfied);
criterion_main!(benches);
