use criterion::{criterion_group, criterion_main, Criterion};
use propsync::mirror::Mirror;
use propsync::model::{PropertiesChanges, PropertyId, PropertyItem};
use propsync::protocol::{ClientMessage, Request, ServerMessage};
use propsync::store::{MemoryStore, RocksStore, StoreConfig, VersionStore};
use propsync::notifier::ChangeNotifier;
use std::hint::black_box;
use std::sync::Arc;
use uuid::Uuid;

fn changes(n: usize, version: u64) -> PropertiesChanges {
    PropertiesChanges {
        application: "billing".into(),
        last_version: version,
        items: (0..n)
            .map(|i| PropertyItem {
                host: format!("host{}", i % 4),
                property: format!("prop{i}"),
                version,
                value: Some("postgres://db.internal:5432/billing".into()),
            })
            .collect(),
    }
}

fn bench_request_encode(c: &mut Criterion) {
    let id = PropertyId::new("billing", "host1", "db.url");
    let msg = ClientMessage::Request {
        correlation_id: 1,
        auth_token: Some("token".into()),
        request: Request::update_property(Uuid::new_v4(), &id, "postgres://a", Some(41)),
    };

    c.bench_function("update_request_encode", |b| {
        b.iter(|| black_box(msg.encode().unwrap()))
    });
}

fn bench_changes_decode(c: &mut Criterion) {
    let msg = ServerMessage::Changes {
        subscriber_id: Uuid::new_v4(),
        changes: changes(32, 7),
    };
    let encoded = msg.encode().unwrap();

    c.bench_function("changes_decode_32_items", |b| {
        b.iter(|| black_box(ServerMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_memory_update(c: &mut Criterion) {
    let store = MemoryStore::new();
    store.create_application(Uuid::new_v4(), "billing").unwrap();
    store.create_host(Uuid::new_v4(), "host1").unwrap();
    let id = PropertyId::new("billing", "host1", "price");
    let mut version = None;

    c.bench_function("memory_store_update", |b| {
        b.iter(|| {
            let committed = store
                .update_property(Uuid::new_v4(), &id, "10", version)
                .unwrap();
            version = committed.receipt.version();
        })
    });
}

fn bench_rocks_update(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
    store.create_application(Uuid::new_v4(), "billing").unwrap();
    store.create_host(Uuid::new_v4(), "host1").unwrap();
    let id = PropertyId::new("billing", "host1", "price");
    let mut version = None;

    c.bench_function("rocks_store_update", |b| {
        b.iter(|| {
            let committed = store
                .update_property(Uuid::new_v4(), &id, "10", version)
                .unwrap();
            version = committed.receipt.version();
        })
    });
}

fn bench_publish_100_subscribers(c: &mut Criterion) {
    let store: Arc<dyn VersionStore> = Arc::new(MemoryStore::new());
    store.create_application(Uuid::new_v4(), "billing").unwrap();
    let notifier = ChangeNotifier::new(store, 1024);
    let mut feeds = Vec::new();
    for _ in 0..100 {
        let id = Uuid::new_v4();
        notifier.subscribe("billing", None, id).unwrap();
        feeds.push(notifier.open_feed(id).unwrap());
    }
    let batch = changes(1, 1);

    // Receivers are never drained; the ring overwrites, so publish cost
    // stays flat.
    c.bench_function("publish_100_subscribers", |b| {
        b.iter(|| black_box(notifier.publish(batch.clone())))
    });
    drop(feeds);
}

fn bench_mirror_apply(c: &mut Criterion) {
    let mirror = Mirror::new("billing");
    let mut version = 0;

    c.bench_function("mirror_apply_32_items", |b| {
        b.iter(|| {
            version += 1;
            black_box(mirror.apply_changes(&changes(32, version)));
        })
    });
}

criterion_group!(
    benches,
    bench_request_encode,
    bench_changes_decode,
    bench_memory_update,
    bench_rocks_update,
    bench_publish_100_subscribers,
    bench_mirror_apply,
);
criterion_main!(benches);
