use criterion::{criterion_group, criterion_main, Criterion};
use folio_collab::document::{ChangeUnit, Content};
use folio_collab::protocol::SyncMessage;
use folio_collab::relay::{RelayChannel, RoomRegistry};
use folio_collab::store::{DocumentStore, MemoryStore, RocksStore, StoreConfig};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

fn typical_change() -> ChangeUnit {
    ChangeUnit::new(json!({ "ops": [{ "retain": 120 }, { "insert": "hello" }] }))
}

fn large_content() -> Content {
    let ops: Vec<_> = (0..500)
        .map(|i| json!({ "insert": format!("Paragraph {i} of a long document.\n") }))
        .collect();
    Content::new(json!({ "ops": ops }))
}

fn bench_send_changes_encode(c: &mut Criterion) {
    let change = typical_change();

    c.bench_function("send_changes_encode", |b| {
        b.iter(|| {
            let msg = SyncMessage::send_changes(black_box("doc42"), black_box(1), black_box(&change));
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_receive_changes_decode(c: &mut Criterion) {
    let msg = SyncMessage::receive_changes(Uuid::new_v4(), "doc42", 1, typical_change().to_bytes());
    let encoded = msg.encode().unwrap();

    c.bench_function("receive_changes_decode", |b| {
        b.iter(|| {
            let msg = SyncMessage::decode(black_box(&encoded)).unwrap();
            black_box(msg.change_unit().unwrap());
        })
    });
}

fn bench_save_document_roundtrip(c: &mut Criterion) {
    let content = large_content();

    c.bench_function("save_document_roundtrip_500_ops", |b| {
        b.iter(|| {
            let encoded = SyncMessage::save_document("doc42", 1, black_box(&content)).encode().unwrap();
            black_box(SyncMessage::decode(&encoded).unwrap().content().unwrap());
        })
    });
}

fn bench_relay_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("relay_fanout_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let channel = RelayChannel::new();

                let mut receivers = Vec::new();
                for _ in 0..100 {
                    let (tx, rx) = mpsc::channel(16);
                    channel.add_peer(Uuid::new_v4(), tx).await;
                    receivers.push(rx);
                }

                let frame = Arc::new(vec![0u8; 64]);
                black_box(channel.broadcast_from(Uuid::nil(), black_box(frame)).await);
            });
        })
    });
}

fn bench_room_broadcast_1000_changes(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let change = typical_change();

    c.bench_function("room_broadcast_1000_changes_10_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let rooms = RoomRegistry::new();
                let sender = Uuid::new_v4();

                let mut receivers = Vec::new();
                for _ in 0..10 {
                    let (tx, rx) = mpsc::channel(1024);
                    rooms.join("doc42", Uuid::new_v4(), tx).await;
                    receivers.push(rx);
                }

                for clock in 0..1000u64 {
                    let msg = SyncMessage::receive_changes(sender, "doc42", clock, change.to_bytes());
                    black_box(rooms.broadcast("doc42", sender, &msg).await.unwrap());
                }
            });
        })
    });
}

fn bench_memory_store_save(c: &mut Criterion) {
    let store = MemoryStore::new();
    let content = large_content();

    c.bench_function("memory_store_save_500_ops", |b| {
        b.iter(|| {
            store.save(black_box("doc42"), black_box(&content)).unwrap();
        })
    });
}

fn bench_rocks_store_save_load(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(StoreConfig::for_testing(dir.path())).unwrap();
    let content = large_content();

    c.bench_function("rocks_store_save_load_500_ops", |b| {
        b.iter(|| {
            store.save("doc42", black_box(&content)).unwrap();
            black_box(store.load_or_create("doc42").unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_send_changes_encode,
    bench_receive_changes_decode,
    bench_save_document_roundtrip,
    bench_relay_fanout,
    bench_room_broadcast_1000_changes,
    bench_memory_store_save,
    bench_rocks_store_save_load,
);
criterion_main!(benches);
