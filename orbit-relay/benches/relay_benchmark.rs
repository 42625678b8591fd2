use criterion::{criterion_group, criterion_main, Criterion};
use orbit_relay::broadcast::BroadcastGroup;
use orbit_relay::protocol::{
    ClientMessage, ConnectionId, Frame, Position, PresenceRecord, RoomVocabulary, ServerMessage,
};
use orbit_relay::region::{resolve_region, RegionTag};
use orbit_relay::room::Room;
use orbit_relay::store::{PresenceDb, PresenceStore, StoreConfig};
use std::hint::black_box;

fn bench_resolve_region(c: &mut Criterion) {
    c.bench_function("resolve_region", |b| {
        b.iter(|| {
            black_box(resolve_region(black_box(Some("de"))));
            black_box(resolve_region(black_box(Some("XX"))));
            black_box(resolve_region(black_box(None)));
        })
    });
}

fn bench_parse_waypoint(c: &mut Criterion) {
    let raw = r#"{"type":"waypoint","x":412.5,"y":-88}"#;

    c.bench_function("parse_waypoint", |b| {
        b.iter(|| {
            black_box(ClientMessage::parse(black_box(raw)).unwrap());
        })
    });
}

fn bench_encode_relay(c: &mut Criterion) {
    let msg = ServerMessage::Moved {
        id: ConnectionId::random(),
        position: Position::new(412, -88),
    };

    c.bench_function("encode_waypoint_relay", |b| {
        b.iter(|| {
            black_box(msg.encode(black_box(&RoomVocabulary::ALIENS)).unwrap());
        })
    });
}

fn bench_encode_init_100(c: &mut Criterion) {
    let participants: Vec<PresenceRecord> = (0..100)
        .map(|_| PresenceRecord::new(ConnectionId::random(), RegionTag::Unknown))
        .collect();
    let msg = ServerMessage::Init { participants };

    c.bench_function("encode_init_100_participants", |b| {
        b.iter(|| {
            black_box(msg.encode(&RoomVocabulary::ALIENS).unwrap());
        })
    });
}

fn bench_broadcast_100_peers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = BroadcastGroup::new(1024);

                let mut receivers = Vec::new();
                for i in 0..100 {
                    let rx = group.add_peer(ConnectionId::from(format!("peer{i}")), None).await;
                    receivers.push(rx);
                }

                let frame = Frame::from(r#"{"type":"waypoint","alienId":"peer0","x":1,"y":2}"#);
                let count = group.broadcast(black_box(frame), &["peer0".into()]).await;
                black_box(count);
            });
        })
    });
}

fn bench_relay_1000_moves(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("relay_1000_moves_50_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let room = Room::new(
                    "bench",
                    RoomVocabulary::ALIENS,
                    std::sync::Arc::new(orbit_relay::store::MemoryPresenceStore::new()),
                    2048,
                );

                let mut receivers = Vec::new();
                for i in 0..50 {
                    receivers.push(room.join(format!("peer{i}").into(), Some("US")).await);
                }

                let sender = ConnectionId::from("peer0");
                for i in 0..1000u32 {
                    let raw = format!(r#"{{"type":"waypoint","x":{i},"y":{i}}}"#);
                    black_box(room.on_message(&sender, &raw).await);
                }
            });
        })
    });
}

fn bench_rocks_put_list(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let db = PresenceDb::open(StoreConfig::for_testing(dir.path().join("bench"))).unwrap();
    let store = db.room_store("main");
    for i in 0..100 {
        store
            .put(&PresenceRecord::new(format!("resident{i}").into(), RegionTag::Unknown))
            .unwrap();
    }

    c.bench_function("rocks_put_list_delete_100", |b| {
        b.iter(|| {
            let record = PresenceRecord::new(ConnectionId::random(), resolve_region(Some("FI")));
            store.put(&record).unwrap();
            black_box(store.list().unwrap());
            store.delete(&record.id).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_resolve_region,
    bench_parse_waypoint,
    bench_encode_relay,
    bench_encode_init_100,
    bench_broadcast_100_peers,
    bench_relay_1000_moves,
    bench_rocks_put_list,
);
criterion_main!(benches);
