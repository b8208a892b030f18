use criterion::{black_box, criterion_group, criterion_main, Criterion};
use livecode_collab::broadcast::{outbox, BroadcastGroup, ConnectionId};
use livecode_collab::hub::CollabHub;
use livecode_collab::presence::{RemoteCursors, UserColor, CursorState};
use livecode_collab::protocol::{
    ClientMessage, CodeUpdatePayload, CursorPosition, CursorSelection, ServerMessage, User,
};
use livecode_collab::registry::RoomRegistry;

fn sample_document(bytes: usize) -> String {
    "fn main() { println!(\"hi\"); }\n"
        .chars()
        .cycle()
        .take(bytes)
        .collect()
}

fn bench_code_change_encode(c: &mut Criterion) {
    let doc = sample_document(1024);

    c.bench_function("code_change_encode_1kb", |b| {
        b.iter(|| {
            let msg = ClientMessage::code_change(black_box("room-1"), black_box(doc.clone()), 7);
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_code_update_decode(c: &mut Criterion) {
    let msg = ServerMessage::CodeUpdate(CodeUpdatePayload {
        room_id: "room-1".into(),
        value: sample_document(1024),
        version: 8,
    });
    let encoded = msg.encode().unwrap();

    c.bench_function("code_update_decode_1kb", |b| {
        b.iter(|| {
            black_box(ServerMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_cursor_encode(c: &mut Criterion) {
    let user = User::new("u-1", "Alice");
    let selection = CursorSelection {
        start_line_number: 3,
        start_column: 1,
        end_line_number: 5,
        end_column: 12,
    };

    c.bench_function("cursor_move_encode", |b| {
        b.iter(|| {
            let msg = ClientMessage::cursor_move(
                "room-1",
                user.clone(),
                black_box(CursorPosition::new(5, 12)),
                Some(selection),
            );
            black_box(msg.encode().unwrap());
        })
    });
}

fn bench_broadcast_100_members(c: &mut Criterion) {
    let mut group = BroadcastGroup::new();
    let mut receivers = Vec::new();
    let origin = ConnectionId::new();
    for i in 0..100 {
        let (tx, rx) = outbox(16);
        group.add_member(ConnectionId::new(), User::new(format!("u{i}"), format!("User{i}")), tx);
        receivers.push(rx);
    }
    let update = ServerMessage::CodeUpdate(CodeUpdatePayload {
        room_id: "room-1".into(),
        value: sample_document(256),
        version: 2,
    });

    c.bench_function("broadcast_except_100_members", |b| {
        b.iter(|| {
            black_box(group.broadcast_except(&origin, update.clone()));
            for rx in &mut receivers {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

fn bench_registry_get_or_create(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = RoomRegistry::new();
    rt.block_on(async {
        for i in 0..1000 {
            registry.get_or_create(&format!("room-{i}")).await;
        }
    });

    c.bench_function("registry_get_existing_of_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(registry.get_or_create(black_box("room-500")).await);
            })
        })
    });
}

fn bench_apply_change(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let hub = CollabHub::new();
    let (tx, _rx) = outbox(16);
    let conn = rt.block_on(async {
        let conn = hub.connect(tx).await;
        hub.dispatch(&conn, ClientMessage::join("bench", User::new("w", "Writer")))
            .await;
        conn
    });
    let doc = sample_document(1024);

    c.bench_function("hub_change_code_no_peers", |b| {
        let mut version = 1;
        b.iter(|| {
            rt.block_on(async {
                let msg = ClientMessage::code_change("bench", doc.clone(), version);
                hub.dispatch(&conn, msg).await;
            });
            version += 1;
        })
    });
}

fn bench_remote_cursor_decorations(c: &mut Criterion) {
    let mut cursors = RemoteCursors::new();
    for i in 0..100u32 {
        cursors.upsert(
            User::new(format!("u{i}"), format!("User{i}")),
            CursorState {
                position: CursorPosition::new(i + 1, 4),
                selection: Some(CursorSelection {
                    start_line_number: i + 1,
                    start_column: 1,
                    end_line_number: i + 1,
                    end_column: 4,
                }),
            },
        );
    }

    c.bench_function("decorations_100_cursors", |b| {
        b.iter(|| black_box(cursors.decorations()))
    });
}

fn bench_user_color(c: &mut Criterion) {
    c.bench_function("user_color_from_id", |b| {
        b.iter(|| black_box(UserColor::from_user_id(black_box("a1b2c3d4-user"))))
    });
}

criterion_group!(
    benches,
    bench_code_change_encode,
    bench_code_update_decode,
    bench_cursor_encode,
    bench_broadcast_100_members,
    bench_registry_get_or_create,
    bench_apply_change,
    bench_remote_cursor_decorations,
    bench_user_color,
);
criterion_main!(benches);
