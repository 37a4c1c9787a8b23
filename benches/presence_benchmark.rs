use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use checkmark_collab::presence::{user_color, PresenceState};
use checkmark_collab::protocol::{OutboundMessage, PresenceUser, WsMessage};

fn sample_user(id: &str) -> PresenceUser {
    PresenceUser {
        id: id.to_string(),
        name: "Alice".to_string(),
        avatar: "alice.png".to_string(),
        color: "#3B82F6".to_string(),
        cursor: None,
    }
}

fn bench_envelope_encode(c: &mut Criterion) {
    let msg = OutboundMessage::cursor_move("ws-1", "user-1", 128.0, 256.0).stamped();

    c.bench_function("envelope_encode_cursor_move", |b| {
        b.iter(|| {
            black_box(black_box(&msg).encode().unwrap());
        })
    });
}

fn bench_envelope_decode(c: &mut Criterion) {
    let encoded = OutboundMessage::cursor_move("ws-1", "user-1", 128.0, 256.0)
        .stamped()
        .encode()
        .unwrap();

    c.bench_function("envelope_decode_cursor_move", |b| {
        b.iter(|| {
            black_box(WsMessage::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_join_encode(c: &mut Criterion) {
    let msg = OutboundMessage::presence_join("ws-1", sample_user("user-1")).stamped();

    c.bench_function("envelope_encode_presence_join", |b| {
        b.iter(|| {
            black_box(black_box(&msg).encode().unwrap());
        })
    });
}

fn bench_user_color(c: &mut Criterion) {
    c.bench_function("user_color_short_id", |b| {
        b.iter(|| black_box(user_color(black_box("user-42"))))
    });

    let long_id = "0123456789abcdef0123456789abcdef";
    c.bench_function("user_color_32_char_id", |b| {
        b.iter(|| black_box(user_color(black_box(long_id))))
    });
}

fn bench_reducer_apply_join(c: &mut Criterion) {
    let join = OutboundMessage::presence_join("ws-1", sample_user("user-1")).stamped();
    let mut state = PresenceState::new();

    c.bench_function("reducer_apply_join", |b| {
        b.iter(|| {
            state.apply(black_box(&join));
        })
    });
}

fn bench_reducer_apply_cursor_move(c: &mut Criterion) {
    let mut state = PresenceState::new();
    state.apply(&OutboundMessage::presence_join("ws-1", sample_user("user-1")).stamped());
    let cursor = OutboundMessage::cursor_move("ws-1", "user-1", 5.0, 9.0).stamped();

    c.bench_function("reducer_apply_cursor_move", |b| {
        b.iter(|| {
            state.apply(black_box(&cursor));
        })
    });
}

fn bench_fold_64_joins(c: &mut Criterion) {
    let joins: Vec<WsMessage> = (0..64)
        .map(|i| {
            OutboundMessage::presence_join("ws-1", sample_user(&format!("user-{i}"))).stamped()
        })
        .collect();

    c.bench_function("fold_64_joins", |b| {
        b.iter(|| {
            let mut state = PresenceState::new();
            for join in &joins {
                state.apply(join);
            }
            black_box(state.user_count());
        })
    });
}

criterion_group!(
    benches,
    bench_envelope_encode,
    bench_envelope_decode,
    bench_join_encode,
    bench_user_color,
    bench_reducer_apply_join,
    bench_reducer_apply_cursor_move,
    bench_fold_64_joins,
);
criterion_main!(benches);
