//! Codec and byte-pipe throughput benchmarks
//!
//! The hot path for every connected client is pack-parse on the codec and
//! write-read on the byte pipe; these benchmarks keep an eye on both.
//!
//! Run with: cargo bench --bench throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use slink_server::game::entity::spawn_snake;
use slink_server::game::world::World;
use slink_server::net::byte_pipe::BytePipe;
use slink_server::net::protocol::{
    next_packet, Entity, GameMasterFrame, NetMessage, Packet, PacketScan, Snake, TurnSnake,
};
use slink_server::util::vec2::Vec2;

fn master_frame(entity_count: u32) -> NetMessage {
    let entities: Vec<Entity> = (0..entity_count)
        .map(|id| Entity {
            id,
            etype: 2,
            x: id as i32 * 37,
            y: -(id as i32) * 19,
            size: 300,
            facing: slink_server::net::protocol::Vect2 { x: 0, y: 100 },
        })
        .collect();
    let snakes: Vec<Snake> = (0..entity_count / 11)
        .map(|id| Snake {
            id,
            name: "bench".into(),
            segments: (1..=10).map(|s| id + s).collect(),
            speed: 2000,
            turning: 0,
        })
        .collect();
    NetMessage::GameMasterFrame(GameMasterFrame {
        id: 1,
        entities,
        snakes,
        tick: 12345,
    })
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let turn = Packet::new(NetMessage::TurnSnake(TurnSnake {
        id: 7,
        direction: 1,
        tick_id: 500,
    }));
    group.bench_function("pack_turn", |b| {
        b.iter(|| black_box(turn.pack(black_box(3))))
    });

    let turn_bytes = turn.pack(3);
    group.bench_function("parse_turn", |b| {
        b.iter(|| match next_packet(black_box(&turn_bytes)) {
            PacketScan::Complete { packet, .. } => black_box(packet),
            _ => unreachable!(),
        })
    });

    let frame = Packet::new(master_frame(1000));
    let frame_bytes = frame.pack(1);
    group.throughput(Throughput::Bytes(frame_bytes.len() as u64));
    group.bench_function("pack_master_frame_1000", |b| {
        b.iter(|| black_box(frame.pack(black_box(1))))
    });
    group.bench_function("parse_master_frame_1000", |b| {
        b.iter(|| match next_packet(black_box(&frame_bytes)) {
            PacketScan::Complete { packet, .. } => black_box(packet),
            _ => unreachable!(),
        })
    });
    group.finish();
}

fn bench_byte_pipe(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let mut group = c.benchmark_group("byte_pipe");
    group.throughput(Throughput::Bytes(128 * 1024));

    group.bench_function("write_read_128k", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let pipe = std::sync::Arc::new(BytePipe::new(32 * 1024));
                let writer = pipe.clone();
                let producer = tokio::spawn(async move {
                    let chunk = [7u8; 1024];
                    for _ in 0..128 {
                        writer.write(&chunk).await;
                    }
                });
                let mut buf = [0u8; 4096];
                let mut total = 0usize;
                while total < 128 * 1024 {
                    total += pipe.read(&mut buf).await;
                }
                producer.await.unwrap();
                black_box(total)
            })
        })
    });
    group.finish();
}

fn bench_world_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("world");
    group.bench_function("tick_50_snakes", |b| {
        let mut world = World::new();
        let mut next_id = 0u32;
        for i in 0..50 {
            let pos = Vec2::new((i % 10) * 20_000 - 90_000, (i / 10) * 20_000 - 90_000);
            let id = next_id + 1;
            next_id += 11;
            let (snake, entities) = spawn_snake(id, "bench", pos);
            world.max_id = next_id;
            world.add_snake(snake, entities).unwrap();
        }
        b.iter(|| {
            black_box(world.tick().unwrap());
        })
    });
    group.finish();
}

criterion_group!(benches, bench_codec, bench_byte_pipe, bench_world_tick);
criterion_main!(benches);
