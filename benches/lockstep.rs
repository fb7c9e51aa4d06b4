//! Benchmarks for the lockstep hot paths.
//!
//! Run with: cargo bench --bench lockstep

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use netplay_lockstep::network::codec;
use netplay_lockstep::{
    Button, ButtonVector, Config, Frame, HoldPolicy, InputAggregator, LockstepConfig,
    LockstepStepper, MemoryTransport, Message, PlayerSlot, PressSource, SessionBuilder,
    SessionDigest,
};
use std::hint::black_box;
use web_time::Instant;

struct BenchConfig;

impl Config for BenchConfig {
    type Address = u8;
}

fn bench_stepper(c: &mut Criterion) {
    let mut group = c.benchmark_group("LockstepStepper");

    for frames in [60usize, 600] {
        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(
            BenchmarkId::new("capture_store_drain", frames),
            &frames,
            |b, &frames| {
                let config = LockstepConfig::default();
                let mut out = Vec::with_capacity(frames * 4);
                b.iter(|| {
                    let mut stepper = LockstepStepper::new(&config, PlayerSlot::ONE);
                    out.clear();
                    for i in 0..frames {
                        stepper.begin_tick();
                        let local = ButtonVector::from_bits(i as u8);
                        let remote = ButtonVector::from_bits(!(i as u8));
                        let frame = stepper.capture_local(black_box(local)).unwrap();
                        stepper.store_remote(frame, PlayerSlot::TWO, remote).unwrap();
                        stepper.drain(&mut out);
                    }
                    black_box(out.len())
                });
            },
        );
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let message = Message::InputFrame {
        frame: Frame::new(12_345),
        player: 2,
        buttons: ButtonVector::NEUTRAL.with(Button::A).with(Button::Left),
    };
    let bytes = codec::encode(&message).unwrap();

    group.bench_function("encode_input_frame", |b| {
        b.iter(|| codec::encode(black_box(&message)));
    });
    group.bench_function("decode_input_frame", |b| {
        b.iter(|| codec::decode_message(black_box(&bytes)));
    });

    group.finish();
}

fn bench_aggregator(c: &mut Criterion) {
    let mut group = c.benchmark_group("InputAggregator");
    let now = Instant::now();

    group.bench_function("press_release_all_buttons", |b| {
        let mut aggregator = InputAggregator::new(HoldPolicy::None);
        b.iter(|| {
            for button in Button::ALL {
                aggregator.set_source(button, PressSource::Keyboard, true, now);
                aggregator.set_source(button, PressSource::Touch, true, now);
            }
            for button in Button::ALL {
                aggregator.set_source(button, PressSource::Keyboard, false, now);
                aggregator.set_source(button, PressSource::Touch, false, now);
            }
            black_box(aggregator.buttons())
        });
    });

    group.finish();
}

fn bench_paired_sessions(c: &mut Criterion) {
    let mut group = c.benchmark_group("NetplaySession");
    group.throughput(Throughput::Elements(60));

    group.bench_function("paired_second_over_memory_transport", |b| {
        let digest = SessionDigest::from_content("bench", b"bench");
        let interval = LockstepConfig::default().frame_interval;
        b.iter(|| {
            let mut host_transport = MemoryTransport::new(1u8);
            let mut guest_transport = MemoryTransport::new(2u8);
            host_transport.connect(&mut guest_transport);
            let mut host = SessionBuilder::<BenchConfig>::new()
                .start_session(host_transport)
                .unwrap();
            let mut guest = SessionBuilder::<BenchConfig>::new()
                .with_local_slot(PlayerSlot::TWO)
                .start_session(guest_transport)
                .unwrap();
            host.load_content(digest.clone());
            guest.load_content(digest.clone());

            let mut steps = 0;
            for _ in 0..62 {
                steps += host.tick(interval).len();
                steps += guest.tick(interval).len();
            }
            black_box(steps)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_stepper,
    bench_codec,
    bench_aggregator,
    bench_paired_sessions
);
criterion_main!(benches);
