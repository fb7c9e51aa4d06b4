//! # Loopback Demo
//!
//! Runs two sessions against each other in one process over an in-memory
//! transport, or a relay host driven by a controller client, and prints a
//! checksum of the simulated state so runs can be compared.
//!
//! Run with: `cargo run --example loopback -- --frames 600 --delay 2`

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use clap::{Parser, ValueEnum};
use netplay_lockstep::hash::ContentHasher;
use netplay_lockstep::prelude::*;
use tracing::info;
use web_time::Instant;

const HOST: u8 = 1;
const GUEST: u8 = 2;
const PAD: u8 = 3;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DemoMode {
    /// Two peers in lockstep.
    Paired,
    /// One host, no peer.
    Solo,
    /// A host driven by a controller client.
    Relay,
}

#[derive(Debug, Parser)]
#[command(about = "Runs lockstep sessions over an in-memory transport")]
struct Args {
    /// Frames to simulate.
    #[arg(long, default_value_t = 600)]
    frames: usize,

    /// Frames of input delay.
    #[arg(long, default_value_t = 2)]
    delay: usize,

    /// Which session layout to run.
    #[arg(long, value_enum, default_value_t = DemoMode::Paired)]
    mode: DemoMode,
}

struct DemoConfig;

impl Config for DemoConfig {
    type Address = u8;
}

/// A tiny deterministic "game": a counter mixed with the held buttons.
#[derive(Default)]
struct CounterGame {
    held: [ButtonVector; 2],
    state: u32,
    frames: u32,
}

impl StepFunction for CounterGame {
    fn button_down(&mut self, slot: PlayerSlot, button: Button) {
        self.held[slot.index()].set(button, true);
    }

    fn button_up(&mut self, slot: PlayerSlot, button: Button) {
        self.held[slot.index()].set(button, false);
    }

    fn step(&mut self, frame: Frame) {
        if frame == Frame::ZERO {
            *self = Self::default();
        }
        let mut hasher = ContentHasher::new();
        hasher.update(&self.state.to_le_bytes());
        hasher.update(&[self.held[0].bits(), self.held[1].bits()]);
        self.state = hasher.finish_u32();
        self.frames += 1;
    }
}

/// Presses and releases buttons on a fixed schedule.
fn script(frame: usize, salt: usize) -> (Button, bool) {
    let button = Button::ALL[(frame / 11 + salt) % Button::COUNT];
    (button, (frame / 5 + salt) % 3 == 0)
}

fn log_events(name: &str, session: &mut NetplaySession<DemoConfig>) {
    for event in session.events() {
        info!(session = name, ?event, "event");
    }
}

fn run_paired(args: &Args, digest: &SessionDigest) {
    let interval = LockstepConfig::default().frame_interval;
    let mut host_transport = MemoryTransport::new(HOST);
    let mut guest_transport = MemoryTransport::new(GUEST);
    host_transport.connect(&mut guest_transport);

    let mut host = SessionBuilder::<DemoConfig>::new()
        .with_input_delay(args.delay)
        .start_session(host_transport)
        .expect("host config is valid");
    let mut guest = SessionBuilder::<DemoConfig>::new()
        .with_input_delay(args.delay)
        .with_local_slot(PlayerSlot::TWO)
        .start_session(guest_transport)
        .expect("guest config is valid");
    host.load_content(digest.clone());
    guest.load_content(digest.clone());

    let (mut host_game, mut guest_game) = (CounterGame::default(), CounterGame::default());
    let mut frame = 0;
    while (host_game.frames as usize) < args.frames {
        let (button, pressed) = script(frame, 0);
        host.set_source(button, PressSource::Keyboard, pressed);
        let (button, pressed) = script(frame, 4);
        guest.set_source(button, PressSource::Gamepad, pressed);

        apply_requests(host.tick(interval), &mut host_game);
        apply_requests(guest.tick(interval), &mut guest_game);
        log_events("host", &mut host);
        log_events("guest", &mut guest);
        frame += 1;
    }
    // Let the guest catch up on the frames the host already stepped.
    for _ in 0..args.delay + 2 {
        apply_requests(guest.tick(interval), &mut guest_game);
    }

    info!(
        frames = host_game.frames,
        host = format_args!("{:08x}", host_game.state),
        guest_frames = guest_game.frames,
        guest = format_args!("{:08x}", guest_game.state),
        "paired run finished"
    );
    println!("host  {:08x} after {} frames", host_game.state, host_game.frames);
    println!("guest {:08x} after {} frames", guest_game.state, guest_game.frames);
}

fn run_solo(args: &Args, digest: &SessionDigest) {
    let mut session = SessionBuilder::<DemoConfig>::new()
        .with_input_delay(args.delay)
        .with_mode(SessionMode::Solo)
        .start_session(MemoryTransport::new(HOST))
        .expect("solo config is valid");
    session.load_content(digest.clone());

    let interval = session.lockstep_config().frame_interval;
    let mut game = CounterGame::default();
    let mut frame = 0;
    while (game.frames as usize) < args.frames {
        let (button, pressed) = script(frame, 0);
        session.set_source(button, PressSource::Touch, pressed);
        apply_requests(session.tick(interval), &mut game);
        log_events("solo", &mut session);
        frame += 1;
    }
    println!("solo  {:08x} after {} frames", game.state, game.frames);
}

fn run_relay(args: &Args, digest: &SessionDigest) {
    let mut host_transport = MemoryTransport::new(HOST);
    let mut pad = MemoryTransport::new(PAD);
    host_transport.connect(&mut pad);

    let mut host = SessionBuilder::<DemoConfig>::new()
        .with_input_delay(args.delay)
        .with_mode(SessionMode::Relay)
        .start_session(host_transport)
        .expect("relay config is valid");
    host.load_content(digest.clone());

    let mut client = ControllerClient::new(PlayerSlot::ONE);
    pad.send_to(&client.hello(), &HOST);

    let interval = host.lockstep_config().frame_interval;
    let start = Instant::now();
    let mut game = CounterGame::default();
    let mut frame = 0;
    while (game.frames as usize) < args.frames {
        let now = start + interval * frame as u32;
        let (button, pressed) = script(frame, 2);
        let mut outgoing: Vec<_> = client
            .set_source(button, PressSource::Touch, pressed, now)
            .into_iter()
            .collect();
        outgoing.extend(client.poll(now));
        for msg in &outgoing {
            pad.send_to(msg, &HOST);
        }

        apply_requests(host.tick(interval), &mut game);
        log_events("relay", &mut host);
        frame += 1;
    }
    println!(
        "relay {:08x} after {} frames ({} controller)",
        game.state,
        game.frames,
        host.sync_status().attached_controllers
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let digest = SessionDigest::from_content("loopback", b"loopback demo content");
    info!(?args, digest = %digest.hash_hex(), "starting");

    match args.mode {
        DemoMode::Paired => run_paired(&args, &digest),
        DemoMode::Solo => run_solo(&args, &digest),
        DemoMode::Relay => run_relay(&args, &digest),
    }
}
