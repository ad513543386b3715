//! Performance benchmarks for the compensation hot paths

use server::game::{GameState, TeamFilter};
use server::lag_compensation::{interpolate, CompensationRequest, LagCompensator, Sample};
use shared::{InputState, QAngle, Vec3};
use std::time::Instant;

const TICK: f32 = 1.0 / 64.0;

fn busy_world(players: u32) -> GameState {
    let mut game = GameState::with_cover();
    for id in 1..=players {
        let angle = id as f32 / players as f32 * std::f32::consts::TAU;
        let origin = Vec3::new(angle.cos() * 900.0, angle.sin() * 900.0, 0.0);
        game.add_player_at(id, (id % 2) as u8, origin);
    }
    game
}

fn steer(game: &mut GameState, players: u32, tick: u32) {
    for id in 1..=players {
        let input = InputState {
            sequence: tick,
            timestamp: tick as u64,
            forward: 1.0,
            side: 0.0,
            crouch: false,
            view_angles: QAngle::new(0.0, (tick * 4 + id * 37) as f32 % 360.0, 0.0),
        };
        game.apply_input(id, &input);
    }
}

/// Benchmarks history recording for a full server
#[test]
fn benchmark_record_tick() {
    let players = 32;
    let mut game = busy_world(players);
    let mut compensator = LagCompensator::default();

    let ticks = 640;
    let start = Instant::now();

    for tick in 0..ticks {
        steer(&mut game, players, tick);
        game.update_physics(TICK);
        compensator.record_tick(&game, game.time);
    }

    let duration = start.elapsed();
    println!(
        "Simulate + record: {} ticks x {} players in {:?} ({:.2} μs/tick)",
        ticks,
        players,
        duration,
        duration.as_micros() as f64 / ticks as f64
    );

    // Ten seconds of game time should simulate well under real time
    assert!(duration.as_millis() < 5000);
}

/// Benchmarks opening and closing a session against a full history
#[test]
fn benchmark_compensation_session() {
    let players = 32;
    let mut game = busy_world(players);
    let mut compensator = LagCompensator::default();
    for tick in 0..128 {
        steer(&mut game, players, tick);
        game.update_physics(TICK);
        compensator.record_tick(&game, game.time);
    }

    let filter = TeamFilter::from_world(&game, false);
    let now = game.time;
    let iterations = 200;
    let start = Instant::now();

    for i in 0..iterations {
        let shooter = game.player_handle(i % players + 1).unwrap();
        let request = CompensationRequest::new(shooter, 0.08, 0.1, now - 0.08);
        let session = compensator.begin_compensation(&mut game, &filter, now, &request);
        let _ = compensator.end_compensation(&mut game, session);
    }

    let duration = start.elapsed();
    println!(
        "Compensation sessions: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5000);
}

/// Benchmarks interpolation between two recorded samples
#[test]
fn benchmark_interpolation() {
    let mut game = busy_world(2);
    let handle = game.player_handle(1).unwrap();
    let older = Sample::capture(game.get(handle).unwrap());
    steer(&mut game, 2, 1);
    for _ in 0..8 {
        game.update_physics(TICK);
    }
    let newer = Sample::capture(game.get(handle).unwrap());

    let iterations = 100_000;
    let span = newer.simulation_time - older.simulation_time;
    let start = Instant::now();

    for i in 0..iterations {
        let target = older.simulation_time + span * (i % 100) as f64 / 100.0;
        let _ = interpolate(&older, &newer, target);
    }

    let duration = start.elapsed();
    println!(
        "Interpolation: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks hit-scan against a crowded arena
#[test]
fn benchmark_hitscan() {
    let players = 32;
    let game = busy_world(players);
    let shooter = game.player_handle(1).unwrap();
    let eye = game.get(shooter).unwrap().origin + Vec3::new(0.0, 0.0, 64.0);

    let iterations = 10_000;
    let start = Instant::now();

    for i in 0..iterations {
        let angle = (i % 360) as f32 * std::f32::consts::PI / 180.0;
        let direction = Vec3::new(angle.cos(), angle.sin(), -0.02);
        let _ = game.hitscan(shooter, eye, direction, 4096.0);
    }

    let duration = start.elapsed();
    println!(
        "Hitscan: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2000);
}
