use bincode::{deserialize, serialize};
use clap::Parser;
use shared::{
    Packet, PlayerState, QAngle, Vec3, CLIENT_VERSION, DEFAULT_INTERPOLATION_DELAY, EYE_HEIGHT,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Scripted client that strafes, answers pings and shoots at the nearest enemy
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,
    /// How long to stay connected, in seconds
    #[clap(short, long, default_value = "10")]
    duration: u64,
    /// Opt out of lag compensation
    #[clap(long)]
    no_lag_compensation: bool,
}

/// Latest server snapshot and when it arrived.
struct ServerClock {
    server_time: f64,
    received_at: Instant,
}

impl ServerClock {
    fn estimate(&self) -> f64 {
        self.server_time + self.received_at.elapsed().as_secs_f64()
    }
}

fn aim_at(from: Vec3, to: Vec3) -> QAngle {
    let delta = to - from;
    let yaw = delta.y.atan2(delta.x).to_degrees();
    let flat = (delta.x * delta.x + delta.y * delta.y).sqrt();
    let pitch = -delta.z.atan2(flat).to_degrees();
    QAngle::new(pitch, yaw, 0.0)
}

fn nearest_enemy<'a>(players: &'a [PlayerState], me: &PlayerState) -> Option<&'a PlayerState> {
    players
        .iter()
        .filter(|p| p.team != me.team && p.alive)
        .min_by(|a, b| {
            let da = (a.origin - me.origin).length_sqr();
            let db = (b.origin - me.origin).length_sqr();
            da.total_cmp(&db)
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    let connect = Packet::Connect {
        client_version: CLIENT_VERSION,
        lag_compensation: !args.no_lag_compensation,
    };
    socket.send_to(&serialize(&connect)?, args.server).await?;
    println!("Sent connection request to {}", args.server);

    let mut buf = [0u8; 4096];
    let (len, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf)).await??;
    let (client_id, team) = match deserialize::<Packet>(&buf[..len])? {
        Packet::Connected { client_id, team } => (client_id, team),
        Packet::Disconnected { reason } => {
            println!("Server refused connection: {}", reason);
            return Ok(());
        }
        other => {
            println!("Expected Connected but got: {:?}", other);
            return Ok(());
        }
    };
    println!("Connected as client {} on team {}", client_id, team);

    let started = Instant::now();
    let mut clock: Option<ServerClock> = None;
    let mut players: Vec<PlayerState> = Vec::new();
    let mut input_sequence = 0u32;
    let mut fire_sequence = 0u32;
    let mut last_fire = Instant::now();

    while started.elapsed() < Duration::from_secs(args.duration) {
        if let Ok(Ok((len, _))) = timeout(Duration::from_millis(15), socket.recv_from(&mut buf)).await {
            match deserialize::<Packet>(&buf[..len]) {
                Ok(Packet::GameState {
                    server_time,
                    players: snapshot,
                    ..
                }) => {
                    clock = Some(ServerClock {
                        server_time,
                        received_at: Instant::now(),
                    });
                    players = snapshot;
                }
                Ok(Packet::Ping { server_time }) => {
                    socket
                        .send_to(&serialize(&Packet::Pong { server_time })?, args.server)
                        .await?;
                }
                Ok(Packet::HitConfirmed {
                    shooter,
                    target,
                    rewound_to,
                    ..
                }) => {
                    println!(
                        "Hit: client {} hit client {} (rewound to {:.3})",
                        shooter, target, rewound_to
                    );
                }
                Ok(Packet::Disconnected { reason }) => {
                    println!("Disconnected: {}", reason);
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => println!("Failed to deserialize packet: {}", e),
            }
        }

        // Strafe back and forth.
        input_sequence += 1;
        let phase = started.elapsed().as_secs_f32();
        let input = Packet::Input {
            sequence: input_sequence,
            timestamp: started.elapsed().as_millis() as u64,
            forward: 0.0,
            side: if (phase as u32) % 2 == 0 { 1.0 } else { -1.0 },
            crouch: false,
            view_angles: QAngle::default(),
        };
        socket.send_to(&serialize(&input)?, args.server).await?;

        let me = players.iter().find(|p| p.id == client_id);
        if let (Some(clock), Some(me)) = (&clock, me) {
            if last_fire.elapsed() >= Duration::from_millis(500) {
                if let Some(enemy) = nearest_enemy(&players, me) {
                    fire_sequence += 1;
                    last_fire = Instant::now();
                    let target = enemy.origin + Vec3::new(0.0, 0.0, EYE_HEIGHT * 0.5);
                    let fire = Packet::Fire {
                        sequence: fire_sequence,
                        command_time: clock.estimate(),
                        interpolation_delay: DEFAULT_INTERPOLATION_DELAY,
                        view_angles: aim_at(me.eye_position(), target),
                        range: 4096.0,
                    };
                    println!("Firing at client {}", enemy.id);
                    socket.send_to(&serialize(&fire)?, args.server).await?;
                }
            }
        }
    }

    socket
        .send_to(&serialize(&Packet::Disconnect)?, args.server)
        .await?;
    println!("Test client finished");
    Ok(())
}
