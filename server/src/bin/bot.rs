use clap::Parser;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::{
    ClientFrame, Colour, Direction, FrameBuffer, Health, Name, Position, ServerFrame, PLAYFIELD_MAX,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::time::{interval, MissedTickBehavior};

const NAMES: [&str; 8] = [
    "Ace", "Blaze", "Comet", "Dash", "Echo", "Flint", "Ghost", "Hex",
];
const DIRECTIONS: [Direction; 4] = [
    Direction::Up,
    Direction::Down,
    Direction::Left,
    Direction::Right,
];

/// Load-test client: connects a swarm of bots that wander around and shoot
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port
    #[clap(short, long, default_value = "6000")]
    port: u16,
    /// Number of bots to connect
    #[clap(short, long, default_value = "4")]
    bots: usize,
    /// Seconds each bot stays connected
    #[clap(short, long, default_value = "30")]
    seconds: u64,
    /// Moves per second per bot
    #[clap(short, long, default_value = "10")]
    rate: u32,
    /// Chance of firing a laser on each move
    #[clap(long, default_value = "0.1")]
    fire_chance: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let mut tasks = Vec::with_capacity(args.bots);
    for bot in 0..args.bots {
        let address = address.clone();
        let lifetime = Duration::from_secs(args.seconds);
        let step = Duration::from_secs_f64(1.0 / f64::from(args.rate.max(1)));
        let fire_chance = args.fire_chance.clamp(0.0, 1.0);

        tasks.push(tokio::spawn(async move {
            if let Err(e) = run_bot(bot, &address, lifetime, step, fire_chance).await {
                warn!("Bot {} failed: {}", bot, e);
            }
        }));
    }

    for task in tasks {
        task.await?;
    }
    info!("All bots finished");
    Ok(())
}

async fn run_bot(
    bot: usize,
    address: &str,
    lifetime: Duration,
    step: Duration,
    fire_chance: f64,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let stream = TcpStream::connect(address).await?;
    info!("Bot {} connected from {}", bot, stream.local_addr()?);
    let (reader, mut writer) = stream.into_split();
    let listener = tokio::spawn(listen(bot, reader));

    let mut rng = StdRng::from_entropy();
    let name = NAMES.choose(&mut rng).copied().unwrap_or("Bot");
    let mut x: i32 = rng.gen_range(0..=PLAYFIELD_MAX);
    let mut y: i32 = rng.gen_range(0..=PLAYFIELD_MAX);

    let hello = [
        ClientFrame::Colour(Colour::new(rng.gen(), rng.gen(), rng.gen())),
        ClientFrame::Name(Name::new(name)?),
        ClientFrame::Position(Position::new(x, y)?),
        ClientFrame::Health(Health::new(100)?),
    ];
    for frame in &hello {
        writer.write_all(frame.encode().as_bytes()).await?;
    }

    let mut ticker = interval(step);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = tokio::time::Instant::now() + lifetime;
    let mut shots = 0u32;

    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;

        let direction = *DIRECTIONS.choose(&mut rng).unwrap_or(&Direction::Up);
        let (dx, dy) = direction.step();
        x = (x + dx).clamp(0, PLAYFIELD_MAX);
        y = (y + dy).clamp(0, PLAYFIELD_MAX);
        let position = Position::new(x, y)?;

        let mut batch = ClientFrame::Position(position).encode();
        if rng.gen_bool(fire_chance) {
            batch.push_str(
                &ClientFrame::SpawnLaser {
                    direction,
                    origin: position,
                }
                .encode(),
            );
            shots += 1;
        }
        writer.write_all(batch.as_bytes()).await?;
    }

    writer.write_all(ClientFrame::Disconnect.encode().as_bytes()).await?;
    let received = listener.await?;
    info!("Bot {} done: fired {} lasers, received {} frames", bot, shots, received);
    Ok(())
}

/// Decodes everything the server sends until it hangs up; returns the frame count.
async fn listen(bot: usize, mut reader: OwnedReadHalf) -> usize {
    let mut buffer = FrameBuffer::new();
    let mut chunk = [0u8; 4096];
    let mut received = 0;

    loop {
        let len = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(len) => len,
            Err(e) => {
                debug!("Bot {} read error: {}", bot, e);
                break;
            }
        };
        buffer.push(&chunk[..len]);

        for frame in buffer.drain_frames() {
            received += 1;
            match ServerFrame::decode(&frame) {
                Ok(ServerFrame::Heartbeat) => {}
                Ok(ServerFrame::Disconnect) => info!("Bot {} was disconnected by the server", bot),
                Ok(other) => debug!("Bot {} received {:?}", bot, other),
                Err(e) => warn!("Bot {} could not decode {:?}: {}", bot, frame, e),
            }
        }
    }
    received
}
