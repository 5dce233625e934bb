use clap::Parser;
use serde_json::json;
use tokio::{io::AsyncWriteExt, net::TcpStream, time::Duration};

/// Connects to the fire alarm server as a single sensor and reports a
/// fixed reading on an interval
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "localhost")]
    server: String,

    #[arg(short, long, default_value_t = falarm_broker::DEFAULT_SENSOR_PORT)]
    port: u16,

    #[arg(long, default_value = "10-10")]
    sensor_id: String,

    #[arg(long, default_value = "49.0")]
    temperature: String,

    #[arg(long, default_value = "70")]
    battery: String,

    #[arg(long, default_value = "3")]
    smoke: String,

    #[arg(long, default_value = "300.0")]
    co2: String,

    /// Number of readings to send, then hold the connection open until ctrl-c
    #[arg(short, long, default_value_t = 3)]
    count: u32,

    #[arg(short, long, default_value_t = 1000)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut stream = TcpStream::connect((args.server.as_str(), args.port))
        .await
        .map_err(|e| {
            log::error!("Unable to connect to {}:{} {e:}", args.server, args.port);
            e
        })?;
    log::info!("Connected to {}:{}", args.server, args.port);

    // Values go over the wire as strings, the way field sensors send them
    let frame = json!({
        "sensorId": args.sensor_id,
        "temperature": args.temperature,
        "battery": args.battery,
        "smoke": args.smoke,
        "co2": args.co2,
    });
    let mut line = serde_json::to_vec(&frame)?;
    line.push(b'\n');

    let mut tick = tokio::time::interval(Duration::from_millis(args.interval_ms));
    for sent in 1..=args.count {
        tick.tick().await;
        stream.write_all(&line).await?;
        log::info!("Reading {sent:} of {} sent", args.count);
    }

    log::info!("Holding connection open, ctrl-c to disconnect");
    tokio::signal::ctrl_c().await?;
    stream.shutdown().await?;
    Ok(())
}
