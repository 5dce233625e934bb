use clap::Parser;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpStream,
};

/// Connects to the fire alarm server's monitor port and prints every
/// sensor update and alert it relays
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "localhost")]
    server: String,

    #[arg(short, long, default_value_t = falarm_broker::DEFAULT_MONITOR_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let stream = TcpStream::connect((args.server.as_str(), args.port))
        .await
        .map_err(|e| {
            log::error!("Unable to connect to {}:{} {e:}", args.server, args.port);
            e
        })?;
    log::info!("Monitoring {}:{}", args.server, args.port);

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        let event: serde_json::Value = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Unreadable line from server {e:}");
                continue;
            }
        };
        println!("{}", describe(&event));
    }

    log::info!("Server closed the connection");
    Ok(())
}

fn describe(event: &serde_json::Value) -> String {
    match event["event"].as_str() {
        Some("readingUpdated") => {
            let r = &event["reading"];
            format!(
                "[{}] temperature {} battery {}% smoke {} co2 {}",
                r["sensorId"].as_str().unwrap_or("?"),
                r["temperature"],
                r["batteryPercentage"],
                r["smokeLevel"],
                r["co2Level"]
            )
        }
        Some("thresholdViolation") => format!(
            "[{}] ALERT {}",
            event["sensorId"].as_str().unwrap_or("?"),
            event["cause"].as_str().unwrap_or("")
        ),
        Some("sensorStale") => format!(
            "[{}] ALERT no reading received within the stale timeout",
            event["sensorId"].as_str().unwrap_or("?")
        ),
        _ => event.to_string(),
    }
}
