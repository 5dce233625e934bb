use clap::Parser;
use falarmd::{logging::init_logging, serve, AlarmConfig, Args, FireAlarmResult};

#[actix::main]
async fn main() -> FireAlarmResult<()> {
    let args = Args::parse();
    let config = AlarmConfig::load(&args).map_err(|e| {
        eprintln!("Unable to load configuration: {e:}");
        e
    })?;

    let _guard = init_logging(&config.logging)?;
    log::info!(
        "Starting fire alarm server, sensors on {}, monitors on {}",
        config.sensor_addr(),
        config.monitor_addr()
    );

    serve(config).await.map_err(|e| {
        log::error!("Server stopped: {e:}");
        e
    })
}
