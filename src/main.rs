use std::fs;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::runtime::Builder;
use tokio::sync::Notify;

use crate::config::Config;
use crate::control::engine::HeatingEngine;
use crate::io::broadcast::{Broadcaster, LogBroadcaster};
use crate::io::simulated::SimulatedRoom;
use crate::io::temperatures::ReferenceTemperature;
use crate::schedule::scheduler::Scheduler;
use crate::time_util::mytime::RealTimeProvider;

mod config;
mod control;
mod io;
mod logging;
mod schedule;
mod time_util;

const CONFIG_FILE: &str = "heating_control.toml";
const STATUS_INTERVAL: Duration = Duration::from_secs(10 * 60);

fn main() {
    println!("Preparing...");

    let _logging_handle = logging::init_logging().expect("Failed to initialize logging");

    let config = fs::read_to_string(CONFIG_FILE).expect("Unable to read config file. Is it missing?");
    let config: Config = toml::from_str(&config).expect("Error reading config file");

    let rt = Builder::new_multi_thread()
        .worker_threads(2)
        .enable_time()
        .build()
        .expect("Expected to be able to make runtime");

    let should_exit = Arc::new(Notify::new());
    {
        let should_exit = should_exit.clone();
        ctrlc::set_handler(move || {
            info!("Received termination signal.");
            should_exit.notify_one();
        })
        .expect("Failed to attach kill handler.");
    }

    rt.block_on(run(config, should_exit));
    info!("Stopped safely.");
}

async fn run(config: Config, should_exit: Arc<Notify>) {
    let room = SimulatedRoom::new(config.get_simulation());
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(LogBroadcaster::default());
    let reference = ReferenceTemperature::new(room.clone(), config.get_heating().get_sensor_preference().to_vec());

    let engine = Arc::new(HeatingEngine::new(
        config.get_heating().clone(),
        room.clone(),
        reference,
        broadcaster.clone(),
    ));
    engine.start();

    let scheduler = Scheduler::new(
        engine.clone(),
        broadcaster,
        Arc::new(RealTimeProvider::default()),
        *config.get_timezone(),
        config.get_scheduler().clone(),
    );
    match scheduler.load(config.get_schedule_file()) {
        Ok(count) => info!("Loaded {} jobs:\n{}", count, scheduler.describe()),
        Err(e) => error!("Failed to load schedule, starting empty: {}", e),
    }
    scheduler.start();

    info!("Beginning main loop.");
    loop {
        tokio::select! {
            _ = should_exit.notified() => break,
            _ = tokio::time::sleep(STATUS_INTERVAL) => {
                match room.temperature() {
                    Some(temperature) => info!("{}, room at {:.1}°C", engine.status(), temperature),
                    None => warn!("{}, room temperature unknown", engine.status()),
                }
            }
        }
    }

    info!("Stopping safely...");
    if let Err(e) = scheduler.save(config.get_schedule_file()) {
        error!("Failed to save schedule: {}", e);
    }
    scheduler.stop().await;
    engine.shutdown().await;
}
