//! Shadow drive executable entry point.
//!
//! # Architecture
//!
//! The executable runs a single episode in the reference world:
//!
//!     - Initialise the session, logging and parameters
//!     - Main loop, one fixed tick per iteration:
//!         - Step the drive manager, which drives the live vehicle or the shadow in flight
//!         - Advance the world
//!         - Archive the live vehicle's state
//!     - Save the target run, the run score and the final telemetry to the session
//!
//! An optional single argument names the world parameter file to use instead of `toy_sim.toml`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::env;

// Internal
use drive_lib::{
    clock::TickClock,
    drive_mgr::{DriveMgr, DriveParams, DriveStatus},
    events::{ArchiveSink, FanoutSink, LogSink},
    world::{Actuation, ToySim, ToySimParams},
};
use util::{
    archive::Archiver,
    logger::{logger_init, LevelFilter},
    session::{self, Session},
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// One row of the live vehicle archive.
#[derive(Serialize)]
struct LiveRecord<'a> {
    time_s: f64,
    mode: &'a str,
    x: f64,
    y: f64,
    heading_rad: f64,
    speed: f64,
    throttle: f64,
    steer: f64,
}

/// Summary of the episode, logged and saved at exit.
#[derive(Serialize)]
struct EpisodeSummary {
    started: String,
    episode_time_s: f64,
    wall_time_s: f64,
    reached_goal: bool,
    score_total: Option<f64>,
    predictions_completed: usize,
    divergences_detected: usize,
    searches_completed: usize,
    trials_run: usize,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    // Initialise session
    let session = Session::new("drive_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("Shadow Drive Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let args: Vec<String> = env::args().collect();
    debug!("CLI arguments: {:?}", args);

    let sim_params_path = match args.len() {
        1 => "toy_sim.toml",
        2 => args[1].as_str(),
        n => return Err(eyre!("Expected zero or one argument, found {}", n - 1)),
    };

    let drive_params: DriveParams =
        util::params::load("drive.toml").wrap_err("Could not load drive params")?;
    let sim_params: ToySimParams = util::params::load(sim_params_path)
        .wrap_err_with(|| format!("Could not load world params from {}", sim_params_path))?;

    info!("Parameters loaded");

    // ---- INITIALISE MODULES ----

    let mut sim = ToySim::new(sim_params);

    let sink = FanoutSink::new()
        .with(Box::new(LogSink))
        .with(Box::new(
            ArchiveSink::new(&session).wrap_err("Failed to create the event archive")?,
        ));

    let tick_period_s = drive_params.tick_period_s;
    let live_id = sim.live_id();

    let mut drive_mgr = DriveMgr::new(drive_params, TickClock::new(), sink, &sim, live_id)
        .wrap_err("Failed to initialise the DriveMgr")?;
    info!("DriveMgr init complete, starting in {}", drive_mgr.mode());

    let mut live_arch =
        Archiver::from_path(&session, "live_path.csv").wrap_err("Failed to create the live archive")?;

    // ---- MAIN LOOP ----

    info!("Beginning main loop\n");

    loop {
        let status = drive_mgr.step(&mut sim, tick_period_s);

        sim.advance(tick_period_s);

        if let Some(state) = sim.vehicle_state(live_id) {
            let controls = drive_mgr.live_controls();
            let mode = drive_mgr.mode().to_string();
            let record = LiveRecord {
                time_s: sim.time_s(),
                mode: &mode,
                x: state.pose.position[0],
                y: state.pose.position[1],
                heading_rad: state.pose.heading(),
                speed: state.speed(),
                throttle: controls.throttle,
                steer: controls.steer,
            };
            if let Err(e) = live_arch.serialise(record) {
                warn!("Could not archive the live state: {}", e);
            }
        }

        if status == DriveStatus::Finished {
            break;
        }
    }

    // ---- SHUTDOWN ----

    let tm = drive_mgr.get_tm();
    let summary = EpisodeSummary {
        started: session::get_epoch().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        episode_time_s: tm.time_s,
        wall_time_s: session::get_elapsed_seconds(),
        reached_goal: tm.goal_reached,
        score_total: drive_mgr.run_score().map(|s| s.total),
        predictions_completed: tm.predictions_completed,
        divergences_detected: tm.divergences_detected,
        searches_completed: tm.searches_completed,
        trials_run: tm.trials_run,
    };

    match serde_json::to_string_pretty(&summary) {
        Ok(s) => info!("Episode summary:\n{}", s),
        Err(e) => warn!("Could not format the episode summary: {}", e),
    }

    if let Some(record) = drive_mgr.target_record() {
        session.save("target_run.json", record.clone());
    }
    if let Some(score) = drive_mgr.run_score() {
        info!("Run score: {}", score);
        session.save("run_score.json", *score);
    }
    session.save("drive_tm.json", tm);
    session.save("summary.json", summary);

    info!("End of episode");
    session.exit();

    Ok(())
}
