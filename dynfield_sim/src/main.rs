//! dynfield_sim - runs the grasp architecture against a simulated robot.
//!
//! A task node activates `find_color`, which waits until the target hue is
//! in view. Its completion releases `move_ee`, which carries the end effector
//! to where the camera sees the target. Then `gripper_open` and finally
//! `gripper_close` run.

use std::fs;
use std::path::PathBuf;
use std::process;

use dynfield::observer::{BehaviorSnapshot, GraphAdapter, GraphSnapshot};
use serde::Serialize;
use tracing::{error, info};

mod architecture;
mod config;
mod error;
mod recorder;
mod world;

use architecture::GraspArchitecture;
use config::SimConfig;
use error::SimError;
use recorder::TimeCourse;

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    ticks: Option<u64>,
    time_course: Option<PathBuf>,
    snapshot: Option<PathBuf>,
    activation_logs: Option<PathBuf>,
}

#[derive(Serialize)]
struct RunSnapshot {
    tick: u64,
    end_effector: [f64; 2],
    gripper: f64,
    done: bool,
    behaviors: Vec<BehaviorSnapshot>,
    graph: GraphSnapshot,
}

fn usage() -> ! {
    eprintln!("Usage: dynfield_sim [options]\n");
    eprintln!("Options:");
    eprintln!("  --config <file.json>        Load simulation parameters");
    eprintln!("  --ticks <n>                 Override the tick budget");
    eprintln!("  --time-course <file.csv>    Record node levels per tick");
    eprintln!("  --snapshot <file.json>      Write the final state");
    eprintln!("  --activation-logs <dir>     Append every field's activation per tick");
    process::exit(1);
}

fn parse_args() -> Result<Args, SimError> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(flag) = it.next() {
        if flag == "-h" || flag == "--help" {
            usage();
        }
        let value = it
            .next()
            .ok_or_else(|| SimError::Usage(format!("{flag} needs a value")))?;
        match flag.as_str() {
            "--config" => args.config = Some(value.into()),
            "--ticks" => {
                let n = value
                    .parse()
                    .map_err(|e| SimError::Usage(format!("--ticks {value}: {e}")))?;
                args.ticks = Some(n);
            }
            "--time-course" => args.time_course = Some(value.into()),
            "--snapshot" => args.snapshot = Some(value.into()),
            "--activation-logs" => args.activation_logs = Some(value.into()),
            other => return Err(SimError::Usage(format!("unknown option {other}"))),
        }
    }
    Ok(args)
}

fn run(args: Args) -> Result<(), SimError> {
    let mut config = match &args.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    if let Some(ticks) = args.ticks {
        config.ticks = ticks;
    }
    if args.time_course.is_some() {
        config.time_course = args.time_course.clone();
    }
    if args.activation_logs.is_some() {
        config.activation_log_dir = args.activation_logs.clone();
    }
    info!(seed = config.seed, ticks = config.ticks, "starting simulation");

    let mut arch = GraspArchitecture::build(&config)?;
    if let Some(dir) = &config.activation_log_dir {
        arch.start_activation_logs(dir)?;
    }
    let mut course = match &config.time_course {
        Some(path) => Some(TimeCourse::create(path, &arch)?),
        None => None,
    };

    let mut previous: Vec<(bool, bool)> = arch
        .snapshots()
        .iter()
        .map(|s| (s.active, s.complete))
        .collect();

    for _ in 0..config.ticks {
        arch.tick()?;
        if let Some(course) = course.as_mut() {
            course.record(&arch)?;
        }

        for (snap, prev) in arch.snapshots().iter().zip(previous.iter_mut()) {
            let now = (snap.active, snap.complete);
            if now.0 != prev.0 {
                info!(
                    tick = arch.graph.ticks(),
                    behavior = %snap.label,
                    active = now.0,
                    "intention changed"
                );
            }
            if now.1 && !prev.1 {
                info!(tick = arch.graph.ticks(), behavior = %snap.label, "completed");
            }
            *prev = now;
        }

        if config.stop_when_done && arch.is_done() {
            info!(tick = arch.graph.ticks(), "all behaviors complete");
            break;
        }
    }

    if let Some(course) = course {
        course.finish()?;
    }

    if let Some(path) = &args.snapshot {
        let snapshot = RunSnapshot {
            tick: arch.graph.ticks(),
            end_effector: arch.world.borrow().end_effector,
            gripper: arch.world.borrow().gripper,
            done: arch.is_done(),
            behaviors: arch.snapshots(),
            graph: GraphAdapter::new(&arch.graph).snapshot(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(path, json).map_err(|source| SimError::Write {
            path: path.clone(),
            source,
        })?;
        info!("Snapshot written to {:?}", path);
    }

    if !arch.is_done() {
        info!(tick = arch.graph.ticks(), "tick budget exhausted before completion");
    }
    arch.release();
    Ok(())
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            usage();
        }
    };

    if let Err(e) = run(args) {
        error!("{e}");
        process::exit(1);
    }
}
