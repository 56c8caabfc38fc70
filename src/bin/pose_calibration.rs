use camera_pose_calibration::config::CalibrationConfig;
use camera_pose_calibration::io::{load_session, object_from_json, write_solutions};
use camera_pose_calibration::session::SolveStatus;
use clap::Parser;
use std::time::Instant;

#[derive(Parser)]
#[command(version, about, author)]
struct CPRSCli {
    /// path to session json (cameras, intrinsics and point pairs)
    session: String,

    /// where to write the solved poses
    #[arg(short, long, default_value = "camera-solutions.json")]
    output: String,

    /// solver and editor config json
    #[arg(short, long)]
    config: Option<String>,

    /// solve with the pinhole model only, ignoring distortion coefficients
    #[arg(long)]
    no_distortion: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = CPRSCli::parse();
    let mut config: CalibrationConfig = match &cli.config {
        Some(path) => object_from_json(path)?,
        None => CalibrationConfig::default(),
    };
    if cli.no_distortion {
        config.solver.apply_distortion = false;
    }

    let mut session = load_session(&cli.session, config)?;
    let now = Instant::now();
    let statuses = session.solve_all();
    let duration_sec = now.elapsed().as_secs_f64();
    log::info!("solving {} cameras took {:.6} sec", statuses.len(), duration_sec);

    for (camera_id, status) in &statuses {
        match status {
            SolveStatus::Solved(pose) => println!(
                "{}: position ({:.4}, {:.4}, {:.4}) rotation ({:.4}, {:.4}, {:.4}) error {:.3} px",
                camera_id,
                pose.position.x,
                pose.position.y,
                pose.position.z,
                pose.rotation.x,
                pose.rotation.y,
                pose.rotation.z,
                pose.error
            ),
            SolveStatus::NotEnoughPoints { have, required } => {
                println!("{}: not enough points ({}/{})", camera_id, have, required)
            }
            SolveStatus::NoIntrinsics => println!("{}: no intrinsics", camera_id),
            SolveStatus::Failed(reason) => println!("{}: no solution, {}", camera_id, reason),
        }
    }

    write_solutions(&cli.output, session.export_solutions())?;
    println!("wrote {}", cli.output);
    Ok(())
}
