pub mod config;
pub mod correspondence;
pub mod distortion;
pub mod intrinsics;
pub mod io;
pub mod point_buffer;
pub mod pose;
pub mod session;
pub mod types;

pub use correspondence::{CorrespondencePair, CorrespondenceStore};
pub use point_buffer::{IndexedPointBuffer, PointRef};
pub use pose::{PoseError, PoseSolver, solve_pose};
pub use session::CalibrationSession;
pub use types::PoseResult;
