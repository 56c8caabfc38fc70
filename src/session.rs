//! Interactive point editing across captured images and the reference model.
//!
//! The session receives already converted clicks (image pixels or model
//! coordinates), routes them through the selected [`Tool`], keeps the
//! correspondence sets and the model point buffer in sync and re-solves the
//! active camera whenever its pairs change.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CalibrationConfig;
use crate::correspondence::{
    CameraCorrespondences, CameraId, Correspondence, CorrespondenceError, CorrespondenceStore,
};
use crate::intrinsics::{Intrinsics, SensorIntrinsics};
use crate::point_buffer::{IndexedPointBuffer, PointBufferError};
use crate::pose::{PoseError, PoseSolver};
use crate::types::{Point2D, Point3D, PoseResult};

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    Correspondence(#[from] CorrespondenceError),
    #[error(transparent)]
    PointBuffer(#[from] PointBufferError),
    #[error(transparent)]
    Pose(#[from] PoseError),
    #[error("captured image must have positive dimensions, got {width}x{height}")]
    InvalidCapture { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Create,
    Delete,
}

/// What a click did to the active camera's pairs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClickOutcome {
    /// A new pair was started and now waits for its other point.
    Started,
    /// The pending pair received its second point.
    Completed,
    /// The click was of the kind already present on the pending pair.
    Ignored,
    Deleted,
    NothingInRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolveStatus {
    Solved(PoseResult),
    NotEnoughPoints { have: usize, required: usize },
    /// Neither uploaded intrinsics nor capture dimensions are known.
    NoIntrinsics,
    /// The solve failed; any previous pose is kept.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSolution {
    pub label: String,
    pub pose: PoseResult,
}

#[derive(Debug, Clone, Default)]
pub struct CameraEntry {
    pub label: String,
    pub intrinsics: Option<Intrinsics>,
    pub image_size: Option<(u32, u32)>,
}

impl CameraEntry {
    /// Uploaded intrinsics, or the default lens for the captured image size.
    pub fn effective_intrinsics(&self) -> Option<Intrinsics> {
        self.intrinsics.clone().or_else(|| {
            self.image_size
                .map(|(w, h)| Intrinsics::Sensor(SensorIntrinsics::full_frame(w, h)))
        })
    }
}

#[derive(Debug)]
pub struct CalibrationSession {
    config: CalibrationConfig,
    solver: PoseSolver,
    cameras: BTreeMap<CameraId, CameraEntry>,
    store: CorrespondenceStore,
    solutions: BTreeMap<CameraId, CameraSolution>,
    model_points: IndexedPointBuffer,
    tool: Tool,
    status: String,
}

impl Default for CalibrationSession {
    fn default() -> Self {
        CalibrationSession::new(CalibrationConfig::default())
    }
}

impl CalibrationSession {
    pub fn new(config: CalibrationConfig) -> CalibrationSession {
        CalibrationSession {
            solver: PoseSolver::new(config.solver.clone()),
            model_points: IndexedPointBuffer::new(config.editor.model_point_capacity),
            config,
            cameras: BTreeMap::new(),
            store: CorrespondenceStore::new(),
            solutions: BTreeMap::new(),
            tool: Tool::default(),
            status: String::new(),
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Registers a camera. Re-adding a known id only updates its label.
    pub fn add_camera(&mut self, camera_id: &str, label: &str) {
        self.cameras
            .entry(camera_id.to_string())
            .and_modify(|entry| entry.label = label.to_string())
            .or_insert_with(|| CameraEntry {
                label: label.to_string(),
                ..Default::default()
            });
        if let Some(solution) = self.solutions.get_mut(camera_id) {
            solution.label = label.to_string();
        }
        self.store.add_camera(camera_id);
    }

    pub fn camera_ids(&self) -> impl Iterator<Item = &CameraId> {
        self.cameras.keys()
    }

    pub fn camera(&self, camera_id: &str) -> Option<&CameraEntry> {
        self.cameras.get(camera_id)
    }

    fn camera_mut(&mut self, camera_id: &str) -> Result<&mut CameraEntry, CalibrationError> {
        self.cameras
            .get_mut(camera_id)
            .ok_or_else(|| CorrespondenceError::UnknownCamera(camera_id.to_string()).into())
    }

    pub fn set_intrinsics(
        &mut self,
        camera_id: &str,
        intrinsics: Intrinsics,
    ) -> Result<(), CalibrationError> {
        // fail early on a matrix the solver could not use
        intrinsics.camera_matrix()?;
        intrinsics.distortion()?;
        self.camera_mut(camera_id)?.intrinsics = Some(intrinsics);
        debug!("intrinsics set for camera {}", camera_id);
        Ok(())
    }

    pub fn active_camera(&self) -> Option<&CameraId> {
        self.store.active_camera()
    }

    /// Switches the active camera, dropping the outgoing camera's incomplete pair.
    pub fn select_camera(&mut self, camera_id: &str) -> Result<(), CalibrationError> {
        self.store.select_camera(camera_id)?;
        self.status.clear();
        self.update_model_points()?;
        Ok(())
    }

    /// Records a fresh capture of the active camera; previous image points no longer apply.
    pub fn capture(&mut self, image_width: u32, image_height: u32) -> Result<(), CalibrationError> {
        if image_width == 0 || image_height == 0 {
            return Err(CalibrationError::InvalidCapture {
                width: image_width,
                height: image_height,
            });
        }
        let camera_id = self
            .store
            .active_camera()
            .cloned()
            .ok_or(CorrespondenceError::NoActiveCamera)?;
        self.camera_mut(&camera_id)?.image_size = Some((image_width, image_height));
        self.store.reset_for_new_capture()?;
        self.status.clear();
        info!(
            "captured {}x{} image for camera {}",
            image_width, image_height, camera_id
        );
        self.update_model_points()?;
        Ok(())
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Changing tool cancels a pair that is still being created.
    pub fn select_tool(&mut self, tool: Tool) {
        if tool != self.tool {
            self.store.cancel_incomplete_pair();
            self.status.clear();
            self.tool = tool;
            debug!("current tool is now {:?}", tool);
            if let Err(e) = self.update_model_points() {
                warn!("failed to refresh model points: {}", e);
            }
        }
    }

    pub fn status_text(&self) -> &str {
        &self.status
    }

    pub fn current_pairs(&self) -> Result<&CameraCorrespondences, CalibrationError> {
        Ok(self.store.current()?)
    }

    pub fn pairs_for(&self, camera_id: &str) -> Result<&CameraCorrespondences, CalibrationError> {
        Ok(self.store.pairs_for(camera_id)?)
    }

    pub fn cancel_incomplete_pair(&mut self) -> Result<(), CalibrationError> {
        self.store.cancel_incomplete_pair();
        self.status.clear();
        self.update_model_points()
    }

    pub fn handle_image_click(&mut self, x: f64, y: f64) -> Result<ClickOutcome, CalibrationError> {
        let point = Point2D::new(x, y);
        let outcome = match self.tool {
            Tool::Create => {
                let set = self.store.current()?;
                if set.waiting_for_model_point() {
                    ClickOutcome::Ignored
                } else {
                    let starting = set.ready_for_new_pair();
                    self.store.push_image_point(point)?;
                    if starting {
                        self.status = "Waiting for model point".to_string();
                        ClickOutcome::Started
                    } else {
                        self.status.clear();
                        ClickOutcome::Completed
                    }
                }
            }
            Tool::Delete => {
                match self
                    .store
                    .delete_nearest_image_point(point, self.config.editor.select_radius)?
                {
                    Some(pair) => {
                        debug!("deleted {:?}", pair);
                        ClickOutcome::Deleted
                    }
                    None => ClickOutcome::NothingInRange,
                }
            }
        };
        self.after_edit(outcome)?;
        Ok(outcome)
    }

    pub fn handle_model_click(&mut self, position: Point3D) -> Result<ClickOutcome, CalibrationError> {
        let outcome = match self.tool {
            Tool::Create => {
                let set = self.store.current()?;
                if set.waiting_for_image_point() {
                    ClickOutcome::Ignored
                } else {
                    let starting = set.ready_for_new_pair();
                    self.store.push_model_point(position)?;
                    if starting {
                        self.status = "Waiting for image point".to_string();
                        ClickOutcome::Started
                    } else {
                        self.status.clear();
                        ClickOutcome::Completed
                    }
                }
            }
            Tool::Delete => {
                match self
                    .store
                    .delete_nearest_model_point(position, self.config.editor.select_radius)?
                {
                    Some(pair) => {
                        debug!("deleted {:?}", pair);
                        ClickOutcome::Deleted
                    }
                    None => ClickOutcome::NothingInRange,
                }
            }
        };
        self.after_edit(outcome)?;
        Ok(outcome)
    }

    fn after_edit(&mut self, outcome: ClickOutcome) -> Result<(), CalibrationError> {
        if outcome == ClickOutcome::Deleted && self.store.ready_for_new_pair()? {
            self.status.clear();
        }
        if matches!(outcome, ClickOutcome::Completed | ClickOutcome::Deleted) {
            let status = self.update_solution()?;
            debug!("solve status {:?}", status);
        }
        if outcome != ClickOutcome::Ignored && outcome != ClickOutcome::NothingInRange {
            self.update_model_points()?;
        }
        Ok(())
    }

    /// Re-adds the active camera's model points to the render buffer.
    ///
    /// The buffer is grown as needed so it always mirrors the stored pairs.
    pub fn update_model_points(&mut self) -> Result<(), CalibrationError> {
        self.model_points.clear_points();
        let Ok(set) = self.store.current() else {
            return Ok(());
        };
        let scale = self.config.editor.model_point_scale;
        for model in set.pairs().iter().filter_map(|p| p.model()) {
            loop {
                match self.model_points.add_point_scaled(model.as_vec3(), scale) {
                    Ok(_) => break,
                    Err(PointBufferError::CapacityExceeded { .. }) => self.model_points.grow(),
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    pub fn model_points(&self) -> &IndexedPointBuffer {
        &self.model_points
    }

    /// Solves the active camera from its complete pairs.
    ///
    /// A failed solve leaves the previous pose of the camera in place.
    pub fn update_solution(&mut self) -> Result<SolveStatus, CalibrationError> {
        let camera_id = self
            .store
            .active_camera()
            .cloned()
            .ok_or(CorrespondenceError::NoActiveCamera)?;
        let pairs = self.store.complete_pairs()?;
        let entry = self
            .cameras
            .get(&camera_id)
            .ok_or_else(|| CorrespondenceError::UnknownCamera(camera_id.clone()))?;
        let status = solve_camera(&self.solver, entry, &pairs);
        if let SolveStatus::Solved(pose) = &status {
            info!(
                "camera {} solved with {} pairs, error {:.3} px",
                camera_id,
                pairs.len(),
                pose.error
            );
            self.solutions.insert(
                camera_id,
                CameraSolution {
                    label: entry.label.clone(),
                    pose: *pose,
                },
            );
        }
        Ok(status)
    }

    /// Solves every camera independently, in parallel.
    pub fn solve_all(&mut self) -> BTreeMap<CameraId, SolveStatus> {
        let jobs: Vec<(CameraId, &CameraEntry, Vec<Correspondence>)> = self
            .cameras
            .iter()
            .filter_map(|(id, entry)| {
                self.store
                    .pairs_for(id)
                    .ok()
                    .map(|set| (id.clone(), entry, set.complete_pairs()))
            })
            .collect();
        let solver = &self.solver;
        let statuses: BTreeMap<CameraId, SolveStatus> = jobs
            .into_par_iter()
            .map(|(id, entry, pairs)| {
                let status = solve_camera(solver, entry, &pairs);
                (id, status)
            })
            .collect();
        for (id, status) in &statuses {
            if let (SolveStatus::Solved(pose), Some(entry)) = (status, self.cameras.get(id)) {
                self.solutions.insert(
                    id.clone(),
                    CameraSolution {
                        label: entry.label.clone(),
                        pose: *pose,
                    },
                );
            }
        }
        statuses
    }

    pub fn solution(&self, camera_id: &str) -> Option<&CameraSolution> {
        self.solutions.get(camera_id)
    }

    /// `{camera_id: {label, pose}}` for every solved camera.
    pub fn export_solutions(&self) -> &BTreeMap<CameraId, CameraSolution> {
        &self.solutions
    }

    /// Loads a camera with stored pairs, e.g. from a session file.
    pub fn insert_camera(
        &mut self,
        camera_id: &str,
        entry: CameraEntry,
        pairs: CameraCorrespondences,
    ) {
        self.cameras.insert(camera_id.to_string(), entry);
        self.store.insert_camera(camera_id, pairs);
    }
}

fn solve_camera(solver: &PoseSolver, entry: &CameraEntry, pairs: &[Correspondence]) -> SolveStatus {
    let Some(intrinsics) = entry.effective_intrinsics() else {
        return SolveStatus::NoIntrinsics;
    };
    match solver.solve(pairs, &intrinsics) {
        Ok(estimate) => SolveStatus::Solved(estimate.pose),
        Err(PoseError::InsufficientPoints { required, actual }) => SolveStatus::NotEnoughPoints {
            have: actual,
            required,
        },
        Err(e) => {
            warn!("camera {} has no solution: {}", entry.label, e);
            SolveStatus::Failed(e.to_string())
        }
    }
}
