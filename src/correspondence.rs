//! Image/model point pairing per camera.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Point2D, Point3D, Xy, Xyz};

pub type CameraId = String;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CorrespondenceError {
    #[error("no camera is selected")]
    NoActiveCamera,
    #[error("unknown camera {0}")]
    UnknownCamera(CameraId),
    #[error("cannot set the {field} point of a pair that already has one")]
    InvalidStateTransition { field: &'static str },
    #[error("a stored pair needs at least one point")]
    EmptyPair,
}

/// One image point matched to one model point, filled field by field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "PairRecord", into = "PairRecord")]
pub enum CorrespondencePair {
    #[default]
    Empty,
    HasImage(Point2D),
    HasModel(Point3D),
    Complete(Point2D, Point3D),
}

impl CorrespondencePair {
    pub fn with_image(self, image: Point2D) -> Result<Self, CorrespondenceError> {
        match self {
            CorrespondencePair::Empty => Ok(CorrespondencePair::HasImage(image)),
            CorrespondencePair::HasModel(model) => Ok(CorrespondencePair::Complete(image, model)),
            _ => Err(CorrespondenceError::InvalidStateTransition { field: "image" }),
        }
    }

    pub fn with_model(self, model: Point3D) -> Result<Self, CorrespondenceError> {
        match self {
            CorrespondencePair::Empty => Ok(CorrespondencePair::HasModel(model)),
            CorrespondencePair::HasImage(image) => Ok(CorrespondencePair::Complete(image, model)),
            _ => Err(CorrespondenceError::InvalidStateTransition { field: "model" }),
        }
    }

    pub fn image(&self) -> Option<Point2D> {
        match self {
            CorrespondencePair::HasImage(image) | CorrespondencePair::Complete(image, _) => {
                Some(*image)
            }
            _ => None,
        }
    }

    pub fn model(&self) -> Option<Point3D> {
        match self {
            CorrespondencePair::HasModel(model) | CorrespondencePair::Complete(_, model) => {
                Some(*model)
            }
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, CorrespondencePair::Complete(..))
    }
}

/// Persisted shape of a pair: `{"image": {x, y} | null, "model": {x, y, z} | null}`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PairRecord {
    #[serde(default)]
    pub image: Option<Xy>,
    #[serde(default)]
    pub model: Option<Xyz>,
}

impl TryFrom<PairRecord> for CorrespondencePair {
    type Error = CorrespondenceError;

    fn try_from(record: PairRecord) -> Result<Self, Self::Error> {
        match (record.image, record.model) {
            (Some(image), Some(model)) => {
                Ok(CorrespondencePair::Complete(image.into(), model.into()))
            }
            (Some(image), None) => Ok(CorrespondencePair::HasImage(image.into())),
            (None, Some(model)) => Ok(CorrespondencePair::HasModel(model.into())),
            (None, None) => Err(CorrespondenceError::EmptyPair),
        }
    }
}

impl From<CorrespondencePair> for PairRecord {
    fn from(pair: CorrespondencePair) -> Self {
        PairRecord {
            image: pair.image().map(Xy::from),
            model: pair.model().map(Xyz::from),
        }
    }
}

/// A complete pair, ready for pose solving.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub image: Point2D,
    pub model: Point3D,
}

/// Ordered pairs of a single camera. Only the last pair may be incomplete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CorrespondencePair>", into = "Vec<CorrespondencePair>")]
pub struct CameraCorrespondences {
    pairs: Vec<CorrespondencePair>,
}

impl CameraCorrespondences {
    pub fn new() -> CameraCorrespondences {
        CameraCorrespondences::default()
    }

    /// Rebuilds a set from stored pairs, rejecting an incomplete pair anywhere but last.
    pub fn from_pairs(
        pairs: Vec<CorrespondencePair>,
    ) -> Result<CameraCorrespondences, CorrespondenceError> {
        let body = pairs.len().saturating_sub(1);
        for pair in &pairs[..body] {
            if !pair.is_complete() {
                return Err(CorrespondenceError::InvalidStateTransition {
                    field: if pair.image().is_some() { "model" } else { "image" },
                });
            }
        }
        if pairs.iter().any(|p| *p == CorrespondencePair::Empty) {
            return Err(CorrespondenceError::EmptyPair);
        }
        Ok(CameraCorrespondences { pairs })
    }

    pub fn pairs(&self) -> &[CorrespondencePair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn last_pair(&self) -> Option<&CorrespondencePair> {
        self.pairs.last()
    }

    pub fn last_pair_complete(&self) -> bool {
        self.pairs.last().is_some_and(|p| p.is_complete())
    }

    pub fn ready_for_new_pair(&self) -> bool {
        self.pairs.last().is_none_or(|p| p.is_complete())
    }

    pub fn waiting_for_model_point(&self) -> bool {
        matches!(self.pairs.last(), Some(CorrespondencePair::HasImage(_)))
    }

    pub fn waiting_for_image_point(&self) -> bool {
        matches!(self.pairs.last(), Some(CorrespondencePair::HasModel(_)))
    }

    fn push_with(
        &mut self,
        fill: impl FnOnce(CorrespondencePair) -> Result<CorrespondencePair, CorrespondenceError>,
    ) -> Result<(), CorrespondenceError> {
        if self.ready_for_new_pair() {
            self.pairs.push(fill(CorrespondencePair::Empty)?);
        } else if let Some(last) = self.pairs.last_mut() {
            *last = fill(*last)?;
        }
        Ok(())
    }

    /// Starts a new pair with `image` or completes the pending one.
    ///
    /// Fails without touching the data when the pending pair already has an image point.
    pub fn push_image_point(&mut self, image: Point2D) -> Result<(), CorrespondenceError> {
        self.push_with(|pair| pair.with_image(image))
    }

    /// Starts a new pair with `model` or completes the pending one.
    pub fn push_model_point(&mut self, model: Point3D) -> Result<(), CorrespondenceError> {
        self.push_with(|pair| pair.with_model(model))
    }

    pub fn complete_pairs(&self) -> Vec<Correspondence> {
        self.pairs
            .iter()
            .filter_map(|pair| match pair {
                CorrespondencePair::Complete(image, model) => Some(Correspondence {
                    image: *image,
                    model: *model,
                }),
                _ => None,
            })
            .collect()
    }

    /// Removes the trailing pair if it is incomplete. Idempotent.
    pub fn cancel_incomplete_pair(&mut self) -> bool {
        if self.pairs.last().is_some_and(|p| !p.is_complete()) {
            self.pairs.pop();
            true
        } else {
            false
        }
    }

    fn delete_nearest<F>(&mut self, radius: f64, distance: F) -> Option<CorrespondencePair>
    where
        F: Fn(&CorrespondencePair) -> Option<f64>,
    {
        let mut nearest: Option<(usize, f64)> = None;
        for (idx, pair) in self.pairs.iter().enumerate() {
            let Some(dist) = distance(pair) else {
                continue;
            };
            match nearest {
                Some((_, best)) if dist >= best => {}
                _ => nearest = Some((idx, dist)),
            }
        }
        match nearest {
            Some((idx, dist)) if dist <= radius => Some(self.pairs.remove(idx)),
            _ => None,
        }
    }

    /// Removes the pair whose image point is nearest to `query`, if within `radius`.
    pub fn delete_nearest_image_point(
        &mut self,
        query: Point2D,
        radius: f64,
    ) -> Option<CorrespondencePair> {
        self.delete_nearest(radius, |pair| pair.image().map(|p| p.distance(query)))
    }

    /// Removes the pair whose model point is nearest to `query`, if within `radius`.
    pub fn delete_nearest_model_point(
        &mut self,
        query: Point3D,
        radius: f64,
    ) -> Option<CorrespondencePair> {
        self.delete_nearest(radius, |pair| pair.model().map(|p| p.distance(query)))
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

impl TryFrom<Vec<CorrespondencePair>> for CameraCorrespondences {
    type Error = CorrespondenceError;

    fn try_from(pairs: Vec<CorrespondencePair>) -> Result<Self, Self::Error> {
        CameraCorrespondences::from_pairs(pairs)
    }
}

impl From<CameraCorrespondences> for Vec<CorrespondencePair> {
    fn from(set: CameraCorrespondences) -> Self {
        set.pairs
    }
}

/// Correspondence sets of every camera plus the currently selected one.
#[derive(Debug, Clone, Default)]
pub struct CorrespondenceStore {
    sets: BTreeMap<CameraId, CameraCorrespondences>,
    active: Option<CameraId>,
}

impl CorrespondenceStore {
    pub fn new() -> CorrespondenceStore {
        CorrespondenceStore::default()
    }

    pub fn add_camera(&mut self, camera_id: &str) {
        self.sets.entry(camera_id.to_string()).or_default();
    }

    pub fn insert_camera(&mut self, camera_id: &str, pairs: CameraCorrespondences) {
        self.sets.insert(camera_id.to_string(), pairs);
    }

    pub fn camera_ids(&self) -> impl Iterator<Item = &CameraId> {
        self.sets.keys()
    }

    pub fn active_camera(&self) -> Option<&CameraId> {
        self.active.as_ref()
    }

    pub fn pairs_for(&self, camera_id: &str) -> Result<&CameraCorrespondences, CorrespondenceError> {
        self.sets
            .get(camera_id)
            .ok_or_else(|| CorrespondenceError::UnknownCamera(camera_id.to_string()))
    }

    pub fn pairs_for_mut(
        &mut self,
        camera_id: &str,
    ) -> Result<&mut CameraCorrespondences, CorrespondenceError> {
        self.sets
            .get_mut(camera_id)
            .ok_or_else(|| CorrespondenceError::UnknownCamera(camera_id.to_string()))
    }

    /// Makes `camera_id` active, discarding the outgoing camera's incomplete pair.
    pub fn select_camera(&mut self, camera_id: &str) -> Result<(), CorrespondenceError> {
        if !self.sets.contains_key(camera_id) {
            return Err(CorrespondenceError::UnknownCamera(camera_id.to_string()));
        }
        if self.active.as_deref() == Some(camera_id) {
            return Ok(());
        }
        if let Some(outgoing) = self.active.take() {
            if let Some(set) = self.sets.get_mut(&outgoing) {
                if set.cancel_incomplete_pair() {
                    log::debug!("discarded incomplete pair of camera {}", outgoing);
                }
            }
        }
        self.active = Some(camera_id.to_string());
        Ok(())
    }

    pub fn current(&self) -> Result<&CameraCorrespondences, CorrespondenceError> {
        let camera_id = self
            .active
            .as_deref()
            .ok_or(CorrespondenceError::NoActiveCamera)?;
        self.pairs_for(camera_id)
    }

    pub fn current_mut(&mut self) -> Result<&mut CameraCorrespondences, CorrespondenceError> {
        let camera_id = self
            .active
            .clone()
            .ok_or(CorrespondenceError::NoActiveCamera)?;
        self.pairs_for_mut(&camera_id)
    }

    pub fn current_pairs(&self) -> Result<&[CorrespondencePair], CorrespondenceError> {
        Ok(self.current()?.pairs())
    }

    pub fn ready_for_new_pair(&self) -> Result<bool, CorrespondenceError> {
        Ok(self.current()?.ready_for_new_pair())
    }

    pub fn waiting_for_model_point(&self) -> Result<bool, CorrespondenceError> {
        Ok(self.current()?.waiting_for_model_point())
    }

    pub fn waiting_for_image_point(&self) -> Result<bool, CorrespondenceError> {
        Ok(self.current()?.waiting_for_image_point())
    }

    pub fn push_image_point(&mut self, image: Point2D) -> Result<(), CorrespondenceError> {
        self.current_mut()?.push_image_point(image)
    }

    pub fn push_model_point(&mut self, model: Point3D) -> Result<(), CorrespondenceError> {
        self.current_mut()?.push_model_point(model)
    }

    pub fn complete_pairs(&self) -> Result<Vec<Correspondence>, CorrespondenceError> {
        Ok(self.current()?.complete_pairs())
    }

    /// No-op when no camera is selected.
    pub fn cancel_incomplete_pair(&mut self) {
        if let Ok(set) = self.current_mut() {
            set.cancel_incomplete_pair();
        }
    }

    pub fn delete_nearest_image_point(
        &mut self,
        query: Point2D,
        radius: f64,
    ) -> Result<Option<CorrespondencePair>, CorrespondenceError> {
        Ok(self.current_mut()?.delete_nearest_image_point(query, radius))
    }

    pub fn delete_nearest_model_point(
        &mut self,
        query: Point3D,
        radius: f64,
    ) -> Result<Option<CorrespondencePair>, CorrespondenceError> {
        Ok(self.current_mut()?.delete_nearest_model_point(query, radius))
    }

    /// Clears the active camera's pairs after a fresh capture.
    pub fn reset_for_new_capture(&mut self) -> Result<(), CorrespondenceError> {
        self.current_mut()?.clear();
        Ok(())
    }
}
