//! Fixed-capacity point storage addressed by opaque references.
//!
//! Positions and scales live in flat attribute arrays that a renderer can upload
//! as-is (`positions()[..3 * draw_range()]`). Callers never see slot indices; a
//! [`PointRef`] maps to its slot through a side table, so the slot layout can
//! change without invalidating handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PointBufferError {
    #[error("point buffer is full ({capacity} points)")]
    CapacityExceeded { capacity: usize },
    #[error("point reference {0:?} does not belong to a live point of this buffer")]
    UnknownReference(PointRef),
}

/// Handle to a point of one [`IndexedPointBuffer`]. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointRef {
    buffer: u64,
    id: u64,
}

#[derive(Debug)]
pub struct IndexedPointBuffer {
    buffer_id: u64,
    capacity: usize,
    positions: Vec<f32>,
    scales: Vec<f32>,
    slot_refs: Vec<PointRef>,
    slots: HashMap<PointRef, usize>,
    next_id: u64,
    needs_update: bool,
}

impl IndexedPointBuffer {
    pub fn new(capacity: usize) -> IndexedPointBuffer {
        IndexedPointBuffer {
            buffer_id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            capacity,
            positions: vec![0.0; capacity * 3],
            scales: vec![1.0; capacity],
            slot_refs: Vec::with_capacity(capacity),
            slots: HashMap::with_capacity(capacity),
            next_id: 0,
            needs_update: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slot_refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_refs.is_empty()
    }

    /// Number of leading slots a renderer should draw.
    pub fn draw_range(&self) -> usize {
        self.slot_refs.len()
    }

    /// Flat `xyz` attribute array of the drawn points.
    pub fn positions(&self) -> &[f32] {
        &self.positions[..self.draw_range() * 3]
    }

    /// Per-point scale attribute of the drawn points.
    pub fn scales(&self) -> &[f32] {
        &self.scales[..self.draw_range()]
    }

    /// True when attributes changed since the last [`mark_uploaded`](Self::mark_uploaded).
    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    pub fn mark_uploaded(&mut self) {
        self.needs_update = false;
    }

    pub fn contains(&self, pt_ref: PointRef) -> bool {
        self.slots.contains_key(&pt_ref)
    }

    fn slot(&self, pt_ref: PointRef) -> Result<usize, PointBufferError> {
        self.slots
            .get(&pt_ref)
            .copied()
            .ok_or(PointBufferError::UnknownReference(pt_ref))
    }

    pub fn add_point(&mut self, position: glam::Vec3) -> Result<PointRef, PointBufferError> {
        self.add_point_scaled(position, 1.0)
    }

    /// Appends a point in the next free slot.
    ///
    /// Fails with [`PointBufferError::CapacityExceeded`] once every slot is taken;
    /// the buffer never grows on its own (see [`grow`](Self::grow)).
    pub fn add_point_scaled(
        &mut self,
        position: glam::Vec3,
        scale: f32,
    ) -> Result<PointRef, PointBufferError> {
        if self.slot_refs.len() >= self.capacity {
            return Err(PointBufferError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let slot = self.slot_refs.len();
        let pt_ref = PointRef {
            buffer: self.buffer_id,
            id: self.next_id,
        };
        self.next_id += 1;
        self.slots.insert(pt_ref, slot);
        self.slot_refs.push(pt_ref);
        self.write_position(slot, position);
        self.scales[slot] = scale;
        self.needs_update = true;
        log::trace!("point {:?} added at slot {}", pt_ref, slot);
        Ok(pt_ref)
    }

    fn write_position(&mut self, slot: usize, position: glam::Vec3) {
        self.positions[slot * 3..slot * 3 + 3].copy_from_slice(&position.to_array());
    }

    pub fn set_point_position(
        &mut self,
        pt_ref: PointRef,
        position: glam::Vec3,
    ) -> Result<(), PointBufferError> {
        let slot = self.slot(pt_ref)?;
        self.write_position(slot, position);
        self.needs_update = true;
        Ok(())
    }

    pub fn point_position(&self, pt_ref: PointRef) -> Result<glam::Vec3, PointBufferError> {
        let slot = self.slot(pt_ref)?;
        Ok(glam::Vec3::from_slice(&self.positions[slot * 3..slot * 3 + 3]))
    }

    pub fn set_point_scale(&mut self, pt_ref: PointRef, scale: f32) -> Result<(), PointBufferError> {
        let slot = self.slot(pt_ref)?;
        self.scales[slot] = scale;
        self.needs_update = true;
        Ok(())
    }

    pub fn point_scale(&self, pt_ref: PointRef) -> Result<f32, PointBufferError> {
        let slot = self.slot(pt_ref)?;
        Ok(self.scales[slot])
    }

    /// Live points in slot (insertion) order.
    pub fn iter(&self) -> impl Iterator<Item = (PointRef, glam::Vec3)> + '_ {
        self.slot_refs.iter().enumerate().map(|(slot, pt_ref)| {
            (
                *pt_ref,
                glam::Vec3::from_slice(&self.positions[slot * 3..slot * 3 + 3]),
            )
        })
    }

    /// Linear scan for the point closest to `position`; the first inserted wins ties.
    pub fn nearest_point(&self, position: glam::Vec3) -> Option<PointRef> {
        let mut nearest: Option<(PointRef, f32)> = None;
        for (pt_ref, p) in self.iter() {
            let dist = position.distance(p);
            match nearest {
                Some((_, best)) if dist >= best => {}
                _ => nearest = Some((pt_ref, dist)),
            }
        }
        nearest.map(|(pt_ref, _)| pt_ref)
    }

    /// Drops every point. References issued before the call become unknown.
    pub fn clear_points(&mut self) {
        self.slots.clear();
        self.slot_refs.clear();
        self.needs_update = true;
    }

    /// Doubles the capacity in one step. Slots and references are preserved.
    pub fn grow(&mut self) {
        let new_capacity = (self.capacity * 2).max(1);
        self.positions.resize(new_capacity * 3, 0.0);
        self.scales.resize(new_capacity, 1.0);
        self.slot_refs.reserve(new_capacity - self.slot_refs.len());
        log::debug!(
            "point buffer grown from {} to {}",
            self.capacity,
            new_capacity
        );
        self.capacity = new_capacity;
        self.needs_update = true;
    }
}
