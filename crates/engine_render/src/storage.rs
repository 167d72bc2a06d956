//! Structure-of-arrays render data cache.
//!
//! Every renderable entity owns one dense slot. Each per-slot field lives in
//! its own flat array (`positions[slot * 3..slot * 3 + 3]` and so on), which
//! keeps bulk transforms cache friendly and lets GPU uploads copy contiguous
//! byte ranges straight out of the arrays.
//!
//! World matrices are only correct after [`RenderDataStorage::update_world_matrices`]
//! has run following a transform or parent change. Between the two they may
//! be stale.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, trace, warn};

use engine_component::{BitSet, EntityId, World};
use engine_math::{Mat4, Transform3D, quat_from_euler_xyz, trs_matrix};

use crate::config::RenderStorageConfig;
use crate::error::RenderError;
use crate::gpu::{BufferDescriptor, BufferUsage, GpuBuffer, GpuDevice};

/// Name of the world matrix GPU buffer field.
pub const WORLD_MATRICES_FIELD: &str = "world_matrices";
/// Name of the color GPU buffer field.
pub const COLORS_FIELD: &str = "colors";
/// Widest custom field, in values per slot.
pub const MAX_CUSTOM_FIELD_WIDTH: usize = 16;

const NO_PARENT: i32 = -1;
const ZERO3: [f32; 3] = [0.0, 0.0, 0.0];
const ONE3: [f32; 3] = [1.0, 1.0, 1.0];
const IDENTITY_QUAT: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
#[rustfmt::skip]
const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.0, 0.0, 0.0, 1.0,
];

/// Memory and occupancy figures for a [`RenderDataStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    /// Slots the arrays hold.
    pub capacity: u32,
    /// Allocated slots.
    pub count: usize,
    /// Slots waiting on the free list.
    pub free_slots: usize,
    /// CPU-side bytes held by the field arrays.
    pub memory_bytes: usize,
}

#[derive(Debug, Clone)]
struct CustomField {
    width: usize,
    normalized: bool,
    data: Vec<f32>,
}

struct GpuBinding {
    buffer: Box<dyn GpuBuffer>,
    /// Slot capacity the buffer was sized for.
    slots: u32,
    needs_full_upload: bool,
}

struct GpuState {
    device: Arc<dyn GpuDevice>,
    buffers: IndexMap<String, GpuBinding>,
}

/// A borrowed view over one uploadable field.
struct FieldView<'a> {
    name: &'a str,
    data: &'a [f32],
    width: usize,
    normalized: bool,
}

impl<'a> FieldView<'a> {
    /// Bytes per slot in the GPU buffer. Normalized slots are padded to a
    /// multiple of 4 so every per-run write offset and size stays 4-byte
    /// aligned.
    fn stride_bytes(&self) -> u64 {
        if self.normalized {
            (self.width.div_ceil(4) * 4) as u64
        } else {
            (self.width * size_of::<f32>()) as u64
        }
    }

    /// Bytes for `slots`, as laid out in the GPU buffer. Normalized fields
    /// pack to unorm8 followed by zero padding up to the stride.
    fn bytes(&self, slots: Range<usize>) -> Cow<'a, [u8]> {
        let data: &'a [f32] = self.data;
        let values = &data[slots.start * self.width..slots.end * self.width];
        if self.normalized {
            let stride = self.stride_bytes() as usize;
            let mut packed = Vec::with_capacity(slots.len() * stride);
            for slot in values.chunks_exact(self.width) {
                packed.extend(slot.iter().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8));
                packed.resize(packed.len() + stride - self.width, 0);
            }
            Cow::Owned(packed)
        } else {
            Cow::Borrowed(bytemuck::cast_slice(values))
        }
    }
}

/// SoA cache of per-entity render data with parent hierarchy and GPU sync.
///
/// Field views borrow the storage, so a view cannot outlive an
/// [`allocate`](Self::allocate) that grows and reallocates the arrays.
pub struct RenderDataStorage {
    config: RenderStorageConfig,
    capacity: u32,
    positions: Vec<f32>,
    rotations: Vec<f32>,
    scales: Vec<f32>,
    colors: Vec<f32>,
    parents: Vec<i32>,
    local_matrices: Vec<f32>,
    world_matrices: Vec<f32>,
    custom: IndexMap<String, CustomField>,
    entity_to_slot: HashMap<EntityId, u32>,
    slot_to_entity: Vec<Option<EntityId>>,
    free_slots: Vec<u32>,
    /// High-water mark: slots below it have been handed out at least once.
    next_slot: u32,
    /// Local transform or parent changed; world matrix is stale.
    dirty: BitSet,
    /// Touched since the last GPU sync.
    changed: BitSet,
    /// Touched since the last `end_frame`.
    frame_changes: BitSet,
    gpu: Option<GpuState>,
}

fn repeat(pattern: &[f32], slots: usize) -> Vec<f32> {
    pattern.repeat(slots)
}

fn write<const N: usize>(data: &mut [f32], slot: u32, values: [f32; N]) {
    let start = slot as usize * N;
    data[start..start + N].copy_from_slice(&values);
}

fn read<const N: usize>(data: &[f32], slot: u32) -> [f32; N] {
    let start = slot as usize * N;
    let mut out = [0.0; N];
    out.copy_from_slice(&data[start..start + N]);
    out
}

fn view<const N: usize>(data: &[f32], slot: u32) -> &[f32] {
    let start = slot as usize * N;
    &data[start..start + N]
}

/// Collapse ascending slot indices into half-open runs.
fn contiguous_runs(slots: impl Iterator<Item = usize>) -> Vec<Range<usize>> {
    let mut runs: Vec<Range<usize>> = Vec::new();
    for slot in slots {
        match runs.last_mut() {
            Some(run) if run.end == slot => run.end += 1,
            _ => runs.push(slot..slot + 1),
        }
    }
    runs
}

impl RenderDataStorage {
    /// Create a storage with `config.initial_capacity` slots.
    #[must_use]
    pub fn new(config: RenderStorageConfig) -> Self {
        let capacity = config.initial_capacity;
        let n = capacity as usize;
        Self {
            config,
            capacity,
            positions: repeat(&ZERO3, n),
            rotations: repeat(&IDENTITY_QUAT, n),
            scales: repeat(&ONE3, n),
            colors: repeat(&WHITE, n),
            parents: vec![NO_PARENT; n],
            local_matrices: repeat(&IDENTITY_MATRIX, n),
            world_matrices: repeat(&IDENTITY_MATRIX, n),
            custom: IndexMap::new(),
            entity_to_slot: HashMap::new(),
            slot_to_entity: vec![None; n],
            free_slots: Vec::new(),
            next_slot: 0,
            dirty: BitSet::new(n),
            changed: BitSet::new(n),
            frame_changes: BitSet::new(n),
            gpu: None,
        }
    }

    /// Create a storage with default config and the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: u32) -> Self {
        Self::new(RenderStorageConfig::default().with_initial_capacity(capacity))
    }

    /// The configuration the storage was created with.
    #[must_use]
    pub fn config(&self) -> &RenderStorageConfig {
        &self.config
    }

    /// Number of slots the arrays currently hold.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of allocated slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entity_to_slot.len()
    }

    /// Returns `true` if no slot is allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_to_slot.is_empty()
    }

    /// Returns the slot for `entity`, allocating one if needed.
    ///
    /// Freed slots are reused first (reset to defaults). When none is free
    /// and the arrays are full, capacity doubles and every array is copied.
    pub fn allocate(&mut self, entity: EntityId) -> u32 {
        if let Some(&slot) = self.entity_to_slot.get(&entity) {
            return slot;
        }
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                if self.next_slot == self.capacity {
                    self.grow();
                }
                let slot = self.next_slot;
                self.next_slot += 1;
                slot
            }
        };
        self.reset_slot(slot);
        self.entity_to_slot.insert(entity, slot);
        self.slot_to_entity[slot as usize] = Some(entity);
        self.touch(slot);
        trace!(%entity, slot, "render slot allocated");
        slot
    }

    /// Release the slot of `entity`. Children of the slot become roots.
    /// Returns `false` if the entity had no slot.
    pub fn free(&mut self, entity: EntityId) -> bool {
        let Some(slot) = self.entity_to_slot.remove(&entity) else {
            return false;
        };
        self.slot_to_entity[slot as usize] = None;
        let as_parent = slot as i32;
        for child in 0..self.next_slot {
            if self.parents[child as usize] == as_parent {
                self.parents[child as usize] = NO_PARENT;
                self.touch(child);
            }
        }
        self.dirty.unset(slot as usize);
        self.changed.unset(slot as usize);
        self.frame_changes.unset(slot as usize);
        self.free_slots.push(slot);
        trace!(%entity, slot, "render slot freed");
        true
    }

    /// The slot allocated to `entity`, if any.
    #[must_use]
    pub fn slot_of(&self, entity: EntityId) -> Option<u32> {
        self.entity_to_slot.get(&entity).copied()
    }

    /// The entity owning `slot`, or `None` for free and out-of-range slots.
    #[must_use]
    pub fn entity_at(&self, slot: u32) -> Option<EntityId> {
        self.slot_to_entity.get(slot as usize).copied().flatten()
    }

    /// Returns `true` if `entity` has a slot.
    #[must_use]
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entity_to_slot.contains_key(&entity)
    }

    /// Allocated `(entity, slot)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, u32)> + '_ {
        self.slot_to_entity
            .iter()
            .enumerate()
            .filter_map(|(slot, entity)| entity.map(|e| (e, slot as u32)))
    }

    fn is_allocated(&self, slot: u32) -> bool {
        self.entity_at(slot).is_some()
    }

    fn grow(&mut self) {
        let old = self.capacity as usize;
        let new_capacity = self.capacity.saturating_mul(2).max(1);
        let added = new_capacity as usize - old;
        let n = new_capacity as usize;

        self.positions.extend(repeat(&ZERO3, added));
        self.rotations.extend(repeat(&IDENTITY_QUAT, added));
        self.scales.extend(repeat(&ONE3, added));
        self.colors.extend(repeat(&WHITE, added));
        self.parents.resize(n, NO_PARENT);
        self.local_matrices.extend(repeat(&IDENTITY_MATRIX, added));
        self.world_matrices.extend(repeat(&IDENTITY_MATRIX, added));
        for field in self.custom.values_mut() {
            field.data.resize(n * field.width, 0.0);
        }
        self.slot_to_entity.resize(n, None);
        self.dirty.grow(n);
        self.changed.grow(n);
        self.frame_changes.grow(n);
        self.capacity = new_capacity;
        debug!(from = old, to = n, "render storage grown");
    }

    fn reset_slot(&mut self, slot: u32) {
        write(&mut self.positions, slot, ZERO3);
        write(&mut self.rotations, slot, IDENTITY_QUAT);
        write(&mut self.scales, slot, ONE3);
        write(&mut self.colors, slot, WHITE);
        write(&mut self.local_matrices, slot, IDENTITY_MATRIX);
        write(&mut self.world_matrices, slot, IDENTITY_MATRIX);
        self.parents[slot as usize] = NO_PARENT;
        for field in self.custom.values_mut() {
            let start = slot as usize * field.width;
            field.data[start..start + field.width].fill(0.0);
        }
    }

    /// Transform changed: world matrix stale and GPU data outdated.
    fn touch(&mut self, slot: u32) {
        self.dirty.set(slot as usize);
        self.touch_gpu(slot);
    }

    fn touch_gpu(&mut self, slot: u32) {
        self.changed.set(slot as usize);
        self.frame_changes.set(slot as usize);
    }

    /// Set the local position. Returns `false` if the slot is not allocated.
    pub fn set_position(&mut self, slot: u32, x: f32, y: f32, z: f32) -> bool {
        if !self.is_allocated(slot) {
            return false;
        }
        write(&mut self.positions, slot, [x, y, z]);
        self.touch(slot);
        true
    }

    /// The local position.
    #[must_use]
    pub fn position(&self, slot: u32) -> Option<[f32; 3]> {
        self.is_allocated(slot).then(|| read(&self.positions, slot))
    }

    /// Set the rotation quaternion `(x, y, z, w)`.
    pub fn set_rotation(&mut self, slot: u32, x: f32, y: f32, z: f32, w: f32) -> bool {
        if !self.is_allocated(slot) {
            return false;
        }
        write(&mut self.rotations, slot, [x, y, z, w]);
        self.touch(slot);
        true
    }

    /// Set the rotation from XYZ Euler angles in radians.
    pub fn set_rotation_euler(&mut self, slot: u32, x: f32, y: f32, z: f32) -> bool {
        let [qx, qy, qz, qw] = quat_from_euler_xyz(x, y, z);
        self.set_rotation(slot, qx, qy, qz, qw)
    }

    /// The rotation quaternion `(x, y, z, w)`.
    #[must_use]
    pub fn rotation(&self, slot: u32) -> Option<[f32; 4]> {
        self.is_allocated(slot).then(|| read(&self.rotations, slot))
    }

    /// Set the per-axis local scale. Returns `false` if the slot is not
    /// allocated.
    pub fn set_scale(&mut self, slot: u32, x: f32, y: f32, z: f32) -> bool {
        if !self.is_allocated(slot) {
            return false;
        }
        write(&mut self.scales, slot, [x, y, z]);
        self.touch(slot);
        true
    }

    /// Set the same scale on all three axes.
    pub fn set_uniform_scale(&mut self, slot: u32, factor: f32) -> bool {
        self.set_scale(slot, factor, factor, factor)
    }

    /// The per-axis local scale.
    #[must_use]
    pub fn scale(&self, slot: u32) -> Option<[f32; 3]> {
        self.is_allocated(slot).then(|| read(&self.scales, slot))
    }

    /// Set the RGBA color. Does not invalidate the world matrix.
    pub fn set_color(&mut self, slot: u32, r: f32, g: f32, b: f32, a: f32) -> bool {
        if !self.is_allocated(slot) {
            return false;
        }
        write(&mut self.colors, slot, [r, g, b, a]);
        self.touch_gpu(slot);
        true
    }

    /// The RGBA color.
    #[must_use]
    pub fn color(&self, slot: u32) -> Option<[f32; 4]> {
        self.is_allocated(slot).then(|| read(&self.colors, slot))
    }

    /// Copy a [`Transform3D`] into the slot's position, rotation and scale.
    ///
    /// The slot is only touched when a value differs. Returns `true` if the
    /// slot changed, `false` if it already matched or is not allocated.
    pub fn sync_transform(&mut self, slot: u32, transform: &Transform3D) -> bool {
        if !self.is_allocated(slot) {
            return false;
        }
        let position = transform.position.to_array();
        let rotation = transform.rotation.to_array();
        let scale = transform.scale.to_array();
        if read::<3>(&self.positions, slot) == position
            && read::<4>(&self.rotations, slot) == rotation
            && read::<3>(&self.scales, slot) == scale
        {
            return false;
        }
        write(&mut self.positions, slot, position);
        write(&mut self.rotations, slot, rotation);
        write(&mut self.scales, slot, scale);
        self.touch(slot);
        true
    }

    /// Mirror every [`Transform3D`] in `world` into the slot of its entity.
    /// Entities without a slot are skipped. Returns the number of slots
    /// that changed.
    pub fn sync_transforms(&mut self, world: &World) -> usize {
        let Some(transforms) = world.storage::<Transform3D>() else {
            return 0;
        };
        let mut changed = 0;
        for (entity, transform) in transforms.iter() {
            if let Some(slot) = self.slot_of(entity)
                && self.sync_transform(slot, transform)
            {
                changed += 1;
            }
        }
        trace!(changed, "transforms mirrored");
        changed
    }

    /// Parent `slot` under `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidSlot`] if either slot is not allocated,
    /// or [`RenderError::ParentCycle`] if `slot` is `parent` or one of its
    /// ancestors.
    pub fn set_parent(&mut self, slot: u32, parent: u32) -> Result<(), RenderError> {
        for s in [slot, parent] {
            if !self.is_allocated(s) {
                return Err(RenderError::InvalidSlot(s));
            }
        }
        let mut cursor = Some(parent);
        while let Some(ancestor) = cursor {
            if ancestor == slot {
                return Err(RenderError::ParentCycle { slot, parent });
            }
            cursor = self.parent(ancestor);
        }
        self.parents[slot as usize] = parent as i32;
        self.touch(slot);
        Ok(())
    }

    /// Make `slot` a root. Returns `false` if it is not allocated.
    pub fn clear_parent(&mut self, slot: u32) -> bool {
        if !self.is_allocated(slot) {
            return false;
        }
        self.parents[slot as usize] = NO_PARENT;
        self.touch(slot);
        true
    }

    /// The parent slot, or `None` for roots and unallocated slots.
    #[must_use]
    pub fn parent(&self, slot: u32) -> Option<u32> {
        if !self.is_allocated(slot) {
            return None;
        }
        u32::try_from(self.parents[slot as usize]).ok()
    }

    /// The local TRS matrix as of the last [`update_world_matrices`](Self::update_world_matrices).
    #[must_use]
    pub fn local_matrix(&self, slot: u32) -> Option<&[f32]> {
        self.is_allocated(slot).then(|| view::<16>(&self.local_matrices, slot))
    }

    /// The world matrix, column-major. Stale until
    /// [`update_world_matrices`](Self::update_world_matrices) runs.
    #[must_use]
    pub fn world_matrix(&self, slot: u32) -> Option<&[f32]> {
        self.is_allocated(slot).then(|| view::<16>(&self.world_matrices, slot))
    }

    /// Every slot's world matrix, 16 floats per slot.
    #[must_use]
    pub fn world_matrices(&self) -> &[f32] {
        &self.world_matrices
    }

    /// Every slot's RGBA color, 4 floats per slot.
    #[must_use]
    pub fn colors(&self) -> &[f32] {
        &self.colors
    }

    fn depth(&self, slot: u32) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent(slot);
        while let Some(p) = cursor {
            depth += 1;
            cursor = self.parent(p);
        }
        depth
    }

    /// Recompute world matrices for every dirty slot and all of its
    /// descendants, parents before children. Returns the number recomputed.
    pub fn update_world_matrices(&mut self) -> usize {
        const UNKNOWN: u8 = 0;
        const STALE: u8 = 1;
        const FRESH: u8 = 2;

        let n = self.next_slot as usize;
        let mut state = vec![UNKNOWN; n];
        let mut stale = Vec::new();
        let mut path = Vec::new();

        for slot in 0..self.next_slot {
            if !self.is_allocated(slot) || state[slot as usize] != UNKNOWN {
                continue;
            }
            // Walk up until the answer is known: a dirty ancestor makes the
            // whole path stale, reaching a clean root makes it fresh.
            path.clear();
            let mut cursor = slot;
            let verdict = loop {
                let known = state[cursor as usize];
                if known != UNKNOWN {
                    break known;
                }
                path.push(cursor);
                if self.dirty.has(cursor as usize) {
                    break STALE;
                }
                match self.parent(cursor) {
                    Some(p) => cursor = p,
                    None => break FRESH,
                }
            };
            for &s in &path {
                state[s as usize] = verdict;
                if verdict == STALE {
                    stale.push(s);
                }
            }
        }

        stale.sort_by_cached_key(|&s| (self.depth(s), s));

        for &slot in &stale {
            let local = trs_matrix(
                read(&self.positions, slot),
                read(&self.rotations, slot),
                read(&self.scales, slot),
            );
            let world = match self.parent(slot) {
                Some(p) => {
                    let parent_world = Mat4::from_cols_array(&read(&self.world_matrices, p));
                    (parent_world * Mat4::from_cols_array(&local)).to_cols_array()
                }
                None => local,
            };
            write(&mut self.local_matrices, slot, local);
            write(&mut self.world_matrices, slot, world);
            self.dirty.unset(slot as usize);
            self.touch_gpu(slot);
        }

        trace!(count = stale.len(), "world matrices updated");
        stale.len()
    }

    /// Register a per-slot custom field of `width` floats. Normalized fields
    /// clamp to `[0, 1]` and upload as unorm8.
    ///
    /// Returns `Ok(false)` (with a warning) if the name is already taken.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidFieldWidth`] unless `width` is in `1..=16`.
    pub fn add_custom_field(
        &mut self,
        name: &str,
        width: usize,
        normalized: bool,
    ) -> Result<bool, RenderError> {
        if self.custom.contains_key(name) {
            warn!(field = name, "custom field already registered");
            return Ok(false);
        }
        if !(1..=MAX_CUSTOM_FIELD_WIDTH).contains(&width) {
            return Err(RenderError::InvalidFieldWidth {
                field: name.to_string(),
                width,
            });
        }
        self.custom.insert(
            name.to_string(),
            CustomField {
                width,
                normalized,
                data: vec![0.0; self.capacity as usize * width],
            },
        );
        debug!(field = name, width, normalized, "custom field added");
        Ok(true)
    }

    /// Write a custom field value. Returns `Ok(false)` if the slot is not
    /// allocated.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::UnknownField`] or
    /// [`RenderError::FieldWidthMismatch`].
    pub fn set_custom(
        &mut self,
        slot: u32,
        name: &str,
        values: &[f32],
    ) -> Result<bool, RenderError> {
        let allocated = self.is_allocated(slot);
        let field = self
            .custom
            .get_mut(name)
            .ok_or_else(|| RenderError::UnknownField(name.to_string()))?;
        if values.len() != field.width {
            return Err(RenderError::FieldWidthMismatch {
                field: name.to_string(),
                expected: field.width,
                actual: values.len(),
            });
        }
        if !allocated {
            return Ok(false);
        }
        let start = slot as usize * field.width;
        let normalized = field.normalized;
        for (dst, &v) in field.data[start..start + values.len()].iter_mut().zip(values) {
            *dst = if normalized { v.clamp(0.0, 1.0) } else { v };
        }
        self.touch_gpu(slot);
        Ok(true)
    }

    /// A slot's custom field values.
    #[must_use]
    pub fn custom(&self, slot: u32, name: &str) -> Option<&[f32]> {
        if !self.is_allocated(slot) {
            return None;
        }
        let field = self.custom.get(name)?;
        let start = slot as usize * field.width;
        Some(&field.data[start..start + field.width])
    }

    /// The whole array backing a custom field.
    #[must_use]
    pub fn custom_field(&self, name: &str) -> Option<&[f32]> {
        self.custom.get(name).map(|f| f.data.as_slice())
    }

    /// Names of the registered custom fields, in registration order.
    pub fn custom_field_names(&self) -> impl Iterator<Item = &str> {
        self.custom.keys().map(String::as_str)
    }

    fn field_views(&self) -> Vec<FieldView<'_>> {
        let mut views = vec![
            FieldView {
                name: WORLD_MATRICES_FIELD,
                data: &self.world_matrices,
                width: 16,
                normalized: false,
            },
            FieldView {
                name: COLORS_FIELD,
                data: &self.colors,
                width: 4,
                normalized: false,
            },
        ];
        views.extend(self.custom.iter().map(|(name, field)| FieldView {
            name,
            data: &field.data,
            width: field.width,
            normalized: field.normalized,
        }));
        views
    }

    fn descriptor(&self, field: &FieldView<'_>) -> BufferDescriptor {
        BufferDescriptor {
            size: field.stride_bytes() * u64::from(self.capacity),
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
            hint: self.config.upload_hint,
            label: Some(format!("{}.{}", self.config.label_prefix, field.name)),
        }
    }

    fn create_binding(
        &self,
        device: &dyn GpuDevice,
        field: &FieldView<'_>,
    ) -> Result<GpuBinding, RenderError> {
        let buffer = device.create_buffer(&self.descriptor(field))?;
        Ok(GpuBinding {
            buffer,
            slots: self.capacity,
            needs_full_upload: true,
        })
    }

    /// Create one GPU buffer per exposed field, sized to the current
    /// capacity. Replaces any buffers from an earlier call. The next
    /// [`sync_to_gpu`](Self::sync_to_gpu) uploads everything.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Gpu`] if buffer creation fails.
    pub fn initialize_gpu(&mut self, device: Arc<dyn GpuDevice>) -> Result<(), RenderError> {
        self.release_gpu();
        let mut buffers = IndexMap::new();
        for field in self.field_views() {
            match self.create_binding(device.as_ref(), &field) {
                Ok(binding) => {
                    buffers.insert(field.name.to_string(), binding);
                }
                Err(err) => {
                    for binding in buffers.values_mut() {
                        binding.buffer.destroy();
                    }
                    return Err(err);
                }
            }
        }
        debug!(buffers = buffers.len(), capacity = self.capacity, "render GPU buffers created");
        self.gpu = Some(GpuState { device, buffers });
        Ok(())
    }

    /// Returns `true` between [`initialize_gpu`](Self::initialize_gpu) and
    /// [`release_gpu`](Self::release_gpu).
    #[must_use]
    pub fn is_gpu_initialized(&self) -> bool {
        self.gpu.is_some()
    }

    /// Upload slots changed since the last sync, one write per contiguous
    /// run of changed slots per field.
    ///
    /// Buffers too small after growth are recreated and fully uploaded, as
    /// are buffers for custom fields added after initialization. Returns
    /// the number of slots uploaded; a full upload counts every allocated
    /// slot. Does nothing before [`initialize_gpu`](Self::initialize_gpu).
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Gpu`] for a failing create or write. Change
    /// tracking is kept so the next sync retries.
    pub fn sync_to_gpu(&mut self) -> Result<usize, RenderError> {
        let Some(mut gpu) = self.gpu.take() else {
            return Ok(0);
        };
        let result = self.upload(&mut gpu);
        self.gpu = Some(gpu);
        let uploaded = result?;
        self.changed.clear();
        Ok(uploaded)
    }

    fn upload(&self, gpu: &mut GpuState) -> Result<usize, RenderError> {
        let runs = contiguous_runs(self.changed.ones());
        let mut full_upload = false;

        for field in self.field_views() {
            let outdated = gpu
                .buffers
                .get(field.name)
                .is_none_or(|binding| binding.slots != self.capacity);
            if outdated {
                let binding = self.create_binding(gpu.device.as_ref(), &field)?;
                if let Some(mut old) = gpu.buffers.insert(field.name.to_string(), binding) {
                    old.buffer.destroy();
                }
                debug!(field = field.name, capacity = self.capacity, "render GPU buffer recreated");
            }
            let Some(binding) = gpu.buffers.get_mut(field.name) else {
                continue;
            };

            if binding.needs_full_upload {
                binding.buffer.update(&field.bytes(0..self.capacity as usize), 0)?;
                binding.needs_full_upload = false;
                full_upload = true;
            } else {
                for run in &runs {
                    let offset = run.start as u64 * field.stride_bytes();
                    binding.buffer.update(&field.bytes(run.clone()), offset)?;
                }
            }
        }

        let uploaded = if full_upload { self.len() } else { self.changed.count() };
        trace!(uploaded, runs = runs.len(), "render data synced");
        Ok(uploaded)
    }

    /// Reset per-frame change tracking. Matrix dirty flags and pending GPU
    /// changes are kept.
    pub fn end_frame(&mut self) {
        self.frame_changes.clear();
    }

    /// Slots touched since the last [`end_frame`](Self::end_frame).
    pub fn changed_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.frame_changes.ones().map(|slot| slot as u32)
    }

    /// Destroy every GPU buffer. The storage keeps working CPU-side.
    pub fn release_gpu(&mut self) {
        if let Some(mut gpu) = self.gpu.take() {
            for binding in gpu.buffers.values_mut() {
                binding.buffer.destroy();
            }
            debug!(buffers = gpu.buffers.len(), "render GPU buffers released");
        }
    }

    /// Current occupancy and CPU memory figures.
    #[must_use]
    pub fn stats(&self) -> RenderStats {
        let floats = self.positions.len()
            + self.rotations.len()
            + self.scales.len()
            + self.colors.len()
            + self.local_matrices.len()
            + self.world_matrices.len()
            + self.custom.values().map(|f| f.data.len()).sum::<usize>();
        RenderStats {
            capacity: self.capacity,
            count: self.len(),
            free_slots: self.free_slots.len(),
            memory_bytes: floats * size_of::<f32>() + self.parents.len() * size_of::<i32>(),
        }
    }

    /// Free every slot and reset all fields. Capacity, custom fields and GPU
    /// buffers are kept.
    pub fn clear(&mut self) {
        for slot in 0..self.next_slot {
            self.reset_slot(slot);
        }
        self.entity_to_slot.clear();
        self.slot_to_entity.fill(None);
        self.free_slots.clear();
        self.next_slot = 0;
        self.dirty.clear();
        self.changed.clear();
        self.frame_changes.clear();
    }
}

impl Drop for RenderDataStorage {
    fn drop(&mut self) {
        self.release_gpu();
    }
}

impl std::fmt::Debug for RenderDataStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderDataStorage")
            .field("capacity", &self.capacity)
            .field("count", &self.len())
            .field("free_slots", &self.free_slots.len())
            .field("custom_fields", &self.custom.keys().collect::<Vec<_>>())
            .field("gpu", &self.gpu.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::gpu::{BufferHint, GpuError};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Upload {
        label: String,
        offset: u64,
        len: usize,
    }

    #[derive(Default)]
    struct Recorder {
        created: Mutex<Vec<BufferDescriptor>>,
        uploads: Mutex<Vec<Upload>>,
        destroyed: Mutex<Vec<String>>,
        fail_creates: Mutex<bool>,
    }

    impl Recorder {
        fn uploads(&self) -> Vec<Upload> {
            self.uploads.lock().unwrap().clone()
        }

        fn uploads_for(&self, field: &str) -> Vec<Upload> {
            let label = format!("render_data.{field}");
            self.uploads().into_iter().filter(|u| u.label == label).collect()
        }

        fn reset(&self) {
            self.uploads.lock().unwrap().clear();
        }
    }

    struct FakeDevice(Arc<Recorder>);

    struct FakeBuffer {
        label: String,
        size: u64,
        destroyed: bool,
        log: Arc<Recorder>,
    }

    impl GpuDevice for FakeDevice {
        fn create_buffer(
            &self,
            descriptor: &BufferDescriptor,
        ) -> Result<Box<dyn GpuBuffer>, GpuError> {
            if *self.0.fail_creates.lock().unwrap() {
                return Err(GpuError::OutOfMemory {
                    requested: descriptor.size,
                });
            }
            self.0.created.lock().unwrap().push(descriptor.clone());
            Ok(Box::new(FakeBuffer {
                label: descriptor.label.clone().unwrap_or_default(),
                size: descriptor.size,
                destroyed: false,
                log: Arc::clone(&self.0),
            }))
        }
    }

    impl GpuBuffer for FakeBuffer {
        fn update(&mut self, data: &[u8], offset_bytes: u64) -> Result<(), GpuError> {
            if self.destroyed {
                return Err(GpuError::Destroyed);
            }
            let len = data.len() as u64;
            if offset_bytes + len > self.size {
                return Err(GpuError::OutOfBounds {
                    offset: offset_bytes,
                    len,
                    size: self.size,
                });
            }
            self.log.uploads.lock().unwrap().push(Upload {
                label: self.label.clone(),
                offset: offset_bytes,
                len: data.len(),
            });
            Ok(())
        }

        fn destroy(&mut self) {
            self.destroyed = true;
            self.log.destroyed.lock().unwrap().push(self.label.clone());
        }
    }

    fn entity(i: u32) -> EntityId {
        EntityId::new(i, 0).unwrap()
    }

    fn with_gpu(capacity: u32) -> (RenderDataStorage, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let mut storage = RenderDataStorage::with_capacity(capacity);
        storage.initialize_gpu(Arc::new(FakeDevice(Arc::clone(&recorder)))).unwrap();
        (storage, recorder)
    }

    #[test]
    fn test_allocate_is_idempotent() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let a = storage.allocate(entity(1));
        assert_eq!(storage.allocate(entity(1)), a);
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.slot_of(entity(1)), Some(a));
        assert_eq!(storage.entity_at(a), Some(entity(1)));
    }

    #[test]
    fn test_new_slot_has_defaults() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let slot = storage.allocate(entity(0));
        assert_eq!(storage.position(slot), Some([0.0, 0.0, 0.0]));
        assert_eq!(storage.rotation(slot), Some([0.0, 0.0, 0.0, 1.0]));
        assert_eq!(storage.scale(slot), Some([1.0, 1.0, 1.0]));
        assert_eq!(storage.color(slot), Some([1.0, 1.0, 1.0, 1.0]));
        assert_eq!(storage.parent(slot), None);
        assert_eq!(storage.world_matrix(slot), Some(&IDENTITY_MATRIX[..]));
    }

    #[test]
    fn test_single_translation() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let slot = storage.allocate(entity(0));
        assert!(storage.set_position(slot, 10.0, 0.0, 0.0));
        assert_eq!(storage.update_world_matrices(), 1);
        assert_eq!(storage.world_matrix(slot).unwrap()[12], 10.0);
        assert_eq!(storage.local_matrix(slot).unwrap()[12], 10.0);
        assert_eq!(storage.update_world_matrices(), 0);
    }

    #[test]
    fn test_chain_accumulates_translation() {
        let mut storage = RenderDataStorage::with_capacity(8);
        let slots: Vec<u32> = (0..5).map(|i| storage.allocate(entity(i))).collect();
        for pair in slots.windows(2) {
            storage.set_parent(pair[1], pair[0]).unwrap();
            storage.set_position(pair[1], 10.0, 0.0, 0.0);
        }
        assert_eq!(storage.update_world_matrices(), 5);
        let xs: Vec<f32> = slots.iter().map(|&s| storage.world_matrix(s).unwrap()[12]).collect();
        assert_eq!(xs, vec![0.0, 10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_parent_in_higher_slot_is_computed_first() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let child = storage.allocate(entity(0));
        let parent = storage.allocate(entity(1));
        storage.set_parent(child, parent).unwrap();
        storage.set_position(parent, 5.0, 0.0, 0.0);
        storage.set_position(child, 1.0, 0.0, 0.0);
        storage.update_world_matrices();
        assert_eq!(storage.world_matrix(child).unwrap()[12], 6.0);
    }

    #[test]
    fn test_dirty_parent_updates_clean_children() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let root = storage.allocate(entity(0));
        let child = storage.allocate(entity(1));
        let grandchild = storage.allocate(entity(2));
        storage.set_parent(child, root).unwrap();
        storage.set_parent(grandchild, child).unwrap();
        storage.update_world_matrices();

        storage.set_position(root, 3.0, 0.0, 0.0);
        assert_eq!(storage.update_world_matrices(), 3);
        assert_eq!(storage.world_matrix(grandchild).unwrap()[12], 3.0);
    }

    #[test]
    fn test_rotated_parent_rotates_child_offset() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let parent = storage.allocate(entity(0));
        let child = storage.allocate(entity(1));
        storage.set_rotation_euler(parent, 0.0, 0.0, std::f32::consts::FRAC_PI_2);
        storage.set_position(child, 10.0, 0.0, 0.0);
        storage.set_parent(child, parent).unwrap();
        storage.update_world_matrices();

        let m = storage.world_matrix(child).unwrap();
        assert!(m[12].abs() < 1e-4, "x = {}", m[12]);
        assert!((m[13] - 10.0).abs() < 1e-4, "y = {}", m[13]);
        assert!(m[14].abs() < 1e-4);
    }

    #[test]
    fn test_scaled_parent_scales_child_offset() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let parent = storage.allocate(entity(0));
        let child = storage.allocate(entity(1));
        storage.set_uniform_scale(parent, 2.0);
        storage.set_position(child, 10.0, 0.0, 0.0);
        storage.set_parent(child, parent).unwrap();
        storage.update_world_matrices();

        let m = storage.world_matrix(child).unwrap();
        assert!((m[12] - 20.0).abs() < 1e-4);
        assert!((m[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_parent_translation_rotation_and_scale_compose() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let parent = storage.allocate(entity(0));
        let child = storage.allocate(entity(1));
        storage.set_position(parent, 5.0, 0.0, 0.0);
        storage.set_rotation_euler(parent, 0.0, 0.0, std::f32::consts::FRAC_PI_2);
        storage.set_uniform_scale(parent, 2.0);
        storage.set_position(child, 10.0, 0.0, 0.0);
        storage.set_parent(child, parent).unwrap();
        storage.update_world_matrices();

        let m = storage.world_matrix(child).unwrap();
        assert!((m[12] - 5.0).abs() < 1e-4, "x = {}", m[12]);
        assert!((m[13] - 20.0).abs() < 1e-4, "y = {}", m[13]);
    }

    #[test]
    fn test_sync_transform_writes_slot() {
        let mut storage = RenderDataStorage::with_capacity(2);
        let slot = storage.allocate(entity(0));
        storage.update_world_matrices();
        storage.end_frame();

        let transform = Transform3D {
            position: engine_math::Vec3::new(1.0, 2.0, 3.0),
            rotation: engine_math::Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            scale: engine_math::Vec3::splat(2.0),
        };
        assert!(storage.sync_transform(slot, &transform));
        assert_eq!(storage.position(slot), Some([1.0, 2.0, 3.0]));
        assert_eq!(storage.rotation(slot), Some(transform.rotation.to_array()));
        assert_eq!(storage.scale(slot), Some([2.0, 2.0, 2.0]));
        assert_eq!(storage.changed_slots().collect::<Vec<_>>(), vec![slot]);

        assert_eq!(storage.update_world_matrices(), 1);
        let expected = transform.to_cols_array();
        let world = storage.world_matrix(slot).unwrap();
        assert!(world.iter().zip(expected).all(|(a, b)| (a - b).abs() < 1e-6));
        assert!(!storage.sync_transform(7, &transform));
    }

    #[test]
    fn test_sync_unchanged_transform_keeps_slot_clean() {
        let mut storage = RenderDataStorage::with_capacity(2);
        let slot = storage.allocate(entity(0));
        let transform = Transform3D::from_position(engine_math::Vec3::new(4.0, 0.0, 0.0));
        assert!(storage.sync_transform(slot, &transform));
        storage.update_world_matrices();
        storage.end_frame();

        assert!(!storage.sync_transform(slot, &transform));
        assert_eq!(storage.changed_slots().count(), 0);
        assert_eq!(storage.update_world_matrices(), 0);
    }

    #[test]
    fn test_sync_transforms_from_world() {
        let mut world = World::new();
        let placed = world.spawn().unwrap();
        let unplaced = world.spawn().unwrap();
        let slotless = world.spawn().unwrap();
        world
            .insert(placed, Transform3D::from_position(engine_math::Vec3::new(0.0, 7.0, 0.0)))
            .unwrap();
        world
            .insert(slotless, Transform3D::from_position(engine_math::Vec3::X))
            .unwrap();

        let mut storage = RenderDataStorage::with_capacity(4);
        assert_eq!(storage.sync_transforms(&world), 0);
        let slot = storage.allocate(placed);
        storage.allocate(unplaced);

        assert_eq!(storage.sync_transforms(&world), 1);
        assert_eq!(storage.position(slot), Some([0.0, 7.0, 0.0]));
        assert_eq!(storage.sync_transforms(&world), 0);
        assert!(!storage.contains(slotless));

        storage.update_world_matrices();
        assert_eq!(storage.world_matrix(slot).unwrap()[13], 7.0);
    }

    #[test]
    fn test_parent_cycles_rejected() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let a = storage.allocate(entity(0));
        let b = storage.allocate(entity(1));
        assert_eq!(storage.set_parent(a, a), Err(RenderError::ParentCycle { slot: a, parent: a }));
        storage.set_parent(b, a).unwrap();
        assert_eq!(storage.set_parent(a, b), Err(RenderError::ParentCycle { slot: a, parent: b }));
        assert_eq!(storage.set_parent(a, 3), Err(RenderError::InvalidSlot(3)));
        assert!(storage.clear_parent(b));
        assert_eq!(storage.parent(b), None);
        storage.set_parent(a, b).unwrap();
        assert_eq!(storage.parent(a), Some(b));
    }

    #[test]
    fn test_writes_to_unallocated_slot_refused() {
        let mut storage = RenderDataStorage::with_capacity(4);
        assert!(!storage.set_position(0, 1.0, 2.0, 3.0));
        assert!(!storage.set_color(100, 1.0, 0.0, 0.0, 1.0));
        assert!(!storage.clear_parent(0));
        assert_eq!(storage.position(0), None);
    }

    #[test]
    fn test_free_then_reallocate_reuses_slot() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let slot = storage.allocate(entity(0));
        storage.allocate(entity(1));
        storage.set_position(slot, 9.0, 9.0, 9.0);
        assert!(storage.free(entity(0)));
        assert!(!storage.free(entity(0)));
        assert!(!storage.contains(entity(0)));
        assert_eq!(storage.stats().free_slots, 1);

        let reused = storage.allocate(entity(2));
        assert_eq!(reused, slot);
        assert_eq!(storage.position(reused), Some([0.0, 0.0, 0.0]));
        assert_eq!(storage.stats().free_slots, 0);
    }

    #[test]
    fn test_free_detaches_children() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let parent = storage.allocate(entity(0));
        let child = storage.allocate(entity(1));
        storage.set_position(parent, 10.0, 0.0, 0.0);
        storage.set_position(child, 1.0, 0.0, 0.0);
        storage.set_parent(child, parent).unwrap();
        storage.update_world_matrices();
        assert_eq!(storage.world_matrix(child).unwrap()[12], 11.0);

        storage.free(entity(0));
        assert_eq!(storage.parent(child), None);
        assert_eq!(storage.update_world_matrices(), 1);
        assert_eq!(storage.world_matrix(child).unwrap()[12], 1.0);
    }

    #[test]
    fn test_growth_preserves_values() {
        let mut storage = RenderDataStorage::with_capacity(2);
        storage.add_custom_field("emissive", 1, false).unwrap();
        let a = storage.allocate(entity(0));
        let b = storage.allocate(entity(1));
        storage.set_position(a, 1.0, 2.0, 3.0);
        storage.set_color(b, 0.5, 0.25, 0.0, 1.0);
        storage.set_custom(b, "emissive", &[4.0]).unwrap();

        let c = storage.allocate(entity(2));
        assert_eq!(storage.capacity(), 4);
        assert_eq!(c, 2);
        assert_eq!(storage.position(a), Some([1.0, 2.0, 3.0]));
        assert_eq!(storage.color(b), Some([0.5, 0.25, 0.0, 1.0]));
        assert_eq!(storage.custom(b, "emissive"), Some(&[4.0][..]));
        assert_eq!(storage.scale(c), Some([1.0, 1.0, 1.0]));
        assert_eq!(storage.world_matrices().len(), 4 * 16);
    }

    #[test]
    fn test_zero_capacity_grows() {
        let mut storage = RenderDataStorage::with_capacity(0);
        assert_eq!(storage.allocate(entity(0)), 0);
        assert_eq!(storage.capacity(), 1);
        storage.allocate(entity(1));
        assert_eq!(storage.capacity(), 2);
    }

    #[test]
    fn test_euler_rotation() {
        let mut storage = RenderDataStorage::with_capacity(1);
        let slot = storage.allocate(entity(0));
        storage.set_rotation_euler(slot, 0.0, 0.0, std::f32::consts::FRAC_PI_2);
        let [x, y, z, w] = storage.rotation(slot).unwrap();
        let half = std::f32::consts::FRAC_1_SQRT_2;
        assert!(x.abs() < 1e-6 && y.abs() < 1e-6);
        assert!((z - half).abs() < 1e-6 && (w - half).abs() < 1e-6);
    }

    #[test]
    fn test_custom_fields() {
        let mut storage = RenderDataStorage::with_capacity(2);
        assert_eq!(storage.add_custom_field("tint", 3, true), Ok(true));
        assert_eq!(storage.add_custom_field("tint", 2, false), Ok(false));
        assert!(matches!(
            storage.add_custom_field("huge", 17, false),
            Err(RenderError::InvalidFieldWidth { width: 17, .. })
        ));
        assert!(matches!(
            storage.add_custom_field("empty", 0, false),
            Err(RenderError::InvalidFieldWidth { width: 0, .. })
        ));

        let slot = storage.allocate(entity(0));
        assert_eq!(storage.set_custom(slot, "tint", &[1.5, 0.5, -1.0]), Ok(true));
        assert_eq!(storage.custom(slot, "tint"), Some(&[1.0, 0.5, 0.0][..]));
        assert_eq!(storage.set_custom(1, "tint", &[0.0, 0.0, 0.0]), Ok(false));
        assert_eq!(
            storage.set_custom(slot, "tint", &[0.0]),
            Err(RenderError::FieldWidthMismatch {
                field: "tint".to_string(),
                expected: 3,
                actual: 1,
            })
        );
        assert_eq!(
            storage.set_custom(slot, "missing", &[0.0]),
            Err(RenderError::UnknownField("missing".to_string()))
        );
        assert_eq!(storage.custom_field("tint").map(<[f32]>::len), Some(6));
        assert_eq!(storage.custom_field_names().collect::<Vec<_>>(), vec!["tint"]);
    }

    #[test]
    fn test_initialize_creates_buffers() {
        let recorder = Arc::new(Recorder::default());
        let config = RenderStorageConfig::default()
            .with_initial_capacity(8)
            .with_upload_hint(BufferHint::Stream);
        let mut storage = RenderDataStorage::new(config);
        storage.initialize_gpu(Arc::new(FakeDevice(Arc::clone(&recorder)))).unwrap();
        assert!(storage.is_gpu_initialized());

        let created = recorder.created.lock().unwrap().clone();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].label.as_deref(), Some("render_data.world_matrices"));
        assert_eq!(created[0].size, 8 * 64);
        assert_eq!(created[1].label.as_deref(), Some("render_data.colors"));
        assert_eq!(created[1].size, 8 * 16);
        assert!(created.iter().all(|d| d.hint == BufferHint::Stream));
        assert!(created.iter().all(|d| d.usage.contains(BufferUsage::COPY_DST)));
    }

    #[test]
    fn test_sync_uploads_only_changed_slots() {
        let (mut storage, recorder) = with_gpu(8);
        for i in 0..4 {
            storage.allocate(entity(i));
        }
        assert_eq!(storage.sync_to_gpu().unwrap(), 4);
        assert_eq!(recorder.uploads_for(COLORS_FIELD), vec![Upload {
            label: "render_data.colors".to_string(),
            offset: 0,
            len: 8 * 16,
        }]);

        recorder.reset();
        assert_eq!(storage.sync_to_gpu().unwrap(), 0);
        assert!(recorder.uploads().is_empty());

        storage.set_color(2, 1.0, 0.0, 0.0, 1.0);
        assert_eq!(storage.sync_to_gpu().unwrap(), 1);
        assert_eq!(recorder.uploads_for(COLORS_FIELD), vec![Upload {
            label: "render_data.colors".to_string(),
            offset: 2 * 16,
            len: 16,
        }]);
    }

    #[test]
    fn test_sync_batches_contiguous_runs() {
        let (mut storage, recorder) = with_gpu(8);
        for i in 0..6 {
            storage.allocate(entity(i));
        }
        storage.sync_to_gpu().unwrap();
        recorder.reset();

        for slot in [0, 1, 2, 4] {
            storage.set_color(slot, 0.0, 0.0, 0.0, 1.0);
        }
        assert_eq!(storage.sync_to_gpu().unwrap(), 4);
        let uploads = recorder.uploads_for(WORLD_MATRICES_FIELD);
        assert_eq!(uploads.len(), 2);
        assert_eq!((uploads[0].offset, uploads[0].len), (0, 3 * 64));
        assert_eq!((uploads[1].offset, uploads[1].len), (4 * 64, 64));
    }

    #[test]
    fn test_sync_recreates_buffers_after_growth() {
        let (mut storage, recorder) = with_gpu(1);
        storage.allocate(entity(0));
        storage.sync_to_gpu().unwrap();
        recorder.reset();

        storage.allocate(entity(1));
        assert_eq!(storage.capacity(), 2);
        assert_eq!(storage.sync_to_gpu().unwrap(), 2);

        let destroyed = recorder.destroyed.lock().unwrap().clone();
        assert!(destroyed.contains(&"render_data.world_matrices".to_string()));
        let uploads = recorder.uploads_for(WORLD_MATRICES_FIELD);
        assert_eq!(uploads, vec![Upload {
            label: "render_data.world_matrices".to_string(),
            offset: 0,
            len: 2 * 64,
        }]);
    }

    #[test]
    fn test_late_custom_field_gets_buffer() {
        let (mut storage, recorder) = with_gpu(4);
        let slot = storage.allocate(entity(0));
        storage.sync_to_gpu().unwrap();

        storage.add_custom_field("highlight", 4, true).unwrap();
        storage.set_custom(slot, "highlight", &[1.0, 0.5, 0.0, 1.0]).unwrap();
        storage.sync_to_gpu().unwrap();

        let created = recorder.created.lock().unwrap().clone();
        let custom = created
            .iter()
            .find(|d| d.label.as_deref() == Some("render_data.highlight"))
            .unwrap();
        assert_eq!(custom.size, 4 * 4);
        assert_eq!(recorder.uploads_for("highlight").len(), 1);
    }

    #[test]
    fn test_normalized_fields_pack_to_unorm8() {
        let field = FieldView {
            name: "tint",
            data: &[1.0, 0.5, 0.0, 2.0],
            width: 2,
            normalized: true,
        };
        assert_eq!(field.stride_bytes(), 4);
        assert_eq!(field.bytes(0..2).into_owned(), vec![255, 128, 0, 0, 0, 255, 0, 0]);
        assert_eq!(field.bytes(1..2).into_owned(), vec![0, 255, 0, 0]);
    }

    #[test]
    fn test_narrow_normalized_uploads_stay_aligned() {
        let (mut storage, recorder) = with_gpu(4);
        for i in 0..3 {
            storage.allocate(entity(i));
        }
        storage.add_custom_field("mask", 1, true).unwrap();
        storage.sync_to_gpu().unwrap();
        let created = recorder.created.lock().unwrap().clone();
        let mask = created
            .iter()
            .find(|d| d.label.as_deref() == Some("render_data.mask"))
            .unwrap();
        assert_eq!(mask.size, 4 * 4);

        recorder.reset();
        storage.set_custom(1, "mask", &[1.0]).unwrap();
        storage.set_custom(2, "mask", &[0.5]).unwrap();
        storage.sync_to_gpu().unwrap();
        let uploads = recorder.uploads_for("mask");
        assert_eq!(uploads.len(), 1);
        assert_eq!((uploads[0].offset, uploads[0].len), (4, 8));
        assert!(uploads.iter().all(|u| u.offset % 4 == 0 && u.len % 4 == 0));
    }

    #[test]
    fn test_failed_sync_keeps_changes() {
        let (mut storage, recorder) = with_gpu(1);
        storage.allocate(entity(0));
        storage.sync_to_gpu().unwrap();

        storage.allocate(entity(1));
        *recorder.fail_creates.lock().unwrap() = true;
        assert!(matches!(
            storage.sync_to_gpu(),
            Err(RenderError::Gpu(GpuError::OutOfMemory { .. }))
        ));
        assert!(storage.is_gpu_initialized());

        *recorder.fail_creates.lock().unwrap() = false;
        assert_eq!(storage.sync_to_gpu().unwrap(), 2);
    }

    #[test]
    fn test_end_frame_keeps_dirty_flags() {
        let mut storage = RenderDataStorage::with_capacity(4);
        let slot = storage.allocate(entity(0));
        storage.set_position(slot, 1.0, 0.0, 0.0);
        assert_eq!(storage.changed_slots().collect::<Vec<_>>(), vec![slot]);
        storage.end_frame();
        assert_eq!(storage.changed_slots().count(), 0);
        assert_eq!(storage.update_world_matrices(), 1);
        assert_eq!(storage.changed_slots().collect::<Vec<_>>(), vec![slot]);
    }

    #[test]
    fn test_release_and_drop_destroy_buffers() {
        let (mut storage, recorder) = with_gpu(2);
        storage.release_gpu();
        assert!(!storage.is_gpu_initialized());
        assert_eq!(recorder.destroyed.lock().unwrap().len(), 2);
        assert_eq!(storage.sync_to_gpu().unwrap(), 0);

        let (storage, recorder) = with_gpu(2);
        drop(storage);
        assert_eq!(recorder.destroyed.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_stats_and_clear() {
        let mut storage = RenderDataStorage::with_capacity(2);
        storage.allocate(entity(0));
        storage.allocate(entity(1));
        storage.free(entity(1));
        let stats = storage.stats();
        assert_eq!(stats.capacity, 2);
        assert_eq!(stats.count, 1);
        assert_eq!(stats.free_slots, 1);
        // 3 + 4 + 3 + 4 + 16 + 16 floats and one i32 parent per slot.
        assert_eq!(stats.memory_bytes, 2 * (46 * 4 + 4));

        storage.clear();
        assert!(storage.is_empty());
        assert_eq!(storage.stats().free_slots, 0);
        assert_eq!(storage.allocate(entity(5)), 0);
        assert_eq!(storage.iter().collect::<Vec<_>>(), vec![(entity(5), 0)]);
    }

    #[test]
    fn test_storage_as_world_resource() {
        let mut world = World::new();
        world.insert_resource(RenderDataStorage::with_capacity(4));
        let e = world.spawn().unwrap();
        let storage = world.resource_mut::<RenderDataStorage>().unwrap();
        let slot = storage.allocate(e);
        assert_eq!(storage.entity_at(slot), Some(e));
    }
}
