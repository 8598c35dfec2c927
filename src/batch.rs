//! Fixed-capacity instance batches.
//!
//! Cells are grouped by arrival order (embedding table order), never by
//! position: batch `i` owns cells `[i * size, (i + 1) * size)`. Each batch
//! carries an update counter the renderer compares against its last upload.

use std::ops::Range;

use glam::{Mat4, Vec3};

/// Default number of instances per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Per-instance data for a point sprite.
/// Must match the renderer's `CellInstance` layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CellInstance {
    /// xyz = render position, w = radius
    pub position: [f32; 4],
    /// RGBA
    pub color: [f32; 4],
}

/// One rendered cell.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    /// Row of this cell in the dataset.
    pub cell: usize,
    /// Centered, scaled embedding coordinate.
    pub position: Vec3,
    /// Raw annotation codes in annotation order, captured at build time.
    pub codes: Vec<f64>,
    /// Highlighted by the user.
    pub selected: bool,
    /// Drawn at all.
    pub visible: bool,
    /// Current RGBA color.
    pub color: [f32; 4],
}

impl InstanceRecord {
    /// Unselected, visible record with a transparent placeholder color.
    #[must_use]
    pub fn new(cell: usize, position: Vec3, codes: Vec<f64>) -> Self {
        Self {
            cell,
            position,
            codes,
            selected: false,
            visible: true,
            color: [0.0; 4],
        }
    }
}

/// Group of instances sharing one anchor transform.
#[derive(Debug, Clone)]
pub struct Batch {
    id: usize,
    instances: Vec<InstanceRecord>,
    update_count: u64,
    dirty: bool,
    /// Model transform applied to every instance in the batch.
    pub anchor: Mat4,
}

impl Batch {
    fn new(id: usize, capacity: usize) -> Self {
        Self {
            id,
            instances: Vec::with_capacity(capacity),
            update_count: 0,
            dirty: false,
            anchor: Mat4::IDENTITY,
        }
    }

    /// Position of this batch in the partition.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Records in cell order.
    #[must_use]
    pub fn instances(&self) -> &[InstanceRecord] {
        &self.instances
    }

    /// Mutable records. Membership cannot change through this slice.
    pub fn instances_mut(&mut self) -> &mut [InstanceRecord] {
        &mut self.instances
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Completed re-encode passes since construction. Selection and
    /// visibility edits do not count here; they only set
    /// [`is_dirty`](Self::is_dirty).
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    /// Count one re-encode pass. The batch also becomes dirty.
    pub fn mark_updated(&mut self) {
        self.update_count += 1;
        self.dirty = true;
    }

    /// Flag instance data as changed outside a re-encode pass.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether instance data changed since the last
    /// [`take_dirty`](Self::take_dirty).
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag, returning whether the batch needs re-upload.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Visible records as GPU instances. Hidden records are skipped.
    #[must_use]
    pub fn gpu_instances(&self, radius: f32) -> Vec<CellInstance> {
        self.instances
            .iter()
            .filter(|r| r.visible)
            .map(|r| CellInstance {
                position: [r.position.x, r.position.y, r.position.z, radius],
                color: r.color,
            })
            .collect()
    }

    /// [`gpu_instances`](Self::gpu_instances) as raw bytes ready for upload.
    #[must_use]
    pub fn instance_bytes(&self, radius: f32) -> Vec<u8> {
        bytemuck::cast_slice(&self.gpu_instances(radius)).to_vec()
    }
}

/// Ordered batches plus the cell → slot mapping.
#[derive(Debug, Clone)]
pub struct BatchPartitioner {
    batch_size: usize,
    batches: Vec<Batch>,
    len: usize,
}

impl BatchPartitioner {
    /// Empty partitioner. A `batch_size` of zero is treated as one.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batches: Vec::new(),
            len: 0,
        }
    }

    /// Cell ranges owned by each batch for `cell_count` cells.
    #[must_use]
    pub fn partition(cell_count: usize, batch_size: usize) -> Vec<Range<usize>> {
        let size = batch_size.max(1);
        (0..cell_count.div_ceil(size))
            .map(|i| i * size..((i + 1) * size).min(cell_count))
            .collect()
    }

    /// Capacity of every batch.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// `(batch, offset)` of a cell.
    #[must_use]
    pub fn assign(&self, cell: usize) -> (usize, usize) {
        (cell / self.batch_size, cell % self.batch_size)
    }

    /// Append the next record in arrival order, opening a batch when the
    /// last one is full. Returns where it landed.
    pub fn push(&mut self, record: InstanceRecord) -> (usize, usize) {
        let slot = self.assign(self.len);
        if slot.0 == self.batches.len() {
            self.batches.push(Batch::new(slot.0, self.batch_size));
        }
        if let Some(batch) = self.batches.get_mut(slot.0) {
            batch.instances.push(record);
        }
        self.len += 1;
        slot
    }

    /// Total records across all batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no record has been pushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Batches in partition order.
    #[must_use]
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Mutable batches in partition order.
    pub fn batches_mut(&mut self) -> &mut [Batch] {
        &mut self.batches
    }

    /// Record for one cell.
    #[must_use]
    pub fn record(&self, cell: usize) -> Option<&InstanceRecord> {
        let (b, o) = self.assign(cell);
        self.batches.get(b)?.instances.get(o)
    }

    /// Mutable record for one cell.
    pub fn record_mut(&mut self, cell: usize) -> Option<&mut InstanceRecord> {
        let (b, o) = self.assign(cell);
        self.batches.get_mut(b)?.instances.get_mut(o)
    }

    /// All records in cell order.
    pub fn records(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.batches.iter().flat_map(|b| b.instances.iter())
    }
}
