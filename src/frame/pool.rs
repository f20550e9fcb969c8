use crate::foundation::core::Extent;
use crate::foundation::error::{PipelineError, PipelineResult};
use crate::frame::PixelBuffer;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently lent out (being filled or held by the worker).
    pub in_flight: usize,
    /// Buffer allocations since the pool was created.
    pub allocations: u64,
    /// Buffers handed back and re-seated in their slot.
    pub reclaimed: u64,
    /// Checkouts refused because every slot was lent out.
    pub slot_busy: u64,
}

/// Fixed arena of PixelBuffer slots, handed out round-robin over the free ones.
///
/// A slot is either seated (`Some`, owned by the pool) or lent out (`None`). Checkout moves the
/// buffer out of its slot; the only way back in is [`BufferPool::reclaim`] with that same buffer.
/// All buffers are allocated up front, so the hot path never allocates.
pub struct BufferPool {
    extent: Extent,
    slots: Vec<Option<PixelBuffer>>,
    cursor: usize,
    stats: PoolStats,
}

impl BufferPool {
    pub fn new(extent: Extent, slot_count: usize) -> PipelineResult<Self> {
        if slot_count < 2 {
            return Err(PipelineError::validation(format!(
                "buffer pool needs at least 2 slots, got {slot_count}"
            )));
        }
        let slots = (0..slot_count)
            .map(|i| Some(PixelBuffer::alloc(i, extent)))
            .collect();
        Ok(Self {
            extent,
            slots,
            cursor: 0,
            stats: PoolStats {
                allocations: slot_count as u64,
                ..PoolStats::default()
            },
        })
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next checkout will take.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn in_flight(&self) -> usize {
        self.stats.in_flight
    }

    pub fn is_lent(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(Option::is_none)
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.clone()
    }

    /// Move the first free buffer at or after the cursor out of the pool. The cursor moves past
    /// the slot taken.
    ///
    /// Fails with `TransferFailure` when every buffer is lent out; the cursor stays put.
    pub fn checkout(&mut self) -> PipelineResult<PixelBuffer> {
        let n = self.slots.len();
        let cursor = self.cursor;
        let Some(buf) = (0..n)
            .map(|i| (cursor + i) % n)
            .find_map(|slot| self.slots[slot].take())
        else {
            self.stats.slot_busy = self.stats.slot_busy.saturating_add(1);
            return Err(PipelineError::transfer_failure(format!(
                "all {n} pixel buffer slots are in flight"
            )));
        };
        self.cursor = (buf.slot() + 1) % n;
        self.stats.in_flight += 1;
        Ok(buf)
    }

    /// Re-seat a buffer that came back from the worker (or was never sent).
    pub fn reclaim(&mut self, buf: PixelBuffer) -> PipelineResult<()> {
        let slot = buf.slot();
        if buf.extent() != self.extent {
            return Err(PipelineError::validation(format!(
                "buffer extent {} does not match pool extent {}",
                buf.extent(),
                self.extent
            )));
        }
        let Some(entry) = self.slots.get_mut(slot) else {
            return Err(PipelineError::validation(format!(
                "buffer slot {slot} is outside the pool"
            )));
        };
        if entry.is_some() {
            return Err(PipelineError::validation(format!(
                "buffer slot {slot} is already seated"
            )));
        }
        *entry = Some(buf);
        self.stats.in_flight = self.stats.in_flight.saturating_sub(1);
        self.stats.reclaimed = self.stats.reclaimed.saturating_add(1);
        Ok(())
    }
}
