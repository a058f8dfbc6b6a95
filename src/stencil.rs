use crate::error::StencilError;

/// One issued stencil id. `wrapped` means every id was recycled to get it,
/// and the stencil buffer must be cleared before the mask is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub mask: u8,
    pub wrapped: bool,
}

/// Hands out stencil ids in `[1, 2^bits - 1]`, wrapping back to 1 once the
/// range is spent. Tracks how many issued masks are still in use so a wrap
/// never silently reuses an id that is still live.
#[derive(Debug, Clone)]
pub struct StencilAllocator {
    bits: u8,
    current: u8,
    live: u32,
    wraps: u32,
}

impl StencilAllocator {
    pub fn new(bits: u8) -> Self {
        Self {
            bits: bits.min(8),
            current: 0,
            live: 0,
            wraps: 0,
        }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn max_mask(&self) -> u8 {
        ((1u16 << self.bits) - 1) as u8
    }

    pub fn live(&self) -> u32 {
        self.live
    }

    pub fn wraps(&self) -> u32 {
        self.wraps
    }

    /// Ids left before the next wrap.
    pub fn remaining(&self) -> u8 {
        self.max_mask() - self.current
    }

    pub fn next_mask(&mut self) -> Result<Allocation, StencilError> {
        let max = self.max_mask();
        if max == 0 {
            return Err(StencilError::DepthExceeded {
                requested: 1,
                available: 0,
            });
        }
        let wrapped = self.current >= max;
        if wrapped {
            self.current = 0;
            self.wraps += 1;
        }
        self.current += 1;
        self.live += 1;
        Ok(Allocation {
            mask: self.current,
            wrapped,
        })
    }

    /// Makes sure `count` ids can be issued without wrapping in between.
    /// Returns `true` when that required recycling the whole range, in which
    /// case the caller clears the stencil buffer.
    pub fn reserve(&mut self, count: u32) -> Result<bool, StencilError> {
        if count == 0 {
            return Ok(false);
        }
        let max = u32::from(self.max_mask());
        if count > max {
            return Err(StencilError::DepthExceeded {
                requested: count,
                available: max,
            });
        }
        if count <= u32::from(self.remaining()) {
            return Ok(false);
        }
        if self.live > 0 {
            return Err(StencilError::WouldClobber { live: self.live });
        }
        self.current = 0;
        self.wraps += 1;
        Ok(true)
    }

    pub fn release(&mut self, mask: u8) {
        if mask == 0 {
            return;
        }
        self.live = self.live.saturating_sub(1);
    }

    /// Forgets every issued id; used right after a full stencil clear.
    pub fn reset(&mut self) {
        self.current = 0;
        self.live = 0;
    }
}
