//! Fixed-capacity bump arena for int8 tensors.
//!
//! Capacity is set once at construction. Allocations are offsets into one
//! boxed block; nothing is returned to the arena until [`TensorArena::reset`],
//! which the engine calls at the start of every inference.

use super::InferenceError;

/// Every allocation starts on this boundary
pub const ARENA_ALIGNMENT: usize = 16;

/// Bytes an allocation of `len` consumes, including alignment padding
pub const fn aligned(len: usize) -> usize {
    len.div_ceil(ARENA_ALIGNMENT) * ARENA_ALIGNMENT
}

/// A tensor's location in the arena; valid until the next reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaRegion {
    offset: usize,
    len: usize,
}

impl ArenaRegion {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn end(&self) -> usize {
        self.offset + self.len
    }
}

#[derive(Debug)]
pub struct TensorArena {
    memory: Box<[i8]>,
    used: usize,
    limit: usize,
    high_water: usize,
}

impl TensorArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            memory: vec![0i8; capacity].into_boxed_slice(),
            used: 0,
            limit: capacity,
            high_water: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    /// Bytes usable in the current call
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Largest `used` value seen since construction
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Release every allocation. Restores the full capacity unless
    /// `limit` is given, which caps this call's usable bytes.
    pub fn reset(&mut self, limit: Option<usize>) {
        self.used = 0;
        self.limit = limit.map_or(self.capacity(), |l| l.min(self.capacity()));
    }

    pub fn alloc(&mut self, len: usize) -> Result<ArenaRegion, InferenceError> {
        let size = aligned(len);
        let available = self.limit - self.used;
        if size > available {
            return Err(InferenceError::ArenaExhausted {
                requested: size,
                available,
            });
        }
        let region = ArenaRegion {
            offset: self.used,
            len,
        };
        self.used += size;
        self.high_water = self.high_water.max(self.used);
        Ok(region)
    }

    pub fn get(&self, region: ArenaRegion) -> &[i8] {
        &self.memory[region.offset..region.end()]
    }

    pub fn get_mut(&mut self, region: ArenaRegion) -> &mut [i8] {
        &mut self.memory[region.offset..region.end()]
    }

    /// Borrow an input tensor and an output tensor at once.
    /// `input` must have been allocated before `output`.
    pub fn input_output(
        &mut self,
        input: ArenaRegion,
        output: ArenaRegion,
    ) -> (&[i8], &mut [i8]) {
        assert!(
            input.end() <= output.offset,
            "arena regions overlap or are out of order"
        );
        let (head, tail) = self.memory.split_at_mut(output.offset);
        (&head[input.offset..input.end()], &mut tail[..output.len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_aligned_and_bounded() {
        let mut arena = TensorArena::new(64);
        let a = arena.alloc(10).unwrap();
        assert_eq!(a.len(), 10);
        assert_eq!(arena.used(), 16);
        let _b = arena.alloc(32).unwrap();
        assert_eq!(arena.used(), 48);

        assert_eq!(
            arena.alloc(17),
            Err(InferenceError::ArenaExhausted {
                requested: 32,
                available: 16
            })
        );
        // A failed alloc leaves the arena untouched
        assert_eq!(arena.used(), 48);
        assert!(arena.alloc(16).is_ok());
    }

    #[test]
    fn test_reset_reclaims_everything() {
        let mut arena = TensorArena::new(32);
        arena.alloc(32).unwrap();
        assert!(arena.alloc(1).is_err());
        arena.reset(None);
        assert_eq!(arena.used(), 0);
        assert!(arena.alloc(32).is_ok());
        assert_eq!(arena.high_water(), 32);
    }

    #[test]
    fn test_limit_applies_until_next_reset() {
        let mut arena = TensorArena::new(64);
        arena.reset(Some(16));
        assert_eq!(arena.limit(), 16);
        assert!(arena.alloc(17).is_err());

        arena.reset(None);
        assert_eq!(arena.limit(), 64);
        assert!(arena.alloc(17).is_ok());

        // A limit above capacity is clamped
        arena.reset(Some(1 << 20));
        assert_eq!(arena.limit(), 64);
    }

    #[test]
    fn test_input_output_borrow() {
        let mut arena = TensorArena::new(64);
        let input = arena.alloc(4).unwrap();
        let output = arena.alloc(4).unwrap();
        arena.get_mut(input).copy_from_slice(&[1, 2, 3, 4]);

        let (src, dst) = arena.input_output(input, output);
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s * 2;
        }
        assert_eq!(arena.get(output), &[2, 4, 6, 8]);
    }
}
