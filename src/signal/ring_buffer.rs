/// Fixed-capacity circular buffer addressed by absolute sample position.
///
/// The capacity is a power of two; position `n` maps to slot `n & (capacity - 1)`,
/// so writing past the capacity silently overwrites the oldest samples.
#[derive(Debug, Clone, PartialEq)]
pub struct CircularBuffer<T> {
    buffer: Vec<T>,
    mask: usize,
}

impl<T: Copy + Default> CircularBuffer<T> {
    /// Buffer with a capacity of `1 << exponent` slots.
    pub fn with_exponent(exponent: u32) -> Self {
        let capacity = 1usize << exponent;
        Self {
            buffer: vec![T::default(); capacity],
            mask: capacity - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline(always)]
    pub fn slot(&self, pos: usize) -> usize {
        pos & self.mask
    }

    #[inline(always)]
    pub fn get(&self, pos: usize) -> T {
        self.buffer[pos & self.mask]
    }

    #[inline(always)]
    pub fn set(&mut self, pos: usize, value: T) {
        let slot = pos & self.mask;
        self.buffer[slot] = value;
    }

    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|x| *x = T::default());
    }

    /// The `len` samples ending at (and including) `pos`, oldest first.
    ///
    /// The buffer does not track the write head: positions older than one
    /// capacity behind the last write read whatever overwrote their slot.
    pub fn last(&self, pos: usize, len: usize) -> impl Iterator<Item = T> + '_ {
        let len = len.min(self.capacity()).min(pos + 1);
        (pos + 1 - len..=pos).map(move |p| self.get(p))
    }

    /// Raw storage in slot order.
    pub fn as_slice(&self) -> &[T] {
        &self.buffer
    }
}
