/// Fixed-capacity circular buffer of 16-bit PCM samples.
///
/// Storage is allocated once in `new`; `write` and `read_into` never
/// allocate, so both are usable from an audio thread. Share across threads as
/// `Arc<parking_lot::Mutex<RingBuffer>>` and use `try_lock` on the real-time
/// side.
///
/// Overflow behavior: drops oldest samples.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Vec<i16>,
    write_index: usize,
    read_index: usize,
    available: usize,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: vec![0; capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
            capacity,
        }
    }

    /// Write samples, returning how many older samples were dropped to make room.
    ///
    /// If `samples` is larger than capacity, only the last `capacity` samples are kept.
    pub fn write(&mut self, samples: &[i16]) -> usize {
        if samples.is_empty() {
            return 0;
        }

        let mut dropped = 0;
        let samples = if samples.len() > self.capacity {
            dropped += samples.len() - self.capacity;
            &samples[samples.len() - self.capacity..]
        } else {
            samples
        };

        let overflow = (self.available + samples.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % self.capacity;
            self.available -= overflow;
            dropped += overflow;
        }

        // At most two contiguous runs: up to the end of storage, then from the start.
        let first = samples.len().min(self.capacity - self.write_index);
        self.buffer[self.write_index..self.write_index + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        if rest > 0 {
            self.buffer[..rest].copy_from_slice(&samples[first..]);
        }
        self.write_index = (self.write_index + samples.len()) % self.capacity;
        self.available += samples.len();
        dropped
    }

    /// Move up to `out.len()` samples into `out`, returning how many were copied.
    pub fn read_into(&mut self, out: &mut [i16]) -> usize {
        let to_read = out.len().min(self.available);
        if to_read == 0 {
            return 0;
        }

        let first = to_read.min(self.capacity - self.read_index);
        out[..first].copy_from_slice(&self.buffer[self.read_index..self.read_index + first]);
        let rest = to_read - first;
        if rest > 0 {
            out[first..to_read].copy_from_slice(&self.buffer[..rest]);
        }
        self.read_index = (self.read_index + to_read) % self.capacity;
        self.available -= to_read;
        to_read
    }

    /// Read and remove up to `count` samples into a new vector.
    pub fn read(&mut self, count: usize) -> Vec<i16> {
        let mut result = vec![0; count.min(self.available)];
        self.read_into(&mut result);
        result
    }

    /// Number of samples currently available for reading.
    pub fn count(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_write_read() {
        let mut buf = RingBuffer::new(10);
        assert_eq!(buf.write(&[1, 2, 3]), 0);

        assert_eq!(buf.count(), 3);
        assert_eq!(buf.read(3), vec![1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn read_partial() {
        let mut buf = RingBuffer::new(10);
        buf.write(&[1, 2, 3, 4, 5]);

        assert_eq!(buf.read(3), vec![1, 2, 3]);
        assert_eq!(buf.count(), 2);

        assert_eq!(buf.read(10), vec![4, 5]);
        assert!(buf.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut buf = RingBuffer::new(4);
        buf.write(&[1, 2, 3, 4]);
        assert_eq!(buf.write(&[5, 6]), 2);

        assert_eq!(buf.count(), 4);
        assert_eq!(buf.read(4), vec![3, 4, 5, 6]);
    }

    #[test]
    fn write_larger_than_capacity() {
        let mut buf = RingBuffer::new(3);
        assert_eq!(buf.write(&[1, 2, 3, 4, 5]), 2);

        assert_eq!(buf.count(), 3);
        assert_eq!(buf.read(3), vec![3, 4, 5]);
    }

    #[test]
    fn wraparound() {
        let mut buf = RingBuffer::new(4);

        buf.write(&[1, 2, 3]);
        buf.read(2);

        buf.write(&[4, 5, 6]);

        assert_eq!(buf.count(), 4);
        let mut out = [0i16; 4];
        assert_eq!(buf.read_into(&mut out), 4);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn read_into_short_leaves_tail_untouched() {
        let mut buf = RingBuffer::new(8);
        buf.write(&[7, 8]);

        let mut out = [-1i16; 4];
        assert_eq!(buf.read_into(&mut out), 2);
        assert_eq!(out, [7, 8, -1, -1]);
    }

    #[test]
    fn reset_clears_buffer() {
        let mut buf = RingBuffer::new(10);
        buf.write(&[1, 2, 3]);
        buf.reset();

        assert!(buf.is_empty());
        assert!(buf.read(10).is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buf = RingBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
        buf.write(&[9, 10]);
        assert_eq!(buf.read(1), vec![10]);
    }
}
