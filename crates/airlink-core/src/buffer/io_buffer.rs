//! `IoBuffer`: a fixed-capacity byte buffer with read and write cursors.
//!
//! # Cursor model (for beginners)
//!
//! ```text
//!  0          read         write          capacity      storage.len()
//!  |----------|============|--------------|.............|
//!   consumed    available      space         not in use
//! ```
//!
//! - `available()` = `write - read`: bytes that have been filled but not yet
//!   drained (what a sender still has to push out, or what a receiver has not
//!   yet parsed).
//! - `space()` = `capacity - write`: room left to fill.
//!
//! The invariant `read <= write <= capacity <= storage.len()` holds after
//! every public call.
//!
//! # Reuse instead of reallocation
//!
//! The backing storage is allocated exactly once in [`IoBuffer::new`].
//! Reconnecting a transport calls [`IoBuffer::configure`], which only moves
//! the cursors and the usable length.  Memory use is therefore bounded for the
//! lifetime of the transport, which matters on a constrained device.

use thiserror::Error;

/// Transfer direction of a buffer.  Fixed when the buffer is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Filled by the socket, drained by the caller.
    Rx,
    /// Filled by the caller, drained by the socket.
    Tx,
}

/// Error type for buffer configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The requested usable length exceeds the storage allocated at creation.
    #[error("asked for {requested} bytes but buffer is only {capacity}")]
    TooSmall { requested: usize, capacity: usize },
}

/// A fixed-capacity byte buffer with independent read and write cursors.
#[derive(Debug)]
pub struct IoBuffer {
    storage: Box<[u8]>,
    capacity: usize,
    read: usize,
    write: usize,
    direction: Direction,
}

impl IoBuffer {
    /// Allocates a buffer of `size` bytes.  The whole allocation is usable
    /// until [`configure`](Self::configure) narrows it.
    pub fn new(size: usize, direction: Direction) -> Self {
        Self {
            storage: vec![0u8; size].into_boxed_slice(),
            capacity: size,
            read: 0,
            write: 0,
            direction,
        }
    }

    /// Sets the usable length and resets both cursors.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::TooSmall`] if `len` exceeds the allocation; the
    /// buffer is left untouched in that case.
    pub fn configure(&mut self, len: usize) -> Result<(), BufferError> {
        if len > self.storage.len() {
            return Err(BufferError::TooSmall {
                requested: len,
                capacity: self.storage.len(),
            });
        }
        self.capacity = len;
        self.reset();
        Ok(())
    }

    /// Detaches the buffer from its transport: no usable length, cursors zeroed.
    pub fn release(&mut self) {
        self.capacity = 0;
        self.reset();
    }

    /// Zeroes both cursors.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Usable length set by the last `configure`.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size of the backing allocation.
    pub fn max_capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes filled but not yet drained.
    pub fn available(&self) -> usize {
        self.write - self.read
    }

    /// Bytes that can still be filled.
    pub fn space(&self) -> usize {
        self.capacity - self.write
    }

    pub fn read_pos(&self) -> usize {
        self.read
    }

    pub fn write_pos(&self) -> usize {
        self.write
    }

    /// The `available()` bytes, from the read cursor to the write cursor.
    pub fn readable(&self) -> &[u8] {
        &self.storage[self.read..self.write]
    }

    /// The `space()` bytes, from the write cursor to the capacity.
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.storage[self.write..self.capacity]
    }

    /// Advances the write cursor after bytes were placed into [`writable`](Self::writable).
    ///
    /// Clamped to `space()` so the cursor never passes the capacity.
    pub fn commit(&mut self, n: usize) -> usize {
        debug_assert!(n <= self.space(), "commit past capacity");
        let n = n.min(self.space());
        self.write += n;
        n
    }

    /// Advances the read cursor after bytes were drained.
    ///
    /// Clamped to `available()` so the read cursor never passes the write cursor.
    pub fn consume(&mut self, n: usize) -> usize {
        debug_assert!(n <= self.available(), "consume past write cursor");
        let n = n.min(self.available());
        self.read += n;
        n
    }

    /// Copies as much of `data` as fits and returns the number of bytes taken.
    pub fn fill_from(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.space());
        let start = self.write;
        self.storage[start..start + n].copy_from_slice(&data[..n]);
        self.write += n;
        n
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_empty_with_full_space() {
        // Arrange / Act
        let buf = IoBuffer::new(64, Direction::Rx);

        // Assert
        assert_eq!(buf.available(), 0);
        assert_eq!(buf.space(), 64);
        assert_eq!(buf.direction(), Direction::Rx);
    }

    #[test]
    fn test_fill_then_consume_moves_cursors() {
        // Arrange
        let mut buf = IoBuffer::new(16, Direction::Tx);

        // Act
        let taken = buf.fill_from(b"hello");
        let drained = buf.consume(2);

        // Assert
        assert_eq!(taken, 5);
        assert_eq!(drained, 2);
        assert_eq!(buf.readable(), b"llo");
        assert_eq!(buf.available(), 3);
        assert_eq!(buf.space(), 11);
    }

    #[test]
    fn test_fill_from_truncates_at_capacity() {
        let mut buf = IoBuffer::new(4, Direction::Tx);
        let taken = buf.fill_from(b"abcdefgh");
        assert_eq!(taken, 4);
        assert_eq!(buf.space(), 0);
        assert_eq!(buf.readable(), b"abcd");
    }

    #[test]
    fn test_commit_advances_write_cursor() {
        // Arrange
        let mut buf = IoBuffer::new(8, Direction::Rx);

        // Act
        buf.writable()[..3].copy_from_slice(b"xyz");
        buf.commit(3);

        // Assert
        assert_eq!(buf.write_pos(), 3);
        assert_eq!(buf.readable(), b"xyz");
    }

    #[test]
    fn test_reset_zeroes_both_cursors() {
        let mut buf = IoBuffer::new(8, Direction::Tx);
        buf.fill_from(b"1234");
        buf.consume(1);
        buf.reset();
        assert_eq!(buf.read_pos(), 0);
        assert_eq!(buf.write_pos(), 0);
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn test_configure_narrows_capacity_and_resets() {
        // Arrange
        let mut buf = IoBuffer::new(32, Direction::Rx);
        buf.commit(10);

        // Act
        buf.configure(16).expect("16 fits in 32");

        // Assert
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.space(), 16);
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn test_configure_rejects_length_larger_than_allocation() {
        // Arrange
        let mut buf = IoBuffer::new(32, Direction::Rx);

        // Act
        let result = buf.configure(33);

        // Assert
        assert_eq!(
            result,
            Err(BufferError::TooSmall {
                requested: 33,
                capacity: 32
            })
        );
        assert_eq!(buf.capacity(), 32, "failed configure must not change the buffer");
    }

    #[test]
    fn test_release_leaves_no_usable_space() {
        let mut buf = IoBuffer::new(32, Direction::Rx);
        buf.release();
        assert_eq!(buf.space(), 0);
        assert_eq!(buf.max_capacity(), 32, "storage is kept for reuse");
    }
}
