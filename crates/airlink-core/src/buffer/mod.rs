//! Fixed-capacity I/O buffers shared by both transports.

pub mod io_buffer;

pub use io_buffer::{BufferError, Direction, IoBuffer};
