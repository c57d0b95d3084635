//! Low level tape drive support: device backends, the drive
//! abstraction and the buffer pool shared by the stream layer.

mod error;
pub use error::*;

pub mod linux_mtio;

mod device;
pub use device::*;

mod linux_tape;
pub use linux_tape::*;

mod virtual_tape;
pub use virtual_tape::*;

mod drive;
pub use drive::*;

mod buffer;
pub use buffer::*;
