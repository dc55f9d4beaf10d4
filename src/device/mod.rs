//! Host-emulated accelerator
//!
//! Buffers live in host memory, but everything else behaves like a device:
//! work is queued on an asynchronous in-order stream, addresses are only
//! known after allocation, and results become visible at a barrier.

pub mod buffer;
pub mod memory;
pub mod rng;
pub mod runtime;
pub mod stream;
pub mod tensor;

pub use buffer::{DeviceAddress, DeviceBuffer};
pub use memory::{AddressResolver, DeviceMemory, MemoryStats};
pub use rng::DeviceRng;
pub use runtime::Runtime;
pub use stream::Stream;
pub use tensor::{DeviceTensor, SetSource};
