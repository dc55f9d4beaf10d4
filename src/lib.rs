//! FlexForge - kernel execution for compiled tensor graphs
//!
//! Graph ops become kernel objects that are constructed once, bound to
//! device memory once, and executed many times on an in-order stream.
//! Integer tensors can carry a dynamic fixed-point ("flex") scale that
//! kernels quantize against and report overflow statistics to.

#![allow(clippy::too_many_arguments)] // Kernel generators take full launch signatures
#![allow(clippy::needless_range_loop)] // Index loops mirror kernel indexing
#![allow(clippy::type_complexity)] // Cache keys and parameter tuples

pub mod channel;
pub mod config;
pub mod device;
pub mod error;
pub mod flex;
pub mod graph;
pub mod hetr;
pub mod initializer;
pub mod kernels;
pub mod logging;
pub mod tensor;
pub mod transformer;

pub use channel::{channel, ChannelCapacity, ChannelReceiver, ChannelSender};
pub use config::{FlexConfig, RuntimeConfig};
pub use device::{DeviceTensor, Runtime};
pub use error::{ErrorCategory, FlexForgeError, ForgeResult};
pub use flex::{FlexDType, FlexEntry, FlexId, FlexManager, ScaleController};
pub use graph::{Graph, Op, OpKind};
pub use hetr::HetrComputation;
pub use initializer::{Initializer, WeightAxes};
pub use kernels::{ItemValue, Kernel};
pub use logging::{init_logging_default, init_with_config, LogFormat, LogLevel, LoggingConfig};
pub use tensor::{DType, HostTensor, Item, SliceSpec, TensorDescription, TensorId};
pub use transformer::{Computation, Transformer};
