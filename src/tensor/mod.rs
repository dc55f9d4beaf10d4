//! Tensor descriptions, element types and host-side values
//!
//! - `dtype`: element types and their encodings
//! - `description`: symbolic descriptions (shape, strides, identity)
//! - `wrapper`: fixed-rank canonical form used by kernel generation
//! - `host`: host-visible snapshots exchanged with device tensors
//! - `item`: slice expressions for item assignment

pub mod description;
pub mod dtype;
pub mod host;
pub mod item;
pub mod wrapper;

pub use description::{
    check_permutation, contiguous_strides, element_count, inverse_permutation,
    TensorDescription, TensorId,
};
pub use dtype::DType;
pub use host::HostTensor;
pub use item::{Item, SliceSpec};
pub use wrapper::TensorDescriptionWrapper;
