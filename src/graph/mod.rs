//! Computation graph consumed by the transformer.
//!
//! The graph records tensor descriptions and the ops between them in
//! program order. Descriptions are numbered as they are added, views
//! included, and every op refers to descriptions this graph produced.

pub mod op;

use std::collections::HashMap;

use crate::channel::{ChannelReceiver, ChannelSender};
use crate::error::{FlexForgeError, ForgeResult};
use crate::flex::FlexId;
use crate::initializer::{Initializer, WeightAxes};
use crate::kernels::ItemValue;
use crate::tensor::{DType, Item, TensorDescription, TensorId};

pub use op::{Op, OpKind};

#[derive(Debug, Default, Clone)]
pub struct Graph {
    tensors: Vec<TensorDescription>,
    ops: Vec<Op>,
    next_flex: u32,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> TensorId {
        TensorId(self.tensors.len())
    }

    fn push_tensor(&mut self, td: TensorDescription) -> TensorDescription {
        self.tensors.push(td.clone());
        td
    }

    fn check_known(&self, td: &TensorDescription) -> ForgeResult<()> {
        match self.tensors.get(td.id.0) {
            Some(known) if known == td => Ok(()),
            _ => Err(FlexForgeError::InvalidOp(format!(
                "tensor {} does not belong to this graph",
                td.id
            ))),
        }
    }

    /// Contiguous tensor.
    pub fn add_tensor(&mut self, dtype: DType, shape: Vec<usize>) -> TensorDescription {
        let td = TensorDescription::new(self.next_id(), dtype, shape);
        self.push_tensor(td)
    }

    /// Contiguous tensor with its own flex entry. `dtype` is the integer storage type.
    pub fn add_flex_tensor(&mut self, dtype: DType, shape: Vec<usize>) -> ForgeResult<TensorDescription> {
        if dtype.is_float() {
            return Err(FlexForgeError::DTypeMismatch {
                expected: DType::I16,
                got: dtype,
            });
        }
        let flex_id = FlexId(self.next_flex);
        self.next_flex += 1;
        let td = TensorDescription::new(self.next_id(), dtype, shape).with_flex(flex_id);
        Ok(self.push_tensor(td))
    }

    /// Tensor with explicit strides and offset over its own storage.
    pub fn add_strided(
        &mut self,
        dtype: DType,
        shape: Vec<usize>,
        strides: Vec<isize>,
        offset: usize,
    ) -> ForgeResult<TensorDescription> {
        let td = TensorDescription::with_layout(self.next_id(), dtype, shape, strides, offset)?;
        Ok(self.push_tensor(td))
    }

    /// View of `td` with `axis` reversed.
    pub fn flip(&mut self, td: &TensorDescription, axis: usize) -> ForgeResult<TensorDescription> {
        self.check_known(td)?;
        let view = td.flipped(self.next_id(), axis)?;
        Ok(self.push_tensor(view))
    }

    /// View of `td` with permuted axes.
    pub fn permute(&mut self, td: &TensorDescription, axes: &[usize]) -> ForgeResult<TensorDescription> {
        self.check_known(td)?;
        let view = td.permuted(self.next_id(), axes)?;
        Ok(self.push_tensor(view))
    }

    /// Contiguous copy of `src` with permuted axes.
    pub fn dimshuffle(&mut self, src: &TensorDescription, axes: &[usize]) -> ForgeResult<TensorDescription> {
        self.check_known(src)?;
        crate::tensor::check_permutation(axes, src.rank())?;
        let shape = axes.iter().map(|&a| src.shape[a]).collect();
        let out = self.add_tensor(src.dtype, shape);
        self.ops.push(Op::new(
            OpKind::DimShuffle {
                axes: axes.to_vec(),
            },
            out.clone(),
            vec![src.clone()],
        ));
        Ok(out)
    }

    pub fn fill(&mut self, td: &TensorDescription, value: f64) -> ForgeResult<()> {
        self.check_known(td)?;
        self.ops
            .push(Op::new(OpKind::Fill { value }, td.clone(), Vec::new()));
        Ok(())
    }

    pub fn rng_fill(
        &mut self,
        td: &TensorDescription,
        tag: &str,
        params: HashMap<String, f64>,
    ) -> ForgeResult<()> {
        self.check_known(td)?;
        self.ops.push(Op::new(
            OpKind::RngFill {
                tag: tag.to_string(),
                params,
            },
            td.clone(),
            Vec::new(),
        ));
        Ok(())
    }

    /// `td[item] = value`; no item means the whole tensor.
    pub fn set_item(
        &mut self,
        td: &TensorDescription,
        value: ItemValue,
        item: Option<Item>,
    ) -> ForgeResult<()> {
        self.check_known(td)?;
        let args = match &value {
            ItemValue::Tensor(src) => {
                self.check_known(src)?;
                vec![src.clone()]
            }
            _ => Vec::new(),
        };
        self.ops
            .push(Op::new(OpKind::SetItem { value, item }, td.clone(), args));
        Ok(())
    }

    pub fn send(&mut self, td: &TensorDescription, sender: ChannelSender) -> ForgeResult<()> {
        self.check_known(td)?;
        self.ops.push(Op::new(
            OpKind::Send { sender },
            td.clone(),
            vec![td.clone()],
        ));
        Ok(())
    }

    pub fn recv(&mut self, td: &TensorDescription, receiver: ChannelReceiver) -> ForgeResult<()> {
        self.check_known(td)?;
        self.ops
            .push(Op::new(OpKind::Recv { receiver }, td.clone(), Vec::new()));
        Ok(())
    }

    /// Initialize a weight tensor with `init`.
    pub fn initialize(
        &mut self,
        td: &TensorDescription,
        init: &Initializer,
        axes: &WeightAxes,
    ) -> ForgeResult<()> {
        self.check_known(td)?;
        let kind = init.op_kind(&td.shape, axes)?;
        self.ops.push(Op::new(kind, td.clone(), Vec::new()));
        Ok(())
    }

    pub fn tensors(&self) -> &[TensorDescription] {
        &self.tensors
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn tensor(&self, id: TensorId) -> Option<&TensorDescription> {
        self.tensors.get(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential() {
        let mut g = Graph::new();
        let a = g.add_tensor(DType::F32, vec![2, 3]);
        let v = g.flip(&a, 0).unwrap();
        let b = g.dimshuffle(&a, &[1, 0]).unwrap();
        assert_eq!((a.id, v.id, b.id), (TensorId(0), TensorId(1), TensorId(2)));
        assert_eq!(b.shape, vec![3, 2]);
        assert_eq!(v.base, Some(a.id));
    }

    #[test]
    fn test_op_metadata() {
        let mut g = Graph::new();
        let a = g.add_tensor(DType::F32, vec![2, 3]);
        let b = g.dimshuffle(&a, &[1, 0]).unwrap();
        let op = &g.ops()[0];
        assert_eq!(op.name(), "dimshuffle");
        assert_eq!(op.tensor_description().id, b.id);
        assert_eq!(op.call_info()[0].id, a.id);
    }

    #[test]
    fn test_foreign_tensor_rejected() {
        let mut g = Graph::new();
        let foreign = TensorDescription::new(TensorId(5), DType::F32, vec![1]);
        assert!(matches!(g.fill(&foreign, 1.0), Err(FlexForgeError::InvalidOp(_))));
    }

    #[test]
    fn test_flex_tensors_get_distinct_ids() {
        let mut g = Graph::new();
        let a = g.add_flex_tensor(DType::I16, vec![4]).unwrap();
        let b = g.add_flex_tensor(DType::I8, vec![4]).unwrap();
        assert_eq!(a.flex_id, Some(FlexId(0)));
        assert_eq!(b.flex_id, Some(FlexId(1)));
        assert!(g.add_flex_tensor(DType::F32, vec![4]).is_err());
    }
}
