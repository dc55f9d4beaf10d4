//! Graph operations handed to the transformer.

use std::collections::HashMap;

use crate::channel::{ChannelReceiver, ChannelSender};
use crate::kernels::ItemValue;
use crate::tensor::{Item, TensorDescription};

#[derive(Debug, Clone)]
pub enum OpKind {
    /// Output axis `k` is input axis `axes[k]`
    DimShuffle { axes: Vec<usize> },
    Fill { value: f64 },
    /// Distribution tag (`uniform`, `normal`) and its named parameters
    RngFill {
        tag: String,
        params: HashMap<String, f64>,
    },
    SetItem {
        value: ItemValue,
        item: Option<Item>,
    },
    Send { sender: ChannelSender },
    Recv { receiver: ChannelReceiver },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::DimShuffle { .. } => "dimshuffle",
            OpKind::Fill { .. } => "fill",
            OpKind::RngFill { .. } => "rng_fill",
            OpKind::SetItem { .. } => "set_item",
            OpKind::Send { .. } => "send",
            OpKind::Recv { .. } => "recv",
        }
    }
}

/// One node of a compiled graph.
///
/// `output` is the tensor the op writes (for `Send`, the tensor it reads);
/// `args` are the tensors it reads.
#[derive(Debug, Clone)]
pub struct Op {
    pub kind: OpKind,
    pub output: TensorDescription,
    pub args: Vec<TensorDescription>,
}

impl Op {
    pub fn new(kind: OpKind, output: TensorDescription, args: Vec<TensorDescription>) -> Self {
        Self { kind, output, args }
    }

    pub fn tensor_description(&self) -> &TensorDescription {
        &self.output
    }

    pub fn call_info(&self) -> &[TensorDescription] {
        &self.args
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}
