//! Send/Recv kernels: tensor transfer between endpoints over a channel.

use std::sync::Arc;

use crate::channel::{ChannelReceiver, ChannelSender};
use crate::device::{DeviceTensor, Runtime, SetSource};
use crate::error::ForgeResult;
use crate::kernels::{Binding, Kernel};
use crate::tensor::TensorDescription;

/// Puts a host snapshot of its source on a channel.
///
/// Execution waits for the stream so the snapshot sees every earlier write.
#[derive(Debug)]
pub struct SendKernel {
    runtime: Arc<Runtime>,
    name: String,
    src: Binding<DeviceTensor>,
    sender: ChannelSender,
}

impl SendKernel {
    pub fn new(runtime: Arc<Runtime>, td: &TensorDescription, sender: ChannelSender) -> ForgeResult<Self> {
        td.validate()?;
        let name = format!("send({})", td.id);
        tracing::debug!(kernel = %name, "constructed");
        Ok(Self {
            runtime,
            name,
            src: Binding::Unresolved(td.clone()),
            sender,
        })
    }
}

impl Kernel for SendKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind_buffers(&mut self) -> ForgeResult<()> {
        self.src.bind(&self.name, self.runtime.memory())
    }

    fn execute(&self) -> ForgeResult<()> {
        let value = self.src.get(&self.name)?.get(self.runtime.stream())?;
        tracing::trace!(kernel = %self.name, shape = ?value.shape, "put");
        self.sender.put(value)
    }
}

/// Takes the next value off a channel and writes it into its destination.
///
/// Blocks until a value is available. A scalar destination receives the
/// value's single element; anything else is a full assignment with
/// broadcasting.
#[derive(Debug)]
pub struct RecvKernel {
    runtime: Arc<Runtime>,
    name: String,
    dst: Binding<DeviceTensor>,
    receiver: ChannelReceiver,
}

impl RecvKernel {
    pub fn new(runtime: Arc<Runtime>, td: &TensorDescription, receiver: ChannelReceiver) -> ForgeResult<Self> {
        td.validate()?;
        let name = format!("recv({})", td.id);
        tracing::debug!(kernel = %name, "constructed");
        Ok(Self {
            runtime,
            name,
            dst: Binding::Unresolved(td.clone()),
            receiver,
        })
    }
}

impl Kernel for RecvKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind_buffers(&mut self) -> ForgeResult<()> {
        self.dst.bind(&self.name, self.runtime.memory())
    }

    fn execute(&self) -> ForgeResult<()> {
        let dst = self.dst.get(&self.name)?;
        let value = self.receiver.get()?;
        tracing::trace!(kernel = %self.name, shape = ?value.shape, "got");

        if dst.is_scalar() {
            dst.fill(self.runtime.stream(), value.to_scalar()?)
        } else {
            dst.set_item(self.runtime.stream(), None, SetSource::Host(value))
        }
    }
}
