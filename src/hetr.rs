//! Heterogeneous computations spanning several endpoints.
//!
//! Each child computation runs on its own thread, so a `Send` on one
//! endpoint can meet the `Recv` on another. Pairing every send with a
//! matching receive is the caller's job; an unmatched `Recv` blocks.

use std::thread;

use crate::error::{FlexForgeError, ForgeResult};
use crate::transformer::Computation;

#[derive(Debug, Default)]
pub struct HetrComputation {
    children: Vec<Computation>,
}

impl HetrComputation {
    pub fn new(children: Vec<Computation>) -> Self {
        Self { children }
    }

    pub fn push(&mut self, child: Computation) {
        self.children.push(child);
    }

    /// Run every child once, concurrently. Reports the first failure in
    /// child order after all children have finished.
    pub fn run(&mut self) -> ForgeResult<()> {
        let results: Vec<ForgeResult<()>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .children
                .iter_mut()
                .enumerate()
                .map(|(i, child)| {
                    scope.spawn(move || {
                        let result = child.run();
                        if let Err(e) = &result {
                            tracing::error!(endpoint = i, error = %e, "endpoint failed");
                        }
                        result
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(FlexForgeError::InternalError("endpoint thread panicked".to_string()))
                    })
                })
                .collect()
        });
        results.into_iter().collect()
    }

    pub fn children(&self) -> &[Computation] {
        &self.children
    }

    pub fn child(&self, index: usize) -> Option<&Computation> {
        self.children.get(index)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}
