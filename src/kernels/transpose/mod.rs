//! Dimshuffle (generalized transpose) kernels
//!
//! A dimshuffle copies a tensor into a new layout whose axis `k` is the
//! source's axis `axes[k]`. Kernels are generated per `(dtype, shape, axes)`
//! and cached, so every op with the same signature shares one handle.
//!
//! Launch geometry follows the shared-memory tiled transpose: 32x32 tiles
//! processed by 32x8 thread blocks, with a 32x33 staging tile to keep
//! column reads free of bank conflicts. The x and y grid dimensions cover
//! the two innermost output axes; z covers every outer axis.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let src = TensorDescriptionWrapper::new(&input, 2)?;
//! let dst = TensorDescriptionWrapper::new(&output, 2)?;
//! let (handle, mut params) =
//!     get_dimshuffle(&cache, input.dtype, src.shape(), &[1, 0], &src, &dst)?;
//! params.bind(runtime.memory())?;
//! handle.launch(runtime.stream(), params.frozen()?, 1 << 16)?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;

use crate::device::{Runtime, Stream};
use crate::error::{FlexForgeError, ForgeResult};
use crate::graph::{Op, OpKind};
use crate::kernels::{Kernel, Param, ParameterList};
use crate::tensor::{check_permutation, element_count, DType, TensorDescriptionWrapper};

/// Tile edge, in elements
pub const TILE_DIM: u32 = 32;

/// Rows of a tile handled by one block per pass
pub const BLOCK_ROWS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// A generated copy-transpose kernel.
#[derive(Debug)]
pub struct KernelHandle {
    pub name: String,
    pub dtype: DType,
    /// Source shape (already padded)
    pub shape: Vec<usize>,
    /// Output axis `k` reads source axis `axes[k]`
    pub axes: Vec<usize>,
    pub out_shape: Vec<usize>,
    pub grid: Dim3,
    pub block: Dim3,
    pub shared_mem_bytes: usize,
    /// Structural arguments: output dims, then element count
    pub args: Vec<Param>,
}

impl KernelHandle {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Length of the launch parameter list:
    /// `dst, src, args..., src strides..., dst strides...`.
    pub fn param_count(&self) -> usize {
        2 + self.args.len() + 2 * self.rank()
    }

    pub fn element_count(&self) -> usize {
        element_count(&self.out_shape)
    }

    /// Enqueue one execution with a resolved parameter list.
    ///
    /// # Errors
    ///
    /// - `KernelLaunchFailed` - parameter list does not match this kernel
    pub fn launch(
        &self,
        stream: &Stream,
        params: Arc<[Param]>,
        parallel_threshold: usize,
    ) -> ForgeResult<()> {
        let launch_err = |msg: String| FlexForgeError::KernelLaunchFailed(format!("{}: {}", self.name, msg));

        if params.len() != self.param_count() {
            return Err(launch_err(format!(
                "expected {} parameters, got {}",
                self.param_count(),
                params.len()
            )));
        }

        let dst = params[0]
            .as_address()
            .cloned()
            .ok_or_else(|| launch_err("destination not resolved".to_string()))?;
        let src = params[1]
            .as_address()
            .cloned()
            .ok_or_else(|| launch_err("source not resolved".to_string()))?;
        if src.dtype != self.dtype || dst.dtype != self.dtype {
            return Err(launch_err(format!(
                "buffers are {}/{}, kernel is {}",
                src.dtype, dst.dtype, self.dtype
            )));
        }

        let rank = self.rank();
        let ints = params[2..]
            .iter()
            .map(|p| p.as_int().ok_or_else(|| launch_err(format!("non-integer argument {:?}", p))))
            .collect::<ForgeResult<Vec<i64>>>()?;
        let dims: Vec<usize> = ints[..rank].iter().map(|&d| d as usize).collect();
        let count = ints[rank] as usize;
        let strides_at = self.args.len();
        let src_strides: Vec<isize> = ints[strides_at..strides_at + rank]
            .iter()
            .map(|&s| s as isize)
            .collect();
        let dst_strides: Vec<isize> = ints[strides_at + rank..]
            .iter()
            .map(|&s| s as isize)
            .collect();

        let axes = self.axes.clone();
        let name = self.name.clone();
        let dtype = self.dtype;

        tracing::trace!(kernel = %name, grid = ?self.grid, block = ?self.block, count, "launch");

        stream.enqueue("dimshuffle", move || {
            let index_pair = |flat: usize| -> (usize, usize) {
                let mut rem = flat;
                let mut s = src.offset as isize;
                let mut d = dst.offset as isize;
                for k in (0..dims.len()).rev() {
                    let m = (rem % dims[k]) as isize;
                    rem /= dims[k];
                    s += m * src_strides[axes[k]];
                    d += m * dst_strides[k];
                }
                (s as usize, d as usize)
            };

            let parallel = count >= parallel_threshold;
            let pairs: Vec<(usize, usize)> = if parallel {
                (0..count).into_par_iter().map(index_pair).collect()
            } else {
                (0..count).map(index_pair).collect()
            };

            let size = dtype.size();
            let (src_end, dst_end) = pairs
                .iter()
                .fold((0, 0), |(a, b), &(s, d)| (a.max((s + 1) * size), b.max((d + 1) * size)));
            if src_end > src.buffer.len() || dst_end > dst.buffer.len() {
                return Err(FlexForgeError::KernelLaunchFailed(format!(
                    "{}: access outside buffer bounds",
                    name
                )));
            }

            let mut staged = vec![0u8; count * size];
            {
                let bytes = src.buffer.read()?;
                let gather = |(chunk, &(s, _)): (&mut [u8], &(usize, usize))| {
                    chunk.copy_from_slice(&bytes[s * size..(s + 1) * size]);
                };
                if parallel {
                    staged.par_chunks_mut(size).zip(pairs.par_iter()).for_each(gather);
                } else {
                    staged.chunks_mut(size).zip(pairs.iter()).for_each(gather);
                }
            }

            let mut bytes = dst.buffer.write()?;
            for (chunk, &(_, d)) in staged.chunks(size).zip(pairs.iter()) {
                bytes[d * size..(d + 1) * size].copy_from_slice(chunk);
            }
            Ok(())
        })
    }
}

type CacheKey = (DType, Vec<usize>, Vec<usize>);

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Generated kernels keyed by `(dtype, shape, axes)`.
#[derive(Debug, Default)]
pub struct KernelCache {
    kernels: Mutex<HashMap<CacheKey, Arc<KernelHandle>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_compile<F>(&self, key: CacheKey, compile: F) -> ForgeResult<Arc<KernelHandle>>
    where
        F: FnOnce(&CacheKey) -> KernelHandle,
    {
        let mut kernels = self.kernels.lock()?;
        if let Some(handle) = kernels.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(handle));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(compile(&key));
        tracing::debug!(kernel = %handle.name, "generated kernel");
        kernels.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.kernels.lock().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> ForgeResult<()> {
        self.kernels.lock()?.clear();
        Ok(())
    }
}

/// Get (or generate) the copy-transpose kernel for a signature.
///
/// # Arguments
///
/// * `shape` - source shape, already padded to kernel rank
/// * `axes` - output axis `k` reads source axis `axes[k]`; a list shorter
///   than `shape` is completed with the identity over the padded axes
///
/// # Errors
///
/// - `InvalidAxes` - `axes` is not a permutation of the source axes
pub fn get_copy_transpose_kernel(
    cache: &KernelCache,
    dtype: DType,
    shape: &[usize],
    axes: &[usize],
) -> ForgeResult<Arc<KernelHandle>> {
    let mut axes = axes.to_vec();
    axes.extend(axes.len()..shape.len());
    check_permutation(&axes, shape.len())?;

    cache.get_or_compile((dtype, shape.to_vec(), axes), |(dtype, shape, axes)| {
        compile_copy_transpose(*dtype, shape, axes)
    })
}

fn compile_copy_transpose(dtype: DType, shape: &[usize], axes: &[usize]) -> KernelHandle {
    let out_shape: Vec<usize> = axes.iter().map(|&a| shape[a]).collect();
    let rank = out_shape.len();
    let tiles = |n: usize| n.div_ceil(TILE_DIM as usize) as u32;

    let grid = match rank {
        0 => Dim3::new(1, 1, 1),
        1 => Dim3::new(tiles(out_shape[0]), 1, 1),
        _ => Dim3::new(
            tiles(out_shape[rank - 1]),
            tiles(out_shape[rank - 2]),
            element_count(&out_shape[..rank - 2]) as u32,
        ),
    };

    let mut args: Vec<Param> = out_shape.iter().map(|&d| Param::Int(d as i64)).collect();
    args.push(Param::Int(element_count(&out_shape) as i64));

    let join = |v: &[usize], sep: &str| {
        v.iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(sep)
    };

    KernelHandle {
        name: format!(
            "copy_transpose_{}_{}_{}",
            dtype,
            join(shape, "x"),
            join(axes, "")
        ),
        dtype,
        shape: shape.to_vec(),
        axes: axes.to_vec(),
        out_shape,
        grid,
        block: Dim3::new(TILE_DIM, BLOCK_ROWS, 1),
        shared_mem_bytes: (TILE_DIM * (TILE_DIM + 1)) as usize * dtype.size(),
        args,
    }
}

/// Kernel handle plus an unbound parameter list copying `src` into `dst`.
///
/// Parameters: `[dst, src, args..., src strides..., dst strides...]`.
pub fn get_dimshuffle(
    cache: &KernelCache,
    dtype: DType,
    shape: &[usize],
    axes: &[usize],
    src: &TensorDescriptionWrapper,
    dst: &TensorDescriptionWrapper,
) -> ForgeResult<(Arc<KernelHandle>, ParameterList)> {
    let handle = get_copy_transpose_kernel(cache, dtype, shape, axes)?;

    if src.shape() != handle.shape.as_slice() {
        return Err(FlexForgeError::ShapeMismatch {
            expected: handle.shape.clone(),
            got: src.shape().to_vec(),
        });
    }
    if dst.shape() != handle.out_shape.as_slice() {
        return Err(FlexForgeError::ShapeMismatch {
            expected: handle.out_shape.clone(),
            got: dst.shape().to_vec(),
        });
    }
    for w in [src, dst] {
        if w.dtype() != dtype {
            return Err(FlexForgeError::DTypeMismatch {
                expected: dtype,
                got: w.dtype(),
            });
        }
    }

    let mut params = Vec::with_capacity(handle.param_count());
    params.push(Param::Unresolved(dst.td().clone()));
    params.push(Param::Unresolved(src.td().clone()));
    params.extend(handle.args.iter().cloned());
    params.extend(src.strides().iter().map(|&s| Param::Int(s as i64)));
    params.extend(dst.strides().iter().map(|&s| Param::Int(s as i64)));

    let list = ParameterList::new(handle.name.clone(), params);
    Ok((handle, list))
}

/// Kernel object for a dimshuffle op.
#[derive(Debug)]
pub struct DimShuffleKernel {
    runtime: Arc<Runtime>,
    name: String,
    handle: Arc<KernelHandle>,
    params: ParameterList,
}

impl DimShuffleKernel {
    pub fn new(runtime: Arc<Runtime>, op: &Op) -> ForgeResult<Self> {
        let axes = match &op.kind {
            OpKind::DimShuffle { axes } => axes,
            other => {
                return Err(FlexForgeError::InvalidOp(format!(
                    "dimshuffle kernel given {}",
                    other.name()
                )))
            }
        };
        let input = match op.args.as_slice() {
            [input] => input,
            args => {
                return Err(FlexForgeError::InvalidOp(format!(
                    "dimshuffle takes one input, got {}",
                    args.len()
                )))
            }
        };
        let output = op.tensor_description();

        check_permutation(axes, input.rank())?;
        let expected: Vec<usize> = axes.iter().map(|&a| input.shape[a]).collect();
        if output.shape != expected {
            return Err(FlexForgeError::ShapeMismatch {
                expected,
                got: output.shape.clone(),
            });
        }

        let min_rank = runtime.config().min_kernel_rank;
        let src = TensorDescriptionWrapper::new(input, min_rank)?;
        let dst = TensorDescriptionWrapper::new(output, min_rank)?;
        let (handle, params) = get_dimshuffle(
            runtime.kernel_cache(),
            input.dtype,
            src.shape(),
            axes,
            &src,
            &dst,
        )?;

        let name = format!("dimshuffle({} -> {})", input.id, output.id);
        tracing::debug!(kernel = %name, handle = %handle.name, "constructed");
        Ok(Self {
            runtime,
            name,
            handle,
            params,
        })
    }

    pub fn handle(&self) -> &Arc<KernelHandle> {
        &self.handle
    }
}

impl Kernel for DimShuffleKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind_buffers(&mut self) -> ForgeResult<()> {
        self.params.bind(self.runtime.memory())
    }

    fn execute(&self) -> ForgeResult<()> {
        self.handle.launch(
            self.runtime.stream(),
            self.params.frozen()?,
            self.runtime.config().parallel_threshold,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{TensorDescription, TensorId};

    #[test]
    fn test_geometry() {
        let cache = KernelCache::new();
        let h = get_copy_transpose_kernel(&cache, DType::F32, &[4, 70, 33], &[0, 2, 1]).unwrap();
        assert_eq!(h.out_shape, vec![4, 33, 70]);
        assert_eq!(h.block, Dim3::new(32, 8, 1));
        assert_eq!(h.grid, Dim3::new(3, 2, 4));
        assert_eq!(h.shared_mem_bytes, 32 * 33 * 4);
        let args: Vec<i64> = h.args.iter().filter_map(Param::as_int).collect();
        assert_eq!(args, vec![4, 33, 70, 4 * 33 * 70]);
    }

    #[test]
    fn test_axes_padded_with_identity() {
        let cache = KernelCache::new();
        let h = get_copy_transpose_kernel(&cache, DType::F32, &[5, 1], &[0]).unwrap();
        assert_eq!(h.axes, vec![0, 1]);
        assert_eq!(h.out_shape, vec![5, 1]);
    }

    #[test]
    fn test_invalid_axes() {
        let cache = KernelCache::new();
        let result = get_copy_transpose_kernel(&cache, DType::F32, &[2, 3], &[1, 1]);
        assert!(matches!(result, Err(FlexForgeError::InvalidAxes(_))));
        let result = get_copy_transpose_kernel(&cache, DType::F32, &[2, 3], &[0, 1, 2]);
        assert!(matches!(result, Err(FlexForgeError::InvalidAxes(_))));
    }

    #[test]
    fn test_cache_hits() {
        let cache = KernelCache::new();
        let a = get_copy_transpose_kernel(&cache, DType::F32, &[2, 3], &[1, 0]).unwrap();
        let b = get_copy_transpose_kernel(&cache, DType::F32, &[2, 3], &[1, 0]).unwrap();
        let c = get_copy_transpose_kernel(&cache, DType::F16, &[2, 3], &[1, 0]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 2,
                entries: 2
            }
        );
        cache.clear().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_parameter_order() {
        let cache = KernelCache::new();
        let input = TensorDescription::new(TensorId(0), DType::F32, vec![2, 3]);
        let output = TensorDescription::new(TensorId(1), DType::F32, vec![3, 2]);
        let src = TensorDescriptionWrapper::new(&input, 2).unwrap();
        let dst = TensorDescriptionWrapper::new(&output, 2).unwrap();

        let (handle, params) =
            get_dimshuffle(&cache, DType::F32, src.shape(), &[1, 0], &src, &dst).unwrap();
        assert_eq!(params.len(), handle.param_count());

        let p = params.params();
        assert!(matches!(&p[0], Param::Unresolved(td) if td.id == TensorId(1)));
        assert!(matches!(&p[1], Param::Unresolved(td) if td.id == TensorId(0)));
        let ints: Vec<i64> = p[2..].iter().filter_map(Param::as_int).collect();
        // dims, count, src strides, dst strides
        assert_eq!(ints, vec![3, 2, 6, 3, 1, 2, 1]);
    }

    #[test]
    fn test_output_shape_checked() {
        let cache = KernelCache::new();
        let input = TensorDescription::new(TensorId(0), DType::F32, vec![2, 3]);
        let output = TensorDescription::new(TensorId(1), DType::F32, vec![2, 3]);
        let src = TensorDescriptionWrapper::new(&input, 2).unwrap();
        let dst = TensorDescriptionWrapper::new(&output, 2).unwrap();
        let result = get_dimshuffle(&cache, DType::F32, src.shape(), &[1, 0], &src, &dst);
        assert!(matches!(result, Err(FlexForgeError::ShapeMismatch { .. })));
    }
}
