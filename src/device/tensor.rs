//! Device tensors: a resolved description bound to a buffer.

use crate::device::{DeviceAddress, DeviceBuffer, Stream};
use crate::error::{FlexForgeError, ForgeResult};
use crate::malformed;
use crate::tensor::host::advance;
use crate::tensor::item::{broadcast_index, check_broadcast, SlicedLayout};
use crate::tensor::{DType, HostTensor, Item, TensorDescription};

/// Value written by [`DeviceTensor::set_item`].
#[derive(Debug, Clone)]
pub enum SetSource {
    Scalar(f64),
    Host(HostTensor),
    Device(DeviceTensor),
}

impl SetSource {
    fn shape(&self) -> &[usize] {
        match self {
            SetSource::Scalar(_) => &[],
            SetSource::Host(h) => &h.shape,
            SetSource::Device(t) => &t.shape,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceTensor {
    buffer: DeviceBuffer,
    dtype: DType,
    shape: Vec<usize>,
    strides: Vec<isize>,
    offset: usize,
}

impl DeviceTensor {
    /// Bind `td` to `buffer`; the layout must fit inside the buffer.
    pub fn new(buffer: DeviceBuffer, td: &TensorDescription) -> ForgeResult<Self> {
        td.validate()?;
        Self::from_layout(
            buffer,
            td.dtype,
            SlicedLayout {
                shape: td.shape.clone(),
                strides: td.strides.clone(),
                offset: td.offset as isize,
            },
        )
    }

    pub(crate) fn from_layout(
        buffer: DeviceBuffer,
        dtype: DType,
        layout: SlicedLayout,
    ) -> ForgeResult<Self> {
        let SlicedLayout {
            shape,
            strides,
            offset,
        } = layout;
        if offset < 0 {
            return Err(malformed!("negative element offset {}", offset));
        }
        let tensor = Self {
            buffer,
            dtype,
            shape,
            strides,
            offset: offset as usize,
        };
        let needed = tensor.reach() * dtype.size();
        if needed > tensor.buffer.len() {
            return Err(malformed!(
                "layout {:?}/{:?}+{} needs {} bytes, buffer {} holds {}",
                tensor.shape,
                tensor.strides,
                tensor.offset,
                needed,
                tensor.buffer.id(),
                tensor.buffer.len()
            ));
        }
        Ok(tensor)
    }

    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn address(&self) -> DeviceAddress {
        DeviceAddress {
            buffer: self.buffer.clone(),
            offset: self.offset,
            dtype: self.dtype,
        }
    }

    /// Elements past the highest reachable index, counted from buffer start.
    fn reach(&self) -> usize {
        if self.shape.contains(&0) {
            return 0;
        }
        let hi: isize = self
            .shape
            .iter()
            .zip(self.strides.iter())
            .map(|(&d, &s)| if s > 0 { (d as isize - 1) * s } else { 0 })
            .sum();
        self.offset + hi as usize + 1
    }

    /// Storage index of every element, in row-major logical order.
    pub fn storage_indices(&self) -> Vec<usize> {
        storage_indices(&self.shape, &self.strides, self.offset)
    }

    /// Read the current contents. Does not wait for the stream.
    pub fn read_host(&self) -> ForgeResult<HostTensor> {
        let indices = self.storage_indices();
        let bytes = self.buffer.read()?;
        let data = read_elements(&bytes, self.dtype, &indices);
        HostTensor::from_vec(self.dtype, self.shape.clone(), data)
    }

    /// Overwrite the contents. Does not wait for the stream.
    pub fn write_host(&self, host: &HostTensor) -> ForgeResult<()> {
        if host.shape != self.shape {
            return Err(FlexForgeError::ShapeMismatch {
                expected: self.shape.clone(),
                got: host.shape.clone(),
            });
        }
        let indices = self.storage_indices();
        let mut bytes = self.buffer.write()?;
        write_elements(&mut bytes, self.dtype, &indices, host.data.iter().copied());
        Ok(())
    }

    /// Wait for the stream, then read.
    pub fn get(&self, stream: &Stream) -> ForgeResult<HostTensor> {
        stream.synchronize()?;
        self.read_host()
    }

    /// Enqueue a write of `value` into every element.
    pub fn fill(&self, stream: &Stream, value: f64) -> ForgeResult<()> {
        let target = self.clone();
        stream.enqueue("fill", move || {
            let indices = target.storage_indices();
            let mut bytes = target.buffer.write()?;
            write_elements(
                &mut bytes,
                target.dtype,
                &indices,
                std::iter::repeat(value).take(indices.len()),
            );
            Ok(())
        })
    }

    /// Enqueue `x = x * mul + add` over every element.
    pub fn affine_inplace(&self, stream: &Stream, mul: f64, add: f64) -> ForgeResult<()> {
        let target = self.clone();
        stream.enqueue("affine", move || {
            let indices = target.storage_indices();
            let mut bytes = target.buffer.write()?;
            let values = read_elements(&bytes, target.dtype, &indices);
            write_elements(
                &mut bytes,
                target.dtype,
                &indices,
                values.into_iter().map(|x| x * mul + add),
            );
            Ok(())
        })
    }

    /// Enqueue an assignment of `source` into the elements selected by `item`.
    ///
    /// The source broadcasts against the selection (dims right-aligned, each
    /// 1 or equal) and is converted to this tensor's dtype.
    pub fn set_item(&self, stream: &Stream, item: Option<&Item>, source: SetSource) -> ForgeResult<()> {
        let layout = match item {
            Some(item) => item.apply(&self.shape, &self.strides, self.offset as isize)?,
            None => SlicedLayout {
                shape: self.shape.clone(),
                strides: self.strides.clone(),
                offset: self.offset as isize,
            },
        };
        let target = Self::from_layout(self.buffer.clone(), self.dtype, layout)?;
        check_broadcast(source.shape(), &target.shape)?;

        stream.enqueue("set_item", move || {
            let (values, value_shape) = match source {
                SetSource::Scalar(v) => (vec![v], Vec::new()),
                SetSource::Host(h) => (h.data, h.shape),
                SetSource::Device(t) => {
                    let h = t.read_host()?;
                    (h.data, h.shape)
                }
            };

            let indices = target.storage_indices();
            let mut index = vec![0usize; target.rank()];
            let mut ordered = Vec::with_capacity(indices.len());
            for _ in 0..indices.len() {
                ordered.push(values[broadcast_index(&index, &value_shape)]);
                advance(&mut index, &target.shape);
            }

            let mut bytes = target.buffer.write()?;
            write_elements(&mut bytes, target.dtype, &indices, ordered.into_iter());
            Ok(())
        })
    }

    /// Largest absolute value currently stored. Does not wait for the stream.
    pub fn max_abs(&self) -> ForgeResult<f64> {
        Ok(self
            .read_host()?
            .data
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs())))
    }
}

/// Storage indices for a strided layout, row-major over `shape`.
pub fn storage_indices(shape: &[usize], strides: &[isize], offset: usize) -> Vec<usize> {
    let count: usize = shape.iter().product();
    let mut out = Vec::with_capacity(count);
    let mut index = vec![0usize; shape.len()];
    for _ in 0..count {
        let pos: isize = index
            .iter()
            .zip(strides.iter())
            .map(|(&i, &s)| i as isize * s)
            .sum::<isize>()
            + offset as isize;
        out.push(pos as usize);
        advance(&mut index, shape);
    }
    out
}

pub(crate) fn read_elements(bytes: &[u8], dtype: DType, indices: &[usize]) -> Vec<f64> {
    let size = dtype.size();
    indices
        .iter()
        .map(|&i| dtype.decode(&bytes[i * size..(i + 1) * size]))
        .collect()
}

pub(crate) fn write_elements<I>(bytes: &mut [u8], dtype: DType, indices: &[usize], values: I)
where
    I: Iterator<Item = f64>,
{
    let size = dtype.size();
    for (&i, v) in indices.iter().zip(values) {
        dtype.encode(v, &mut bytes[i * size..(i + 1) * size]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{SliceSpec, TensorId};

    fn tensor(shape: Vec<usize>) -> DeviceTensor {
        let td = TensorDescription::new(TensorId(0), DType::F32, shape);
        let buffer = DeviceBuffer::zeroed(0, td.storage_len() * 4);
        DeviceTensor::new(buffer, &td).unwrap()
    }

    #[test]
    fn test_storage_indices_negative_stride() {
        assert_eq!(storage_indices(&[3], &[-1], 2), vec![2, 1, 0]);
        assert_eq!(storage_indices(&[2, 2], &[1, 2], 0), vec![0, 2, 1, 3]);
        assert_eq!(storage_indices(&[], &[], 4), vec![4]);
    }

    #[test]
    fn test_layout_must_fit_buffer() {
        let td = TensorDescription::new(TensorId(0), DType::F32, vec![4]);
        let small = DeviceBuffer::zeroed(0, 8);
        assert!(DeviceTensor::new(small, &td).is_err());
    }

    #[test]
    fn test_fill_and_get() {
        let stream = Stream::new("tensor-fill").unwrap();
        let t = tensor(vec![2, 3]);
        t.fill(&stream, 1.5).unwrap();
        assert_eq!(t.get(&stream).unwrap().data, vec![1.5; 6]);
    }

    #[test]
    fn test_affine() {
        let stream = Stream::new("tensor-affine").unwrap();
        let t = tensor(vec![3]);
        t.write_host(&HostTensor::arange(DType::F32, vec![3])).unwrap();
        t.affine_inplace(&stream, 2.0, 1.0).unwrap();
        assert_eq!(t.get(&stream).unwrap().data, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_set_item_row_broadcast() {
        let stream = Stream::new("tensor-set").unwrap();
        let t = tensor(vec![2, 3]);
        let row = HostTensor::from_vec(DType::F32, vec![3], vec![7.0, 8.0, 9.0]).unwrap();
        t.set_item(
            &stream,
            Some(&Item::new(vec![SliceSpec::Index(1)])),
            SetSource::Host(row),
        )
        .unwrap();
        assert_eq!(
            t.get(&stream).unwrap().data,
            vec![0.0, 0.0, 0.0, 7.0, 8.0, 9.0]
        );
    }

    #[test]
    fn test_set_item_rejects_bad_broadcast() {
        let stream = Stream::new("tensor-set-bad").unwrap();
        let t = tensor(vec![2, 3]);
        let bad = HostTensor::arange(DType::F32, vec![2]);
        let result = t.set_item(&stream, None, SetSource::Host(bad));
        assert!(matches!(result, Err(FlexForgeError::ShapeMismatch { .. })));
    }
}
