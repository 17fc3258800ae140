// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contiguous, order-preserving batching of an input collection.
//!
//! Batches are slices along dimension 0. Every batch holds `batch_size`
//! samples except possibly the last one, which holds the remainder.

use candle_core::Tensor;

use crate::error::{Result, TcavError};

/// Iterator over `(start, len)` ranges covering `0..total` in order.
///
/// # Example
///
/// ```
/// use candle_tcav::util::batching::BatchRanges;
///
/// let ranges: Vec<_> = BatchRanges::new(7, 3).collect();
/// assert_eq!(ranges, vec![(0, 3), (3, 3), (6, 1)]);
/// ```
#[derive(Debug, Clone)]
pub struct BatchRanges {
    /// Next start offset.
    next: usize,
    /// Total number of samples.
    total: usize,
    /// Maximum samples per batch (at least 1).
    batch_size: usize,
}

impl BatchRanges {
    /// Ranges over `total` samples in batches of at most `batch_size`.
    ///
    /// A `batch_size` of zero is treated as one.
    #[must_use]
    pub fn new(total: usize, batch_size: usize) -> Self {
        Self {
            next: 0,
            total,
            batch_size: batch_size.max(1),
        }
    }
}

impl Iterator for BatchRanges {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let start = self.next;
        let len = self.batch_size.min(self.total - start);
        self.next = start + len;
        Some((start, len))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.next.min(self.total)).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BatchRanges {}

/// Split `inputs` along dimension 0 into batches of at most `batch_size`.
///
/// # Shapes
/// - `inputs`: `[n, ...]`
/// - returns: `ceil(n / batch_size)` tensors of shape `[<= batch_size, ...]`
///
/// # Errors
///
/// Returns [`TcavError::Config`] if `batch_size` is zero, or
/// [`TcavError::Model`] if `inputs` has no batch dimension.
pub fn batch_tensor(inputs: &Tensor, batch_size: usize) -> Result<Vec<Tensor>> {
    if batch_size == 0 {
        return Err(TcavError::Config("batch_size must be at least 1".into()));
    }
    let total = inputs.dim(0)?;
    BatchRanges::new(total, batch_size)
        .map(|(start, len)| Ok(inputs.narrow(0, start, len)?))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use candle_core::{DType, Device};

    use super::*;

    #[test]
    fn ranges_cover_everything_in_order() {
        let ranges: Vec<_> = BatchRanges::new(10, 4).collect();
        assert_eq!(ranges, vec![(0, 4), (4, 4), (8, 2)]);
        assert_eq!(BatchRanges::new(10, 4).len(), 3);
    }

    #[test]
    fn exact_multiple_has_no_short_batch() {
        let ranges: Vec<_> = BatchRanges::new(6, 3).collect();
        assert_eq!(ranges, vec![(0, 3), (3, 3)]);
    }

    #[test]
    fn oversized_batch_is_single_range() {
        let ranges: Vec<_> = BatchRanges::new(5, 64).collect();
        assert_eq!(ranges, vec![(0, 5)]);
    }

    #[test]
    fn empty_collection_has_no_batches() {
        assert_eq!(BatchRanges::new(0, 8).count(), 0);
    }

    #[test]
    fn batch_tensor_preserves_rows() {
        let inputs = Tensor::arange(0f32, 10.0, &Device::Cpu)
            .unwrap()
            .reshape((5, 2))
            .unwrap();
        let batches = batch_tensor(&inputs, 2).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].to_vec2::<f32>().unwrap(), vec![vec![8.0, 9.0]]);

        let rejoined = Tensor::cat(&batches, 0).unwrap();
        assert_eq!(
            rejoined.to_vec2::<f32>().unwrap(),
            inputs.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn batch_tensor_rejects_zero_and_scalars() {
        let inputs = Tensor::zeros((3, 1), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            batch_tensor(&inputs, 0),
            Err(TcavError::Config(_))
        ));
        let scalar = Tensor::new(1f32, &Device::Cpu).unwrap();
        assert!(batch_tensor(&scalar, 1).is_err());
    }
}
