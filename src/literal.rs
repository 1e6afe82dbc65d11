use std::sync::Arc;

use thiserror::Error;

use crate::{
    layout::{IntoLayout, Layout},
    num::{DataType, Scalar, dispatch},
};

#[derive(Debug, Error)]
pub enum LiteralError {
    #[error("literal type error: data type {0} mismatches {1}")]
    Type(DataType, DataType),
    #[error("literal creation error: layout {0}'s size not match data len {1}")]
    Create(Layout, usize),
}

/// A host-resident typed value. This is what travels between the host and the
/// device transfer service, and what output tensors are built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    layout: Layout,
    r#type: DataType,
    data: Arc<[u8]>,
}

impl Literal {
    pub fn from_slice<T: Scalar>(
        layout: impl IntoLayout,
        data: &[T],
    ) -> Result<Self, LiteralError> {
        let layout = layout.into_layout();
        if layout.size() != data.len() {
            return Err(LiteralError::Create(layout, data.len()));
        }
        let r#type = T::DATA_TYPE;
        let data = bytemuck::cast_slice(data).to_vec().into();
        Ok(Self {
            layout,
            r#type,
            data,
        })
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout.clone()
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.r#type
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Reads the contents back as typed elements. Returns error if the
    /// element type mismatches.
    pub fn to_vec<T: Scalar>(&self) -> Result<Vec<T>, LiteralError> {
        if self.r#type != T::DATA_TYPE {
            return Err(LiteralError::Type(self.r#type, T::DATA_TYPE));
        }
        Ok(bytemuck::pod_collect_to_vec(&self.data[..]))
    }

    /// Widens the contents to `f64` lanes, regardless of the element type.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        fn lanes<T: Scalar>(data: &[u8]) -> Vec<f64> {
            let data: Vec<T> = bytemuck::pod_collect_to_vec(data);
            data.into_iter().map(Scalar::to_f64).collect()
        }
        dispatch!(self.r#type, lanes(&self.data[..]))
    }
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;

    #[test]
    fn test_create() {
        let literal = Literal::from_slice([2, 2], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(literal.layout(), Layout::from_shape([2, 2]));
        assert_eq!(literal.data_type(), DataType::F32);
        assert_eq!(literal.data_size(), 16);
        assert_eq!(literal.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_create_size_mismatch() {
        let literal = Literal::from_slice([3], &[1.0f32, 2.0]);
        assert!(matches!(literal, Err(LiteralError::Create(_, 2))));
    }

    #[test]
    fn test_type_mismatch() {
        let literal = Literal::from_slice([2], &[1u32, 2]).unwrap();
        assert!(matches!(
            literal.to_vec::<f32>(),
            Err(LiteralError::Type(DataType::U32, DataType::F32))
        ));
    }

    #[test]
    fn test_f64_lanes() {
        let data = [0.5, -1.0, 2.0].map(f16::from_f64);
        let literal = Literal::from_slice([3], &data).unwrap();
        assert_eq!(literal.to_f64_vec(), vec![0.5, -1.0, 2.0]);
    }
}
