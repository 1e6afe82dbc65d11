use std::sync::Arc;

use derive_more::{Deref, Display, From, Into};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// An immutable tensor shape. The empty shape denotes a scalar.
#[derive(
    Debug, Default, Clone, PartialEq, Eq, Hash, Deref, From, Into, Display, Serialize, Deserialize,
)]
#[display("[{}]", _0.iter().format(", "))]
pub struct Layout(Arc<[usize]>);

impl Layout {
    #[inline]
    pub fn from_shape(shape: impl IntoLayout) -> Self {
        shape.into_layout()
    }

    /// Number of elements covered by the layout.
    #[inline]
    pub fn size(&self) -> usize {
        self.iter().product()
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self
    }
}

impl From<Vec<usize>> for Layout {
    #[inline]
    fn from(value: Vec<usize>) -> Self {
        Self(value.into())
    }
}

pub trait IntoLayout {
    fn into_layout(self) -> Layout;
}

impl IntoLayout for Layout {
    #[inline]
    fn into_layout(self) -> Layout {
        self
    }
}

impl<const N: usize> IntoLayout for [usize; N] {
    #[inline]
    fn into_layout(self) -> Layout {
        Layout(self.into())
    }
}

impl IntoLayout for &[usize] {
    #[inline]
    fn into_layout(self) -> Layout {
        Layout(self.into())
    }
}

impl IntoLayout for Vec<usize> {
    #[inline]
    fn into_layout(self) -> Layout {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_size() {
        let layout = Layout::from_shape([2, 3, 4]);
        assert_eq!(layout.len(), 3);
        assert_eq!(layout.size(), 24);
        assert_eq!(layout.shape(), &[2, 3, 4]);
    }

    #[test]
    fn test_scalar_layout() {
        let layout = Layout::from_shape([]);
        assert_eq!(layout.len(), 0);
        assert_eq!(layout.size(), 1);
    }

    #[test]
    fn test_display() {
        assert_eq!(Layout::from_shape([2, 3]).to_string(), "[2, 3]");
        assert_eq!(Layout::from_shape([]).to_string(), "[]");
    }
}
