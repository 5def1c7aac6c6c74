//! Named, typed, fixed-arity fields attached to mesh entities.
//!
//! A [`Tag`] couples a name, a component count, a transfer policy, and a
//! [`TagData`] payload — a closed tagged union over the four supported
//! scalar types. Typed access goes through [`TagValue`], which returns a
//! [`MeshError::TagTypeMismatch`] instead of dispatching dynamically.

use crate::array::Read;
use crate::error::{MeshError, Result};

/// How a tag's values are recomputed when entities split.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransferPolicy {
    /// Children copy the parent entity's value.
    #[default]
    Inherit,
    /// Vertex tags: midpoints take the mean of the parent's vertices.
    Linear,
    /// Cell tags: the parent's quantity splits equally among children, so
    /// the sum over leaf cells is preserved.
    Conserve,
    /// Values are copied from the representative parent and expected to be
    /// recomputed by the caller afterwards.
    Pointwise,
}

/// The closed set of tag scalar types.
#[derive(Clone, Debug, PartialEq)]
pub enum TagData {
    I8(Read<i8>),
    I32(Read<i32>),
    I64(Read<i64>),
    F64(Read<f64>),
}

impl TagData {
    pub fn len(&self) -> usize {
        match self {
            TagData::I8(a) => a.len(),
            TagData::I32(a) => a.len(),
            TagData::I64(a) => a.len(),
            TagData::F64(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TagData::I8(_) => "i8",
            TagData::I32(_) => "i32",
            TagData::I64(_) => "i64",
            TagData::F64(_) => "f64",
        }
    }
}

/// Scalars storable in a [`Tag`].
pub trait TagValue: crate::comm::CommScalar {
    const TYPE_NAME: &'static str;
    fn wrap(data: Read<Self>) -> TagData;
    fn unwrap(data: &TagData) -> Option<&Read<Self>>;
}

macro_rules! impl_tag_value {
    ($($t:ty => $variant:ident, $name:literal;)*) => {$(
        impl TagValue for $t {
            const TYPE_NAME: &'static str = $name;
            fn wrap(data: Read<Self>) -> TagData {
                TagData::$variant(data)
            }
            fn unwrap(data: &TagData) -> Option<&Read<Self>> {
                match data {
                    TagData::$variant(a) => Some(a),
                    _ => None,
                }
            }
        }
    )*};
}

impl_tag_value! {
    i8 => I8, "i8";
    i32 => I32, "i32";
    i64 => I64, "i64";
    f64 => F64, "f64";
}

/// A named, typed, fixed-arity field over one topological dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    name: String,
    ncomps: usize,
    policy: TransferPolicy,
    data: TagData,
}

impl Tag {
    pub fn new<T: TagValue>(
        name: impl Into<String>,
        ncomps: usize,
        policy: TransferPolicy,
        data: Read<T>,
    ) -> Self {
        Self {
            name: name.into(),
            ncomps,
            policy,
            data: T::wrap(data),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ncomps(&self) -> usize {
        self.ncomps
    }

    pub fn policy(&self) -> TransferPolicy {
        self.policy
    }

    pub fn data(&self) -> &TagData {
        &self.data
    }

    /// Typed view of the backing array.
    pub fn array<T: TagValue>(&self) -> Result<&Read<T>> {
        T::unwrap(&self.data).ok_or_else(|| MeshError::TagTypeMismatch {
            name: self.name.clone(),
            stored: self.data.type_name(),
            requested: T::TYPE_NAME,
        })
    }

    /// Replace the backing array; length and type must match.
    pub fn set_array<T: TagValue>(&mut self, data: Read<T>) -> Result<()> {
        // type check against the stored variant first
        self.array::<T>()?;
        if data.len() != self.data.len() {
            return Err(MeshError::LengthMismatch {
                expected: self.data.len(),
                found: data.len(),
            });
        }
        self.data = T::wrap(data);
        Ok(())
    }

    /// Replace the backing data wholesale (used when entity counts change).
    pub(crate) fn replace_data(&mut self, data: TagData) {
        self.data = data;
    }
}
