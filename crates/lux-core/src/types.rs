//! Cell element types.

use serde::{Deserialize, Serialize};

use crate::constants::CELL_VOLUME;
use crate::coords::LocalPos;
use crate::error::{Error, Result};

/// Identifier for a surface material.
///
/// Material ID 0 is reserved for "no material" and never appears on an element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MaterialId(pub u16);

impl MaterialId {
    /// No material
    pub const NONE: Self = Self(0);
    /// Stone surface
    pub const STONE: Self = Self(1);
    /// Dirt surface
    pub const DIRT: Self = Self(2);
    /// Grass surface
    pub const GRASS: Self = Self(3);

    /// Returns true if this is the reserved "no material" id
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Axis an element faces along (2 bits on the wire).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes in index order.
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    /// Axis index (0, 1 or 2).
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }
}

/// Direction an element faces: an axis plus a sign.
///
/// Travels on the wire as its packed 3-bit form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub struct Orientation {
    pub axis: Axis,
    /// `true` when the face points towards the positive end of `axis`.
    pub positive: bool,
}

impl Orientation {
    /// Create a new orientation
    #[inline]
    pub const fn new(axis: Axis, positive: bool) -> Self {
        Self { axis, positive }
    }

    /// Pack into 3 bits: axis in bits 0-1, sign in bit 2.
    #[inline]
    pub const fn to_bits(self) -> u8 {
        self.axis.index() as u8 | ((self.positive as u8) << 2)
    }

    /// Unpack from the 3-bit form. Axis value 3 is invalid.
    pub fn from_bits(bits: u8) -> Result<Self> {
        let axis = match bits & 0b11 {
            0 => Axis::X,
            1 => Axis::Y,
            2 => Axis::Z,
            _ => return Err(Error::InvalidData(format!("invalid axis bits in {bits:#05b}"))),
        };
        if bits >> 3 != 0 {
            return Err(Error::InvalidData(format!(
                "orientation uses more than 3 bits: {bits:#010b}"
            )));
        }
        Ok(Self::new(axis, bits & 0b100 != 0))
    }
}

impl From<Orientation> for u8 {
    fn from(orientation: Orientation) -> Self {
        orientation.to_bits()
    }
}

impl TryFrom<u8> for Orientation {
    type Error = Error;

    fn try_from(bits: u8) -> Result<Self> {
        Self::from_bits(bits)
    }
}

/// A directed face of a sub-cell unit; the unit of incremental update inside a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Element {
    /// Linear [`LocalPos`] index of the sub-cell unit this face belongs to.
    pub local_index: u16,
    pub orientation: Orientation,
    pub material: MaterialId,
}

impl Element {
    /// Create a new element
    #[inline]
    pub const fn new(local_index: u16, orientation: Orientation, material: MaterialId) -> Self {
        Self {
            local_index,
            orientation,
            material,
        }
    }

    /// Sub-cell position of this element.
    #[inline]
    pub const fn local_pos(&self) -> LocalPos {
        LocalPos::from_index(self.local_index as usize)
    }

    /// Check that the element refers to a valid sub-cell unit and material.
    pub fn validate(&self) -> Result<()> {
        if self.local_index as usize >= CELL_VOLUME {
            return Err(Error::OutOfBounds(format!(
                "element local index {} >= {CELL_VOLUME}",
                self.local_index
            )));
        }
        if self.material.is_none() {
            return Err(Error::InvalidData(format!(
                "element at local index {} has no material",
                self.local_index
            )));
        }
        Ok(())
    }
}
