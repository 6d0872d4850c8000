//! The [`U8ReprEnum`] trait, for enums that travel over the wire as a single byte.

/// Conversion between an enum and the single byte that represents it on the wire.
pub trait U8ReprEnum: Sized {
    /// Returns the variant represented by `value`, or `None` if the byte does not
    /// correspond to any variant.
    fn from_u8(value: u8) -> Option<Self>;

    /// Returns the byte representation of this variant.
    fn into_u8(self) -> u8;
}
