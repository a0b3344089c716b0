use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::{Endianness, ImageError, ImageId, ImageResult};

/// A position inside a specific binary image: `(which image, byte offset)`.
///
/// Locations are pure values. They carry no liveness guarantee of their own;
/// an offset is only checked against the image's current length at the moment
/// it is dereferenced, because a `Location` is routinely created before the
/// image has grown to cover it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Handle of the owning image.
    pub image: ImageId,
    /// Byte offset within that image.
    pub offset: usize,
}

impl Location {
    pub fn new(image: ImageId, offset: usize) -> Self {
        Self { image, offset }
    }
}

/// Bookkeeping record for one placeholder value.
///
/// A pointer has a fixed byte width, an optional destination (the location it
/// will eventually encode), and the ordered list of locations its rendered
/// bytes have been written to. The record itself is private to the arena;
/// callers hold `PointerId` handles.
#[derive(Debug)]
pub(super) struct Pointer {
    pub(super) width: usize,
    pub(super) destination: Option<Location>,
    pub(super) uses: Vec<Location>,
}

impl Pointer {
    pub(super) fn new(width: usize, destination: Option<Location>) -> ImageResult<Self> {
        if width < 1 || width > MAX_POINTER_WIDTH {
            return Err(ImageError::InvalidWidth { width });
        }
        Ok(Self { width, destination, uses: Vec::new() })
    }

    /// Render this pointer's current value as exactly `width` bytes.
    ///
    /// An unbound pointer renders as all zeroes (a placeholder). A bound
    /// pointer encodes its destination offset as a fixed-width unsigned
    /// integer in the given endianness, failing if the offset does not fit.
    pub(super) fn render(&self, endianness: Endianness) -> ImageResult<Vec<u8>> {
        let mut out = vec![0u8; self.width];
        if let Some(dest) = self.destination {
            let value = dest.offset as u64;
            if self.width < MAX_POINTER_WIDTH && value >> (8 * self.width as u32) != 0 {
                return Err(ImageError::Overflow { offset: dest.offset, width: self.width });
            }
            match endianness {
                Endianness::Little => LittleEndian::write_uint(&mut out, value, self.width),
                Endianness::Big => BigEndian::write_uint(&mut out, value, self.width),
            }
        }
        Ok(out)
    }
}

/// Largest pointer width we can encode (a `u64` offset).
pub const MAX_POINTER_WIDTH: usize = 8;
