//! Relocatable binary images.
//!
//! This module is the heart of the crate: a growable byte buffer
//! (`BinaryImage`, addressed through an [`ImageId`]) that can contain
//! *unresolved* placeholder references to positions that may not exist yet.
//!
//! Building an object file or executable usually means writing offsets before
//! the bytes they refer to have been laid out. The types here make that
//! incremental style safe:
//!
//! - A [`PointerId`] names a fixed-width placeholder whose destination can be
//!   bound later; every place its bytes are written is remembered as a use.
//! - [`ImageArena::combine`] destructively merges one image into another and
//!   rewrites all pointer bookkeeping so the absorbed image is never needed
//!   again.
//! - [`ImageArena::resolve`] bakes a pointer's final value into every one of
//!   its uses once destination and uses live in the same image.
//!
//! Images and pointers are stored in one arena and referenced by index
//! handles. A single pointer is routinely shared between images (its
//! destination in one, its uses in another) until a `combine` consolidates
//! them, so handles rather than owned values keep that sharing free of
//! aliasing problems. Handles are only meaningful with the arena that issued
//! them.
//!
//! Everything here is synchronous and in-memory; the intended pipeline is
//! build, combine, resolve, read out, all on one thread.

use thiserror::Error;

mod pointer;

pub use pointer::{Location, MAX_POINTER_WIDTH};

use pointer::Pointer;

/// Byte order used when rendering pointer values.
///
/// Little-endian is the reference behavior; big-endian is a configuration
/// choice that changes nothing about the bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Error type for image and pointer operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    /// An image was appended through the raw-append path.
    ///
    /// Raw-appending an image would duplicate its bytes without fixing up
    /// either side's pointer bookkeeping, so it is rejected outright; the
    /// only sanctioned way to join two images is [`ImageArena::combine`].
    #[error("Binary images can only be joined with combine")]
    CombineRequired,

    /// An image was combined with itself.
    #[error("An image cannot be combined with itself")]
    SelfCombine,

    /// An image absorbed by a `combine` was used again.
    #[error("Image was consumed by a combine and can no longer be used")]
    ImageConsumed,

    /// `resolve` was called on a pointer with no destination.
    #[error("Cannot resolve a pointer without a destination")]
    UnboundPointer,

    /// `resolve` was called while some use still lives in a different image
    /// than the destination, i.e. the images were never combined.
    #[error("Not all uses live in the destination image; combine the images first")]
    UnconsolidatedUse,

    /// A destination offset does not fit in the pointer's declared width.
    #[error("Destination offset {offset} does not fit in {width} byte(s)")]
    Overflow { offset: usize, width: usize },

    /// A pointer was created with a width outside `1..=8`.
    #[error("Pointer width {width} is outside the supported range 1..=8")]
    InvalidWidth { width: usize },

    /// A recorded use does not fit inside its image at resolve time.
    ///
    /// Uses are recorded without range validation (the image may still be
    /// growing), so a use that was never covered by appended bytes is only
    /// detected here.
    #[error("Use at offset {offset} (width {width}) is out of bounds for an image of {len} bytes")]
    UseOutOfBounds { offset: usize, width: usize, len: usize },
}

/// Convenience result type for image operations.
pub type ImageResult<T> = Result<T, ImageError>;

/// Handle to a binary image inside an [`ImageArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(usize);

/// Handle to a pointer inside an [`ImageArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerId(usize);

/// One thing that can be appended to an image.
///
/// The `Image` variant exists only to be rejected: it documents, at the type
/// level, that joining images goes through `combine` and nothing else.
#[derive(Debug, Clone, Copy)]
pub enum Chunk<'a> {
    Bytes(&'a [u8]),
    Pointer(PointerId),
    Image(ImageId),
}

/// A growable byte buffer plus the pointer bookkeeping attached to it.
///
/// `refs_from` holds pointers whose destination lies inside this image;
/// `refs_to` holds pointers whose placeholder bytes were embedded in it.
/// Both sets are what `combine` rewrites when this image absorbs another.
#[derive(Debug, Default)]
struct BinaryImage {
    bytes: Vec<u8>,
    refs_from: Vec<PointerId>,
    refs_to: Vec<PointerId>,
}

/// Owner of all images and pointers participating in one build.
///
/// The arena hands out [`ImageId`] and [`PointerId`] handles and performs
/// every operation itself, so a pointer can be referenced from any number of
/// images without shared-ownership gymnastics. Absorbed images are retired in
/// place: any later use of their handle fails with
/// [`ImageError::ImageConsumed`].
#[derive(Debug, Default)]
pub struct ImageArena {
    endianness: Endianness,
    images: Vec<Option<BinaryImage>>,
    pointers: Vec<Pointer>,
}

impl ImageArena {
    /// Create an empty arena rendering pointers little-endian.
    pub fn new() -> Self {
        Self::with_endianness(Endianness::Little)
    }

    /// Create an empty arena with an explicit pointer byte order.
    pub fn with_endianness(endianness: Endianness) -> Self {
        Self { endianness, images: Vec::new(), pointers: Vec::new() }
    }

    /// The byte order this arena renders pointers with.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Create a new image seeded with the given bytes (may be empty).
    pub fn new_image(&mut self, initial: &[u8]) -> ImageId {
        self.images.push(Some(BinaryImage {
            bytes: initial.to_vec(),
            refs_from: Vec::new(),
            refs_to: Vec::new(),
        }));
        ImageId(self.images.len() - 1)
    }

    /// Create an unbound pointer of the given width.
    ///
    /// The pointer renders as `width` zero bytes until a destination is set
    /// with [`ImageArena::bind_pointer`] or [`ImageArena::set_destination`].
    pub fn new_pointer(&mut self, width: usize) -> ImageResult<PointerId> {
        self.pointers.push(Pointer::new(width, None)?);
        Ok(PointerId(self.pointers.len() - 1))
    }

    /// Create a pointer destined for `offset` inside `image`.
    ///
    /// The pointer is registered in the image's `refs_from` set so that a
    /// later `combine` relocates its destination along with the bytes. This
    /// is how producer code obtains a handle to "the address of position
    /// `offset`" for embedding elsewhere.
    pub fn mint_pointer(
        &mut self,
        image: ImageId,
        width: usize,
        offset: usize,
    ) -> ImageResult<PointerId> {
        self.live(image)?;
        self.pointers.push(Pointer::new(width, Some(Location::new(image, offset)))?);
        let id = PointerId(self.pointers.len() - 1);
        self.live_mut(image)?.refs_from.push(id);
        Ok(id)
    }

    /// Bind an existing pointer's destination to `offset` inside `image` and
    /// register it in that image's `refs_from` set.
    ///
    /// This is the late-binding counterpart of [`ImageArena::mint_pointer`]
    /// for pointers that were embedded (and shared) before their target
    /// existed. Existing uses are untouched; they pick up the new value at
    /// the next `resolve`.
    pub fn bind_pointer(
        &mut self,
        pointer: PointerId,
        image: ImageId,
        offset: usize,
    ) -> ImageResult<()> {
        self.live(image)?;
        self.pointers[pointer.0].destination = Some(Location::new(image, offset));
        let img = self.live_mut(image)?;
        if !img.refs_from.contains(&pointer) {
            img.refs_from.push(pointer);
        }
        Ok(())
    }

    /// Bind (or rebind) a pointer's destination without touching any image's
    /// bookkeeping. No side effect on existing uses.
    pub fn set_destination(&mut self, pointer: PointerId, image: ImageId, offset: usize) {
        self.pointers[pointer.0].destination = Some(Location::new(image, offset));
    }

    /// Record, without validation, that a pointer's bytes live at the given
    /// location. The offset may be past the image's current end; it is only
    /// checked when the pointer is resolved.
    pub fn record_use(&mut self, pointer: PointerId, image: ImageId, offset: usize) {
        self.pointers[pointer.0].uses.push(Location::new(image, offset));
    }

    /// Append raw bytes to an image. No bookkeeping changes.
    pub fn append_bytes(&mut self, image: ImageId, data: &[u8]) -> ImageResult<()> {
        self.live_mut(image)?.bytes.extend_from_slice(data);
        Ok(())
    }

    /// Append a pointer's current rendering to an image.
    ///
    /// The pre-append offset is recorded as a use and the pointer is
    /// registered in the image's `refs_to` set. For an unbound pointer this
    /// writes a zero placeholder that a later `resolve` overwrites.
    pub fn append_pointer(&mut self, image: ImageId, pointer: PointerId) -> ImageResult<()> {
        let rendered = self.pointers[pointer.0].render(self.endianness)?;
        let offset = self.live(image)?.bytes.len();
        self.pointers[pointer.0].uses.push(Location::new(image, offset));
        let img = self.live_mut(image)?;
        img.refs_to.push(pointer);
        img.bytes.extend_from_slice(&rendered);
        Ok(())
    }

    /// Append one [`Chunk`] to an image.
    ///
    /// `Chunk::Image` always fails with [`ImageError::CombineRequired`].
    pub fn append(&mut self, image: ImageId, chunk: Chunk<'_>) -> ImageResult<()> {
        match chunk {
            Chunk::Bytes(data) => self.append_bytes(image, data),
            Chunk::Pointer(pointer) => self.append_pointer(image, pointer),
            Chunk::Image(_) => Err(ImageError::CombineRequired),
        }
    }

    /// Destructively merge `src` into `dst`.
    ///
    /// All pointer bookkeeping that referenced `src` is rewritten to
    /// reference `dst`, shifted by `dst`'s pre-merge length:
    ///
    /// 1. every bound pointer in `src.refs_from` is rebased onto `dst` and
    ///    moved into `dst.refs_from`;
    /// 2. every use recorded inside `src` is rewritten to the equivalent
    ///    location inside `dst`, and the pointer moves into `dst.refs_to` so
    ///    a later combine that absorbs `dst` still finds it;
    /// 3. only then are `src`'s bytes appended to `dst`.
    ///
    /// `src` is consumed; any further operation on its handle fails with
    /// [`ImageError::ImageConsumed`]. Merging is not commutative (it appends)
    /// but chains: repeated pairwise combines produce the same final layout
    /// as long as the caller keeps the same append order.
    pub fn combine(&mut self, dst: ImageId, src: ImageId) -> ImageResult<()> {
        if dst == src {
            return Err(ImageError::SelfCombine);
        }
        self.live(dst)?;
        let absorbed = self.images[src.0].take().ok_or(ImageError::ImageConsumed)?;
        let base = self.live(dst)?.bytes.len();

        for pid in absorbed.refs_from {
            let rebased = self.pointers[pid.0]
                .destination
                .map(|dest| Location::new(dst, base + dest.offset));
            if let Some(location) = rebased {
                self.pointers[pid.0].destination = Some(location);
                self.live_mut(dst)?.refs_from.push(pid);
            }
        }

        for pid in absorbed.refs_to {
            for use_loc in &mut self.pointers[pid.0].uses {
                if use_loc.image == src {
                    use_loc.image = dst;
                    use_loc.offset += base;
                }
            }
            let img = self.live_mut(dst)?;
            if !img.refs_to.contains(&pid) {
                img.refs_to.push(pid);
            }
        }

        self.live_mut(dst)?.bytes.extend_from_slice(&absorbed.bytes);
        Ok(())
    }

    /// Write a pointer's rendered value into every one of its uses.
    ///
    /// Requires the pointer to be bound and all of its uses to live in the
    /// same image as the destination; see [`ImageError::UnboundPointer`] and
    /// [`ImageError::UnconsolidatedUse`]. Idempotent: resolving again with no
    /// intervening changes rewrites the same bytes.
    pub fn resolve(&mut self, pointer: PointerId) -> ImageResult<()> {
        let dest = self.pointers[pointer.0].destination.ok_or(ImageError::UnboundPointer)?;
        if self.pointers[pointer.0].uses.iter().any(|u| u.image != dest.image) {
            return Err(ImageError::UnconsolidatedUse);
        }
        let rendered = self.pointers[pointer.0].render(self.endianness)?;
        let width = self.pointers[pointer.0].width;
        let uses = self.pointers[pointer.0].uses.clone();

        let img = self.live_mut(dest.image)?;
        // Validate every use first so a bad one cannot leave the image
        // half-patched.
        for use_loc in &uses {
            if use_loc.offset + width > img.bytes.len() {
                return Err(ImageError::UseOutOfBounds {
                    offset: use_loc.offset,
                    width,
                    len: img.bytes.len(),
                });
            }
        }
        for use_loc in uses {
            img.bytes[use_loc.offset..use_loc.offset + width].copy_from_slice(&rendered);
        }
        Ok(())
    }

    /// Render a pointer's current value without writing it anywhere.
    pub fn render(&self, pointer: PointerId) -> ImageResult<Vec<u8>> {
        self.pointers[pointer.0].render(self.endianness)
    }

    /// The byte currently stored at a pointer's destination, if the pointer
    /// is bound and the offset is presently in range. Introspection only.
    pub fn byte_at_destination(&self, pointer: PointerId) -> Option<u8> {
        let dest = self.pointers[pointer.0].destination?;
        let img = self.images[dest.image.0].as_ref()?;
        img.bytes.get(dest.offset).copied()
    }

    /// A pointer's destination, if bound.
    pub fn destination(&self, pointer: PointerId) -> Option<Location> {
        self.pointers[pointer.0].destination
    }

    /// A pointer's recorded uses, in the order they were recorded.
    pub fn uses(&self, pointer: PointerId) -> &[Location] {
        &self.pointers[pointer.0].uses
    }

    /// A pointer's fixed byte width.
    pub fn width(&self, pointer: PointerId) -> usize {
        self.pointers[pointer.0].width
    }

    /// Pointers whose destination lies inside this image.
    pub fn refs_from(&self, image: ImageId) -> ImageResult<&[PointerId]> {
        Ok(&self.live(image)?.refs_from)
    }

    /// Pointers whose placeholder bytes were embedded in this image.
    pub fn refs_to(&self, image: ImageId) -> ImageResult<&[PointerId]> {
        Ok(&self.live(image)?.refs_to)
    }

    /// Current length of an image in bytes.
    pub fn len(&self, image: ImageId) -> ImageResult<usize> {
        Ok(self.live(image)?.bytes.len())
    }

    /// Current contents of an image.
    pub fn bytes(&self, image: ImageId) -> ImageResult<&[u8]> {
        Ok(&self.live(image)?.bytes)
    }

    /// Consume an image and return its flat bytes.
    ///
    /// This is the final read-out step once all combines and resolves are
    /// done; the handle behaves like a combined-away image afterwards.
    pub fn into_bytes(&mut self, image: ImageId) -> ImageResult<Vec<u8>> {
        let img = self.images[image.0].take().ok_or(ImageError::ImageConsumed)?;
        Ok(img.bytes)
    }

    /// Number of pointers created in this arena.
    pub fn pointer_count(&self) -> usize {
        self.pointers.len()
    }

    fn live(&self, image: ImageId) -> ImageResult<&BinaryImage> {
        self.images[image.0].as_ref().ok_or(ImageError::ImageConsumed)
    }

    fn live_mut(&mut self, image: ImageId) -> ImageResult<&mut BinaryImage> {
        self.images[image.0].as_mut().ok_or(ImageError::ImageConsumed)
    }
}
