//! The N-dimensional buffer shared by every layer, blob slot, and backend.
//!
//! Mirrors the teacher's `Tensor` (storage + shape, `Arc`-backed for shared
//! ownership) but commits to the data model's explicit `w`/`h`/`c`/`cstep`
//! layout instead of wrapping `ndarray::ArrayD` directly, so channel-stride
//! padding and refcount-gated in-place mutation have somewhere to live.

use std::sync::Arc;

use ndarray::{ArrayView2, ArrayViewMut2};

use crate::error::{Error, Result};

/// Byte alignment the allocator pads `cstep` to. ncnn's default; 16 covers
/// SSE/NEON vector widths without over-allocating for the common f32 case.
const ALIGNMENT: usize = 16;

/// A multi-dimensional numeric buffer with shared-ownership semantics.
///
/// `dims == 0` encodes "not yet materialized" (an empty blob slot). Axes are
/// named `w` (innermost), `h`, `c` (channel): `dims == 1` uses only `w`,
/// `dims == 2` uses `w, h`, `dims == 3` uses `w, h, c`. Element size is
/// tracked explicitly even though every built-in layer here produces `f32`
/// data, so a future element kind doesn't require touching every call site.
#[derive(Clone, Debug)]
pub struct Tensor {
    dims: u8,
    w: usize,
    h: usize,
    c: usize,
    /// Channel stride in elements; always `>= w * h`, padded so that
    /// `cstep * elemsize` is a multiple of [`ALIGNMENT`].
    cstep: usize,
    elemsize: usize,
    data: Arc<Vec<f32>>,
}

impl Tensor {
    /// The empty tensor every blob slot starts life as.
    pub fn empty() -> Self {
        Self {
            dims: 0,
            w: 0,
            h: 0,
            c: 0,
            cstep: 0,
            elemsize: 4,
            data: Arc::new(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dims == 0
    }

    /// Allocates a fresh zero-filled tensor. `shape` is `[w]`, `[w, h]`, or
    /// `[w, h, c]`; its length becomes `dims`.
    pub fn create(shape: &[usize]) -> Self {
        let (w, h, c) = Self::unpack_shape(shape);
        let cstep = Self::align_cstep(w, h);
        let data = vec![0.0f32; cstep * c.max(1)];
        Self {
            dims: shape.len() as u8,
            w,
            h,
            c,
            cstep,
            elemsize: 4,
            data: Arc::new(data),
        }
    }

    /// Allocates a tensor with the same shape as `other` and fresh (zeroed) storage.
    pub fn create_like(other: &Tensor) -> Self {
        Self {
            dims: other.dims,
            w: other.w,
            h: other.h,
            c: other.c,
            cstep: other.cstep,
            elemsize: other.elemsize,
            data: Arc::new(vec![0.0f32; other.data.len()]),
        }
    }

    /// Wraps caller-provided row-major, channel-packed data as a tensor,
    /// computing the padded `cstep`.
    pub fn from_data(shape: &[usize], values: &[f32]) -> Result<Self> {
        let (w, h, c) = Self::unpack_shape(shape);
        let cstep = Self::align_cstep(w, h);
        let expected = w * h * c.max(1);
        if values.len() != expected {
            return Err(Error::ShapeError(format!(
                "from_data: shape {shape:?} wants {expected} elements, got {}",
                values.len()
            )));
        }
        let mut data = vec![0.0f32; cstep * c.max(1)];
        for ch in 0..c.max(1) {
            let src = &values[ch * w * h..(ch + 1) * w * h];
            let dst = &mut data[ch * cstep..ch * cstep + w * h];
            dst.copy_from_slice(src);
        }
        Ok(Self {
            dims: shape.len() as u8,
            w,
            h,
            c,
            cstep,
            elemsize: 4,
            data: Arc::new(data),
        })
    }

    /// Deep-copies into freshly allocated storage; `refcount() == 1` afterwards.
    pub fn deep_clone(&self) -> Self {
        Self {
            dims: self.dims,
            w: self.w,
            h: self.h,
            c: self.c,
            cstep: self.cstep,
            elemsize: self.elemsize,
            data: Arc::new((*self.data).clone()),
        }
    }

    /// Idempotent: drops this handle's view of the backing storage.
    /// `dims() == 0` after release.
    pub fn release(&mut self) {
        *self = Tensor::empty();
    }

    /// Live handles (including `self`) sharing this tensor's storage.
    /// `refcount() > 1` means the storage is shared and must not be mutated in place.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    pub fn dims(&self) -> u8 {
        self.dims
    }
    pub fn w(&self) -> usize {
        self.w
    }
    pub fn h(&self) -> usize {
        self.h
    }
    pub fn c(&self) -> usize {
        self.c
    }
    pub fn cstep(&self) -> usize {
        self.cstep
    }
    pub fn elemsize(&self) -> usize {
        self.elemsize
    }

    pub fn shape(&self) -> Vec<usize> {
        match self.dims {
            0 => vec![],
            1 => vec![self.w],
            2 => vec![self.w, self.h],
            _ => vec![self.w, self.h, self.c],
        }
    }

    pub fn total_elems(&self) -> usize {
        self.w * self.h * self.c.max(1)
    }

    /// Read access to one channel's `w * h` elements, `cstep` padding stripped.
    pub fn channel(&self, q: usize) -> &[f32] {
        &self.data[q * self.cstep..q * self.cstep + self.w * self.h]
    }

    /// Mutable access to one channel. Panics if the storage is shared — callers
    /// (the CPU backend, the executor's in-place path) must perform the
    /// clone-before-mutate check before reaching here.
    pub fn channel_mut(&mut self, q: usize) -> &mut [f32] {
        let cstep = self.cstep;
        let w = self.w;
        let h = self.h;
        let data = Arc::get_mut(&mut self.data)
            .expect("channel_mut called on shared tensor storage; caller must clone first");
        &mut data[q * cstep..q * cstep + w * h]
    }

    /// `h x w` read-only ndarray view over one channel, for layers that want
    /// `ndarray`'s elementwise/`Zip` machinery instead of raw slices.
    pub fn channel_view(&self, q: usize) -> ArrayView2<'_, f32> {
        ArrayView2::from_shape((self.h, self.w), self.channel(q))
            .expect("channel_view: w*h does not match stored channel length")
    }

    /// `h x w` mutable ndarray view over one channel. Panics if shared storage
    /// (see [`Tensor::channel_mut`]).
    pub fn channel_view_mut(&mut self, q: usize) -> ArrayViewMut2<'_, f32> {
        let (h, w) = (self.h, self.w);
        ArrayViewMut2::from_shape((h, w), self.channel_mut(q))
            .expect("channel_view_mut: w*h does not match stored channel length")
    }

    /// Flattened read view across all channels with `cstep` padding stripped.
    pub fn to_vec(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.total_elems());
        for q in 0..self.c.max(1) {
            out.extend_from_slice(self.channel(q));
        }
        out
    }

    fn unpack_shape(shape: &[usize]) -> (usize, usize, usize) {
        match shape.len() {
            0 => (0, 0, 0),
            1 => (shape[0], 1, 1),
            2 => (shape[0], shape[1], 1),
            _ => (shape[0], shape[1], shape[2]),
        }
    }

    fn align_cstep(w: usize, h: usize) -> usize {
        let raw = w * h;
        let elemsize = 4usize;
        let unit = (ALIGNMENT / elemsize.min(ALIGNMENT).max(1)).max(1);
        if unit <= 1 || raw % unit == 0 {
            raw
        } else {
            raw + (unit - raw % unit)
        }
    }
}
