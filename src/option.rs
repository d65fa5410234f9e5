//! Snapshot-only configuration: nothing here is a process-wide global.
//!
//! [`NetOptions`] is copied into the loader at `Net::load_param` time;
//! [`ExtractorOptions`] is copied into each [`crate::extractor::Extractor`]
//! at `create_extractor` time. Changing one after the fact never reaches
//! back into an already-created object, matching the teacher's preference
//! for explicit, passed-down configuration over `static`/`lazy_static` state.

/// Which allocation strategy a role uses. `Pooled` reuses released tensor
/// storage of matching size within a single `Extractor`'s lifetime; `System`
/// always goes through the default allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocatorKind {
    #[default]
    System,
    Pooled,
}

/// Allocator role for host-side blob tensors (CPU backend, or staged-back
/// results on the GPU backend).
pub type BlobAllocator = AllocatorKind;

/// Allocator role for scratch space a layer needs only during its own
/// `forward` call (e.g. im2col buffers), released immediately after.
pub type WorkspaceAllocator = AllocatorKind;

/// Allocator role for device-resident tensor storage on the GPU backend.
pub type BlobDeviceAllocator = AllocatorKind;

/// Allocator role for the host-visible staging buffers used to upload
/// inputs to, and download outputs from, device memory.
pub type StagingDeviceAllocator = AllocatorKind;

/// Per-extraction configuration, snapshotted by [`crate::net::Net::create_extractor`].
#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    /// Evict a blob's tensor as soon as its last consumer in this extraction
    /// has run. Bounds peak resident tensor count; disable to keep every
    /// intermediate blob alive for inspection after `extract` returns.
    pub lightmode: bool,
    /// Worker count for the CPU backend's data-parallel kernels. `0` defers
    /// to the backend's own default (the rayon global pool's thread count).
    pub num_threads: usize,
    pub blob_allocator: BlobAllocator,
    pub workspace_allocator: WorkspaceAllocator,
    pub blob_device_allocator: BlobDeviceAllocator,
    pub staging_device_allocator: StagingDeviceAllocator,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            lightmode: true,
            num_threads: 0,
            blob_allocator: AllocatorKind::default(),
            workspace_allocator: AllocatorKind::default(),
            blob_device_allocator: AllocatorKind::default(),
            staging_device_allocator: AllocatorKind::default(),
        }
    }
}

/// Net-wide optimization toggles, consulted when a backend is chosen at
/// `create_extractor` time and copied into the `ParamDict` at load time so
/// layers can see them during `load_param`.
#[derive(Debug, Clone, Copy)]
pub struct NetOptions {
    pub use_winograd: bool,
    pub use_sgemm: bool,
    pub use_int8: bool,
    pub use_gpu: bool,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            use_winograd: true,
            use_sgemm: true,
            use_int8: false,
            use_gpu: cfg!(feature = "cuda"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extractor_options_default_is_lightmode() {
        let opt = ExtractorOptions::default();
        assert!(opt.lightmode);
        assert_eq!(opt.blob_allocator, AllocatorKind::System);
    }

    #[test]
    fn net_options_default_matches_feature_gate() {
        let opt = NetOptions::default();
        assert_eq!(opt.use_gpu, cfg!(feature = "cuda"));
    }
}
