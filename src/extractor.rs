//! The lazy, on-demand graph executor.
//!
//! Grounded in `original_source/src/net.cpp`'s `Extractor`/`Net::forward_layer`
//! (the CPU `Mat` variant): a blob is only materialized when some requested
//! output needs it, producers run before consumers, and — under lightmode —
//! a blob's storage is released once nothing else will read it. The resolver
//! itself is iterative over an explicit stack rather than native recursion
//! (spec.md §9's "recursion depth" design note), so a deep chain of layers
//! can't blow the call stack.
//!
//! One detail deliberately diverges from the literal original: that C++
//! releases a bottom blob's slot as soon as its *first* consumer has taken a
//! copy, with no regard for how many consumers are actually registered. On a
//! blob with more than one consumer (a diamond-shaped fan-out) that frees the
//! storage out from under the second consumer, which then finds an empty
//! slot and re-runs the shared producer — a real correctness gap in naive
//! lightmode. This executor instead counts, per blob, how many of its
//! registered consumers have taken their copy, and only releases the slot
//! once every one of them has (`self.consumed[b] >= blob.consumers.len()`).
//! A linear chain (one consumer) behaves identically either way; a diamond
//! resolves its shared ancestor exactly once and evicts it at the correct
//! time, matching the single-producer-run guarantee this engine promises.

use crate::backend::{Backend, BackendKind, DeviceTensor};
use crate::error::{Error, Result};
use crate::net::Net;
use crate::option::{AllocatorKind, ExtractorOptions};
use crate::tensor::Tensor;

/// One inference pass over a [`Net`]. Borrows the graph; owns its own
/// per-blob slot table, backend, and options snapshot, so multiple
/// extractors can run concurrently (or sequentially, reusing cached
/// intermediates) over the same loaded `Net`.
pub struct Extractor<'a> {
    net: &'a Net,
    options: ExtractorOptions,
    backend: Box<dyn Backend>,
    slots: Vec<Option<DeviceTensor>>,
    /// How many of each blob's registered consumers have already taken a
    /// copy during this `Extractor`'s lifetime. Drives the lightmode
    /// eviction timing described above.
    consumed: Vec<usize>,
    /// Not a handle to anything; its only job is to make `Extractor` neither
    /// `Send` nor `Sync` (spec.md §5: one extraction runs on one thread).
    /// `Net` stays `Send + Sync` so several `Extractor`s can each run on
    /// their own thread over a shared `Arc<Net>`.
    _not_shareable: std::marker::PhantomData<*const ()>,
}

impl<'a> Extractor<'a> {
    pub(crate) fn new(net: &'a Net) -> Self {
        let backend = select_backend(net.options.use_gpu);
        let n = net.blobs.len();
        Self {
            net,
            options: ExtractorOptions::default(),
            backend,
            slots: vec![None; n],
            consumed: vec![0; n],
            _not_shareable: std::marker::PhantomData,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn set_light_mode(&mut self, enable: bool) {
        self.options.lightmode = enable;
    }

    pub fn set_num_threads(&mut self, num_threads: usize) {
        self.options.num_threads = num_threads;
    }

    pub fn set_blob_allocator(&mut self, kind: AllocatorKind) {
        self.options.blob_allocator = kind;
    }

    pub fn set_workspace_allocator(&mut self, kind: AllocatorKind) {
        self.options.workspace_allocator = kind;
    }

    pub fn set_blob_device_allocator(&mut self, kind: AllocatorKind) {
        self.options.blob_device_allocator = kind;
    }

    pub fn set_staging_device_allocator(&mut self, kind: AllocatorKind) {
        self.options.staging_device_allocator = kind;
    }

    /// Deposits `tensor` directly into `blob_index`'s slot, bypassing the
    /// resolver. The usual way a graph input (a blob with no producer) gets
    /// a value; nothing stops feeding an intermediate blob this way too.
    pub fn input(&mut self, blob_index: usize, tensor: &Tensor) -> Result<()> {
        if blob_index >= self.slots.len() {
            return Err(Error::NotFound(format!("blob index {blob_index} out of range")));
        }
        let dev = self.backend.upload(tensor)?;
        self.slots[blob_index] = Some(dev);
        self.consumed[blob_index] = 0;
        Ok(())
    }

    pub fn input_by_name(&mut self, name: &str, tensor: &Tensor) -> Result<()> {
        let idx = self
            .net
            .find_blob_index_by_name(name)
            .ok_or_else(|| Error::NotFound(format!("no blob named {name:?}")))?;
        self.input(idx, tensor)
    }

    /// Resolves `blob_index` (running whatever producer chain it needs) and
    /// downloads it to a host-resident [`Tensor`].
    #[tracing::instrument(skip(self))]
    pub fn extract(&mut self, blob_index: usize) -> Result<Tensor> {
        self.resolve_blob(blob_index)?;
        let dev = self.slots[blob_index]
            .clone()
            .ok_or_else(|| Error::BackendError(format!("blob {blob_index} resolved but its slot is still empty")))?;
        self.backend.download(&dev)
    }

    pub fn extract_by_name(&mut self, name: &str) -> Result<Tensor> {
        let idx = self
            .net
            .find_blob_index_by_name(name)
            .ok_or_else(|| Error::NotFound(format!("no blob named {name:?}")))?;
        self.extract(idx)
    }

    fn resolve_blob(&mut self, blob_index: usize) -> Result<()> {
        if self.slots.get(blob_index).map(Option::is_some).unwrap_or(false) {
            return Ok(());
        }
        let blob = self
            .net
            .blobs
            .get(blob_index)
            .ok_or_else(|| Error::NotFound(format!("blob index {blob_index} out of range")))?;
        let producer = blob.producer.ok_or_else(|| {
            Error::NotFound(format!(
                "blob {:?} has no producer in this graph; supply it via input()/input_by_name() first",
                blob.name
            ))
        })?;
        self.resolve_layer(producer)
    }

    /// Runs whatever of `layer_index`'s ancestor layers haven't already run,
    /// then `layer_index` itself, via an explicit `(layer_index,
    /// bottoms_pushed)` work stack instead of recursion.
    fn resolve_layer(&mut self, layer_index: usize) -> Result<()> {
        let mut stack = vec![(layer_index, false)];
        while let Some((li, bottoms_pushed)) = stack.pop() {
            if self.layer_is_done(li) {
                continue;
            }
            if !bottoms_pushed {
                stack.push((li, true));
                let node = self
                    .net
                    .layer_node(li)
                    .ok_or_else(|| Error::NotFound(format!("layer index {li} out of range")))?;
                for &b in &node.bottoms {
                    if self.slots[b].is_none() {
                        let producer = self.net.blobs[b].producer.ok_or_else(|| {
                            Error::NotFound(format!(
                                "blob {:?} has no producer in this graph; supply it via input()/input_by_name() first",
                                self.net.blobs[b].name
                            ))
                        })?;
                        stack.push((producer, false));
                    }
                }
            } else {
                self.dispatch_layer(li)?;
            }
        }
        Ok(())
    }

    /// A layer is done once every one of its declared top blobs holds a value.
    fn layer_is_done(&self, layer_index: usize) -> bool {
        self.net
            .layer_node(layer_index)
            .map(|node| node.tops.iter().all(|&t| self.slots[t].is_some()))
            .unwrap_or(false)
    }

    /// Gathers `layer_index`'s bottoms (every one of which is already
    /// resolved by the time `resolve_layer` calls this), runs the layer
    /// in-place or out-of-place per spec.md §4.5, and fills its top slots.
    #[tracing::instrument(skip(self), fields(layer = layer_index))]
    fn dispatch_layer(&mut self, layer_index: usize) -> Result<()> {
        let node = self
            .net
            .layer_node(layer_index)
            .ok_or_else(|| Error::NotFound(format!("layer index {layer_index} out of range")))?;
        let layer = node.layer.as_deref().ok_or_else(|| {
            Error::BackendError(format!(
                "layer {} ({}) failed to load during load_param and cannot be executed",
                layer_index, node.name
            ))
        })?;

        let mut bottoms: Vec<DeviceTensor> = Vec::with_capacity(node.bottoms.len());
        for &b in &node.bottoms {
            let dev = self.slots[b]
                .clone()
                .ok_or_else(|| Error::BackendError(format!("blob {b} not resolved before dispatch")))?;
            bottoms.push(dev);
            self.consumed[b] += 1;
            if self.options.lightmode && self.consumed[b] >= self.net.blobs[b].consumers.len() {
                self.slots[b] = None;
            }
        }

        let use_inplace = self.options.lightmode && layer.support_inplace() && node.bottoms.len() == node.tops.len();

        if use_inplace {
            for t in bottoms.iter_mut() {
                if t.is_shared() {
                    *t = self.backend.deep_clone(t)?;
                }
            }
            self.backend.dispatch_inplace(layer, &mut bottoms, &self.options)?;
            for (&top, dev) in node.tops.iter().zip(bottoms.into_iter()) {
                self.slots[top] = Some(dev);
            }
        } else {
            let mut tops: Vec<DeviceTensor> = (0..node.tops.len()).map(|_| DeviceTensor::Host(Tensor::empty())).collect();
            self.backend.dispatch(layer, &bottoms, &mut tops, &self.options)?;
            for (&top, dev) in node.tops.iter().zip(tops.into_iter()) {
                self.slots[top] = Some(dev);
            }
        }

        for &top in &node.tops {
            if let Some(dev) = &self.slots[top] {
                self.backend.barrier(dev);
            }
        }
        Ok(())
    }
}

/// Picks `GpuBackend` when `use_gpu` is set and the `cuda` feature is
/// compiled in, falling back to `CpuBackend` (logged) on init failure or
/// when GPU support isn't built at all.
fn select_backend(use_gpu: bool) -> Box<dyn Backend> {
    #[cfg(feature = "cuda")]
    {
        if use_gpu {
            match crate::backend::gpu::GpuBackend::new(0) {
                Ok(b) => return Box::new(b),
                Err(e) => tracing::warn!(error = %e, "GPU backend init failed, falling back to CPU"),
            }
        }
    }
    #[cfg(not(feature = "cuda"))]
    let _ = use_gpu;
    Box::new(crate::backend::cpu::CpuBackend::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Net;

    fn trivial_param() -> &'static str {
        "7767517\n2 2\nInput input 0 1 blob0\nScale scale 1 1 blob0 blob1 0=2.0\n"
    }

    fn diamond_param() -> &'static str {
        "7767517\n5 5\nInput input 0 1 blob_in\nScale a 1 1 blob_in blob_a 0=2.0\nScale b 1 1 blob_a blob_b 0=3.0\nScale c 1 1 blob_a blob_c 0=5.0\nBinarySum sum 2 1 blob_b blob_c blob_out\n"
    }

    #[test]
    fn trivial_passthrough_scales_input() {
        let mut net = Net::new();
        net.load_param(&mut trivial_param().as_bytes()).unwrap();
        let mut ex = net.create_extractor();
        ex.input(0, &Tensor::from_data(&[2], &[1.0, 2.0]).unwrap()).unwrap();
        let out = ex.extract(1).unwrap();
        assert_eq!(out.to_vec(), vec![2.0, 4.0]);
    }

    #[test]
    fn extract_by_name_matches_extract_by_index() {
        let mut net = Net::new();
        net.load_param(&mut trivial_param().as_bytes()).unwrap();
        let mut ex = net.create_extractor();
        ex.input_by_name("blob0", &Tensor::from_data(&[1], &[3.0]).unwrap()).unwrap();
        let out = ex.extract_by_name("blob1").unwrap();
        assert_eq!(out.to_vec(), vec![6.0]);
    }

    #[test]
    fn diamond_dag_resolves_shared_producer_exactly_once() {
        let mut net = Net::new();
        net.load_param(&mut diamond_param().as_bytes()).unwrap();
        let mut ex = net.create_extractor();
        let in_idx = net.find_blob_index_by_name("blob_in").unwrap();
        let out_idx = net.find_blob_index_by_name("blob_out").unwrap();
        ex.input(in_idx, &Tensor::from_data(&[1], &[1.0]).unwrap()).unwrap();
        let out = ex.extract(out_idx).unwrap();
        // a = 1*2 = 2; b = 2*3 = 6; c = 2*5 = 10; sum = 16.
        assert_eq!(out.to_vec(), vec![16.0]);
    }

    #[test]
    fn diamond_dag_evicts_shared_blob_only_after_both_consumers() {
        let mut net = Net::new();
        net.load_param(&mut diamond_param().as_bytes()).unwrap();
        let mut ex = net.create_extractor();
        let in_idx = net.find_blob_index_by_name("blob_in").unwrap();
        let a_idx = net.find_blob_index_by_name("blob_a").unwrap();
        let out_idx = net.find_blob_index_by_name("blob_out").unwrap();
        ex.input(in_idx, &Tensor::from_data(&[1], &[1.0]).unwrap()).unwrap();
        ex.extract(out_idx).unwrap();
        assert!(ex.slots[a_idx].is_none(), "shared blob should be evicted once both consumers ran");
        assert_eq!(ex.consumed[a_idx], 2);
    }

    #[test]
    fn disabling_lightmode_keeps_every_blob_resident() {
        let mut net = Net::new();
        net.load_param(&mut diamond_param().as_bytes()).unwrap();
        let mut ex = net.create_extractor();
        ex.set_light_mode(false);
        let in_idx = net.find_blob_index_by_name("blob_in").unwrap();
        let a_idx = net.find_blob_index_by_name("blob_a").unwrap();
        let out_idx = net.find_blob_index_by_name("blob_out").unwrap();
        ex.input(in_idx, &Tensor::from_data(&[1], &[1.0]).unwrap()).unwrap();
        ex.extract(out_idx).unwrap();
        assert!(ex.slots[a_idx].is_some());
        assert!(ex.slots[in_idx].is_some());
    }

    #[test]
    fn missing_input_surfaces_as_error() {
        let mut net = Net::new();
        net.load_param(&mut trivial_param().as_bytes()).unwrap();
        let mut ex = net.create_extractor();
        assert!(ex.extract(1).is_err());
    }

    #[test]
    fn out_of_place_lightmode_off_leaves_input_untouched() {
        let mut net = Net::new();
        net.load_param(&mut trivial_param().as_bytes()).unwrap();
        let mut ex = net.create_extractor();
        ex.set_light_mode(false);
        let input = Tensor::from_data(&[2], &[5.0, 6.0]).unwrap();
        ex.input(0, &input).unwrap();
        let out = ex.extract(1).unwrap();
        assert_eq!(out.to_vec(), vec![10.0, 12.0]);
        // lightmode disabled: the input blob's own slot is never evicted.
        assert!(ex.slots[0].is_some());
    }
}
