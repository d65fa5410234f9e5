//! Builds the graph: layers, named blobs, producer/consumer edges.
//!
//! Grounded in `original_source/src/net.cpp`'s `Net::load_param` /
//! `Net::load_param_bin` / `Net::load_param` (aligned memory) trio and
//! `Net::load_model`, generalized from raw-pointer `Layer*`/name strings
//! into an arena of layers addressed by index (spec.md §9's "raw pointer
//! graphs → arena + indices" design note).

use std::io::{BufRead, Read};

use crate::error::{Error, LayerTypeId, Result};
use crate::extractor::Extractor;
use crate::layer::{Layer, LayerRegistry, ModelBin};
use crate::layers::registry_with_builtins;
use crate::option::NetOptions;
use crate::paramdict::{read_i32, read_i32_mem, ParamDict};

const MAGIC: i32 = 7767517;

/// A named edge in the graph. `producer = None` means a graph input: no
/// layer in this `Net` writes to it, so `Extractor::input` must supply it.
#[derive(Debug, Clone, Default)]
pub struct Blob {
    pub name: String,
    pub producer: Option<usize>,
    pub consumers: Vec<usize>,
}

/// A graph node: the wire-format identity (type/name/edges) plus the
/// constructed layer, or `None` if `load_param` failed for this layer
/// (spec.md §4.4 step 3e: logged, loading continues, slot left unusable).
pub(crate) struct LayerNode {
    pub(crate) type_name: String,
    pub(crate) name: String,
    pub(crate) bottoms: Vec<usize>,
    pub(crate) tops: Vec<usize>,
    pub(crate) layer: Option<Box<dyn Layer>>,
}

pub struct Net {
    pub(crate) layers: Vec<Option<LayerNode>>,
    pub(crate) blobs: Vec<Blob>,
    registry: LayerRegistry,
    pub(crate) options: NetOptions,
}

impl Net {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            blobs: Vec::new(),
            registry: registry_with_builtins(),
            options: NetOptions::default(),
        }
    }

    pub fn with_options(options: NetOptions) -> Self {
        Self {
            options,
            ..Self::new()
        }
    }

    pub fn options(&self) -> &NetOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut NetOptions {
        &mut self.options
    }

    /// Drops every layer and blob, returning the Net to its just-constructed
    /// state. Called automatically on an unrecoverable load failure
    /// (magic mismatch, unknown layer type).
    pub fn clear(&mut self) {
        self.layers.clear();
        self.blobs.clear();
    }

    pub fn register_custom_layer_by_name(
        &mut self,
        name: &str,
        ctor: fn() -> Box<dyn Layer>,
    ) -> Result<()> {
        self.registry.register_custom_layer_by_name(name, ctor)
    }

    pub fn register_custom_layer_by_index(
        &mut self,
        index: u32,
        ctor: fn() -> Box<dyn Layer>,
    ) -> Result<()> {
        self.registry.register_custom_layer_by_index(index, ctor)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    pub fn find_blob_index_by_name(&self, name: &str) -> Option<usize> {
        self.blobs.iter().position(|b| b.name == name)
    }

    pub fn find_layer_index_by_name(&self, name: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|l| l.as_ref().map(|n| n.name == name).unwrap_or(false))
    }

    pub fn create_extractor(&self) -> Extractor<'_> {
        Extractor::new(self)
    }

    /// Parses a text-format `.param` stream: a magic line, a
    /// `layer_count blob_count` line, then one line per layer (spec.md §6).
    #[tracing::instrument(skip(self, reader))]
    pub fn load_param(&mut self, reader: &mut impl BufRead) -> Result<()> {
        let mut header = String::new();
        reader.read_line(&mut header)?;
        self.check_magic(header.trim())?;

        let mut counts = String::new();
        reader.read_line(&mut counts)?;
        let (layer_count, blob_count) = Self::parse_counts(&counts)?;
        self.layers = (0..layer_count).map(|_| None).collect();
        self.blobs = vec![Blob::default(); blob_count];

        let mut blob_index = 0usize;
        for i in 0..layer_count {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            self.load_text_layer(i, &tokens, &mut blob_index)?;
        }
        Ok(())
    }

    /// Parses a text-format `.param` record held entirely in memory,
    /// advancing past the leading header and one line per layer the same
    /// way `load_param` does over a stream.
    #[tracing::instrument(skip(self, buf))]
    pub fn load_param_text_mem(&mut self, buf: &[u8]) -> Result<()> {
        let mut cursor = 0usize;
        let header = next_line(buf, &mut cursor)?;
        self.check_magic(header.trim())?;

        let counts = next_line(buf, &mut cursor)?;
        let (layer_count, blob_count) = Self::parse_counts(&counts)?;
        self.layers = (0..layer_count).map(|_| None).collect();
        self.blobs = vec![Blob::default(); blob_count];

        let mut blob_index = 0usize;
        for i in 0..layer_count {
            let line = next_line(buf, &mut cursor)?;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            self.load_text_layer(i, &tokens, &mut blob_index)?;
        }
        Ok(())
    }

    /// Parses a binary-format `.param.bin` stream: fixed-width `i32` header
    /// and per-layer fields, blob references already resolved to indices.
    #[tracing::instrument(skip(self, reader))]
    pub fn load_param_bin(&mut self, reader: &mut impl Read) -> Result<()> {
        let magic = read_i32(reader)?;
        if magic != MAGIC {
            tracing::error!(magic, "param magic mismatch");
            return Err(Error::IncompatibleVersion);
        }
        let layer_count = read_i32(reader)?.max(0) as usize;
        let blob_count = read_i32(reader)?.max(0) as usize;
        self.layers = (0..layer_count).map(|_| None).collect();
        self.blobs = vec![Blob::default(); blob_count];

        for i in 0..layer_count {
            let typeindex = read_i32(reader)? as u32;
            let bottom_count = read_i32(reader)?.max(0) as usize;
            let top_count = read_i32(reader)?.max(0) as usize;

            let mut bottoms = Vec::with_capacity(bottom_count);
            for _ in 0..bottom_count {
                let idx = read_i32(reader)?.max(0) as usize;
                self.blobs[idx].consumers.push(i);
                bottoms.push(idx);
            }
            let mut tops = Vec::with_capacity(top_count);
            for _ in 0..top_count {
                let idx = read_i32(reader)?.max(0) as usize;
                self.blobs[idx].producer = Some(i);
                tops.push(idx);
            }

            let pd_result = ParamDict::from_binary_stream(reader);
            self.finish_binary_layer(i, typeindex, bottoms, tops, pd_result)?;
        }
        Ok(())
    }

    /// Parses a binary-format param record from a 32-bit-aligned in-memory
    /// buffer, returning the number of bytes consumed so callers can chain
    /// reads against the rest of the buffer (spec.md §6).
    #[tracing::instrument(skip(self, buf))]
    pub fn load_param_mem(&mut self, buf: &[u8]) -> Result<usize> {
        let mut cursor = 0usize;
        let magic = read_i32_mem(buf, &mut cursor)?;
        if magic != MAGIC {
            tracing::error!(magic, "param magic mismatch");
            return Err(Error::IncompatibleVersion);
        }
        let layer_count = read_i32_mem(buf, &mut cursor)?.max(0) as usize;
        let blob_count = read_i32_mem(buf, &mut cursor)?.max(0) as usize;
        self.layers = (0..layer_count).map(|_| None).collect();
        self.blobs = vec![Blob::default(); blob_count];

        for i in 0..layer_count {
            let typeindex = read_i32_mem(buf, &mut cursor)? as u32;
            let bottom_count = read_i32_mem(buf, &mut cursor)?.max(0) as usize;
            let top_count = read_i32_mem(buf, &mut cursor)?.max(0) as usize;

            let mut bottoms = Vec::with_capacity(bottom_count);
            for _ in 0..bottom_count {
                let idx = read_i32_mem(buf, &mut cursor)?.max(0) as usize;
                self.blobs[idx].consumers.push(i);
                bottoms.push(idx);
            }
            let mut tops = Vec::with_capacity(top_count);
            for _ in 0..top_count {
                let idx = read_i32_mem(buf, &mut cursor)?.max(0) as usize;
                self.blobs[idx].producer = Some(i);
                tops.push(idx);
            }

            let pd_result = ParamDict::from_binary_mem(buf, &mut cursor);
            self.finish_binary_layer(i, typeindex, bottoms, tops, pd_result)?;
        }
        Ok(cursor)
    }

    /// Drains every layer's weights from `mb` in file order. First failure
    /// aborts (spec.md §4.4 step 4); layers with a `None` slot (their
    /// `load_param` failed earlier) are skipped, since nothing will ever
    /// dispatch through them.
    ///
    /// On a GPU-enabled Net this would batch every weight upload into one
    /// command recording and submit/wait once, the way
    /// `original_source/src/net.cpp::Net::load_model` does under
    /// `NCNN_VULKAN`; none of this crate's built-in weighted layers
    /// (`InnerProduct`) carries a GPU forward path yet, so there is no
    /// upload to batch here today. The hook is `Backend::upload`, already in
    /// place for when a GPU-capable weighted layer is added.
    #[tracing::instrument(skip(self, mb))]
    pub fn load_model(&mut self, mb: &mut dyn ModelBin) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::BadModel("network graph not ready".into()));
        }
        for (i, slot) in self.layers.iter_mut().enumerate() {
            let Some(node) = slot else { continue };
            let Some(layer) = node.layer.as_mut() else { continue };
            if let Err(e) = layer.load_model(mb) {
                tracing::error!(layer = i, error = %e, "layer load_model failed");
                return Err(e);
            }
        }
        Ok(())
    }

    pub(crate) fn layer_node(&self, index: usize) -> Option<&LayerNode> {
        self.layers.get(index).and_then(|l| l.as_ref())
    }

    fn check_magic(&mut self, header: &str) -> Result<()> {
        let magic: i32 = header.parse().map_err(|_| Error::IncompatibleVersion)?;
        if magic != MAGIC {
            tracing::error!(magic, "param magic mismatch");
            return Err(Error::IncompatibleVersion);
        }
        Ok(())
    }

    fn parse_counts(line: &str) -> Result<(usize, usize)> {
        let mut it = line.split_whitespace();
        let layer_count: usize = it
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::IncompatibleVersion)?;
        let blob_count: usize = it
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::IncompatibleVersion)?;
        if layer_count == 0 || blob_count == 0 {
            return Err(Error::IncompatibleVersion);
        }
        Ok((layer_count, blob_count))
    }

    /// Consumes one already-tokenized `.param` layer line: `type name
    /// bottom_count top_count bottom_names... top_names... key=value...`.
    /// Resolves/allocates blob slots, constructs the layer via the
    /// registry (fatal `UnknownLayerType` on failure), and runs its
    /// `load_param` (logged-and-skip on failure, per spec.md §4.4 step 3e).
    fn load_text_layer(&mut self, i: usize, tokens: &[&str], blob_index: &mut usize) -> Result<()> {
        if tokens.len() < 4 {
            tracing::warn!(layer = i, "malformed layer line, skipping");
            return Ok(());
        }
        let type_name = tokens[0].to_string();
        let layer_name = tokens[1].to_string();
        let bottom_count: usize = tokens[2]
            .parse()
            .map_err(|_| Error::BadParam(format!("layer {i}: bad bottom_count")))?;
        let top_count: usize = tokens[3]
            .parse()
            .map_err(|_| Error::BadParam(format!("layer {i}: bad top_count")))?;

        let mut layer_box = match self.registry.create_by_name(&type_name) {
            Ok(l) => l,
            Err(_) => {
                tracing::error!(%type_name, layer = i, "layer type not registered");
                self.clear();
                return Err(Error::UnknownLayerType(LayerTypeId::Name(type_name)));
            }
        };

        let mut bottoms = Vec::with_capacity(bottom_count);
        for j in 0..bottom_count {
            let name = tokens
                .get(4 + j)
                .ok_or_else(|| Error::BadParam(format!("layer {i}: missing bottom name")))?;
            let idx = match self.find_blob_index_by_name(name) {
                Some(idx) => idx,
                None => {
                    let idx = *blob_index;
                    self.blobs[idx].name = (*name).to_string();
                    *blob_index += 1;
                    idx
                }
            };
            self.blobs[idx].consumers.push(i);
            bottoms.push(idx);
        }

        let mut tops = Vec::with_capacity(top_count);
        for j in 0..top_count {
            let name = tokens
                .get(4 + bottom_count + j)
                .ok_or_else(|| Error::BadParam(format!("layer {i}: missing top name")))?;
            let idx = *blob_index;
            self.blobs[idx].name = (*name).to_string();
            self.blobs[idx].producer = Some(i);
            tops.push(idx);
            *blob_index += 1;
        }

        let prefix_len = (4 + bottom_count + top_count).min(tokens.len());
        let param_tokens = &tokens[prefix_len..];
        let pd_result = ParamDict::from_text_tokens(param_tokens);

        let layer = match pd_result {
            Ok(mut pd) => {
                pd.net_options = self.options;
                match layer_box.load_param(&pd) {
                    Ok(()) => Some(layer_box),
                    Err(e) => {
                        tracing::warn!(layer = i, error = %e, "layer load_param failed, skipping");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(layer = i, error = %e, "ParamDict parse failed, skipping");
                None
            }
        };

        self.layers[i] = Some(LayerNode {
            type_name,
            name: layer_name,
            bottoms,
            tops,
            layer,
        });
        Ok(())
    }

    /// Shared tail of `load_param_bin`/`load_param_mem`: constructs the
    /// layer by index (fatal on unknown type) and runs its `load_param`
    /// against whatever `ParamDict` parse the caller already attempted.
    fn finish_binary_layer(
        &mut self,
        i: usize,
        typeindex: u32,
        bottoms: Vec<usize>,
        tops: Vec<usize>,
        pd_result: Result<ParamDict>,
    ) -> Result<()> {
        let mut layer_box = match self.registry.create_by_index(typeindex) {
            Ok(l) => l,
            Err(_) => {
                tracing::error!(typeindex, layer = i, "layer type not registered");
                self.clear();
                return Err(Error::UnknownLayerType(LayerTypeId::Index(typeindex)));
            }
        };

        let layer = match pd_result {
            Ok(mut pd) => {
                pd.net_options = self.options;
                match layer_box.load_param(&pd) {
                    Ok(()) => Some(layer_box),
                    Err(e) => {
                        tracing::warn!(layer = i, error = %e, "layer load_param failed, skipping");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(layer = i, error = %e, "ParamDict parse failed, skipping");
                None
            }
        };

        self.layers[i] = Some(LayerNode {
            type_name: typeindex.to_string(),
            name: String::new(),
            bottoms,
            tops,
            layer,
        });
        Ok(())
    }
}

impl Default for Net {
    fn default() -> Self {
        Self::new()
    }
}

/// Pulls the next `\n`-terminated line out of `buf` starting at `*cursor`,
/// advancing `*cursor` past it (and its newline, if present) — the same
/// line-boundary convention `ParamDict::from_text_mem` uses.
fn next_line<'a>(buf: &'a [u8], cursor: &mut usize) -> Result<&'a str> {
    let start = *cursor;
    let mut end = start;
    while end < buf.len() && buf[end] != b'\n' {
        end += 1;
    }
    *cursor = if end < buf.len() { end + 1 } else { end };
    std::str::from_utf8(&buf[start..end]).map_err(|_| Error::BadParam("param record is not valid UTF-8".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trivial_param() -> &'static str {
        "7767517\n2 2\nInput input 0 1 blob0\nScale scale 1 1 blob0 blob1 0=2.0\n"
    }

    #[test]
    fn load_param_builds_expected_graph() {
        let mut net = Net::new();
        let mut reader = trivial_param().as_bytes();
        net.load_param(&mut reader).unwrap();
        assert_eq!(net.blobs.len(), 2);
        assert_eq!(net.blobs[0].name, "blob0");
        assert_eq!(net.blobs[0].producer, Some(0));
        assert_eq!(net.blobs[0].consumers, vec![1]);
        assert_eq!(net.blobs[1].producer, Some(1));
        assert!(net.layer_node(1).unwrap().layer.is_some());
    }

    #[test]
    fn magic_mismatch_is_incompatible_version() {
        let mut net = Net::new();
        let mut reader = "1234\n2 2\n".as_bytes();
        assert!(matches!(net.load_param(&mut reader), Err(Error::IncompatibleVersion)));
    }

    #[test]
    fn unknown_layer_type_clears_state() {
        let mut net = Net::new();
        let mut reader = "7767517\n1 1\nNotARealLayer l 0 1 blob0\n".as_bytes();
        assert!(matches!(net.load_param(&mut reader), Err(Error::UnknownLayerType(_))));
        assert!(net.layers.is_empty());
        assert!(net.blobs.is_empty());
    }

    #[test]
    fn load_param_text_mem_matches_stream() {
        let mut net_stream = Net::new();
        net_stream.load_param(&mut trivial_param().as_bytes()).unwrap();

        let mut net_mem = Net::new();
        net_mem.load_param_text_mem(trivial_param().as_bytes()).unwrap();

        assert_eq!(net_stream.blobs.len(), net_mem.blobs.len());
        assert_eq!(net_stream.blobs[0].name, net_mem.blobs[0].name);
    }

    #[test]
    fn find_blob_index_by_name_resolves() {
        let mut net = Net::new();
        net.load_param(&mut trivial_param().as_bytes()).unwrap();
        assert_eq!(net.find_blob_index_by_name("blob1"), Some(1));
        assert_eq!(net.find_blob_index_by_name("nope"), None);
    }

    fn diamond_param() -> &'static str {
        "7767517\n5 5\nInput input 0 1 blob_in\nScale a 1 1 blob_in blob_a 0=2.0\n\
         Scale b 1 1 blob_a blob_b 0=3.0\nScale c 1 1 blob_a blob_c 0=5.0\n\
         BinarySum sum 2 1 blob_b blob_c blob_out\n"
    }

    /// spec.md §8: every blob's producer is either `None` (a graph input)
    /// or indexes a real layer whose `tops` contains the blob's index
    /// exactly once.
    #[test]
    fn every_blob_producer_is_consistent_with_its_layers_tops() {
        let mut net = Net::new();
        net.load_param(&mut diamond_param().as_bytes()).unwrap();

        for (blob_idx, blob) in net.blobs.iter().enumerate() {
            match blob.producer {
                None => {}
                Some(layer_idx) => {
                    let node = net.layer_node(layer_idx).expect("producer index in range");
                    let occurrences = node.tops.iter().filter(|&&t| t == blob_idx).count();
                    assert_eq!(occurrences, 1, "blob {blob_idx} not produced exactly once by layer {layer_idx}");
                }
            }
        }
    }

    /// spec.md §8: for every layer `L` and every `b` in `L.bottoms`, `b`'s
    /// consumers list contains `L`'s index.
    #[test]
    fn every_layer_bottom_is_registered_as_a_consumer() {
        let mut net = Net::new();
        net.load_param(&mut diamond_param().as_bytes()).unwrap();

        for (layer_idx, node) in net.layers.iter().enumerate() {
            let Some(node) = node else { continue };
            for &b in &node.bottoms {
                assert!(
                    net.blobs[b].consumers.contains(&layer_idx),
                    "blob {b} consumers missing layer {layer_idx}"
                );
            }
        }
    }

    #[test]
    fn diamond_shared_blob_has_two_consumers() {
        let mut net = Net::new();
        net.load_param(&mut diamond_param().as_bytes()).unwrap();
        let a = net.find_blob_index_by_name("blob_a").unwrap();
        assert_eq!(net.blobs[a].consumers.len(), 2);
    }
}
