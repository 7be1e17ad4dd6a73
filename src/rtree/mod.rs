//! In-memory R-tree over f32 minimum bounding rectangles
//!
//! The tree is the organizing structure behind the MBR index: leaf entries
//! carry opaque payloads (window ids), internal entries carry child MBRs.
//! Nodes live in an arena and refer to each other by `u32` handle; parent
//! links are handles too, never owning references.
//!
//! Insertion follows Guttman's original algorithm: choose-subtree by least
//! area enlargement, overflow split with LINEAR or QUADRATIC seed picking,
//! splits propagated to the root. Queries are depth-first range searches
//! with a distance threshold. Serialization is a self-delimiting recursive
//! stream with a caller-supplied payload codec; no offsets are stored.

use crate::error::{IndexError, IndexResult};
use crate::io::ByteReader;

/// Seed selection heuristic for node splits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedPicker {
    /// Normalized-separation seeds, O(n) per split
    Linear,
    /// Wasted-area pair seeds, O(n^2) per split
    Quadratic,
}

impl SeedPicker {
    pub fn parse(s: &str) -> IndexResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LINEAR" => Ok(SeedPicker::Linear),
            "QUADRATIC" => Ok(SeedPicker::Quadratic),
            other => Err(IndexError::Config(format!("unknown seed_picker: {}", other))),
        }
    }

    fn tag(&self) -> u8 {
        match self {
            SeedPicker::Linear => 0,
            SeedPicker::Quadratic => 1,
        }
    }

    fn from_tag(tag: u8) -> IndexResult<Self> {
        match tag {
            0 => Ok(SeedPicker::Linear),
            1 => Ok(SeedPicker::Quadratic),
            other => Err(IndexError::CorruptChunk(format!(
                "invalid seed picker tag: {}",
                other
            ))),
        }
    }
}

/// Minimum bounding rectangle in feature space
#[derive(Debug, Clone, PartialEq)]
pub struct Mbr {
    pub min: Vec<f32>,
    pub max: Vec<f32>,
}

impl Mbr {
    /// Zero-extent rectangle at `corner`
    pub fn point(corner: &[f32]) -> Self {
        Self {
            min: corner.to_vec(),
            max: corner.to_vec(),
        }
    }

    /// Rectangle spanning `[corner[i], corner[i] + range[i]]` per dimension
    pub fn rect(corner: &[f32], range: &[f32]) -> Self {
        Self {
            min: corner.to_vec(),
            max: corner
                .iter()
                .zip(range)
                .map(|(c, r)| c + r)
                .collect(),
        }
    }

    fn area(&self) -> f64 {
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| (hi - lo) as f64)
            .product()
    }

    fn union(&self, other: &Mbr) -> Mbr {
        Mbr {
            min: self
                .min
                .iter()
                .zip(&other.min)
                .map(|(a, b)| a.min(*b))
                .collect(),
            max: self
                .max
                .iter()
                .zip(&other.max)
                .map(|(a, b)| a.max(*b))
                .collect(),
        }
    }

    fn enlargement(&self, other: &Mbr) -> f64 {
        self.union(other).area() - self.area()
    }

    fn expand(&mut self, other: &Mbr) {
        for i in 0..self.min.len() {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    fn contains(&self, other: &Mbr) -> bool {
        self.min
            .iter()
            .zip(&other.min)
            .all(|(a, b)| a <= b)
            && self.max.iter().zip(&other.max).all(|(a, b)| a >= b)
    }

    /// Minimum distance to another rectangle: the sum over dimensions of
    /// the squared axis separation when the intervals are disjoint, 0
    /// otherwise
    pub fn min_dist(&self, other: &Mbr) -> f64 {
        let mut sum = 0.0;
        for i in 0..self.min.len() {
            let gap = if self.min[i] > other.max[i] {
                (self.min[i] - other.max[i]) as f64
            } else if other.min[i] > self.max[i] {
                (other.min[i] - self.max[i]) as f64
            } else {
                0.0
            };
            sum += gap * gap;
        }
        sum
    }
}

#[derive(Debug)]
struct Entry<P> {
    mbr: Mbr,
    child: Option<u32>,
    payload: Option<P>,
}

#[derive(Debug)]
struct Node<P> {
    parent: Option<u32>,
    is_leaf: bool,
    depth: u32,
    entries: Vec<Entry<P>>,
}

/// Arena-backed R-tree with generic leaf payloads
#[derive(Debug)]
pub struct Rtree<P> {
    nodes: Vec<Node<P>>,
    root: u32,
    dim: usize,
    max_entries: usize,
    min_entries: usize,
    seed_picker: SeedPicker,
    size: usize,
}

impl<P: Clone> Rtree<P> {
    /// Create an empty tree; requires `2 <= min_entries <= max_entries / 2`
    pub fn new(
        max_entries: usize,
        min_entries: usize,
        dim: usize,
        seed_picker: SeedPicker,
    ) -> Self {
        debug_assert!(dim > 0);
        debug_assert!(min_entries >= 2 || max_entries < 4);
        debug_assert!(min_entries <= max_entries);
        let root = Node {
            parent: None,
            is_leaf: true,
            depth: 0,
            entries: Vec::new(),
        };
        Self {
            nodes: vec![root],
            root: 0,
            dim,
            max_entries,
            min_entries,
            seed_picker,
            size: 0,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Insert a point payload (zero-extent rectangle)
    pub fn insert_point(&mut self, corner: &[f32], payload: P) {
        self.insert_mbr(Mbr::point(corner), payload);
    }

    /// Insert a rectangle payload
    pub fn insert(&mut self, corner: &[f32], range: &[f32], payload: P) {
        self.insert_mbr(Mbr::rect(corner, range), payload);
    }

    fn insert_mbr(&mut self, mbr: Mbr, payload: P) {
        let leaf = self.choose_leaf(&mbr);
        self.nodes[leaf as usize].entries.push(Entry {
            mbr,
            child: None,
            payload: Some(payload),
        });
        self.size += 1;
        self.tighten_upward(leaf);
        if self.nodes[leaf as usize].entries.len() > self.max_entries {
            self.split_node(leaf);
        }
    }

    /// Descend from the root picking the child needing the least area
    /// enlargement; ties break to the smaller resulting area, then the
    /// smaller entry index
    fn choose_leaf(&self, mbr: &Mbr) -> u32 {
        let mut node_id = self.root;
        loop {
            let node = &self.nodes[node_id as usize];
            if node.is_leaf {
                return node_id;
            }
            let mut best = 0;
            let mut best_enlargement = f64::INFINITY;
            let mut best_area = f64::INFINITY;
            for (i, entry) in node.entries.iter().enumerate() {
                let enlargement = entry.mbr.enlargement(mbr);
                let area = entry.mbr.union(mbr).area();
                if enlargement < best_enlargement
                    || (enlargement == best_enlargement && area < best_area)
                {
                    best = i;
                    best_enlargement = enlargement;
                    best_area = area;
                }
            }
            node_id = node.entries[best].child.expect("internal entry has child");
        }
    }

    fn node_bbox(&self, node_id: u32) -> Mbr {
        let node = &self.nodes[node_id as usize];
        let mut bbox = node.entries[0].mbr.clone();
        for entry in node.entries.iter().skip(1) {
            bbox.expand(&entry.mbr);
        }
        bbox
    }

    /// Recompute the parent-chain entry MBRs for `node_id` tightly
    fn tighten_upward(&mut self, mut node_id: u32) {
        while let Some(parent_id) = self.nodes[node_id as usize].parent {
            let bbox = self.node_bbox(node_id);
            let parent = &mut self.nodes[parent_id as usize];
            if let Some(entry) = parent
                .entries
                .iter_mut()
                .find(|e| e.child == Some(node_id))
            {
                entry.mbr = bbox;
            }
            node_id = parent_id;
        }
    }

    fn split_node(&mut self, node_id: u32) {
        let entries = std::mem::take(&mut self.nodes[node_id as usize].entries);
        let (seed_a, seed_b) = match self.seed_picker {
            SeedPicker::Linear => pick_seeds_linear(&entries, self.dim),
            SeedPicker::Quadratic => pick_seeds_quadratic(&entries),
        };
        let (group_a, group_b) = distribute(entries, seed_a, seed_b, self.min_entries);

        let is_leaf = self.nodes[node_id as usize].is_leaf;
        let depth = self.nodes[node_id as usize].depth;
        let parent = self.nodes[node_id as usize].parent;

        self.nodes[node_id as usize].entries = group_a;

        let sibling_id = self.nodes.len() as u32;
        self.nodes.push(Node {
            parent,
            is_leaf,
            depth,
            entries: group_b,
        });
        self.reparent_children(sibling_id);

        match parent {
            None => {
                // root split: new root one level up
                let new_root_id = self.nodes.len() as u32;
                let entry_a = Entry {
                    mbr: self.node_bbox(node_id),
                    child: Some(node_id),
                    payload: None,
                };
                let entry_b = Entry {
                    mbr: self.node_bbox(sibling_id),
                    child: Some(sibling_id),
                    payload: None,
                };
                self.nodes.push(Node {
                    parent: None,
                    is_leaf: false,
                    depth: depth + 1,
                    entries: vec![entry_a, entry_b],
                });
                self.nodes[node_id as usize].parent = Some(new_root_id);
                self.nodes[sibling_id as usize].parent = Some(new_root_id);
                self.root = new_root_id;
            }
            Some(parent_id) => {
                let bbox_a = self.node_bbox(node_id);
                let bbox_b = self.node_bbox(sibling_id);
                self.nodes[sibling_id as usize].parent = Some(parent_id);
                let parent_node = &mut self.nodes[parent_id as usize];
                if let Some(entry) = parent_node
                    .entries
                    .iter_mut()
                    .find(|e| e.child == Some(node_id))
                {
                    entry.mbr = bbox_a;
                }
                parent_node.entries.push(Entry {
                    mbr: bbox_b,
                    child: Some(sibling_id),
                    payload: None,
                });
                if self.nodes[parent_id as usize].entries.len() > self.max_entries {
                    self.split_node(parent_id);
                } else {
                    self.tighten_upward(parent_id);
                }
            }
        }
    }

    fn reparent_children(&mut self, node_id: u32) {
        if self.nodes[node_id as usize].is_leaf {
            return;
        }
        let children: Vec<u32> = self.nodes[node_id as usize]
            .entries
            .iter()
            .filter_map(|e| e.child)
            .collect();
        for child in children {
            self.nodes[child as usize].parent = Some(node_id);
        }
    }

    /// Collect payloads whose MBR lies within `threshold` of the query
    /// rectangle; a node is descended only if its MBR does
    pub fn search_with_threshold(
        &self,
        corner: &[f32],
        range: &[f32],
        threshold: f64,
    ) -> Vec<P> {
        let query = Mbr::rect(corner, range);
        let mut results = Vec::new();
        if self.size == 0 {
            return results;
        }
        let mut stack = vec![self.root];
        while let Some(node_id) = stack.pop() {
            let node = &self.nodes[node_id as usize];
            for entry in &node.entries {
                if entry.mbr.min_dist(&query) <= threshold {
                    if node.is_leaf {
                        if let Some(payload) = &entry.payload {
                            results.push(payload.clone());
                        }
                    } else if let Some(child) = entry.child {
                        stack.push(child);
                    }
                }
            }
        }
        results
    }

    /// Write the tree as a self-delimiting byte stream
    ///
    /// `write_payload` must append a self-delimiting encoding of each leaf
    /// payload; the matching reader reverses it.
    pub fn serialize(
        &self,
        out: &mut Vec<u8>,
        write_payload: &mut dyn FnMut(&P, &mut Vec<u8>) -> IndexResult<()>,
    ) -> IndexResult<()> {
        out.extend_from_slice(&(self.dim as u32).to_le_bytes());
        out.extend_from_slice(&(self.max_entries as u32).to_le_bytes());
        out.extend_from_slice(&(self.min_entries as u32).to_le_bytes());
        out.push(self.seed_picker.tag());
        self.serialize_node(self.root, out, write_payload)
    }

    fn serialize_node(
        &self,
        node_id: u32,
        out: &mut Vec<u8>,
        write_payload: &mut dyn FnMut(&P, &mut Vec<u8>) -> IndexResult<()>,
    ) -> IndexResult<()> {
        let node = &self.nodes[node_id as usize];
        out.push(if node.is_leaf { 0 } else { 1 });
        out.extend_from_slice(&(node.entries.len() as u32).to_le_bytes());
        for entry in &node.entries {
            for v in &entry.mbr.min {
                out.extend_from_slice(&v.to_le_bytes());
            }
            for v in &entry.mbr.max {
                out.extend_from_slice(&v.to_le_bytes());
            }
            if node.is_leaf {
                let payload = entry
                    .payload
                    .as_ref()
                    .ok_or_else(|| IndexError::Fatal("leaf entry without payload".into()))?;
                write_payload(payload, out)?;
            } else {
                let child = entry
                    .child
                    .ok_or_else(|| IndexError::Fatal("internal entry without child".into()))?;
                self.serialize_node(child, out, write_payload)?;
            }
        }
        Ok(())
    }

    /// Rebuild a tree from the byte stream produced by `serialize`
    pub fn deserialize(
        reader: &mut ByteReader<'_>,
        read_payload: &mut dyn FnMut(&mut ByteReader<'_>) -> IndexResult<P>,
    ) -> IndexResult<Self> {
        let dim = reader.read_u32()? as usize;
        let max_entries = reader.read_u32()? as usize;
        let min_entries = reader.read_u32()? as usize;
        let seed_picker = SeedPicker::from_tag(reader.read_u8()?)?;
        if dim == 0 || max_entries == 0 {
            return Err(IndexError::CorruptChunk(
                "zero dimension or capacity in tree header".into(),
            ));
        }

        let mut tree = Rtree {
            nodes: Vec::new(),
            root: 0,
            dim,
            max_entries,
            min_entries,
            seed_picker,
            size: 0,
        };
        let root = tree.deserialize_node(reader, read_payload)?;
        tree.root = root;
        Ok(tree)
    }

    fn deserialize_node(
        &mut self,
        reader: &mut ByteReader<'_>,
        read_payload: &mut dyn FnMut(&mut ByteReader<'_>) -> IndexResult<P>,
    ) -> IndexResult<u32> {
        let kind = reader.read_u8()?;
        if kind > 1 {
            return Err(IndexError::CorruptChunk(format!(
                "invalid node kind: {}",
                kind
            )));
        }
        let is_leaf = kind == 0;
        let entry_count = reader.read_u32()? as usize;
        if entry_count > self.max_entries {
            return Err(IndexError::CorruptChunk(format!(
                "entry count {} exceeds capacity {}",
                entry_count, self.max_entries
            )));
        }

        let node_id = self.nodes.len() as u32;
        self.nodes.push(Node {
            parent: None,
            is_leaf,
            depth: 0,
            entries: Vec::with_capacity(entry_count),
        });

        let mut max_child_depth = 0;
        for _ in 0..entry_count {
            let mut min = Vec::with_capacity(self.dim);
            let mut max = Vec::with_capacity(self.dim);
            for _ in 0..self.dim {
                min.push(reader.read_f32()?);
            }
            for _ in 0..self.dim {
                max.push(reader.read_f32()?);
            }
            let mbr = Mbr { min, max };

            let entry = if is_leaf {
                let payload = read_payload(reader)?;
                self.size += 1;
                Entry {
                    mbr,
                    child: None,
                    payload: Some(payload),
                }
            } else {
                let child = self.deserialize_node(reader, read_payload)?;
                self.nodes[child as usize].parent = Some(node_id);
                max_child_depth = max_child_depth.max(self.nodes[child as usize].depth);
                Entry {
                    mbr,
                    child: Some(child),
                    payload: None,
                }
            };
            self.nodes[node_id as usize].entries.push(entry);
        }
        if !is_leaf {
            self.nodes[node_id as usize].depth = max_child_depth + 1;
        }
        Ok(node_id)
    }

    /// Check structural invariants: capacity bounds on non-root nodes and
    /// tight containment of children in internal MBRs
    pub(crate) fn validate(&self) -> IndexResult<()> {
        self.validate_node(self.root)
    }

    fn validate_node(&self, node_id: u32) -> IndexResult<()> {
        let node = &self.nodes[node_id as usize];
        if node_id != self.root
            && (node.entries.len() < self.min_entries || node.entries.len() > self.max_entries)
        {
            return Err(IndexError::Fatal(format!(
                "node {} holds {} entries, bounds [{}, {}]",
                node_id,
                node.entries.len(),
                self.min_entries,
                self.max_entries
            )));
        }
        if !node.is_leaf {
            for entry in &node.entries {
                let child = entry
                    .child
                    .ok_or_else(|| IndexError::Fatal("internal entry without child".into()))?;
                let bbox = self.node_bbox(child);
                if entry.mbr != bbox || !entry.mbr.contains(&bbox) {
                    return Err(IndexError::Fatal(format!(
                        "node {} entry MBR is not the tight bound of child {}",
                        node_id, child
                    )));
                }
                self.validate_node(child)?;
            }
        }
        Ok(())
    }

    /// Root fan-out, for tests and diagnostics
    pub(crate) fn root_children(&self) -> usize {
        self.nodes[self.root as usize].entries.len()
    }

    pub(crate) fn root_is_leaf(&self) -> bool {
        self.nodes[self.root as usize].is_leaf
    }
}

/// Linear seed picking: the dimension with the greatest normalized
/// separation supplies the two seeds
fn pick_seeds_linear<P>(entries: &[Entry<P>], dim: usize) -> (usize, usize) {
    let mut best_dim_sep = f64::NEG_INFINITY;
    let mut seeds = (0, 1);
    for d in 0..dim {
        let mut max_lowest = f64::NEG_INFINITY;
        let mut max_lowest_idx = 0;
        let mut min_highest = f64::INFINITY;
        let mut min_highest_idx = 0;
        let mut min_lowest = f64::INFINITY;
        let mut max_highest = f64::NEG_INFINITY;
        for (i, entry) in entries.iter().enumerate() {
            let lo = entry.mbr.min[d] as f64;
            let hi = entry.mbr.max[d] as f64;
            if lo > max_lowest {
                max_lowest = lo;
                max_lowest_idx = i;
            }
            if hi < min_highest {
                min_highest = hi;
                min_highest_idx = i;
            }
            min_lowest = min_lowest.min(lo);
            max_highest = max_highest.max(hi);
        }
        let width = max_highest - min_lowest;
        let separation = if width > 0.0 {
            (max_lowest - min_highest) / width
        } else {
            0.0
        };
        if separation > best_dim_sep && max_lowest_idx != min_highest_idx {
            best_dim_sep = separation;
            seeds = (max_lowest_idx, min_highest_idx);
        }
    }
    seeds
}

/// Quadratic seed picking: the pair wasting the most area when paired
fn pick_seeds_quadratic<P>(entries: &[Entry<P>]) -> (usize, usize) {
    let mut worst = f64::NEG_INFINITY;
    let mut seeds = (0, 1);
    for i in 0..entries.len() {
        for j in i + 1..entries.len() {
            let waste = entries[i].mbr.union(&entries[j].mbr).area()
                - entries[i].mbr.area()
                - entries[j].mbr.area();
            if waste > worst {
                worst = waste;
                seeds = (i, j);
            }
        }
    }
    seeds
}

/// Guttman distribution of the remaining entries after seed selection
fn distribute<P>(
    mut entries: Vec<Entry<P>>,
    seed_a: usize,
    seed_b: usize,
    min_entries: usize,
) -> (Vec<Entry<P>>, Vec<Entry<P>>) {
    // remove the higher index first so the lower stays valid
    let (first, second) = if seed_a > seed_b {
        (seed_a, seed_b)
    } else {
        (seed_b, seed_a)
    };
    let e_first = entries.remove(first);
    let e_second = entries.remove(second);
    // e_first came from the higher original index; order within a group is
    // irrelevant, only group membership matters
    let (seed_entry_a, seed_entry_b) = if seed_a > seed_b {
        (e_first, e_second)
    } else {
        (e_second, e_first)
    };

    let mut mbr_a = seed_entry_a.mbr.clone();
    let mut mbr_b = seed_entry_b.mbr.clone();
    let mut group_a = vec![seed_entry_a];
    let mut group_b = vec![seed_entry_b];

    while !entries.is_empty() {
        // min-fill short-circuit: hand the rest to a group that needs
        // every remaining entry to reach the minimum
        if group_a.len() + entries.len() == min_entries {
            for entry in entries.drain(..) {
                mbr_a.expand(&entry.mbr);
                group_a.push(entry);
            }
            break;
        }
        if group_b.len() + entries.len() == min_entries {
            for entry in entries.drain(..) {
                mbr_b.expand(&entry.mbr);
                group_b.push(entry);
            }
            break;
        }

        // pick the entry with the strongest preference
        let mut best_idx = 0;
        let mut best_pref = f64::NEG_INFINITY;
        for (i, entry) in entries.iter().enumerate() {
            let d_a = mbr_a.enlargement(&entry.mbr);
            let d_b = mbr_b.enlargement(&entry.mbr);
            let pref = (d_a - d_b).abs();
            if pref > best_pref {
                best_pref = pref;
                best_idx = i;
            }
        }
        let entry = entries.remove(best_idx);
        let d_a = mbr_a.enlargement(&entry.mbr);
        let d_b = mbr_b.enlargement(&entry.mbr);
        let to_a = if d_a < d_b {
            true
        } else if d_b < d_a {
            false
        } else if mbr_a.area() != mbr_b.area() {
            mbr_a.area() < mbr_b.area()
        } else {
            true
        };
        if to_a {
            mbr_a.expand(&entry.mbr);
            group_a.push(entry);
        } else {
            mbr_b.expand(&entry.mbr);
            group_b.push(entry);
        }
    }
    (group_a, group_b)
}
