//! Flat, index-addressed adjacency list.
//!
//! Nodes and edges live in two `u32` buffers so a whole graph can be handed to another thread
//! (or written out) without walking any pointers:
//!
//! ```text
//! nodes: [capacity, count] [first_in, first_out, last_in, last_out] * capacity
//! edges: [capacity, count, deletes] [bucket head] * capacity
//!        [type, from, to, next_hash, next_in, prev_in, next_out, prev_out] * capacity
//! ```
//!
//! Edge slots are addressed by `index + 1` so that `0` means "no edge". Every edge is linked
//! into an open hash chain keyed by `(from, to, type)` and into insertion-ordered, doubly linked
//! incoming/outgoing lists of its endpoints. Removed edges are zeroed in place; their slots are
//! only reclaimed when the edge table is resized.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

use crate::types::Edge;
use crate::types::EdgeType;
use crate::types::EdgeTypeQuery;
use crate::types::NodeId;

const NULL: u32 = 0;

const NODE_HEADER_SIZE: usize = 2;
const NODE_SIZE: usize = 4;
const NODE_CAPACITY: usize = 0;
const NODE_COUNT: usize = 1;

const FIRST_IN: usize = 0;
const FIRST_OUT: usize = 1;
const LAST_IN: usize = 2;
const LAST_OUT: usize = 3;

const EDGE_HEADER_SIZE: usize = 3;
const EDGE_SIZE: usize = 8;
const EDGE_CAPACITY: usize = 0;
const EDGE_COUNT: usize = 1;
const EDGE_DELETES: usize = 2;

const TYPE: usize = 0;
const FROM: usize = 1;
const TO: usize = 2;
const NEXT_HASH: usize = 3;
const NEXT_IN: usize = 4;
const PREV_IN: usize = 5;
const NEXT_OUT: usize = 6;
const PREV_OUT: usize = 7;

/// The edge table is resized once live and deleted slots exceed this share of its capacity.
const LOAD_FACTOR: f64 = 0.7;

/// Largest node capacity whose buffer length is still addressable by a `u32`.
pub const MAX_NODE_CAPACITY: u32 = ((u32::MAX as usize - NODE_HEADER_SIZE) / NODE_SIZE) as u32;

/// Largest edge capacity whose buffer length (bucket heads plus records) is still addressable
/// by a `u32`.
pub const MAX_EDGE_CAPACITY: u32 =
  ((u32::MAX as usize - EDGE_HEADER_SIZE) / (EDGE_SIZE + 1)) as u32;

/// Tuning knobs for the resize policy.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct AdjacencyListParams {
  pub initial_capacity: u32,
  pub initial_node_capacity: u32,
  /// Growth multiplier applied to small edge tables.
  pub max_grow_factor: f64,
  /// Growth multiplier applied once the edge table reaches `peak_capacity`.
  pub min_grow_factor: f64,
  pub peak_capacity: u32,
  /// Live-edge load below which a resize shrinks the edge table.
  pub unload_factor: f64,
  pub shrink_factor: f64,
}

impl Default for AdjacencyListParams {
  fn default() -> Self {
    Self {
      initial_capacity: 2,
      initial_node_capacity: 2,
      max_grow_factor: 8.0,
      min_grow_factor: 2.0,
      peak_capacity: 2u32.pow(21),
      unload_factor: 0.3,
      shrink_factor: 0.5,
    }
  }
}

fn interpolate(x: f64, y: f64, t: f64) -> f64 {
  x + (y - x) * t.clamp(0.0, 1.0)
}

/// Computes the edge capacity needed to hold `count` edges.
///
/// Large tables grow more conservatively than small ones: the growth factor moves linearly from
/// `max_grow_factor` to `min_grow_factor` as the capacity approaches `peak_capacity`.
pub fn next_edge_capacity(capacity: u32, count: u32, params: &AdjacencyListParams) -> u32 {
  let load = count as f64 / capacity as f64;

  let next = if load > LOAD_FACTOR {
    let pct = capacity as f64 / params.peak_capacity as f64;
    let grow_factor = interpolate(params.max_grow_factor, params.min_grow_factor, pct);
    (capacity as f64 * grow_factor).floor()
  } else if load < params.unload_factor {
    (capacity as f64 * params.shrink_factor).floor()
  } else {
    capacity as f64
  };

  if next > MAX_EDGE_CAPACITY as f64 {
    assert!(capacity < MAX_EDGE_CAPACITY, "Edge capacity overflow!");
    return MAX_EDGE_CAPACITY;
  }

  (next as u32).max(params.initial_capacity)
}

/// Node capacity doubles (by `min_grow_factor`), always leaving room for at least two more nodes.
pub fn next_node_capacity(capacity: u32, params: &AdjacencyListParams) -> u32 {
  let next = (capacity as f64 * params.min_grow_factor)
    .ceil()
    .max(capacity as f64 + 2.0);

  if next > MAX_NODE_CAPACITY as f64 {
    assert!(capacity < MAX_NODE_CAPACITY, "Node capacity overflow!");
    return MAX_NODE_CAPACITY;
  }

  next as u32
}

/// 32 bit multiplicative mix, spreads upper bits of the key into the lower ones.
fn hash32_shift_mult(key: u32) -> u32 {
  let mut key = (key ^ 61) ^ (key >> 16);
  key = key.wrapping_add(key << 3);
  key ^= key >> 4;
  key = key.wrapping_mul(0x27d4_eb2d);
  key ^ (key >> 15)
}

#[derive(Clone, Debug)]
struct NodeTable {
  data: Arc<Vec<u32>>,
}

impl NodeTable {
  fn new(capacity: u32) -> Self {
    let mut data = vec![NULL; NODE_HEADER_SIZE + capacity as usize * NODE_SIZE];
    data[NODE_CAPACITY] = capacity;
    Self {
      data: Arc::new(data),
    }
  }

  fn capacity(&self) -> u32 {
    self.data[NODE_CAPACITY]
  }

  fn count(&self) -> u32 {
    self.data[NODE_COUNT]
  }

  fn set_count(&mut self, count: u32) {
    self.data_mut()[NODE_COUNT] = count;
  }

  fn offset(node: NodeId) -> usize {
    NODE_HEADER_SIZE + node.index() * NODE_SIZE
  }

  fn get(&self, node: NodeId, slot: usize) -> u32 {
    self.data[Self::offset(node) + slot]
  }

  fn set(&mut self, node: NodeId, slot: usize, value: u32) {
    let index = Self::offset(node) + slot;
    self.data_mut()[index] = value;
  }

  fn data_mut(&mut self) -> &mut Vec<u32> {
    Arc::make_mut(&mut self.data)
  }

  /// Copies the live node records into a table of a different capacity.
  fn resized(&self, capacity: u32) -> Self {
    let mut next = Self::new(capacity);
    let len = NODE_HEADER_SIZE + self.count() as usize * NODE_SIZE;
    let data = next.data_mut();
    data[NODE_HEADER_SIZE..len].copy_from_slice(&self.data[NODE_HEADER_SIZE..len]);
    data[NODE_COUNT] = self.count();
    next
  }
}

#[derive(Clone, Debug)]
struct EdgeTable {
  data: Arc<Vec<u32>>,
}

impl EdgeTable {
  fn new(capacity: u32) -> Self {
    let mut data = vec![NULL; EDGE_HEADER_SIZE + capacity as usize * (EDGE_SIZE + 1)];
    data[EDGE_CAPACITY] = capacity;
    Self {
      data: Arc::new(data),
    }
  }

  fn capacity(&self) -> u32 {
    self.data[EDGE_CAPACITY]
  }

  fn count(&self) -> u32 {
    self.data[EDGE_COUNT]
  }

  fn deletes(&self) -> u32 {
    self.data[EDGE_DELETES]
  }

  fn load(&self, count: u32) -> f64 {
    count as f64 / self.capacity() as f64
  }

  fn offset(&self, edge: u32) -> usize {
    EDGE_HEADER_SIZE + self.capacity() as usize + (edge as usize - 1) * EDGE_SIZE
  }

  fn get(&self, edge: u32, slot: usize) -> u32 {
    self.data[self.offset(edge) + slot]
  }

  fn set(&mut self, edge: u32, slot: usize, value: u32) {
    let index = self.offset(edge) + slot;
    self.data_mut()[index] = value;
  }

  fn head(&self, hash: u32) -> u32 {
    self.data[EDGE_HEADER_SIZE + hash as usize]
  }

  fn set_head(&mut self, hash: u32, edge: u32) {
    self.data_mut()[EDGE_HEADER_SIZE + hash as usize] = edge;
  }

  fn data_mut(&mut self) -> &mut Vec<u32> {
    Arc::make_mut(&mut self.data)
  }

  fn hash(&self, from: NodeId, to: NodeId, edge_type: u32) -> u32 {
    let mut hash: u32 = 17;
    hash = hash
      .wrapping_mul(37)
      .wrapping_add(hash32_shift_mult(from.raw()));
    hash = hash.wrapping_mul(37).wrapping_add(hash32_shift_mult(to.raw()));
    hash = hash
      .wrapping_mul(37)
      .wrapping_add(hash32_shift_mult(edge_type));
    hash % self.capacity()
  }

  fn from(&self, edge: u32) -> NodeId {
    NodeId::new(self.get(edge, FROM))
  }

  fn to(&self, edge: u32) -> NodeId {
    NodeId::new(self.get(edge, TO))
  }

  fn address_of(&self, from: NodeId, to: NodeId, edge_type: u32) -> Option<u32> {
    let mut edge = self.head(self.hash(from, to, edge_type));
    while edge != NULL {
      if self.get(edge, TYPE) == edge_type
        && self.get(edge, FROM) == from.raw()
        && self.get(edge, TO) == to.raw()
      {
        return Some(edge);
      }
      edge = self.get(edge, NEXT_HASH);
    }
    None
  }

  fn add(&mut self, from: NodeId, to: NodeId, edge_type: u32) -> u32 {
    let edge = self.count() + self.deletes() + 1;
    assert!(edge <= self.capacity(), "Edge capacity overflow!");

    let hash = self.hash(from, to, edge_type);
    let head = self.head(hash);
    self.set(edge, TYPE, edge_type);
    self.set(edge, FROM, from.raw());
    self.set(edge, TO, to.raw());
    self.set(edge, NEXT_HASH, head);
    self.set_head(hash, edge);

    let count = self.count() + 1;
    self.data_mut()[EDGE_COUNT] = count;
    edge
  }

  fn delete(&mut self, edge: u32) {
    let hash = self.hash(self.from(edge), self.to(edge), self.get(edge, TYPE));
    let next = self.get(edge, NEXT_HASH);

    if self.head(hash) == edge {
      self.set_head(hash, next);
    } else {
      let mut prev = self.head(hash);
      while prev != NULL {
        let candidate = self.get(prev, NEXT_HASH);
        if candidate == edge {
          self.set(prev, NEXT_HASH, next);
          break;
        }
        prev = candidate;
      }
    }

    let offset = self.offset(edge);
    let count = self.count() - 1;
    let deletes = self.deletes() + 1;
    let data = self.data_mut();
    data[offset..offset + EDGE_SIZE].fill(NULL);
    data[EDGE_COUNT] = count;
    data[EDGE_DELETES] = deletes;
  }

  /// Live edge addresses in insertion order.
  fn addresses(&self) -> impl Iterator<Item = u32> + '_ {
    (1..=self.count() + self.deletes()).filter(move |edge| self.get(*edge, TYPE) != NULL)
  }
}

/// Adds an edge record and appends it to both endpoint chains.
fn link(nodes: &mut NodeTable, edges: &mut EdgeTable, from: NodeId, to: NodeId, edge_type: u32) {
  let edge = edges.add(from, to, edge_type);

  let last_out = nodes.get(from, LAST_OUT);
  if last_out != NULL {
    edges.set(last_out, NEXT_OUT, edge);
    edges.set(edge, PREV_OUT, last_out);
  } else {
    nodes.set(from, FIRST_OUT, edge);
  }
  nodes.set(from, LAST_OUT, edge);

  let last_in = nodes.get(to, LAST_IN);
  if last_in != NULL {
    edges.set(last_in, NEXT_IN, edge);
    edges.set(edge, PREV_IN, last_in);
  } else {
    nodes.set(to, FIRST_IN, edge);
  }
  nodes.set(to, LAST_IN, edge);
}

struct EdgeChain<'a> {
  edges: &'a EdgeTable,
  next: u32,
  link: usize,
}

impl Iterator for EdgeChain<'_> {
  type Item = u32;

  fn next(&mut self) -> Option<u32> {
    if self.next == NULL {
      return None;
    }
    let edge = self.next;
    self.next = self.edges.get(edge, self.link);
    Some(edge)
  }
}

/// `(node, edge type) -> neighbours` lookup used for single-type queries.
#[derive(Clone, Debug, Default)]
struct TypeIndex {
  outgoing: HashMap<(NodeId, u32), Vec<NodeId>>,
  incoming: HashMap<(NodeId, u32), Vec<NodeId>>,
}

impl TypeIndex {
  fn build(list: &AdjacencyList) -> Self {
    let mut index = TypeIndex::default();
    for raw in 0..list.nodes.count() {
      let node = NodeId::new(raw);
      for edge in list.chain(node, FIRST_OUT, NEXT_OUT) {
        index
          .outgoing
          .entry((node, list.edges.get(edge, TYPE)))
          .or_default()
          .push(list.edges.to(edge));
      }
      for edge in list.chain(node, FIRST_IN, NEXT_IN) {
        index
          .incoming
          .entry((node, list.edges.get(edge, TYPE)))
          .or_default()
          .push(list.edges.from(edge));
      }
    }
    index
  }

  fn insert(&mut self, from: NodeId, to: NodeId, edge_type: u32) {
    self
      .outgoing
      .entry((from, edge_type))
      .or_default()
      .push(to);
    self
      .incoming
      .entry((to, edge_type))
      .or_default()
      .push(from);
  }

  fn remove(&mut self, from: NodeId, to: NodeId, edge_type: u32) {
    if let Some(targets) = self.outgoing.get_mut(&(from, edge_type)) {
      targets.retain(|n| *n != to);
    }
    if let Some(sources) = self.incoming.get_mut(&(to, edge_type)) {
      sources.retain(|n| *n != from);
    }
  }
}

/// Rejects node and edge records that point outside of the tables.
///
/// Expects headers that were already checked against the buffer lengths.
fn check_pointers(nodes: &[u32], edges: &[u32]) -> Result<(), SnapshotError> {
  let node_count = nodes[NODE_COUNT];
  let edge_capacity = edges[EDGE_CAPACITY] as usize;
  // Slots past this were never written
  let used = edges[EDGE_COUNT] + edges[EDGE_DELETES];

  let check = |table: &'static str, record: usize, field: &'static str, value: u32, bound: u32| {
    if value > bound {
      Err(SnapshotError::OutOfBounds {
        table,
        record,
        field,
        value,
        bound,
      })
    } else {
      Ok(())
    }
  };

  for node in 0..node_count as usize {
    let offset = NODE_HEADER_SIZE + node * NODE_SIZE;
    for (slot, field) in [
      (FIRST_IN, "first_in"),
      (FIRST_OUT, "first_out"),
      (LAST_IN, "last_in"),
      (LAST_OUT, "last_out"),
    ] {
      check("node", node, field, nodes[offset + slot], used)?;
    }
  }

  for bucket in 0..edge_capacity {
    check("edge", bucket, "bucket head", edges[EDGE_HEADER_SIZE + bucket], used)?;
  }

  let mut live = 0;
  for edge in 1..=used as usize {
    let offset = EDGE_HEADER_SIZE + edge_capacity + (edge - 1) * EDGE_SIZE;
    if edges[offset + TYPE] == NULL {
      continue;
    }
    live += 1;

    // Node ids are zero based, so the largest valid id is one below the count
    let max_node = node_count.checked_sub(1);
    for (slot, field) in [(FROM, "from"), (TO, "to")] {
      let value = edges[offset + slot];
      match max_node {
        Some(max_node) => check("edge", edge, field, value, max_node)?,
        None => {
          return Err(SnapshotError::OutOfBounds {
            table: "edge",
            record: edge,
            field,
            value,
            bound: 0,
          })
        }
      }
    }

    for (slot, field) in [
      (NEXT_HASH, "next_hash"),
      (NEXT_IN, "next_in"),
      (PREV_IN, "prev_in"),
      (NEXT_OUT, "next_out"),
      (PREV_OUT, "prev_out"),
    ] {
      check("edge", edge, field, edges[offset + slot], used)?;
    }
  }

  if live != edges[EDGE_COUNT] {
    return Err(SnapshotError::InvalidHeader {
      table: "edge",
      reason: format!("count {} but {live} live records", edges[EDGE_COUNT]),
    });
  }

  Ok(())
}

/// Byte snapshots that cannot be hydrated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
  #[error("snapshot length {0} is not a multiple of 4 bytes")]
  Misaligned(usize),
  #[error("snapshot is truncated: expected at least {expected} words but found {found}")]
  Truncated { expected: usize, found: usize },
  #[error("snapshot has {0} unexpected trailing words")]
  TrailingData(usize),
  #[error("invalid {table} header: {reason}")]
  InvalidHeader { table: &'static str, reason: String },
  #[error("{table} record {record} has {field} {value} outside of {bound}")]
  OutOfBounds {
    table: &'static str,
    record: usize,
    field: &'static str,
    value: u32,
    bound: u32,
  },
}

/// Shares the buffers of an [`AdjacencyList`].
///
/// Cloning or sending a snapshot to another thread shares the underlying words. A list hydrated
/// from a snapshot copies a buffer on its first write only if another holder still references
/// it, so whichever context mutates always writes to storage it owns exclusively.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct SerializedAdjacencyList {
  pub nodes: Arc<Vec<u32>>,
  pub edges: Arc<Vec<u32>>,
  pub params: AdjacencyListParams,
}

#[derive(Clone, Debug)]
pub struct AdjacencyList {
  nodes: NodeTable,
  edges: EdgeTable,
  params: AdjacencyListParams,
  type_index: OnceCell<TypeIndex>,
}

impl Default for AdjacencyList {
  fn default() -> Self {
    Self::new()
  }
}

impl AdjacencyList {
  pub fn new() -> Self {
    Self::with_params(AdjacencyListParams::default())
  }

  pub fn with_params(params: AdjacencyListParams) -> Self {
    assert!(
      params.initial_capacity > 0 && params.initial_capacity <= MAX_EDGE_CAPACITY,
      "Invalid initial edge capacity {}",
      params.initial_capacity
    );
    assert!(
      params.initial_node_capacity <= MAX_NODE_CAPACITY,
      "Invalid initial node capacity {}",
      params.initial_node_capacity
    );

    Self {
      nodes: NodeTable::new(params.initial_node_capacity),
      edges: EdgeTable::new(params.initial_capacity),
      params,
      type_index: OnceCell::new(),
    }
  }

  pub fn node_count(&self) -> usize {
    self.nodes.count() as usize
  }

  pub fn edge_count(&self) -> usize {
    self.edges.count() as usize
  }

  pub fn node_capacity(&self) -> u32 {
    self.nodes.capacity()
  }

  pub fn edge_capacity(&self) -> u32 {
    self.edges.capacity()
  }

  /// Number of removed edges still occupying slots until the next resize.
  pub fn deleted_edge_count(&self) -> usize {
    self.edges.deletes() as usize
  }

  pub fn add_node(&mut self) -> NodeId {
    let id = self.nodes.count();
    if id >= self.nodes.capacity() {
      let capacity = next_node_capacity(self.nodes.capacity(), &self.params);
      trace!(
        from = self.nodes.capacity(),
        to = capacity,
        "resizing adjacency list nodes"
      );
      self.nodes = self.nodes.resized(capacity);
    }
    self.nodes.set_count(id + 1);
    NodeId::new(id)
  }

  pub fn has_node(&self, node_id: NodeId) -> bool {
    node_id.raw() < self.nodes.count()
  }

  fn assert_has_node(&self, node_id: NodeId) {
    assert!(self.has_node(node_id), "Node {node_id} does not exist");
  }

  /// Adds an edge, returning `false` if the exact `(from, to, type)` edge already exists.
  pub fn add_edge<E: EdgeType>(&mut self, from: NodeId, to: NodeId, edge_type: E) -> bool {
    let edge_type = edge_type.to_raw();
    assert!(edge_type > 0, "Unsupported edge type {edge_type}");
    self.assert_has_node(from);
    self.assert_has_node(to);

    if self.edges.address_of(from, to, edge_type).is_some() {
      return false;
    }

    let count = self.edges.count() + 1;
    let deletes = self.edges.deletes();
    let total = count + deletes;
    if self.edges.load(total) > LOAD_FACTOR {
      let capacity = if self.edges.load(deletes) >= self.params.unload_factor {
        // Mostly tombstones, so size for the live edges and let the resize compact the table.
        next_edge_capacity(self.edges.capacity(), count, &self.params)
      } else {
        next_edge_capacity(self.edges.capacity(), total, &self.params)
      };
      self.resize_edges(capacity);
    }

    link(&mut self.nodes, &mut self.edges, from, to, edge_type);
    if let Some(index) = self.type_index.get_mut() {
      index.insert(from, to, edge_type);
    }
    true
  }

  /// Removes an edge, returning `false` if it did not exist.
  pub fn remove_edge<E: EdgeType>(&mut self, from: NodeId, to: NodeId, edge_type: E) -> bool {
    let edge_type = edge_type.to_raw();
    if !self.has_node(from) || !self.has_node(to) {
      return false;
    }
    let Some(edge) = self.edges.address_of(from, to, edge_type) else {
      return false;
    };

    let prev_out = self.edges.get(edge, PREV_OUT);
    let next_out = self.edges.get(edge, NEXT_OUT);
    if prev_out != NULL {
      self.edges.set(prev_out, NEXT_OUT, next_out);
    } else {
      self.nodes.set(from, FIRST_OUT, next_out);
    }
    if next_out != NULL {
      self.edges.set(next_out, PREV_OUT, prev_out);
    } else {
      self.nodes.set(from, LAST_OUT, prev_out);
    }

    let prev_in = self.edges.get(edge, PREV_IN);
    let next_in = self.edges.get(edge, NEXT_IN);
    if prev_in != NULL {
      self.edges.set(prev_in, NEXT_IN, next_in);
    } else {
      self.nodes.set(to, FIRST_IN, next_in);
    }
    if next_in != NULL {
      self.edges.set(next_in, PREV_IN, prev_in);
    } else {
      self.nodes.set(to, LAST_IN, prev_in);
    }

    self.edges.delete(edge);
    if let Some(index) = self.type_index.get_mut() {
      index.remove(from, to, edge_type);
    }
    true
  }

  pub fn has_edge<E: EdgeType>(
    &self,
    from: NodeId,
    to: NodeId,
    query: EdgeTypeQuery<'_, E>,
  ) -> bool {
    if !self.has_node(from) || !self.has_node(to) {
      return false;
    }

    match query {
      EdgeTypeQuery::Type(edge_type) => self
        .edges
        .address_of(from, to, edge_type.to_raw())
        .is_some(),
      EdgeTypeQuery::Types(edge_types) => edge_types
        .iter()
        .any(|t| self.edges.address_of(from, to, t.to_raw()).is_some()),
      EdgeTypeQuery::All => self
        .chain(from, FIRST_OUT, NEXT_OUT)
        .any(|edge| self.edges.to(edge) == to),
    }
  }

  /// Returns the index of the edge slot, mostly useful for debugging resizes.
  pub fn index_of<E: EdgeType>(&self, from: NodeId, to: NodeId, edge_type: E) -> Option<usize> {
    if !self.has_node(from) || !self.has_node(to) {
      return None;
    }
    self
      .edges
      .address_of(from, to, edge_type.to_raw())
      .map(|edge| edge as usize - 1)
  }

  fn chain(&self, node: NodeId, first: usize, link: usize) -> EdgeChain<'_> {
    EdgeChain {
      edges: &self.edges,
      next: self.nodes.get(node, first),
      link,
    }
  }

  fn type_index(&self) -> &TypeIndex {
    self.type_index.get_or_init(|| TypeIndex::build(self))
  }

  /// Targets of `from`'s outgoing edges, in insertion order and without duplicates.
  pub fn get_nodes_connected_from<E: EdgeType>(
    &self,
    from: NodeId,
    query: EdgeTypeQuery<'_, E>,
  ) -> Vec<NodeId> {
    self.assert_has_node(from);

    if let EdgeTypeQuery::Type(edge_type) = query {
      return self
        .type_index()
        .outgoing
        .get(&(from, edge_type.to_raw()))
        .cloned()
        .unwrap_or_default();
    }

    let mut seen = HashSet::new();
    self
      .chain(from, FIRST_OUT, NEXT_OUT)
      .filter(|edge| query.matches(self.edges.get(*edge, TYPE)))
      .map(|edge| self.edges.to(edge))
      .filter(|node| seen.insert(*node))
      .collect()
  }

  /// Sources of `to`'s incoming edges, in insertion order and without duplicates.
  pub fn get_nodes_connected_to<E: EdgeType>(
    &self,
    to: NodeId,
    query: EdgeTypeQuery<'_, E>,
  ) -> Vec<NodeId> {
    self.assert_has_node(to);

    if let EdgeTypeQuery::Type(edge_type) = query {
      return self
        .type_index()
        .incoming
        .get(&(to, edge_type.to_raw()))
        .cloned()
        .unwrap_or_default();
    }

    let mut seen = HashSet::new();
    self
      .chain(to, FIRST_IN, NEXT_IN)
      .filter(|edge| query.matches(self.edges.get(*edge, TYPE)))
      .map(|edge| self.edges.from(edge))
      .filter(|node| seen.insert(*node))
      .collect()
  }

  pub fn get_inbound_edges(&self, to: NodeId) -> Vec<Edge<u32>> {
    self.assert_has_node(to);
    self
      .chain(to, FIRST_IN, NEXT_IN)
      .map(|edge| self.edge_at(edge))
      .collect()
  }

  pub fn get_outbound_edges(&self, from: NodeId) -> Vec<Edge<u32>> {
    self.assert_has_node(from);
    self
      .chain(from, FIRST_OUT, NEXT_OUT)
      .map(|edge| self.edge_at(edge))
      .collect()
  }

  /// Every live edge in insertion order.
  pub fn get_all_edges(&self) -> impl Iterator<Item = Edge<u32>> + '_ {
    self.edges.addresses().map(|edge| self.edge_at(edge))
  }

  fn edge_at(&self, edge: u32) -> Edge<u32> {
    Edge {
      from: self.edges.from(edge),
      to: self.edges.to(edge),
      edge_type: self.edges.get(edge, TYPE),
    }
  }

  fn resize_edges(&mut self, capacity: u32) {
    trace!(
      from = self.edges.capacity(),
      to = capacity,
      live = self.edges.count(),
      deleted = self.edges.deletes(),
      "resizing adjacency list edges"
    );
    assert!(
      capacity > self.edges.count(),
      "Edge capacity {capacity} cannot hold {} edges",
      self.edges.count()
    );

    let mut nodes = NodeTable::new(self.nodes.capacity());
    nodes.set_count(self.nodes.count());
    let mut edges = EdgeTable::new(capacity);

    for edge in self.edges.addresses() {
      link(
        &mut nodes,
        &mut edges,
        self.edges.from(edge),
        self.edges.to(edge),
        self.edges.get(edge, TYPE),
      );
    }

    self.nodes = nodes;
    self.edges = edges;
    self.type_index = OnceCell::new();
  }

  pub fn serialize(&self) -> SerializedAdjacencyList {
    SerializedAdjacencyList {
      nodes: Arc::clone(&self.nodes.data),
      edges: Arc::clone(&self.edges.data),
      params: self.params,
    }
  }

  pub fn deserialize(serialized: SerializedAdjacencyList) -> Self {
    Self {
      nodes: NodeTable {
        data: serialized.nodes,
      },
      edges: EdgeTable {
        data: serialized.edges,
      },
      params: serialized.params,
      type_index: OnceCell::new(),
    }
  }

  /// Encodes both buffers as consecutive little endian `u32` words.
  pub fn to_bytes(&self) -> Vec<u8> {
    self
      .nodes
      .data
      .iter()
      .chain(self.edges.data.iter())
      .flat_map(|word| word.to_le_bytes())
      .collect()
  }

  /// Hydrates a byte snapshot with the default resize params.
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
    Self::from_bytes_with_params(bytes, AdjacencyListParams::default())
  }

  /// Byte snapshots only hold the tables, so the resize params are supplied by the caller.
  pub fn from_bytes_with_params(
    bytes: &[u8],
    params: AdjacencyListParams,
  ) -> Result<Self, SnapshotError> {
    if bytes.len() % 4 != 0 {
      return Err(SnapshotError::Misaligned(bytes.len()));
    }

    let words: Vec<u32> = bytes
      .chunks_exact(4)
      .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
      .collect();

    if words.len() < NODE_HEADER_SIZE {
      return Err(SnapshotError::Truncated {
        expected: NODE_HEADER_SIZE,
        found: words.len(),
      });
    }

    let node_capacity = words[NODE_CAPACITY];
    let node_count = words[NODE_COUNT];
    if node_capacity > MAX_NODE_CAPACITY || node_count > node_capacity {
      return Err(SnapshotError::InvalidHeader {
        table: "node",
        reason: format!("count {node_count} with capacity {node_capacity}"),
      });
    }

    let node_len = NODE_HEADER_SIZE + node_capacity as usize * NODE_SIZE;
    if words.len() < node_len + EDGE_HEADER_SIZE {
      return Err(SnapshotError::Truncated {
        expected: node_len + EDGE_HEADER_SIZE,
        found: words.len(),
      });
    }

    let edge_capacity = words[node_len + EDGE_CAPACITY];
    let edge_count = words[node_len + EDGE_COUNT];
    let edge_deletes = words[node_len + EDGE_DELETES];
    if edge_capacity == 0
      || edge_capacity > MAX_EDGE_CAPACITY
      || edge_count as u64 + edge_deletes as u64 > edge_capacity as u64
    {
      return Err(SnapshotError::InvalidHeader {
        table: "edge",
        reason: format!(
          "count {edge_count} and {edge_deletes} deletes with capacity {edge_capacity}"
        ),
      });
    }

    let edge_len = EDGE_HEADER_SIZE + edge_capacity as usize * (EDGE_SIZE + 1);
    let expected = node_len + edge_len;
    if words.len() < expected {
      return Err(SnapshotError::Truncated {
        expected,
        found: words.len(),
      });
    }
    if words.len() > expected {
      return Err(SnapshotError::TrailingData(words.len() - expected));
    }

    let mut nodes = words;
    let edges = nodes.split_off(node_len);
    check_pointers(&nodes, &edges)?;

    Ok(Self::deserialize(SerializedAdjacencyList {
      nodes: Arc::new(nodes),
      edges: Arc::new(edges),
      params,
    }))
  }
}
