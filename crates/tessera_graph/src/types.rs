use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;

use serde::Deserialize;
use serde::Serialize;

/// Identifies a node within a graph.
///
/// Ids are dense and handed out sequentially by the adjacency list. An id stays valid for the
/// lifetime of the graph that issued it, even once the node itself has been removed.
#[derive(
  Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
  pub const fn new(raw: u32) -> Self {
    Self(raw)
  }

  pub fn raw(self) -> u32 {
    self.0
  }

  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl Display for NodeId {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Edge types are stored as positive integers.
///
/// Zero marks a deleted edge slot and must never be produced by `to_raw`.
pub trait EdgeType: Copy + Eq + Debug {
  fn to_raw(self) -> u32;

  fn from_raw(raw: u32) -> Self;
}

impl EdgeType for u32 {
  fn to_raw(self) -> u32 {
    self
  }

  fn from_raw(raw: u32) -> Self {
    raw
  }
}

/// Selects which edges a query considers.
#[derive(Clone, Copy, Debug)]
pub enum EdgeTypeQuery<'a, E> {
  /// Every edge regardless of type.
  All,
  Type(E),
  /// Edges matching any of the listed types.
  Types(&'a [E]),
}

impl<E: EdgeType> EdgeTypeQuery<'_, E> {
  pub fn matches(&self, raw: u32) -> bool {
    match self {
      EdgeTypeQuery::All => true,
      EdgeTypeQuery::Type(edge_type) => edge_type.to_raw() == raw,
      EdgeTypeQuery::Types(edge_types) => edge_types.iter().any(|t| t.to_raw() == raw),
    }
  }
}

/// A single edge as enumerated from a graph.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Edge<E> {
  pub from: NodeId,
  pub to: NodeId,
  pub edge_type: E,
}
