pub mod adjacency_list;
pub mod content_graph;
pub mod graph;
pub mod types;

pub use adjacency_list::AdjacencyList;
pub use adjacency_list::AdjacencyListParams;
pub use adjacency_list::SerializedAdjacencyList;
pub use adjacency_list::SnapshotError;
pub use content_graph::ContentGraph;
pub use graph::Graph;
pub use graph::GraphVisitor;
pub use graph::TraversalActions;
pub use types::Edge;
pub use types::EdgeType;
pub use types::EdgeTypeQuery;
pub use types::NodeId;
