pub use self::bundle_graph::*;
pub use self::native_bundle_graph::NativeBundleGraph;
pub use self::native_bundle_graph::NativeBundleGraphEdgeType;
pub use self::native_bundle_graph::NativeBundleGraphNode;
pub use self::native_bundle_graph::NodeId;

mod bundle_graph;
mod native_bundle_graph;
