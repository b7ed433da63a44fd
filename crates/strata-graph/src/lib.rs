mod dag;
mod dot;
mod error;

pub use dag::build_graph;
pub use dot::render_dot;
pub use error::GraphError;
