// Shared project loading
pub mod project;

// Document commands
pub mod apply;
pub mod graph;
pub mod plan;
pub mod validate;

// State commands
pub mod output;
pub mod state;
