// Bridges between the concrete collaborators and the poller's traits
pub mod backend;
pub mod storage;
