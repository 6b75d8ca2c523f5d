pub mod block_state;
pub mod bootstrap;
pub mod challenge;
pub mod context;
pub mod lifecycle;
pub mod runtime;
pub mod scheduler;
pub mod timer_queue;
pub mod token_mapper;
