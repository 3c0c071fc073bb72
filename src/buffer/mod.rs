//! Per-process buffering: the buffer manager owns the records of the active
//! generation and the flush scheduler fires its timeout flushes.

pub mod manager;
pub mod scheduler;

pub use manager::{
    Appended, BufferClosed, BufferManager, BufferPhase, FlushQueue, SealedBatch, TimerArm,
};
pub use scheduler::FlushScheduler;
