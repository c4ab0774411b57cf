pub mod bypass;
pub mod clock;
pub mod delay_queue;
pub mod event_log;
pub mod ferry;
pub mod gui;
pub mod link_queue;
pub mod meter;
pub mod packet;
pub mod queue;
pub mod schedule;

// Re-export the engine surface used by the binaries and integration tests.
pub use bypass::{BypassFilter, Verdict};
pub use delay_queue::DelayQueue;
pub use ferry::{Ferry, Shaper};
pub use link_queue::LinkQueue;
pub use packet::{FrameSink, QueuedPacket, PACKET_SIZE, WAIT_FOREVER};
pub use schedule::Schedule;
