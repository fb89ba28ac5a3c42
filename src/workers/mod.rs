pub mod connection_reaper;
pub mod feedback;

pub use connection_reaper::ConnectionReaperWorker;
pub use feedback::FeedbackWorker;
