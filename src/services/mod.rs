pub mod poller;

pub use poller::{PollStats, Poller, PollerHandle, PollerState, ReadingConsumer};
