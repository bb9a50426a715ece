pub mod consumer;
pub mod formatters;
pub mod senders;

pub use consumer::OutputConsumer;
pub use formatters::{Band, Bands, ConsoleFormatter, CsvFormatter, DataFormatter, JsonFormatter};
pub use senders::{ConsoleSender, DataSender, FileSender};
