pub mod settings;

pub use settings::{
    BandThresholds,
    Config,
    FailurePolicy,
    OutputConfig,
    OutputFormat,
    ParityConfig,
    PollingConfig,
    SensorConfig,
    SerialConfig,
    StopBitsConfig,
};
