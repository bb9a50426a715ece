pub mod th_sensor;

pub use th_sensor::{
    decode_response, decode_response_at, decode_response_default, Calibration, SensorReading,
    ThSensor,
};
