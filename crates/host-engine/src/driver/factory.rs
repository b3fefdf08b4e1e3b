use printhost_core::DriverConfig;

use super::dummy::DummyDriver;
use super::printer::PrinterDriver;
use super::{Driver, DriverCallbacks};

/// Builds the concrete driver for a configuration's tag.
pub fn build_driver(config: DriverConfig, callbacks: DriverCallbacks) -> Driver {
    match config {
        DriverConfig::Serial { .. } | DriverConfig::Tcp { .. } => {
            Driver::Printer(PrinterDriver::new(config, callbacks))
        }
        DriverConfig::Dummy { command_delay_ms } => {
            Driver::Dummy(DummyDriver::new(command_delay_ms, callbacks))
        }
    }
}
