pub mod finder;

pub use finder::{DeviceFinder, StaticDeviceFinder, SystemDeviceFinder};
