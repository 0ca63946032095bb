use serialport::SerialPortType;

use crate::serial::{Result, SerialDeviceInfo, SerialError};

/// Source of the serial devices present on the host.
pub trait DeviceFinder: Send + Sync {
    fn find_devices(&self) -> Result<Vec<SerialDeviceInfo>>;

    /// Human readable names, ordered by device path
    fn device_names(&self) -> Result<Vec<String>> {
        Ok(sorted(self.find_devices()?)
            .iter()
            .map(SerialDeviceInfo::display_name)
            .collect())
    }

    /// Device paths, ordered
    fn device_paths(&self) -> Result<Vec<String>> {
        Ok(sorted(self.find_devices()?)
            .into_iter()
            .map(|d| d.port_name)
            .collect())
    }
}

fn sorted(mut devices: Vec<SerialDeviceInfo>) -> Vec<SerialDeviceInfo> {
    devices.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    devices.dedup_by(|a, b| a.port_name == b.port_name);
    devices
}

/// Enumerates ports through the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDeviceFinder;

impl DeviceFinder for SystemDeviceFinder {
    fn find_devices(&self) -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()
            .map_err(|e| SerialError::Enumeration(e.to_string()))?;

        let devices: Vec<SerialDeviceInfo> = ports
            .into_iter()
            .map(|port| {
                let mut info = SerialDeviceInfo::new(port.port_name, "unknown");
                match port.port_type {
                    SerialPortType::UsbPort(usb_info) => {
                        info.port_type = "usb".to_string();
                        info.vid = Some(usb_info.vid);
                        info.pid = Some(usb_info.pid);
                        info.serial_number = usb_info.serial_number;
                        info.manufacturer = usb_info.manufacturer;
                        info.product = usb_info.product;
                    }
                    SerialPortType::PciPort => info.port_type = "pci".to_string(),
                    SerialPortType::BluetoothPort => info.port_type = "bluetooth".to_string(),
                    SerialPortType::Unknown => {}
                }
                info
            })
            .collect();

        log::debug!("Found {} serial devices", devices.len());
        Ok(devices)
    }
}

/// Fixed device list, for hosts that enumerate devices themselves.
#[derive(Debug, Default, Clone)]
pub struct StaticDeviceFinder {
    devices: Vec<SerialDeviceInfo>,
}

impl StaticDeviceFinder {
    pub fn new(devices: Vec<SerialDeviceInfo>) -> Self {
        Self { devices }
    }
}

impl DeviceFinder for StaticDeviceFinder {
    fn find_devices(&self) -> Result<Vec<SerialDeviceInfo>> {
        Ok(self.devices.clone())
    }
}
