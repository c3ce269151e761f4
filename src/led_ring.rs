//! Status output on a ReSpeaker USB LED ring.

use crate::decision::Category;
use crate::status::Status;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedRingError {
    #[cfg(feature = "led_ring")]
    #[error("Failed to initialize USB context: {0}")]
    UsbInit(rusb::Error),
    #[error("ReSpeaker device not found")]
    DeviceNotFound,
    #[cfg(feature = "led_ring")]
    #[error("Failed to open device: {0}")]
    DeviceOpen(rusb::Error),
    #[cfg(feature = "led_ring")]
    #[error("Failed to send command: {0}")]
    CommandFailed(rusb::Error),
    #[error("Invalid brightness value: {0} (must be 0-31)")]
    InvalidBrightness(u8),
    #[error("LED ring support not compiled in")]
    NotSupported,
}

/// LED ring commands used for status output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedCommand {
    /// Set all LEDs to a single color
    Mono { red: u8, green: u8, blue: u8 },
    /// Listen animation
    Listen,
    /// Wait animation
    Wait,
    /// Spin animation
    Spin,
    /// Set brightness (0-31)
    SetBrightness { brightness: u8 },
}

impl LedCommand {
    const fn mono(red: u8, green: u8, blue: u8) -> Self {
        LedCommand::Mono { red, green, blue }
    }

    /// Vendor request value and payload of the control transfer
    pub fn encode(&self) -> Result<(u16, Vec<u8>), LedRingError> {
        Ok(match *self {
            LedCommand::Mono { red, green, blue } => (1, vec![red, green, blue, 0]),
            LedCommand::Listen => (2, vec![0]),
            LedCommand::Wait => (3, vec![0]),
            LedCommand::Spin => (5, vec![0]),
            LedCommand::SetBrightness { brightness } => {
                if brightness > 31 {
                    return Err(LedRingError::InvalidBrightness(brightness));
                }
                (0x20, vec![brightness])
            }
        })
    }
}

const RED: LedCommand = LedCommand::mono(255, 0, 0);

/// Ring pattern for each status
pub fn command_for(status: &Status) -> LedCommand {
    match status {
        Status::Initializing => LedCommand::Spin,
        Status::Connecting => LedCommand::Wait,
        Status::Ready => LedCommand::mono(0, 32, 0),
        Status::Recording => LedCommand::Listen,
        Status::RecordingComplete => LedCommand::mono(0, 0, 255),
        Status::StorageError | Status::MicError | Status::FileError | Status::TriggerError => {
            RED
        }
        Status::InferenceError => LedCommand::mono(255, 0, 255),
        Status::PublishError => LedCommand::mono(255, 128, 0),
        Status::Result(Category::Anomalous) => LedCommand::mono(255, 64, 0),
        Status::Result(Category::Normal) => LedCommand::mono(0, 255, 0),
    }
}

#[cfg(feature = "led_ring")]
mod usb {
    use super::{command_for, LedCommand, LedRingError};
    use crate::status::{Status, StatusDisplay};
    use rusb::UsbContext;
    use std::sync::Mutex;
    use std::time::Duration;

    /// ReSpeaker USB device identifiers
    const RESPEAKER_VID: u16 = 0x2886; // SEEED vendor ID
    const RESPEAKER_4MIC_PID: u16 = 0x0018; // ReSpeaker 4-Mic Array product ID

    const CTRL_OUT: u8 = 0x00;
    const CTRL_TYPE_VENDOR: u8 = 0x40;
    const CTRL_RECIPIENT_DEVICE: u8 = 0x00;
    const USB_REQUEST: u8 = 0;
    const USB_VALUE_INDEX: u16 = 0x1C;
    const USB_TIMEOUT: Duration = Duration::from_millis(1000);

    const DEFAULT_BRIGHTNESS: u8 = 12;

    /// Status display driving the ring with one color or animation per status
    pub struct LedRingDisplay {
        device_handle: Mutex<rusb::DeviceHandle<rusb::Context>>,
        _context: rusb::Context,
    }

    impl LedRingDisplay {
        pub fn open() -> Result<Self, LedRingError> {
            let context = rusb::Context::new().map_err(LedRingError::UsbInit)?;
            let devices = context.devices().map_err(LedRingError::UsbInit)?;

            for device in devices.iter() {
                let device_desc = device.device_descriptor().map_err(LedRingError::UsbInit)?;
                if device_desc.vendor_id() != RESPEAKER_VID
                    || device_desc.product_id() != RESPEAKER_4MIC_PID
                {
                    continue;
                }

                let device_handle = device.open().map_err(LedRingError::DeviceOpen)?;
                // Interface 3 is vendor specific; it may already be claimed by the system
                if let Err(e) = device_handle.claim_interface(3) {
                    log::warn!(
                        "Could not claim interface 3: {}. LED control may still work.",
                        e
                    );
                }

                log::info!("💡 ReSpeaker LED ring opened");
                let display = LedRingDisplay {
                    device_handle: Mutex::new(device_handle),
                    _context: context,
                };
                display.send_command(LedCommand::SetBrightness {
                    brightness: DEFAULT_BRIGHTNESS,
                })?;
                return Ok(display);
            }

            Err(LedRingError::DeviceNotFound)
        }

        pub fn send_command(&self, command: LedCommand) -> Result<(), LedRingError> {
            let (value, data) = command.encode()?;
            let request_type = CTRL_OUT | CTRL_TYPE_VENDOR | CTRL_RECIPIENT_DEVICE;

            let handle = self
                .device_handle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            handle
                .write_control(
                    request_type,
                    USB_REQUEST,
                    value,
                    USB_VALUE_INDEX,
                    &data,
                    USB_TIMEOUT,
                )
                .map_err(LedRingError::CommandFailed)?;

            log::debug!("LED command {:?} sent", command);
            Ok(())
        }
    }

    impl StatusDisplay for LedRingDisplay {
        fn show(&self, status: &Status) {
            if let Err(e) = self.send_command(command_for(status)) {
                log::warn!("⚠️ LED ring did not accept '{}': {}", status, e);
            }
        }
    }

    impl Drop for LedRingDisplay {
        fn drop(&mut self) {
            // Turn off LEDs when dropping the controller
            let _ = self.send_command(LedCommand::mono(0, 0, 0));
        }
    }
}

#[cfg(feature = "led_ring")]
pub use usb::LedRingDisplay;

#[cfg(not(feature = "led_ring"))]
pub struct LedRingDisplay;

#[cfg(not(feature = "led_ring"))]
impl LedRingDisplay {
    pub fn open() -> Result<Self, LedRingError> {
        Err(LedRingError::NotSupported)
    }
}

#[cfg(not(feature = "led_ring"))]
impl crate::status::StatusDisplay for LedRingDisplay {
    fn show(&self, _status: &Status) {}
}
