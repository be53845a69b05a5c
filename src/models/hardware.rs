//! Hardware sizing

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A volume attached at launch. Size is in GB.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockDevice {
    pub name: String,
    pub size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hardware {
    /// Instance type or service offering, e.g. `m1.large`
    #[serde(rename = "type")]
    pub instance_type: String,
    #[serde(default)]
    pub block_devices: Vec<BlockDevice>,
}

impl Hardware {
    pub fn builder() -> HardwareBuilder {
        HardwareBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.instance_type.trim().is_empty() {
            return Err(Error::validation("hardware type cannot be empty"));
        }
        for device in &self.block_devices {
            if device.name.trim().is_empty() {
                return Err(Error::validation("block device name cannot be empty"));
            }
            if device.size == 0 {
                return Err(Error::validation(format!(
                    "block device {} must have a positive size",
                    device.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct HardwareBuilder {
    hardware: Hardware,
}

impl HardwareBuilder {
    pub fn instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.hardware.instance_type = instance_type.into();
        self
    }

    pub fn block_device(mut self, name: impl Into<String>, size_gb: u32) -> Self {
        self.hardware.block_devices.push(BlockDevice {
            name: name.into(),
            size: size_gb,
        });
        self
    }

    pub fn build(self) -> Result<Hardware> {
        self.hardware.validate()?;
        Ok(self.hardware)
    }
}
