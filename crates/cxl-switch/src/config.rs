//! Switch configuration, loaded from a JSON file by the launcher.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Usp,
    Dsp,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PortConfig {
    #[serde(rename = "type")]
    pub port_type: PortType,
}

impl PortConfig {
    pub fn usp() -> Self {
        PortConfig {
            port_type: PortType::Usp,
        }
    }

    pub fn dsp() -> Self {
        PortConfig {
            port_type: PortType::Dsp,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualSwitchConfig {
    pub upstream_port_index: u8,
    pub vppb_count: u8,
    /// `initial_bounds[i]` names the physical port vPPB#(i+1) starts bound
    /// to; `None` leaves the slot unbound.
    pub initial_bounds: Vec<Option<u8>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub mctp_host: String,
    #[serde(default = "default_mctp_port")]
    pub mctp_port: u16,
    pub port_configs: Vec<PortConfig>,
    pub virtual_switch_configs: Vec<VirtualSwitchConfig>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_mctp_port() -> u16 {
    8100
}

impl SwitchConfig {
    /// Structural checks that would otherwise surface as routing failures at
    /// runtime.
    pub fn validate(&self) -> Result<(), crate::SwitchError> {
        use crate::SwitchError::InvalidConfig;

        if self.port_configs.is_empty() {
            return Err(InvalidConfig("no ports configured".into()));
        }
        for vcs in &self.virtual_switch_configs {
            let usp = vcs.upstream_port_index;
            match self.port_configs.get(usp as usize) {
                None => {
                    return Err(InvalidConfig(format!(
                        "vcs upstream port {usp} is out of range"
                    )))
                }
                Some(config) if config.port_type != PortType::Usp => {
                    return Err(InvalidConfig(format!(
                        "vcs upstream port {usp} is not a USP"
                    )))
                }
                Some(_) => {}
            }
            if vcs.initial_bounds.len() != vcs.vppb_count as usize {
                return Err(InvalidConfig(format!(
                    "vcs has {} vPPBs but {} initial bounds",
                    vcs.vppb_count,
                    vcs.initial_bounds.len()
                )));
            }
            for bound in vcs.initial_bounds.iter().flatten() {
                match self.port_configs.get(*bound as usize) {
                    None => {
                        return Err(InvalidConfig(format!(
                            "initial bound {bound} is out of range"
                        )))
                    }
                    Some(config) if config.port_type != PortType::Dsp => {
                        return Err(InvalidConfig(format!(
                            "initial bound {bound} is not a DSP"
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}
