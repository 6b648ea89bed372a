//! Contracts towards the radio driver.
//!
//! The MAC core only decides *what* to send and *when*; the driver collaborator turns the
//! configurations below into register writes and reports completion through the interrupt
//! handoff in [`crate::time::IrqTrigger`].
pub use lora_modulation::{BaseBandModulationParams, Rps};

use crate::time::Duration;

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RfConfig {
    pub frequency: u32,
    pub bb: BaseBandModulationParams,
}

impl RfConfig {
    /// Packed radio parameters of this configuration, CRC enabled as for uplinks.
    pub fn rps(&self) -> Rps {
        Rps::new(self.bb, true).unwrap_or(Rps::ILLEGAL)
    }
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RxMode {
    Continuous,
    /// Single shot receive. Argument `symbols` is the preamble detection timeout.
    Single { symbols: u16 },
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxConfig {
    pub rf: RfConfig,
    pub mode: RxMode,
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxConfig {
    /// Transmit power in dBm (EIRP).
    pub pw: i8,
    pub rf: RfConfig,
}

impl TxConfig {
    /// Converts the EIRP into conducted power for the given antenna and caps it at the
    /// hardware limit.
    pub fn adjust_power(&mut self, max_power: u8, antenna_gain: i8) {
        self.pw = self.pw.saturating_sub(antenna_gain);
        self.pw = core::cmp::min(self.pw, max_power as i8);
    }
}

/// Receive windows following an uplink.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    _1,
    _2,
}

/// Driver side of the radio. Operations start the radio and return immediately; completion is
/// signalled by interrupt.
pub trait Radio {
    type Error;

    fn tx(&mut self, config: TxConfig, buf: &[u8]) -> Result<(), Self::Error>;

    fn rx(&mut self, config: RxConfig) -> Result<(), Self::Error>;

    /// Time on air of `len` payload bytes. The default assumes an 8 symbol preamble and an
    /// explicit header, as used by LoRaWAN uplinks.
    fn airtime(&self, rf: &RfConfig, len: u8) -> Duration {
        let us = rf.bb.time_on_air_us(None, true, len);
        Duration::from_us_round(i32::try_from(us).unwrap_or(i32::MAX))
    }
}
