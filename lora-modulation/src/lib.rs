//! LoRa modulation vocabulary shared by MAC layers and radio drivers.
//!
//! Besides the plain [`SpreadingFactor`], [`Bandwidth`] and [`CodingRate`] types, this crate
//! provides the one-byte packed radio parameter encoding ([`Rps`]) understood by radio drivers,
//! and symbol/time-on-air arithmetic used to compute airtime and receive window timing.
#![no_std]

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Channel width.
pub enum Bandwidth {
    _7KHz,
    _10KHz,
    _15KHz,
    _20KHz,
    _31KHz,
    _41KHz,
    _62KHz,
    _125KHz,
    _250KHz,
    _500KHz,
}

impl From<Bandwidth> for u32 {
    fn from(value: Bandwidth) -> Self {
        match value {
            Bandwidth::_7KHz => 7810u32,
            Bandwidth::_10KHz => 10420u32,
            Bandwidth::_15KHz => 15630u32,
            Bandwidth::_20KHz => 20830u32,
            Bandwidth::_31KHz => 31250u32,
            Bandwidth::_41KHz => 41670u32,
            Bandwidth::_62KHz => 62500u32,
            Bandwidth::_125KHz => 125000u32,
            Bandwidth::_250KHz => 250000u32,
            Bandwidth::_500KHz => 500000u32,
        }
    }
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Controls the chirp rate. Lower values are slower bandwidth, but more robust.
pub enum SpreadingFactor {
    _5,
    _6,
    _7,
    _8,
    _9,
    _10,
    _11,
    _12,
}

impl From<SpreadingFactor> for u32 {
    fn from(sf: SpreadingFactor) -> Self {
        match sf {
            SpreadingFactor::_5 => 5,
            SpreadingFactor::_6 => 6,
            SpreadingFactor::_7 => 7,
            SpreadingFactor::_8 => 8,
            SpreadingFactor::_9 => 9,
            SpreadingFactor::_10 => 10,
            SpreadingFactor::_11 => 11,
            SpreadingFactor::_12 => 12,
        }
    }
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Controls the forward error correction. Higher values are more robust, but reduces the ratio
/// of actual data in transmissions.
pub enum CodingRate {
    _4_5,
    _4_6,
    _4_7,
    _4_8,
}

impl CodingRate {
    /// Number of redundancy bits added per four data bits (1 for 4/5 .. 4 for 4/8).
    pub fn redundancy(self) -> u32 {
        match self {
            CodingRate::_4_5 => 1,
            CodingRate::_4_6 => 2,
            CodingRate::_4_7 => 3,
            CodingRate::_4_8 => 4,
        }
    }
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseBandModulationParams {
    pub sf: SpreadingFactor,
    pub bw: Bandwidth,
    pub cr: CodingRate,
}

impl BaseBandModulationParams {
    pub const fn new(sf: SpreadingFactor, bw: Bandwidth, cr: CodingRate) -> Self {
        Self { sf, bw, cr }
    }

    /// Duration of a single symbol in microseconds.
    pub fn symbol_time_us(&self) -> u32 {
        let sf = u32::from(self.sf);
        ((1u64 << sf) * 1_000_000 / u64::from(u32::from(self.bw))) as u32
    }

    /// Duration of half a symbol in microseconds, the unit receive window timing is based on.
    pub fn half_symbol_time_us(&self) -> u32 {
        self.symbol_time_us() / 2
    }

    /// Low data rate optimization is mandated once a symbol lasts 16 ms or longer.
    pub fn low_data_rate_optimize(&self) -> bool {
        self.symbol_time_us() >= 16_000
    }

    /// Time on air in microseconds of a packet carrying `length` payload bytes with CRC enabled.
    ///
    /// `preamble_len` defaults to the LoRaWAN preamble of 8 symbols.
    pub fn time_on_air_us(
        &self,
        preamble_len: Option<u8>,
        explicit_header: bool,
        length: u8,
    ) -> u32 {
        let sf = u32::from(self.sf) as i64;
        let t_sym = self.symbol_time_us() as i64;
        let de = self.low_data_rate_optimize() as i64;
        let ih = (!explicit_header) as i64;
        let crc = 1;
        let cr = self.cr.redundancy() as i64;

        let num = 8 * length as i64 - 4 * sf + 28 + 16 * crc - 20 * ih;
        let den = 4 * (sf - 2 * de);
        let payload_symbols =
            if num > 0 { 8 + ((num + den - 1) / den) * (cr + 4) } else { 8 };

        // n_preamble + 4.25 symbols
        let preamble = preamble_len.unwrap_or(8) as i64;
        let preamble_us = (preamble * 4 + 17) * t_sym / 4;

        (preamble_us + payload_symbols * t_sym) as u32
    }
}

/// Radio parameters packed into a single byte, as consumed by radio drivers.
///
/// Layout: bits 0-2 spreading factor (0 = FSK, 1 = SF7 .. 6 = SF12), bits 3-4 bandwidth
/// (125/250/500 kHz), bits 5-6 coding rate (4/5 .. 4/8), bit 7 set when CRC is disabled.
/// [`Rps::ILLEGAL`] marks a data rate without a valid encoding.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rps(u8);

impl Rps {
    pub const ILLEGAL: Rps = Rps(0xFF);

    /// Packs LoRa modulation parameters. Returns `None` for parameters the packed format cannot
    /// express (SF5/SF6, bandwidths other than 125/250/500 kHz).
    pub fn new(params: BaseBandModulationParams, crc: bool) -> Option<Rps> {
        let sf = match params.sf {
            SpreadingFactor::_7 => 1,
            SpreadingFactor::_8 => 2,
            SpreadingFactor::_9 => 3,
            SpreadingFactor::_10 => 4,
            SpreadingFactor::_11 => 5,
            SpreadingFactor::_12 => 6,
            SpreadingFactor::_5 | SpreadingFactor::_6 => return None,
        };
        let bw = match params.bw {
            Bandwidth::_125KHz => 0,
            Bandwidth::_250KHz => 1,
            Bandwidth::_500KHz => 2,
            _ => return None,
        };
        let cr = (params.cr.redundancy() - 1) as u8;
        let no_crc = if crc { 0 } else { 1 };
        Some(Rps(sf | (bw << 3) | (cr << 5) | (no_crc << 7)))
    }

    pub fn from_raw(raw: u8) -> Rps {
        Rps(raw)
    }

    pub fn raw_value(self) -> u8 {
        self.0
    }

    pub fn is_illegal(self) -> bool {
        self == Self::ILLEGAL
    }

    pub fn crc(self) -> bool {
        self.0 & 0x80 == 0
    }

    /// Unpacks the LoRa modulation parameters. FSK and malformed encodings yield `None`.
    pub fn params(self) -> Option<BaseBandModulationParams> {
        if self.is_illegal() {
            return None;
        }
        let sf = match self.0 & 0x07 {
            1 => SpreadingFactor::_7,
            2 => SpreadingFactor::_8,
            3 => SpreadingFactor::_9,
            4 => SpreadingFactor::_10,
            5 => SpreadingFactor::_11,
            6 => SpreadingFactor::_12,
            _ => return None,
        };
        let bw = match (self.0 >> 3) & 0x03 {
            0 => Bandwidth::_125KHz,
            1 => Bandwidth::_250KHz,
            2 => Bandwidth::_500KHz,
            _ => return None,
        };
        let cr = match (self.0 >> 5) & 0x03 {
            0 => CodingRate::_4_5,
            1 => CodingRate::_4_6,
            2 => CodingRate::_4_7,
            _ => CodingRate::_4_8,
        };
        Some(BaseBandModulationParams::new(sf, bw, cr))
    }
}
