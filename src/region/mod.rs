//! LoRaWAN regional MAC policy (EU868, US915).
//!
//! A [`Configuration`] owns the channel plan and link state of exactly one region and exposes
//! the common policy contract: channel setup and masking, transmit channel/time selection,
//! receive window parameters, the join back-off sequence and table lookups. Callers never branch
//! on the active region themselves.
use lora_modulation::{Bandwidth, BaseBandModulationParams, Rps, SpreadingFactor};
use rand_core::RngCore;

use crate::radio::{RfConfig, TxConfig, Window};
use crate::time::{Duration, Time};

pub(crate) mod constants;
use constants::*;
pub use constants::MAX_BANDS;

#[cfg(not(any(feature = "region-eu868", feature = "region-us915")))]
compile_error!("You must enable at least one region! eg: `region-eu868`, `region-us915`...");

#[cfg(feature = "region-eu868")]
pub mod eu868;
#[cfg(feature = "region-eu868")]
pub use eu868::EU868;

#[cfg(feature = "region-us915")]
pub mod us915;
#[cfg(feature = "region-us915")]
pub use us915::US915;

/// Version tag written into every [`Snapshot`].
pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
/// Contains the regional channel plan and link state; is the entry point for every regional MAC
/// decision.
pub struct Configuration {
    state: State,
}

seq_macro::seq!(
    N in 0..=15 {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        #[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(u8)]
        /// A restricted data rate type that exposes the number of variants to only what _may_ be
        /// potentially be possible. Note that not all data rates are valid in all regions.
        pub enum DR {
            #(
                _~N = N,
            )*
        }

        impl TryFrom<u8> for DR {
            type Error = Error;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    #(
                        N => Ok(DR::_~N),
                    )*
                    _ => Err(Error::InvalidDatarate),
                }
            }
        }
    }
);

impl DR {
    /// Steps the data rate down by `offset`, stopping at DR0.
    pub fn lower(self, offset: u8) -> DR {
        DR::try_from((self as u8).saturating_sub(offset)).unwrap_or(DR::_0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Regions supported by this crate: EU868, US915.
/// Each region is individually feature-gated (eg: `region-eu868`), however, by default, all
/// regions are enabled.
pub enum Region {
    #[cfg(feature = "region-eu868")]
    EU868,
    #[cfg(feature = "region-us915")]
    US915,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
/// Rejection of a configuration request. The channel plan is left untouched.
pub enum Error {
    InvalidChannel,
    InvalidFrequency,
    InvalidChannelMask,
    InvalidSubband,
    InvalidDatarate,
    InvalidRx1DrOffset,
    InvalidTxPower,
    /// The operation has no meaning in the active region.
    Unsupported,
    SnapshotVersion,
    RegionMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
/// Outcome of a join back-off step.
pub enum JoinStatus {
    Continue,
    /// Every data rate of the cycle was tried. The policy has already reset itself for a
    /// fresh cycle; retrying is up to the caller.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct RxParameters {
    pub frequency: u32,
    pub datarate: DR,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Link parameters mutated by the regional policy during join and normal transmit scheduling.
pub struct LinkState {
    pub(crate) datarate: DR,
    pub(crate) tx_channel: u8,
    pub(crate) tx_cnt: u16,
    pub(crate) adr_tx_pow: i8,
    pub(crate) rx1_dr_offset: u8,
}

impl LinkState {
    pub(crate) const fn new(datarate: DR, adr_tx_pow: i8) -> Self {
        Self { datarate, tx_channel: 0, tx_cnt: 0, adr_tx_pow, rx1_dr_offset: 0 }
    }

    pub fn datarate(&self) -> DR {
        self.datarate
    }

    pub fn tx_channel(&self) -> u8 {
        self.tx_channel
    }

    pub fn join_attempts(&self) -> u16 {
        self.tx_cnt
    }

    pub fn adr_tx_pow(&self) -> i8 {
        self.adr_tx_pow
    }

    pub fn rx1_dr_offset(&self) -> u8 {
        self.rx1_dr_offset
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Clock dependent part of the policy state. Only meaningful while the clock keeps running, so
/// it is optional in a [`Snapshot`].
pub struct TimingState {
    /// Earliest time of the next join transmission.
    pub tx_end: Time,
    /// Duty-cycle recovery instant per band; `None` once a band is available again.
    pub band_avail: [Option<Time>; MAX_BANDS],
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlanSnapshot {
    #[cfg(feature = "region-eu868")]
    EU868(eu868::ChannelPlan),
    #[cfg(feature = "region-us915")]
    US915(us915::ChannelPlan),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Persisted policy state, see [`Configuration::save_state`].
pub struct Snapshot {
    pub version: u8,
    pub link: LinkState,
    pub plan: PlanSnapshot,
    pub timing: Option<TimingState>,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
enum State {
    #[cfg(feature = "region-eu868")]
    EU868(EU868),
    #[cfg(feature = "region-us915")]
    US915(US915),
}

impl State {
    pub fn new(region: Region) -> State {
        match region {
            #[cfg(feature = "region-eu868")]
            Region::EU868 => State::EU868(EU868::default()),
            #[cfg(feature = "region-us915")]
            Region::US915 => State::US915(US915::default()),
        }
    }

    pub fn region(&self) -> Region {
        match self {
            #[cfg(feature = "region-eu868")]
            Self::EU868(_) => Region::EU868,
            #[cfg(feature = "region-us915")]
            Self::US915(_) => Region::US915,
        }
    }
}

/// This datarate type is used internally for defining bandwidth/sf per region
#[derive(Debug, Clone)]
pub(crate) struct Datarate {
    bandwidth: Bandwidth,
    spreading_factor: SpreadingFactor,
    max_mac_payload_size: u8,
}

impl Datarate {
    fn modulation(&self) -> BaseBandModulationParams {
        BaseBandModulationParams::new(self.spreading_factor, self.bandwidth, DEFAULT_CODING_RATE)
    }
}

macro_rules! mut_region_dispatch {
  ($s:expr, $t:tt) => {
      match &mut $s.state {
        #[cfg(feature = "region-eu868")]
        State::EU868(state) => state.$t(),
        #[cfg(feature = "region-us915")]
        State::US915(state) => state.$t(),
    }
  };
  ($s:expr, $t:tt, $($arg:tt)*) => {
      match &mut $s.state {
        #[cfg(feature = "region-eu868")]
        State::EU868(state) => state.$t($($arg)*),
        #[cfg(feature = "region-us915")]
        State::US915(state) => state.$t($($arg)*),
    }
  };
}

macro_rules! region_dispatch {
  ($s:expr, $t:tt) => {
      match &$s.state {
        #[cfg(feature = "region-eu868")]
        State::EU868(state) => state.$t(),
        #[cfg(feature = "region-us915")]
        State::US915(state) => state.$t(),
    }
  };
  ($s:expr, $t:tt, $($arg:tt)*) => {
      match &$s.state {
        #[cfg(feature = "region-eu868")]
        State::EU868(state) => state.$t($($arg)*),
        #[cfg(feature = "region-us915")]
        State::US915(state) => state.$t($($arg)*),
    }
  };
}

macro_rules! region_static_dispatch {
  ($s:expr, $t:tt) => {
      match &$s.state {
        #[cfg(feature = "region-eu868")]
        State::EU868(_) => EU868::$t(),
        #[cfg(feature = "region-us915")]
        State::US915(_) => US915::$t(),
    }
  };
  ($s:expr, $t:tt, $($arg:tt)*) => {
      match &$s.state {
        #[cfg(feature = "region-eu868")]
        State::EU868(_) => EU868::$t($($arg)*),
        #[cfg(feature = "region-us915")]
        State::US915(_) => US915::$t($($arg)*),
    }
  };
}

impl Configuration {
    pub fn new(region: Region) -> Configuration {
        Configuration::with_state(State::new(region))
    }

    fn with_state(state: State) -> Configuration {
        Configuration { state }
    }

    pub fn region(&self) -> Region {
        self.state.region()
    }

    /// Restores the mandatory default channels of the region, e.g. after a MAC reset.
    pub fn init_default_channels(&mut self) {
        mut_region_dispatch!(self, init_default_channels)
    }

    /// Adds or reprograms channel `index`. A `drmap` of zero selects the region's default
    /// uplink data rates.
    pub fn setup_channel(&mut self, index: u8, frequency: u32, drmap: u16) -> Result<(), Error> {
        mut_region_dispatch!(self, setup_channel, index, frequency, drmap)
    }

    pub fn disable_channel(&mut self, index: u8) -> Result<(), Error> {
        mut_region_dispatch!(self, disable_channel, index)
    }

    pub fn enable_channel(&mut self, index: u8) -> Result<(), Error> {
        mut_region_dispatch!(self, enable_channel, index)
    }

    pub fn enable_sub_band(&mut self, band: u8) -> Result<(), Error> {
        mut_region_dispatch!(self, enable_sub_band, band)
    }

    pub fn disable_sub_band(&mut self, band: u8) -> Result<(), Error> {
        mut_region_dispatch!(self, disable_sub_band, band)
    }

    /// Enables exactly the 8 channels of sub-band `band` and disables all others.
    pub fn select_sub_band(&mut self, band: u8) -> Result<(), Error> {
        mut_region_dispatch!(self, select_sub_band, band)
    }

    /// Applies a server issued channel mask (LinkADRReq `ChMaskCntl` + `ChMask`).
    pub fn map_channels(&mut self, control: u8, mask: u16) -> Result<(), Error> {
        mut_region_dispatch!(self, map_channels, control, mask)
    }

    /// Installs the optional channel list of a join-accept.
    pub fn handle_cf_list(&mut self, payload: &[u8]) {
        mut_region_dispatch!(self, handle_cf_list, payload)
    }

    /// Picks the next transmit channel and returns the earliest time it may be used.
    pub fn next_tx<RNG: RngCore>(&mut self, rng: &mut RNG, now: Time) -> Time {
        mut_region_dispatch!(self, next_tx, rng, now)
    }

    /// Records `airtime` spent on the current transmit channel, starting at `now`.
    pub fn update_tx_times(&mut self, airtime: Duration, now: Time) {
        mut_region_dispatch!(self, update_tx_times, airtime, now)
    }

    pub fn rx1_parameter(&self) -> RxParameters {
        region_dispatch!(self, rx1_parameter)
    }

    pub fn default_rx2_parameter(&self) -> RxParameters {
        region_static_dispatch!(self, default_rx2_parameter)
    }

    /// Guard time used when opening RX2 around a slow data rate.
    pub fn rx2_safety_zone(&self) -> Duration {
        region_static_dispatch!(self, rx2_safety_zone)
    }

    /// Delay from the end of the uplink until the given receive window opens.
    pub fn rx_window_delay(&self, window: Window, join: bool) -> Duration {
        match (window, join) {
            (Window::_1, false) => RECEIVE_DELAY1,
            (Window::_2, false) => RECEIVE_DELAY2,
            (Window::_1, true) => JOIN_ACCEPT_DELAY1,
            (Window::_2, true) => JOIN_ACCEPT_DELAY2,
        }
    }

    /// Resets the join back-off sequence and schedules the first attempt.
    pub fn init_join_loop<RNG: RngCore>(&mut self, rng: &mut RNG, now: Time) {
        mut_region_dispatch!(self, init_join_loop, rng, now)
    }

    /// Advances the join back-off sequence by one attempt.
    pub fn next_join_state<RNG: RngCore>(&mut self, rng: &mut RNG, now: Time) -> JoinStatus {
        mut_region_dispatch!(self, next_join_state, rng, now)
    }

    /// Transmit power in dBm for power index `index`, `None` when out of range.
    pub fn pow2dbm(&self, index: u8) -> Option<i8> {
        region_static_dispatch!(self, pow2dbm, index)
    }

    /// Packed radio parameters for `dr`, `None` if the region does not define it.
    pub fn raw_rps(&self, dr: DR) -> Option<Rps> {
        self.get_datarate(dr).and_then(|d| Rps::new(d.modulation(), true))
    }

    /// Duration of half a symbol at `dr`, `None` if the region does not define it.
    pub fn dr2hsym(&self, dr: DR) -> Option<Duration> {
        let us = self.get_datarate(dr)?.modulation().half_symbol_time_us();
        Some(Duration::from_us_round(i32::try_from(us).ok()?))
    }

    pub fn max_payload_length(&self, dr: DR) -> u8 {
        self.get_datarate(dr).map_or(0, |d| d.max_mac_payload_size)
    }

    fn get_datarate(&self, dr: DR) -> Option<&'static Datarate> {
        let table: &'static [Option<Datarate>; NUM_DATARATES] =
            region_static_dispatch!(self, datarates);
        table[dr as usize].as_ref()
    }

    pub fn link(&self) -> &LinkState {
        region_dispatch!(self, link)
    }

    pub fn datarate(&self) -> DR {
        self.link().datarate
    }

    /// Sets the uplink data rate, rejecting data rates the region cannot transmit with.
    pub fn set_datarate(&mut self, dr: DR) -> Result<(), Error> {
        if !region_static_dispatch!(self, is_uplink_datarate, dr) {
            return Err(Error::InvalidDatarate);
        }
        let link = mut_region_dispatch!(self, link_mut);
        link.datarate = dr;
        Ok(())
    }

    pub fn tx_channel(&self) -> u8 {
        self.link().tx_channel
    }

    pub fn tx_frequency(&self) -> u32 {
        region_dispatch!(self, tx_frequency)
    }

    /// Transmit power (EIRP, dBm) for the current channel.
    pub fn tx_power(&self) -> i8 {
        region_dispatch!(self, tx_power)
    }

    /// Applies an ADR granted power index. US915 transmits at a fixed power per channel width
    /// and answers `Unsupported`.
    pub fn set_tx_power(&mut self, index: u8) -> Result<(), Error> {
        let dbm = self.pow2dbm(index).ok_or(Error::InvalidTxPower)?;
        mut_region_dispatch!(self, set_tx_power, dbm)
    }

    pub fn set_rx1_dr_offset(&mut self, offset: u8) -> Result<(), Error> {
        if offset > region_static_dispatch!(self, max_rx1_dr_offset) {
            return Err(Error::InvalidRx1DrOffset);
        }
        let link = mut_region_dispatch!(self, link_mut);
        link.rx1_dr_offset = offset;
        Ok(())
    }

    /// Earliest time of the next join attempt, as computed by the join back-off.
    pub fn tx_end(&self) -> Time {
        region_dispatch!(self, timing).tx_end
    }

    pub fn join_attempts(&self) -> u16 {
        self.link().tx_cnt
    }

    /// Radio configuration for the next uplink on the selected channel, `None` if the current
    /// data rate has no modulation in this region.
    pub fn create_tx_config(&self) -> Option<TxConfig> {
        let dr = self.get_datarate(self.datarate())?;
        Some(TxConfig {
            pw: self.tx_power(),
            rf: RfConfig { frequency: self.tx_frequency(), bb: dr.modulation() },
        })
    }

    pub fn get_rx_config(&self, window: Window) -> Option<RfConfig> {
        let params = match window {
            Window::_1 => self.rx1_parameter(),
            Window::_2 => self.default_rx2_parameter(),
        };
        let dr = self.get_datarate(params.datarate)?;
        Some(RfConfig { frequency: params.frequency, bb: dr.modulation() })
    }

    /// Captures channel plan and link state. With `include_time` unset the clock dependent
    /// part (duty-cycle recovery, next join time) is left out, for restoring after the clock
    /// was reset.
    pub fn save_state(&self, include_time: bool) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            link: *self.link(),
            plan: region_dispatch!(self, save_plan),
            timing: include_time.then(|| *region_dispatch!(self, timing)),
        }
    }

    /// Restores a snapshot taken by [`Configuration::save_state`]. Snapshots of another version
    /// or region are rejected without touching the current state.
    pub fn load_state(&mut self, snapshot: &Snapshot) -> Result<(), Error> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::SnapshotVersion);
        }
        mut_region_dispatch!(self, load_state, snapshot)
    }
}

macro_rules! from_region {
    ($r:tt) => {
        impl From<$r> for Configuration {
            fn from(region: $r) -> Configuration {
                Configuration::with_state(State::$r(region))
            }
        }
    };
}

#[cfg(feature = "region-eu868")]
from_region!(EU868);
#[cfg(feature = "region-us915")]
from_region!(US915);

pub(crate) trait RegionHandler {
    fn datarates() -> &'static [Option<Datarate>; NUM_DATARATES];
    fn is_uplink_datarate(dr: DR) -> bool;
    fn pow2dbm(index: u8) -> Option<i8>;
    fn max_rx1_dr_offset() -> u8;
    fn rx2_safety_zone() -> Duration;
    fn default_rx2_parameter() -> RxParameters;

    fn link(&self) -> &LinkState;
    fn link_mut(&mut self) -> &mut LinkState;
    fn timing(&self) -> &TimingState;

    fn init_default_channels(&mut self);
    fn setup_channel(&mut self, index: u8, frequency: u32, drmap: u16) -> Result<(), Error>;
    fn disable_channel(&mut self, index: u8) -> Result<(), Error>;
    fn enable_channel(&mut self, _index: u8) -> Result<(), Error> {
        Err(Error::Unsupported)
    }
    fn enable_sub_band(&mut self, _band: u8) -> Result<(), Error> {
        Err(Error::Unsupported)
    }
    fn disable_sub_band(&mut self, _band: u8) -> Result<(), Error> {
        Err(Error::Unsupported)
    }
    fn select_sub_band(&mut self, _band: u8) -> Result<(), Error> {
        Err(Error::Unsupported)
    }
    fn map_channels(&mut self, control: u8, mask: u16) -> Result<(), Error>;
    fn handle_cf_list(&mut self, payload: &[u8]);

    fn next_tx<RNG: RngCore>(&mut self, rng: &mut RNG, now: Time) -> Time;
    fn update_tx_times(&mut self, _airtime: Duration, _now: Time) {}
    fn tx_frequency(&self) -> u32;
    fn set_tx_power(&mut self, dbm: i8) -> Result<(), Error> {
        self.link_mut().adr_tx_pow = dbm;
        Ok(())
    }
    fn tx_power(&self) -> i8 {
        self.link().adr_tx_pow
    }
    fn rx1_parameter(&self) -> RxParameters;

    fn init_join_loop<RNG: RngCore>(&mut self, rng: &mut RNG, now: Time);
    fn next_join_state<RNG: RngCore>(&mut self, rng: &mut RNG, now: Time) -> JoinStatus;

    fn save_plan(&self) -> PlanSnapshot;
    fn load_state(&mut self, snapshot: &Snapshot) -> Result<(), Error>;
}
