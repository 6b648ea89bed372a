/// US915 region support (902..928 MHz)
///
/// 64 hardwired 125 kHz uplink channels, 8 hardwired 500 kHz uplink channels and two extra
/// channels configurable by the network. There is no duty cycle; channel diversity comes from
/// hopping across the enabled channels.
///
/// Current status: DR0..DR4 uplink, DR8..DR13 downlink (LR-FHSS DR5/DR6 are unimplemented)
use super::*;

const NUM_125KHZ: u8 = 64;
const NUM_HARDWIRED: u8 = 72;
const MAX_XCHANNELS: usize = 2;
const NUM_SUBBANDS: u8 = 8;

const UPLINK_125KHZ_BASE: u32 = 902_300_000;
const UPLINK_125KHZ_STEP: u32 = 200_000;
const UPLINK_500KHZ_BASE: u32 = 903_000_000;
const UPLINK_500KHZ_STEP: u32 = 1_600_000;
const DOWNLINK_BASE: u32 = 923_300_000;
const DOWNLINK_STEP: u32 = 600_000;

const FREQ_MIN: u32 = 902_000_000;
const FREQ_MAX: u32 = 928_000_000;

const RX2_FREQUENCY: u32 = DOWNLINK_BASE;
const RX2_DATARATE: DR = DR::_8;
const RX2_SAFETY_ZONE: Duration = Duration::from_ms(750);
const MAX_RX1_DR_OFFSET: u8 = 3;

const MAX_EIRP: i8 = 30;
const JOIN_TX_POW: i8 = 20;
const JOIN_DATARATE: DR = DR::_3;
/// DR0..=DR4
const DEFAULT_DRMAP: u16 = 0b1_1111;

/// Channel mask control codes of LinkADRReq.
const CHMASK_BLOCKS: u8 = 5;
const CHMASK_125_ON: u8 = 6;
const CHMASK_125_OFF: u8 = 7;

fn us915_freq_check(f: u32) -> bool {
    (FREQ_MIN..=FREQ_MAX).contains(&f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Network configured channel beyond the hardwired plan.
pub struct XChannel {
    pub frequency: u32,
    pub drmap: u16,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Enable bitmap (one `u16` per group of 16 channels) plus the extra channels.
pub struct ChannelPlan {
    channel_map: [u16; 5],
    xchannels: [Option<XChannel>; MAX_XCHANNELS],
    /// Rotating hopping cursor; zero means "not seeded yet".
    ch_rnd: u8,
}

impl ChannelPlan {
    const fn new() -> Self {
        Self {
            channel_map: [0xFFFF, 0xFFFF, 0xFFFF, 0xFFFF, 0x00FF],
            xchannels: [None; MAX_XCHANNELS],
            ch_rnd: 0,
        }
    }

    fn num_channels() -> u8 {
        NUM_HARDWIRED + MAX_XCHANNELS as u8
    }

    pub fn is_enabled(&self, channel: u8) -> bool {
        channel < Self::num_channels()
            && self.channel_map[channel as usize >> 4] & (1 << (channel & 0xF)) != 0
    }

    fn set(&mut self, channel: u8, enabled: bool) {
        let (group, bit) = (channel as usize >> 4, 1 << (channel & 0xF));
        if enabled {
            self.channel_map[group] |= bit;
        } else {
            self.channel_map[group] &= !bit;
        }
    }

    pub fn xchannel(&self, channel: u8) -> Option<&XChannel> {
        let index = channel.checked_sub(NUM_HARDWIRED)? as usize;
        self.xchannels.get(index)?.as_ref()
    }

    /// First enabled 500 kHz channel, scanning upwards from wideband slot `start` (0..8).
    fn wideband_from(&self, start: u8) -> Option<u8> {
        (0..8)
            .map(|n| (start + n) & 7)
            .find(|n| self.channel_map[4] & (1 << n) != 0)
            .map(|n| NUM_125KHZ + n)
    }

    /// Enabled 125 kHz channel found by scanning from a random starting point.
    fn random_narrowband<RNG: RngCore>(&self, rng: &mut RNG) -> Option<u8> {
        let start = US915::random_channel(rng);
        (0..NUM_125KHZ)
            .map(|n| (start + n) & 0x3F)
            .find(|ch| self.is_enabled(*ch))
    }

    /// Enabled channels, in ascending order.
    pub fn enabled_channels(&self) -> impl Iterator<Item = u8> + '_ {
        (0..Self::num_channels()).filter(|ch| self.is_enabled(*ch))
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
/// State struct for the `US915` region.
///
/// # Example: restricting the device to one sub-band
///
/// ```
/// use lorawan_mac_core::region::{Configuration, US915};
///
/// let mut us915 = US915::new();
/// // Sub-band 2 (channels 8..=15) is commonly used for The Things Network.
/// us915.select_sub_band(1).unwrap();
/// let configuration: Configuration = us915.into();
/// ```
pub struct US915 {
    link: LinkState,
    timing: TimingState,
    plan: ChannelPlan,
}

impl Default for US915 {
    fn default() -> Self {
        Self {
            link: LinkState::new(DR::_0, JOIN_TX_POW),
            timing: TimingState::default(),
            plan: ChannelPlan::new(),
        }
    }
}

impl US915 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self) -> &ChannelPlan {
        &self.plan
    }

    pub fn select_sub_band(&mut self, band: u8) -> Result<(), Error> {
        RegionHandler::select_sub_band(self, band)
    }

    fn sub_band(band: u8) -> Result<core::ops::Range<u8>, Error> {
        if band >= NUM_SUBBANDS {
            return Err(Error::InvalidSubband);
        }
        Ok(band * 8..band * 8 + 8)
    }

    fn random_channel<RNG: RngCore>(rng: &mut RNG) -> u8 {
        (rng.next_u32() as u8) & 0x3F
    }
}

use super::{Bandwidth, Datarate, SpreadingFactor};

pub(crate) const DATARATES: [Option<Datarate>; NUM_DATARATES] = [
    // DR0
    Some(Datarate {
        spreading_factor: SpreadingFactor::_10,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 11,
    }),
    // DR1
    Some(Datarate {
        spreading_factor: SpreadingFactor::_9,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 53,
    }),
    // DR2
    Some(Datarate {
        spreading_factor: SpreadingFactor::_8,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 125,
    }),
    // DR3
    Some(Datarate {
        spreading_factor: SpreadingFactor::_7,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 242,
    }),
    // DR4
    Some(Datarate {
        spreading_factor: SpreadingFactor::_8,
        bandwidth: Bandwidth::_500KHz,
        max_mac_payload_size: 242,
    }),
    // DR5, DR6: LR-FHSS
    None,
    None,
    // DR7: RFU
    None,
    // DR8
    Some(Datarate {
        spreading_factor: SpreadingFactor::_12,
        bandwidth: Bandwidth::_500KHz,
        max_mac_payload_size: 53,
    }),
    // DR9
    Some(Datarate {
        spreading_factor: SpreadingFactor::_11,
        bandwidth: Bandwidth::_500KHz,
        max_mac_payload_size: 129,
    }),
    // DR10
    Some(Datarate {
        spreading_factor: SpreadingFactor::_10,
        bandwidth: Bandwidth::_500KHz,
        max_mac_payload_size: 242,
    }),
    // DR11
    Some(Datarate {
        spreading_factor: SpreadingFactor::_9,
        bandwidth: Bandwidth::_500KHz,
        max_mac_payload_size: 242,
    }),
    // DR12
    Some(Datarate {
        spreading_factor: SpreadingFactor::_8,
        bandwidth: Bandwidth::_500KHz,
        max_mac_payload_size: 242,
    }),
    // DR13
    Some(Datarate {
        spreading_factor: SpreadingFactor::_7,
        bandwidth: Bandwidth::_500KHz,
        max_mac_payload_size: 242,
    }),
    // DR14, DR15: RFU
    None,
    None,
];

impl RegionHandler for US915 {
    fn datarates() -> &'static [Option<Datarate>; NUM_DATARATES] {
        &DATARATES
    }

    fn is_uplink_datarate(dr: DR) -> bool {
        dr <= DR::_4
    }

    fn pow2dbm(index: u8) -> Option<i8> {
        match index {
            0..=14 => Some(MAX_EIRP - 2 * index as i8),
            _ => None,
        }
    }

    fn max_rx1_dr_offset() -> u8 {
        MAX_RX1_DR_OFFSET
    }

    fn rx2_safety_zone() -> Duration {
        RX2_SAFETY_ZONE
    }

    fn default_rx2_parameter() -> RxParameters {
        RxParameters { frequency: RX2_FREQUENCY, datarate: RX2_DATARATE }
    }

    fn link(&self) -> &LinkState {
        &self.link
    }

    fn link_mut(&mut self) -> &mut LinkState {
        &mut self.link
    }

    fn timing(&self) -> &TimingState {
        &self.timing
    }

    fn init_default_channels(&mut self) {
        debug!("init default channels");
        self.plan.channel_map = ChannelPlan::new().channel_map;
    }

    fn setup_channel(&mut self, index: u8, frequency: u32, drmap: u16) -> Result<(), Error> {
        // channels 0..71 are hardwired
        if !(NUM_HARDWIRED..ChannelPlan::num_channels()).contains(&index) {
            return Err(Error::InvalidChannel);
        }
        if !us915_freq_check(frequency) {
            return Err(Error::InvalidFrequency);
        }
        let drmap = if drmap == 0 { DEFAULT_DRMAP } else { drmap };
        let slot = (index - NUM_HARDWIRED) as usize;
        self.plan.xchannels[slot] = Some(XChannel { frequency, drmap });
        self.plan.set(index, true);
        debug!("setup channel {} at {} Hz", index, frequency);
        Ok(())
    }

    fn disable_channel(&mut self, index: u8) -> Result<(), Error> {
        if index >= ChannelPlan::num_channels() {
            return Err(Error::InvalidChannel);
        }
        self.plan.set(index, false);
        Ok(())
    }

    fn enable_channel(&mut self, index: u8) -> Result<(), Error> {
        let defined = index < NUM_HARDWIRED || self.plan.xchannel(index).is_some();
        if !defined {
            return Err(Error::InvalidChannel);
        }
        self.plan.set(index, true);
        Ok(())
    }

    fn enable_sub_band(&mut self, band: u8) -> Result<(), Error> {
        for channel in Self::sub_band(band)? {
            self.plan.set(channel, true);
        }
        Ok(())
    }

    fn disable_sub_band(&mut self, band: u8) -> Result<(), Error> {
        for channel in Self::sub_band(band)? {
            self.plan.set(channel, false);
        }
        Ok(())
    }

    fn select_sub_band(&mut self, band: u8) -> Result<(), Error> {
        Self::sub_band(band)?;
        for b in 0..NUM_SUBBANDS {
            if b == band {
                self.enable_sub_band(b)?;
            } else {
                self.disable_sub_band(b)?;
            }
        }
        // 500 kHz and extra channels are switched off too
        self.plan.channel_map[4] = 0;
        debug!("selected sub-band {}", band);
        Ok(())
    }

    fn map_channels(&mut self, control: u8, mask: u16) -> Result<(), Error> {
        match control {
            0..=4 => self.plan.channel_map[control as usize] = mask,
            CHMASK_BLOCKS => {
                // bit n: 125 kHz channels 8n..8n+7 and 500 kHz channel 64+n
                for n in 0..NUM_SUBBANDS {
                    let on = mask & (1 << n) != 0;
                    for channel in n * 8..n * 8 + 8 {
                        self.plan.set(channel, on);
                    }
                    self.plan.set(NUM_125KHZ + n, on);
                }
            }
            CHMASK_125_ON | CHMASK_125_OFF => {
                let en125 = if control == CHMASK_125_ON { 0xFFFF } else { 0x0000 };
                self.plan.channel_map[..4].fill(en125);
                self.plan.channel_map[4] = mask;
            }
            _ => return Err(Error::InvalidChannelMask),
        }
        Ok(())
    }

    fn handle_cf_list(&mut self, _payload: &[u8]) {
        trace!("ignoring cflist");
    }

    fn next_tx<RNG: RngCore>(&mut self, rng: &mut RNG, now: Time) -> Time {
        if self.plan.ch_rnd == 0 {
            self.plan.ch_rnd = Self::random_channel(rng);
        }
        if self.link.datarate >= DR::_4 {
            // 500 kHz
            let map = self.plan.channel_map[4] & 0xFF;
            for _ in 0..8 {
                self.plan.ch_rnd = self.plan.ch_rnd.wrapping_add(1);
                let n = self.plan.ch_rnd & 7;
                if map & (1 << n) != 0 {
                    self.link.tx_channel = NUM_125KHZ + n;
                    return now;
                }
            }
        } else {
            for _ in 0..NUM_125KHZ {
                self.plan.ch_rnd = self.plan.ch_rnd.wrapping_add(1);
                let channel = self.plan.ch_rnd & 0x3F;
                if self.plan.is_enabled(channel) {
                    self.link.tx_channel = channel;
                    return now;
                }
            }
        }
        warn!(
            "no channel enabled at {}, staying on {}",
            self.link.datarate,
            self.link.tx_channel
        );
        now
    }

    fn tx_frequency(&self) -> u32 {
        let channel = self.link.tx_channel;
        if channel < NUM_125KHZ {
            UPLINK_125KHZ_BASE + channel as u32 * UPLINK_125KHZ_STEP
        } else if channel < NUM_HARDWIRED {
            UPLINK_500KHZ_BASE + (channel - NUM_125KHZ) as u32 * UPLINK_500KHZ_STEP
        } else {
            self.plan.xchannel(channel).map_or(0, |x| x.frequency)
        }
    }

    fn set_tx_power(&mut self, _dbm: i8) -> Result<(), Error> {
        // transmit power is fixed per channel width
        Err(Error::Unsupported)
    }

    fn tx_power(&self) -> i8 {
        if self.link.tx_channel < NUM_125KHZ {
            30
        } else {
            26
        }
    }

    fn rx1_parameter(&self) -> RxParameters {
        let datarate = match self.link.datarate as u8 {
            // DR0..DR3 -> DR10..DR13, DR4 -> DR13, lowered by the offset down to DR8
            dr @ 0..=4 => {
                let base = 10 + dr - self.link.rx1_dr_offset;
                DR::try_from(base.clamp(8, 13)).unwrap_or(DR::_8)
            }
            _ => self.link.datarate,
        };
        RxParameters {
            frequency: DOWNLINK_BASE + (self.link.tx_channel & 7) as u32 * DOWNLINK_STEP,
            datarate,
        }
    }

    fn init_join_loop<RNG: RngCore>(&mut self, rng: &mut RNG, now: Time) {
        self.plan.ch_rnd = 0;
        self.link.tx_cnt = 0;
        self.link.adr_tx_pow = JOIN_TX_POW;
        self.link.datarate = JOIN_DATARATE;
        match self.plan.random_narrowband(rng) {
            Some(channel) => self.link.tx_channel = channel,
            None => match self.plan.wideband_from(0) {
                // only 500 kHz channels are left
                Some(channel) => {
                    self.link.tx_channel = channel;
                    self.link.datarate = DR::_4;
                }
                None => warn!("no join channel enabled, staying on {}", self.link.tx_channel),
            },
        }
        self.timing.tx_end = now + Duration::rnd_delay(rng, JOIN_BACKOFF_SPAN);
        info!("join loop starts, first attempt at {}", self.timing.tx_end.ticks());
    }

    fn next_join_state<RNG: RngCore>(&mut self, rng: &mut RNG, now: Time) -> JoinStatus {
        // Alternate between a 500 kHz channel at DR4 and a random 125 kHz channel, stepping
        // the 125 kHz data rate DR3 -> DR0 once per pair of attempts. Only enabled channels
        // are used; a wideband slot without any enabled 500 kHz channel is skipped.
        let mut status = JoinStatus::Continue;
        self.link.tx_cnt = self.link.tx_cnt.wrapping_add(1);
        let wideband_turn = self.link.datarate != DR::_4;
        let wideband = self.plan.wideband_from(self.link.tx_channel & 7);

        match wideband.filter(|_| wideband_turn) {
            Some(channel) => {
                self.link.tx_channel = channel;
                self.link.datarate = DR::_4;
            }
            None => {
                if wideband_turn {
                    self.link.tx_cnt = self.link.tx_cnt.wrapping_add(1);
                }
                let step = (self.link.tx_cnt / 2) % 4;
                match self.plan.random_narrowband(rng) {
                    Some(channel) => {
                        self.link.tx_channel = channel;
                        if step == 0 {
                            status = JoinStatus::Failed;
                            self.link.datarate = JOIN_DATARATE;
                        } else {
                            self.link.datarate = JOIN_DATARATE.lower(step as u8);
                        }
                    }
                    None => {
                        // nothing but 500 kHz channels: hop over those
                        if self.link.tx_cnt % 8 == 0 {
                            status = JoinStatus::Failed;
                        }
                        match self.plan.wideband_from(self.link.tx_channel.wrapping_add(1) & 7) {
                            Some(channel) => {
                                self.link.tx_channel = channel;
                                self.link.datarate = DR::_4;
                            }
                            None => warn!(
                                "no join channel enabled, staying on {}",
                                self.link.tx_channel
                            ),
                        }
                    }
                }
            }
        }
        self.timing.tx_end = now;
        match status {
            JoinStatus::Failed => info!("join failed on all data rates"),
            JoinStatus::Continue => debug!(
                "next join attempt on channel {} with {}",
                self.link.tx_channel,
                self.link.datarate
            ),
        }
        status
    }

    fn save_plan(&self) -> PlanSnapshot {
        PlanSnapshot::US915(self.plan.clone())
    }

    fn load_state(&mut self, snapshot: &Snapshot) -> Result<(), Error> {
        #[allow(unreachable_patterns)]
        let plan = match &snapshot.plan {
            PlanSnapshot::US915(plan) => plan,
            _ => return Err(Error::RegionMismatch),
        };
        let link = &snapshot.link;
        if link.tx_channel >= ChannelPlan::num_channels() {
            return Err(Error::InvalidChannel);
        }
        if !Self::is_uplink_datarate(link.datarate) {
            return Err(Error::InvalidDatarate);
        }
        if link.rx1_dr_offset > MAX_RX1_DR_OFFSET {
            return Err(Error::InvalidRx1DrOffset);
        }
        self.plan = plan.clone();
        self.link = *link;
        if let Some(timing) = snapshot.timing {
            self.timing = timing;
        }
        Ok(())
    }
}
