/// EU868 region support (863..870 MHz)
///
/// Up to 16 channels, each assigned to one of three duty-cycle bands by frequency. Airtime
/// spent on a channel blocks every channel of the same band until the band has recovered.
///
/// Current status: DR0..DR6 (LoRa data rates; FSK DR7 is not supported)
use super::*;

const MAX_CHANNELS: usize = 16;
const NUM_JOIN_CHANNELS: u8 = 3;
const MAX_EIRP: i8 = 16;

const FREQ_MIN: u32 = 863_000_000;
const FREQ_MAX: u32 = 870_000_000;
const DEFAULT_CHANNELS: [u32; NUM_JOIN_CHANNELS as usize] =
    [868_100_000, 868_300_000, 868_500_000];

const RX2_FREQUENCY: u32 = 869_525_000;
const RX2_DATARATE: DR = DR::_0;
const RX2_SAFETY_ZONE: Duration = Duration::from_ms(3000);
const MAX_RX1_DR_OFFSET: u8 = 5;

const JOIN_DATARATE: DR = DR::_5;
/// Longest off-time a band can owe: 0.1 % duty cycle after the longest DR0 frame.
const MAX_BAND_DEBT: Duration = Duration::from_sec(3600);
/// DR0..=DR5
const DEFAULT_DRMAP: u16 = 0b11_1111;

fn eu868_freq_check(f: u32) -> bool {
    (FREQ_MIN..=FREQ_MAX).contains(&f)
}

/// Duty-cycle band of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Band {
    /// 0.1 %
    Milli,
    /// 1 %
    Centi,
    /// 10 %
    Deci,
}

impl Band {
    pub fn of(frequency: u32) -> Band {
        match frequency {
            869_400_000..=869_650_000 => Band::Deci,
            868_000_000..=868_600_000 | 869_700_000..=870_000_000 => Band::Centi,
            _ => Band::Milli,
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Ratio of off-time to on-time: a transmission of airtime `A` blocks the band for
    /// `A * txcap`.
    fn txcap(self) -> i32 {
        match self {
            Band::Milli => 1000,
            Band::Centi => 100,
            Band::Deci => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Channel {
    pub frequency: u32,
    /// Bit `n` set when DR`n` may be used on this channel.
    pub drmap: u16,
}

impl Channel {
    pub fn band(&self) -> Band {
        Band::of(self.frequency)
    }

    fn supports(&self, dr: DR) -> bool {
        self.drmap & (1 << dr as u8) != 0
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Defined channels and their enable bitmap.
pub struct ChannelPlan {
    channels: [Option<Channel>; MAX_CHANNELS],
    channel_map: u16,
}

impl ChannelPlan {
    const fn empty() -> Self {
        Self { channels: [None; MAX_CHANNELS], channel_map: 0 }
    }

    pub fn channel(&self, index: u8) -> Option<&Channel> {
        self.channels.get(index as usize)?.as_ref()
    }

    pub fn is_enabled(&self, index: u8) -> bool {
        (index as usize) < MAX_CHANNELS && self.channel_map & (1 << index) != 0
    }

    fn is_enabled_at(&self, index: u8, dr: DR) -> bool {
        self.is_enabled(index) && self.channel(index).is_some_and(|c| c.supports(dr))
    }

    fn defined_mask(&self) -> u16 {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
/// State struct for the `EU868` region.
pub struct EU868 {
    link: LinkState,
    timing: TimingState,
    plan: ChannelPlan,
}

impl Default for EU868 {
    fn default() -> Self {
        let mut region = Self {
            link: LinkState::new(DR::_0, MAX_EIRP),
            timing: TimingState::default(),
            plan: ChannelPlan::empty(),
        };
        region.init_default_channels();
        region
    }
}

impl EU868 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self) -> &ChannelPlan {
        &self.plan
    }

    /// Recovery instant of the band channel `index` belongs to.
    fn availability(&self, index: u8) -> Option<Time> {
        let band = self.plan.channel(index)?.band();
        self.timing.band_avail[band.index()]
    }

    /// Forgets recovery instants that have passed. An instant further ahead than any band can
    /// owe was left behind by a counter wrap during a long idle period and is dropped as well.
    fn refresh_bands(&mut self, now: Time) {
        for avail in self.timing.band_avail.iter_mut() {
            if avail.is_some_and(|t| t.is_reached(now) || t - now > MAX_BAND_DEBT) {
                *avail = None;
            }
        }
    }

    /// First channel usable for a join at `dr`, rotating over the default channels from
    /// `start` before falling back to the channels added later.
    fn join_channel_from(&self, start: u8, dr: DR) -> Option<u8> {
        (0..NUM_JOIN_CHANNELS)
            .map(|n| (start % NUM_JOIN_CHANNELS + n) % NUM_JOIN_CHANNELS)
            .chain(NUM_JOIN_CHANNELS..MAX_CHANNELS as u8)
            .find(|ch| self.plan.is_enabled_at(*ch, dr))
    }

    fn select_join_channel(&mut self, start: u8) {
        match self.join_channel_from(start, self.link.datarate) {
            Some(channel) => self.link.tx_channel = channel,
            None => error!(
                "no join channel enabled at {}, staying on {}",
                self.link.datarate,
                self.link.tx_channel
            ),
        }
    }
}

use super::{Bandwidth, Datarate, SpreadingFactor};

pub(crate) const DATARATES: [Option<Datarate>; NUM_DATARATES] = [
    // DR0
    Some(Datarate {
        spreading_factor: SpreadingFactor::_12,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 59,
    }),
    // DR1
    Some(Datarate {
        spreading_factor: SpreadingFactor::_11,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 59,
    }),
    // DR2
    Some(Datarate {
        spreading_factor: SpreadingFactor::_10,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 59,
    }),
    // DR3
    Some(Datarate {
        spreading_factor: SpreadingFactor::_9,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 123,
    }),
    // DR4
    Some(Datarate {
        spreading_factor: SpreadingFactor::_8,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 250,
    }),
    // DR5
    Some(Datarate {
        spreading_factor: SpreadingFactor::_7,
        bandwidth: Bandwidth::_125KHz,
        max_mac_payload_size: 250,
    }),
    // DR6
    Some(Datarate {
        spreading_factor: SpreadingFactor::_7,
        bandwidth: Bandwidth::_250KHz,
        max_mac_payload_size: 250,
    }),
    // DR7: FSK
    None,
    // DR8..DR15: LR-FHSS / RFU
    None,
    None,
    None,
    None,
    None,
    None,
    None,
    None,
];

impl RegionHandler for EU868 {
    fn datarates() -> &'static [Option<Datarate>; NUM_DATARATES] {
        &DATARATES
    }

    fn is_uplink_datarate(dr: DR) -> bool {
        DATARATES[dr as usize].is_some()
    }

    fn pow2dbm(index: u8) -> Option<i8> {
        match index {
            0..=7 => Some(MAX_EIRP - 2 * index as i8),
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
        self.plan = ChannelPlan::empty();
        for (index, frequency) in DEFAULT_CHANNELS.iter().enumerate() {
            self.plan.channels[index] =
                Some(Channel { frequency: *frequency, drmap: DEFAULT_DRMAP });
            self.plan.channel_map |= 1 << index;
        }
    }

    fn setup_channel(&mut self, index: u8, frequency: u32, drmap: u16) -> Result<(), Error> {
        if index as usize >= MAX_CHANNELS {
            return Err(Error::InvalidChannel);
        }
        if !eu868_freq_check(frequency) {
            return Err(Error::InvalidFrequency);
        }
        let drmap = if drmap == 0 { DEFAULT_DRMAP } else { drmap };
        self.plan.channels[index as usize] = Some(Channel { frequency, drmap });
        self.plan.channel_map |= 1 << index;
        debug!("setup channel {} at {} Hz", index, frequency);
        Ok(())
    }

    fn disable_channel(&mut self, index: u8) -> Result<(), Error> {
        if index as usize >= MAX_CHANNELS {
            return Err(Error::InvalidChannel);
        }
        self.plan.channel_map &= !(1 << index);
        Ok(())
    }

    fn map_channels(&mut self, control: u8, mask: u16) -> Result<(), Error> {
        let defined = self.plan.defined_mask();
        match control {
            0 => {
                // refuse to disable everything, or to enable channels that were never defined
                if mask == 0 || mask & !defined != 0 {
                    return Err(Error::InvalidChannelMask);
                }
                self.plan.channel_map = mask;
            }
            // all defined channels on
            6 => self.plan.channel_map = defined,
            _ => return Err(Error::InvalidChannelMask),
        }
        Ok(())
    }

    fn handle_cf_list(&mut self, payload: &[u8]) {
        // CFList type 0: up to 5 frequencies (24 bit LE, 100 Hz units) for channels 3..=7
        for (n, raw) in payload.chunks_exact(3).take(5).enumerate() {
            let frequency = u32::from_le_bytes([raw[0], raw[1], raw[2], 0]) * 100;
            // unused or out-of-band entries decode to "no channel"
            if !eu868_freq_check(frequency) {
                continue;
            }
            let _ = self.setup_channel(NUM_JOIN_CHANNELS + n as u8, frequency, 0);
        }
    }

    fn next_tx<RNG: RngCore>(&mut self, rng: &mut RNG, now: Time) -> Time {
        self.refresh_bands(now);
        let datarate = self.link.datarate;
        let mut next = self.link.tx_channel.wrapping_add(1 + (rng.next_u32() as u8) % 2);
        let mut best: Option<(u8, Time)> = None;

        for _ in 0..MAX_CHANNELS {
            if next as usize >= MAX_CHANNELS {
                next = 0;
            }
            if self.plan.is_enabled_at(next, datarate) {
                trace!("considering channel {}", next);
                let avail = self.availability(next).unwrap_or(now);
                if avail.is_reached(now) {
                    self.link.tx_channel = next;
                    return now;
                }
                if best.map_or(true, |(_, t)| avail < t) {
                    best = Some((next, avail));
                }
            }
            next += 1;
        }

        match best {
            Some((channel, avail)) => {
                debug!("channel {} busy until {}", channel, avail.ticks());
                self.link.tx_channel = channel;
                avail
            }
            None => {
                error!("no channel enabled at {}, staying on {}", datarate, self.link.tx_channel);
                now
            }
        }
    }

    fn update_tx_times(&mut self, airtime: Duration, now: Time) {
        let Some(channel) = self.plan.channel(self.link.tx_channel) else {
            return;
        };
        let band = channel.band();
        let avail = now + airtime.saturating_mul(band.txcap());
        self.timing.band_avail[band.index()] = Some(avail);
        debug!(
            "channel {} airtime {} ticks, band {} blocked until {}",
            self.link.tx_channel,
            airtime.ticks(),
            band,
            avail.ticks()
        );
    }

    fn tx_frequency(&self) -> u32 {
        self.plan.channel(self.link.tx_channel).map_or(DEFAULT_CHANNELS[0], |c| c.frequency)
    }

    fn rx1_parameter(&self) -> RxParameters {
        RxParameters {
            frequency: self.tx_frequency(),
            datarate: self.link.datarate.lower(self.link.rx1_dr_offset),
        }
    }

    fn init_join_loop<RNG: RngCore>(&mut self, rng: &mut RNG, now: Time) {
        self.link.tx_cnt = 0;
        self.link.adr_tx_pow = MAX_EIRP;
        self.link.datarate = JOIN_DATARATE;
        self.select_join_channel((rng.next_u32() as u8) % NUM_JOIN_CHANNELS);
        self.refresh_bands(now);
        let avail = self.availability(self.link.tx_channel).unwrap_or(now);
        self.timing.tx_end = avail + Duration::rnd_delay(rng, JOIN_BACKOFF_SPAN);
        info!(
            "join loop starts on channel {}, first attempt at {}",
            self.link.tx_channel,
            self.timing.tx_end.ticks()
        );
    }

    fn next_join_state<RNG: RngCore>(&mut self, _rng: &mut RNG, now: Time) -> JoinStatus {
        let mut status = JoinStatus::Continue;

        // rotate over the enabled default channels, lowering the data rate every second attempt
        self.link.tx_cnt = self.link.tx_cnt.wrapping_add(1);
        if self.link.tx_cnt & 1 == 0 {
            if self.link.datarate == DR::_0 {
                status = JoinStatus::Failed;
                self.link.datarate = JOIN_DATARATE;
            } else {
                self.link.datarate = self.link.datarate.lower(1);
            }
        }
        self.select_join_channel(self.link.tx_channel.wrapping_add(1));

        self.refresh_bands(now);
        self.timing.tx_end = self.availability(self.link.tx_channel).map_or(now, |t| t.max(now));
        match status {
            JoinStatus::Failed => info!("join failed on all data rates"),
            JoinStatus::Continue => debug!("next join attempt at {}", self.timing.tx_end.ticks()),
        }
        status
    }

    fn save_plan(&self) -> PlanSnapshot {
        PlanSnapshot::EU868(self.plan.clone())
    }

    fn load_state(&mut self, snapshot: &Snapshot) -> Result<(), Error> {
        #[allow(unreachable_patterns)]
        let plan = match &snapshot.plan {
            PlanSnapshot::EU868(plan) => plan,
            _ => return Err(Error::RegionMismatch),
        };
        let link = &snapshot.link;
        if link.tx_channel as usize >= MAX_CHANNELS {
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::ScriptedRng;

    fn at(sec: i32) -> Time {
        Time::from_ticks(0x1000) + Duration::from_sec(sec)
    }

    #[test]
    fn default_channels() {
        let eu = EU868::new();
        for (i, f) in DEFAULT_CHANNELS.iter().enumerate() {
            let ch = eu.plan().channel(i as u8).unwrap();
            assert_eq!(ch.frequency, *f);
            assert_eq!(ch.band(), Band::Centi);
            assert!(eu.plan().is_enabled(i as u8));
        }
        assert!(eu.plan().channel(3).is_none());
        assert!(!eu.plan().is_enabled(3));
        assert_eq!(eu.link.adr_tx_pow, MAX_EIRP);
    }

    #[test]
    fn band_by_frequency() {
        assert_eq!(Band::of(868_100_000), Band::Centi);
        assert_eq!(Band::of(869_525_000), Band::Deci);
        assert_eq!(Band::of(868_850_000), Band::Milli);
        assert_eq!(Band::of(867_100_000), Band::Milli);
        assert_eq!(Band::of(869_850_000), Band::Centi);
    }

    #[test]
    fn next_tx_skips_disabled_channels() {
        let mut eu = EU868::new();
        eu.link.datarate = DR::_5;
        eu.disable_channel(0).unwrap();
        eu.disable_channel(1).unwrap();
        for seed in [0u32, 1] {
            let mut rng = ScriptedRng::new(&[seed]);
            let now = at(0);
            let t = eu.next_tx(&mut rng, now);
            assert!(t.is_reached(now));
            assert_eq!(eu.link.tx_channel, 2);
        }
    }

    #[test]
    fn duty_cycle_blocks_the_whole_band() {
        let mut eu = EU868::new();
        eu.link.datarate = DR::_5;
        let mut rng = ScriptedRng::new(&[0, 1]);
        let start = at(0);
        assert_eq!(eu.next_tx(&mut rng, start), start);

        // 100 ms on a 1 % band: 10 s off-time for all three default channels
        eu.update_tx_times(Duration::from_ms(100), start);
        let recovered = start + Duration::from_sec(10);
        assert_eq!(eu.timing.band_avail[Band::Centi.index()], Some(recovered));

        let t = eu.next_tx(&mut rng, at(5));
        assert_eq!(t, recovered);
        assert!(t > at(5));
        assert_eq!(eu.next_tx(&mut rng, recovered), recovered);
        assert_eq!(eu.timing.band_avail[Band::Centi.index()], None);

        // a channel in another band is not affected
        eu.update_tx_times(Duration::from_ms(100), start);
        eu.setup_channel(3, 869_525_000, 0).unwrap();
        assert_eq!(eu.next_tx(&mut rng, at(5)), at(5));
        assert_eq!(eu.link.tx_channel, 3);
    }

    #[test]
    fn next_tx_picks_earliest_band() {
        let mut eu = EU868::new();
        eu.link.datarate = DR::_3;
        eu.setup_channel(3, 868_850_000, 0).unwrap();
        let mut rng = ScriptedRng::new(&[0]);
        let start = at(0);

        eu.link.tx_channel = 0;
        eu.update_tx_times(Duration::from_ms(100), start);
        eu.link.tx_channel = 3;
        eu.update_tx_times(Duration::from_ms(100), start);

        // centi band is free after 10 s, milli band only after 100 s
        let t = eu.next_tx(&mut rng, at(1));
        assert_eq!(t, start + Duration::from_sec(10));
        assert!(eu.link.tx_channel < 3);
    }

    #[test]
    fn next_tx_without_channel_keeps_current() {
        let mut eu = EU868::new();
        eu.link.datarate = DR::_6;
        eu.link.tx_channel = 1;
        let mut rng = ScriptedRng::new(&[0]);
        assert_eq!(eu.next_tx(&mut rng, at(3)), at(3));
        assert_eq!(eu.link.tx_channel, 1);
    }

    #[test]
    fn setup_channel_validates() {
        let mut eu = EU868::new();
        let before = eu.clone();
        assert_eq!(eu.setup_channel(16, 867_100_000, 0), Err(Error::InvalidChannel));
        assert_eq!(eu.setup_channel(4, 902_300_000, 0), Err(Error::InvalidFrequency));
        assert_eq!(eu.disable_channel(16), Err(Error::InvalidChannel));
        assert_eq!(eu, before);

        eu.setup_channel(15, 867_900_000, 0b1000).unwrap();
        let ch = eu.plan().channel(15).unwrap();
        assert_eq!(ch.drmap, 0b1000);
        assert!(eu.plan().is_enabled_at(15, DR::_3));
        assert!(!eu.plan().is_enabled_at(15, DR::_2));
    }

    #[test]
    fn map_channels_rules() {
        let mut eu = EU868::new();
        let before = eu.clone();
        assert_eq!(eu.map_channels(0, 0), Err(Error::InvalidChannelMask));
        assert_eq!(eu.map_channels(1, 0xFF), Err(Error::InvalidChannelMask));
        assert_eq!(eu.map_channels(5, 0xFF), Err(Error::InvalidChannelMask));
        assert_eq!(eu.map_channels(0, 0b1001), Err(Error::InvalidChannelMask));
        assert_eq!(eu, before);

        eu.map_channels(0, 0b101).unwrap();
        assert!(eu.plan().is_enabled(0));
        assert!(!eu.plan().is_enabled(1));
        assert!(eu.plan().is_enabled(2));

        eu.setup_channel(4, 867_300_000, 0).unwrap();
        eu.disable_channel(4).unwrap();
        eu.map_channels(6, 0).unwrap();
        assert_eq!(eu.plan.channel_map, 0b1_0111);
    }

    #[test]
    fn cf_list_installs_channels() {
        let mut eu = EU868::new();
        let mut payload = [0u8; 16];
        let freqs = [867_100_000u32, 0, 915_000_000, 867_700_000, 867_900_000];
        for (n, f) in freqs.iter().enumerate() {
            payload[n * 3..n * 3 + 3].copy_from_slice(&(f / 100).to_le_bytes()[..3]);
        }
        eu.handle_cf_list(&payload);

        assert_eq!(eu.plan().channel(3).map(|c| c.frequency), Some(867_100_000));
        assert!(eu.plan().channel(4).is_none());
        assert!(eu.plan().channel(5).is_none());
        assert_eq!(eu.plan().channel(6).map(|c| c.frequency), Some(867_700_000));
        assert_eq!(eu.plan().channel(7).map(|c| c.drmap), Some(DEFAULT_DRMAP));
        assert_eq!(eu.plan.channel_map, 0b1100_1111);
    }

    #[test]
    fn rx1_follows_tx_channel() {
        let mut eu = EU868::new();
        eu.link.tx_channel = 2;
        eu.link.datarate = DR::_4;
        eu.link.rx1_dr_offset = 1;
        assert_eq!(
            eu.rx1_parameter(),
            RxParameters { frequency: 868_500_000, datarate: DR::_3 }
        );
        eu.link.rx1_dr_offset = 5;
        assert_eq!(eu.rx1_parameter().datarate, DR::_0);
    }

    #[test]
    fn join_loop_cycles_data_rates() {
        let mut eu = EU868::new();
        let mut rng = ScriptedRng::new(&[4, 0x0203]);
        let now = at(0);
        eu.init_join_loop(&mut rng, now);
        assert_eq!(eu.link.tx_channel, 1);
        assert_eq!(eu.link.datarate, DR::_5);
        assert!(eu.timing.tx_end > now);
        assert!(eu.timing.tx_end < now + Duration::from_sec(JOIN_BACKOFF_SPAN as i32));

        let mut drs = Vec::new();
        let mut failures = Vec::new();
        for attempt in 1..=24 {
            let status = eu.next_join_state(&mut rng, now);
            assert!(eu.link.tx_channel < NUM_JOIN_CHANNELS);
            assert_eq!(eu.link.tx_cnt, attempt);
            if status == JoinStatus::Failed {
                failures.push(attempt);
            }
            drs.push(eu.link.datarate as u8);
        }
        assert_eq!(failures, [12, 24]);
        assert_eq!(&drs[..12], [5, 4, 4, 3, 3, 2, 2, 1, 1, 0, 0, 5]);
    }

    #[test]
    fn join_skips_disabled_channels() {
        let mut eu = EU868::new();
        eu.map_channels(0, 0b101).unwrap();
        let mut rng = ScriptedRng::new(&[1, 0x0203]);
        let now = at(0);
        eu.init_join_loop(&mut rng, now);
        assert_eq!(eu.link.tx_channel, 2);

        let mut channels = vec![eu.link.tx_channel];
        for _ in 0..12 {
            eu.next_join_state(&mut rng, now);
            channels.push(eu.link.tx_channel);
        }
        assert!(channels.iter().all(|ch| eu.plan.is_enabled(*ch)));
        assert_eq!(&channels[..5], [2, 0, 2, 0, 2]);

        // with every default channel off, a channel from the join-accept takes over
        eu.setup_channel(3, 867_100_000, 0).unwrap();
        eu.map_channels(0, 0b1000).unwrap();
        eu.next_join_state(&mut rng, now);
        assert_eq!(eu.link.tx_channel, 3);
        eu.init_join_loop(&mut rng, now);
        assert_eq!(eu.link.tx_channel, 3);
    }

    #[test]
    fn stale_band_debt_is_dropped_after_wrap() {
        let mut eu = EU868::new();
        eu.link.datarate = DR::_5;
        let mut rng = ScriptedRng::new(&[0]);
        let start = at(0);
        eu.next_tx(&mut rng, start);
        eu.update_tx_times(Duration::from_ms(100), start);
        let recovered = start + Duration::from_sec(10);

        // idle for more than half the counter range: the old stamp now reads as future
        let later = Time::from_ticks(recovered.ticks().wrapping_add(1 << 31).wrapping_add(62_500));
        assert!(recovered > later);
        assert_eq!(eu.next_tx(&mut rng, later), later);
        assert_eq!(eu.timing.band_avail, [None; MAX_BANDS]);

        // a genuine debt is still honoured
        eu.update_tx_times(Duration::from_ms(100), later);
        let t = eu.next_tx(&mut rng, later + Duration::from_sec(1));
        assert_eq!(t, later + Duration::from_sec(10));
    }

    #[test]
    fn join_respects_duty_cycle() {
        let mut eu = EU868::new();
        let mut rng = ScriptedRng::new(&[0, 0]);
        let now = at(0);
        eu.link.tx_channel = 0;
        eu.update_tx_times(Duration::from_ms(50), now);
        let blocked = now + Duration::from_sec(5);

        eu.init_join_loop(&mut rng, now);
        assert_eq!(eu.timing.tx_end, blocked);

        eu.next_join_state(&mut rng, now + Duration::from_sec(1));
        assert_eq!(eu.timing.tx_end, blocked);
        eu.next_join_state(&mut rng, now + Duration::from_sec(6));
        assert_eq!(eu.timing.tx_end, now + Duration::from_sec(6));
    }
}
