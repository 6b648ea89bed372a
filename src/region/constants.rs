use lora_modulation::CodingRate;

use crate::time::Duration;

pub(crate) const RECEIVE_DELAY1: Duration = Duration::from_ms(1000);
pub(crate) const RECEIVE_DELAY2: Duration = Duration::from_ms(2000); // RECEIVE_DELAY1 + 1 s
pub(crate) const JOIN_ACCEPT_DELAY1: Duration = Duration::from_ms(5000);
pub(crate) const JOIN_ACCEPT_DELAY2: Duration = Duration::from_ms(6000);

pub(crate) const DEFAULT_CODING_RATE: CodingRate = CodingRate::_4_5;

pub(crate) const NUM_DATARATES: usize = 16;

/// Duty-cycle bands tracked for regions that enforce airtime limits.
pub const MAX_BANDS: usize = 3;

/// Upper bound, in seconds, of the random back-off before the first join attempt.
pub(crate) const JOIN_BACKOFF_SPAN: u8 = 8;
