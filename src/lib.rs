#![cfg_attr(not(test), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! MAC-layer core of a LoRaWAN end-device: a cooperative job [`scheduler`] that serves as the
//! device's only concurrency primitive, and the regional MAC policy ([`region`]) that picks
//! channel, data rate and timing for every transmission under EU868 duty-cycle law or US915
//! channel hopping rules.
//!
//! ## Feature flags
#![doc = document_features::document_features!(feature_label = r#"<span class="stab portability"><code>{feature}</code></span>"#)]

pub(crate) mod fmt;

pub mod radio;
pub mod region;
pub mod scheduler;
pub mod time;

pub use region::{Configuration, Region, DR};
pub use scheduler::{JobId, Scheduler};
pub use time::{Clock, Duration, IrqTrigger, Time};

pub use rand_core::RngCore;

#[cfg(test)]
mod test_util;
