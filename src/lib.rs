pub mod catalog;
pub mod config;
pub mod constants;
mod conversion;
pub mod coordinates;
pub mod env_state;
pub mod ephemeris;
pub mod fits;
pub mod flagging;
pub mod mosaic;
pub mod observing_block;
pub mod patches;
pub mod pipeline;
pub mod progress;
pub mod services;
pub mod sky_patch;
pub mod skypatch_errors;
pub mod time;
pub mod wcs;

pub use conversion::{parse_dec_to_deg, parse_ra_to_deg};
