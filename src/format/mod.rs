//! Format table shared by the queue and the veto
//!
//! Maps each best-of value to its ready-check size and veto phase sequence.

pub mod provider;

pub use provider::{
    FormatConfiguration, FormatProvider, StaticFormatProvider, DEFAULT_REQUIRED_COUNT,
};
