//! Logging macros.
//! With the `defmt` feature the `defmt` macros are used, otherwise the `log` facade.
//!
//! Format strings stick to `{}` and `{:?}` so both backends accept them.

#![allow(unused_macros, unused_imports)]

#[cfg(feature = "defmt")]
pub(crate) use defmt::{debug, error, info, trace, warn};

#[cfg(not(feature = "defmt"))]
pub(crate) use log::{debug, error, info, trace, warn};
