//! LE advertising
//!
//! The advertisement is exported and registered on its own, independent of
//! the GATT application.

mod advertisement;
pub mod fallback;

pub use advertisement::{
    Advertisement, AdvertisementData, AdvertisementType, AdvertisingMode, APPEARANCE_UNSET,
    INCLUDE_APPEARANCE, INCLUDE_LOCAL_NAME, INCLUDE_SERVICE_UUIDS, INCLUDE_TX_POWER,
    TX_POWER_NO_PREFERENCE,
};
pub use fallback::{default_chain, AdvertisingFallback};
