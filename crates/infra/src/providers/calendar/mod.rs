//! Calendar provider adapters

pub mod caldav;
pub mod google;
pub mod microsoft;
