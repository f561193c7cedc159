//! Defines helper methods for Serializing and Deserializing external types.
use std::str::FromStr;

use log::LevelFilter;
use serde::{de, Deserialize, Deserializer};

#[cfg(unix)]
use syslog::Facility;


//------------ LevelFilter ---------------------------------------------------

pub fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}


//------------ Facility ------------------------------------------------------

#[cfg(unix)]
pub fn de_facility<'de, D>(d: D) -> Result<Facility, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    Facility::from_str(&string).map_err(|_| {
        de::Error::custom(format!("Unsupported syslog_facility: \"{string}\""))
    })
}
