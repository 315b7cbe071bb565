//! Serialize a [`Duration`] as an integer count of nanoseconds.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub(crate) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    let nanos = u64::try_from(d.as_nanos()).map_err(serde::ser::Error::custom)?;
    s.serialize_u64(nanos)
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_nanos)
}
