//! On-disk representation of a segment [Orientation]: `true` is horizontal, `false` vertical

use serde::{Deserialize, Deserializer, Serializer};

use crate::models::Orientation;

pub fn serialize<S: Serializer>(orientation: &Orientation, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_bool(*orientation == Orientation::Horizontal)
}

pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Orientation, D::Error> {
    Ok(if bool::deserialize(d)? {
        Orientation::Horizontal
    } else {
        Orientation::Vertical
    })
}
