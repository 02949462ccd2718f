use crate::db::layers::{Address, AREAL_LAYERS, LAYER_NAMES};
use crate::model::osm::Tag;

/// result of the single classification pass over an entity's tags.
#[derive(Debug, Default)]
pub struct Classification<'a> {
    /// first layer (in taxonomy priority order) with a matching tag
    pub layer: Option<&'static str>,
    /// value of the matched layer tag; the last occurrence wins when the
    /// key repeats
    pub sub_type: Option<&'a str>,
    pub name: Option<&'a str>,
    /// entity carries `type=multipolygon`
    pub multipolygon: bool,
}

/// classifies an entity against the fixed layer taxonomy.
pub fn classify(tags: &[Tag]) -> Classification<'_> {
    let name = tags
        .iter()
        .rev()
        .find(|t| t.key == "name")
        .map(|t| t.value.as_str());
    let multipolygon = tags
        .iter()
        .any(|t| t.key == "type" && t.value == "multipolygon");
    for layer in LAYER_NAMES {
        if let Some(t) = tags.iter().rev().find(|t| t.key == layer) {
            return Classification {
                layer: Some(layer),
                sub_type: Some(t.value.as_str()),
                name,
                multipolygon,
            };
        }
    }
    Classification {
        layer: None,
        sub_type: None,
        name,
        multipolygon,
    }
}

/// whether closed ways of this layer are interpreted as polygons.
pub fn is_areal_layer(layer: &str) -> bool {
    AREAL_LAYERS.contains(&layer)
}

/// captures the `addr:*` fields of a point; the last occurrence of a
/// repeated key wins.
pub fn address_fields(tags: &[Tag]) -> Address<'_> {
    let mut address = Address::default();
    for t in tags {
        match t.key.as_str() {
            "addr:country" => address.country = Some(&t.value),
            "addr:city" => address.city = Some(&t.value),
            "addr:postcode" => address.postcode = Some(&t.value),
            "addr:street" => address.street = Some(&t.value),
            "addr:housename" => address.housename = Some(&t.value),
            "addr:housenumber" => address.housenumber = Some(&t.value),
            _ => {}
        }
    }
    address
}
