//! GeoJSON export of hotspot centroids

use crate::profile::{ClusterProfile, ClusterProfiles};
use serde_json::{json, Value};

fn feature(profile: &ClusterProfile) -> Value {
    json!({
        "type": "Feature",
        "geometry": {
            "type": "Point",
            "coordinates": [profile.centroid_longitude, profile.centroid_latitude]
        },
        "properties": profile
    })
}

/// `FeatureCollection` of centroid points, largest hotspots first.
/// `top = None` exports every profile.
pub fn to_geojson(profiles: &ClusterProfiles, top: Option<usize>) -> Value {
    let ranked = profiles.largest(top.unwrap_or(profiles.len()));
    json!({
        "type": "FeatureCollection",
        "features": ranked.into_iter().map(feature).collect::<Vec<_>>()
    })
}
