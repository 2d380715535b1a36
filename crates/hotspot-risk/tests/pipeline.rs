//! End-to-end: fit three city hotspots, persist, reload, look up.

use chrono::NaiveDate;
use hotspot_risk::haversine::haversine_km;
use hotspot_risk::{
    lookup, store, ClusterParams, GeoPoint, HotspotPipeline, IncidentRecord, ProfileSchema,
    RiskLookup, TimeBlock, EARTH_RADIUS_KM, NOISE,
};
use tempfile::TempDir;

const M_PER_DEG: f64 = EARTH_RADIUS_KM * 1000.0 * std::f64::consts::PI / 180.0;

const CITIES: [(&str, f64, f64); 3] = [
    ("GUAYAQUIL", -2.1894, -79.8891),
    ("QUITO", -0.1807, -78.4678),
    ("CUENCA", -2.9001, -79.0059),
];

/// Scattered points far from each other and from every city
const NOISE_POINTS: [(f64, f64); 5] = [
    (-1.05, -80.45),
    (-3.99, -79.20),
    (0.35, -78.12),
    (-1.67, -78.65),
    (-4.50, -80.00),
];

fn city_records(name: &str, lat: f64, lon: f64) -> Vec<IncidentRecord> {
    (0..15)
        .map(|i| {
            // Spiral within ~30 m of the center
            let r = 30.0 * i as f64 / 15.0;
            let theta = i as f64 * 2.399_963;
            let dlat = r * theta.sin() / M_PER_DEG;
            let dlon = r * theta.cos() / (M_PER_DEG * lat.to_radians().cos());
            let day = NaiveDate::from_ymd_opt(2024, 3, 4 + (i % 5) as u32).unwrap();
            let hour = if i % 3 == 0 { 2 } else { 19 };
            IncidentRecord::new(lat + dlat, lon + dlon)
                .at(day.and_hms_opt(hour, 0, 0).unwrap())
                .with_attribute("canton", name)
                .with_attribute("offense", if i < 8 { "ROBO" } else { "ASALTO" })
        })
        .collect()
}

fn records() -> Vec<IncidentRecord> {
    let mut out = Vec::new();
    for (name, lat, lon) in CITIES {
        out.extend(city_records(name, lat, lon));
    }
    out.extend(
        NOISE_POINTS
            .iter()
            .map(|&(lat, lon)| IncidentRecord::new(lat, lon).with_attribute("canton", "RURAL")),
    );
    out
}

fn pipeline() -> HotspotPipeline {
    HotspotPipeline::new(
        ClusterParams::new(0.1 / EARTH_RADIUS_KM, 10).unwrap(),
        ProfileSchema::new(&["canton", "offense"], &[]),
    )
}

#[test]
fn three_hotspots_and_noise() {
    let output = pipeline().run(records()).unwrap();
    let labels = &output.assignment.labels;

    assert_eq!(output.assignment.n_clusters, 3);
    assert_eq!(labels.iter().filter(|&&l| l == NOISE).count(), 5);
    // Discovery order follows input order
    assert_eq!(&labels[..15], &[0; 15]);
    assert_eq!(&labels[15..30], &[1; 15]);
    assert_eq!(&labels[30..45], &[2; 15]);

    for (label, (name, lat, lon)) in CITIES.iter().enumerate() {
        let p = output.profiles.get(label as i64).unwrap();
        assert_eq!(p.member_count, 15);
        assert_eq!(p.dominant["canton"], *name);
        assert_eq!(p.dominant["offense"], "ROBO");
        assert!(haversine_km(p.centroid_latitude, p.centroid_longitude, *lat, *lon) < 0.05);

        let blocks = p.time_blocks.unwrap();
        assert!((blocks.get(TimeBlock::Overnight) - 100.0 / 3.0).abs() < 1e-9);
        assert!((blocks.get(TimeBlock::Evening) - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(blocks.peak(), TimeBlock::Evening);
    }
}

#[test]
fn lookup_at_centroids_and_far_away() {
    let output = pipeline().run(records()).unwrap();
    let service = RiskLookup::new(output.model.clone(), output.profiles.clone()).unwrap();

    for (label, _) in CITIES.iter().enumerate() {
        let p = output.profiles.get(label as i64).unwrap();
        let hit = service
            .lookup(p.centroid_latitude, p.centroid_longitude)
            .unwrap()
            .unwrap();
        assert_eq!(hit.label, label as i64);
    }

    // ~50 km west of Guayaquil, out in the gulf
    let far = (-2.1894, -79.8891 - 50.0 / (M_PER_DEG / 1000.0 * (-2.1894f64).to_radians().cos()));
    for (_, lat, lon) in CITIES {
        assert!(haversine_km(far.0, far.1, lat, lon) > 45.0);
    }
    assert!(service.lookup(far.0, far.1).unwrap().is_none());
    assert!(service.lookup(0.0, 0.0).unwrap().is_none());
}

#[test]
fn reloaded_artifacts_answer_identically() {
    let output = pipeline().run(records()).unwrap();
    let dir = TempDir::new().unwrap();
    output.save(dir.path()).unwrap();

    let (model, profiles) = store::load(dir.path()).unwrap();
    assert_eq!(model, output.model);
    assert_eq!(profiles, output.profiles);

    let before = RiskLookup::new(output.model.clone(), output.profiles.clone()).unwrap();
    let after = RiskLookup::from_dir(dir.path()).unwrap();

    let mut battery: Vec<GeoPoint> = output.records.iter().map(IncidentRecord::point).collect();
    for i in 0..40 {
        battery.push(GeoPoint::new(-5.0 + i as f64 * 0.17, -81.0 + i as f64 * 0.13));
    }

    let expected = before.lookup_many(&battery).unwrap();
    let actual = after.lookup_many(&battery).unwrap();
    assert_eq!(expected, actual);

    for q in &battery {
        let brute = lookup(&model, &profiles, q.latitude, q.longitude).unwrap();
        let indexed = after.lookup(q.latitude, q.longitude).unwrap().cloned();
        assert_eq!(brute, indexed);
    }
}
