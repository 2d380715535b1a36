//! Cluster profile aggregation
//!
//! Reduces every non-noise cluster to a fixed-schema summary:
//!
//! | Field | Reduction |
//! |-------|-----------|
//! | `dominant` | mode per categorical attribute, ties → first seen in input order |
//! | `centroid_*` | mean latitude / longitude of all members |
//! | `mean_hour`, `mean_day_of_week` | mean over timestamped members |
//! | `time_blocks` | % of timestamped members per [`TimeBlock`] |
//! | `feature_means` | mean per numeric feature |
//! | `member_count` | number of members |
//!
//! Statistics are computed the same way regardless of cluster size.

use crate::dbscan::ClusterAssignment;
use crate::{ClusterLabel, HotspotError, IncidentRecord, Result, NOISE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

/// Part of the day an incident falls in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBlock {
    /// 00:00-05:59
    Overnight,
    /// 06:00-11:59
    Morning,
    /// 12:00-17:59
    Afternoon,
    /// 18:00-23:59
    Evening,
}

impl TimeBlock {
    pub const ALL: [TimeBlock; 4] = [
        TimeBlock::Overnight,
        TimeBlock::Morning,
        TimeBlock::Afternoon,
        TimeBlock::Evening,
    ];

    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=5 => TimeBlock::Overnight,
            6..=11 => TimeBlock::Morning,
            12..=17 => TimeBlock::Afternoon,
            _ => TimeBlock::Evening,
        }
    }

    fn index(self) -> usize {
        match self {
            TimeBlock::Overnight => 0,
            TimeBlock::Morning => 1,
            TimeBlock::Afternoon => 2,
            TimeBlock::Evening => 3,
        }
    }
}

/// Percentage of a cluster's timestamped members per time block
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeBlockShares {
    pub overnight: f64,
    pub morning: f64,
    pub afternoon: f64,
    pub evening: f64,
}

impl TimeBlockShares {
    fn from_counts(counts: [u64; 4]) -> Option<Self> {
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return None;
        }
        let pct = |c: u64| c as f64 * 100.0 / total as f64;
        Some(Self {
            overnight: pct(counts[0]),
            morning: pct(counts[1]),
            afternoon: pct(counts[2]),
            evening: pct(counts[3]),
        })
    }

    pub fn get(&self, block: TimeBlock) -> f64 {
        match block {
            TimeBlock::Overnight => self.overnight,
            TimeBlock::Morning => self.morning,
            TimeBlock::Afternoon => self.afternoon,
            TimeBlock::Evening => self.evening,
        }
    }

    /// Block with the largest share (earliest block on ties)
    pub fn peak(&self) -> TimeBlock {
        TimeBlock::ALL
            .into_iter()
            .fold(TimeBlock::Overnight, |best, b| {
                if self.get(b) > self.get(best) {
                    b
                } else {
                    best
                }
            })
    }
}

/// Summary of one hotspot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub label: ClusterLabel,
    pub member_count: u64,
    pub centroid_latitude: f64,
    pub centroid_longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_hour: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_day_of_week: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_blocks: Option<TimeBlockShares>,
    /// Attribute name → most frequent value
    #[serde(default)]
    pub dominant: BTreeMap<String, String>,
    /// Feature name → mean value
    #[serde(default)]
    pub feature_means: BTreeMap<String, f64>,
}

/// Which record columns feed the profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSchema {
    pub categorical: Vec<String>,
    pub numeric: Vec<String>,
}

impl ProfileSchema {
    pub fn new(categorical: &[&str], numeric: &[&str]) -> Self {
        Self {
            categorical: categorical.iter().map(|s| s.to_string()).collect(),
            numeric: numeric.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Profile table keyed by cluster label. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterProfiles {
    profiles: BTreeMap<ClusterLabel, ClusterProfile>,
}

impl ClusterProfiles {
    pub fn get(&self, label: ClusterLabel) -> Option<&ClusterProfile> {
        self.profiles.get(&label)
    }

    pub fn contains(&self, label: ClusterLabel) -> bool {
        self.profiles.contains_key(&label)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Profiles in ascending label order
    pub fn iter(&self) -> impl Iterator<Item = &ClusterProfile> {
        self.profiles.values()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&ClusterLabel, &ClusterProfile)> {
        self.profiles.iter()
    }

    /// The `n` biggest hotspots, ties by ascending label
    pub fn largest(&self, n: usize) -> Vec<&ClusterProfile> {
        let mut ranked: Vec<&ClusterProfile> = self.profiles.values().collect();
        ranked.sort_by(|a, b| {
            b.member_count
                .cmp(&a.member_count)
                .then(a.label.cmp(&b.label))
        });
        ranked.truncate(n);
        ranked
    }

    pub fn total_members(&self) -> u64 {
        self.profiles.values().map(|p| p.member_count).sum()
    }
}

impl FromIterator<ClusterProfile> for ClusterProfiles {
    fn from_iter<I: IntoIterator<Item = ClusterProfile>>(iter: I) -> Self {
        Self {
            profiles: iter.into_iter().map(|p| (p.label, p)).collect(),
        }
    }
}

/// Most frequent value; ties go to the value seen first
pub fn mode<'a, I>(values: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counter = ModeCounter::default();
    for (i, v) in values.into_iter().enumerate() {
        counter.add(v, i);
    }
    counter.mode()
}

#[derive(Debug, Default)]
struct ModeCounter<'a> {
    /// value → (count, first position)
    counts: HashMap<&'a str, (u64, usize)>,
}

impl<'a> ModeCounter<'a> {
    fn add(&mut self, value: &'a str, position: usize) {
        self.counts.entry(value).or_insert((0, position)).0 += 1;
    }

    fn mode(&self) -> Option<&'a str> {
        self.counts
            .iter()
            .max_by(|(_, (ca, fa)), (_, (cb, fb))| ca.cmp(cb).then(fb.cmp(fa)))
            .map(|(v, _)| *v)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    sum: f64,
    n: u64,
}

impl Mean {
    fn add(&mut self, x: f64) {
        self.sum += x;
        self.n += 1;
    }

    fn get(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / self.n as f64)
    }
}

struct ClusterAccumulator<'a> {
    count: u64,
    latitude: Mean,
    longitude: Mean,
    hour: Mean,
    day_of_week: Mean,
    time_blocks: [u64; 4],
    categorical: Vec<ModeCounter<'a>>,
    numeric: Vec<Mean>,
}

impl<'a> ClusterAccumulator<'a> {
    fn new(schema: &ProfileSchema) -> Self {
        Self {
            count: 0,
            latitude: Mean::default(),
            longitude: Mean::default(),
            hour: Mean::default(),
            day_of_week: Mean::default(),
            time_blocks: [0; 4],
            categorical: schema.categorical.iter().map(|_| ModeCounter::default()).collect(),
            numeric: vec![Mean::default(); schema.numeric.len()],
        }
    }

    fn add(&mut self, position: usize, record: &'a IncidentRecord, schema: &ProfileSchema) {
        self.count += 1;
        self.latitude.add(record.latitude);
        self.longitude.add(record.longitude);

        if let Some(hour) = record.hour() {
            self.hour.add(hour as f64);
            self.time_blocks[TimeBlock::from_hour(hour).index()] += 1;
        }
        if let Some(dow) = record.day_of_week() {
            self.day_of_week.add(dow as f64);
        }

        for (counter, attr) in self.categorical.iter_mut().zip(&schema.categorical) {
            if let Some(value) = record.attributes.get(attr) {
                counter.add(value.as_str(), position);
            }
        }
        for (mean, feature) in self.numeric.iter_mut().zip(&schema.numeric) {
            if let Some(&value) = record.features.get(feature) {
                if value.is_finite() {
                    mean.add(value);
                }
            }
        }
    }

    fn finish(self, label: ClusterLabel, schema: &ProfileSchema) -> ClusterProfile {
        let dominant = schema
            .categorical
            .iter()
            .zip(&self.categorical)
            .filter_map(|(attr, counter)| counter.mode().map(|m| (attr.clone(), m.to_string())))
            .collect();
        let feature_means = schema
            .numeric
            .iter()
            .zip(&self.numeric)
            .filter_map(|(feature, mean)| mean.get().map(|m| (feature.clone(), m)))
            .collect();

        ClusterProfile {
            label,
            member_count: self.count,
            // Every accumulator has at least one member
            centroid_latitude: self.latitude.get().unwrap_or(f64::NAN),
            centroid_longitude: self.longitude.get().unwrap_or(f64::NAN),
            mean_hour: self.hour.get(),
            mean_day_of_week: self.day_of_week.get(),
            time_blocks: TimeBlockShares::from_counts(self.time_blocks),
            dominant,
            feature_means,
        }
    }
}

/// Build the profile table for a labeled record set.
///
/// `records` and `assignment.labels` must be index-aligned.
pub fn summarize(
    records: &[IncidentRecord],
    assignment: &ClusterAssignment,
    schema: &ProfileSchema,
) -> Result<ClusterProfiles> {
    if records.len() != assignment.labels.len() {
        return Err(HotspotError::InvalidParameter {
            param: "labels",
            reason: format!(
                "{} labels for {} records",
                assignment.labels.len(),
                records.len()
            ),
        });
    }

    let mut clusters: BTreeMap<ClusterLabel, ClusterAccumulator> = BTreeMap::new();
    for (position, (record, &label)) in records.iter().zip(&assignment.labels).enumerate() {
        if label == NOISE {
            continue;
        }
        clusters
            .entry(label)
            .or_insert_with(|| ClusterAccumulator::new(schema))
            .add(position, record, schema);
    }

    let profiles: ClusterProfiles = clusters
        .into_iter()
        .map(|(label, acc)| acc.finish(label, schema))
        .collect();

    info!(
        "Summarized {} clusters covering {} of {} records",
        profiles.len(),
        profiles.total_members(),
        records.len()
    );

    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at_hour(record: IncidentRecord, day: u32, hour: u32) -> IncidentRecord {
        record.at(
            NaiveDate::from_ymd_opt(2025, 3, day)
                .unwrap()
                .and_hms_opt(hour, 0, 0)
                .unwrap(),
        )
    }

    fn assignment(labels: Vec<ClusterLabel>) -> ClusterAssignment {
        let n_clusters = labels.iter().filter(|&&l| l != NOISE).max().map_or(0, |&m| m as usize + 1);
        ClusterAssignment {
            labels,
            core_sample_indices: Vec::new(),
            n_clusters,
        }
    }

    #[test]
    fn test_time_block_from_hour() {
        assert_eq!(TimeBlock::from_hour(0), TimeBlock::Overnight);
        assert_eq!(TimeBlock::from_hour(5), TimeBlock::Overnight);
        assert_eq!(TimeBlock::from_hour(6), TimeBlock::Morning);
        assert_eq!(TimeBlock::from_hour(12), TimeBlock::Afternoon);
        assert_eq!(TimeBlock::from_hour(17), TimeBlock::Afternoon);
        assert_eq!(TimeBlock::from_hour(18), TimeBlock::Evening);
        assert_eq!(TimeBlock::from_hour(23), TimeBlock::Evening);
    }

    #[test]
    fn test_mode_tie_first_encountered() {
        // 50/50 split: whichever value appears first wins
        let values = ["ROBO", "HURTO", "HURTO", "ROBO"];
        assert_eq!(mode(values), Some("ROBO"));
        let values = ["HURTO", "ROBO", "ROBO", "HURTO"];
        assert_eq!(mode(values), Some("HURTO"));
        assert_eq!(mode(Vec::<&str>::new()), None);
    }

    #[test]
    fn test_mode_majority_wins() {
        assert_eq!(mode(["A", "B", "B", "C", "B", "A"]), Some("B"));
    }

    #[test]
    fn test_dominant_tie_in_cluster_uses_input_order() {
        let records: Vec<IncidentRecord> = (0..10)
            .map(|i| {
                let offense = if i % 2 == 0 { "ASALTO" } else { "ROBO" };
                IncidentRecord::new(-2.19, -79.89).with_attribute("offense", offense)
            })
            .collect();
        let schema = ProfileSchema::new(&["offense"], &[]);

        let profiles = summarize(&records, &assignment(vec![0; 10]), &schema).unwrap();
        assert_eq!(profiles.get(0).unwrap().dominant["offense"], "ASALTO");

        let reversed: Vec<IncidentRecord> = records.into_iter().rev().collect();
        let profiles = summarize(&reversed, &assignment(vec![0; 10]), &schema).unwrap();
        assert_eq!(profiles.get(0).unwrap().dominant["offense"], "ROBO");
    }

    #[test]
    fn test_centroid_and_means() {
        let records = vec![
            at_hour(IncidentRecord::new(-2.0, -80.0), 3, 2).with_feature("age", 20.0),
            at_hour(IncidentRecord::new(-2.2, -79.8), 4, 14).with_feature("age", 30.0),
            at_hour(IncidentRecord::new(-2.1, -79.9), 5, 20),
            IncidentRecord::new(10.0, 10.0),
        ];
        let schema = ProfileSchema::new(&["canton"], &["age"]);
        let profiles = summarize(&records, &assignment(vec![0, 0, 0, NOISE]), &schema).unwrap();

        assert_eq!(profiles.len(), 1);
        let p = profiles.get(0).unwrap();
        assert_eq!(p.member_count, 3);
        assert!((p.centroid_latitude - -2.1).abs() < 1e-12);
        assert!((p.centroid_longitude - -79.9).abs() < 1e-12);
        assert!((p.mean_hour.unwrap() - 12.0).abs() < 1e-12);
        // 2025-03-03 Mon, 04 Tue, 05 Wed
        assert!((p.mean_day_of_week.unwrap() - 1.0).abs() < 1e-12);
        assert!((p.feature_means["age"] - 25.0).abs() < 1e-12);
        assert!(!p.dominant.contains_key("canton"));

        let blocks = p.time_blocks.unwrap();
        let third = 100.0 / 3.0;
        assert!((blocks.overnight - third).abs() < 1e-9);
        assert_eq!(blocks.morning, 0.0);
        assert!((blocks.afternoon - third).abs() < 1e-9);
        assert!((blocks.evening - third).abs() < 1e-9);
    }

    #[test]
    fn test_noise_excluded_and_no_timestamps() {
        let records = vec![
            IncidentRecord::new(-2.0, -80.0).with_attribute("canton", "GUAYAQUIL"),
            IncidentRecord::new(-0.2, -78.5).with_attribute("canton", "QUITO"),
            IncidentRecord::new(-0.2, -78.5).with_attribute("canton", "QUITO"),
        ];
        let schema = ProfileSchema::new(&["canton"], &[]);
        let profiles = summarize(&records, &assignment(vec![NOISE, 1, 1]), &schema).unwrap();
        assert!(profiles.get(0).is_none());
        let p = profiles.get(1).unwrap();
        assert_eq!(p.member_count, 2);
        assert_eq!(p.dominant["canton"], "QUITO");
        assert_eq!(p.mean_hour, None);
        assert_eq!(p.time_blocks, None);
    }

    #[test]
    fn test_label_length_mismatch() {
        let records = vec![IncidentRecord::new(0.0, 0.0)];
        let err = summarize(&records, &assignment(vec![0, 0]), &ProfileSchema::default());
        assert!(matches!(err, Err(HotspotError::InvalidParameter { param: "labels", .. })));
    }

    #[test]
    fn test_largest_ranking() {
        let records: Vec<IncidentRecord> = (0..9).map(|_| IncidentRecord::new(0.0, 0.0)).collect();
        let labels = vec![0, 1, 1, 2, 2, 2, 3, 3, 3];
        let profiles = summarize(&records, &assignment(labels), &ProfileSchema::default()).unwrap();
        let top: Vec<ClusterLabel> = profiles.largest(3).iter().map(|p| p.label).collect();
        assert_eq!(top, vec![2, 3, 1]);
        assert_eq!(profiles.largest(10).len(), 4);
        assert_eq!(profiles.total_members(), 9);
    }

    #[test]
    fn test_time_block_peak() {
        let shares = TimeBlockShares {
            overnight: 10.0,
            morning: 40.0,
            afternoon: 40.0,
            evening: 10.0,
        };
        assert_eq!(shares.peak(), TimeBlock::Morning);
    }
}
