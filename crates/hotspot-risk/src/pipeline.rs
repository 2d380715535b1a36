//! End-to-end training pipeline: filter, cluster, profile.

use crate::dataset::{BoundingBox, DatasetPreset};
use crate::dbscan::{ClusterAssignment, ClusterBuilder, ClusterParams, FittedClusterModel};
use crate::profile::{summarize, ClusterProfiles, ProfileSchema};
use crate::{store, GeoPoint, IncidentRecord, Result};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Headline numbers of one fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitSummary {
    pub records: usize,
    pub clusters: usize,
    pub core_points: usize,
    pub noise: usize,
    pub radius_km: f64,
    pub min_samples: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Records that entered the fit, in assignment order
    pub records: Vec<IncidentRecord>,
    pub assignment: ClusterAssignment,
    pub model: FittedClusterModel,
    pub profiles: ClusterProfiles,
}

impl PipelineOutput {
    pub fn summary(&self) -> FitSummary {
        FitSummary {
            records: self.records.len(),
            clusters: self.assignment.n_clusters,
            core_points: self.model.core_points.len(),
            noise: self.assignment.noise_count(),
            radius_km: self.model.params().radius_km(),
            min_samples: self.model.min_samples,
        }
    }

    /// Persist the model and profile artifacts into `dir`
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        store::save(&self.model, &self.profiles, dir)
    }
}

#[derive(Debug, Clone)]
pub struct HotspotPipeline {
    pub params: ClusterParams,
    pub schema: ProfileSchema,
    pub bounding_box: Option<BoundingBox>,
}

impl HotspotPipeline {
    pub fn new(params: ClusterParams, schema: ProfileSchema) -> Self {
        Self {
            params,
            schema,
            bounding_box: None,
        }
    }

    pub fn from_preset(preset: DatasetPreset) -> Self {
        Self {
            params: preset.params(),
            schema: preset.schema(),
            bounding_box: Some(preset.bounding_box()),
        }
    }

    pub fn with_bounding_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = Some(bounding_box);
        self
    }

    pub fn run(&self, records: Vec<IncidentRecord>) -> Result<PipelineOutput> {
        let records = match &self.bounding_box {
            Some(bbox) => bbox.filter(records),
            None => records,
        };

        let points: Vec<GeoPoint> = records.iter().map(IncidentRecord::point).collect();
        let fit = ClusterBuilder::new(self.params).fit(&points)?;
        let profiles = summarize(&records, &fit.assignment, &self.schema)?;

        let output = PipelineOutput {
            records,
            assignment: fit.assignment,
            model: fit.model,
            profiles,
        };
        let summary = output.summary();
        info!(
            "Pipeline done: {} records -> {} hotspots, {} noise, {} core points",
            summary.records, summary.clusters, summary.noise, summary.core_points
        );
        Ok(output)
    }
}
