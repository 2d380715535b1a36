//! Cluster model store
//!
//! The fitted model and the profile table are written as two independent,
//! self-contained JSON artifacts. Floats are written in shortest round-trip
//! form and parsed back exactly, so core coordinates and `eps` reload
//! bit-identical.

use crate::dbscan::{CorePoint, FittedClusterModel};
use crate::profile::ClusterProfiles;
use crate::{HotspotError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::f64::consts::{FRAC_PI_2, PI};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Bumped whenever the artifact layout changes
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

pub const MODEL_FILE_NAME: &str = "cluster_model.json";
pub const PROFILES_FILE_NAME: &str = "cluster_profiles.json";

#[derive(Serialize, Deserialize)]
struct ModelArtifact<'a> {
    format_version: u32,
    eps: f64,
    min_samples: usize,
    core_points: Cow<'a, [CorePoint]>,
}

#[derive(Serialize, Deserialize)]
struct ProfilesArtifact<'a> {
    format_version: u32,
    profiles: Cow<'a, ClusterProfiles>,
}

/// Artifact paths inside a model directory
pub fn artifact_paths(dir: impl AsRef<Path>) -> (PathBuf, PathBuf) {
    let dir = dir.as_ref();
    (dir.join(MODEL_FILE_NAME), dir.join(PROFILES_FILE_NAME))
}

fn corrupt(path: &Path, reason: impl std::fmt::Display) -> HotspotError {
    HotspotError::CorruptArtifact(format!("{}: {}", path.display(), reason))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| corrupt(path, e))
}

pub fn save_model(model: &FittedClusterModel, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let artifact = ModelArtifact {
        format_version: ARTIFACT_FORMAT_VERSION,
        eps: model.eps,
        min_samples: model.min_samples,
        core_points: Cow::Borrowed(&model.core_points),
    };
    write_json(path, &artifact)?;
    info!(
        "Wrote cluster model ({} core points) to {:?}",
        model.core_points.len(),
        path
    );
    Ok(())
}

pub fn load_model(path: impl AsRef<Path>) -> Result<FittedClusterModel> {
    let path = path.as_ref();
    let artifact: ModelArtifact<'static> = read_json(path)?;
    if artifact.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(corrupt(
            path,
            format!(
                "format version {} (expected {})",
                artifact.format_version, ARTIFACT_FORMAT_VERSION
            ),
        ));
    }

    let model = FittedClusterModel {
        eps: artifact.eps,
        min_samples: artifact.min_samples,
        core_points: artifact.core_points.into_owned(),
    };
    validate_model(&model).map_err(|reason| corrupt(path, reason))?;

    info!(
        "Loaded cluster model ({} core points, eps={:.9}) from {:?}",
        model.core_points.len(),
        model.eps,
        path
    );
    Ok(model)
}

fn validate_model(model: &FittedClusterModel) -> std::result::Result<(), String> {
    if !model.eps.is_finite() || model.eps <= 0.0 {
        return Err(format!("eps {} is not a positive radius", model.eps));
    }
    if model.min_samples < 1 {
        return Err("min_samples is 0".to_string());
    }
    for (i, core) in model.core_points.iter().enumerate() {
        if core.label < 0 {
            return Err(format!("core point {} has label {}", i, core.label));
        }
        let lat_ok = core.latitude_rad.is_finite() && core.latitude_rad.abs() <= FRAC_PI_2;
        let lon_ok = core.longitude_rad.is_finite() && core.longitude_rad.abs() <= PI;
        if !lat_ok || !lon_ok {
            return Err(format!(
                "core point {} has coordinates ({}, {}) outside radian range",
                i, core.latitude_rad, core.longitude_rad
            ));
        }
    }
    Ok(())
}

pub fn save_profiles(profiles: &ClusterProfiles, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let artifact = ProfilesArtifact {
        format_version: ARTIFACT_FORMAT_VERSION,
        profiles: Cow::Borrowed(profiles),
    };
    write_json(path, &artifact)?;
    info!("Wrote {} cluster profiles to {:?}", profiles.len(), path);
    Ok(())
}

pub fn load_profiles(path: impl AsRef<Path>) -> Result<ClusterProfiles> {
    let path = path.as_ref();
    let artifact: ProfilesArtifact<'static> = read_json(path)?;
    if artifact.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(corrupt(
            path,
            format!(
                "format version {} (expected {})",
                artifact.format_version, ARTIFACT_FORMAT_VERSION
            ),
        ));
    }

    let profiles = artifact.profiles.into_owned();
    for (&key, profile) in profiles.entries() {
        if key != profile.label {
            return Err(corrupt(
                path,
                format!("profile under key {} carries label {}", key, profile.label),
            ));
        }
        if key < 0 {
            return Err(corrupt(path, format!("profile for noise label {}", key)));
        }
        if profile.member_count == 0 {
            return Err(corrupt(path, format!("profile {} has no members", key)));
        }
    }

    info!("Loaded {} cluster profiles from {:?}", profiles.len(), path);
    Ok(profiles)
}

/// Every core label must have a profile
pub fn check_consistency(model: &FittedClusterModel, profiles: &ClusterProfiles) -> Result<()> {
    if let Some(missing) = model
        .cluster_labels()
        .into_iter()
        .find(|&l| !profiles.contains(l))
    {
        return Err(HotspotError::CorruptArtifact(format!(
            "core points reference cluster {} which has no profile",
            missing
        )));
    }
    Ok(())
}

/// Write both artifacts into `dir`
pub fn save(model: &FittedClusterModel, profiles: &ClusterProfiles, dir: impl AsRef<Path>) -> Result<()> {
    let (model_path, profiles_path) = artifact_paths(dir);
    save_model(model, model_path)?;
    save_profiles(profiles, profiles_path)
}

/// Load both artifacts from `dir` and cross-check them
pub fn load(dir: impl AsRef<Path>) -> Result<(FittedClusterModel, ClusterProfiles)> {
    let (model_path, profiles_path) = artifact_paths(dir);
    let model = load_model(model_path)?;
    let profiles = load_profiles(profiles_path)?;
    check_consistency(&model, &profiles)?;
    Ok((model, profiles))
}
