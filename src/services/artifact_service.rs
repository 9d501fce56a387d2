use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::ArtifactPaths;
use crate::models::{ModelArtifact, ScalerArtifact};
use crate::services::inference_service::{ContextError, InferenceContext};
use crate::state::ModelStatus;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact file not found: {0}")]
    Missing(PathBuf),
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("artifacts are incompatible: {0}")]
    Incompatible(#[from] ContextError),
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::Missing(path.to_path_buf()));
    }
    let bytes = fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let bytes = serde_json::to_vec(value).map_err(|source| ArtifactError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, bytes).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Deserialize both artifacts and pair them into an inference context.
pub fn load_inference_context(
    paths: &ArtifactPaths,
    window_size: usize,
) -> Result<InferenceContext, ArtifactError> {
    let model: ModelArtifact = read_json(&paths.model_path)?;
    let scaler: ScalerArtifact = read_json(&paths.scaler_path)?;
    Ok(InferenceContext::from_artifacts(model, scaler, window_size)?)
}

/// Resolve the startup transition `Unloaded -> Loaded | LoadFailed`.
/// Never fails: a broken artifact set degrades the service instead of stopping it.
pub fn load_model_status(paths: &ArtifactPaths, window_size: usize) -> ModelStatus {
    info!(
        "Loading artifacts: model={} scaler={}",
        paths.model_path.display(),
        paths.scaler_path.display()
    );

    match load_inference_context(paths, window_size) {
        Ok(ctx) => {
            info!(
                "✅ Artifacts loaded (training run {}, ticker {}, window {})",
                ctx.metadata().training_run_id,
                ctx.metadata().ticker,
                ctx.window_size()
            );
            ModelStatus::Loaded(ctx)
        }
        Err(ArtifactError::Missing(path)) => {
            warn!(
                "Artifact {} not found. Run the train_model binary first.",
                path.display()
            );
            ModelStatus::LoadFailed(format!("artifact not found: {}", path.display()))
        }
        Err(e) => {
            error!("❌ Failed to load artifacts: {}", e);
            ModelStatus::LoadFailed(e.to_string())
        }
    }
}

pub fn save_artifacts(
    paths: &ArtifactPaths,
    model: &ModelArtifact,
    scaler: &ScalerArtifact,
) -> Result<(), ArtifactError> {
    write_json(&paths.model_path, model)?;
    info!("Saved model to {}", paths.model_path.display());
    write_json(&paths.scaler_path, scaler)?;
    info!("Saved scaler to {}", paths.scaler_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::inference_service::tests::test_artifacts;
    use crate::services::lstm::{LstmConfig, LstmModel, ModelError};
    use uuid::Uuid;

    fn temp_paths() -> (PathBuf, ArtifactPaths) {
        let dir = std::env::temp_dir().join(format!("stock-lstm-artifacts-{}", Uuid::new_v4()));
        let paths = ArtifactPaths {
            model_path: dir.join("models").join("model.json"),
            scaler_path: dir.join("models").join("scaler.json"),
        };
        (dir, paths)
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let (dir, paths) = temp_paths();
        let (model, scaler) = test_artifacts(60);
        let prices: Vec<f64> = (0..60).map(|i| 120.0 + i as f64).collect();
        let expected = InferenceContext::from_artifacts(model.clone(), scaler.clone(), 60)
            .unwrap()
            .predict(&prices)
            .unwrap();

        save_artifacts(&paths, &model, &scaler).unwrap();
        let status = load_model_status(&paths, 60);

        assert!(status.is_loaded());
        let ctx = status.context().unwrap();
        assert_eq!(ctx.metadata().training_run_id, model.metadata.training_run_id);
        assert_eq!(ctx.predict(&prices).unwrap(), expected);

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_artifacts_fail_to_load() {
        let (_, paths) = temp_paths();
        let status = load_model_status(&paths, 60);
        assert!(matches!(status, ModelStatus::LoadFailed(_)));
        assert!(matches!(
            load_inference_context(&paths, 60),
            Err(ArtifactError::Missing(_))
        ));
    }

    #[test]
    fn test_corrupt_artifact_fails_to_load() {
        let (dir, paths) = temp_paths();
        let (model, scaler) = test_artifacts(60);
        save_artifacts(&paths, &model, &scaler).unwrap();
        fs::write(&paths.scaler_path, b"not json").unwrap();

        assert!(matches!(
            load_inference_context(&paths, 60),
            Err(ArtifactError::Corrupt { .. })
        ));
        assert!(!load_model_status(&paths, 60).is_loaded());

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_artifacts_from_different_runs_fail_to_load() {
        let (dir, paths) = temp_paths();
        let (model, _) = test_artifacts(60);
        let (_, scaler) = test_artifacts(60);
        save_artifacts(&paths, &model, &scaler).unwrap();

        assert!(matches!(
            load_inference_context(&paths, 60),
            Err(ArtifactError::Incompatible(ContextError::RunMismatch { .. }))
        ));

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_inconsistent_model_weights_fail_to_load() {
        let (dir, paths) = temp_paths();
        let (model, scaler) = test_artifacts(60);
        save_artifacts(&paths, &model, &scaler).unwrap();

        // Valid JSON, but the layers belong to a narrower network.
        let narrow = LstmModel::new(
            LstmConfig::default()
                .with_lstm_units(vec![3])
                .with_dense_units(vec![2])
                .with_dropout(0.0),
        )
        .unwrap();
        let narrow_json = serde_json::to_value(&narrow).unwrap();
        let mut saved: serde_json::Value =
            serde_json::from_slice(&fs::read(&paths.model_path).unwrap()).unwrap();
        saved["model"]["layers"] = narrow_json["layers"].clone();
        fs::write(&paths.model_path, serde_json::to_vec(&saved).unwrap()).unwrap();

        assert!(matches!(
            load_inference_context(&paths, 60),
            Err(ArtifactError::Incompatible(ContextError::InvalidModel(
                ModelError::InvalidShape(_)
            )))
        ));
        assert!(matches!(load_model_status(&paths, 60), ModelStatus::LoadFailed(_)));

        fs::remove_dir_all(dir).ok();
    }
}
