//! Model asset loading: every corrupt or mismatched blob is a startup error.

use std::io::Write;

use kws_edge::models::{InferenceEngine, ModelLoadError, QuantizedModel, CLASS_COUNT};
use kws_edge::features::FeatureVector;
use kws_edge::{KwsConfig, KwsError};

fn config_for(path: &std::path::Path, feature_size: usize) -> KwsConfig {
    let mut config = KwsConfig::default();
    config.features.feature_size = feature_size;
    config.model.model_path = Some(path.to_path_buf());
    config
}

fn write_blob(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_model_loading() {
    let model = QuantizedModel::demo(64, CLASS_COUNT, 11).unwrap();
    let file = write_blob(&model.encode());

    let config = config_for(file.path(), 64);
    let mut engine = InferenceEngine::from_config(&config).expect("model should load");
    assert!(engine.arena_requirement() <= engine.arena_capacity());

    let features = FeatureVector::from_values((0..64).map(|i| (i as f32 / 32.0) - 1.0).collect());
    let first = engine.classify(&features, 0).unwrap();
    let second = engine.classify(&features, 0).unwrap();
    assert_eq!(first, second);
    assert!((first.scores.iter().sum::<f32>() - 1.0).abs() < 1e-4);
}

#[test]
fn test_missing_file_is_fatal() {
    let config = config_for(std::path::Path::new("/no/such/model.kwsq"), 64);
    let err = KwsError::from(InferenceEngine::from_config(&config).unwrap_err());
    assert!(err.is_fatal());
    assert!(matches!(err, KwsError::ModelLoad(ModelLoadError::Io { .. })));
}

#[test]
fn test_corrupt_file_is_rejected() {
    let mut bytes = QuantizedModel::demo(64, CLASS_COUNT, 11).unwrap().encode();
    let last_weight = bytes.len() - 4 - 4 * CLASS_COUNT - 1;
    bytes[last_weight] = bytes[last_weight].wrapping_add(1);
    let file = write_blob(&bytes);

    assert!(matches!(
        InferenceEngine::from_config(&config_for(file.path(), 64)),
        Err(ModelLoadError::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_foreign_file_is_rejected() {
    let file = write_blob(b"TFL3 definitely not ours");
    assert!(matches!(
        InferenceEngine::from_config(&config_for(file.path(), 64)),
        Err(ModelLoadError::BadMagic)
    ));
}

#[test]
fn test_model_must_match_feature_size() {
    let file = write_blob(&QuantizedModel::demo(64, CLASS_COUNT, 11).unwrap().encode());
    assert!(matches!(
        InferenceEngine::from_config(&config_for(file.path(), 128)),
        Err(ModelLoadError::ShapeMismatch(_))
    ));
}

#[test]
fn test_model_must_fit_the_arena() {
    let file = write_blob(&QuantizedModel::demo(1024, CLASS_COUNT, 11).unwrap().encode());
    let mut config = config_for(file.path(), 1024);
    config.model.arena_size = 512;
    assert!(matches!(
        InferenceEngine::from_config(&config),
        Err(ModelLoadError::ArenaTooSmall {
            required: 1056,
            capacity: 512
        })
    ));
}
