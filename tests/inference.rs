//! Caption engine construction tests. No network access is needed.

#![cfg(feature = "remote")]

use std::time::Duration;

use image::RgbImage;

use scenecap::{
    CaptionBackend, CaptionEngine, InferenceConfig, RemoteCaptionEngine, ScenecapError,
    build_engine,
};

#[test]
fn remote_engine_uses_backend_default_model() {
    let engine = RemoteCaptionEngine::new(CaptionBackend::VitGpt2, "http://localhost:9/caption");
    assert_eq!(engine.backend(), CaptionBackend::VitGpt2);
    assert_eq!(engine.model(), "nlpconnect/vit-gpt2-image-captioning");
    assert_eq!(engine.name(), "remote-vit_gpt2");
    assert!(!engine.is_loaded());
}

#[test]
fn caption_before_load_is_rejected() {
    let engine = RemoteCaptionEngine::new(CaptionBackend::Blip2, "http://localhost:9/caption");
    assert!(matches!(
        engine.caption(&RgbImage::new(8, 8)),
        Err(ScenecapError::EngineNotLoaded(_))
    ));
}

#[test]
fn load_is_idempotent() {
    let mut engine = RemoteCaptionEngine::new(CaptionBackend::Llava, "http://localhost:9/caption")
        .with_timeout(Duration::from_secs(1));
    engine.load().unwrap();
    engine.load().unwrap();
    assert!(engine.is_loaded());
}

#[test]
fn unreachable_server_is_an_inference_error() {
    let mut engine = RemoteCaptionEngine::new(CaptionBackend::Blip2, "http://127.0.0.1:9/caption")
        .with_timeout(Duration::from_secs(2));
    engine.load().unwrap();
    assert!(matches!(
        engine.caption(&RgbImage::new(8, 8)),
        Err(ScenecapError::InferenceError(_))
    ));
}

#[test]
fn build_engine_requires_endpoint() {
    assert!(matches!(
        build_engine(&InferenceConfig::default()),
        Err(ScenecapError::InvalidConfiguration(_))
    ));
}

#[test]
fn build_engine_applies_model_override() {
    let config = InferenceConfig {
        backend: CaptionBackend::Llava,
        endpoint: Some("http://localhost:9/caption".to_string()),
        model: Some("llava-hf/llava-1.5-13b-hf".to_string()),
        timeout_secs: 5,
    };
    let engine = build_engine(&config).unwrap();
    assert_eq!(engine.name(), "remote-llava");
    assert!(!engine.is_loaded());
}
