#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use frame_thumbnailer::config::Config;
use frame_thumbnailer::models::ThumbnailFormat;
use frame_thumbnailer::renderer::{MediaInfo, ScriptedBackend};
use frame_thumbnailer::services::{ConcurrencyGate, ThumbnailService, ThumbnailStore};

/// Default config with the disk tier rooted at `cache_dir`
pub fn test_config(cache_dir: &Path) -> Config {
    let mut config = Config::default();
    config.cache.disk_path = cache_dir.to_path_buf();
    config.cache.memory_capacity = 8;
    config.capture.output_format = ThumbnailFormat::Png;
    config
}

/// 1080p source, ten seconds long
pub fn ten_second_video() -> MediaInfo {
    MediaInfo::new(1920, 1080).with_duration(Duration::from_secs(10))
}

pub async fn build_service(config: &Config, backend: ScriptedBackend) -> ThumbnailService {
    let store = ThumbnailStore::new(&config.cache).await.unwrap();
    ThumbnailService::new(
        config,
        Arc::new(backend),
        ConcurrencyGate::new(config.render.max_concurrent_renders),
        Arc::new(store),
    )
}

/// Visible files in the disk tier directory
pub fn disk_entries(cache_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(cache_dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .filter(|name| !name.starts_with('.'))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
