use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::analysis::box_cache::BoxCache;
use crate::analysis::locator::ColorRegionLocator;
use crate::analysis::TextRecognizer;
use crate::config::{
    DebugConfig, LocatorConfig, PreprocessConfig, ProcessorConfig, RecognizerConfig,
    SchedulerConfig,
};
use crate::debug::{DebugRenderer, StageRecorder};
use crate::processor::FrameProcessor;
use crate::scheduler::{CancelToken, PipelineScheduler, Progress, RunSummary};
use crate::store::JournalStore;
use crate::video::decoder::FfmpegSourceFactory;

/// Everything a run needs besides its input and output.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub locator: LocatorConfig,
    pub preprocess: PreprocessConfig,
    pub processor: ProcessorConfig,
    pub recognizer: RecognizerConfig,
    pub scheduler: SchedulerConfig,
    pub debug: DebugConfig,
}

/// Extract timer readings from `input` (path or URL) into the journal at
/// `store_path`, resuming past any frames it already holds.
pub fn run_pipeline(
    input: &str,
    store_path: &Path,
    config: &PipelineConfig,
    cancel: CancelToken,
    on_progress: &mut dyn FnMut(&Progress),
) -> Result<RunSummary> {
    config.scheduler.validate()?;

    info!(
        input,
        ?store_path,
        sampling_workers = config.scheduler.sampling_workers,
        processing_workers = config.scheduler.processing_workers,
        start_frac = config.scheduler.start_frac,
        end_frac = config.scheduler.end_frac,
        cache_boxes = config.processor.cache_boxes,
        "pipeline starting"
    );

    if let Some(dir) = &config.debug.dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create debug directory {}", dir.display()))?;
        info!(?dir, "debug frames directory ready");
    }

    let store = Arc::new(JournalStore::open(store_path).context("failed to open result store")?);
    let sources = Arc::new(FfmpegSourceFactory::new(input).context("failed to open video")?);
    let info = sources.info();
    info!(
        width = info.width,
        height = info.height,
        fps = info.fps,
        total_frames = info.total_frames,
        "video opened"
    );

    let processor = Arc::new(build_processor(config)?);
    let scheduler = PipelineScheduler::new(
        sources,
        processor,
        store.clone(),
        config.scheduler.clone(),
        cancel,
    );
    let summary = scheduler.run(on_progress)?;

    if let Err(e) = store.compact() {
        warn!(error = %e, "journal compaction failed, keeping uncompacted journal");
    }
    info!(rows = store.len(), "pipeline complete");

    Ok(summary)
}

fn build_processor(config: &PipelineConfig) -> Result<FrameProcessor> {
    let recorder = match (&config.debug.dir, config.debug.record_stages) {
        (Some(dir), true) => StageRecorder::new(dir.clone()),
        _ => StageRecorder::disabled(),
    };

    let locator = ColorRegionLocator::new(config.locator.clone(), recorder.clone());
    let recognizer = build_recognizer(&config.recognizer)?;

    let mut processor = FrameProcessor::new(
        Arc::new(locator),
        recognizer,
        config.preprocess.clone(),
    )
    .with_stage_recorder(recorder);

    if config.processor.cache_boxes {
        processor = processor.with_box_cache(Arc::new(BoxCache::new()));
    }
    if let Some(dir) = &config.debug.dir {
        let renderer = DebugRenderer::new(config.debug.font.as_deref());
        processor = processor.with_renderer(renderer, dir.clone());
    }
    Ok(processor)
}

#[cfg(feature = "tesseract")]
fn build_recognizer(config: &RecognizerConfig) -> Result<Arc<dyn TextRecognizer>> {
    use crate::analysis::recognizer::TesseractNative;

    let datapath = config
        .tessdata
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());
    let recognizer = TesseractNative::new(datapath, &config.language)
        .context("failed to initialize in-process tesseract")?;
    Ok(Arc::new(recognizer))
}

#[cfg(not(feature = "tesseract"))]
fn build_recognizer(config: &RecognizerConfig) -> Result<Arc<dyn TextRecognizer>> {
    use crate::analysis::recognizer::TesseractCli;

    info!(language = %config.language, "using tesseract executable");
    Ok(Arc::new(TesseractCli::new(
        &config.language,
        config.tessdata.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_scheduler_config_fails_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("results.journal");
        let mut config = PipelineConfig::default();
        config.scheduler.processing_workers = 0;

        let result = run_pipeline(
            "missing.mp4",
            &store_path,
            &config,
            CancelToken::new(),
            &mut |_: &Progress| {},
        );
        assert!(result.is_err());
        assert!(!store_path.exists());
    }

    #[test]
    fn processor_builds_with_debug_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            debug: DebugConfig {
                dir: Some(dir.path().to_path_buf()),
                record_stages: false,
                font: None,
            },
            ..Default::default()
        };
        assert!(build_processor(&config).is_ok());
    }
}
