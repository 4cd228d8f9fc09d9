//! Cache and resumability integration tests.

mod common;

use std::sync::Arc;

use animcard::{
    CacheStage, CodecDecoder, FrameCache, FrameRenderer, RenderJob, RenderOptions,
    ResizeFilter, ResourceGuard, SourceDecoder,
};

use common::{FaultyDecoder, animated_gif, animated_png, damage_apng_frame_data};

fn options() -> RenderOptions {
    RenderOptions::new()
        .with_canvas(12, 12)
        .with_resize_filter(ResizeFilter::Nearest)
        .with_workers(4)
}

// ── Reruns ─────────────────────────────────────────────────────────

#[test]
fn rerun_is_byte_identical_and_does_no_work() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let job = RenderJob::new(animated_gif(16, 16, 8), directory.path());

    let first_decoder = Arc::new(FaultyDecoder::new());
    let first = FrameRenderer::new(options())
        .with_decoder(first_decoder.clone())
        .render(&job)
        .expect("Failed to render cold");
    assert_eq!(first.stats.frames_decoded, 8);
    assert!(first_decoder.openings() > 0);

    let second_decoder = Arc::new(FaultyDecoder::new());
    let second = FrameRenderer::new(options())
        .with_decoder(second_decoder.clone())
        .render(&job)
        .expect("Failed to render warm");

    assert_eq!(first.frames, second.frames);
    assert_eq!(second.stats.frames_decoded, 0);
    assert_eq!(second.stats.frames_encoded, 0);
    assert_eq!(second.stats.extract_cache_hits, 8);
    assert_eq!(second.stats.encode_cache_hits, 8);
    assert_eq!(second_decoder.openings(), 0);
}

#[test]
fn cached_apng_rerun_reads_only_chunk_headers() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let source = animated_png(16, 16, &[100, 40, 250]);

    let first = FrameRenderer::new(options())
        .render(&RenderJob::new(source.clone(), directory.path()))
        .expect("Failed to render cold");
    assert_eq!(first.frames.len(), 3);
    assert_eq!(first.stats.frames_decoded, 3);

    // Pixel data no longer decodes past the default image.
    let damaged = damage_apng_frame_data(&source);
    let decoded: Vec<_> = CodecDecoder
        .frames(&damaged, &ResourceGuard::default())
        .expect("Failed to open damaged APNG")
        .collect();
    assert!(decoded.iter().any(Result::is_err));

    let second = FrameRenderer::new(options())
        .render(&RenderJob::new(damaged, directory.path()))
        .expect("Failed to render warm");
    assert_eq!(first.frames, second.frames);
    assert_eq!(second.stats.frames_decoded, 0);
    assert_eq!(second.stats.extract_cache_hits, 3);
}

#[test]
fn partial_cache_recomputes_only_missing_frames() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let job = RenderJob::new(animated_gif(16, 16, 8), directory.path());
    let renderer = FrameRenderer::new(options());

    let first = renderer.render(&job).expect("Failed to render cold");

    let cache = FrameCache::open(directory.path()).expect("Failed to open cache");
    for index in [2, 5] {
        std::fs::remove_file(cache.path_for(CacheStage::Extract, index))
            .expect("Failed to remove extract artifact");
        std::fs::remove_file(cache.path_for(CacheStage::Encode, index))
            .expect("Failed to remove encode artifact");
    }
    std::fs::remove_file(cache.path_for(CacheStage::Encode, 7))
        .expect("Failed to remove encode artifact");

    let second = renderer.render(&job).expect("Failed to render warm");

    assert_eq!(first.frames, second.frames);
    assert_eq!(second.stats.frames_decoded, 2);
    assert_eq!(second.stats.frames_encoded, 3);
    assert_eq!(second.stats.extract_cache_hits, 6);
    assert_eq!(second.stats.encode_cache_hits, 5);
}

#[test]
fn changing_stride_reuses_shared_indices() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let source = animated_gif(16, 16, 8);
    let job = RenderJob::new(source, directory.path());

    FrameRenderer::new(options().with_frame_skip(2))
        .render(&job)
        .expect("Failed to render every other frame");
    let all = FrameRenderer::new(options())
        .render(&job)
        .expect("Failed to render every frame");

    assert_eq!(all.stats.extract_cache_hits, 4);
    assert_eq!(all.stats.frames_decoded, 4);
}

// ── Layout ─────────────────────────────────────────────────────────

#[test]
fn cache_layout_is_stage_and_index() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let job = RenderJob::new(animated_gif(16, 16, 3), directory.path());
    FrameRenderer::new(options())
        .render(&job)
        .expect("Failed to render");

    for index in 0..3 {
        assert!(directory.path().join(format!("frame-{index}.png")).is_file());
        assert!(
            directory
                .path()
                .join("encoded")
                .join(format!("encoded-{index}.png"))
                .is_file()
        );
    }

    let cache = FrameCache::open(directory.path()).expect("Failed to open cache");
    assert_eq!(
        cache.cached_indices(CacheStage::Extract).unwrap(),
        vec![0, 1, 2]
    );
    assert_eq!(
        cache.cached_indices(CacheStage::Encode).unwrap(),
        vec![0, 1, 2]
    );
}

#[test]
fn presence_alone_marks_completion() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let cache = FrameCache::open(directory.path()).expect("Failed to open cache");
    cache
        .write(CacheStage::Encode, 1, b"planted")
        .expect("Failed to plant artifact");

    let job = RenderJob::new(animated_gif(16, 16, 3), directory.path());
    let output = FrameRenderer::new(options())
        .render(&job)
        .expect("Failed to render");

    assert_eq!(output.frames[1].buffer, b"planted");
    assert_eq!(output.stats.encode_cache_hits, 1);
    assert_eq!(output.stats.frames_encoded, 2);
}

#[test]
fn clear_removes_everything() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let root = directory.path().join("job");
    let job = RenderJob::new(animated_gif(16, 16, 2), &root);
    FrameRenderer::new(options())
        .render(&job)
        .expect("Failed to render");
    assert!(root.is_dir());

    FrameCache::open(&root)
        .expect("Failed to open cache")
        .clear()
        .expect("Failed to clear cache");
    assert!(!root.exists());
}

#[test]
fn scratch_jobs_do_not_collide() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let source = animated_gif(16, 16, 2);

    let first = RenderJob::in_scratch_dir(source.clone(), directory.path());
    std::thread::sleep(std::time::Duration::from_millis(2));
    let second = RenderJob::in_scratch_dir(source, directory.path());
    assert_ne!(first.cache_dir(), second.cache_dir());

    let renderer = FrameRenderer::new(options());
    renderer.render(&first).expect("Failed to render first job");
    let output = renderer.render(&second).expect("Failed to render second job");
    assert_eq!(output.stats.extract_cache_hits, 0);
}
