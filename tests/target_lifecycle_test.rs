#![cfg(feature = "integration-tests")]

mod common;

use pbr_ngin::{
    Context, FrameState, RenderConfig, RenderError, RenderFlags, RenderMode, RenderOutput,
    targets::{GpuTargetAllocator, RenderTargetManager, TargetKind},
};

use crate::common::test_utils::{cube_scene, renderer};

#[test]
fn main_targets_follow_the_viewport() {
    let Some(mut renderer) = renderer(RenderConfig {
        flags: RenderFlags::FLAT,
        ..Default::default()
    }) else {
        return;
    };
    let cube = cube_scene([1.0, 0.0, 0.0, 1.0]);

    let RenderOutput::Color(image) = renderer.render(&cube.scene, (16, 16), RenderMode::Color).unwrap() else {
        panic!("expected a colour image");
    };
    assert_eq!((image.width(), image.height()), (16, 16));
    assert_eq!(renderer.live_targets(), 1);

    let RenderOutput::Color(image) = renderer.render(&cube.scene, (40, 12), RenderMode::Color).unwrap() else {
        panic!("expected a colour image");
    };
    assert_eq!((image.width(), image.height()), (40, 12));
    assert_eq!(renderer.live_targets(), 1);
}

#[test]
fn failed_frames_return_to_idle() {
    let Some(mut renderer) = renderer(RenderConfig::default()) else {
        return;
    };
    let cube = cube_scene([1.0; 4]);

    let err = renderer.render(&cube.scene, (0, 16), RenderMode::Color).unwrap_err();
    assert!(matches!(err, RenderError::TargetAllocation { width: 0, .. }), "{err}");
    assert_eq!(renderer.state(), FrameState::Idle);

    assert!(renderer.render(&cube.scene, (16, 16), RenderMode::Depth).is_ok());
}

#[test]
fn teardown_frees_everything() {
    let Some(mut renderer) = renderer(RenderConfig::default()) else {
        return;
    };
    let cube = cube_scene([1.0; 4]);
    renderer.render(&cube.scene, (16, 16), RenderMode::Pick).unwrap();
    assert!(renderer.live_targets() > 0);

    renderer.teardown();
    assert_eq!(renderer.live_targets(), 0);
    assert_eq!(renderer.shader_count(), 0);
    assert!(matches!(
        renderer.render(&cube.scene, (16, 16), RenderMode::Pick),
        Err(RenderError::TornDown)
    ));
}

#[test]
fn gpu_targets_reject_double_release() {
    let context = match Context::headless() {
        Ok(context) => context,
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            return;
        }
    };
    let mut targets = RenderTargetManager::new(GpuTargetAllocator::new(context.device.clone()));
    targets.begin_frame();
    let id = targets.acquire(TargetKind::ColorDepth, 8, 8).unwrap();
    targets.resize(id, 16, 4).unwrap();
    assert_eq!(targets.get(id).map(|t| (t.width, t.height)), Some((16, 4)));
    assert_eq!(targets.live_count(), 1);

    targets.release(id).unwrap();
    assert!(matches!(targets.release(id), Err(RenderError::DoubleRelease(_))));
    assert_eq!(targets.live_count(), 0);
}
