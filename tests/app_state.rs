mod common;

use std::sync::Arc;

use common::fixtures;
use common::frames::StaticFrameSource;
use common::test_key;
use common::transport::ScriptedTransport;
use stickercam_lib::config::PipelineConfig;
use stickercam_lib::frames::FrameSource;
use stickercam_lib::models::SourceMode;
use stickercam_lib::poller::TickOutcome;
use stickercam_lib::segmentation::HttpTransport;
use stickercam_lib::settings::SettingsStore;
use stickercam_lib::{AppState, SETTINGS_FILE};

async fn boot(dir: &std::path::Path, transport: Arc<ScriptedTransport>) -> AppState {
    let source: Arc<dyn FrameSource> =
        Arc::new(StaticFrameSource::streaming(fixtures::camera_frame()));
    AppState::bootstrap_with(
        dir,
        PipelineConfig::default(),
        test_key(),
        transport as Arc<dyn HttpTransport>,
        source,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn commands_write_settings_back() {
    let dir = tempfile::tempdir().unwrap();
    let app = boot(dir.path(), Arc::new(ScriptedTransport::new())).await;

    app.set_prompt("water bottle").await.unwrap();
    app.set_source_mode(SourceMode::FreshPhotoCapture).await.unwrap();
    app.set_auto_save(true).await.unwrap();
    assert_eq!(app.set_polling_interval(0.25).await.unwrap(), 1.0);

    let saved = SettingsStore::new(dir.path().join(SETTINGS_FILE))
        .unwrap()
        .poller();
    assert_eq!(saved.prompt, "water bottle");
    assert_eq!(saved.source_mode, SourceMode::FreshPhotoCapture);
    assert!(saved.auto_save_enabled);
    assert_eq!(saved.polling_interval_secs, 1.0);
    assert!(!saved.enabled);
}

#[tokio::test]
async fn saved_settings_are_applied_on_next_launch() {
    let dir = tempfile::tempdir().unwrap();
    {
        let app = boot(dir.path(), Arc::new(ScriptedTransport::new())).await;
        app.set_prompt("keys").await.unwrap();
        app.set_polling_interval(5.0).await.unwrap();
        app.start_polling().await.unwrap();
        app.shutdown().await;
    }

    let app = boot(dir.path(), Arc::new(ScriptedTransport::new())).await;
    let status = app.poller.status().await;
    assert!(status.enabled);
    assert_eq!(status.prompt, "keys");
    assert_eq!(status.polling_interval_secs, 5.0);

    let stopped = app.stop_polling().await.unwrap();
    assert!(!stopped.enabled);
    assert!(!app.settings.poller().enabled);
}

#[tokio::test]
async fn auto_saved_results_land_in_the_library() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport
        .on_post(200, &fixtures::result_body(fixtures::MASK_URL, 0.9))
        .on_get(fixtures::MASK_URL, 200, fixtures::mask_png());
    let app = boot(dir.path(), transport).await;
    app.set_prompt("mug").await.unwrap();
    app.set_auto_save(true).await.unwrap();

    assert!(matches!(app.capture_now().await, TickOutcome::Produced(_)));

    // Persistence runs in the background.
    let mut stored = Vec::new();
    for _ in 0..50 {
        stored = app.db.stickers_by_prompt("mug").await.unwrap();
        if !stored.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(stored.len(), 1);
    assert_eq!((stored[0].image_width, stored[0].image_height), (18, 18));

    app.clear_history().await;
    assert!(app.poller.history().await.is_empty());
    assert_eq!(app.db.sticker_count().await.unwrap(), 1);
}
