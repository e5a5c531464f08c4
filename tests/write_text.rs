mod common;

use std::time::Duration;

use braille_coordinator_lib::sim::{SimulatedDevice, WriteReply};
use braille_coordinator_lib::{CancelToken, CharOutcome, DeviceError};
use common::{config, connected, sim_with, write, writes};

#[tokio::test]
async fn single_device_word_pair_reuses_its_modules() {
    let sim = sim_with(&[("sim0", SimulatedDevice::default())]);
    let coordinator = connected(config(&["sim0"], 20), &sim).await;

    let result = coordinator.write_text("ab cd").await.unwrap();

    assert_eq!(result.total, 5);
    assert_eq!(result.succeeded, 4);
    assert_eq!(result.paused, 1);
    assert_eq!(result.failed, 0);
    assert!(!result.cancelled);
    // four holds plus the pause
    assert!(result.elapsed_ms >= 5 * 20, "elapsed {} ms", result.elapsed_ms);
    assert_eq!(
        writes(&sim),
        vec![
            write("sim0", 0, 'a'),
            write("sim0", 1, 'b'),
            write("sim0", 0, 'c'),
            write("sim0", 1, 'd'),
        ]
    );
}

#[tokio::test]
async fn characters_round_robin_over_devices() {
    let sim = sim_with(&[
        ("sim0", SimulatedDevice::default()),
        ("sim1", SimulatedDevice::default()),
        ("sim2", SimulatedDevice::default()),
    ]);
    let coordinator = connected(config(&["sim0", "sim1", "sim2"], 10), &sim).await;

    let result = coordinator.write_text("abcdefg").await.unwrap();

    assert_eq!(result.succeeded, 7);
    assert_eq!(
        writes(&sim),
        vec![
            write("sim0", 0, 'a'),
            write("sim0", 1, 'b'),
            write("sim1", 0, 'c'),
            write("sim1", 1, 'd'),
            write("sim2", 0, 'e'),
            write("sim2", 1, 'f'),
            write("sim0", 0, 'g'),
        ]
    );
}

#[tokio::test]
async fn missing_device_hands_its_slots_to_the_next_live_one() {
    // sim1 is configured but never answers
    let sim = sim_with(&[
        ("sim0", SimulatedDevice::default()),
        ("sim2", SimulatedDevice::default()),
    ]);
    let coordinator = connected(config(&["sim0", "sim1", "sim2"], 10), &sim).await;
    assert_eq!(coordinator.registry().live_indices(), vec![0, 2]);

    let result = coordinator.write_text("abcd").await.unwrap();

    assert_eq!(result.succeeded, 4);
    assert_eq!(
        writes(&sim),
        vec![
            write("sim0", 0, 'a'),
            write("sim0", 1, 'b'),
            write("sim2", 0, 'c'),
            write("sim2", 1, 'd'),
        ]
    );
}

#[tokio::test]
async fn dead_first_device_leaves_both_others_in_rotation() {
    let sim = sim_with(&[
        ("sim1", SimulatedDevice::default()),
        ("sim2", SimulatedDevice::default()),
    ]);
    let coordinator = connected(config(&["sim0", "sim1", "sim2"], 10), &sim).await;
    assert_eq!(coordinator.registry().live_indices(), vec![1, 2]);

    let result = coordinator.write_text("abcdefgh").await.unwrap();

    assert_eq!(result.succeeded, 8);
    assert_eq!(
        writes(&sim),
        vec![
            write("sim1", 0, 'a'),
            write("sim1", 1, 'b'),
            write("sim1", 0, 'c'),
            write("sim1", 1, 'd'),
            write("sim2", 0, 'e'),
            write("sim2", 1, 'f'),
            write("sim1", 0, 'g'),
            write("sim1", 1, 'h'),
        ]
    );
}

#[tokio::test]
async fn whitespace_pauses_for_the_display_duration() {
    let sim = sim_with(&[("sim0", SimulatedDevice::default())]);
    let coordinator = connected(config(&["sim0"], 50), &sim).await;

    let result = coordinator.write_text("   ").await.unwrap();

    assert_eq!(result.paused, 3);
    assert!(result.elapsed_ms >= 3 * 50, "elapsed {} ms", result.elapsed_ms);
    assert!(writes(&sim).is_empty());
}

#[tokio::test]
async fn unsupported_characters_cost_no_time() {
    let sim = sim_with(&[("sim0", SimulatedDevice::default())]);
    let coordinator = connected(config(&["sim0"], 500), &sim).await;

    let result = coordinator.write_text("!!!").await.unwrap();

    assert_eq!(result.skipped, 3);
    assert!(result.elapsed_ms < 250, "elapsed {} ms", result.elapsed_ms);
    assert!(writes(&sim).is_empty());
}

#[tokio::test]
async fn uppercase_and_unsupported_characters() {
    let sim = sim_with(&[("sim0", SimulatedDevice::default())]);
    let coordinator = connected(config(&["sim0"], 10), &sim).await;

    let result = coordinator.write_text("Hi!\r\n").await.unwrap();

    // 'h', 'i', '!', then CRLF collapsed into one pause
    assert_eq!(result.total, 4);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.paused, 1);
    assert_eq!(writes(&sim), vec![write("sim0", 0, 'h'), write("sim0", 1, 'i')]);
}

#[tokio::test]
async fn empty_text_is_an_empty_job() {
    let sim = sim_with(&[("sim0", SimulatedDevice::default())]);
    let coordinator = connected(config(&["sim0"], 10), &sim).await;

    let result = coordinator.write_text("").await.unwrap();
    assert_eq!(result.total, 0);
    assert_eq!(result.processed(), 0);
    assert!(writes(&sim).is_empty());
}

#[tokio::test]
async fn no_live_device_refuses_the_job() {
    let sim = sim_with(&[]);
    let coordinator = connected(config(&["sim0", "sim1"], 10), &sim).await;
    assert_eq!(coordinator.registry().live_count(), 0);

    let err = coordinator.write_text("x").await.unwrap_err();
    assert!(matches!(err, DeviceError::NoLiveDevice));
}

#[tokio::test]
async fn no_live_device_skips_when_not_required() {
    let sim = sim_with(&[]);
    let mut config = config(&["sim0"], 10);
    config.require_live_device = false;
    let coordinator = connected(config, &sim).await;

    let result = coordinator.write_text("x").await.unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.succeeded, 0);
}

#[tokio::test]
async fn device_error_fails_the_character_but_keeps_the_device() {
    let sim = sim_with(&[(
        "sim0",
        SimulatedDevice::default().write_reply(WriteReply::Error("JAMMED".to_string())),
    )]);
    let coordinator = connected(config(&["sim0"], 10), &sim).await;
    let mut progress = coordinator.subscribe_progress();

    let result = coordinator.write_text("a").await.unwrap();

    assert_eq!(result.failed, 1);
    assert_eq!(result.succeeded, 0);
    assert!(coordinator.registry().is_live(0));
    let event = progress.try_recv().unwrap();
    assert_eq!(event.outcome, CharOutcome::DeviceError("JAMMED".to_string()));
}

#[tokio::test]
async fn silent_device_is_unconfirmed_not_failed() {
    let sim = sim_with(&[(
        "sim0",
        SimulatedDevice::default().write_reply(WriteReply::Silent),
    )]);
    let coordinator = connected(config(&["sim0"], 10), &sim).await;

    let result = coordinator.write_text("ab").await.unwrap();

    assert_eq!(result.unconfirmed, 2);
    assert_eq!(result.failed, 0);
    assert!(coordinator.registry().is_live(0));
}

#[tokio::test]
async fn lost_device_mid_job_is_demoted_and_job_continues() {
    let sim = sim_with(&[
        ("sim0", SimulatedDevice::default().drop_link_after(1)),
        ("sim1", SimulatedDevice::default()),
    ]);
    let coordinator = connected(config(&["sim0", "sim1"], 10), &sim).await;

    let result = coordinator.write_text("abcd").await.unwrap();

    assert_eq!(result.succeeded, 3);
    assert_eq!(result.failed, 1);
    assert!(!coordinator.registry().is_live(0));
    assert!(coordinator.registry().is_live(1));
    assert_eq!(
        writes(&sim),
        vec![
            write("sim0", 0, 'a'),
            write("sim1", 0, 'c'),
            write("sim1", 1, 'd'),
        ]
    );
}

#[tokio::test]
async fn actuations_never_overlap() {
    let device = SimulatedDevice::default().hold_for(Duration::from_millis(15));
    let sim = sim_with(&[("sim0", device.clone()), ("sim1", device)]);
    let coordinator = connected(config(&["sim0", "sim1"], 40), &sim).await;

    let result = coordinator.write_text("abcd").await.unwrap();

    assert_eq!(result.succeeded, 4);
    assert!(result.elapsed_ms >= 4 * 40, "elapsed {} ms", result.elapsed_ms);
    assert_eq!(sim.peak_energized(), 1);
    assert!(!sim.journal().has_overlap());
}

#[tokio::test]
async fn concurrent_jobs_are_serialized() {
    let device = SimulatedDevice::default().hold_for(Duration::from_millis(10));
    let sim = sim_with(&[("sim0", device.clone()), ("sim1", device)]);
    let coordinator = connected(config(&["sim0", "sim1"], 20), &sim).await;

    let (first, second) = tokio::join!(
        coordinator.write_text("abc"),
        coordinator.write_text("xyz")
    );

    assert_eq!(first.unwrap().succeeded, 3);
    assert_eq!(second.unwrap().succeeded, 3);
    assert_eq!(sim.peak_energized(), 1);
    assert!(!sim.journal().has_overlap());
}

#[tokio::test]
async fn cancellation_returns_partial_result() {
    let sim = sim_with(&[("sim0", SimulatedDevice::default())]);
    let coordinator = connected(config(&["sim0"], 200), &sim).await;
    let cancel = CancelToken::new();

    let (result, _) = tokio::join!(coordinator.write_text_cancellable("abcdef", &cancel), async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
    });
    let result = result.unwrap();

    assert!(result.cancelled);
    assert!(result.processed() < 6);
    assert!(result.processed() >= 1);
    assert_eq!(writes(&sim).len(), result.succeeded);
}

#[tokio::test]
async fn progress_events_cover_each_position_once() {
    let sim = sim_with(&[("sim0", SimulatedDevice::default())]);
    let coordinator = connected(config(&["sim0"], 10), &sim).await;
    let mut progress = coordinator.subscribe_progress();

    let result = coordinator.write_text("hi 1").await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = progress.try_recv() {
        events.push(event);
    }
    let positions: Vec<usize> = events.iter().map(|e| e.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);
    assert!(events.iter().all(|e| e.job_id == result.job_id && e.total == 4));
    assert_eq!(events[0].device, Some(0));
    assert_eq!(events[1].module, Some(1));
    assert_eq!(events[2].outcome, CharOutcome::Pause);
    assert_eq!(events[3].outcome, CharOutcome::Unsupported);
    assert_eq!(events[3].device, None);
}

#[tokio::test]
async fn estimate_counts_pauses_but_not_unsupported() {
    let sim = sim_with(&[]);
    let coordinator = connected(config(&["sim0"], 100), &sim).await;

    assert_eq!(coordinator.estimate_duration("ab cd!"), Duration::from_millis(500));
    assert_eq!(coordinator.estimate_duration(""), Duration::ZERO);
}
