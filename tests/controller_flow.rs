mod common;

use common::{controller_with, standard_fetcher};
use proptest::prelude::*;
use serde_json::json;
use sounity::audio::filters::FilterKind;
use sounity::audio::{AddFilter, FilterChainCapable, RemoveFilter, SoundOptions, StartRequest};
use sounity::{Controller, Error, SoundState};

fn create_ready(controller: &mut Controller, identifier: &str, url: &str) {
    controller
        .create_sound(identifier, url, &SoundOptions::default())
        .unwrap();
}

fn source_position(controller: &Controller, identifier: &str) -> f64 {
    let sound = controller.sound(identifier).unwrap();
    controller
        .context()
        .source(sound.source_node().unwrap())
        .unwrap()
        .position()
}

fn register_filters(controller: &mut Controller) {
    for (name, frequency) in [("lp", 800), ("hp", 200), ("band", 1000), ("notch", 60)] {
        controller
            .create_filter(name, FilterKind::Parametric, json!({ "frequency": frequency }))
            .unwrap();
    }
    for name in ["hall", "cave"] {
        controller
            .create_filter(name, FilterKind::Convolution, json!({ "url": "ir/room.wav" }))
            .unwrap();
    }
}

const FILTER_NAMES: [&str; 6] = ["lp", "hp", "band", "notch", "hall", "cave"];

#[tokio::test]
async fn duplicate_create_keeps_first_sound() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    create_ready(&mut controller, "a", "tone10.wav");
    let err = controller
        .create_sound("a", "blip.wav", &SoundOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateIdentifier(_)));

    assert!(controller.settle(&mut events).await.is_empty());
    let sound = controller.sound("a").unwrap();
    assert_eq!(sound.url(), "tone10.wav");
    assert_eq!(sound.state(), SoundState::Ready);
    assert_eq!(sound.duration(), Some(10.0));
}

#[tokio::test]
async fn late_join_past_the_end_does_not_play() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    create_ready(&mut controller, "a", "tone10.wav");
    controller.settle(&mut events).await;

    let request = StartRequest {
        offset_ms: Some(12000.0),
        ..Default::default()
    };
    controller.start_sound("a", request).unwrap();
    assert_eq!(controller.sound("a").unwrap().state(), SoundState::Ready);
}

#[tokio::test]
async fn late_join_wraps_a_looping_sound() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    let options = SoundOptions {
        looping: Some(true),
        ..Default::default()
    };
    controller.create_sound("a", "tone10.wav", &options).unwrap();
    controller.settle(&mut events).await;

    let request = StartRequest {
        offset_ms: Some(25000.0),
        looping: Some(false),
        ..Default::default()
    };
    controller.start_sound("a", request).unwrap();
    let sound = controller.sound("a").unwrap();
    assert_eq!(sound.state(), SoundState::Playing);
    assert!(!sound.looping());
    assert!((source_position(&controller, "a") - 5.0).abs() < 1e-3);
    let source = controller
        .context()
        .source(sound.source_node().unwrap())
        .unwrap();
    assert!(!source.looping());
}

#[tokio::test]
async fn late_join_does_not_wrap_when_only_the_request_loops() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    create_ready(&mut controller, "a", "tone10.wav");
    controller.settle(&mut events).await;

    let request = StartRequest {
        offset_ms: Some(25000.0),
        looping: Some(true),
        ..Default::default()
    };
    controller.start_sound("a", request).unwrap();
    assert_eq!(controller.sound("a").unwrap().state(), SoundState::Ready);
}

#[tokio::test]
async fn start_during_setup_runs_once_loaded() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    create_ready(&mut controller, "a", "tone10.wav");
    controller.start_sound("a", StartRequest::default()).unwrap();
    assert_eq!(controller.sound("a").unwrap().state(), SoundState::Setup);

    controller.settle(&mut events).await;
    assert_eq!(controller.sound("a").unwrap().state(), SoundState::Playing);
}

#[tokio::test]
async fn missing_asset_makes_later_calls_no_ops() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    create_ready(&mut controller, "a", "missing.wav");
    controller.settle(&mut events).await;

    assert_eq!(controller.sound("a").unwrap().state(), SoundState::Error);
    controller.start_sound("a", StartRequest::default()).unwrap();
    controller.stop_sound("a").unwrap();
    assert_eq!(controller.sound("a").unwrap().state(), SoundState::Error);
}

#[tokio::test]
async fn volume_bounds() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    create_ready(&mut controller, "a", "tone10.wav");
    controller.settle(&mut events).await;

    for bad in [-0.1, 1.5] {
        assert!(matches!(
            controller.set_sound_volume("a", bad),
            Err(Error::InvalidArgument(_))
        ));
    }
    controller.set_sound_volume("a", 0.0).unwrap();
    controller.set_sound_volume("a", 1.0).unwrap();
    assert_eq!(controller.sound("a").unwrap().volume(), 1.0);
    assert!(matches!(
        controller.set_sound_volume("ghost", 0.5),
        Err(Error::UnknownIdentifier(_))
    ));
}

#[tokio::test]
async fn rotate_is_stable_under_repetition() {
    let (mut controller, _events) = controller_with(standard_fetcher());
    create_ready(&mut controller, "a", "tone10.wav");

    controller.rotate_sound("a", 10.0, 45.0, -30.0).unwrap();
    let first = controller.sound("a").unwrap().orientation();
    for _ in 0..5 {
        controller.rotate_sound("a", 10.0, 45.0, -30.0).unwrap();
    }
    assert_eq!(controller.sound("a").unwrap().orientation(), first);

    controller.rotate_listener(0.0, 90.0, 0.0);
    let listener = controller.listener().orientation();
    controller.rotate_listener(0.0, 90.0, 0.0);
    assert_eq!(controller.listener().orientation(), listener);
}

#[tokio::test]
async fn dispose_sound_removes_it_once() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    create_ready(&mut controller, "a", "tone10.wav");
    controller.settle(&mut events).await;
    let nodes_before = controller.context().node_count();

    controller.dispose_sound("a").unwrap();
    assert!(controller.sound("a").is_none());
    assert!(controller.context().node_count() < nodes_before);
    assert!(matches!(
        controller.dispose_sound("a"),
        Err(Error::UnknownIdentifier(_))
    ));

    // The identifier is free again.
    create_ready(&mut controller, "a", "blip.wav");
    controller.settle(&mut events).await;
    assert_eq!(controller.sound("a").unwrap().state(), SoundState::Ready);

    controller.dispose();
    controller.dispose();
    assert!(controller.context().is_closed());
}

#[tokio::test]
async fn removing_unknown_filter_leaves_chain_alone() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    register_filters(&mut controller);
    create_ready(&mut controller, "a", "tone10.wav");
    controller.settle(&mut events).await;

    assert_eq!(controller.add_sound_filter("a", "lp").unwrap(), AddFilter::Spliced);
    assert!(matches!(
        controller.remove_sound_filter("a", "hp"),
        Err(Error::UnknownFilter(_))
    ));
    assert_eq!(controller.sound("a").unwrap().chain().names(), vec!["lp"]);
    assert!(matches!(
        controller.add_sound_filter("a", "nope"),
        Err(Error::UnknownFilterDescriptor(_))
    ));
}

#[tokio::test]
async fn second_removal_behind_an_add_fails() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    register_filters(&mut controller);
    create_ready(&mut controller, "a", "tone10.wav");
    controller.settle(&mut events).await;

    assert!(matches!(
        controller.add_sound_filter("a", "hall").unwrap(),
        AddFilter::Pending(_)
    ));
    assert_eq!(
        controller.remove_sound_filter("a", "hall").unwrap(),
        RemoveFilter::Queued
    );
    assert_eq!(
        controller.remove_sound_filter("a", "hall").unwrap(),
        RemoveFilter::Queued
    );

    let errors = controller.settle(&mut events).await;
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], Error::UnknownFilter(_)));
    let sound = controller.sound("a").unwrap();
    assert!(sound.chain().is_empty());
    assert!(!sound.chain().has_pending());
}

#[tokio::test]
async fn listener_convolution_filter() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    register_filters(&mut controller);

    assert!(matches!(
        controller.add_listener_filter("hall").unwrap(),
        AddFilter::Pending(_)
    ));
    assert!(controller.settle(&mut events).await.is_empty());
    assert_eq!(controller.output().chain().names(), vec!["hall"]);

    let destination = controller.context().destination();
    let stage = controller.output().chain().stage_nodes()[0];
    assert!(controller.context().is_connected(stage, destination));
}

#[tokio::test]
async fn tick_reports_only_finished_sounds() {
    let (mut controller, mut events) = controller_with(standard_fetcher());
    create_ready(&mut controller, "a", "blip.wav");
    create_ready(&mut controller, "b", "tone10.wav");
    controller.settle(&mut events).await;
    controller.start_sound("a", StartRequest::default()).unwrap();
    controller.start_sound("b", StartRequest::default()).unwrap();

    let mut ended = Vec::new();
    for _ in 0..10 {
        let report = controller.tick(0.016);
        assert!(report.failures.is_empty());
        ended.extend(report.ended);
        controller.render(128);
    }
    assert_eq!(ended, vec!["a".to_string()]);
    assert_eq!(controller.sound("b").unwrap().state(), SoundState::Playing);
}

#[derive(Debug, Clone)]
enum Step {
    Add(usize),
    Remove(usize),
    Settle,
}

/// Every chosen filter is added once and removed once later, with settles
/// sprinkled in between.
fn paired_steps() -> impl Strategy<Value = Vec<Step>> {
    (
        proptest::sample::subsequence((0..FILTER_NAMES.len()).collect::<Vec<_>>(), 1..=FILTER_NAMES.len()),
        proptest::collection::vec(any::<bool>(), 12),
    )
        .prop_flat_map(|(names, settles)| {
            let tokens: Vec<usize> = names.iter().chain(names.iter()).copied().collect();
            (Just(tokens).prop_shuffle(), Just(settles))
        })
        .prop_map(|(tokens, settles)| {
            let mut seen = [false; FILTER_NAMES.len()];
            let mut steps = Vec::new();
            for (i, name) in tokens.into_iter().enumerate() {
                if seen[name] {
                    steps.push(Step::Remove(name));
                } else {
                    seen[name] = true;
                    steps.push(Step::Add(name));
                }
                if settles.get(i).copied().unwrap_or(false) {
                    steps.push(Step::Settle);
                }
            }
            steps
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn paired_add_remove_leaves_empty_chain(steps in paired_steps()) {
        tokio_test::block_on(async {
            let (mut controller, mut events) = controller_with(standard_fetcher());
            register_filters(&mut controller);
            create_ready(&mut controller, "a", "tone10.wav");
            controller.settle(&mut events).await;

            for step in &steps {
                match step {
                    Step::Add(i) => {
                        controller.add_sound_filter("a", FILTER_NAMES[*i]).unwrap();
                    }
                    Step::Remove(i) => {
                        controller.remove_sound_filter("a", FILTER_NAMES[*i]).unwrap();
                    }
                    Step::Settle => {
                        assert!(controller.settle(&mut events).await.is_empty());
                    }
                }
            }
            assert!(controller.settle(&mut events).await.is_empty());

            let sound = controller.sound("a").unwrap();
            assert!(sound.chain().is_empty());
            assert!(!sound.chain().has_pending());
            let raw = sound.output_node().unwrap();
            let bus = controller.output().input().unwrap();
            assert!(controller.context().is_connected(raw, bus));
            assert_eq!(controller.context().outputs(raw), vec![bus]);
        });
    }
}
