//! End-to-end scenarios over the public `Engine` API (§8): self-match,
//! a sub-window snippet match, noise rejection and time-stretch
//! tolerance. All fixtures are synthesized in-process with `hound`;
//! nothing here touches the network or shells out to an external
//! decoder.

mod common;

use acoufp::store::MemoryStore;
use acoufp::Engine;
use common::{read_wav_as_mono_f32, test_config, write_chord_wav, write_stretched_wav, write_unrelated_wav};
use std::sync::Arc;

const SAMPLE_RATE: u32 = 16000;
const CHORD: [f32; 3] = [440.0, 554.0, 659.0];

fn engine() -> Engine {
    Engine::new(test_config(SAMPLE_RATE), Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn storing_then_querying_the_same_clip_finds_itself() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("1.wav");
    write_chord_wav(&path, &CHORD, 3.0, SAMPLE_RATE);

    let engine = engine();
    let metadata = engine.store_path(&path).await.unwrap().unwrap();
    assert_eq!(metadata.id, 1);
    assert!(metadata.num_fingerprints > 0);

    let results = engine.query_path(&path).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].ref_id, 1);
    assert!((results[0].time_factor - 1.0).abs() < 0.05);
    assert!(results[0].score > 0);
}

#[tokio::test]
async fn querying_a_sub_window_locates_the_matching_span_in_the_reference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("1.wav");
    write_chord_wav(&path, &CHORD, 4.0, SAMPLE_RATE);

    let engine = engine();
    engine.store_path(&path).await.unwrap().unwrap();

    let results = engine
        .query_window(&path, Some(1.0), Some(1.5), 0.0, &Default::default(), None)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].ref_id, 1);
    // The matched span in the reference should land near [1.0, 2.5)
    // modulo the triplet geometry trimming a little off each edge.
    assert!((results[0].ref_start - 1.0).abs() < 0.3);
    assert!((results[0].ref_stop - 2.5).abs() < 0.3);
}

#[tokio::test]
async fn querying_an_unrelated_clip_yields_no_match() {
    let dir = tempfile::tempdir().unwrap();
    let ref_path = dir.path().join("1.wav");
    write_chord_wav(&ref_path, &CHORD, 3.0, SAMPLE_RATE);

    let engine = engine();
    engine.store_path(&ref_path).await.unwrap().unwrap();

    let noise_path = dir.path().join("2.wav");
    write_unrelated_wav(&noise_path, 3.0, SAMPLE_RATE);

    let results = engine.query_path(&noise_path).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn a_mildly_time_stretched_recording_is_still_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let ref_path = dir.path().join("1.wav");
    write_chord_wav(&ref_path, &CHORD, 3.0, SAMPLE_RATE);

    let engine = engine();
    engine.store_path(&ref_path).await.unwrap().unwrap();

    let (samples, rate) = read_wav_as_mono_f32(&ref_path);
    let stretch_factor = 1.05;
    let stretched_path = dir.path().join("3.wav");
    write_stretched_wav(&samples, rate, stretch_factor, &stretched_path);

    let results = engine.query_path(&stretched_path).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].ref_id, 1);
    assert!(results[0].time_factor > engine.config.min_time_factor);
    assert!(results[0].time_factor < 1.0);
}
