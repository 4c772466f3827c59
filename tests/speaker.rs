//! Speaker enrollment and identification tests

use cocoro_voice::Error;
use cocoro_voice::db::{self, SpeakerRepo};
use cocoro_voice::speaker::{FeatureExtractor, NUM_MEL_BINS, SpeakerEmbedding, SpeakerRegistry};
use cocoro_voice::voice::samples_to_wav;

mod common;

use common::{memory_registry, profile_model, silence, tone};

fn embedding(values: &[f32]) -> SpeakerEmbedding {
    SpeakerEmbedding::normalized(values.to_vec()).unwrap()
}

#[test]
fn test_fbank_is_deterministic() {
    let samples: Vec<f32> = tone(330.0, 500, 0.4)
        .iter()
        .map(|s| f32::from(*s) / 32768.0)
        .collect();
    let extractor = FeatureExtractor::new();

    let first = extractor.extract(&samples).unwrap();
    let second = extractor.extract(&samples).unwrap();

    assert_eq!(first.num_frames(), FeatureExtractor::frames_for(samples.len()));
    assert_eq!(first.num_frames(), 1 + (8000 - 400) / 160);
    assert_eq!(first.num_bins(), NUM_MEL_BINS);
    assert_eq!(first.as_slice(), second.as_slice());
}

#[test]
fn test_fbank_rejects_short_input() {
    let extractor = FeatureExtractor::new();
    assert!(matches!(
        extractor.extract(&[0.1; 399]),
        Err(Error::Features(_))
    ));
}

#[test]
fn test_embedding_has_unit_norm() {
    let model = profile_model(32);
    let wav = samples_to_wav(&tone(200.0, 1000, 0.3)).unwrap();
    let embedding = model.extract(&wav).unwrap();
    assert_eq!(embedding.dimension(), 32);
    assert!((embedding.norm() - 1.0).abs() < 1e-5);
}

#[test]
fn test_silent_enrollment_fails() {
    let registry = memory_registry(32, 0.6);
    let wav = samples_to_wav(&silence(1000)).unwrap();
    assert!(matches!(
        registry.register("bob", "Bob", &wav),
        Err(Error::DegenerateAudio(_))
    ));
    assert!(!registry.has_any().unwrap());
}

#[test]
fn test_register_validates_inputs() {
    let registry = memory_registry(32, 0.6);
    let wav = samples_to_wav(&tone(200.0, 500, 0.3)).unwrap();
    assert!(matches!(
        registry.register(" ", "Bob", &wav),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        registry.register("bob", "", &wav),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        registry.register("bob", "Bob", &[]),
        Err(Error::Validation(_))
    ));
}

#[test]
fn test_empty_registry_reports_no_speakers() {
    let registry = memory_registry(4, 0.6);
    let wav = samples_to_wav(&tone(200.0, 500, 0.3)).unwrap();
    assert!(matches!(
        registry.identify(&wav),
        Err(Error::NoSpeakersRegistered)
    ));
}

#[test]
fn test_enrolled_voice_identifies_itself() {
    let registry = memory_registry(32, 0.6);
    let wav = samples_to_wav(&tone(200.0, 1000, 0.3)).unwrap();
    registry.register("carol", "Carol", &wav).unwrap();

    let found = registry.identify(&wav).unwrap();
    assert_eq!(found.speaker_id, "carol");
    assert_eq!(found.speaker_name, "Carol");
    assert!(found.confidence > 0.999);
}

#[test]
fn test_threshold_is_inclusive() {
    let pool = db::init_memory().unwrap();
    let repo = SpeakerRepo::new(pool.clone());
    let enrolled = embedding(&[1.0, 0.0, 0.0, 0.0]);
    let query = embedding(&[0.6, 0.8, 0.0, 0.0]);
    repo.upsert("dave", "Dave", &enrolled).unwrap();

    // Score against the stored copy exactly as identification will
    let stored = repo.get("dave").unwrap().unwrap();
    let score = query.similarity(&stored.embedding);

    let at = SpeakerRegistry::new(SpeakerRepo::new(pool.clone()), profile_model(4), score);
    let found = at.identify_embedding(&query).unwrap();
    assert_eq!(found.speaker_id, "dave");
    assert!((found.confidence - score).abs() < f32::EPSILON);

    let above = SpeakerRegistry::new(SpeakerRepo::new(pool), profile_model(4), score + 1e-4);
    match above.identify_embedding(&query) {
        Err(Error::LowConfidenceMatch {
            speaker_id,
            confidence,
            ..
        }) => {
            assert_eq!(speaker_id, "dave");
            assert!((confidence - score).abs() < f32::EPSILON);
        }
        other => panic!("expected low confidence, got {other:?}"),
    }
}

#[test]
fn test_best_of_several_speakers_wins() {
    let registry = memory_registry(3, 0.5);
    registry
        .register_embedding("x", "X", &embedding(&[1.0, 0.0, 0.0]))
        .unwrap();
    registry
        .register_embedding("y", "Y", &embedding(&[0.0, 1.0, 0.0]))
        .unwrap();
    registry
        .register_embedding("z", "Z", &embedding(&[0.0, 0.0, 1.0]))
        .unwrap();

    let found = registry
        .identify_embedding(&embedding(&[0.1, 0.9, 0.2]))
        .unwrap();
    assert_eq!(found.speaker_id, "y");
}

#[test]
fn test_dimension_mismatch_is_rejected() {
    let registry = memory_registry(4, 0.6);
    assert!(matches!(
        registry.register_embedding("e", "E", &embedding(&[1.0, 0.0])),
        Err(Error::DimensionMismatch {
            expected: 4,
            actual: 2
        })
    ));
}

#[test]
fn test_enrollments_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("speakers.db");

    {
        let registry =
            SpeakerRegistry::new(SpeakerRepo::new(db::init(&path).unwrap()), profile_model(4), 0.6);
        registry
            .register_embedding("frank", "Frank", &embedding(&[0.0, 1.0, 0.0, 0.0]))
            .unwrap();
        registry
            .register_embedding("gina", "Gina", &embedding(&[1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        registry.delete("gina").unwrap();
        registry.delete("nobody").unwrap();
    }

    let registry =
        SpeakerRegistry::new(SpeakerRepo::new(db::init(&path).unwrap()), profile_model(4), 0.6);
    assert_eq!(
        registry.list().unwrap(),
        vec![("frank".to_string(), "Frank".to_string())]
    );
    let found = registry
        .identify_embedding(&embedding(&[0.0, 1.0, 0.0, 0.0]))
        .unwrap();
    assert_eq!(found.speaker_id, "frank");
}
