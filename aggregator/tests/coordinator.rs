use std::{
    num::{NonZeroU64, NonZeroUsize},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use aggregator::{
    Coordinator, CoordinatorBuilder, CoordinatorErr, UpdateOutcome, WorkerId,
    aggregation::weighted_average,
    audit::{JsonLinesAuditStore, MemoryAuditStore},
    registry::Contribution,
    training::{EvalErr, Evaluation, Evaluator, ModelTrainer},
};
use comms::{
    BinaryCodec, Codec, ModelState, Tensor, Update,
    specs::{AuditSpec, CoordinatorSpec, RoniSpec},
};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn model(w: f32) -> ModelState {
    let mut state = ModelState::new();
    state.insert("w", Tensor::from_vec(vec![w, -w]));
    state.insert("b", Tensor::from_vec(vec![w * 2.0]));
    state
}

fn weight(state: &ModelState) -> f32 {
    state.get("w").unwrap().to_vec()[0]
}

/// Scores a model by its first weight and can be told to fail on one of them.
struct WeightScorer {
    loaded: f32,
    fail_on: Option<f32>,
    tests: Arc<AtomicUsize>,
}

impl WeightScorer {
    fn new(fail_on: Option<f32>) -> Self {
        Self {
            loaded: 0.0,
            fail_on,
            tests: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Evaluator for WeightScorer {
    fn load_state(&mut self, state: &ModelState) -> Result<(), EvalErr> {
        self.loaded = weight(state);
        Ok(())
    }

    fn test(&mut self) -> Result<Evaluation, EvalErr> {
        self.tests.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.is_some_and(|w| (w - self.loaded).abs() < 1e-4) {
            return Err(EvalErr::Failed("holdout set unavailable".into()));
        }

        let accuracy = self.loaded as f64 / 10.0;
        Ok(Evaluation {
            loss: 1.0 - accuracy,
            accuracy,
        })
    }
}

impl ModelTrainer for WeightScorer {
    fn model(&self) -> ModelState {
        model(self.loaded)
    }
}

fn spec(threshold: usize) -> CoordinatorSpec {
    CoordinatorSpec {
        update_threshold: NonZeroUsize::new(threshold).unwrap(),
        roni: None,
    }
}

fn coordinator(threshold: usize) -> Coordinator {
    CoordinatorBuilder::new(spec(threshold), Box::new(WeightScorer::new(None)))
        .build()
        .unwrap()
}

fn update(samples: u64, w: f32) -> Update {
    Update::new(NonZeroU64::new(samples).unwrap(), model(w))
}

fn payload(samples: u64, w: f32) -> Vec<u8> {
    BinaryCodec::new().encode_update(&update(samples, w)).unwrap()
}

fn global_weight(coordinator: &Coordinator) -> f32 {
    weight(&coordinator.global_model().state)
}

#[tokio::test]
async fn test_threshold_scenario() {
    init_logger();
    let coordinator = coordinator(2);
    for id in ["A", "B", "C"] {
        coordinator.on_register(id).unwrap();
    }

    let a = WorkerId::new("A");
    let outcome = coordinator.submit_update(&a, update(5, 1.0)).await.unwrap();
    assert!(matches!(
        outcome,
        UpdateOutcome::Pending {
            unique_updates: 1,
            update_threshold: 2
        }
    ));
    assert_eq!(coordinator.model_version(), 0);

    let outcome = coordinator
        .submit_update(&"B".into(), update(5, 3.0))
        .await
        .unwrap();
    let UpdateOutcome::Aggregated {
        version,
        contributors,
        roni,
    } = outcome
    else {
        panic!("expected an aggregation");
    };

    assert_eq!(version, 1);
    assert_eq!(contributors, vec![WorkerId::new("A"), WorkerId::new("B")]);
    assert!(roni.is_none());
    assert_eq!(coordinator.model_version(), 1);
    assert_eq!(coordinator.iteration(), 1);
    assert!((global_weight(&coordinator) - 2.0).abs() < 1e-6);

    // A submitting twice in the next round is counted once
    for w in [5.0, 7.0] {
        let outcome = coordinator.submit_update(&a, update(5, w)).await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::Pending { unique_updates: 1, .. }));
    }
    assert_eq!(coordinator.pending_updates(), 1);
    assert_eq!(coordinator.model_version(), 1);
}

#[tokio::test]
async fn test_global_model_currency() {
    let coordinator = coordinator(1);
    coordinator.on_register("a").unwrap();

    assert!(coordinator.on_is_global_model_current(0));
    for other in [-1, 1, 2, i64::MIN, i64::MAX] {
        assert!(!coordinator.on_is_global_model_current(other));
    }

    coordinator.submit_update(&"a".into(), update(1, 1.0)).await.unwrap();

    assert!(coordinator.on_is_global_model_current(1));
    assert!(!coordinator.on_is_global_model_current(0));
    assert!(!coordinator.on_is_global_model_current(2));
}

#[tokio::test]
async fn test_return_global_model() {
    let coordinator = coordinator(1);
    coordinator.on_register("a").unwrap();
    coordinator.submit_update(&"a".into(), update(3, 4.5)).await.unwrap();

    let (bytes, version) = coordinator.on_return_global_model().unwrap();
    let state = BinaryCodec::new().decode_state(&bytes).unwrap();

    assert_eq!(version, 1);
    assert_eq!(state, model(4.5));
}

#[tokio::test]
async fn test_receive_update_messages() {
    init_logger();
    let coordinator = coordinator(2);
    let worker_id = "0123456789abcdef";

    let reply = coordinator
        .on_receive_update(worker_id, &payload(1, 1.0))
        .await
        .unwrap();
    assert_eq!(reply, "Please register before sending an update.");
    assert_eq!(coordinator.pending_updates(), 0);

    coordinator.on_register(worker_id).unwrap();
    let reply = coordinator
        .on_receive_update(worker_id, &payload(1, 1.0))
        .await
        .unwrap();
    assert_eq!(reply, "Update received for worker 0123456789");
    assert_eq!(coordinator.pending_updates(), 1);

    let err = coordinator
        .on_receive_update(worker_id, b"not an update")
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorErr::Serialization(_)));
}

#[tokio::test]
async fn test_incompatible_update_is_accepted_but_not_aggregated() {
    let coordinator = coordinator(2);
    coordinator.on_register("a").unwrap();
    coordinator.on_register("b").unwrap();

    let mut wrong = ModelState::new();
    wrong.insert("w", Tensor::from_vec(vec![1.0]));
    let wrong = BinaryCodec::new()
        .encode_update(&Update::new(NonZeroU64::MIN, wrong))
        .unwrap();

    coordinator.on_receive_update("a", &payload(1, 1.0)).await.unwrap();
    let reply = coordinator.on_receive_update("b", &wrong).await.unwrap();

    assert_eq!(reply, "Update received for worker b");
    assert_eq!(coordinator.model_version(), 0);
    assert_eq!(coordinator.pending_updates(), 2);

    coordinator.on_receive_update("b", &payload(1, 3.0)).await.unwrap();
    assert_eq!(coordinator.model_version(), 1);
    assert!((global_weight(&coordinator) - 2.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_registration_errors() {
    let coordinator = coordinator(1);
    coordinator.on_register("a").unwrap();

    assert!(matches!(
        coordinator.on_register("a"),
        Err(CoordinatorErr::AlreadyRegistered(_))
    ));
    coordinator.on_unregister("a").unwrap();
    assert!(matches!(
        coordinator.on_unregister("a"),
        Err(CoordinatorErr::NotRegistered(_))
    ));
    assert!(coordinator.registered_workers().is_empty());
}

#[tokio::test]
async fn test_trainer_mirrors_every_global_model() {
    let trainer = WeightScorer::new(None);
    let tests = Arc::clone(&trainer.tests);
    let coordinator = CoordinatorBuilder::new(spec(1), Box::new(trainer))
        .build()
        .unwrap();
    coordinator.on_register("a").unwrap();

    for w in [1.0, 2.0, 3.0] {
        coordinator.submit_update(&"a".into(), update(1, w)).await.unwrap();
    }

    assert_eq!(tests.load(Ordering::SeqCst), 3);
    assert_eq!(coordinator.iteration(), 3);
}

#[tokio::test]
async fn test_roni_failure_does_not_stop_the_audit() {
    init_logger();
    let store = Arc::new(MemoryAuditStore::new());
    let spec = CoordinatorSpec {
        update_threshold: NonZeroUsize::new(3).unwrap(),
        roni: Some(RoniSpec {
            eval_timeout_ms: Some(5_000),
            audit: AuditSpec::Memory,
        }),
    };

    // leaving b out averages 1 and 5 into 3
    let coordinator = CoordinatorBuilder::new(spec, Box::new(WeightScorer::new(None)))
        .evaluator(Box::new(WeightScorer::new(Some(3.0))))
        .audit_store(store.clone())
        .build()
        .unwrap();

    for id in ["a", "b", "c"] {
        coordinator.on_register(id).unwrap();
    }

    coordinator.submit_update(&"a".into(), update(1, 1.0)).await.unwrap();
    coordinator.submit_update(&"b".into(), update(1, 2.0)).await.unwrap();
    let outcome = coordinator
        .submit_update(&"c".into(), update(1, 5.0))
        .await
        .unwrap();

    let UpdateOutcome::Aggregated {
        version,
        roni: Some(record),
        ..
    } = outcome
    else {
        panic!("expected an audited aggregation");
    };

    assert_eq!(version, 1);
    assert_eq!(record.model_version, 1);
    assert!(record.excluded[&WorkerId::new("b")].outcome.is_failure());
    assert!((record.excluded[&WorkerId::new("a")].outcome.accuracy().unwrap() - 0.35).abs() < 1e-4);
    assert!((record.excluded[&WorkerId::new("c")].outcome.accuracy().unwrap() - 0.15).abs() < 1e-4);
    assert!((record.global.outcome.accuracy().unwrap() - 0.8 / 3.0).abs() < 1e-4);

    // the audit never gates the model
    assert_eq!(coordinator.model_version(), 1);
    assert!((global_weight(&coordinator) - 8.0 / 3.0).abs() < 1e-5);
    assert_eq!(store.get(1).unwrap(), record);
}

#[tokio::test]
async fn test_roni_records_persist_as_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roni.jsonl");
    let spec = CoordinatorSpec {
        update_threshold: NonZeroUsize::new(2).unwrap(),
        roni: Some(RoniSpec {
            eval_timeout_ms: None,
            audit: AuditSpec::JsonLines { path: path.clone() },
        }),
    };

    let coordinator = CoordinatorBuilder::new(spec, Box::new(WeightScorer::new(None)))
        .evaluator(Box::new(WeightScorer::new(None)))
        .build()
        .unwrap();
    coordinator.on_register("a").unwrap();
    coordinator.on_register("b").unwrap();

    for round in 0..2 {
        let w = round as f32;
        coordinator.submit_update(&"a".into(), update(1, w)).await.unwrap();
        coordinator.submit_update(&"b".into(), update(1, w + 2.0)).await.unwrap();
    }

    let records = JsonLinesAuditStore::read_records(&path).unwrap();
    assert_eq!(records.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(records[&2].excluded.len(), 2);
    assert!((records[&2].global.outcome.accuracy().unwrap() - 0.2).abs() < 1e-4);
}

#[tokio::test]
async fn test_roni_without_evaluator_is_rejected() {
    let spec = CoordinatorSpec {
        update_threshold: NonZeroUsize::MIN,
        roni: Some(RoniSpec {
            eval_timeout_ms: None,
            audit: AuditSpec::Memory,
        }),
    };

    let res = CoordinatorBuilder::new(spec, Box::new(WeightScorer::new(None))).build();
    assert!(matches!(res, Err(CoordinatorErr::Config(_))));
}

#[test]
fn test_leave_one_out_is_order_independent() {
    let mut rng = StdRng::seed_from_u64(42);
    let contributions: Vec<_> = (0..6)
        .map(|i| Contribution {
            worker_id: WorkerId::new(format!("worker-{i}")),
            sample_count: NonZeroU64::new(i + 1).unwrap(),
            state: Arc::new(model(i as f32 * 1.5 - 2.0)),
        })
        .collect();

    for excluded in 0..contributions.len() {
        let mut others: Vec<_> = contributions
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != excluded)
            .map(|(_, c)| c.clone())
            .collect();

        let total: f32 = others.iter().map(|c| c.sample_count.get() as f32).sum();
        let expected: f32 = others
            .iter()
            .map(|c| weight(&c.state) * c.sample_count.get() as f32)
            .sum::<f32>()
            / total;

        let reference = weighted_average(&others).unwrap();
        others.shuffle(&mut rng);
        let shuffled = weighted_average(&others).unwrap();

        assert!((weight(&reference) - expected).abs() < 1e-5);
        assert!((weight(&shuffled) - weight(&reference)).abs() < 1e-5);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_aggregate_once() {
    const WORKERS: usize = 8;

    let coordinator = Arc::new(coordinator(WORKERS));
    for i in 0..WORKERS {
        coordinator.on_register(format!("worker-{i}")).unwrap();
    }

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let worker_id = WorkerId::new(format!("worker-{i}"));
                coordinator.submit_update(&worker_id, update(1, 4.0)).await
            })
        })
        .collect();

    let mut aggregations = 0;
    for handle in handles {
        if let UpdateOutcome::Aggregated { contributors, .. } = handle.await.unwrap().unwrap() {
            assert_eq!(contributors.len(), WORKERS);
            aggregations += 1;
        }
    }

    assert_eq!(aggregations, 1);
    assert_eq!(coordinator.model_version(), 1);
    assert_eq!(coordinator.pending_updates(), 0);
    assert!((global_weight(&coordinator) - 4.0).abs() < 1e-6);
}
