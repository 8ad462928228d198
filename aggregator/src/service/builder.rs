use std::sync::Arc;

use comms::{
    BinaryCodec, Codec,
    specs::{AuditSpec, CoordinatorSpec, RoniSpec},
};
use parking_lot::Mutex;

use super::Coordinator;
use crate::{
    aggregation::AggregationEngine,
    audit::{AuditStore, JsonLinesAuditStore, MemoryAuditStore, RobustnessAuditor},
    error::{CoordinatorErr, Result},
    training::{Evaluator, ModelTrainer},
};

/// Builds `Coordinator`s given a specification and their collaborators.
pub struct CoordinatorBuilder {
    spec: CoordinatorSpec,
    trainer: Box<dyn ModelTrainer>,
    evaluator: Option<Box<dyn Evaluator>>,
    codec: Option<Box<dyn Codec>>,
    audit_store: Option<Arc<dyn AuditStore>>,
}

impl CoordinatorBuilder {
    /// Creates a new `CoordinatorBuilder`.
    ///
    /// # Arguments
    /// * `spec` - The specification of the coordinator.
    /// * `trainer` - The owner of the model, it provides the initial global model.
    pub fn new(spec: CoordinatorSpec, trainer: Box<dyn ModelTrainer>) -> Self {
        Self {
            spec,
            trainer,
            evaluator: None,
            codec: None,
            audit_store: None,
        }
    }

    /// Sets the evaluation harness of the robustness audit.
    pub fn evaluator(mut self, evaluator: Box<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Sets the codec for models and updates, `BinaryCodec` by default.
    pub fn codec(mut self, codec: Box<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Overrides the audit store described by the `CoordinatorSpec`.
    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    /// Builds the `Coordinator`.
    ///
    /// # Returns
    /// The coordinator, a `Config` error if the audit is enabled without an evaluator or an
    /// `Audit` error if the audit store can't be opened.
    pub fn build(self) -> Result<Coordinator> {
        let Self {
            spec,
            trainer,
            evaluator,
            codec,
            audit_store,
        } = self;

        let auditor = match &spec.roni {
            Some(roni) => Some(Self::resolve_auditor(roni, evaluator, audit_store)?),
            None => None,
        };

        let engine = AggregationEngine::new(spec.update_threshold, trainer.model());
        let codec = codec.unwrap_or_else(|| Box::new(BinaryCodec::new()));

        Ok(Coordinator::new(
            engine,
            codec,
            Arc::new(Mutex::new(trainer)),
            auditor,
        ))
    }

    /// Resolves the `RobustnessAuditor` for this coordinator.
    ///
    /// # Arguments
    /// * `spec` - The specification of the audit.
    /// * `evaluator` - The evaluation harness, if one was given.
    /// * `store` - The audit store override, if one was given.
    fn resolve_auditor(
        spec: &RoniSpec,
        evaluator: Option<Box<dyn Evaluator>>,
        store: Option<Arc<dyn AuditStore>>,
    ) -> Result<RobustnessAuditor> {
        let evaluator = evaluator.ok_or_else(|| {
            CoordinatorErr::Config("the robustness audit needs an evaluator".to_string())
        })?;

        let store = match store {
            Some(store) => store,
            None => Self::resolve_store(&spec.audit)?,
        };

        Ok(RobustnessAuditor::new(evaluator, store, spec.eval_timeout()))
    }

    /// Resolves the `AuditStore` described by `spec`.
    fn resolve_store(spec: &AuditSpec) -> Result<Arc<dyn AuditStore>> {
        let store: Arc<dyn AuditStore> = match spec {
            AuditSpec::Memory => Arc::new(MemoryAuditStore::new()),
            AuditSpec::JsonLines { path } => Arc::new(JsonLinesAuditStore::open(path)?),
        };

        Ok(store)
    }
}
