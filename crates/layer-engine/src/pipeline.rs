use layer_build::{BuildReceipt, BuildSpec, Builder};
use layer_core::{
    Artifact, Cancellation, LayerError, PublishReceipt, PublishTarget, Result, SizeReport,
    ValidatedArtifact,
};
use layer_publish::Publisher;
use layer_size::SizeValidator;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Where an artifact stands in the build / check / publish flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Built,
    Unvalidated,
    ValidatedPass,
    ValidatedFail,
    Published,
    NotPublished,
}

impl PipelineState {
    /// Only a passing check may lead to a publish.
    pub fn can_transition(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Built, Unvalidated)
                | (Unvalidated, ValidatedPass)
                | (Unvalidated, ValidatedFail)
                | (ValidatedPass, Published)
                | (ValidatedPass, NotPublished)
                | (ValidatedFail, NotPublished)
        )
    }
}

#[derive(Debug, Serialize)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    pub artifact: Artifact,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SizeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PublishReceipt>,
    #[serde(skip)]
    pub build: Option<BuildReceipt>,
    #[serde(skip)]
    validated: Option<ValidatedArtifact>,
}

impl PipelineOutcome {
    fn new(state: PipelineState, artifact: Artifact) -> Self {
        Self {
            state,
            artifact,
            report: None,
            receipt: None,
            build: None,
            validated: None,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("{}: {:?} -> {:?}", self.artifact.name, self.state, next);
        self.state = next;
    }

    /// Turn a failing size verdict into `OversizeArtifact`.
    pub fn into_result(mut self) -> Result<Self> {
        let failed = matches!(
            self.state,
            PipelineState::ValidatedFail | PipelineState::NotPublished
        );
        match self.report.take() {
            Some(report) if failed && !report.passed() => {
                Err(LayerError::OversizeArtifact(Box::new(report)))
            }
            report => {
                self.report = report;
                Ok(self)
            }
        }
    }
}

/// Sequences the three stages. Stages are optional so that commands which
/// only check or only publish do not need a build environment or a bucket.
pub struct Pipeline {
    validator: SizeValidator,
    builder: Option<(Builder, BuildSpec)>,
    publisher: Option<(Publisher, PublishTarget)>,
}

impl Pipeline {
    pub fn new(validator: SizeValidator) -> Self {
        Self {
            validator,
            builder: None,
            publisher: None,
        }
    }

    pub fn with_builder(mut self, builder: Builder, spec: BuildSpec) -> Self {
        self.builder = Some((builder, spec));
        self
    }

    pub fn with_publisher(mut self, publisher: Publisher, target: PublishTarget) -> Self {
        self.publisher = Some((publisher, target));
        self
    }

    /// Build the artifact. The result is `Built`; it has not been checked.
    pub async fn build(&self, cancel: &Cancellation) -> Result<PipelineOutcome> {
        let (builder, spec) = self
            .builder
            .as_ref()
            .ok_or_else(|| LayerError::Config("no build environment configured".to_string()))?;

        let receipt = builder.build(spec, cancel).await?;
        if let Some(teardown) = &receipt.teardown_error {
            warn!("Artifact built but cleanup was incomplete: {}", teardown);
        }

        let mut outcome = PipelineOutcome::new(PipelineState::Built, receipt.artifact.clone());
        outcome.build = Some(receipt);
        Ok(outcome)
    }

    /// Measure an existing artifact. A failing verdict is reported in the
    /// outcome, not as an error.
    pub async fn check(&self, artifact: Artifact, cancel: &Cancellation) -> Result<PipelineOutcome> {
        let mut outcome = PipelineOutcome::new(PipelineState::Unvalidated, artifact);
        self.check_into(&mut outcome, cancel).await?;
        Ok(outcome)
    }

    /// Check, then publish only on a passing verdict.
    pub async fn push(&self, artifact: Artifact, cancel: &Cancellation) -> Result<PipelineOutcome> {
        let (publisher, target) = self.publisher()?;
        let mut outcome = PipelineOutcome::new(PipelineState::Unvalidated, artifact);
        self.check_into(&mut outcome, cancel).await?;
        self.publish_into(&mut outcome, publisher, target, cancel).await?;
        Ok(outcome)
    }

    /// Build, check and publish in sequence.
    pub async fn run(&self, cancel: &Cancellation) -> Result<PipelineOutcome> {
        // Fail on a missing bucket before spending a build on it.
        let (publisher, target) = self.publisher()?;

        let mut outcome = self.build(cancel).await?;
        outcome.advance(PipelineState::Unvalidated);
        self.check_into(&mut outcome, cancel).await?;
        self.publish_into(&mut outcome, publisher, target, cancel).await?;
        Ok(outcome)
    }

    fn publisher(&self) -> Result<(&Publisher, &PublishTarget)> {
        self.publisher
            .as_ref()
            .map(|(p, t)| (p, t))
            .ok_or_else(|| LayerError::Config("no publish bucket configured".to_string()))
    }

    async fn check_into(&self, outcome: &mut PipelineOutcome, cancel: &Cancellation) -> Result<()> {
        let report = self.validator.measure(&outcome.artifact, cancel).await?;
        match layer_size::gate(outcome.artifact.clone(), report) {
            Ok(validated) => {
                outcome.report = Some(validated.report().clone());
                outcome.validated = Some(validated);
                outcome.advance(PipelineState::ValidatedPass);
            }
            Err(LayerError::OversizeArtifact(report)) => {
                outcome.report = Some(*report);
                outcome.advance(PipelineState::ValidatedFail);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn publish_into(
        &self,
        outcome: &mut PipelineOutcome,
        publisher: &Publisher,
        target: &PublishTarget,
        cancel: &Cancellation,
    ) -> Result<()> {
        // Present only after a passing check.
        let Some(validated) = outcome.validated.take() else {
            info!("Not publishing {}: size check did not pass", outcome.artifact.name);
            outcome.advance(PipelineState::NotPublished);
            return Ok(());
        };

        let receipt = publisher.publish(&validated, target, cancel).await?;
        outcome.receipt = Some(receipt);
        outcome.advance(PipelineState::Published);
        Ok(())
    }
}
