//! Single-model request loop over a line-oriented channel
//!
//! The server moves `Loading -> Ready`, then `Ready -> Scoring -> Ready` for
//! each input line, or `Loading -> Failed` if the artifact cannot be loaded.
//! Requests are handled strictly in arrival order, one at a time. A bad
//! request produces an error line and the loop carries on; only load failure
//! and a broken channel end it.

use crate::classifier::{PooledLinearClassifier, SequenceClassifier};
use crate::config::{Backend, ServerConfig};
use crate::protocol::{Request, Response, ScoredIntent};
use crate::ranking::rank;
use crate::telemetry::{ServingStats, TelemetryCollector};
use crate::tokenizer::{Tokenizer, TokenizerDescriptor, WordPieceTokenizer};
use crate::{EngineError, RequestError, Result};
use model_export::Artifact;
use model_quant::LabelSchema;
use std::io::{BufRead, Write};
use std::time::Instant;

/// Lifecycle of an [`InferenceServer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Loading,
    Ready,
    Scoring,
    /// Terminal; no requests are served
    Failed,
}

/// Tokenizer, classifier and label schema of one loaded artifact
pub struct IntentEngine {
    tokenizer: Box<dyn Tokenizer>,
    classifier: Box<dyn SequenceClassifier>,
    labels: LabelSchema,
    top_k: usize,
}

impl IntentEngine {
    pub fn new(
        tokenizer: Box<dyn Tokenizer>,
        classifier: Box<dyn SequenceClassifier>,
        labels: LabelSchema,
        top_k: usize,
    ) -> Result<Self> {
        if classifier.num_labels() != labels.len() {
            return Err(EngineError::Model(format!(
                "classifier scores {} labels but the schema has {}",
                classifier.num_labels(),
                labels.len()
            )));
        }
        if top_k == 0 {
            return Err(EngineError::Model("top_k must be at least 1".to_string()));
        }

        Ok(Self {
            tokenizer,
            classifier,
            labels,
            top_k,
        })
    }

    /// Load the artifact at `config.model_path`
    pub fn load(config: &ServerConfig) -> Result<Self> {
        let artifact = Artifact::load(&config.model_path)?;
        Self::from_artifact(&artifact, config)
    }

    /// Build the tokenizer from the artifact's descriptor and the configured backend
    pub fn from_artifact(artifact: &Artifact, config: &ServerConfig) -> Result<Self> {
        let descriptor = TokenizerDescriptor::from_aux(artifact.aux())?;
        let max_length = config.max_length.min(descriptor.max_length);
        let tokenizer = WordPieceTokenizer::new(&descriptor)?.with_max_length(max_length)?;
        let classifier = classifier_for(artifact, config.backend)?;

        let engine = Self::new(
            Box::new(tokenizer),
            classifier,
            artifact.labels().clone(),
            config.top_k,
        )?;

        // Surface shape problems now rather than on the first request
        engine.classify("")?;
        tracing::info!(
            backend = %config.backend,
            labels = engine.labels.len(),
            quantized = artifact.is_quantized(),
            "Intent engine loaded from {}",
            artifact.root().display()
        );
        Ok(engine)
    }

    pub fn labels(&self) -> &LabelSchema {
        &self.labels
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Ranked intents for `text`, at most `top_k` of them
    pub fn classify(&self, text: &str) -> Result<Vec<ScoredIntent>> {
        let encoding = self.tokenizer.encode(text)?;
        let scores = self
            .classifier
            .forward(&encoding.input_ids, &encoding.attention_mask)?;
        if scores.len() != self.labels.len() {
            return Err(EngineError::Inference(format!(
                "expected {} scores, got {}",
                self.labels.len(),
                scores.len()
            )));
        }

        rank(&scores, self.top_k)?
            .into_iter()
            .map(|prediction| {
                let intent = self.labels.label(prediction.index).ok_or_else(|| {
                    EngineError::Inference(format!("no label for index {}", prediction.index))
                })?;
                Ok(ScoredIntent {
                    intent: intent.to_string(),
                    confidence: prediction.confidence,
                })
            })
            .collect()
    }
}

fn classifier_for(artifact: &Artifact, backend: Backend) -> Result<Box<dyn SequenceClassifier>> {
    match backend {
        Backend::Reference => Ok(Box::new(PooledLinearClassifier::from_artifact(artifact)?)),
        #[cfg(feature = "onnx")]
        Backend::Onnx => Ok(Box::new(crate::onnx::OnnxClassifier::from_artifact(artifact)?)),
        #[cfg(not(feature = "onnx"))]
        Backend::Onnx => Err(EngineError::Model(
            "the onnx backend requires building with the 'onnx' feature".to_string(),
        )),
    }
}

/// Serves one [`IntentEngine`], writing every response line to `output`
pub struct InferenceServer<W: Write> {
    output: W,
    state: ServerState,
    engine: Option<IntentEngine>,
    telemetry: TelemetryCollector,
}

impl<W: Write> InferenceServer<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            state: ServerState::Loading,
            engine: None,
            telemetry: TelemetryCollector::new(),
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn engine(&self) -> Option<&IntentEngine> {
        self.engine.as_ref()
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    /// Load the configured artifact
    pub fn load(&mut self, config: &ServerConfig) -> Result<()> {
        tracing::info!("Loading model from {}", config.model_path.display());
        self.load_with(|| IntentEngine::load(config))
    }

    /// Announce loading, run `load`, then announce readiness with the label list.
    ///
    /// On failure an error line is written, the server becomes
    /// [`ServerState::Failed`] and the load error is returned.
    pub fn load_with<F>(&mut self, load: F) -> Result<()>
    where
        F: FnOnce() -> Result<IntentEngine>,
    {
        if self.state != ServerState::Loading {
            return Err(EngineError::State(self.state));
        }
        Response::loading("Loading model...").write_line(&mut self.output)?;

        match load() {
            Ok(engine) => {
                let intents = engine.labels().labels().to_vec();
                Response::ready("Model loaded successfully", intents).write_line(&mut self.output)?;
                self.engine = Some(engine);
                self.state = ServerState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = ServerState::Failed;
                tracing::error!("Failed to load model: {}", e);
                Response::error(format!("Failed to load model: {}", e))
                    .write_line(&mut self.output)?;
                Err(e)
            }
        }
    }

    /// Answer every line of `input` until it closes
    pub fn serve<R: BufRead>(&mut self, input: R) -> Result<ServingStats> {
        if self.state != ServerState::Ready {
            return Err(EngineError::State(self.state));
        }

        for line in input.split(b'\n') {
            self.handle_line(&line?)?;
        }

        tracing::info!("Input closed. {}", self.telemetry.summary());
        Ok(self.telemetry.stats())
    }

    /// Score one raw line and write exactly one response for it
    pub fn handle_line(&mut self, raw: &[u8]) -> Result<Response> {
        if self.state != ServerState::Ready {
            return Err(EngineError::State(self.state));
        }
        let Some(engine) = self.engine.as_ref() else {
            return Err(EngineError::State(self.state));
        };

        self.state = ServerState::Scoring;
        let started = Instant::now();
        let response = match score(engine, raw) {
            Ok(results) => {
                self.telemetry.record_success(started.elapsed());
                Response::success(results)
            }
            Err(err) => {
                tracing::warn!("Request failed: {}", err);
                self.telemetry.record_error();
                Response::from_request_error(&err)
            }
        };
        self.state = ServerState::Ready;

        response.write_line(&mut self.output)?;
        Ok(response)
    }
}

fn score(engine: &IntentEngine, raw: &[u8]) -> std::result::Result<Vec<ScoredIntent>, RequestError> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| RequestError::Malformed(format!("invalid UTF-8: {}", e)))?;
    let request = Request::parse(line)?;
    tracing::debug!(chars = request.text.chars().count(), "Scoring request");
    Ok(engine.classify(&request.text)?)
}
