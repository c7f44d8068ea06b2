//! Store -> converter -> exporter, run once per conversion

use crate::artifact::Artifact;
use crate::exporter::Exporter;
use crate::manifest::AuxMetadata;
use crate::strategy::{DirectExport, TracedGraphExport};
use crate::PipelineError;
use model_quant::{
    convert_store, ConversionMode, LabelSchema, QuantizationPolicy, Quantizer, RolePolicy,
    SizeReport, TensorStore,
};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Settings for one conversion run
#[derive(Clone)]
pub struct ConversionConfig {
    pub mode: ConversionMode,
    /// Selects the tensors quantized in int8 mode
    pub policy: Arc<dyn QuantizationPolicy>,
    /// zstd level for the traced export's payload
    pub compression_level: i32,
    /// Quantize tensors one at a time instead of in parallel
    pub sequential: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            mode: ConversionMode::default(),
            policy: Arc::new(RolePolicy::default()),
            compression_level: TracedGraphExport::default().compression_level,
            sequential: false,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("mode", &self.mode)
            .field("compression_level", &self.compression_level)
            .field("sequential", &self.sequential)
            .finish_non_exhaustive()
    }
}

/// Outcome of a successful conversion
#[derive(Debug, Clone)]
pub struct ConversionReport {
    pub artifact: Artifact,
    pub mode: ConversionMode,
    pub size: SizeReport,
    pub quantized_tensors: usize,
}

/// Converts a full-precision store and exports the result
pub struct ConversionPipeline {
    config: ConversionConfig,
    exporter: Exporter,
}

impl ConversionPipeline {
    pub fn new(config: ConversionConfig) -> Self {
        let primary = TracedGraphExport {
            compression_level: config.compression_level,
            ..TracedGraphExport::default()
        };
        Self {
            exporter: Exporter::new(Box::new(primary), Box::new(DirectExport::default())),
            config,
        }
    }

    pub fn with_exporter(mut self, exporter: Exporter) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Convert `store` and publish it at `target`
    pub fn run(
        &self,
        store: TensorStore,
        labels: &LabelSchema,
        aux: &AuxMetadata,
        target: &Path,
    ) -> Result<ConversionReport, PipelineError> {
        let quantizer = if self.config.sequential {
            Quantizer::sequential()
        } else {
            Quantizer::new()
        };

        let converted = convert_store(store, self.config.mode, self.config.policy.as_ref(), &quantizer)?;
        let quantized_tensors = converted.quantization.len();

        let artifact = self.exporter.export(
            converted.store,
            converted.quantization,
            labels,
            aux,
            target,
        )?;

        Ok(ConversionReport {
            artifact,
            mode: converted.mode,
            size: converted.report,
            quantized_tensors,
        })
    }
}
