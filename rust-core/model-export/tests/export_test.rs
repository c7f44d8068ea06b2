use anyhow::bail;
use model_export::graph::{
    CLASSIFIER_BIAS, CLASSIFIER_WEIGHT, EMBEDDING_WEIGHT, PRE_CLASSIFIER_BIAS, PRE_CLASSIFIER_WEIGHT,
};
use model_export::manifest::{CONFIG_FILE, GRAPH_FILE, PAYLOAD_FILE};
use model_export::patch::MetadataPatcher;
use model_export::*;
use model_quant::{
    ConversionMode, DType, LabelSchema, QuantizationParams, QuantizationTable, Quantizer,
    RolePolicy, Tensor, TensorRole, TensorStore,
};
use std::sync::Arc;
use std::path::Path;

const INTENTS: [&str; 9] = [
    "navigate",
    "search",
    "scroll",
    "go_back",
    "go_forward",
    "reload",
    "click",
    "type",
    "close_tab",
];

fn values(len: usize, seed: f32) -> Vec<f32> {
    (0..len).map(|i| ((i as f32 + seed) * 0.731).sin() * 0.5).collect()
}

fn classifier_store() -> TensorStore {
    TensorStore::from_tensors(vec![
        Tensor::from_f32(EMBEDDING_WEIGHT, vec![16, 4], TensorRole::Embedding, values(64, 1.0)).unwrap(),
        Tensor::from_f32(PRE_CLASSIFIER_WEIGHT, vec![4, 4], TensorRole::Weight, values(16, 2.0)).unwrap(),
        Tensor::from_f32(PRE_CLASSIFIER_BIAS, vec![4], TensorRole::Bias, values(4, 3.0)).unwrap(),
        Tensor::from_f32(CLASSIFIER_WEIGHT, vec![9, 4], TensorRole::Weight, values(36, 4.0)).unwrap(),
        Tensor::from_f32(CLASSIFIER_BIAS, vec![9], TensorRole::Bias, values(9, 5.0)).unwrap(),
    ])
    .unwrap()
}

fn labels() -> LabelSchema {
    LabelSchema::new(INTENTS).unwrap()
}

fn aux() -> AuxMetadata {
    let mut aux = AuxMetadata::new();
    aux.insert("max_length".to_string(), serde_json::json!(512));
    aux
}

struct FailingStrategy(&'static str);

impl ExportStrategy for FailingStrategy {
    fn name(&self) -> &str {
        self.0
    }

    fn export(&self, _request: &ExportRequest<'_>, _dir: &Path) -> anyhow::Result<Manifest> {
        bail!("{} exploded", self.0)
    }
}

struct FailingPatcher;

impl MetadataPatcher for FailingPatcher {
    fn patch_labels(&self, dir: &Path, _labels: &LabelSchema) -> Result<(), PatchError> {
        Err(PatchError::new(dir.join(CONFIG_FILE), "metadata store is read-only"))
    }
}

#[test]
fn primary_export_round_trips_through_load() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("intent-classifier");

    let artifact = Exporter::default()
        .export(classifier_store(), Default::default(), &labels(), &aux(), &target)
        .unwrap();
    assert_eq!(artifact.manifest().strategy, "traced-graph");
    assert!(target.join(GRAPH_FILE).exists());
    assert!(!dir.path().join("intent-classifier.partial").exists());

    let loaded = Artifact::load(&target).unwrap();
    assert_eq!(loaded.store(), &classifier_store());
    assert_eq!(loaded.labels(), &labels());
    assert_eq!(loaded.aux().get("max_length"), Some(&serde_json::json!(512)));
    assert_eq!(loaded.manifest().opset, 14);
    assert!(loaded.manifest().contract.validate(9).is_ok());
}

#[test]
fn untraceable_store_falls_back_to_direct_export() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("flat");
    let mut store = TensorStore::new();
    for tensor in classifier_store() {
        if tensor.name() != EMBEDDING_WEIGHT {
            store.insert(tensor).unwrap();
        }
    }

    let artifact = Exporter::default()
        .export(store, Default::default(), &labels(), &aux(), &target)
        .unwrap();
    assert_eq!(artifact.manifest().strategy, "direct");
    assert!(!target.join(GRAPH_FILE).exists());

    let loaded = Artifact::load(&target).unwrap();
    assert!(!loaded.manifest().traced);
    assert!(loaded.manifest().contract.validate(9).is_ok());
}

#[test]
fn forced_primary_failure_still_satisfies_contract() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model");
    let exporter = Exporter::new(
        Box::new(FailingStrategy("tracer")),
        Box::new(DirectExport::default()),
    );

    exporter
        .export(classifier_store(), Default::default(), &labels(), &aux(), &target)
        .unwrap();

    let loaded = Artifact::load(&target).unwrap();
    let contract = &loaded.manifest().contract;
    assert!(contract.validate(loaded.labels().len()).is_ok());
    let ids = contract.input(contract::INPUT_IDS).unwrap();
    assert_eq!(ids.elem_type, ElementType::Int64);
    assert_eq!(
        ids.dims,
        vec![Dim::Dynamic("batch".into()), Dim::Dynamic("sequence".into())]
    );
    let logits = contract.output(contract::LOGITS).unwrap();
    assert_eq!(logits.dims, vec![Dim::Dynamic("batch".into()), Dim::Fixed(9)]);
}

#[test]
fn both_strategies_failing_reports_both_causes() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model");
    let exporter = Exporter::new(
        Box::new(FailingStrategy("tracer")),
        Box::new(FailingStrategy("copier")),
    );

    let err = exporter
        .export(classifier_store(), Default::default(), &labels(), &aux(), &target)
        .unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, ExportError::StrategiesExhausted { .. }));
    assert!(message.contains("tracer exploded"), "{}", message);
    assert!(message.contains("copier exploded"), "{}", message);
    assert!(!target.exists());
    assert!(!dir.path().join("model.partial").exists());
}

#[test]
fn patch_failure_is_not_published() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model");
    let exporter = Exporter::default().with_patcher(Box::new(FailingPatcher));

    let err = exporter
        .export(classifier_store(), Default::default(), &labels(), &aux(), &target)
        .unwrap_err();
    assert!(matches!(err, ExportError::Patch(_)));
    assert!(!target.exists());
    assert!(!dir.path().join("model.partial").exists());
}

#[test]
fn corrupted_payload_fails_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model");
    let exporter = Exporter::new(
        Box::new(DirectExport::default()),
        Box::new(DirectExport::default()),
    );
    exporter
        .export(classifier_store(), Default::default(), &labels(), &aux(), &target)
        .unwrap();

    let payload = target.join(PAYLOAD_FILE);
    let mut bytes = std::fs::read(&payload).unwrap();
    bytes[0] ^= 0xff;
    std::fs::write(&payload, bytes).unwrap();

    assert!(matches!(
        Artifact::load(&target),
        Err(ArtifactLoadError::Checksum { .. })
    ));
}

#[test]
fn unpatched_artifact_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model");
    Exporter::default()
        .export(classifier_store(), Default::default(), &labels(), &aux(), &target)
        .unwrap();

    let config = ArtifactConfig::new(9, AuxMetadata::new());
    config.write(&target).unwrap();

    assert!(Artifact::load(&target).is_err());
    assert!(matches!(
        Artifact::load(dir.path().join("missing")),
        Err(ArtifactLoadError::Missing(_))
    ));
}

#[test]
fn export_replaces_existing_target() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("model");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("stale.txt"), b"old").unwrap();

    Exporter::default()
        .export(classifier_store(), Default::default(), &labels(), &aux(), &target)
        .unwrap();
    assert!(!target.join("stale.txt").exists());
    assert!(Artifact::load(&target).is_ok());
}

#[test]
fn int8_pipeline_persists_quantization_table() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("quantized");
    let original = classifier_store();

    let report = ConversionPipeline::new(ConversionConfig::default())
        .run(original.clone(), &labels(), &aux(), &target)
        .unwrap();
    assert_eq!(report.mode, ConversionMode::Int8Affine);
    assert_eq!(report.quantized_tensors, 2);
    assert!(report.size.converted_bytes < report.size.original_bytes);

    let loaded = Artifact::load(&target).unwrap();
    assert!(loaded.is_quantized());
    assert_eq!(loaded.store().get(CLASSIFIER_WEIGHT).unwrap().dtype(), DType::Uint8);
    assert_eq!(loaded.store().get(EMBEDDING_WEIGHT).unwrap().dtype(), DType::Float32);
    assert_eq!(loaded.store().get(CLASSIFIER_BIAS).unwrap().dtype(), DType::Float32);

    let params = *loaded.quantization_params(CLASSIFIER_WEIGHT).unwrap();
    let restored = loaded.float_tensor(CLASSIFIER_WEIGHT).unwrap().to_f32_vec().unwrap();
    let expected = original.get(CLASSIFIER_WEIGHT).unwrap().to_f32_vec().unwrap();
    for (a, b) in restored.iter().zip(&expected) {
        assert!(((a - b).abs() as f64) <= params.max_error() + 1e-6);
    }
}

#[test]
fn quantization_table_reloads_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("quantized");
    let report = ConversionPipeline::new(ConversionConfig::default())
        .run(classifier_store(), &labels(), &aux(), &target)
        .unwrap();

    let loaded = Artifact::load(&target).unwrap();
    assert_eq!(loaded.quantization(), report.artifact.quantization());

    // Scales from min/max spans rarely have short decimal forms
    let quantizer = Quantizer::sequential();
    let mut table = QuantizationTable::new();
    for i in 0..500 {
        let tensor = Tensor::from_f32(
            format!("layer.{}.weight", i),
            vec![8],
            TensorRole::Weight,
            values(8, i as f32 * 0.173),
        )
        .unwrap();
        table.insert(tensor.name().to_string(), quantizer.compute_params(&tensor).unwrap());
    }
    let json = serde_json::to_string(&table).unwrap();
    let reloaded: QuantizationTable = serde_json::from_str(&json).unwrap();
    assert_eq!(reloaded, table);
}

#[test]
fn invalid_quantization_scale_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("quantized");
    ConversionPipeline::new(ConversionConfig::default())
        .run(classifier_store(), &labels(), &aux(), &target)
        .unwrap();

    for scale in [0.0, -0.5] {
        let mut manifest = Manifest::read(&target).unwrap();
        let params = manifest.quantization.get_mut(CLASSIFIER_WEIGHT).unwrap();
        *params = QuantizationParams { scale, ..*params };
        manifest.write(&target).unwrap();

        let err = Artifact::load(&target).unwrap_err();
        assert!(matches!(err, ArtifactLoadError::Corrupt(_)), "scale {}", scale);
        assert!(err.to_string().contains(CLASSIFIER_WEIGHT));
    }
}

#[test]
fn pipeline_accepts_closure_policy() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("quantized");
    let only_classifier = |tensor: &Tensor| tensor.name() == CLASSIFIER_WEIGHT;
    let config = ConversionConfig {
        policy: Arc::new(only_classifier),
        ..ConversionConfig::default()
    };

    let report = ConversionPipeline::new(config)
        .run(classifier_store(), &labels(), &aux(), &target)
        .unwrap();
    assert_eq!(report.quantized_tensors, 1);

    let loaded = Artifact::load(&target).unwrap();
    let names: Vec<&str> = loaded.quantization().keys().map(String::as_str).collect();
    assert_eq!(names, vec![CLASSIFIER_WEIGHT]);
    assert_eq!(loaded.store().get(PRE_CLASSIFIER_WEIGHT).unwrap().dtype(), DType::Float32);
}

#[test]
fn fp16_pipeline_stores_half_precision() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("half");
    let config = ConversionConfig {
        mode: ConversionMode::HalfPrecision,
        policy: Arc::new(RolePolicy::default()),
        sequential: true,
        ..ConversionConfig::default()
    };

    let report = ConversionPipeline::new(config)
        .run(classifier_store(), &labels(), &aux(), &target)
        .unwrap();
    assert_eq!(report.quantized_tensors, 0);
    assert!((report.size.reduction_percent() - 50.0).abs() < 1e-9);

    let loaded = Artifact::load(&target).unwrap();
    assert!(loaded.quantization().is_empty());
    assert!(loaded.store().iter().all(|t| t.dtype() == DType::Float16));
    assert_eq!(
        loaded.float_store().unwrap().get(CLASSIFIER_BIAS).unwrap().dtype(),
        DType::Float32
    );
}

#[test]
fn invalid_tensor_data_names_the_tensor() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = classifier_store().into_tensors();
    store[3] = Tensor::from_f32(CLASSIFIER_WEIGHT, vec![9, 4], TensorRole::Weight, {
        let mut v = values(36, 4.0);
        v[7] = f32::NAN;
        v
    })
    .unwrap();
    let store = TensorStore::from_tensors(store).unwrap();

    let err = ConversionPipeline::new(ConversionConfig::default())
        .run(store, &labels(), &aux(), &dir.path().join("model"))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Quantization(_)));
    assert!(err.to_string().contains(CLASSIFIER_WEIGHT));
    assert!(!dir.path().join("model").exists());
}
