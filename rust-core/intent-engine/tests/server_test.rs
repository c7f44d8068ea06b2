use intent_engine::{
    Backend, InferenceServer, IntentEngine, Response, ServerConfig, ServerState, Status,
    TokenizerDescriptor,
};
use model_export::graph::{
    CLASSIFIER_BIAS, CLASSIFIER_WEIGHT, EMBEDDING_WEIGHT, PRE_CLASSIFIER_BIAS, PRE_CLASSIFIER_WEIGHT,
};
use model_export::{AuxMetadata, ConversionConfig, ConversionPipeline};
use model_quant::{ConversionMode, LabelSchema, Tensor, TensorRole, TensorStore};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

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

const VOCAB: [&str; 20] = [
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "navigate", "to", "go", "##ogle", "search", "for",
    "scroll", "down", "back", "forward", "reload", "page", "click", "close", "tab", "the",
];

const HIDDEN: usize = 8;

fn values(len: usize, seed: f32) -> Vec<f32> {
    (0..len).map(|i| ((i as f32 * 1.37 + seed).sin()) * 0.8).collect()
}

fn store() -> TensorStore {
    TensorStore::from_tensors(vec![
        Tensor::from_f32(
            EMBEDDING_WEIGHT,
            vec![VOCAB.len(), HIDDEN],
            TensorRole::Embedding,
            values(VOCAB.len() * HIDDEN, 0.3),
        )
        .unwrap(),
        Tensor::from_f32(PRE_CLASSIFIER_WEIGHT, vec![HIDDEN, HIDDEN], TensorRole::Weight, values(HIDDEN * HIDDEN, 1.1)).unwrap(),
        Tensor::from_f32(PRE_CLASSIFIER_BIAS, vec![HIDDEN], TensorRole::Bias, values(HIDDEN, 2.2)).unwrap(),
        Tensor::from_f32(CLASSIFIER_WEIGHT, vec![INTENTS.len(), HIDDEN], TensorRole::Weight, values(INTENTS.len() * HIDDEN, 3.3)).unwrap(),
        Tensor::from_f32(CLASSIFIER_BIAS, vec![INTENTS.len()], TensorRole::Bias, values(INTENTS.len(), 4.4)).unwrap(),
    ])
    .unwrap()
}

fn convert(dir: &Path, name: &str, mode: ConversionMode) -> PathBuf {
    let mut aux = AuxMetadata::new();
    TokenizerDescriptor::new(VOCAB).insert_into(&mut aux).unwrap();

    let target = dir.join(name);
    let config = ConversionConfig {
        mode,
        ..ConversionConfig::default()
    };
    ConversionPipeline::new(config)
        .run(store(), &LabelSchema::new(INTENTS).unwrap(), &aux, &target)
        .unwrap();
    target
}

fn config(model: &Path) -> ServerConfig {
    ServerConfig::default().with_model_path(model)
}

fn run(config: &ServerConfig, input: &str) -> (ServerState, Vec<Response>) {
    let mut out = Vec::new();
    let mut server = InferenceServer::new(&mut out);
    if server.load(config).is_ok() {
        server.serve(input.as_bytes()).unwrap();
    }
    let state = server.state();
    drop(server);

    let responses = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (state, responses)
}

#[test]
fn navigate_request_yields_three_ranked_intents() {
    let dir = tempfile::tempdir().unwrap();
    let model = convert(dir.path(), "full", ConversionMode::FullPrecision);

    let (state, responses) = run(&config(&model), "{\"text\": \"navigate to google\"}\n");
    assert_eq!(state, ServerState::Ready);
    assert_eq!(responses.len(), 3);

    assert_eq!(responses[0], Response::loading("Loading model..."));
    assert_eq!(
        responses[1],
        Response::ready(
            "Model loaded successfully",
            INTENTS.iter().map(|s| s.to_string()).collect()
        )
    );

    let Response::Results { status, results } = &responses[2] else {
        panic!("expected results, got {:?}", responses[2]);
    };
    assert_eq!(*status, Status::Success);
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.confidence)));
    assert!(results.iter().map(|r| r.confidence).sum::<f64>() <= 1.0 + 1e-12);
    assert!(results.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    assert!(results.iter().all(|r| INTENTS.contains(&r.intent.as_str())));
}

#[test]
fn empty_text_then_next_request_is_served() {
    let dir = tempfile::tempdir().unwrap();
    let model = convert(dir.path(), "int8", ConversionMode::Int8Affine);

    let input = "{\"text\": \"\"}\n{\"text\": \"scroll down\"}\n";
    let (state, responses) = run(&config(&model), input);
    assert_eq!(state, ServerState::Ready);
    assert_eq!(responses.len(), 4);
    assert_eq!(
        responses[2],
        Response::MissingText {
            error: "No text provided".to_string()
        }
    );
    assert!(matches!(&responses[3], Response::Results { results, .. } if results.len() == 3));
}

#[test]
fn missing_artifact_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let (state, responses) = run(&config(&dir.path().join("absent")), "{\"text\": \"reload\"}\n");

    assert_eq!(state, ServerState::Failed);
    assert_eq!(responses.len(), 2);
    match &responses[1] {
        Response::Message { status, message, .. } => {
            assert_eq!(*status, Status::Error);
            assert!(message.starts_with("Failed to load model:"), "{}", message);
        }
        other => panic!("expected error message, got {:?}", other),
    }
}

#[test]
fn artifact_without_tokenizer_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("bare");
    ConversionPipeline::new(ConversionConfig::default())
        .run(store(), &LabelSchema::new(INTENTS).unwrap(), &AuxMetadata::new(), &target)
        .unwrap();

    let (state, _) = run(&config(&target), "");
    assert_eq!(state, ServerState::Failed);
}

#[cfg(not(feature = "onnx"))]
#[test]
fn onnx_backend_needs_feature() {
    let dir = tempfile::tempdir().unwrap();
    let model = convert(dir.path(), "full", ConversionMode::FullPrecision);
    let config = ServerConfig {
        backend: Backend::Onnx,
        ..config(&model)
    };
    assert!(IntentEngine::load(&config).is_err());
}

#[test]
fn reduced_precision_tracks_full_precision() {
    let dir = tempfile::tempdir().unwrap();
    let full = IntentEngine::load(&config(&convert(dir.path(), "full", ConversionMode::FullPrecision))).unwrap();
    let half = IntentEngine::load(&config(&convert(dir.path(), "half", ConversionMode::HalfPrecision))).unwrap();
    let int8 = IntentEngine::load(&config(&convert(dir.path(), "int8", ConversionMode::Int8Affine))).unwrap();

    for text in ["navigate to google", "search for the page", "close the tab", "go back"] {
        let reference = full.classify(text).unwrap();
        for engine in [&half, &int8] {
            let ranked = engine.classify(text).unwrap();
            assert_eq!(ranked.len(), 3);
            assert!(
                (ranked[0].confidence - reference[0].confidence).abs() < 0.1,
                "{}: {:?} vs {:?}",
                text,
                ranked,
                reference
            );
        }
    }
}

#[test]
fn top_k_is_configurable() {
    let dir = tempfile::tempdir().unwrap();
    let model = convert(dir.path(), "full", ConversionMode::FullPrecision);

    let engine = IntentEngine::load(&config(&model).with_top_k(9)).unwrap();
    let ranked = engine.classify("click").unwrap();
    assert_eq!(ranked.len(), 9);
    assert!((ranked.iter().map(|r| r.confidence).sum::<f64>() - 1.0).abs() < 1e-9);
}

fn run_binary(args: &[&str], input: &str) -> (Output, Vec<Response>) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_inference-server"))
        .args(args)
        .env_remove("INTENT_MODEL_PATH")
        .env_remove("INTENT_TOP_K")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    // A server that exits at startup may close stdin before this write
    let _ = child.stdin.take().unwrap().write_all(input.as_bytes());
    let output = child.wait_with_output().unwrap();

    let responses = String::from_utf8(output.stdout.clone())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    (output, responses)
}

#[test]
fn binary_exits_non_zero_when_model_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");

    let (output, responses) = run_binary(
        &["--model", missing.to_str().unwrap()],
        "{\"text\": \"navigate to google\"}\n",
    );
    assert!(!output.status.success());
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0], Response::loading("Loading model..."));
    assert!(matches!(
        &responses[1],
        Response::Message { status: Status::Error, message, intents: None }
            if message.starts_with("Failed to load model")
    ));
}

#[test]
fn binary_serves_requests_until_stdin_closes() {
    let dir = tempfile::tempdir().unwrap();
    let model = convert(dir.path(), "int8", ConversionMode::Int8Affine);

    let (output, responses) = run_binary(
        &["--model", model.to_str().unwrap()],
        "{\"text\": \"reload the page\"}\n{}\n",
    );
    assert!(output.status.success());
    assert_eq!(responses.len(), 4);
    assert!(matches!(&responses[1], Response::Message { status: Status::Ready, .. }));
    assert!(matches!(&responses[2], Response::Results { results, .. } if results.len() == 3));
    assert!(responses[3].is_error());
}
