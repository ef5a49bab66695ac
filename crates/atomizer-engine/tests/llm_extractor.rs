//! Model extractor tests against a local HTTP responder

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use atomizer_core::{CommitRecord, FileDiff, FileStatus, PathIdentity};
use atomizer_db::fakes::MemoryGraph;
use atomizer_db::LedgerDb;
use atomizer_engine::{
    Atomizer, AtomizerConfig, CommitSource, ExtractError, Extractor, LlmConfig, LlmExtractor,
    ScriptedHistory,
};
use serde_json::json;
use tempfile::TempDir;

// ── fixtures ─────────────────────────────────────────────────────────────────

const REPO: &str = "acme/web";
const API_KEY: &str = "sk-test-0123456789";

/// One received request: request line plus headers, lowercased
type RequestHead = String;

/// Serves one scripted `(status, body)` per request on 127.0.0.1
struct Responder {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RequestHead>>>,
}

impl Responder {
    fn start<F>(script: F) -> Self
    where
        F: Fn(usize) -> (u16, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        thread::spawn(move || {
            for (idx, stream) in listener.incoming().enumerate() {
                let Ok(stream) = stream else { break };
                let head = serve(stream, &script, idx);
                seen.lock().unwrap().push(head);
            }
        });

        Self { addr, requests }
    }

    fn endpoint(&self) -> String {
        format!("http://{}/v1beta", self.addr)
    }

    fn requests(&self) -> Vec<RequestHead> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve<F>(mut stream: TcpStream, script: &F, idx: usize) -> RequestHead
where
    F: Fn(usize) -> (u16, String),
{
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut head = String::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(value) = lower.strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
        head.push_str(&lower);
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).unwrap();

    let (status, payload) = script(idx);
    let response = format!(
        "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        payload.len(),
        payload
    );
    stream.write_all(response.as_bytes()).unwrap();
    stream.flush().unwrap();
    head
}

/// `generateContent` envelope around the model's JSON answer
fn model_reply(summary: &str, file: &str, block: &str) -> (u16, String) {
    let answer = json!({
        "llm_intent_summary": summary,
        "change_events": [{
            "behavior": "CREATE_BLOCK",
            "target_file": file,
            "target_block_name": block,
            "block_type": "function",
        }],
    });
    let envelope = json!({
        "candidates": [{"content": {"parts": [{"text": answer.to_string()}]}}],
    });
    (200, envelope.to_string())
}

fn rate_limited() -> (u16, String) {
    (429, r#"{"error": {"status": "RESOURCE_EXHAUSTED"}}"#.to_string())
}

fn tuning(max_retries: u32, max_chunk_chars: usize) -> AtomizerConfig {
    AtomizerConfig {
        batch_delay: Duration::ZERO,
        backoff_base: Duration::ZERO,
        max_retries,
        max_chunk_chars,
        ..AtomizerConfig::default()
    }
}

fn extractor(endpoint: String, tuning: &AtomizerConfig) -> Result<LlmExtractor> {
    let config = LlmConfig {
        endpoint,
        timeout: Duration::from_secs(5),
        ..LlmConfig::default()
    }
    .with_api_key(API_KEY);
    LlmExtractor::new(config, tuning)
}

fn code(path: &str) -> FileDiff {
    let body: String = (0..8).map(|i| format!("+    step_{}()\n", i)).collect();
    FileDiff::new(path, FileStatus::Modified, &format!("@@ -1,1 +1,9 @@\n def run():\n{}", body))
}

fn history(files: Vec<FileDiff>) -> ScriptedHistory {
    ScriptedHistory::new().commit("c1", &[], files)
}

fn first_commit(history: &ScriptedHistory) -> Result<CommitRecord> {
    Ok(history.commits()?.remove(0))
}

// ── retries ──────────────────────────────────────────────────────────────────

#[test]
fn test_rate_limit_then_success() -> Result<()> {
    let responder = Responder::start(|idx| match idx {
        0 | 1 => rate_limited(),
        _ => model_reply("add run", "src/a.py", "run"),
    });
    let files = vec![code("src/a.py")];
    let commit = first_commit(&history(files.clone()))?;

    let mut llm = extractor(responder.endpoint(), &tuning(5, 15_000))?;
    let extraction = llm.extract(&commit, &files)?;

    assert_eq!(extraction.calls, 3);
    assert_eq!(extraction.summary, "add run");
    assert_eq!(extraction.events.len(), 1);
    assert_eq!(extraction.events[0].block_name(), "run");
    assert_eq!(responder.requests().len(), 3);
    Ok(())
}

#[test]
fn test_persistent_rate_limit_leaves_commit_failed() -> Result<()> {
    let responder = Responder::start(|_| rate_limited());
    let history = history(vec![code("src/a.py")]);
    let config = tuning(2, 15_000);

    let commit = first_commit(&history)?;
    let mut llm = extractor(responder.endpoint(), &config)?;
    let err = llm.extract(&commit, &[code("src/a.py")]).unwrap_err();
    assert!(matches!(err, ExtractError::Exhausted { attempts: 3, .. }), "got: {:?}", err);
    assert_eq!(responder.requests().len(), 3);

    let dir = TempDir::new()?;
    let ledger = LedgerDb::open(dir.path().join("ledger"))?;
    let graph = MemoryGraph::new();
    let summary = Atomizer::new(REPO, &ledger, &graph, &PathIdentity)
        .with_config(config)
        .run(&history, &mut llm)?;

    assert_eq!(summary.processed, 0);
    assert_eq!(summary.extraction_failures, 1);
    assert_eq!(summary.extractor_calls, 3);
    assert!(!ledger.is_commit_processed(REPO, "c1")?);

    let failed = ledger.failed_commits(REPO)?;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "c1");
    assert_eq!(failed[0].1.attempts, 3);
    Ok(())
}

#[test]
fn test_rejected_request_is_not_retried() -> Result<()> {
    let responder = Responder::start(|_| (400, r#"{"error": "bad request"}"#.to_string()));
    let files = vec![code("src/a.py")];
    let commit = first_commit(&history(files.clone()))?;

    let mut llm = extractor(responder.endpoint(), &tuning(5, 15_000))?;
    let err = llm.extract(&commit, &files).unwrap_err();
    assert!(matches!(err, ExtractError::Rejected { status: 400, .. }), "got: {:?}", err);
    assert_eq!(err.attempts(), 1);
    assert_eq!(responder.requests().len(), 1);
    Ok(())
}

// ── chunking ─────────────────────────────────────────────────────────────────

#[test]
fn test_chunked_commit_merges_events() -> Result<()> {
    let responder = Responder::start(|idx| match idx {
        0 => model_reply("first half", "src/a.py", "alpha"),
        _ => model_reply("second half", "src/b.py", "beta"),
    });
    let files = vec![code("src/a.py"), code("src/b.py")];
    let commit = first_commit(&history(files.clone()))?;

    let mut llm = extractor(responder.endpoint(), &tuning(0, 200))?;
    let extraction = llm.extract(&commit, &files)?;

    assert_eq!(extraction.calls, 2);
    assert_eq!(extraction.summary, "first half");
    let names: Vec<&str> = extraction.events.iter().map(|e| e.block_name()).collect();
    assert_eq!(names, ["alpha", "beta"]);
    Ok(())
}

#[test]
fn test_failed_chunk_counts_earlier_calls() -> Result<()> {
    let responder = Responder::start(|idx| match idx {
        0 => model_reply("first half", "src/a.py", "alpha"),
        _ => rate_limited(),
    });
    let files = vec![code("src/a.py"), code("src/b.py")];
    let commit = first_commit(&history(files.clone()))?;

    let mut llm = extractor(responder.endpoint(), &tuning(1, 200))?;
    let err = llm.extract(&commit, &files).unwrap_err();

    assert_eq!(err.attempts(), 3);
    assert_eq!(responder.requests().len(), 3);
    Ok(())
}

// ── credentials ──────────────────────────────────────────────────────────────

#[test]
fn test_api_key_sent_as_header_only() -> Result<()> {
    let responder = Responder::start(|_| model_reply("add run", "src/a.py", "run"));
    let files = vec![code("src/a.py")];
    let commit = first_commit(&history(files.clone()))?;

    let mut llm = extractor(responder.endpoint(), &tuning(0, 15_000))?;
    llm.extract(&commit, &files)?;

    let requests = responder.requests();
    assert_eq!(requests.len(), 1);
    let key = API_KEY.to_ascii_lowercase();
    let request_line = requests[0].lines().next().unwrap_or_default();
    assert!(
        request_line.starts_with("post /v1beta/models/gemini-2.0-flash:generatecontent "),
        "got: {}",
        request_line
    );
    assert!(!request_line.contains(&key), "key leaked into the URL: {}", request_line);
    assert!(requests[0].contains(&format!("x-goog-api-key: {}", key)));
    Ok(())
}

#[test]
fn test_api_key_absent_from_failures() -> Result<()> {
    // Bind and drop to get a port nobody listens on
    let closed = TcpListener::bind("127.0.0.1:0")?.local_addr()?;
    let history = history(vec![code("src/a.py")]);
    let config = tuning(1, 15_000);

    let commit = first_commit(&history)?;
    let mut llm = extractor(format!("http://{}/v1beta", closed), &config)?;
    let err = llm.extract(&commit, &[code("src/a.py")]).unwrap_err();
    assert!(!err.to_string().contains(API_KEY), "got: {}", err);
    assert!(!format!("{:?}", err).contains(API_KEY), "got: {:?}", err);

    let dir = TempDir::new()?;
    let ledger = LedgerDb::open(dir.path().join("ledger"))?;
    let graph = MemoryGraph::new();
    let summary = Atomizer::new(REPO, &ledger, &graph, &PathIdentity)
        .with_config(config)
        .run(&history, &mut llm)?;
    assert_eq!(summary.extraction_failures, 1);

    let failed = ledger.failed_commits(REPO)?;
    assert_eq!(failed.len(), 1);
    assert!(!failed[0].1.reason.contains(API_KEY), "got: {}", failed[0].1.reason);
    Ok(())
}
