#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// `chatsift` isolated from the caller's config, dotenv and API keys.
pub fn chatsift(dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chatsift");
    cmd.current_dir(dir)
        .env("CHATSIFT_HOME", dir)
        .env("CHATSIFT_CONFIG_PATH", dir.join("absent-chatsift.toml"))
        .env_remove("OPENAI_API_KEY")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("CHATSIFT_API_KEY")
        .env_remove("CHATSIFT_PROVIDER")
        .env_remove("CHATSIFT_MODEL")
        .env_remove("HTTP_PROXY")
        .env_remove("http_proxy")
        .env_remove("ALL_PROXY")
        .env_remove("all_proxy")
        .env("RUST_LOG", "warn");
    cmd
}

/// Form-feed separated export with one chat header per page.
pub fn write_export(path: &Path, pages: &[&str]) {
    std::fs::write(path, pages.join("\x0c")).expect("write export");
}

/// Minimal Ollama-compatible server answering every generate call with `reply`.
pub struct StubModel {
    pub url: String,
    generate_calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl StubModel {
    pub fn start(reply: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
        let url = format!("http://{}", listener.local_addr().expect("local addr"));
        let generate_calls = Arc::new(AtomicUsize::new(0));
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let body = serde_json::json!({ "model": "stub", "response": reply, "done": true })
            .to_string();

        let calls = Arc::clone(&generate_calls);
        let seen = Arc::clone(&prompts);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                serve(stream, &body, &calls, &seen);
            }
        });
        Self {
            url,
            generate_calls,
            prompts,
        }
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

fn serve(stream: TcpStream, body: &str, calls: &AtomicUsize, prompts: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    let mut payload = vec![0u8; content_length];
    if reader.read_exact(&mut payload).is_err() {
        return;
    }

    let (status, response) = if request_line.starts_with("GET /api/tags") {
        ("200 OK", r#"{"models":[{"name":"stub"}]}"#.to_string())
    } else if request_line.starts_with("POST /api/generate") {
        calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(json) = serde_json::from_slice::<serde_json::Value>(&payload)
            && let Some(prompt) = json.get("prompt").and_then(|p| p.as_str())
        {
            prompts.lock().expect("prompts lock").push(prompt.to_string());
        }
        ("200 OK", body.to_string())
    } else {
        ("404 Not Found", r#"{"error":"not found"}"#.to_string())
    };

    let mut stream = reader.into_inner();
    let _ = write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{response}",
        response.len()
    );
    let _ = stream.flush();
}
