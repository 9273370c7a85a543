//! SSE proxy server. Raw tokio TCP accept loop; each connection is read
//! with httparse, routed, and answered by hand-written HTTP. Streaming
//! routes bridge one inbound POST to one upstream completion request:
//! deltas cross an unbounded channel from the upstream task to the
//! response writer, every route converts its failures into a well-formed
//! response (400/500 JSON before streaming, a single `error` frame
//! after), and the connection is never left hanging.

use crate::prompts::{build_chat_system_prompt, build_html_system_prompt, load_knowledge_base};
use crate::schema::{AiResponse, ChatRequest, HtmlRequest, StreamEvent};
use crate::transcribe::Transcriber;
use crate::upstream::OpenRouterClient;
use crate::Config;
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

pub const MISSING_OPENROUTER_KEY: &str =
    "API ключ не настроен. Добавьте OPENROUTER_API_KEY в переменные окружения.";
pub const MISSING_ASSEMBLYAI_KEY: &str =
    "API ключ не настроен. Добавьте ASSEMBLYAI_API_KEY в переменные окружения.";

const SSE_HEADERS: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: keep-alive\r\nAccess-Control-Allow-Origin: *\r\n\r\n";

const MAX_HEAD_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// A connection that sends no byte for this long is dropped.
const READ_IDLE_LIMIT: Duration = Duration::from_secs(30);

struct ServerState {
    config: Config,
    knowledge: String,
}

impl ServerState {
    fn openrouter(&self, api_key: String) -> OpenRouterClient {
        let client = OpenRouterClient::new(api_key);
        match &self.config.openrouter_base_url {
            Some(base) => client.with_base_url(base.as_str()),
            None => client,
        }
    }
}

/// Bind and run the widget server.
pub async fn serve(host: &str, port: u16, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("{}:{}", host, port)).await?;
    eprintln!(
        "{}",
        format!("  Mira widget running at http://{}:{}", host, port).bright_green()
    );
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());
    run(listener, config).await
}

/// Accept loop on an already-bound listener (tests bind port 0).
pub async fn run(listener: TcpListener, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let knowledge = load_knowledge_base(&config.knowledge_path);
    let state = Arc::new(ServerState { config, knowledge });

    loop {
        let (stream, addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                warn!(%addr, error = %e, "connection error");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<ServerState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let request = read_request(&mut stream, READ_IDLE_LIMIT).await?;
    info!(method = %request.method, path = %request.path, "request");

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => {
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                INDEX_HTML.len(),
                INDEX_HTML,
            );
            stream.write_all(response.as_bytes()).await?;
        }
        ("POST", "/api/chat/stream") => chat_stream(&mut stream, &state, &request.body).await?,
        ("POST", "/api/html/stream") => html_stream(&mut stream, &state, &request.body).await?,
        ("POST", "/api/chat") => chat_once(&mut stream, &state, &request.body).await?,
        ("POST", "/api/transcribe") => {
            transcribe_route(&mut stream, &state, &request).await?;
        }
        _ => {
            let response =
                "HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nNot Found";
            stream.write_all(response.as_bytes()).await?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Streaming routes
// ---------------------------------------------------------------------------

async fn chat_stream(
    stream: &mut TcpStream,
    state: &ServerState,
    body: &[u8],
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let request: ChatRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(_) => return write_json(stream, 400, &error_body("Invalid request format")).await,
    };
    let api_key = match &state.config.openrouter_api_key {
        Some(k) => k.clone(),
        None => return write_json(stream, 500, &error_body(MISSING_OPENROUTER_KEY)).await,
    };

    stream.write_all(SSE_HEADERS.as_bytes()).await?;
    write_frame(stream, &StreamEvent::ChatStart).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let prompt = build_chat_system_prompt(&state.knowledge);
    let messages = request.messages;
    let upstream = state.openrouter(api_key);
    let task = tokio::spawn(async move {
        upstream
            .stream_chat(&prompt, &messages, tx)
            .await
            .map_err(|e| e.to_string())
    });

    while let Some(delta) = rx.recv().await {
        if write_frame(stream, &StreamEvent::ChatChunk { content: delta })
            .await
            .is_err()
        {
            break;
        }
    }

    match task.await {
        Ok(Ok(full_message)) => {
            write_frame(stream, &StreamEvent::ChatEnd { full_message }).await?;
        }
        Ok(Err(message)) => {
            warn!(%message, "chat upstream failed");
            write_frame(stream, &StreamEvent::Error { message }).await?;
        }
        Err(e) => {
            write_frame(stream, &StreamEvent::Error { message: e.to_string() }).await?;
        }
    }
    let _ = stream.write_all(b"data: [DONE]\n\n").await;
    Ok(())
}

async fn html_stream(
    stream: &mut TcpStream,
    state: &ServerState,
    body: &[u8],
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let request: HtmlRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(_) => return write_json(stream, 400, &error_body("Invalid request format")).await,
    };
    let api_key = match &state.config.openrouter_api_key {
        Some(k) => k.clone(),
        None => return write_json(stream, 500, &error_body(MISSING_OPENROUTER_KEY)).await,
    };

    stream.write_all(SSE_HEADERS.as_bytes()).await?;
    write_frame(stream, &StreamEvent::HtmlStart).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let prompt = build_html_system_prompt(
        &state.knowledge,
        &request.conversation_context,
        request.current_html.as_deref(),
        &request.last_user_message,
    );
    let question = request.last_user_message;
    let upstream = state.openrouter(api_key);
    let task = tokio::spawn(async move {
        upstream
            .stream_html(&prompt, &question, tx)
            .await
            .map_err(|e| e.to_string())
    });

    while let Some(delta) = rx.recv().await {
        if write_frame(stream, &StreamEvent::HtmlChunk { content: delta })
            .await
            .is_err()
        {
            break;
        }
    }

    match task.await {
        Ok(Ok(full)) => {
            // Empty generations signal "no panel update needed".
            let trimmed = full.trim();
            let full_html = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
            write_frame(stream, &StreamEvent::HtmlEnd { full_html }).await?;
        }
        Ok(Err(message)) => {
            warn!(%message, "html upstream failed");
            write_frame(stream, &StreamEvent::Error { message }).await?;
        }
        Err(e) => {
            write_frame(stream, &StreamEvent::Error { message: e.to_string() }).await?;
        }
    }
    let _ = stream.write_all(b"data: [DONE]\n\n").await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Non-streaming routes
// ---------------------------------------------------------------------------

async fn chat_once(
    stream: &mut TcpStream,
    state: &ServerState,
    body: &[u8],
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let request: ChatRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(_) => return write_json(stream, 400, &error_body("Invalid request format")).await,
    };
    let api_key = match &state.config.openrouter_api_key {
        Some(k) => k.clone(),
        None => return write_json(stream, 500, &error_body(MISSING_OPENROUTER_KEY)).await,
    };

    // Drain the delta channel; only the assembled text matters here.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let prompt = build_chat_system_prompt(&state.knowledge);
    let upstream = state.openrouter(api_key);
    let result = upstream.stream_chat(&prompt, &request.messages, tx).await;
    let _ = drain.await;

    match result {
        Ok(message) => {
            let payload = serde_json::to_string(&AiResponse { message, html: None })?;
            write_json(stream, 200, &payload).await
        }
        Err(e) => write_json(stream, 500, &error_body(&e.to_string())).await,
    }
}

async fn transcribe_route(
    stream: &mut TcpStream,
    state: &ServerState,
    request: &Request,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let audio = request
        .header("content-type")
        .and_then(extract_boundary)
        .and_then(|boundary| parse_multipart_field(&request.body, &boundary, "audio"));
    let audio = match audio {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => return write_json(stream, 400, &error_body("No audio file provided")).await,
    };
    let api_key = match &state.config.assemblyai_api_key {
        Some(k) => k.clone(),
        None => return write_json(stream, 500, &error_body(MISSING_ASSEMBLYAI_KEY)).await,
    };

    match Transcriber::new(api_key).transcribe(audio).await {
        Ok(text) => {
            let payload = serde_json::to_string(&serde_json::json!({ "text": text }))?;
            write_json(stream, 200, &payload).await
        }
        Err(e) => write_json(stream, 500, &error_body(&e.to_string())).await,
    }
}

// ---------------------------------------------------------------------------
// HTTP plumbing
// ---------------------------------------------------------------------------

struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

async fn read_request(
    stream: &mut TcpStream,
    idle: Duration,
) -> Result<Request, Box<dyn std::error::Error + Send + Sync>> {
    let mut buf: Vec<u8> = Vec::with_capacity(8192);
    let mut tmp = [0u8; 8192];
    let head_end = loop {
        let n = timeout(idle, stream.read(&mut tmp))
            .await
            .map_err(|_| "connection idle while reading request head")??;
        if n == 0 {
            return Err("connection closed before request head".into());
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err("request head too large".into());
        }
    };

    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut header_storage);
    parsed.parse(&buf[..head_end])?;
    let method = parsed.method.unwrap_or("").to_string();
    let path = parsed
        .path
        .unwrap_or("/")
        .split('?')
        .next()
        .unwrap_or("/")
        .to_string();
    let headers: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err("request body too large".into());
    }

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = timeout(idle, stream.read(&mut tmp))
            .await
            .map_err(|_| "connection idle while reading request body")??;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&tmp[..n]);
    }
    body.truncate(content_length);

    Ok(Request {
        method,
        path,
        headers,
        body,
    })
}

async fn write_json(
    stream: &mut TcpStream,
    status: u16,
    body: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        _ => "Internal Server Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body,
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

fn error_body(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// One SSE frame: `data: <json>\n\n`.
pub fn sse_frame(event: &StreamEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(_) => String::new(),
    }
}

async fn write_frame(
    stream: &mut TcpStream,
    event: &StreamEvent,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    stream.write_all(sse_frame(event).as_bytes()).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Multipart
// ---------------------------------------------------------------------------

fn extract_boundary(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

/// Pull the bytes of one named field out of a multipart/form-data body.
fn parse_multipart_field(body: &[u8], boundary: &str, field: &str) -> Option<Vec<u8>> {
    let delimiter = format!("--{}", boundary);
    let delim = delimiter.as_bytes();
    let needle = format!("name=\"{}\"", field);

    let mut pos = find_subslice(body, delim)? + delim.len();
    loop {
        // "--" after a delimiter marks the closing boundary.
        if body[pos..].starts_with(b"--") {
            return None;
        }
        let part_start = if body[pos..].starts_with(b"\r\n") {
            pos + 2
        } else {
            pos
        };
        let part = &body[part_start..];
        let header_end = find_subslice(part, b"\r\n\r\n")?;
        let headers = String::from_utf8_lossy(&part[..header_end]);
        let content_start = header_end + 4;

        let next_delim = find_subslice(&part[content_start..], delim)?;
        let mut content = &part[content_start..content_start + next_delim];
        if content.ends_with(b"\r\n") {
            content = &content[..content.len() - 2];
        }

        if headers.to_ascii_lowercase().contains("content-disposition")
            && headers.contains(&needle)
        {
            return Some(content.to_vec());
        }

        pos = part_start + content_start + next_delim + delim.len();
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ---------------------------------------------------------------------------
// Embedded widget page
// ---------------------------------------------------------------------------

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="ru">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Mira</title>
<style>
* { box-sizing: border-box; margin: 0; padding: 0; }
body { font-family: -apple-system, 'Segoe UI', sans-serif; background: #f3f4f6; height: 100vh; display: flex; }
#chat { width: 380px; display: flex; flex-direction: column; background: #fff; border-right: 1px solid #e5e7eb; }
#messages { flex: 1; overflow-y: auto; padding: 16px; }
.msg { margin-bottom: 12px; padding: 10px 14px; border-radius: 12px; max-width: 85%; white-space: pre-wrap; }
.msg.user { background: #2563eb; color: #fff; margin-left: auto; }
.msg.assistant { background: #f3f4f6; color: #111827; }
#composer { display: flex; gap: 8px; padding: 12px; border-top: 1px solid #e5e7eb; }
#input { flex: 1; padding: 10px; border: 1px solid #d1d5db; border-radius: 8px; font-size: 14px; }
button { border: 0; border-radius: 8px; padding: 10px 14px; background: #2563eb; color: #fff; cursor: pointer; font-size: 14px; }
button:disabled { opacity: .5; cursor: default; }
#mic.rec { background: #dc2626; }
#reset { background: #6b7280; }
#panel { flex: 1; overflow-y: auto; padding: 24px; }
#lightbox { display: none; position: fixed; inset: 0; background: rgba(0,0,0,.8); align-items: center; justify-content: center; z-index: 10; }
#lightbox img { max-width: 90%; max-height: 90%; }
</style>
</head>
<body>
<div id="chat">
  <div id="messages"></div>
  <div id="composer">
    <input id="input" placeholder="Напишите сообщение..." autocomplete="off">
    <button id="mic" title="Голосовое сообщение">🎤</button>
    <button id="send">➤</button>
    <button id="reset" title="Начать заново">⟳</button>
  </div>
</div>
<div id="panel"></div>
<div id="lightbox"></div>
<script>
const messagesEl = document.getElementById('messages');
const panelEl = document.getElementById('panel');
const inputEl = document.getElementById('input');
let history = [];
let busy = false;
let turn = null; // AbortController of the in-flight turn

function addBubble(role, text) {
  const el = document.createElement('div');
  el.className = 'msg ' + role;
  el.textContent = text;
  messagesEl.appendChild(el);
  messagesEl.scrollTop = messagesEl.scrollHeight;
  return el;
}

// Longest prefix of the buffer that is safe to render: every opened tag
// closed, no tag cut mid-way. Mirrors the server-side commit rule.
const VOID = new Set(['area','base','br','col','embed','hr','img','input','link','meta','param','source','track','wbr']);
function stablePrefix(html) {
  let depth = 0, last = 0, i = 0;
  while (i < html.length) {
    const lt = html.indexOf('<', i);
    if (lt === -1) { if (depth === 0) last = html.length; break; }
    if (depth === 0) last = lt;
    if (html.startsWith('<!--', lt)) {
      const end = html.indexOf('-->', lt);
      if (end === -1) break;
      i = end + 3;
    } else {
      const gt = html.indexOf('>', lt);
      if (gt === -1) break;
      const inner = html.slice(lt + 1, gt);
      const name = inner.replace(/^\//, '').split(/[\s/]/)[0].toLowerCase();
      if (inner.startsWith('/')) { if (depth > 0) depth--; }
      else if (!VOID.has(name) && !inner.endsWith('/')) depth++;
      i = gt + 1;
    }
    if (depth === 0) last = i;
  }
  return html.slice(0, last);
}

async function streamSse(url, body, signal, onEvent) {
  const resp = await fetch(url, {
    method: 'POST',
    headers: { 'Content-Type': 'application/json' },
    body: JSON.stringify(body),
    signal,
  });
  if (!resp.ok) throw new Error('HTTP ' + resp.status);
  const reader = resp.body.getReader();
  const decoder = new TextDecoder();
  let buf = '';
  for (;;) {
    const { done, value } = await reader.read();
    if (done || signal.aborted) break;
    buf += decoder.decode(value, { stream: true });
    let nl;
    while ((nl = buf.indexOf('\n')) !== -1) {
      const line = buf.slice(0, nl).trim();
      buf = buf.slice(nl + 1);
      if (!line.startsWith('data: ')) continue;
      const payload = line.slice(6);
      if (payload === '[DONE]') continue;
      if (signal.aborted) return;
      try { onEvent(JSON.parse(payload)); } catch (e) {}
    }
  }
}

function renderPanel(html) {
  panelEl.innerHTML = html;
  panelEl.querySelectorAll('img').forEach(img => {
    img.style.cursor = 'zoom-in';
    img.onclick = () => {
      const big = document.createElement('img');
      big.src = img.src;
      lightbox.replaceChildren(big);
      lightbox.style.display = 'flex';
    };
  });
}
const lightbox = document.getElementById('lightbox');
lightbox.onclick = () => { lightbox.style.display = 'none'; };
document.addEventListener('keydown', e => {
  if (e.key === 'Escape') lightbox.style.display = 'none';
});

async function send() {
  const text = inputEl.value.trim();
  if (!text || busy) return;
  busy = true;
  if (turn) turn.abort();
  const controller = new AbortController();
  turn = controller;
  const signal = controller.signal;
  inputEl.value = '';
  addBubble('user', text);
  const userMsg = { id: crypto.randomUUID(), role: 'user', content: text, timestamp: Date.now() };
  history.push(userMsg);
  const context = history.map(m => m.role + ': ' + m.content).join('\n');

  let bubble = null, acc = '';
  const chat = streamSse('/api/chat/stream', { messages: history }, signal, ev => {
    if (ev.type === 'chat_start') { bubble = addBubble('assistant', ''); }
    else if (ev.type === 'chat_chunk') { acc += ev.content; if (bubble) bubble.textContent = acc; }
    else if (ev.type === 'chat_end') {
      acc = ev.fullMessage;
      if (bubble) bubble.textContent = acc;
      history.push({ id: crypto.randomUUID(), role: 'assistant', content: acc, timestamp: Date.now() });
    } else if (ev.type === 'error') {
      if (!bubble) bubble = addBubble('assistant', '');
      bubble.textContent = 'Извините, произошла ошибка. Попробуйте ещё раз.';
    }
  }).catch(() => {
    if (!signal.aborted) addBubble('assistant', 'Извините, произошла ошибка. Попробуйте ещё раз.');
  });

  let htmlBuf = '', committed = 0;
  const html = streamSse('/api/html/stream', {
    conversationContext: context,
    lastUserMessage: text,
    currentHtml: panelEl.innerHTML || null,
  }, signal, ev => {
    if (ev.type === 'html_chunk') {
      htmlBuf += ev.content;
      const stable = stablePrefix(htmlBuf);
      if (stable.length > committed) { committed = stable.length; renderPanel(stable); }
    } else if (ev.type === 'html_end' && ev.fullHtml) {
      renderPanel(ev.fullHtml);
    }
  }).catch(() => {});

  await Promise.allSettled([chat, html]);
  if (turn === controller) {
    turn = null;
    busy = false;
    inputEl.focus();
  }
}

document.getElementById('send').onclick = send;
inputEl.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });
document.getElementById('reset').onclick = () => {
  // Kill the in-flight streams first: late bytes must not repopulate
  // the bubble or the panel after the clear.
  if (turn) { turn.abort(); turn = null; }
  busy = false;
  history = [];
  messagesEl.replaceChildren();
  panelEl.replaceChildren();
};

let recorder = null;
document.getElementById('mic').onclick = async function () {
  if (recorder) { recorder.stop(); return; }
  try {
    const media = await navigator.mediaDevices.getUserMedia({ audio: true });
    const chunks = [];
    recorder = new MediaRecorder(media);
    this.classList.add('rec');
    recorder.ondataavailable = e => chunks.push(e.data);
    recorder.onstop = async () => {
      media.getTracks().forEach(t => t.stop());
      this.classList.remove('rec');
      recorder = null;
      const form = new FormData();
      form.append('audio', new Blob(chunks, { type: 'audio/webm' }), 'clip.webm');
      const resp = await fetch('/api/transcribe', { method: 'POST', body: form });
      const data = await resp.json();
      if (resp.ok && data.text) { inputEl.value = data.text; send(); }
      else addBubble('assistant', data.error || 'Не удалось распознать запись.');
    };
    recorder.start();
  } catch (e) {
    addBubble('assistant', 'Микрофон недоступен.');
  }
};
</script>
</body>
</html>
"#;
