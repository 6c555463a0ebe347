use std::fs::{self, File};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use chrono::Utc;
use reqwest::Method;
use scraper::Html;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use super::cli::{BrowserArg, WebDriverArgs};
use super::error::BrowserError;
use super::types::Timings;
use super::ui_utils::truncate_for_log;

/// The slice of a live browser session the pipeline needs.
///
/// Element lookups that find nothing are reported as `Ok(false)`, not errors.
pub trait Browser {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError>;
    async fn ready_state(&mut self) -> Result<String, BrowserError>;
    async fn page_source(&mut self) -> Result<String, BrowserError>;
    async fn current_url(&mut self) -> Result<String, BrowserError>;
    /// Clicks the first element matching `selector`.
    async fn click(&mut self, selector: &str) -> Result<bool, BrowserError>;
    /// Replaces the value of the first input matching `selector`.
    async fn fill(&mut self, selector: &str, text: &str) -> Result<bool, BrowserError>;
}

/// A browser the caller owns and must release when its work is done.
pub trait Session: Browser {
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Parses the current DOM of the session into a static document.
pub async fn snapshot<B: Browser>(browser: &mut B) -> Result<Html, BrowserError> {
    let source = browser.page_source().await?;
    Ok(Html::parse_document(&source))
}

const CLICK_SCRIPT: &str = r#"
    const el = document.querySelector(arguments[0]);
    if (!el) { return false; }
    el.click();
    return true;
"#;

/// A W3C WebDriver session spoken to over plain HTTP.
pub struct WebDriverSession {
    client: reqwest::Client,
    base: String,
    session_id: String,
}

impl WebDriverSession {
    pub async fn create(
        endpoint: &str,
        browser: BrowserArg,
        headless: bool,
        timings: &Timings,
    ) -> Result<Self, BrowserError> {
        let client = reqwest::Client::builder()
            .timeout(timings.page_load_timeout + Duration::from_secs(10))
            .build()
            .map_err(|e| BrowserError::Transport(format!("webdriver client build failed: {e}")))?;
        let base = endpoint.trim_end_matches('/').to_string();
        let caps = webdriver_capabilities(browser, headless);
        let value = send(&client, Method::POST, &format!("{base}/session"), Some(caps)).await?;
        let session_id = value
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .or_else(|| value.pointer("/sessionId").and_then(Value::as_str))
            .map(str::to_string)
            .ok_or_else(|| {
                BrowserError::Decode(format!(
                    "session id missing in response: {}",
                    truncate_for_log(&value.to_string(), 220)
                ))
            })?;

        let session = Self {
            client,
            base,
            session_id,
        };
        session
            .command(
                Method::POST,
                "timeouts",
                Some(json!({
                    "pageLoad": timings.page_load_timeout.as_millis() as u64,
                    "script": timings.script_timeout.as_millis() as u64,
                })),
            )
            .await?;
        info!(?browser, session = %session.session_id, "webdriver session created");
        Ok(session)
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BrowserError> {
        let url = if path.is_empty() {
            format!("{}/session/{}", self.base, self.session_id)
        } else {
            format!("{}/session/{}/{}", self.base, self.session_id, path)
        };
        send(&self.client, method, &url, body).await
    }

    async fn execute(&self, script: &str, args: Value) -> Result<Value, BrowserError> {
        let value = self
            .command(
                Method::POST,
                "execute/sync",
                Some(json!({ "script": script, "args": args })),
            )
            .await?;
        Ok(value.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn find_element(&self, selector: &str) -> Result<Option<String>, BrowserError> {
        let found = self
            .command(
                Method::POST,
                "element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await;
        match found {
            Ok(value) => Ok(element_id(&value)),
            Err(err) if err.is_missing_element() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Browser for WebDriverSession {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn ready_state(&mut self) -> Result<String, BrowserError> {
        let value = self
            .execute("return document.readyState;", json!([]))
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        let value = self.command(Method::GET, "source", None).await?;
        Ok(value
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn current_url(&mut self) -> Result<String, BrowserError> {
        let value = self.command(Method::GET, "url", None).await?;
        Ok(value
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn click(&mut self, selector: &str) -> Result<bool, BrowserError> {
        match self.execute(CLICK_SCRIPT, json!([selector])).await {
            Ok(value) => Ok(value.as_bool().unwrap_or(false)),
            Err(err) if err.is_missing_element() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<bool, BrowserError> {
        let Some(id) = self.find_element(selector).await? else {
            return Ok(false);
        };
        let typed = async {
            self.command(Method::POST, &format!("element/{id}/clear"), Some(json!({})))
                .await?;
            self.command(
                Method::POST,
                &format!("element/{id}/value"),
                Some(json!({ "text": text })),
            )
            .await
        };
        match typed.await {
            Ok(_) => Ok(true),
            Err(err) if err.is_missing_element() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl Session for WebDriverSession {
    async fn close(&mut self) -> Result<(), BrowserError> {
        self.command(Method::DELETE, "", None).await?;
        info!(session = %self.session_id, "webdriver session closed");
        Ok(())
    }
}

async fn send(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, BrowserError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let res = request
        .send()
        .await
        .map_err(|e| BrowserError::Transport(e.to_string()))?;
    let status = res.status();
    let text = res
        .text()
        .await
        .map_err(|e| BrowserError::Transport(format!("response read failed: {e}")))?;

    let value: Value = serde_json::from_str(&text).unwrap_or_default();
    if let Some(kind) = value.pointer("/value/error").and_then(Value::as_str) {
        let message = value
            .pointer("/value/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown webdriver error");
        return Err(BrowserError::Protocol {
            kind: kind.to_string(),
            message: truncate_for_log(message, 240),
        });
    }
    if !status.is_success() {
        return Err(BrowserError::Http {
            status: status.as_u16(),
            body: truncate_for_log(&text, 240),
        });
    }
    Ok(value)
}

/// Element references are keyed by a fixed UUID-like name; take whichever
/// string the driver put there.
fn element_id(value: &Value) -> Option<String> {
    value
        .get("value")?
        .as_object()?
        .values()
        .find_map(Value::as_str)
        .map(str::to_string)
}

fn webdriver_capabilities(browser: BrowserArg, headless: bool) -> Value {
    match browser {
        BrowserArg::Firefox => {
            let mut args = Vec::<String>::new();
            if headless {
                args.push("-headless".to_string());
            }
            args.push("--width=1920".to_string());
            args.push("--height=1080".to_string());
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "firefox",
                        "pageLoadStrategy": "normal",
                        "acceptInsecureCerts": true,
                        "moz:firefoxOptions": { "args": args }
                    }
                }
            })
        }
        BrowserArg::Edge => {
            let mut args = Vec::<String>::new();
            if headless {
                args.push("--headless=new".to_string());
            }
            args.push("--window-size=1920,1080".to_string());
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "MicrosoftEdge",
                        "pageLoadStrategy": "normal",
                        "acceptInsecureCerts": true,
                        "ms:edgeOptions": { "args": args }
                    }
                }
            })
        }
        BrowserArg::Chrome => {
            let mut args = Vec::<String>::new();
            let profile_dir = std::env::temp_dir().join(format!(
                "roofscout-chrome-profile-{}-{}",
                std::process::id(),
                Utc::now().timestamp_millis()
            ));
            let _ = fs::create_dir_all(&profile_dir);
            args.push(format!("--user-data-dir={}", profile_dir.display()));
            if headless {
                args.push("--headless=new".to_string());
            }
            args.push("--window-size=1920,1080".to_string());
            args.push("--disable-gpu".to_string());
            args.push("--disable-dev-shm-usage".to_string());
            args.push("--no-first-run".to_string());
            args.push("--no-default-browser-check".to_string());
            if !cfg!(target_os = "macos") {
                args.push("--no-sandbox".to_string());
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "chrome",
                        "pageLoadStrategy": "normal",
                        "acceptInsecureCerts": true,
                        "goog:chromeOptions": { "args": args }
                    }
                }
            })
        }
    }
}

/// A driver binary started by us; killed when dropped.
pub struct DriverProcess {
    child: Child,
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        debug!("webdriver process stopped");
    }
}

/// Makes sure something is listening at the configured endpoint, starting a
/// local driver if allowed.
pub async fn ensure_webdriver(args: &WebDriverArgs) -> Result<Option<DriverProcess>, BrowserError> {
    if webdriver_reachable(&args.webdriver_url) {
        debug!(endpoint = %args.webdriver_url, "webdriver already reachable");
        return Ok(None);
    }
    if args.no_webdriver_autostart {
        return Err(BrowserError::Unavailable(format!(
            "nothing listening at {} and autostart is disabled",
            args.webdriver_url
        )));
    }
    start_webdriver(args).await.map(Some)
}

fn webdriver_reachable(endpoint: &str) -> bool {
    let parsed = match Url::parse(endpoint) {
        Ok(u) => u,
        Err(_) => return false,
    };
    let host = match parsed.host_str() {
        Some(h) => h,
        None => return false,
    };
    let port = parsed.port_or_known_default().unwrap_or(4444);
    let Ok(addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok())
}

async fn start_webdriver(args: &WebDriverArgs) -> Result<DriverProcess, BrowserError> {
    let endpoint = args.webdriver_url.as_str();
    let parsed = Url::parse(endpoint)
        .map_err(|e| BrowserError::Unavailable(format!("invalid webdriver url: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| BrowserError::Unavailable("webdriver url has no host".to_string()))?
        .to_ascii_lowercase();
    if host != "localhost" && host != "127.0.0.1" {
        return Err(BrowserError::Unavailable(
            "autostart only supports localhost endpoints".to_string(),
        ));
    }
    let port = parsed.port_or_known_default().unwrap_or(4444);
    let binary = args
        .webdriver_binary
        .clone()
        .unwrap_or_else(|| default_driver_binary(args.browser).to_string());

    let log_path = webdriver_log_path(port);
    let log_file = File::options()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path)
        .map_err(|e| {
            BrowserError::Unavailable(format!(
                "failed to open webdriver log {}: {e}",
                log_path.display()
            ))
        })?;
    let log_file_err = log_file.try_clone().map_err(|e| {
        BrowserError::Unavailable(format!("failed to clone webdriver log handle: {e}"))
    })?;

    let mut cmd = Command::new(&binary);
    configure_webdriver_command(&mut cmd, &binary, port);
    cmd.stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err))
        .stdin(Stdio::null());
    let child = cmd
        .spawn()
        .map_err(|e| BrowserError::Unavailable(format!("failed to spawn {binary}: {e}")))?;
    let mut process = DriverProcess { child };
    info!(%binary, port, "starting webdriver");

    let steps = (args.webdriver_start_timeout_ms / 200).max(1);
    for _ in 0..steps {
        if webdriver_reachable(endpoint) {
            return Ok(process);
        }
        if let Ok(Some(status)) = process.child.try_wait() {
            let mut message = format!(
                "{binary} exited early with status {status} (log: {})",
                log_path.display()
            );
            if let Some(tail) = read_log_tail(&log_path, 30) {
                message = format!("{message}; tail: {tail}");
            }
            return Err(BrowserError::Unavailable(message));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let mut message = format!(
        "{binary} did not become ready in time (log: {})",
        log_path.display()
    );
    if let Some(tail) = read_log_tail(&log_path, 30) {
        message = format!("{message}; tail: {tail}");
    }
    Err(BrowserError::Unavailable(message))
}

fn default_driver_binary(browser: BrowserArg) -> &'static str {
    match browser {
        BrowserArg::Chrome => "chromedriver",
        BrowserArg::Firefox => "geckodriver",
        BrowserArg::Edge => "msedgedriver",
    }
}

fn configure_webdriver_command(cmd: &mut Command, bin: &str, port: u16) {
    let lower = bin.to_ascii_lowercase();
    if lower.contains("geckodriver") {
        cmd.arg("--port").arg(port.to_string());
        return;
    }
    cmd.arg(format!("--port={port}"));
    if lower.contains("chromedriver") {
        cmd.arg("--log-level=SEVERE");
    }
}

fn webdriver_log_path(port: u16) -> PathBuf {
    std::env::temp_dir().join(format!("roofscout-webdriver-{port}.log"))
}

fn read_log_tail(path: &Path, lines: usize) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    let tail = text
        .lines()
        .rev()
        .take(lines.max(1))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join(" | ");
    if tail.is_empty() { None } else { Some(tail) }
}
