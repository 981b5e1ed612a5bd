//! W3C WebDriver implementation of the browser capability
//!
//! Talks to an external chromedriver / msedgedriver over HTTP. The driver can
//! start a fresh browser with download preferences, attach to a browser the
//! user already logged in with (`debugger-address`), or reuse an existing
//! WebDriver session (`session-id`).

use crate::browser::{Browser, BrowserError, BrowserResult, DownloadWatcher, ElementHandle};
use crate::config::{BrowserConfig, BrowserKind};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// W3C web element identifier key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const NO_SUCH_ELEMENT: &str = "no such element";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Browser session driven through a WebDriver server
pub struct WebDriverBrowser {
    client: Client,
    endpoint: Url,
    session_id: String,
    owns_session: bool,
    kind: BrowserKind,
    download_dir: PathBuf,
    watcher: DownloadWatcher,
    poll_interval: Duration,
}

impl WebDriverBrowser {
    /// Connects to the WebDriver server and creates or attaches a session
    ///
    /// # Arguments
    ///
    /// * `config` - WebDriver connection settings
    /// * `download_dir` - Directory the browser must save files into
    ///
    /// # Returns
    ///
    /// * `Ok(WebDriverBrowser)` - A usable session
    /// * `Err(BrowserError)` - The driver was unreachable or refused the session
    pub async fn connect(config: &BrowserConfig, download_dir: &Path) -> BrowserResult<Self> {
        tokio::fs::create_dir_all(download_dir).await?;
        // Browsers need an absolute download path
        let download_dir = tokio::fs::canonicalize(download_dir).await?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.command_timeout_ms))
            .build()?;
        let endpoint = parse_endpoint(&config.webdriver_url)?;

        let (session_id, owns_session) = match &config.session_id {
            Some(id) => {
                info!("Reusing WebDriver session {}", id);
                (id.clone(), false)
            }
            None => {
                let id = create_session(&client, &endpoint, config, &download_dir).await?;
                info!("Created {:?} WebDriver session {}", config.kind, id);
                (id, true)
            }
        };

        let browser = Self {
            client,
            endpoint,
            session_id,
            owns_session,
            kind: config.kind,
            download_dir,
            watcher: DownloadWatcher::new(DEFAULT_POLL_INTERVAL),
            poll_interval: DEFAULT_POLL_INTERVAL,
        };

        // Preferences cannot be passed to an already-running browser
        if config.debugger_address.is_some() || config.session_id.is_some() {
            browser.configure_downloads().await;
        }

        Ok(browser)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Absolute directory downloads are saved to
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Ends the session if this process created it
    ///
    /// Attached sessions are left running so the user's browser stays open.
    pub async fn close(self) -> BrowserResult<()> {
        if !self.owns_session {
            return Ok(());
        }
        let url = self.session_url("")?;
        self.send(Method::DELETE, url, None).await?;
        debug!("Closed WebDriver session {}", self.session_id);
        Ok(())
    }

    /// Points downloads of an attached browser at the download directory via CDP
    async fn configure_downloads(&self) {
        let cdp_path = match self.kind {
            BrowserKind::Chrome => "goog/cdp/execute",
            BrowserKind::Edge => "ms/cdp/execute",
        };
        let directory = self.download_dir.display().to_string();

        for cmd in ["Browser.setDownloadBehavior", "Page.setDownloadBehavior"] {
            let body = json!({
                "cmd": cmd,
                "params": { "behavior": "allow", "downloadPath": directory },
            });
            let result = match self.session_url(cdp_path) {
                Ok(url) => self.send(Method::POST, url, Some(body)).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("Could not set download directory with {}: {}", cmd, e);
            }
        }
    }

    fn session_url(&self, path: &str) -> BrowserResult<Url> {
        let relative = if path.is_empty() {
            format!("session/{}", self.session_id)
        } else {
            format!("session/{}/{}", self.session_id, path)
        };
        self.endpoint.join(&relative).map_err(invalid_url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<Value>) -> BrowserResult<Value> {
        send_command(&self.client, method, url, body).await
    }

    async fn execute(&self, script: &str) -> BrowserResult<Value> {
        let url = self.session_url("execute/sync")?;
        self.send(Method::POST, url, Some(json!({ "script": script, "args": [] })))
            .await
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.watcher.arm(&self.download_dir).await?;

        let endpoint = self.session_url("url")?;
        debug!("Navigating to {}", url);
        self.send(Method::POST, endpoint, Some(json!({ "url": url })))
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    async fn find_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> BrowserResult<Option<ElementHandle>> {
        let url = self.session_url("element")?;
        let body = json!({ "using": "css selector", "value": selector });
        let deadline = Instant::now() + timeout;

        loop {
            match self.send(Method::POST, url.clone(), Some(body.clone())).await {
                Ok(value) => {
                    return Ok(value
                        .get(ELEMENT_KEY)
                        .and_then(Value::as_str)
                        .map(|id| ElementHandle(id.to_string())));
                }
                Err(BrowserError::Protocol { error, .. }) if error == NO_SUCH_ELEMENT => {}
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn click(&mut self, element: &ElementHandle) -> BrowserResult<()> {
        self.watcher.arm(&self.download_dir).await?;

        let url = self.session_url(&format!("element/{}/click", element.0))?;
        self.send(Method::POST, url, Some(json!({}))).await?;
        Ok(())
    }

    async fn attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> BrowserResult<Option<String>> {
        let url = self.session_url(&format!("element/{}/attribute/{}", element.0, name))?;
        let value = self.send(Method::GET, url, None).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn page_text(&mut self) -> BrowserResult<String> {
        let value = self
            .execute("return document.body ? document.body.innerText : '';")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn page_source(&mut self) -> BrowserResult<String> {
        let url = self.session_url("source")?;
        let value = self.send(Method::GET, url, None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        let url = self.session_url("url")?;
        let value = self.send(Method::GET, url, None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn wait_for_download(
        &mut self,
        directory: &Path,
        timeout: Duration,
    ) -> BrowserResult<Option<PathBuf>> {
        // The watcher was armed with the canonical download path
        let directory = tokio::fs::canonicalize(directory)
            .await
            .unwrap_or_else(|_| directory.to_path_buf());
        Ok(self.watcher.wait(&directory, timeout).await?)
    }
}

fn invalid_url(e: url::ParseError) -> BrowserError {
    BrowserError::Protocol {
        error: "invalid argument".to_string(),
        message: e.to_string(),
    }
}

fn parse_endpoint(webdriver_url: &str) -> BrowserResult<Url> {
    let mut endpoint = Url::parse(webdriver_url).map_err(invalid_url)?;
    if !endpoint.path().ends_with('/') {
        let path = format!("{}/", endpoint.path());
        endpoint.set_path(&path);
    }
    Ok(endpoint)
}

/// Sends one WebDriver command and unwraps the W3C `value` envelope
async fn send_command(
    client: &Client,
    method: Method,
    url: Url,
    body: Option<Value>,
) -> BrowserResult<Value> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await?;
    let status = response.status();
    let payload: Value = response.json().await?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(BrowserError::Protocol {
            error: error.to_string(),
            message,
        });
    }

    if !status.is_success() {
        return Err(BrowserError::Protocol {
            error: format!("http {}", status.as_u16()),
            message: payload.to_string(),
        });
    }

    Ok(value)
}

/// Builds the `POST /session` capabilities document
fn capabilities(config: &BrowserConfig, download_dir: &Path) -> Value {
    let (browser_name, options_key) = match config.kind {
        BrowserKind::Chrome => ("chrome", "goog:chromeOptions"),
        BrowserKind::Edge => ("MicrosoftEdge", "ms:edgeOptions"),
    };

    let options = match &config.debugger_address {
        Some(address) => json!({ "debuggerAddress": address }),
        None => {
            let mut args = vec!["--window-size=1920,1080".to_string()];
            if config.headless {
                args.push("--headless=new".to_string());
            }
            json!({
                "args": args,
                "prefs": {
                    "download.default_directory": download_dir.display().to_string(),
                    "download.prompt_for_download": false,
                    "download.directory_upgrade": true,
                    "plugins.always_open_pdf_externally": true,
                },
            })
        }
    };

    let mut always_match = Map::new();
    always_match.insert("browserName".to_string(), json!(browser_name));
    always_match.insert(options_key.to_string(), options);

    json!({ "capabilities": { "alwaysMatch": Value::Object(always_match) } })
}

async fn create_session(
    client: &Client,
    endpoint: &Url,
    config: &BrowserConfig,
    download_dir: &Path,
) -> BrowserResult<String> {
    let url = endpoint.join("session").map_err(invalid_url)?;
    let value = send_command(
        client,
        Method::POST,
        url,
        Some(capabilities(config, download_dir)),
    )
    .await?;

    value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BrowserError::Protocol {
            error: "session not created".to_string(),
            message: format!("response carried no sessionId: {}", value),
        })
}
