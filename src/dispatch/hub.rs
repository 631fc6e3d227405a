use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::time::Duration;

use super::CommandSink;
use crate::gesture::ApplianceCommand;

/// Posts `{"command": "<phrase>"}` to a home-automation webhook.
///
/// The token goes out verbatim in the `authorization` header. Only HTTP 200 counts as
/// success.
pub struct HubSink {
    url: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl HubSink {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            url: url.into(),
            token,
            agent,
        }
    }
}

impl CommandSink for HubSink {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn send(&mut self, command: &ApplianceCommand) -> Result<()> {
        let mut request = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json");
        if let Some(token) = &self.token {
            request = request.set("authorization", token);
        }
        let body = serde_json::to_string(&json!({ "command": command.instruction }))
            .context("serialize hub command")?;
        match request.send_string(&body) {
            Ok(response) if response.status() == 200 => Ok(()),
            Ok(response) => Err(anyhow!("hub responded with status {}", response.status())),
            Err(ureq::Error::Status(code, _)) => Err(anyhow!("hub responded with status {}", code)),
            Err(err) => Err(err).with_context(|| format!("post command to {}", self.url)),
        }
    }
}

/// Dry-run sink: logs the phrase and reports success.
#[derive(Debug, Default)]
pub struct LogSink;

impl CommandSink for LogSink {
    fn describe(&self) -> String {
        "log (dry run)".to_string()
    }

    fn send(&mut self, command: &ApplianceCommand) -> Result<()> {
        log::info!("dry run: would send \"{}\"", command.instruction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Accept one request, answer with `status`, return the raw request text.
    fn one_shot_server(status: &'static str) -> Result<(String, thread::JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}/api/services/send_text_command", listener.local_addr()?);
        let join = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            let mut data = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap_or(0);
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&data);
                if let Some(split) = text.find("\r\n\r\n") {
                    let body_len = text[..split]
                        .lines()
                        .find_map(|line| {
                            let (key, value) = line.split_once(':')?;
                            key.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if data.len() >= split + 4 + body_len {
                        break;
                    }
                }
            }
            let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\n\r\n", status);
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&data).to_string()
        });
        Ok((url, join))
    }

    fn light_on() -> ApplianceCommand {
        ApplianceCommand {
            target: "light".to_string(),
            turn_on: true,
            instruction: "turn on the light".to_string(),
        }
    }

    #[test]
    fn posts_phrase_with_raw_authorization_header() -> Result<()> {
        let (url, join) = one_shot_server("200 OK")?;
        let mut sink = HubSink::new(url, Some("secret-token".to_string()), Duration::from_secs(2));
        sink.send(&light_on())?;

        let request = join.join().unwrap();
        let lower = request.to_lowercase();
        assert!(request.starts_with("POST /api/services/send_text_command"));
        assert!(lower.contains("authorization: secret-token"));
        assert!(lower.contains("content-type: application/json"));
        assert!(!lower.contains("text/plain"));
        assert!(request.contains(r#"{"command":"turn on the light"}"#));
        Ok(())
    }

    #[test]
    fn non_200_is_a_failure() -> Result<()> {
        let (url, join) = one_shot_server("201 Created")?;
        let mut sink = HubSink::new(url, None, Duration::from_secs(2));
        let err = sink.send(&light_on()).unwrap_err();
        assert!(err.to_string().contains("201"));
        let request = join.join().unwrap();
        assert!(!request.to_lowercase().contains("authorization:"));
        Ok(())
    }

    #[test]
    fn server_errors_are_reported_with_status() -> Result<()> {
        let (url, join) = one_shot_server("500 Internal Server Error")?;
        let mut sink = HubSink::new(url, None, Duration::from_secs(2));
        let err = sink.send(&light_on()).unwrap_err();
        assert!(err.to_string().contains("500"));
        join.join().unwrap();
        Ok(())
    }

    #[test]
    fn unreachable_hub_is_a_failure() {
        let mut sink = HubSink::new("http://127.0.0.1:9/hub", None, Duration::from_millis(500));
        assert!(sink.send(&light_on()).is_err());
    }
}
