//! The upstream package-index client.
//!
//! The only upstream call the master makes is `changelog_since_serial`,
//! an XML-RPC method returning the change events after a given cursor.
//! The request body is a fixed template; the response is a small
//! XML-RPC value tree parsed with a purpose-built reader rather than a
//! full XML-RPC stack.

use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;

/// Upstream failures, split by how the watcher should react.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection refused, reset, timed out. Retried indefinitely.
    #[error("upstream transport fault: {0}")]
    Transport(String),
    /// HTTP 5xx. Retried indefinitely.
    #[error("upstream server error: HTTP {0}")]
    Server(u16),
    /// HTTP 4xx. The request itself is wrong; retrying cannot help.
    #[error("upstream client error: HTTP {0}")]
    Client(u16),
    /// The body did not parse as a changelog. Retried; proxies emit
    /// transient garbage.
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Only 4xx halts the watcher.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpstreamError::Client(_))
    }
}

/// One event of interest from the upstream change stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpstreamEvent {
    /// A package was created.
    NewPackage(String),
    /// A source or wheel file was uploaded for a version.
    NewVersion(String, String),
}

/// The outcome of one changelog poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLog {
    /// Events of interest, deduplicated, in stream order.
    pub events: Vec<UpstreamEvent>,
    /// The highest serial seen; the new cursor.
    pub last_serial: u64,
}

pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
}

impl UpstreamClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Fetch the change events after `serial`.
    pub async fn changelog_since(&self, serial: u64) -> Result<ChangeLog, UpstreamError> {
        let body = format!(
            "<?xml version=\"1.0\"?>\n<methodCall>\
             <methodName>changelog_since_serial</methodName>\
             <params><param><value><int>{serial}</int></value></param></params>\
             </methodCall>"
        );
        let response = self
            .http
            .post(&self.url)
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(UpstreamError::Server(status.as_u16()));
        }
        if status.is_client_error() {
            return Err(UpstreamError::Client(status.as_u16()));
        }
        let text = response
            .text()
            .await
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;
        parse_changelog(&text, serial)
    }
}

/// A decoded XML-RPC value; only the shapes the changelog uses.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
    Nil,
    Array(Vec<Value>),
}

/// Parse an XML-RPC `methodResponse` into its single result value.
fn parse_response(xml: &str) -> Result<Value, UpstreamError> {
    let malformed = |detail: &str| UpstreamError::Malformed(detail.to_owned());
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let mut stack: Vec<Vec<Value>> = Vec::new();
    let mut result: Option<Value> = None;
    let mut scalar: Option<Value> = None;
    let mut text = String::new();
    let mut in_fault = false;
    loop {
        match reader
            .read_event()
            .map_err(|err| UpstreamError::Malformed(err.to_string()))?
        {
            Event::Start(e) => match e.name().as_ref() {
                b"fault" => in_fault = true,
                b"array" => stack.push(Vec::new()),
                b"value" => {
                    scalar = None;
                    text.clear();
                }
                b"string" | b"int" | b"i4" | b"boolean" | b"double" => text.clear(),
                _ => {}
            },
            Event::Empty(e) => {
                if e.name().as_ref() == b"nil" {
                    scalar = Some(Value::Nil);
                }
            }
            Event::Text(t) => {
                text.push_str(
                    &t.unescape()
                        .map_err(|err| UpstreamError::Malformed(err.to_string()))?,
                );
            }
            Event::End(e) => match e.name().as_ref() {
                b"string" => scalar = Some(Value::Str(std::mem::take(&mut text))),
                b"int" | b"i4" | b"boolean" => {
                    let parsed = text
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| malformed("non-integer <int>"))?;
                    scalar = Some(Value::Int(parsed));
                    text.clear();
                }
                b"double" => {
                    scalar = Some(Value::Str(std::mem::take(&mut text)));
                }
                b"array" => {
                    let arr = stack.pop().ok_or_else(|| malformed("unbalanced <array>"))?;
                    scalar = Some(Value::Array(arr));
                }
                b"value" => {
                    let value = scalar
                        .take()
                        .unwrap_or_else(|| Value::Str(std::mem::take(&mut text)));
                    match stack.last_mut() {
                        Some(array) => array.push(value),
                        None => result = Some(value),
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    if in_fault {
        return Err(malformed("upstream returned an XML-RPC fault"));
    }
    result.ok_or_else(|| malformed("response carried no value"))
}

/// Interpret the changelog value: an array of
/// `(name, version|nil, timestamp, action, serial)` entries.
fn parse_changelog(xml: &str, since: u64) -> Result<ChangeLog, UpstreamError> {
    let Value::Array(entries) = parse_response(xml)? else {
        return Err(UpstreamError::Malformed(
            "changelog result is not an array".to_owned(),
        ));
    };
    let mut events = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    let mut last_serial = since;
    for entry in entries {
        let Value::Array(fields) = entry else {
            return Err(UpstreamError::Malformed(
                "changelog entry is not an array".to_owned(),
            ));
        };
        if fields.len() < 5 {
            return Err(UpstreamError::Malformed(
                "changelog entry has fewer than five fields".to_owned(),
            ));
        }
        let Value::Str(name) = &fields[0] else {
            return Err(UpstreamError::Malformed(
                "changelog entry name is not a string".to_owned(),
            ));
        };
        let Value::Str(action) = &fields[3] else {
            return Err(UpstreamError::Malformed(
                "changelog entry action is not a string".to_owned(),
            ));
        };
        if let Value::Int(serial) = fields[4]
            && serial >= 0
        {
            last_serial = last_serial.max(serial as u64);
        }
        let event = if action == "create" {
            Some(UpstreamEvent::NewPackage(name.clone()))
        } else if action.starts_with("add ") && action.contains(" file") {
            match &fields[1] {
                Value::Str(version) => {
                    Some(UpstreamEvent::NewVersion(name.clone(), version.clone()))
                }
                _ => None,
            }
        } else {
            None
        };
        // Duplicate emissions within one poll are suppressed.
        if let Some(event) = event
            && seen.insert(event.clone())
        {
            events.push(event);
        }
    }
    Ok(ChangeLog { events, last_serial })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, version: Option<&str>, action: &str, serial: u64) -> String {
        let version = match version {
            Some(v) => format!("<string>{v}</string>"),
            None => "<nil/>".to_owned(),
        };
        format!(
            "<value><array><data>\
             <value><string>{name}</string></value>\
             <value>{version}</value>\
             <value><int>1518000000</int></value>\
             <value><string>{action}</string></value>\
             <value><int>{serial}</int></value>\
             </data></array></value>"
        )
    }

    fn response(entries: &[String]) -> String {
        format!(
            "<?xml version=\"1.0\"?><methodResponse><params><param>\
             <value><array><data>{}</data></array></value>\
             </param></params></methodResponse>",
            entries.join("")
        )
    }

    #[test]
    fn parses_create_and_file_events() {
        let xml = response(&[
            entry("foo", None, "create", 1001),
            entry("foo", Some("0.1"), "add source file foo-0.1.tar.gz", 1002),
            entry("bar", Some("2.0"), "add cp34 file bar-2.0-cp34-cp34m-linux_armv7l.whl", 1003),
        ]);
        let log = parse_changelog(&xml, 1000).expect("parse");
        assert_eq!(log.events, vec![
            UpstreamEvent::NewPackage("foo".to_owned()),
            UpstreamEvent::NewVersion("foo".to_owned(), "0.1".to_owned()),
            UpstreamEvent::NewVersion("bar".to_owned(), "2.0".to_owned()),
        ]);
        assert_eq!(log.last_serial, 1003);
    }

    #[test]
    fn irrelevant_actions_are_skipped() {
        let xml = response(&[
            entry("foo", Some("0.1"), "new release", 1001),
            entry("foo", None, "remove", 1002),
        ]);
        let log = parse_changelog(&xml, 1000).expect("parse");
        assert!(log.events.is_empty());
        assert_eq!(log.last_serial, 1002);
    }

    #[test]
    fn duplicate_events_in_one_poll_are_suppressed() {
        let xml = response(&[
            entry("foo", Some("0.1"), "add source file foo-0.1.tar.gz", 1001),
            entry("foo", Some("0.1"), "add cp34 file foo-0.1-cp34-cp34m-linux_armv7l.whl", 1002),
        ]);
        let log = parse_changelog(&xml, 1000).expect("parse");
        assert_eq!(log.events.len(), 1);
        assert_eq!(log.last_serial, 1002);
    }

    #[test]
    fn empty_changelog_keeps_the_cursor() {
        let xml = response(&[]);
        let log = parse_changelog(&xml, 4242).expect("parse");
        assert!(log.events.is_empty());
        assert_eq!(log.last_serial, 4242);
    }

    #[test]
    fn faults_are_malformed() {
        let xml = "<?xml version=\"1.0\"?><methodResponse><fault><value><string>\
                   boom</string></value></fault></methodResponse>";
        assert!(matches!(
            parse_changelog(xml, 0),
            Err(UpstreamError::Malformed(_))
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_changelog("this is not xml-rpc", 0),
            Err(UpstreamError::Malformed(_))
        ));
    }

    #[test]
    fn only_client_errors_are_fatal() {
        assert!(UpstreamError::Client(404).is_fatal());
        assert!(!UpstreamError::Server(503).is_fatal());
        assert!(!UpstreamError::Transport("reset".to_owned()).is_fatal());
        assert!(!UpstreamError::Malformed("junk".to_owned()).is_fatal());
    }

    #[tokio::test]
    async fn http_status_maps_to_error_class() {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("server");
        let url = format!("http://{}", server.server_addr());
        let handle = std::thread::spawn(move || {
            for _ in 0..2 {
                let request = server.recv().expect("request");
                let status = if request.url().contains("teapot") { 418 } else { 503 };
                let _ = request.respond(
                    tiny_http::Response::from_string("nope")
                        .with_status_code(tiny_http::StatusCode(status)),
                );
            }
        });

        let client = UpstreamClient::new(format!("{url}/pypi"));
        assert!(matches!(
            client.changelog_since(0).await,
            Err(UpstreamError::Server(503))
        ));
        let client = UpstreamClient::new(format!("{url}/teapot"));
        assert!(matches!(
            client.changelog_since(0).await,
            Err(UpstreamError::Client(418))
        ));
        handle.join().expect("server thread");
    }

    #[tokio::test]
    async fn connection_refused_is_transport() {
        let client = UpstreamClient::new("http://127.0.0.1:1/pypi");
        assert!(matches!(
            client.changelog_since(0).await,
            Err(UpstreamError::Transport(_))
        ));
    }
}
