//! AT command and response model.

use core::time::Duration;

/// How intermediate (non-final) lines relate to the in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMatcher {
    /// Only a final result code is expected; every other line is
    /// unsolicited.
    Final,
    /// Lines starting with the prefix belong to the response.
    Prefix(&'static str),
    /// Lines starting with the prefix belong to the response, and so does
    /// every line after the first such line (multi-line records such as
    /// `+CMGL:` headers followed by message bodies).  The line right after
    /// a header is always body, even when it reads `OK`, unless the header
    /// ends in a zero length field.
    Listing(&'static str),
    /// Every line belongs to the response, except notifications that are
    /// not answers to this command, and an error code completes it
    /// successfully.  The caller interprets the text.
    Raw,
}

/// A single AT exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Literal command text, without terminator.
    pub text: String,
    /// Sent after the `>` prompt, terminated with Ctrl-Z.
    pub payload: Option<String>,
    pub matcher: ResponseMatcher,
    /// Deadline per attempt (and for the result after a payload).
    pub timeout: Duration,
    /// Re-sends after a timeout.  Payload commands are never re-sent once
    /// the payload went out.
    pub retries: u8,
}

impl Command {
    /// A command expecting only a final result code.
    pub fn new(text: impl Into<String>, timeout: Duration, retries: u8) -> Self {
        Self {
            text: text.into(),
            payload: None,
            matcher: ResponseMatcher::Final,
            timeout,
            retries,
        }
    }

    pub fn with_matcher(mut self, matcher: ResponseMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Attach a prompt payload (SMS body).
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// `line` carries this command's own information prefix, as
    /// `+CSQ: 20,99` does for `AT+CSQ`.
    pub fn is_own_answer(&self, line: &str) -> bool {
        let Some(name) = self.name() else {
            return false;
        };
        line.get(..name.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(name))
            && line[name.len()..].starts_with(':')
    }

    /// `+CSQ` for `AT+CSQ`, `+CUSD` for `AT+CUSD=1,...`.
    fn name(&self) -> Option<&str> {
        let head = self.text.get(..2)?;
        if !head.eq_ignore_ascii_case("AT") {
            return None;
        }
        let rest = &self.text[2..];
        if !rest.starts_with(['+', '*']) {
            return None;
        }
        let end = rest[1..]
            .find(|c: char| !c.is_ascii_alphanumeric())
            .map_or(rest.len(), |i| i + 1);
        (end > 1).then(|| &rest[..end])
    }
}

/// Final result codes, as classified by [`classify_final`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalCode {
    Ok,
    Error,
}

/// Classify a line as a final result code, if it is one.
pub fn classify_final(line: &str) -> Option<FinalCode> {
    if line == "OK" {
        Some(FinalCode::Ok)
    } else if line == "ERROR"
        || line.starts_with("+CME ERROR:")
        || line.starts_with("+CMS ERROR:")
    {
        Some(FinalCode::Error)
    } else {
        None
    }
}

/// A completed response: intermediate lines plus the final line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    pub lines: Vec<String>,
    pub final_line: String,
}

impl Response {
    /// Every line of the response, final line included, joined with `\n`.
    pub fn raw(&self) -> String {
        let mut out = String::new();
        for line in self.lines.iter().chain(core::iter::once(&self.final_line)) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(line);
        }
        out
    }

    /// Intermediate lines starting with `prefix`.
    pub fn lines_with<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.lines
            .iter()
            .map(String::as_str)
            .filter(move |l| l.starts_with(prefix))
    }
}
