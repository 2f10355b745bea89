//! Rendering half of the error funnel.
//!
//! Every failure ends up as an [`ErrorReport`] rendered in one of three
//! negotiated representations: an HTML page for browsers, a JSON object for
//! AJAX callers, a plain banner for CLI-context requests.

use serde::Serialize;
use std::backtrace::Backtrace;

use super::reason;

/// The error context recorded in the hive and rendered to the client.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub status: String,
    pub code: u16,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    pub level: u32,
}

impl ErrorReport {
    pub fn new(code: u16, text: String, trace: Option<String>, level: u32) -> Self {
        Self {
            status: reason(code).to_string(),
            code,
            text,
            trace,
            level,
        }
    }
}

/// Match a status code against the loggable whitelist.
///
/// The whitelist is a comma/semicolon/pipe separated list of globs: `*`
/// matches everything, any other non-digit character stands for one digit,
/// and a trailing `*` for any run of digits (`4*` covers the 4xx family,
/// `50x` exactly 500-509).
pub fn loggable(globs: &str, code: u16) -> bool {
    let code = code.to_string();
    for glob in globs.split([',', ';', '|']).map(str::trim) {
        if glob.is_empty() {
            continue;
        }
        if glob == "*" {
            return true;
        }
        let mut pattern = String::from("^");
        for ch in glob.chars() {
            if ch.is_ascii_digit() {
                pattern.push(ch);
            } else if ch == '*' {
                pattern.push_str("\\d*");
            } else {
                pattern.push_str("\\d");
            }
        }
        pattern.push('$');
        if regex::Regex::new(&pattern)
            .map(|re| re.is_match(&code))
            .unwrap_or(false)
        {
            return true;
        }
    }
    false
}

/// Capture a call-stack trace honoring the debug verbosity level.
///
/// Level 0 yields nothing. Level 1 keeps application frames only; level 2
/// and up keeps framework-internal frames as well. Frame arguments are not
/// recoverable from a Rust backtrace, so level 3 behaves like level 2.
pub fn capture_trace(debug: u8) -> Option<String> {
    if debug == 0 {
        return None;
    }
    let raw = Backtrace::force_capture().to_string();
    if debug > 1 {
        return Some(raw);
    }
    let mut out = String::new();
    let mut skip = false;
    for line in raw.lines() {
        let is_frame = line
            .trim_start()
            .split(':')
            .next()
            .map(|n| n.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        if is_frame {
            skip = line.contains("apiary::dispatch")
                || line.contains("apiary::error")
                || line.contains("::backtrace::");
        }
        if !skip {
            out.push_str(line);
            out.push('\n');
        }
    }
    Some(out)
}

/// Default HTML error page for synchronous browser requests.
pub fn render_html(report: &ErrorReport, debug: u8, encoding: &str) -> String {
    let trace = if debug > 0 {
        report
            .trace
            .as_deref()
            .map(|t| format!("<pre>{}</pre>\n", encode(t)))
            .unwrap_or_default()
    } else {
        String::new()
    };
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\
         <meta charset=\"{}\"><title>{} {}</title></head>\n\
         <body>\n<h1>{}</h1>\n<p>{}</p>\n{}</body>\n</html>",
        encoding,
        report.code,
        report.status,
        report.status,
        encode(&report.text),
        trace
    )
}

/// JSON error object for AJAX callers.
pub fn render_json(report: &ErrorReport, debug: u8) -> String {
    let mut report = report.clone();
    if debug == 0 {
        report.trace = None;
    }
    serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string())
}

/// Plain text banner for CLI-context requests.
pub fn render_cli(report: &ErrorReport, debug: u8) -> String {
    format!(
        "\n===================================\n\
         ERROR {} - {}\n{}\n\n{}",
        report.code,
        report.status,
        report.text,
        if debug > 0 {
            report.trace.as_deref().unwrap_or("")
        } else {
            ""
        }
    )
}

fn encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
