//! Status lines and generated error pages.

use hyper::StatusCode;

/// Canonical reason phrase for `code`, if it is a registered status.
pub fn reason(code: u16) -> Option<&'static str> {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|status| status.canonical_reason())
}

/// `"<code> <reason>"`, or the bare code when no reason phrase is known.
pub fn status_line(code: u16) -> String {
    match reason(code) {
        Some(reason) => format!("{} {}", code, reason),
        None => code.to_string(),
    }
}

/// HTML body sent with proxy-generated error replies.
pub fn error_html(code: u16, server_name: &str, port: u16) -> String {
    let status = status_line(code);
    format!(
        "<html><head><title>{status}</title></head><body>\
         <h1>{status}</h1><hr>\
         <address>{} at port {}</address>\
         </body></html>",
        escape_html(server_name),
        port,
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
