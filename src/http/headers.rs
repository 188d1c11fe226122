//! Header lists and hop-by-hop rules.

/// Ordered header list. Names keep their original case and may repeat.
pub type Headers = Vec<(String, String)>;

/// Correlation header added to forwarded requests.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Headers that only describe one connection segment and are never
/// forwarded to the client.
const RESPONSE_HOP_BY_HOP: [&str; 3] = ["keep-alive", "connection", "proxy-connection"];

/// Additional request headers that are not forwarded to the backend.
const REQUEST_HOP_BY_HOP: [&str; 2] = ["te", "upgrade"];

pub fn is_response_hop_by_hop(name: &str) -> bool {
    RESPONSE_HOP_BY_HOP
        .iter()
        .any(|hop| name.eq_ignore_ascii_case(hop))
}

pub fn is_request_hop_by_hop(name: &str) -> bool {
    is_response_hop_by_hop(name)
        || REQUEST_HOP_BY_HOP
            .iter()
            .any(|hop| name.eq_ignore_ascii_case(hop))
}

/// True if the comma separated `value` lists `token` (case-insensitive).
pub fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

/// Iterate the values of every header called `name`.
pub fn values<'a>(headers: &'a Headers, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .iter()
        .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_is_case_insensitive() {
        assert!(is_response_hop_by_hop("Connection"));
        assert!(is_response_hop_by_hop("KEEP-ALIVE"));
        assert!(is_response_hop_by_hop("Proxy-Connection"));
        assert!(!is_response_hop_by_hop("Server"));
        assert!(!is_response_hop_by_hop("Upgrade"));
        assert!(is_request_hop_by_hop("Upgrade"));
        assert!(is_request_hop_by_hop("te"));
    }

    #[test]
    fn test_token_lists() {
        assert!(has_token("keep-alive, Close", "close"));
        assert!(!has_token("closed", "close"));
    }

    #[test]
    fn test_values_match_repeated_names() {
        let headers: Headers = vec![
            ("Via".into(), "a".into()),
            ("Host".into(), "x".into()),
            ("via".into(), "b".into()),
        ];
        let vias: Vec<_> = values(&headers, "VIA").collect();
        assert_eq!(vias, ["a", "b"]);
    }
}
