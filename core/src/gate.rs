/// Substring denylist deciding which callers may trigger a refresh sweep.
///
/// Advisory only: a caller with no known origin is always permitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginGate {
    denied: Vec<String>,
}

impl OriginGate {
    /// Parse a comma-separated denylist, e.g. `"203.0.113., 10.0.0.7"`.
    pub fn parse(raw: &str) -> Self {
        let denied = raw
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        Self { denied }
    }

    pub fn entries(&self) -> &[String] { &self.denied }

    pub fn permits(&self, origin: Option<&str>) -> bool {
        match origin.map(str::trim) {
            None | Some("") => true,
            Some(o) => !self.denied.iter().any(|bad| o.contains(bad.as_str())),
        }
    }
}

/// Resolve the caller marker: first `X-Forwarded-For` hop, else the socket peer.
pub fn client_origin(forwarded_for: Option<&str>, peer: Option<String>) -> Option<String> {
    let forwarded = forwarded_for
        .and_then(|xf| xf.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    forwarded.or(peer).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_drops_blank_entries() {
        let gate = OriginGate::parse(" 10.0.0.1 ,, 192.168.,");
        assert_eq!(gate.entries(), &["10.0.0.1".to_string(), "192.168.".to_string()]);
    }

    #[test]
    fn substring_match_blocks() {
        let gate = OriginGate::parse("192.168.1.");
        assert!(!gate.permits(Some("192.168.1.44")));
        assert!(gate.permits(Some("203.0.113.9")));
    }

    #[test]
    fn unknown_origin_is_permitted() {
        let gate = OriginGate::parse("1.2.3.4");
        assert!(gate.permits(None));
        assert!(gate.permits(Some("  ")));
        assert!(OriginGate::default().permits(Some("1.2.3.4")));
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        assert_eq!(client_origin(Some(" 1.1.1.1 , 2.2.2.2"), Some("9.9.9.9".into())).as_deref(), Some("1.1.1.1"));
        assert_eq!(client_origin(Some(""), Some("9.9.9.9".into())).as_deref(), Some("9.9.9.9"));
        assert_eq!(client_origin(None, None), None);
    }
}
