use std::net::IpAddr;

/// Allow/deny access-control list for the RPC endpoint.
///
/// Parsed from a rule string of alternating actions and host patterns,
/// e.g. `"allow 127.0.0.1 deny all"`. Patterns are `all`, a literal
/// address, or an address with `*` wildcard segments (`192.168.*.*`).
///
/// Rules are evaluated in order and the first match decides. When no
/// rule matches, the default is the opposite of the first rule's
/// action (an allow-list denies by default, a deny-list allows by
/// default). An empty list allows everyone.
#[derive(Debug, Clone, Default)]
pub struct Acl {
    rules: Vec<(Action, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Allow,
    Deny,
}

/// A rule string that does not parse as alternating action/pattern
/// words.
#[derive(Debug, thiserror::Error)]
#[error("malformed acl: {0}")]
pub struct AclParseError(String);

impl Acl {
    pub fn parse(rules: &str) -> Result<Acl, AclParseError> {
        let mut parsed = Vec::new();
        let mut words = rules.split_whitespace();
        while let Some(word) = words.next() {
            let action = match word {
                "allow" => Action::Allow,
                "deny" => Action::Deny,
                other => {
                    return Err(AclParseError(format!(
                        "expected allow or deny, found {other:?}"
                    )))
                }
            };
            let pattern = words
                .next()
                .ok_or_else(|| AclParseError(format!("{word} rule is missing a host pattern")))?;
            parsed.push((action, pattern.to_string()));
        }
        Ok(Acl { rules: parsed })
    }

    pub fn permits(&self, addr: IpAddr) -> bool {
        let Some(&(first_action, _)) = self.rules.first() else {
            return true;
        };
        for (action, pattern) in &self.rules {
            if matches(pattern, addr) {
                return *action == Action::Allow;
            }
        }
        first_action == Action::Deny
    }
}

fn matches(pattern: &str, addr: IpAddr) -> bool {
    if pattern == "all" || pattern == "*" {
        return true;
    }
    let text = addr.to_string();
    if !pattern.contains('*') {
        return pattern == text;
    }
    let (sep, wildcard) = match addr {
        IpAddr::V4(_) => ('.', '*'),
        IpAddr::V6(_) => (':', '*'),
    };
    let mut want = pattern.split(sep);
    let mut have = text.split(sep);
    loop {
        match (want.next(), have.next()) {
            (None, None) => return true,
            (Some(w), Some(h)) => {
                if w != h && w.chars().next() != Some(wildcard) {
                    return false;
                }
            }
            _ => return false,
        }
    }
}
