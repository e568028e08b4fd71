//! Field-level validation for topology input
//!
//! These checks return plain `String` reasons. [`crate::core::validate`]
//! attaches the entity path and turns them into structural errors.

use std::net::IpAddr;

/// Validates a map key used as a server, network or service name.
///
/// Names end up in file names and rule comments, so control characters
/// and path separators are rejected.
///
/// # Errors
///
/// Returns `Err` if the name is empty, contains `/`, `\` or control
/// characters, or is `.`/`..`.
///
/// # Examples
///
/// ```
/// use fleetwall::validators::validate_name;
///
/// assert!(validate_name("media-server").is_ok());
/// assert!(validate_name("").is_err());
/// assert!(validate_name("../etc").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name empty".to_string());
    }

    if name == "." || name == ".." {
        return Err(format!("name {name:?} is reserved"));
    }

    if name
        .chars()
        .any(|c| c.is_control() || matches!(c, '/' | '\\'))
    {
        return Err(format!("name {name:?} contains invalid characters"));
    }

    Ok(())
}

/// Parses an IPv4 or IPv6 address literal.
///
/// # Errors
///
/// Returns `Err` if the literal is empty or doesn't parse.
pub fn validate_ip(ip: &str) -> Result<IpAddr, String> {
    if ip.is_empty() {
        return Err("ip empty".to_string());
    }

    ip.parse::<IpAddr>()
        .map_err(|_| format!("ip {ip:?} invalid"))
}

/// Validates a host alias for `/etc/hosts`.
///
/// # Errors
///
/// Returns `Err` if the alias is empty or contains whitespace or `#`,
/// which would split or comment out the hosts line.
pub fn validate_host(host: &str) -> Result<(), String> {
    if host.is_empty() {
        return Err("host empty".to_string());
    }

    if host.chars().any(|c| c.is_whitespace() || c == '#') {
        return Err(format!("host {host:?} contains whitespace or '#'"));
    }

    Ok(())
}

/// Validates rule template text.
///
/// # Errors
///
/// Returns `Err` if the rule is empty.
pub fn validate_rule(rule: &str) -> Result<(), String> {
    if rule.is_empty() {
        Err("rule empty".to_string())
    } else {
        Ok(())
    }
}

/// Validates a tunnel port.
///
/// # Errors
///
/// Returns `Err` if port is 0.
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates an extra ssh command-line flag.
///
/// # Errors
///
/// Returns `Err` if the flag is empty or contains a newline.
pub fn validate_flag(flag: &str) -> Result<(), String> {
    if flag.is_empty() {
        return Err("flag empty".to_string());
    }

    if flag.contains(['\n', '\r']) {
        return Err(format!("flag {flag:?} contains a line break"));
    }

    Ok(())
}
