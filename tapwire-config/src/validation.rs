//! Custom validation functions shared by the configuration sections.

use ipnetwork::IpNetwork;
use tapwire_core::Authority;
use validator::ValidationError;

/// Validate that the provided CIDR list does not contain the unspecified network.
pub fn validate_cidr_list(cidrs: &[IpNetwork]) -> Result<(), ValidationError> {
    if cidrs.iter().any(|n| n.ip().is_unspecified()) {
        return Err(ValidationError::new("invalid_cidr"));
    }
    Ok(())
}

/// Validate that an interface name follows Linux naming conventions.
///
/// `any` is accepted as the pseudo-device capturing on every interface.
pub fn validate_interface(name: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new(r"^[a-zA-Z0-9_.\-@]{1,15}$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;

    if re.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_interface"))
    }
}

/// Validate that every allow-list entry is an `ip` or `ip:port`.
pub fn validate_authorities(authorities: &[String]) -> Result<(), ValidationError> {
    for authority in authorities {
        if authority.parse::<Authority>().is_err() {
            let mut error = ValidationError::new("invalid_authority");
            error.message = Some(format!("'{authority}' is not an ip or ip:port").into());
            return Err(error);
        }
    }
    Ok(())
}

/// Validate that no port in the list is zero.
pub fn validate_ports(ports: &[u16]) -> Result<(), ValidationError> {
    if ports.contains(&0) {
        return Err(ValidationError::new("invalid_port"));
    }
    Ok(())
}

/// Validate that every mask pattern compiles.
pub fn validate_patterns(patterns: &[String]) -> Result<(), ValidationError> {
    for pattern in patterns {
        if let Err(e) = regex::Regex::new(pattern) {
            let mut error = ValidationError::new("invalid_pattern");
            error.message = Some(e.to_string().into());
            return Err(error);
        }
    }
    Ok(())
}

/// Validate log output format.
pub fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new("^(pretty|json)$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(format) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_format"))
    }
}
