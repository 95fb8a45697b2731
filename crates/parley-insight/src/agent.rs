//! User-agent classification.
//!
//! Deliberately shallow: device class by keyword, browser and OS by token
//! position. Nothing is validated.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::DeviceType;

const UNKNOWN: &str = "Unknown";

static TABLET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)tablet|ipad|playbook|silk").expect("Invalid tablet regex")
});

static MOBILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Mobile|iP(hone|od)|Android|BlackBerry|IEMobile|Kindle|Silk-Accelerated|(hpw|web)OS|Opera M(obi|ini)",
    )
    .expect("Invalid mobile regex")
});

/// Classify a user agent as tablet, mobile or (by default) desktop.
pub fn device_type(user_agent: &str) -> DeviceType {
    if is_tablet(user_agent) {
        DeviceType::Tablet
    } else if MOBILE.is_match(user_agent) {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

fn is_tablet(user_agent: &str) -> bool {
    if TABLET.is_match(user_agent) {
        return true;
    }
    // Android without "mobi" is a tablet
    let lower = user_agent.to_ascii_lowercase();
    lower.contains("android") && !lower.contains("mobi")
}

/// First whitespace-delimited token of the user agent.
pub fn browser_name(user_agent: &str) -> String {
    user_agent
        .split_whitespace()
        .next()
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// First token of the first parenthesised group.
pub fn os_name(user_agent: &str) -> String {
    let Some((_, rest)) = user_agent.split_once('(') else {
        return UNKNOWN.to_string();
    };
    let group = rest.split(')').next().unwrap_or_default();
    group
        .split(|c: char| c.is_whitespace() || c == ';')
        .find(|token| !token.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}
