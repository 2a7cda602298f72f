//! ABAC Condition Evaluator: short-circuits `find_direct` with contextual
//! predicates carried on a tuple's `conditions` column — time window, IP
//! CIDR, device, and attribute checks, each ANDed together with a
//! deny-on-missing-context rule.

use std::collections::HashMap;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::Deserialize;
use serde_json::Value;

/// Runtime context a caller supplies alongside a `check`/`find_direct`
/// call. Any field a present condition needs but the context lacks is a
/// deny.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    /// `HH:MM[:SS]` or ISO-8601; only the time portion is compared.
    pub time: Option<String>,
    pub ip: Option<IpAddr>,
    pub device: Option<String>,
    pub attributes: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Conditions {
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub allowed_ips: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_devices: Option<Vec<String>>,
    #[serde(default)]
    pub attributes: Option<HashMap<String, Value>>,
}

/// Extracts the `HH:MM[:SS]` comparison key from either a bare time string
/// or an ISO-8601 timestamp, normalizing both to the first eight
/// characters of the time portion.
fn time_comparison_key(raw: &str) -> String {
    let time_part = raw.split('T').nth(1).unwrap_or(raw);
    let trimmed = time_part.split('-').next().unwrap_or(time_part);
    let trimmed = trimmed.split('+').next().unwrap_or(trimmed);
    trimmed.chars().take(8).collect()
}

/// Evaluates `conditions` (parsed from a tuple's `conditions` JSON column)
/// against `context`. Absent conditions always pass; conditions present
/// with no context at all deny outright.
pub fn evaluate(conditions: Option<&Conditions>, context: Option<&EvalContext>) -> bool {
    let Some(conditions) = conditions else {
        return true;
    };

    let Some(context) = context else {
        tracing::warn!("ABAC conditions present but no context provided, denying");
        return false;
    };

    if let Some(window) = &conditions.time_window {
        let Some(current_time) = &context.time else {
            tracing::debug!("time_window condition present but context has no time, denying");
            return false;
        };

        let current_cmp = time_comparison_key(current_time);
        let start_cmp = time_comparison_key(&window.start);
        let end_cmp = time_comparison_key(&window.end);

        if !(start_cmp <= current_cmp && current_cmp <= end_cmp) {
            tracing::debug!(
                current = %current_cmp,
                start = %start_cmp,
                end = %end_cmp,
                "time outside allowed window, denying"
            );
            return false;
        }
    }

    if let Some(allowed_ips) = &conditions.allowed_ips {
        let Some(current_ip) = context.ip else {
            tracing::debug!("allowed_ips condition present but context has no ip, denying");
            return false;
        };

        let mut allowed = false;
        for cidr in allowed_ips {
            match cidr.parse::<IpNetwork>() {
                Ok(network) => {
                    if network.contains(current_ip) {
                        allowed = true;
                        break;
                    }
                }
                Err(_) => {
                    tracing::warn!(cidr, "invalid CIDR in allowed_ips, skipping");
                }
            }
        }

        if !allowed {
            tracing::debug!(ip = %current_ip, "ip not in allowlist, denying");
            return false;
        }
    }

    if let Some(allowed_devices) = &conditions.allowed_devices {
        let matches = context
            .device
            .as_deref()
            .is_some_and(|device| allowed_devices.iter().any(|d| d == device));
        if !matches {
            tracing::debug!(device = ?context.device, "device not in allowlist, denying");
            return false;
        }
    }

    if let Some(attributes) = &conditions.attributes {
        for (key, expected) in attributes {
            let actual = context.attributes.get(key);
            if actual != Some(expected) {
                tracing::debug!(key, "attribute mismatch, denying");
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(time: &str, ip: &str) -> EvalContext {
        EvalContext {
            time: Some(time.to_string()),
            ip: ip.parse().ok(),
            device: None,
            attributes: HashMap::new(),
        }
    }

    #[test]
    fn no_conditions_always_allows() {
        assert!(evaluate(None, None));
    }

    #[test]
    fn conditions_without_context_deny() {
        let conditions = Conditions {
            time_window: Some(TimeWindow {
                start: "09:00".into(),
                end: "17:00".into(),
            }),
            ..Default::default()
        };
        assert!(!evaluate(Some(&conditions), None));
    }

    #[test]
    fn time_inside_window_and_ip_in_cidr_allows() {
        let conditions = Conditions {
            time_window: Some(TimeWindow {
                start: "09:00".into(),
                end: "17:00".into(),
            }),
            allowed_ips: Some(vec!["10.0.0.0/8".into(), "192.168.0.0/16".into()]),
            ..Default::default()
        };
        let context = ctx("14:30", "10.0.1.5");
        assert!(evaluate(Some(&conditions), Some(&context)));
    }

    #[test]
    fn time_outside_window_denies() {
        let conditions = Conditions {
            time_window: Some(TimeWindow {
                start: "09:00".into(),
                end: "17:00".into(),
            }),
            ..Default::default()
        };
        let context = ctx("20:00", "10.0.1.5");
        assert!(!evaluate(Some(&conditions), Some(&context)));
    }

    #[test]
    fn iso8601_time_is_normalized_before_comparison() {
        let conditions = Conditions {
            time_window: Some(TimeWindow {
                start: "09:00".into(),
                end: "17:00".into(),
            }),
            ..Default::default()
        };
        let context = ctx("2025-10-25T14:30:00-07:00", "10.0.1.5");
        assert!(evaluate(Some(&conditions), Some(&context)));
    }

    #[test]
    fn boundary_time_at_start_is_allowed() {
        let conditions = Conditions {
            time_window: Some(TimeWindow {
                start: "09:00".into(),
                end: "17:00".into(),
            }),
            ..Default::default()
        };
        let context = ctx("09:00", "10.0.1.5");
        assert!(evaluate(Some(&conditions), Some(&context)));
    }

    #[test]
    fn invalid_cidr_is_skipped_not_fatal() {
        let conditions = Conditions {
            allowed_ips: Some(vec!["not-a-cidr".into(), "10.0.0.0/8".into()]),
            ..Default::default()
        };
        let context = ctx("12:00", "10.0.1.5");
        assert!(evaluate(Some(&conditions), Some(&context)));
    }

    #[test]
    fn device_not_in_allowlist_denies() {
        let conditions = Conditions {
            allowed_devices: Some(vec!["laptop".into()]),
            ..Default::default()
        };
        let context = EvalContext {
            time: None,
            ip: None,
            device: Some("phone".into()),
            attributes: HashMap::new(),
        };
        assert!(!evaluate(Some(&conditions), Some(&context)));
    }

    #[test]
    fn attribute_mismatch_denies() {
        let mut attributes = HashMap::new();
        attributes.insert("clearance".to_string(), Value::String("secret".into()));
        let conditions = Conditions {
            attributes: Some(attributes),
            ..Default::default()
        };
        let mut context_attrs = HashMap::new();
        context_attrs.insert("clearance".to_string(), Value::String("public".into()));
        let context = EvalContext {
            time: None,
            ip: None,
            device: None,
            attributes: context_attrs,
        };
        assert!(!evaluate(Some(&conditions), Some(&context)));
    }
}
