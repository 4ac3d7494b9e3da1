use std::fmt::{self, Write as _};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Probe parameters ─────────────────────────────────────────────

/// Amount carried by every canary payment, in satoshi.
pub const PROBE_AMOUNT_SAT: u64 = 1000;

pub const PROBE_AMOUNT_MSAT: u64 = PROBE_AMOUNT_SAT * 1000;

/// Risk factor passed to route computation.
pub const PROBE_RISK_FACTOR: u64 = 1;

/// A target is retired once its probe count (including the current attempt)
/// exceeds this budget.
pub const MAX_PROBES_PER_TARGET: u64 = 20;

// ─── Target ───────────────────────────────────────────────────────

/// A candidate probe destination. `terminal` targets are never selected again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub terminal: bool,
}

impl Target {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            terminal: false,
        }
    }
}

// ─── Channel direction ────────────────────────────────────────────

/// A directed channel, rendered as `"<short_channel_id>/<direction>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelDirection {
    pub channel: String,
    pub direction: u8,
}

impl ChannelDirection {
    pub fn new(channel: impl Into<String>, direction: u8) -> Self {
        Self {
            channel: channel.into(),
            direction,
        }
    }
}

impl fmt::Display for ChannelDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.direction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid channel direction {0:?}, expected <scid>/<0|1>")]
pub struct ParseChannelDirectionError(pub String);

impl FromStr for ChannelDirection {
    type Err = ParseChannelDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (channel, direction) = s
            .rsplit_once('/')
            .ok_or_else(|| ParseChannelDirectionError(s.to_owned()))?;
        let direction: u8 = direction
            .parse()
            .map_err(|_| ParseChannelDirectionError(s.to_owned()))?;
        if channel.is_empty() || direction > 1 {
            return Err(ParseChannelDirectionError(s.to_owned()));
        }
        Ok(Self::new(channel, direction))
    }
}

// ─── Probe ────────────────────────────────────────────────────────

pub type ProbeId = i64;

/// One attempt to route a canary payment to a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub id: ProbeId,
    pub destination: String,
    /// Short channel ids along the route; empty when no route was found.
    pub route: Vec<String>,
    pub payment_hash: Option<String>,
    pub error: Option<String>,
    pub erring_channel: Option<String>,
    pub fail_code: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Probe {
    /// In flight: dispatched but not yet classified.
    pub fn is_pending(&self) -> bool {
        self.fail_code.is_none() && self.finished_at.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// Operator-facing view of the probe.
    pub fn summary(&self) -> ProbeSummary {
        ProbeSummary {
            id: self.id,
            destination: self.destination.clone(),
            route: self.route.join(","),
            erring_channel: self.erring_channel.clone(),
            failcode: self.fail_code,
            started_at: self.started_at.to_rfc3339(),
            finished_at: self.finished_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSummary {
    pub id: ProbeId,
    pub destination: String,
    pub route: String,
    pub erring_channel: Option<String>,
    pub failcode: Option<i64>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

/// A probe about to be dispatched, committed before `sendpay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProbe {
    pub destination: String,
    pub route: Vec<String>,
    pub payment_hash: String,
    pub started_at: DateTime<Utc>,
}

/// Terminal fields written when a probe is classified.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub error: Option<String>,
    pub erring_channel: Option<String>,
    pub fail_code: Option<i64>,
    pub finished_at: DateTime<Utc>,
}

impl ProbeOutcome {
    pub fn from_failure(failure: &PaymentFailure, finished_at: DateTime<Utc>) -> Self {
        Self {
            error: Some(failure.raw.to_string()),
            erring_channel: failure.erring_channel.clone(),
            fail_code: failure.fail_code,
            finished_at,
        }
    }

    /// The payment settled (should never happen with a random hash).
    pub fn completed(finished_at: DateTime<Utc>) -> Self {
        Self {
            error: None,
            erring_channel: None,
            fail_code: None,
            finished_at,
        }
    }

    pub fn timed_out(finished_at: DateTime<Utc>) -> Self {
        Self {
            error: Some("pending timeout".to_owned()),
            erring_channel: None,
            fail_code: None,
            finished_at,
        }
    }
}

// ─── Failure payload ──────────────────────────────────────────────

/// Error data reported by the node for a failed or rejected payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailure {
    pub erring_channel: Option<String>,
    pub erring_direction: Option<u8>,
    pub fail_code: Option<i64>,
    /// The full error `data` object, kept for the probe record.
    pub raw: serde_json::Value,
}

impl PaymentFailure {
    /// Extract the fields the classifier needs from a node error `data` object.
    pub fn from_error_data(raw: serde_json::Value) -> Self {
        let erring_channel = raw["erring_channel"].as_str().map(String::from);
        let erring_direction = raw["erring_direction"]
            .as_u64()
            .and_then(|d| u8::try_from(d).ok());
        let fail_code = raw["failcode"].as_i64();
        Self {
            erring_channel,
            erring_direction,
            fail_code,
            raw,
        }
    }

    pub fn channel_direction(&self) -> Option<ChannelDirection> {
        match (&self.erring_channel, self.erring_direction) {
            (Some(channel), Some(direction)) => Some(ChannelDirection::new(channel, direction)),
            _ => None,
        }
    }
}

/// Fresh canary payment hash: 32 random bytes, lowercase hex.
pub fn random_payment_hash<R: Rng + ?Sized>(rng: &mut R) -> String {
    let bytes: [u8; 32] = rng.r#gen();
    let mut out = String::with_capacity(64);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn channel_direction_display_and_parse() {
        let cd = ChannelDirection::new("103x1x0", 1);
        assert_eq!(cd.to_string(), "103x1x0/1");
        assert_eq!("103x1x0/1".parse::<ChannelDirection>(), Ok(cd));
    }

    #[test]
    fn channel_direction_rejects_garbage() {
        assert!("103x1x0".parse::<ChannelDirection>().is_err());
        assert!("103x1x0/2".parse::<ChannelDirection>().is_err());
        assert!("/0".parse::<ChannelDirection>().is_err());
        assert!("103x1x0/x".parse::<ChannelDirection>().is_err());
    }

    #[test]
    fn payment_failure_from_error_data() {
        let raw = serde_json::json!({
            "erring_index": 1,
            "failcode": 16394,
            "erring_node": "02aa",
            "erring_channel": "103x1x0",
            "erring_direction": 0,
        });
        let failure = PaymentFailure::from_error_data(raw.clone());
        assert_eq!(failure.fail_code, Some(16394));
        assert_eq!(failure.erring_channel.as_deref(), Some("103x1x0"));
        assert_eq!(
            failure.channel_direction(),
            Some(ChannelDirection::new("103x1x0", 0))
        );
        assert_eq!(failure.raw, raw);
    }

    #[test]
    fn payment_failure_without_direction_has_no_channel_direction() {
        let failure =
            PaymentFailure::from_error_data(serde_json::json!({"erring_channel": "1x1x1"}));
        assert_eq!(failure.fail_code, None);
        assert!(failure.channel_direction().is_none());
    }

    #[test]
    fn random_payment_hash_is_64_hex_chars() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = random_payment_hash(&mut rng);
        let b = random_payment_hash(&mut rng);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn probe_pending_and_summary() {
        let started = Utc::now();
        let mut probe = Probe {
            id: 3,
            destination: "02bb".into(),
            route: vec!["1x1x1".into(), "2x2x2".into()],
            payment_hash: Some("00".repeat(32)),
            error: None,
            erring_channel: None,
            fail_code: None,
            started_at: started,
            finished_at: None,
        };
        assert!(probe.is_pending());
        assert!(!probe.is_finished());

        probe.fail_code = Some(16399);
        probe.finished_at = Some(started);
        assert!(!probe.is_pending());

        let summary = probe.summary();
        assert_eq!(summary.route, "1x1x1,2x2x2");
        assert_eq!(summary.failcode, Some(16399));
        assert!(summary.finished_at.is_some());
    }

    #[test]
    fn outcome_from_failure_keeps_raw_error() {
        let failure = PaymentFailure::from_error_data(
            serde_json::json!({"failcode": 4103, "erring_channel": "9x9x9", "erring_direction": 1}),
        );
        let outcome = ProbeOutcome::from_failure(&failure, Utc::now());
        assert_eq!(outcome.fail_code, Some(4103));
        assert_eq!(outcome.erring_channel.as_deref(), Some("9x9x9"));
        assert!(outcome.error.as_deref().is_some_and(|e| e.contains("4103")));
    }
}
