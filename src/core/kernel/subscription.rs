use crate::core::errors::ExchangeError;
use crate::core::types::PairFormat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe => write!(f, "SUBSCRIBE"),
            Self::Unsubscribe => write!(f, "UNSUBSCRIBE"),
        }
    }
}

/// One caller's request to start or stop a channel for some instruments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub channel: String,
    pub instruments: Vec<String>,
    pub operation: Operation,
}

impl SubscriptionRequest {
    pub fn subscribe(channel: impl Into<String>, instruments: &[&str]) -> Self {
        Self {
            channel: channel.into(),
            instruments: instruments.iter().map(|s| (*s).to_string()).collect(),
            operation: Operation::Subscribe,
        }
    }

    pub fn unsubscribe(channel: impl Into<String>, instruments: &[&str]) -> Self {
        Self {
            operation: Operation::Unsubscribe,
            ..Self::subscribe(channel, instruments)
        }
    }
}

/// Authentication fields stamped onto a payload by a `PayloadSigner`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadAuth {
    pub key: String,
    pub passphrase: String,
    pub signature: String,
    pub timestamp: String,
}

/// One outbound control message: every channel in it shares exactly the same
/// instrument set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionPayload {
    pub operation: Operation,
    pub channels: Vec<String>,
    pub instruments: Vec<String>,
    pub auth: Option<PayloadAuth>,
}

impl SubscriptionPayload {
    pub fn is_signed(&self) -> bool {
        self.auth.is_some()
    }
}

/// Groups subscription requests into the fewest control messages
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionPlanner {
    pair_format: PairFormat,
}

impl SubscriptionPlanner {
    pub fn new(pair_format: PairFormat) -> Self {
        Self { pair_format }
    }

    /// Build the payloads needed to apply `operation` for `requests`.
    ///
    /// Requests carrying a different operation are ignored. Channels are
    /// visited in name order; a channel joins the first open payload whose
    /// instrument set is identical to its own, otherwise it opens a new one.
    pub fn plan(
        &self,
        requests: &[SubscriptionRequest],
        operation: Operation,
    ) -> Result<Vec<SubscriptionPayload>, ExchangeError> {
        let mut channels: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();

        for request in requests.iter().filter(|r| r.operation == operation) {
            let channel = request.channel.trim();
            if channel.is_empty() {
                return Err(ExchangeError::InvalidSubscription(
                    "channel name cannot be empty".to_string(),
                ));
            }

            channels.entry(channel).or_default().extend(
                request
                    .instruments
                    .iter()
                    .filter(|i| !i.trim().is_empty())
                    .map(|i| self.pair_format.apply(i)),
            );
        }

        if channels.is_empty() {
            return Err(ExchangeError::InvalidSubscription(format!(
                "no {} requests to plan",
                operation
            )));
        }

        let mut groups: Vec<(Vec<&str>, BTreeSet<String>)> = Vec::new();
        for (channel, instruments) in channels {
            match groups
                .iter_mut()
                .find(|(_, open)| open.symmetric_difference(&instruments).next().is_none())
            {
                Some((members, _)) => members.push(channel),
                None => groups.push((vec![channel], instruments)),
            }
        }

        Ok(groups
            .into_iter()
            .map(|(members, instruments)| SubscriptionPayload {
                operation,
                channels: members.into_iter().map(str::to_string).collect(),
                instruments: instruments.into_iter().collect(),
                auth: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> SubscriptionPlanner {
        SubscriptionPlanner::default()
    }

    #[test]
    fn test_identical_sets_share_a_payload() {
        let requests = vec![
            SubscriptionRequest::subscribe("A", &["X", "Y"]),
            SubscriptionRequest::subscribe("B", &["Y", "X"]),
            SubscriptionRequest::subscribe("C", &["X"]),
        ];

        let payloads = planner().plan(&requests, Operation::Subscribe).unwrap();

        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].channels, vec!["A", "B"]);
        assert_eq!(payloads[0].instruments, vec!["X", "Y"]);
        assert_eq!(payloads[1].channels, vec!["C"]);
        assert_eq!(payloads[1].instruments, vec!["X"]);
    }

    #[test]
    fn test_six_requests_collapse_to_two_payloads() {
        let requests = vec![
            SubscriptionRequest::subscribe("LEVEL2", &["btc-perp"]),
            SubscriptionRequest::subscribe("LEVEL2", &["ETH-PERP"]),
            SubscriptionRequest::subscribe("MATCH", &["BTC-PERP", "ETH-PERP"]),
            SubscriptionRequest::subscribe("MATCH", &["BTC-PERP", "ETH-PERP"]),
            SubscriptionRequest::subscribe("MATCH", &["eth/perp", "BTC-PERP"]),
            SubscriptionRequest::subscribe("RISK", &["BTC-PERP"]),
        ];

        let payloads = planner().plan(&requests, Operation::Subscribe).unwrap();

        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].channels, vec!["LEVEL2", "MATCH"]);
        assert_eq!(payloads[0].instruments, vec!["BTC-PERP", "ETH-PERP"]);
        assert_eq!(payloads[1].channels, vec!["RISK"]);
        assert_eq!(payloads[1].instruments, vec!["BTC-PERP"]);
        assert!(payloads.iter().all(|p| p.operation == Operation::Subscribe));
        assert!(payloads.iter().all(|p| !p.is_signed()));
    }

    #[test]
    fn test_empty_requests_is_input_error() {
        let result = planner().plan(&[], Operation::Subscribe);
        assert!(matches!(result, Err(ExchangeError::InvalidSubscription(_))));
    }

    #[test]
    fn test_only_matching_operation_is_planned() {
        let requests = vec![
            SubscriptionRequest::subscribe("LEVEL1", &["BTC-PERP"]),
            SubscriptionRequest::unsubscribe("FUNDING", &["BTC-PERP"]),
        ];

        let payloads = planner().plan(&requests, Operation::Unsubscribe).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].channels, vec!["FUNDING"]);
        assert_eq!(payloads[0].operation, Operation::Unsubscribe);

        let only_subscribes = vec![SubscriptionRequest::subscribe("LEVEL1", &["BTC-PERP"])];
        assert!(planner()
            .plan(&only_subscribes, Operation::Unsubscribe)
            .is_err());
    }

    #[test]
    fn test_blank_channel_rejected() {
        let requests = vec![SubscriptionRequest::subscribe("  ", &["BTC-PERP"])];
        assert!(matches!(
            planner().plan(&requests, Operation::Subscribe),
            Err(ExchangeError::InvalidSubscription(_))
        ));
    }

    #[test]
    fn test_channel_without_instruments_groups_with_other_empty_sets() {
        let requests = vec![
            SubscriptionRequest::subscribe("INSTRUMENTS", &[]),
            SubscriptionRequest::subscribe("HEARTBEAT", &[]),
        ];

        let payloads = planner().plan(&requests, Operation::Subscribe).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].channels, vec!["HEARTBEAT", "INSTRUMENTS"]);
        assert!(payloads[0].instruments.is_empty());
    }
}
