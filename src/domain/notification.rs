use crate::error::{AppError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Gateway status codes that indicate the request may succeed if sent again.
pub const DEFAULT_TRANSIENT_CODES: [u8; 3] = [PROCESSING_ERROR, SHUTDOWN, UNKNOWN_ERROR];

pub const PROCESSING_ERROR: u8 = 1;
pub const MISSING_DEVICE_TOKEN: u8 = 2;
pub const INVALID_TOKEN_SIZE: u8 = 5;
pub const INVALID_TOKEN: u8 = 8;
pub const SHUTDOWN: u8 = 10;
pub const UNKNOWN_ERROR: u8 = 255;

/// Canonicalizes a device token as handed over by clients: spaces removed, hex upper-cased.
#[must_use]
pub fn normalize_token(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_uppercase).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    targets: Vec<String>,
    title: String,
    body: String,
    badge: u32,
}

impl NotificationPayload {
    /// Builds a payload for an ordered set of device tokens.
    ///
    /// # Errors
    /// Returns `AppError::InvalidPayload` if `targets` is empty or contains duplicates.
    pub fn new(
        targets: Vec<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        badge: u32,
    ) -> Result<Self> {
        if targets.is_empty() {
            return Err(AppError::InvalidPayload("at least one target is required".to_string()));
        }

        let mut seen = HashSet::with_capacity(targets.len());
        for target in &targets {
            if target.is_empty() {
                return Err(AppError::InvalidPayload("empty device token".to_string()));
            }
            if !seen.insert(target.as_str()) {
                return Err(AppError::InvalidPayload(format!("duplicate target {target}")));
            }
        }

        Ok(Self { targets, title: title.into(), body: body.into(), badge })
    }

    #[must_use]
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[must_use]
    pub const fn badge(&self) -> u32 {
        self.badge
    }

    /// The same alert addressed to a subset of the original targets, in original order.
    /// Returns `None` when no original target is in `subset`.
    #[must_use]
    pub fn restricted_to(&self, subset: &[String]) -> Option<Self> {
        let targets: Vec<String> = self.targets.iter().filter(|t| subset.contains(t)).cloned().collect();
        if targets.is_empty() {
            return None;
        }
        Some(Self { targets, title: self.title.clone(), body: self.body.clone(), badge: self.badge })
    }
}

/// Per-device rejection classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectionKind {
    /// The token is no longer valid at the gateway (`DeviceRejectedPermanent`).
    Permanent,
    /// Delivery may succeed if attempted again (`DeviceRejectedTransient`).
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePolicy {
    transient_codes: Vec<u8>,
}

impl FailurePolicy {
    #[must_use]
    pub const fn new(transient_codes: Vec<u8>) -> Self {
        Self { transient_codes }
    }

    #[must_use]
    pub fn classify(&self, code: u8) -> RejectionKind {
        if self.transient_codes.contains(&code) { RejectionKind::Transient } else { RejectionKind::Permanent }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSIENT_CODES.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceFailure {
    pub code: u8,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchError {
    pub code: u8,
    pub message: String,
}

/// Outcome of delivering one batch, as reported by the gateway and merged across retries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub failed: BTreeMap<String, DeviceFailure>,
    pub errors: Vec<BatchError>,
    pub retryable: Vec<String>,
    pub retry_rounds: u32,
}

impl DeliveryResult {
    #[must_use]
    pub fn needs_retry(&self) -> bool {
        !self.retryable.is_empty()
    }

    /// Tokens the gateway rejected for good. The caller owns the decision to invalidate them.
    #[must_use]
    pub fn permanent_failures(&self, policy: &FailurePolicy) -> Vec<&str> {
        self.failed
            .iter()
            .filter(|(_, failure)| policy.classify(failure.code) == RejectionKind::Permanent)
            .map(|(token, _)| token.as_str())
            .collect()
    }

    /// Tokens worth sending again: the gateway's retryable list plus transient rejections,
    /// in the payload's order.
    #[must_use]
    pub fn retry_candidates(&self, payload: &NotificationPayload, policy: &FailurePolicy) -> Vec<String> {
        payload
            .targets()
            .iter()
            .filter(|token| {
                self.retryable.contains(token)
                    || self
                        .failed
                        .get(token.as_str())
                        .is_some_and(|failure| policy.classify(failure.code) == RejectionKind::Transient)
            })
            .cloned()
            .collect()
    }

    /// Replaces the outcomes of `retried` tokens with those of the retry round.
    /// Outcomes the retry reports for tokens it was not sent are dropped.
    #[must_use]
    pub fn merge_retry(mut self, retried: &[String], retry: Self) -> Self {
        for token in retried {
            self.failed.remove(token);
        }
        self.failed.extend(retry.failed.into_iter().filter(|(token, _)| retried.contains(token)));
        self.retryable = retry.retryable.into_iter().filter(|token| retried.contains(token)).collect();
        self.errors.extend(retry.errors);
        self.retry_rounds += 1;
        self
    }
}
