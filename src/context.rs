use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Immutable, request-scoped metadata carried through the call chain:
/// deadline, identity, and W3C trace state.
///
/// Lives for the lifetime of one request; `ToolCall`/`ToolResult` are
/// single-use value objects that flow through it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
    pub traceparent: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub budget: Option<u64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            user_id: None,
            tenant_id: None,
            traceparent: None,
            deadline: None,
            budget: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Convenience: a deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Utc::now() + ChronoDuration::from_std(timeout).unwrap_or_default());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_budget(mut self, budget: u64) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Time remaining until `deadline`, or `None` if no deadline is set.
    /// Clamped to zero if already past.
    pub fn remaining_time(&self) -> Option<Duration> {
        self.deadline.map(|d| {
            let delta = d - Utc::now();
            delta.to_std().unwrap_or(Duration::ZERO)
        })
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Utc::now() >= d)
    }

    pub fn elapsed_time(&self, since: DateTime<Utc>) -> Duration {
        (Utc::now() - since).to_std().unwrap_or(Duration::ZERO)
    }

    /// Emit the W3C `traceparent` plus `X-Request-ID`/`X-User-ID`/
    /// `X-Tenant-ID`/`X-Deadline-Seconds` headers for outbound propagation
    /// (e.g. to a remote tool server).
    pub fn to_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("X-Request-ID".to_string(), self.request_id.clone());
        if let Some(user_id) = &self.user_id {
            headers.insert("X-User-ID".to_string(), user_id.clone());
        }
        if let Some(tenant_id) = &self.tenant_id {
            headers.insert("X-Tenant-ID".to_string(), tenant_id.clone());
        }
        if let Some(traceparent) = &self.traceparent {
            headers.insert("traceparent".to_string(), traceparent.clone());
        } else {
            headers.insert("traceparent".to_string(), default_traceparent());
        }
        if let Some(remaining) = self.remaining_time() {
            headers.insert(
                "X-Deadline-Seconds".to_string(),
                remaining.as_secs_f64().to_string(),
            );
        }
        headers
    }

    /// Reconstruct an `ExecutionContext` from headers produced by
    /// `to_headers`. Fields without a header carrier (`budget`, `metadata`)
    /// are left at their defaults.
    pub fn from_headers(headers: &HashMap<String, String>) -> Self {
        let mut ctx = Self::new();
        if let Some(request_id) = headers.get("X-Request-ID") {
            ctx.request_id = request_id.clone();
        }
        ctx.user_id = headers.get("X-User-ID").cloned();
        ctx.tenant_id = headers.get("X-Tenant-ID").cloned();
        ctx.traceparent = headers.get("traceparent").cloned();
        if let Some(secs) = headers
            .get("X-Deadline-Seconds")
            .and_then(|s| s.parse::<f64>().ok())
        {
            ctx.deadline = Some(Utc::now() + ChronoDuration::milliseconds((secs * 1000.0) as i64));
        }
        ctx
    }
}

fn default_traceparent() -> String {
    let trace_id = Uuid::new_v4().simple().to_string();
    let span_id = &Uuid::new_v4().simple().to_string()[..16];
    format!("00-{trace_id}-{span_id}-01")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_round_trip_identity_fields() {
        let ctx = ExecutionContext::new()
            .with_user_id("u1")
            .with_tenant_id("t1");
        let headers = ctx.to_headers();
        let restored = ExecutionContext::from_headers(&headers);
        assert_eq!(restored.request_id, ctx.request_id);
        assert_eq!(restored.user_id, ctx.user_id);
        assert_eq!(restored.tenant_id, ctx.tenant_id);
        assert_eq!(restored.traceparent, ctx.traceparent);
    }

    #[test]
    fn headers_round_trip_deadline_within_tolerance() {
        let ctx = ExecutionContext::new().with_timeout(Duration::from_secs(30));
        let headers = ctx.to_headers();
        let restored = ExecutionContext::from_headers(&headers);
        let original_remaining = ctx.remaining_time().unwrap().as_secs_f64();
        let restored_remaining = restored.remaining_time().unwrap().as_secs_f64();
        assert!((original_remaining - restored_remaining).abs() < 1.0);
    }

    #[test]
    fn is_expired_true_once_past_deadline() {
        let ctx = ExecutionContext::new().with_deadline(Utc::now() - ChronoDuration::seconds(1));
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining_time(), Some(Duration::ZERO));
    }

    #[test]
    fn no_deadline_never_expires() {
        let ctx = ExecutionContext::new();
        assert!(!ctx.is_expired());
        assert!(ctx.remaining_time().is_none());
    }
}
