//! Trace context propagation through record headers.
//!
//! A publisher stamps the W3C `traceparent` of its current span onto the
//! record headers; a consumer reads it back to parent its own spans.
//!
//! ```text
//! traceparent: 00-<32 hex trace id>-<16 hex span id>-<2 hex flags>
//! ```

use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use voicecore_event_bus::Headers;

/// Header name used on bus records.
pub const TRACEPARENT_HEADER: &str = "traceparent";

const VERSION: &str = "00";

/// Trace position carried across the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagatedContext {
    /// Trace ID (32 hex characters)
    pub trace_id: String,
    /// Parent span ID (16 hex characters)
    pub span_id: String,
    pub trace_flags: u8,
}

impl PropagatedContext {
    /// Context of the current `tracing` span, if it belongs to a trace.
    pub fn current() -> Option<Self> {
        let context = tracing::Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        span_context.is_valid().then(|| Self {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
            trace_flags: span_context.trace_flags().to_u8(),
        })
    }

    /// Parse a `traceparent` value. Unknown versions and all-zero ids are rejected.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let (version, trace_id, span_id, flags) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || version != VERSION {
            return None;
        }
        let hex = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit());
        if !hex(trace_id, 32) || !hex(span_id, 16) || !hex(flags, 2) {
            return None;
        }
        if trace_id.bytes().all(|b| b == b'0') || span_id.bytes().all(|b| b == b'0') {
            return None;
        }
        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            trace_flags: u8::from_str_radix(flags, 16).ok()?,
        })
    }

    #[must_use]
    pub fn to_traceparent(&self) -> String {
        format!(
            "{VERSION}-{}-{}-{:02x}",
            self.trace_id, self.span_id, self.trace_flags
        )
    }

    /// Remote OpenTelemetry span context to parent local spans on.
    pub fn to_span_context(&self) -> SpanContext {
        SpanContext::new(
            TraceId::from_hex(&self.trace_id).unwrap_or(TraceId::INVALID),
            SpanId::from_hex(&self.span_id).unwrap_or(SpanId::INVALID),
            TraceFlags::new(self.trace_flags),
            true,
            TraceState::default(),
        )
    }
}

/// Append the current span's `traceparent` to `headers`, if there is one.
///
/// Returns whether a header was added.
pub fn inject_traceparent(headers: &mut Headers) -> bool {
    match PropagatedContext::current() {
        Some(context) => {
            headers.retain(|(name, _)| name != TRACEPARENT_HEADER);
            headers.push((
                TRACEPARENT_HEADER.to_string(),
                context.to_traceparent().into_bytes(),
            ));
            true
        }
        None => false,
    }
}

/// Read the `traceparent` header of a consumed record.
pub fn extract_traceparent(headers: &[(String, Vec<u8>)]) -> Option<PropagatedContext> {
    headers
        .iter()
        .find(|(name, _)| name == TRACEPARENT_HEADER)
        .and_then(|(_, value)| std::str::from_utf8(value).ok())
        .and_then(PropagatedContext::from_traceparent)
}

/// Make `span` a child of the propagated context.
pub fn link_parent(span: &tracing::Span, parent: &PropagatedContext) {
    let context = opentelemetry::Context::new().with_remote_span_context(parent.to_span_context());
    span.set_parent(context);
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn test_traceparent_round_trip() {
        let context = PropagatedContext::from_traceparent(SAMPLE).unwrap();
        assert_eq!(context.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(context.span_id, "b7ad6b7169203331");
        assert_eq!(context.trace_flags, 1);
        assert_eq!(context.to_traceparent(), SAMPLE);
        assert!(context.to_span_context().is_valid());
    }

    #[test]
    fn test_malformed_traceparent_rejected() {
        for value in [
            "",
            "01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            "00-00000000000000000000000000000000-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01",
            "00-0af7651916cd43dd-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-extra",
            "00-zzf7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        ] {
            assert!(PropagatedContext::from_traceparent(value).is_none(), "{value}");
        }
    }

    #[test]
    fn test_extract_from_headers() {
        let headers = vec![
            ("tenant".to_string(), b"t1".to_vec()),
            (TRACEPARENT_HEADER.to_string(), SAMPLE.as_bytes().to_vec()),
        ];
        let context = extract_traceparent(&headers).unwrap();
        assert_eq!(context.span_id, "b7ad6b7169203331");
        assert!(extract_traceparent(&headers[..1]).is_none());
    }

    #[test]
    fn test_inject_without_active_trace_is_noop() {
        let mut headers = Headers::new();
        assert!(!inject_traceparent(&mut headers));
        assert!(headers.is_empty());
    }
}
