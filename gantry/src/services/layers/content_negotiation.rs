//! Selection of the response representation from the `Accept` header and the shape of the
//! result.

use http::HeaderMap;
use http::header::ACCEPT;
use mediatype::MediaType;
use mediatype::MediaTypeList;
use mediatype::ReadParams;

/// The representations a response can be sent in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NegotiatedMediaType {
    GraphQLResponseJson,
    Json,
    MultipartMixed,
    EventStream,
}

/// Server preference for a single result.
const SINGLE_RESULT: &[NegotiatedMediaType] = &[
    NegotiatedMediaType::GraphQLResponseJson,
    NegotiatedMediaType::Json,
    NegotiatedMediaType::MultipartMixed,
    NegotiatedMediaType::EventStream,
];

/// Server preference for a stream of results.
const STREAMED_RESULT: &[NegotiatedMediaType] = &[
    NegotiatedMediaType::EventStream,
    NegotiatedMediaType::MultipartMixed,
];

impl NegotiatedMediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiatedMediaType::GraphQLResponseJson => "application/graphql-response+json",
            NegotiatedMediaType::Json => "application/json",
            NegotiatedMediaType::MultipartMixed => "multipart/mixed",
            NegotiatedMediaType::EventStream => "text/event-stream",
        }
    }

    pub(crate) fn is_streaming(self) -> bool {
        matches!(
            self,
            NegotiatedMediaType::MultipartMixed | NegotiatedMediaType::EventStream
        )
    }

    fn essence(self) -> (&'static str, &'static str) {
        match self {
            NegotiatedMediaType::GraphQLResponseJson => ("application", "graphql-response+json"),
            NegotiatedMediaType::Json => ("application", "json"),
            NegotiatedMediaType::MultipartMixed => ("multipart", "mixed"),
            NegotiatedMediaType::EventStream => ("text", "event-stream"),
        }
    }
}

impl std::fmt::Display for NegotiatedMediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of content negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Negotiation {
    Accepted(NegotiatedMediaType),
    /// A stream of results was produced but the client only takes single JSON documents.
    SubscriptionsNotSupported,
    /// Nothing the client accepts can carry the result.
    NotAcceptable(&'static [NegotiatedMediaType]),
}

impl Negotiation {
    /// Value of the `Accept` header of a `406` response listing `acceptable`.
    pub(crate) fn accept_header(acceptable: &[NegotiatedMediaType]) -> String {
        acceptable
            .iter()
            .map(|media_type| media_type.as_str())
            .collect::<Vec<_>>()
            .join("; charset=utf-8, ")
    }
}

/// One entry of an `Accept` header.
#[derive(Clone, Debug, PartialEq)]
struct AcceptEntry {
    ty: String,
    subty: String,
    quality: f32,
}

impl AcceptEntry {
    fn any() -> Self {
        Self {
            ty: "*".to_string(),
            subty: "*".to_string(),
            quality: 1.0,
        }
    }

    fn from_media_type(mime: &MediaType) -> Self {
        let subty = match &mime.suffix {
            Some(suffix) => format!("{}+{}", mime.subty.as_str(), suffix.as_str()),
            None => mime.subty.as_str().to_string(),
        };
        let quality = mediatype::Name::new("q")
            .and_then(|q| mime.get_param(q))
            .and_then(|value| value.as_str().parse::<f32>().ok())
            .map(|quality| quality.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        Self {
            ty: mime.ty.as_str().to_ascii_lowercase(),
            subty: subty.to_ascii_lowercase(),
            quality,
        }
    }

    /// How specifically this entry names `(ty, subty)`, if it matches at all.
    fn specificity(&self, ty: &str, subty: &str) -> Option<u8> {
        match (self.ty.as_str(), self.subty.as_str()) {
            ("*", "*") => Some(0),
            (entry_ty, "*") if entry_ty == ty => Some(1),
            (entry_ty, entry_subty) if entry_ty == ty && entry_subty == subty => Some(2),
            _ => None,
        }
    }
}

fn parse_accept_header(headers: &HeaderMap) -> Vec<AcceptEntry> {
    let values: Vec<&str> = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .collect();
    if values.is_empty() {
        return vec![AcceptEntry::any()];
    }
    values
        .into_iter()
        .flat_map(MediaTypeList::new)
        .flatten()
        .map(|mime| AcceptEntry::from_media_type(&mime))
        .collect()
}

/// Quality the client gives to `media_type`: the one of the most specific matching entry.
fn quality(entries: &[AcceptEntry], media_type: NegotiatedMediaType) -> f32 {
    let (ty, subty) = media_type.essence();
    entries
        .iter()
        .filter_map(|entry| Some((entry.specificity(ty, subty)?, entry.quality)))
        .fold(None, |best: Option<(u8, f32)>, (specificity, quality)| match best {
            Some((best_specificity, best_quality)) if best_specificity > specificity => {
                Some((best_specificity, best_quality))
            }
            Some((best_specificity, best_quality)) if best_specificity == specificity => {
                Some((specificity, best_quality.max(quality)))
            }
            _ => Some((specificity, quality)),
        })
        .map(|(_, quality)| quality)
        .unwrap_or(0.0)
}

/// The acceptable candidate with the highest quality, the server preference breaking ties.
fn best_match(
    entries: &[AcceptEntry],
    candidates: &[NegotiatedMediaType],
) -> Option<NegotiatedMediaType> {
    let mut best: Option<(NegotiatedMediaType, f32)> = None;
    for candidate in candidates {
        let quality = quality(entries, *candidate);
        if quality <= 0.0 {
            continue;
        }
        if best.is_none_or(|(_, best_quality)| quality > best_quality) {
            best = Some((*candidate, quality));
        }
    }
    best.map(|(media_type, _)| media_type)
}

/// Choose the representation of a response.
///
/// Without an `Accept` header anything is acceptable.
pub(crate) fn negotiate(headers: &HeaderMap, streaming: bool) -> Negotiation {
    let entries = parse_accept_header(headers);
    let negotiation = if streaming {
        match best_match(&entries, STREAMED_RESULT) {
            Some(media_type) => Negotiation::Accepted(media_type),
            None if best_match(&entries, SINGLE_RESULT).is_some() => {
                Negotiation::SubscriptionsNotSupported
            }
            None => Negotiation::NotAcceptable(STREAMED_RESULT),
        }
    } else {
        match best_match(&entries, SINGLE_RESULT) {
            Some(media_type) => Negotiation::Accepted(media_type),
            None => Negotiation::NotAcceptable(SINGLE_RESULT),
        }
    };
    tracing::trace!(streaming, ?negotiation, "content negotiation");
    negotiation
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use rstest::rstest;

    use super::NegotiatedMediaType::*;
    use super::*;

    fn accept(value: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = value {
            headers.insert(ACCEPT, HeaderValue::from_static(value));
        }
        headers
    }

    #[rstest]
    #[case::no_header(None, Negotiation::Accepted(GraphQLResponseJson))]
    #[case::wildcard(Some("*/*"), Negotiation::Accepted(GraphQLResponseJson))]
    #[case::json(Some("application/json"), Negotiation::Accepted(Json))]
    #[case::application_wildcard(Some("application/*"), Negotiation::Accepted(GraphQLResponseJson))]
    #[case::graphql_response(
        Some("application/graphql-response+json, application/json"),
        Negotiation::Accepted(GraphQLResponseJson)
    )]
    #[case::quality(
        Some("application/graphql-response+json;q=0.5, application/json"),
        Negotiation::Accepted(Json)
    )]
    #[case::charset(Some("application/json; charset=utf-8"), Negotiation::Accepted(Json))]
    #[case::multipart_only(Some("multipart/mixed"), Negotiation::Accepted(MultipartMixed))]
    #[case::event_stream_only(Some("text/event-stream"), Negotiation::Accepted(EventStream))]
    #[case::excluded(
        Some("application/json;q=0, */*"),
        Negotiation::Accepted(GraphQLResponseJson)
    )]
    #[case::nothing(Some("text/html"), Negotiation::NotAcceptable(SINGLE_RESULT))]
    fn single_results(#[case] header: Option<&'static str>, #[case] expected: Negotiation) {
        assert_eq!(negotiate(&accept(header), false), expected);
    }

    #[rstest]
    #[case::no_header(None, Negotiation::Accepted(EventStream))]
    #[case::event_stream(Some("text/event-stream"), Negotiation::Accepted(EventStream))]
    #[case::multipart(Some("multipart/mixed"), Negotiation::Accepted(MultipartMixed))]
    #[case::preferred_multipart(
        Some("text/event-stream;q=0.2, multipart/mixed"),
        Negotiation::Accepted(MultipartMixed)
    )]
    #[case::json_only(Some("application/json"), Negotiation::SubscriptionsNotSupported)]
    #[case::graphql_response_only(
        Some("application/graphql-response+json"),
        Negotiation::SubscriptionsNotSupported
    )]
    #[case::nothing(Some("image/png"), Negotiation::NotAcceptable(STREAMED_RESULT))]
    fn streamed_results(#[case] header: Option<&'static str>, #[case] expected: Negotiation) {
        assert_eq!(negotiate(&accept(header), true), expected);
    }

    #[test]
    fn negotiation_is_stable() {
        let headers = accept(Some("multipart/mixed;q=0.9, text/event-stream;q=0.9, */*;q=0.1"));
        let first = negotiate(&headers, true);
        for _ in 0..10 {
            assert_eq!(negotiate(&headers, true), first);
        }
        assert_eq!(first, Negotiation::Accepted(EventStream));
    }

    #[test]
    fn not_acceptable_header_lists_types() {
        assert_eq!(
            Negotiation::accept_header(SINGLE_RESULT),
            "application/graphql-response+json; charset=utf-8, application/json; charset=utf-8, \
             multipart/mixed; charset=utf-8, text/event-stream"
        );
        assert_eq!(
            Negotiation::accept_header(STREAMED_RESULT),
            "text/event-stream; charset=utf-8, multipart/mixed"
        );
    }
}
