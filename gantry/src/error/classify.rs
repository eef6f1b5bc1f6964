//! Turning failures into the GraphQL errors a client gets to see.

use displaydoc::Display;
use serde_json::json;
use thiserror::Error;
use tower::BoxError;

use super::DocumentErrors;
use super::RequestError;
use crate::configuration::MaskedErrors;
use crate::graphql;
use crate::graphql::IntoGraphQLErrors;
use crate::json_ext::Object;

const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";

/// request aborted
///
/// Raised when the client went away or the server is shutting down. Nothing is reported to
/// the client.
#[derive(Error, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[ignore_extra_doc_attributes]
pub struct Aborted;

/// Several failures raised together.
#[derive(Error, Debug, Default)]
pub struct AggregateError {
    pub errors: Vec<BoxError>,
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} errors occurred", self.errors.len())
    }
}

impl AggregateError {
    pub fn new(errors: impl IntoIterator<Item = BoxError>) -> Self {
        Self {
            errors: errors.into_iter().collect(),
        }
    }
}

/// Normalize a failure into the list of errors sent to the client.
///
/// Aggregates are flattened, aborts and timeouts produce no error at all, and anything that
/// is not a clean GraphQL error is masked according to `masking`.
pub fn classify(error: BoxError, masking: &MaskedErrors) -> Vec<graphql::Error> {
    let mut errors = Vec::new();
    classify_into(error, masking, &mut errors);
    errors
}

fn classify_into(error: BoxError, masking: &MaskedErrors, errors: &mut Vec<graphql::Error>) {
    let error = match error.downcast::<AggregateError>() {
        Ok(aggregate) => {
            for inner in aggregate.errors {
                classify_into(inner, masking, errors);
            }
            return;
        }
        Err(error) => error,
    };

    if error.is::<Aborted>() || error.is::<tokio::time::error::Elapsed>() {
        tracing::debug!(%error, "request aborted");
        return;
    }

    let error = match error.downcast::<DocumentErrors>() {
        Ok(document_errors) => {
            errors.extend(document_errors.into_graphql_errors());
            return;
        }
        Err(error) => error,
    };

    let classified = match error.downcast::<RequestError>() {
        Ok(request_error) => request_error.to_graphql_error(),
        Err(error) => match error.downcast::<graphql::Error>() {
            Ok(graphql_error) => normalize_error(*graphql_error, masking),
            Err(error) => {
                if masking.enabled {
                    masked(error, masking)
                } else {
                    graphql::Error::builder()
                        .message(error.to_string())
                        .extension_code(INTERNAL_SERVER_ERROR)
                        .extension("unexpected", true)
                        .build()
                        .with_boxed_original_error(error)
                }
            }
        },
    };

    if !errors
        .iter()
        .any(|seen| same_instance(seen, &classified))
    {
        errors.push(classified);
    }
}

/// Errors that merely look alike are all reported. Only a failure raised once and reached
/// through several aggregates, which then shares its original error, is reported once.
fn same_instance(a: &graphql::Error, b: &graphql::Error) -> bool {
    match (a.original_error(), b.original_error()) {
        (Some(a), Some(b)) => std::sync::Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Replace an error that did not originate as a GraphQL error with the generic masked error.
///
/// The `http` extension, path and locations of the error are kept so that status and header
/// propagation still work. Clean GraphQL errors are returned as is.
pub fn mask_error(error: graphql::Error, masking: &MaskedErrors) -> graphql::Error {
    if error.is_original() {
        return error;
    }

    let original_message = error
        .original_error()
        .map(|original| original.to_string())
        .unwrap_or_else(|| error.message.clone());
    tracing::error!(error = %original_message, path = ?error.path, "unexpected error");

    let mut extensions = Object::new();
    extensions.insert("code".to_string(), INTERNAL_SERVER_ERROR.into());
    extensions.insert("unexpected".to_string(), true.into());
    if let Some(http) = error.http_extension() {
        http.merge_into(&mut extensions);
    }
    if masking.dev {
        extensions.insert(
            "originalError".to_string(),
            json!({ "message": original_message }),
        );
    }

    let mut masked_error = graphql::Error::builder()
        .message(masking.message.clone())
        .locations(error.locations.clone())
        .extensions(extensions)
        .build();
    masked_error.path = error.path.clone();
    masked_error.with_original_error(error)
}

/// Mask `error` when masking is enabled, otherwise only flag it as unexpected if it did not
/// start out as a GraphQL error.
pub fn normalize_error(mut error: graphql::Error, masking: &MaskedErrors) -> graphql::Error {
    if masking.enabled {
        return mask_error(error, masking);
    }
    if !error.is_original() {
        error
            .extensions
            .entry("code")
            .or_insert_with(|| INTERNAL_SERVER_ERROR.into());
        error
            .extensions
            .entry("unexpected")
            .or_insert_with(|| true.into());
    }
    error
}

fn masked(error: BoxError, masking: &MaskedErrors) -> graphql::Error {
    let wrapper = graphql::Error::builder()
        .message(error.to_string())
        .build()
        .with_boxed_original_error(error);
    mask_error(wrapper, masking)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;

    fn masking() -> MaskedErrors {
        MaskedErrors::default()
    }

    #[test]
    fn clean_graphql_errors_are_kept() {
        let error = graphql::Error::builder()
            .message("A")
            .extension("http", json!({"status": 401}))
            .build();
        let errors = classify(Box::new(error.clone()), &masking());
        assert_eq!(errors, vec![error]);
    }

    #[traced_test]
    #[test]
    fn unexpected_errors_are_masked() {
        let io = std::io::Error::other("connection string leaked");
        let errors = classify(Box::new(io), &masking());
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            json!([{
                "message": "Unexpected error.",
                "extensions": { "code": "INTERNAL_SERVER_ERROR", "unexpected": true }
            }])
        );
        assert!(!errors[0].is_original());
        assert!(logs_contain("connection string leaked"));
    }

    #[test]
    fn masking_keeps_http_extension_and_path() {
        let wrapped = graphql::Error::builder()
            .message("db down")
            .path(crate::json_ext::Path::from("a"))
            .extension("http", json!({"status": 503}))
            .build()
            .with_original_error(std::io::Error::other("db down"));
        let masked = mask_error(wrapped, &masking());
        assert_eq!(
            serde_json::to_value(&masked).unwrap(),
            json!({
                "message": "Unexpected error.",
                "path": ["a"],
                "extensions": {
                    "code": "INTERNAL_SERVER_ERROR",
                    "unexpected": true,
                    "http": { "status": 503 }
                }
            })
        );
    }

    #[test]
    fn dev_mode_attaches_the_original_error() {
        let masking = MaskedErrors {
            dev: true,
            ..MaskedErrors::default()
        };
        let errors = classify(Box::new(std::io::Error::other("boom")), &masking);
        assert_eq!(
            errors[0].extensions["originalError"],
            json!({ "message": "boom" })
        );
    }

    #[test]
    fn unmasked_errors_are_normalized() {
        let masking = MaskedErrors {
            enabled: false,
            ..MaskedErrors::default()
        };
        let errors = classify(Box::new(std::io::Error::other("boom")), &masking);
        assert_eq!(
            serde_json::to_value(&errors).unwrap(),
            json!([{
                "message": "boom",
                "extensions": { "code": "INTERNAL_SERVER_ERROR", "unexpected": true }
            }])
        );
    }

    #[test]
    fn aggregates_are_flattened_in_order() {
        let a = graphql::Error::builder().message("A").build();
        let b = graphql::Error::builder().message("B").build();
        let aggregate = AggregateError::new([
            Box::new(a.clone()) as BoxError,
            Box::new(AggregateError::new([
                Box::new(b.clone()) as BoxError,
                Box::new(a.clone()) as BoxError,
            ])),
            Box::new(Aborted),
        ]);
        assert_eq!(
            classify(Box::new(aggregate), &masking()),
            vec![a.clone(), b, a]
        );
    }

    #[test]
    fn separately_raised_equal_errors_are_all_reported() {
        let aggregate = AggregateError::new([
            Box::new(graphql::Error::builder().message("Forbidden").build()) as BoxError,
            Box::new(graphql::Error::builder().message("Forbidden").build()) as BoxError,
        ]);
        let errors = classify(Box::new(aggregate), &masking());
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|error| error.message == "Forbidden"));
    }

    #[test]
    fn a_shared_failure_is_reported_once() {
        let masking = MaskedErrors {
            enabled: false,
            ..MaskedErrors::default()
        };
        let shared = graphql::Error::builder()
            .message("db down")
            .build()
            .with_original_error(std::io::Error::other("db down"));
        let look_alike = graphql::Error::builder()
            .message("db down")
            .build()
            .with_original_error(std::io::Error::other("db down"));
        let aggregate = AggregateError::new([
            Box::new(shared.clone()) as BoxError,
            Box::new(AggregateError::new([Box::new(shared) as BoxError])),
            Box::new(look_alike),
        ]);
        assert_eq!(classify(Box::new(aggregate), &masking).len(), 2);
    }

    #[traced_test]
    #[test]
    fn aborts_are_only_debug_logged() {
        assert!(classify(Box::new(Aborted), &masking()).is_empty());
        assert!(logs_contain("request aborted"));
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .filter(|line| line.contains(" ERROR ") || line.contains(" WARN "))
                .count()
            {
                0 => Ok(()),
                n => Err(format!("expected no warnings or errors, got {n}")),
            }
        });
    }

    #[test]
    fn document_errors_are_reported_as_is() {
        let document_errors = DocumentErrors::new(
            crate::error::DocumentPhase::Parse,
            vec![graphql::Error::builder().message("Syntax Error").build()],
        );
        let errors = classify(Box::new(document_errors.clone()), &masking());
        assert_eq!(errors, document_errors.errors);
        assert_eq!(errors[0].extension_code().as_deref(), Some("GRAPHQL_PARSE_FAILED"));
    }

    #[test]
    fn unmasked_wrapped_errors_are_flagged() {
        let masking = MaskedErrors {
            enabled: false,
            ..MaskedErrors::default()
        };
        let wrapped = graphql::Error::builder()
            .message("db down")
            .build()
            .with_original_error(std::io::Error::other("db down"));
        let error = normalize_error(wrapped, &masking);
        assert_eq!(error.message, "db down");
        assert_eq!(error.extension_code().as_deref(), Some("INTERNAL_SERVER_ERROR"));
        assert!(error.is_flagged_unexpected());
    }

    #[test]
    fn request_errors_are_never_masked() {
        let errors = classify(Box::new(RequestError::MissingQuery), &masking());
        assert_eq!(errors[0].message, "Must provide query string.");
        assert!(errors[0].is_original());
    }
}
