//! The URIs of the cloud platform API.
//!
//! For endpoints that take parameters, e.g. '/v1/documents/{collection}/{id}', use [format_endpoint].

/// The route for registering an account with an email and password.
pub const SIGN_UP: &str = "/v1/accounts/sign-up";
/// The route for signing in with an email and password.
pub const SIGN_IN: &str = "/v1/accounts/sign-in";
/// The route for signing in with a third-party identity.
pub const FEDERATED_SIGN_IN: &str = "/v1/accounts/federated";
/// The route for revoking the caller's session token.
pub const SIGN_OUT: &str = "/v1/accounts/sign-out";
/// The route for requesting a password reset.
pub const PASSWORD_RESET: &str = "/v1/accounts/password-reset";
/// The route to read, merge into and delete a document.
pub const DOCUMENT: &str = "/v1/documents/{collection}/{id}";
/// The route to wait for the next revision of a document.
pub const DOCUMENT_LISTEN: &str = "/v1/documents/{collection}/{id}/listen";

/// Replace each `{name}` parameter in `endpoint_path` with its value from `params`.
///
/// Parameters without a value are left in place.
pub fn format_endpoint(endpoint_path: &str, params: &[(&str, &str)]) -> String {
    params
        .iter()
        .fold(endpoint_path.to_owned(), |path, (name, value)| {
            path.replace(&format!("{{{name}}}"), value)
        })
}
